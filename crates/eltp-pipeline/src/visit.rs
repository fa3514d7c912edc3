//! Extract rules for point-of-interest visit exports
//!
//! Clients drop one file per site named `<prefix>-<code>.<ext>`, e.g.
//! `site-42.csv`. The code after the first dash identifies the point of
//! interest and ends up in the extract context.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::Context;
use crate::stage::ExtractRules;
use crate::storage::FetchedDataset;

pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["csv"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitSettings {
    /// Lower-case extensions without the dot
    pub allowed_extensions: Vec<String>,
}

impl Default for VisitSettings {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl VisitSettings {
    /// `EXTRACT_ALLOWED_EXTENSIONS`, comma separated
    pub fn from_env() -> Self {
        match std::env::var("EXTRACT_ALLOWED_EXTENSIONS") {
            Ok(list) => Self {
                allowed_extensions: list
                    .split(',')
                    .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect(),
            },
            Err(_) => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisitExtractRules {
    settings: VisitSettings,
    observation_date: Option<NaiveDate>,
}

impl VisitExtractRules {
    pub fn new(settings: VisitSettings) -> Self {
        Self {
            settings,
            observation_date: None,
        }
    }

    /// Pin `obs_date` instead of using today's UTC date
    pub fn with_observation_date(mut self, date: NaiveDate) -> Self {
        self.observation_date = Some(date);
        self
    }
}

/// `site-42.csv` -> `("42", "csv")`
fn parse_name(name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let mut parts = stem.split('-');
    let prefix = parts.next()?;
    let code = parts.next()?;

    if prefix.is_empty() || code.is_empty() {
        return None;
    }
    Some((code, ext))
}

impl ExtractRules for VisitExtractRules {
    fn check_format(&self, file: &FetchedDataset) -> anyhow::Result<bool> {
        let Some((_, ext)) = parse_name(file.name()) else {
            return Ok(false);
        };

        let ext = ext.to_lowercase();
        Ok(self.settings.allowed_extensions.contains(&ext) && file.size() > 0)
    }

    fn create_context(&self, file: &FetchedDataset) -> anyhow::Result<Context> {
        let (code, _) = parse_name(file.name())
            .ok_or_else(|| anyhow::anyhow!("No site code in file name {}", file.name()))?;
        let date = self
            .observation_date
            .unwrap_or_else(|| Utc::now().date_naive());

        let mut context = Context::new();
        context.insert(
            "obs_date".to_string(),
            Value::String(date.format("%Y-%m-%d").to_string()),
        );
        context.insert("poi_code".to_string(), Value::String(code.to_string()));
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PayloadDataset;
    use serial_test::serial;

    fn file(name: &str, body: &[u8]) -> FetchedDataset {
        FetchedDataset::Payload(PayloadDataset::new(name, body.to_vec(), "memory://test"))
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(parse_name("site-42.csv"), Some(("42", "csv")));
        assert_eq!(parse_name("store-A7-2026.CSV"), Some(("A7", "CSV")));
        assert_eq!(parse_name("site42.csv"), None);
        assert_eq!(parse_name("-42.csv"), None);
        assert_eq!(parse_name("site-42"), None);
    }

    #[test]
    fn test_check_format() {
        let rules = VisitExtractRules::default();
        assert!(rules.check_format(&file("site-42.csv", b"a")).unwrap());
        assert!(rules.check_format(&file("site-42.CSV", b"a")).unwrap());
        assert!(!rules.check_format(&file("site-42.csv", b"")).unwrap());
        assert!(!rules.check_format(&file("site-42.xlsx", b"a")).unwrap());
        assert!(!rules.check_format(&file("readme.csv", b"a")).unwrap());
    }

    #[test]
    fn test_create_context() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let rules = VisitExtractRules::default().with_observation_date(date);

        let context = rules.create_context(&file("site-42.csv", b"a")).unwrap();

        assert_eq!(context["obs_date"], "2026-10-19");
        assert_eq!(context["poi_code"], "42");
        assert_eq!(context.len(), 2);
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        std::env::set_var("EXTRACT_ALLOWED_EXTENSIONS", " .TSV, csv,,");
        assert_eq!(
            VisitSettings::from_env().allowed_extensions,
            vec!["tsv".to_string(), "csv".to_string()]
        );

        std::env::remove_var("EXTRACT_ALLOWED_EXTENSIONS");
        assert_eq!(VisitSettings::from_env(), VisitSettings::default());
    }
}
