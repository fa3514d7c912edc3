//! Common types used across the ELTP pipeline

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Name of the context document written next to every stage output
pub const CONTEXT_FILE_NAME: &str = "context.json";

/// One of the four ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Extract,
    Transform,
    Load,
    #[serde(rename = "postprocess")]
    PostProcess,
}

impl Step {
    /// All steps in execution order
    pub const ALL: [Step; 4] = [Step::Extract, Step::Transform, Step::Load, Step::PostProcess];

    /// Path segment used for this step inside the datalake
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Extract => "extract",
            Step::Transform => "transform",
            Step::Load => "load",
            Step::PostProcess => "postprocess",
        }
    }

    /// The step whose output this step consumes, if any
    pub fn previous(&self) -> Option<Step> {
        match self {
            Step::Extract => None,
            Step::Transform => Some(Step::Extract),
            Step::Load => Some(Step::Transform),
            Step::PostProcess => Some(Step::Load),
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Step {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extract" | "e" => Ok(Step::Extract),
            "transform" | "t" => Ok(Step::Transform),
            "load" | "l" => Ok(Step::Load),
            "postprocess" | "post-process" | "post_process" | "p" => Ok(Step::PostProcess),
            _ => Err(CommonError::InvalidStep(s.to_string())),
        }
    }
}

/// Join key segments with `/`.
///
/// Leading and trailing slashes of every segment are dropped and empty
/// segments are skipped, so an unset prefix does not produce `//` or a
/// leading slash in object keys.
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| segment.trim_matches('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
