//! Model escalation policy.
//!
//! [`select_model_tier`] maps a classified compliance failure to the capability
//! tier that should attempt the repair. It is a pure function of its input so
//! that re-executing a build step always picks the same tier.
//!
//! | Signal                                          | Tier   |
//! |-------------------------------------------------|--------|
//! | lint/style failure                              | `Low`  |
//! | transcript carries an architectural signal      | `High` |
//! | type/build failure not spanning multiple files  | `Low`  |
//! | anything else                                   | `Mid`  |

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compliance::{ComplianceResult, FailureCategory};

/// Agent capability tier, ordered by cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Low,
    Mid,
    High,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Low => write!(f, "low"),
            ModelTier::Mid => write!(f, "mid"),
            ModelTier::High => write!(f, "high"),
        }
    }
}

/// Phrases that indicate a problem crossing file or module boundaries.
///
/// This list is a starting classifier, not an exhaustive one.
pub const ARCHITECTURAL_PHRASES: &[&str] = &[
    "circular dependency",
    "module type mismatch",
    "design inconsistency",
];

static MODULE_ALIGNMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)module\s+\S+\s+no longer aligns with\s+\S+\s+constraints")
        .expect("module alignment pattern is valid")
});

const MULTIPLE_FILES_PHRASE: &str = "multiple files";

/// Whether the transcript carries any architectural-issue signal.
pub fn is_architectural_issue(transcript: &str) -> bool {
    let lowered = transcript.to_lowercase();
    ARCHITECTURAL_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
        || MODULE_ALIGNMENT_REGEX.is_match(transcript)
}

/// Pick the capability tier for repairing a failed compliance pass.
pub fn select_model_tier(result: &ComplianceResult) -> ModelTier {
    let category = result.category().unwrap_or(FailureCategory::Unclassified);

    if category == FailureCategory::Lint {
        return ModelTier::Low;
    }

    if is_architectural_issue(&result.transcript) {
        return ModelTier::High;
    }

    if category == FailureCategory::TypeBuild
        && !result
            .transcript
            .to_lowercase()
            .contains(MULTIPLE_FILES_PHRASE)
    {
        return ModelTier::Low;
    }

    ModelTier::Mid
}

/// Concrete model names for each tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    pub low: String,
    pub mid: String,
    pub high: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            low: "haiku".to_string(),
            mid: "sonnet".to_string(),
            high: "opus".to_string(),
        }
    }
}

impl ModelCatalog {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Low => &self.low,
            ModelTier::Mid => &self.mid,
            ModelTier::High => &self.high,
        }
    }

    /// Apply per-request overrides on top of this catalog.
    pub fn with_overrides(&self, overrides: &ModelOverrides) -> Self {
        Self {
            low: overrides.low.clone().unwrap_or_else(|| self.low.clone()),
            mid: overrides.mid.clone().unwrap_or_else(|| self.mid.clone()),
            high: overrides.high.clone().unwrap_or_else(|| self.high.clone()),
        }
    }
}

/// Optional per-build model overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOverrides {
    #[serde(default)]
    pub low: Option<String>,
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub high: Option<String>,
}
