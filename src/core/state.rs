//! Context status

use serde::{Deserialize, Serialize};

/// Status of a Context lineage
///
/// Flips to `Timeout` once the lineage abort signal fires and never reverts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextStatus {
    /// Invokes may proceed
    #[default]
    Normal,
    /// The lineage timed out
    Timeout,
}

impl ContextStatus {
    /// Check if the lineage timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self, ContextStatus::Timeout)
    }
}

impl std::fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextStatus::Normal => write!(f, "normal"),
            ContextStatus::Timeout => write!(f, "timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ContextStatus::default().to_string(), "normal");
        assert!(ContextStatus::Timeout.is_timeout());
        assert!(!ContextStatus::Normal.is_timeout());
    }
}
