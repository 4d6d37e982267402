use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issue severity. Declaration order is the domain order, so `Ord` puts
/// `Critical` first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort key stored next to the label; lower sorts first.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: i64,
    pub analysis_id: Uuid,
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub suggestion: Option<String>,
    pub file_path: String,
    pub line_number: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub id: i64,
    pub analysis_id: Uuid,
    pub metric_type: String,
    pub value: f64,
    pub file_path: Option<String>,
}

/// An issue ready to be written; severity already checked.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub suggestion: Option<String>,
    pub file_path: String,
    pub line_number: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub metric_type: String,
    pub value: f64,
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_roundtrip() {
        for s in &["critical", "high", "medium", "low"] {
            let parsed: Severity = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("blocker".parse::<Severity>().is_err());
        assert!("Critical".parse::<Severity>().is_err());
    }

    #[test]
    fn test_severity_order_matches_rank() {
        let mut shuffled = vec![Severity::Low, Severity::Critical, Severity::Medium, Severity::High];
        shuffled.sort();
        assert_eq!(shuffled, Severity::ALL.to_vec());
        for pair in Severity::ALL.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_severity_serde() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::from_str::<Severity>("\"medium\"").unwrap(),
            Severity::Medium
        );
    }
}
