//! Constitutional validation verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final decision of the constitutional validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    Rejected,
    Conditional,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Conditional => write!(f, "CONDITIONAL"),
        }
    }
}

/// Sub-scores from the three review courts, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CourtScores {
    pub technical: f64,
    pub ethical: f64,
    pub operational: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalVerdict {
    pub courts: CourtScores,
    pub overall_score: f64,
    pub verdict: Verdict,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub audit_trail: Vec<String>,
    pub valid_until: DateTime<Utc>,
}

impl ConstitutionalVerdict {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }

    /// Whether this verdict lets a promotion through.
    pub fn passes(&self, accept_conditional: bool, min_score: f64) -> bool {
        let verdict_ok = match self.verdict {
            Verdict::Approved => true,
            Verdict::Conditional => accept_conditional,
            Verdict::Rejected => false,
        };
        verdict_ok && self.overall_score >= min_score
    }
}

/// What the control plane is asking the validator to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAction {
    Register,
    Promote,
    Revalidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub action: ValidationAction,
    pub capability_id: String,
    pub capability: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(v: Verdict, score: f64) -> ConstitutionalVerdict {
        ConstitutionalVerdict {
            courts: CourtScores {
                technical: score,
                ethical: score,
                operational: score,
            },
            overall_score: score,
            verdict: v,
            conditions: Vec::new(),
            violations: Vec::new(),
            audit_trail: Vec::new(),
            valid_until: Utc::now(),
        }
    }

    #[test]
    fn test_conditional_requires_opt_in() {
        let v = verdict(Verdict::Conditional, 0.9);
        assert!(!v.passes(false, 0.5));
        assert!(v.passes(true, 0.5));
    }

    #[test]
    fn test_score_floor_applies_to_approved() {
        let v = verdict(Verdict::Approved, 0.4);
        assert!(!v.passes(true, 0.5));
        assert!(verdict(Verdict::Approved, 0.8).passes(false, 0.5));
        assert!(!verdict(Verdict::Rejected, 1.0).passes(true, 0.0));
    }

    #[test]
    fn test_verdict_wire_format() {
        assert_eq!(
            serde_json::to_string(&Verdict::Conditional).unwrap(),
            "\"CONDITIONAL\""
        );
    }
}
