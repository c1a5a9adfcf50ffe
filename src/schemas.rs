//! Structured output schemas with field-level validation.
//!
//! Typed shapes for judge verdicts and researched claims. `validate()`
//! returns every failing field with a suggestion, so callers can surface
//! actionable errors instead of a single rejection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verification status for a researched claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimVerificationStatus {
    /// Multiple independent sources confirm.
    Verified,
    /// Only one source available.
    SingleSource,
    /// No sources found.
    Unverified,
    /// Sources disagree.
    Contradicted,
}

/// Severity of an issue found during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

/// A structured field-level validation error with a suggested fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>, suggestion: Option<&str>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            suggestion: suggestion.map(|s| s.to_string()),
        }
    }
}

/// A validated source citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub publication_date: Option<DateTime<Utc>>,
    pub accessed_date: DateTime<Utc>,
}

impl SourceReference {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            publication_date: None,
            accessed_date: Utc::now(),
        }
    }

    fn validate(&self, index: usize, errors: &mut Vec<FieldError>) {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            errors.push(FieldError::new(
                &format!("sources[{}].url", index),
                format!("'{}' is not an HTTP(S) URL", self.url),
                Some("use a full http:// or https:// URL"),
            ));
        }
        if self.title.trim().is_empty() {
            errors.push(FieldError::new(
                &format!("sources[{}].title", index),
                "title must not be empty",
                None,
            ));
        }
        if let Some(published) = self.publication_date {
            if published > Utc::now() {
                errors.push(FieldError::new(
                    &format!("sources[{}].publication_date", index),
                    "publication date is in the future",
                    Some("check the extracted date"),
                ));
            }
        }
    }
}

/// A researched claim with supporting sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchClaim {
    pub text: String,
    pub confidence: f64,
    pub sources: Vec<SourceReference>,
    pub verification_status: ClaimVerificationStatus,
}

impl ResearchClaim {
    /// Validate structure, including the consistency rule that a claim can
    /// only be marked verified when at least two sources support it.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.text.trim().is_empty() {
            errors.push(FieldError::new("text", "claim text must not be empty", None));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            errors.push(FieldError::new(
                "confidence",
                format!("confidence {} outside [0.0, 1.0]", self.confidence),
                None,
            ));
        }
        for (index, source) in self.sources.iter().enumerate() {
            source.validate(index, &mut errors);
        }

        if self.verification_status == ClaimVerificationStatus::Verified && self.sources.len() < 2 {
            errors.push(FieldError::new(
                "verification_status",
                "cannot mark as 'verified' with fewer than two sources",
                Some("use 'single_source' status instead"),
            ));
        }
        if self.verification_status == ClaimVerificationStatus::Unverified
            && !self.sources.is_empty()
        {
            errors.push(FieldError::new(
                "verification_status",
                "'unverified' claims should carry no sources",
                Some("use 'single_source' or 'verified'"),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// An issue identified during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueFound {
    pub issue: String,
    pub severity: IssueSeverity,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

/// Score for a single evaluation dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScore {
    pub dimension: String,
    /// Numeric score, 1-5.
    pub score: u8,
    /// Weight of this dimension, 0.0-1.0.
    pub weight: f64,
    pub justification: String,
}

impl EvaluationScore {
    pub fn weighted_score(&self) -> f64 {
        self.score as f64 * self.weight
    }
}

/// An individual judge's evaluation of agent output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub judge_type: String,
    pub passed: bool,
    /// Aggregate score, 0.0-1.0.
    pub overall_score: f64,
    #[serde(default)]
    pub dimension_scores: Vec<EvaluationScore>,
    #[serde(default)]
    pub issues_found: Vec<IssueFound>,
    pub detailed_feedback: String,
    /// Judge confidence, 0.0-1.0.
    pub confidence: f64,
}

impl JudgeVerdict {
    /// Validate structure and verdict consistency: a pass requires a score
    /// of at least 0.5 and no critical issues; a fail requires a score
    /// below 0.7.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&self.overall_score) {
            errors.push(FieldError::new(
                "overall_score",
                format!("score {} outside [0.0, 1.0]", self.overall_score),
                None,
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            errors.push(FieldError::new(
                "confidence",
                format!("confidence {} outside [0.0, 1.0]", self.confidence),
                None,
            ));
        }
        for (index, score) in self.dimension_scores.iter().enumerate() {
            if !(1..=5).contains(&score.score) {
                errors.push(FieldError::new(
                    &format!("dimension_scores[{}].score", index),
                    format!("score {} outside 1-5", score.score),
                    None,
                ));
            }
            if !(0.0..=1.0).contains(&score.weight) {
                errors.push(FieldError::new(
                    &format!("dimension_scores[{}].weight", index),
                    format!("weight {} outside [0.0, 1.0]", score.weight),
                    None,
                ));
            }
        }

        if self.passed && self.overall_score < 0.5 {
            errors.push(FieldError::new(
                "passed",
                format!("marked as passed but score ({}) is below 0.5", self.overall_score),
                Some("lower the verdict or justify a higher score"),
            ));
        }
        if !self.passed && self.overall_score >= 0.7 {
            errors.push(FieldError::new(
                "passed",
                format!(
                    "marked as failed but score ({}) is 0.7 or above",
                    self.overall_score
                ),
                None,
            ));
        }

        let has_critical = self
            .issues_found
            .iter()
            .any(|issue| issue.severity == IssueSeverity::Critical);
        if self.passed && has_critical {
            errors.push(FieldError::new(
                "issues_found",
                "cannot pass with critical issues present",
                Some("resolve critical issues or fail the verdict"),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str) -> SourceReference {
        SourceReference::new(url, "A title")
    }

    fn verdict(passed: bool, score: f64) -> JudgeVerdict {
        JudgeVerdict {
            judge_type: "adversarial".to_string(),
            passed,
            overall_score: score,
            dimension_scores: Vec::new(),
            issues_found: Vec::new(),
            detailed_feedback: "Looked closely at the claims and their support.".to_string(),
            confidence: 0.8,
        }
    }

    #[test]
    fn test_verdict_consistency() {
        assert!(verdict(true, 0.8).validate().is_ok());
        assert!(verdict(false, 0.3).validate().is_ok());

        // Passed requires score >= 0.5
        let errors = verdict(true, 0.4).validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "passed"));

        // Failed requires score < 0.7
        assert!(verdict(false, 0.7).validate().is_err());
    }

    #[test]
    fn test_critical_issue_blocks_pass() {
        let mut v = verdict(true, 0.9);
        v.issues_found.push(IssueFound {
            issue: "fabricated citation".to_string(),
            severity: IssueSeverity::Critical,
            location: None,
            suggested_fix: None,
        });

        let errors = v.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "issues_found"));

        // Failing with a critical issue is consistent
        let mut failing = verdict(false, 0.2);
        failing.issues_found = v.issues_found.clone();
        assert!(failing.validate().is_ok());
    }

    #[test]
    fn test_verified_claim_needs_two_sources() {
        let claim = ResearchClaim {
            text: "Rust 1.0 shipped in 2015".to_string(),
            confidence: 0.9,
            sources: vec![source("https://a.dev/1")],
            verification_status: ClaimVerificationStatus::Verified,
        };

        let errors = claim.validate().unwrap_err();
        let error = errors
            .iter()
            .find(|e| e.field == "verification_status")
            .unwrap();
        assert!(error.suggestion.as_ref().unwrap().contains("single_source"));

        let mut fixed = claim.clone();
        fixed.sources.push(source("https://b.org/2"));
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn test_source_url_check() {
        let claim = ResearchClaim {
            text: "something".to_string(),
            confidence: 0.5,
            sources: vec![source("not-a-url")],
            verification_status: ClaimVerificationStatus::SingleSource,
        };

        let errors = claim.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "sources[0].url"));
    }

    #[test]
    fn test_field_errors_accumulate() {
        let claim = ResearchClaim {
            text: "".to_string(),
            confidence: 1.5,
            sources: Vec::new(),
            verification_status: ClaimVerificationStatus::Verified,
        };

        let errors = claim.validate().unwrap_err();
        assert!(errors.len() >= 3);
    }

    #[test]
    fn test_weighted_score() {
        let score = EvaluationScore {
            dimension: "accuracy".to_string(),
            score: 4,
            weight: 0.5,
            justification: "mostly correct with minor slips".to_string(),
        };
        assert_eq!(score.weighted_score(), 2.0);
    }
}
