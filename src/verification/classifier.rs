//! Claim classification for verification routing.
//!
//! Claims are matched against ordered pattern sets to decide whether the
//! symbolic verifier can handle them or they must go to an LLM judge.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::verification::solver::VarSort;

/// Types of claims for verification routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Arithmetic,
    Constraint,
    Implication,
    Comparison,
    Equality,
    Boolean,
    Textual,
    Unknown,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arithmetic => "arithmetic",
            Self::Constraint => "constraint",
            Self::Implication => "implication",
            Self::Comparison => "comparison",
            Self::Equality => "equality",
            Self::Boolean => "boolean",
            Self::Textual => "textual",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the symbolic verifier has a procedure for this claim type.
    pub fn symbolically_applicable(&self) -> bool {
        matches!(
            self,
            Self::Arithmetic
                | Self::Constraint
                | Self::Implication
                | Self::Comparison
                | Self::Equality
        )
    }
}

/// Premise/conclusion split of an implication claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicationParts {
    pub premise: String,
    pub conclusion: String,
    pub pattern: String,
}

/// A claim with its classification for verification routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedClaim {
    pub claim_text: String,
    pub claim_type: ClaimType,
    pub confidence: f64,
    pub extracted_numbers: Vec<f64>,
    pub variables: Vec<String>,
    pub variable_types: HashMap<String, VarSort>,
    pub implication_parts: Option<ImplicationParts>,
    pub symbolic_applicable: bool,
    pub classification_reason: String,
}

static ARITHMETIC_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(\d+(?:\.\d+)?)\s*([+*/\-])\s*(\d+(?:\.\d+)?)\s*=\s*(\d+(?:\.\d+)?)")
                .expect("Invalid regex"),
            "simple arithmetic equation",
        ),
        (
            Regex::new(r"(?i)(?:sum|total|difference|product|quotient|result)\s+(?:is|equals|=)\s*(\d+(?:\.\d+)?)")
                .expect("Invalid regex"),
            "named arithmetic result",
        ),
        (
            Regex::new(r"(\w+)\s*([+*/\-])\s*(\w+)\s*=\s*(\d+(?:\.\d+)?)").expect("Invalid regex"),
            "variable arithmetic equation",
        ),
        (
            Regex::new(r"(?i)(?:calculated?|computed?|equals?)\s+(\d+(?:,\d{3})*(?:\.\d+)?)")
                .expect("Invalid regex"),
            "calculated result",
        ),
    ]
});

static CONSTRAINT_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)(?:must\s+be|should\s+be|is)\s+(?:greater|less|at\s+least|at\s+most)")
                .expect("Invalid regex"),
            "constraint requirement",
        ),
        (
            Regex::new(r"(?i)\b(?:satisf(?:y|ies|iable)|feasible|possible|valid)\b")
                .expect("Invalid regex"),
            "satisfiability claim",
        ),
        (
            Regex::new(r"(?i)\b(?:between|within|range|limit)\b").expect("Invalid regex"),
            "range constraint",
        ),
    ]
});

static IMPLICATION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\b(?:if|when|given|assuming)\b.*\b(?:then|therefore|implies|means)\b")
                .expect("Invalid regex"),
            "if-then implication",
        ),
        (
            Regex::new(r"(?i)\b(?:because|since|as)\b.*\b(?:therefore|thus|so|hence)\b")
                .expect("Invalid regex"),
            "causal implication",
        ),
        (
            Regex::new(r"(?i)\b(?:implies|entails|leads\s+to|results\s+in)\b")
                .expect("Invalid regex"),
            "explicit implication",
        ),
    ]
});

static COMPARISON_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(\w+)\s*(>|<|>=|<=|==|!=)\s*(\w+)").expect("Invalid regex"),
            "direct comparison",
        ),
        (
            Regex::new(r"(?i)\b(?:greater|larger|bigger|more)\s+than\b").expect("Invalid regex"),
            "greater than",
        ),
        (
            Regex::new(r"(?i)\b(?:less|smaller|fewer)\s+than\b").expect("Invalid regex"),
            "less than",
        ),
    ]
});

static EQUALITY_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(\w+)\s*(?:==|=|equals?)\s*(\w+|\d+(?:\.\d+)?)").expect("Invalid regex"),
            "equality assertion",
        ),
        (
            Regex::new(r"(?i)\b(?:is|are|was|were)\s+(?:equal\s+to|the\s+same\s+as)\b")
                .expect("Invalid regex"),
            "equality claim",
        ),
    ]
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:,\d{3})*(?:\.\d+)?").expect("Invalid regex"));
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\b").expect("Invalid regex"));

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "if", "then", "else", "when", "where", "which", "that", "this", "and", "or", "not", "true",
    "false", "null", "none", "greater", "less", "equal", "than", "to", "from", "between", "sum",
    "total", "difference", "product", "result", "value", "calculated", "computed", "equals",
    "implies", "therefore",
];

const IMPLICATION_SPLITTERS: &[(&str, &str)] = &[
    ("then", "if-then"),
    ("therefore", "therefore"),
    ("implies", "implies"),
    ("so", "so"),
    ("hence", "hence"),
];

/// Classifies claims for verification routing.
#[derive(Default)]
pub struct ClaimClassifier {
    classifications_done: std::sync::Mutex<u64>,
}

impl ClaimClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a claim; pattern sets are tried in order of specificity.
    pub fn classify(&self, claim: &str) -> ClassifiedClaim {
        *self.classifications_done.lock().expect("stats lock") += 1;
        let claim = claim.trim();

        let checks: [(&Vec<(Regex, &'static str)>, ClaimType, f64); 5] = [
            (&ARITHMETIC_PATTERNS, ClaimType::Arithmetic, 0.9),
            (&IMPLICATION_PATTERNS, ClaimType::Implication, 0.85),
            (&CONSTRAINT_PATTERNS, ClaimType::Constraint, 0.85),
            (&COMPARISON_PATTERNS, ClaimType::Comparison, 0.8),
            (&EQUALITY_PATTERNS, ClaimType::Equality, 0.8),
        ];

        for (patterns, claim_type, confidence) in checks {
            for (pattern, description) in patterns.iter() {
                if pattern.is_match(claim) {
                    return self.build(claim, claim_type, confidence, description);
                }
            }
        }

        ClassifiedClaim {
            claim_text: claim.to_string(),
            claim_type: ClaimType::Textual,
            confidence: 0.5,
            extracted_numbers: Vec::new(),
            variables: Vec::new(),
            variable_types: HashMap::new(),
            implication_parts: None,
            symbolic_applicable: false,
            classification_reason: "No patterns matched - treating as textual claim".to_string(),
        }
    }

    /// Classify multiple claims.
    pub fn classify_batch(&self, claims: &[String]) -> Vec<ClassifiedClaim> {
        claims.iter().map(|claim| self.classify(claim)).collect()
    }

    fn build(
        &self,
        claim: &str,
        claim_type: ClaimType,
        confidence: f64,
        description: &str,
    ) -> ClassifiedClaim {
        let extracted_numbers = extract_numbers(claim);
        let variables = extract_variables(claim);

        let variable_types: HashMap<String, VarSort> = variables
            .iter()
            .map(|name| (name.clone(), infer_sort(name)))
            .collect();

        let implication_parts = if claim_type == ClaimType::Implication {
            Some(split_implication(claim))
        } else {
            None
        };

        let confidence = if claim_type == ClaimType::Arithmetic && extracted_numbers.len() < 2 {
            0.7
        } else {
            confidence
        };

        ClassifiedClaim {
            claim_text: claim.to_string(),
            claim_type,
            confidence,
            extracted_numbers,
            variables,
            variable_types,
            implication_parts,
            symbolic_applicable: claim_type.symbolically_applicable(),
            classification_reason: format!("Matched {} pattern: {}", claim_type.as_str(), description),
        }
    }

    pub fn classifications_done(&self) -> u64 {
        *self.classifications_done.lock().expect("stats lock")
    }
}

/// Extract all numbers, stripping thousands separators.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse().ok())
        .collect()
}

/// Extract variable name candidates, filtering stopwords and single chars
/// other than typical index names.
pub fn extract_variables(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut variables = Vec::new();
    for cap in VARIABLE_RE.captures_iter(text) {
        let name = cap[1].to_string();
        let lowered = name.to_lowercase();
        if STOPWORDS.contains(&lowered.as_str()) || name.len() <= 1 {
            continue;
        }
        if seen.insert(name.clone()) {
            variables.push(name);
        }
    }
    variables
}

/// Infer a solver sort from a variable name.
pub fn infer_sort(name: &str) -> VarSort {
    let lowered = name.to_lowercase();
    if matches!(lowered.as_str(), "count" | "num" | "index" | "i" | "j" | "k" | "n") {
        VarSort::Int
    } else if lowered.starts_with("is_")
        || lowered.starts_with("has_")
        || matches!(lowered.as_str(), "flag" | "should" | "can")
    {
        VarSort::Bool
    } else {
        VarSort::Real
    }
}

/// Split an implication claim at the first connective token.
pub fn split_implication(claim: &str) -> ImplicationParts {
    static PREFIX_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^(?:if|when|given|assuming)\s+").expect("Invalid regex"));

    for (splitter, name) in IMPLICATION_SPLITTERS {
        let word_re = Regex::new(&format!(r"(?i)\b{}\b", splitter)).expect("Invalid regex");
        if let Some(m) = word_re.find(claim) {
            let premise_raw = claim[..m.start()].trim();
            let conclusion = claim[m.end()..].trim().to_string();
            let premise = PREFIX_RE.replace(premise_raw, "").to_string();
            return ImplicationParts {
                premise,
                conclusion,
                pattern: name.to_string(),
            };
        }
    }

    ImplicationParts {
        premise: claim.to_string(),
        conclusion: String::new(),
        pattern: "full".to_string(),
    }
}

/// Extract individual claims from a text block.
///
/// Sentence split plus a claim-keyword filter; questions and short
/// fragments are skipped.
pub fn extract_claims_from_text(text: &str) -> Vec<String> {
    const CLAIM_KEYWORDS: &[&str] = &[
        "equals", "is", "are", "was", "were", "=", "greater", "less", "more", "fewer", "implies",
        "therefore", "must", "should", "calculated", "computed", "result",
    ];

    text.split_inclusive(['.', '!', '?'])
        .map(|sentence| sentence.trim().trim_end_matches(['.', '!']).trim().to_string())
        .filter(|sentence| {
            if sentence.len() < 10 || sentence.ends_with('?') {
                return false;
            }
            let lowered = sentence.to_lowercase();
            CLAIM_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_classification() {
        let classifier = ClaimClassifier::new();
        let result = classifier.classify("50000 - 42000 = 8000");

        assert_eq!(result.claim_type, ClaimType::Arithmetic);
        assert!(result.symbolic_applicable);
        assert_eq!(result.extracted_numbers, vec![50000.0, 42000.0, 8000.0]);
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn test_thousands_separators() {
        assert_eq!(extract_numbers("we spent $42,000 of 50,000"), vec![42000.0, 50000.0]);
    }

    #[test]
    fn test_implication_classification_and_split() {
        let classifier = ClaimClassifier::new();
        let result = classifier.classify("if x is greater than 5 then y must be positive");

        assert_eq!(result.claim_type, ClaimType::Implication);
        let parts = result.implication_parts.unwrap();
        assert_eq!(parts.premise, "x is greater than 5");
        assert_eq!(parts.conclusion, "y must be positive");
        assert_eq!(parts.pattern, "if-then");
    }

    #[test]
    fn test_constraint_classification() {
        let classifier = ClaimClassifier::new();
        let result = classifier.classify("the budget must be at least 1000 dollars");
        assert_eq!(result.claim_type, ClaimType::Constraint);
        assert!(result.symbolic_applicable);
    }

    #[test]
    fn test_comparison_classification() {
        let classifier = ClaimClassifier::new();
        let result = classifier.classify("revenue > costs");
        assert_eq!(result.claim_type, ClaimType::Comparison);
    }

    #[test]
    fn test_textual_fallback() {
        let classifier = ClaimClassifier::new();
        let result = classifier.classify("the sky looked heavy with clouds");
        assert_eq!(result.claim_type, ClaimType::Textual);
        assert!(!result.symbolic_applicable);
    }

    #[test]
    fn test_variable_extraction_filters_stopwords() {
        let variables = extract_variables("the total is greater than the spent amount");
        assert!(variables.contains(&"amount".to_string()));
        assert!(!variables.contains(&"the".to_string()));
        assert!(!variables.contains(&"total".to_string()), "stopword filtered");
    }

    #[test]
    fn test_sort_inference() {
        assert_eq!(infer_sort("count"), VarSort::Int);
        assert_eq!(infer_sort("n"), VarSort::Int);
        assert_eq!(infer_sort("is_ready"), VarSort::Bool);
        assert_eq!(infer_sort("has_errors"), VarSort::Bool);
        assert_eq!(infer_sort("revenue"), VarSort::Real);
    }

    #[test]
    fn test_extract_claims_from_text() {
        let text = "The budget is $50,000. We computed $42,000 in spending. \
                    Remaining is $10,000. What about taxes? Short one.";
        let claims = extract_claims_from_text(text);

        assert_eq!(claims.len(), 3);
        assert!(claims[0].contains("budget"));
        assert!(claims.iter().all(|c| !c.contains("taxes")));
    }

    #[test]
    fn test_classify_batch_counts() {
        let classifier = ClaimClassifier::new();
        classifier.classify_batch(&["1 + 1 = 2".to_string(), "x > y".to_string()]);
        assert_eq!(classifier.classifications_done(), 2);
    }
}
