//! Parser for the agent specification DSL.
//!
//! Line-oriented grammar: an AGENT header followed by TIER, TOOLS,
//! OUTPUT MUST SATISFY, BEHAVIOR, and LIMITS sections. Constraint lines are
//! matched by ordered grammar rules, with NOT/AND/OR combinators binding
//! tightest to loosest; `#` comments are skipped.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::specs::ast::{
    AgentSpecification, BehaviorRule, Comparator, Condition, Constraint, PathExpr, Quantifier,
    SpecValue, TierLevel, TypeCheck,
};

static AGENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AGENT\s+(\w+)\s*:").expect("Invalid regex"));
static TIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)TIER:\s*(opus|sonnet|haiku)").expect("Invalid regex"));
static TOOLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TOOLS:\s*\[([\w\s,]+)\]").expect("Invalid regex"));
static OUTPUT_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)OUTPUT\s+MUST\s+SATISFY:\s*(.*?)(?:BEHAVIOR:|LIMITS:|$)")
        .expect("Invalid regex")
});
static BEHAVIOR_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)BEHAVIOR:\s*(.*?)(?:LIMITS:|$)").expect("Invalid regex")
});
static LIMITS_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)LIMITS:\s*(.*)$").expect("Invalid regex"));

static QUANTIFIED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(forall|exists)\s+(\w+)\s+in\s+([\w.]+)\s*:\s*(.+)$")
        .expect("Invalid regex")
});
static CONDITIONAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^if\s+(.+?)\s*:\s*(.+)$").expect("Invalid regex"));
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([\w.]+)\s+IN\s+RANGE\s*\[\s*([\d.eE+-]+)\s*,\s*([\d.eE+-]+)\s*\]$")
        .expect("Invalid regex")
});
static IN_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([\w.]+)\s+IN\s*\[([^\]]+)\]$").expect("Invalid regex"));
static TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([\w.]+)\s+IS\s+(\w+)$").expect("Invalid regex"));
static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w.]+)\s*(==|!=|<=|>=|<|>)\s*(.+)$").expect("Invalid regex")
});
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^count\s*\(\s*([\w.]+)\s*\)\s*(==|!=|<=|>=|<|>)\s*(\d+)$")
        .expect("Invalid regex")
});

static PREFER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^PREFER\s+(.+?)\s+OVER\s+(.+)$").expect("Invalid regex"));
static NEVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^NEVER\s+(.+)$").expect("Invalid regex"));
static ALWAYS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ALWAYS\s+(.+)$").expect("Invalid regex"));
static WHEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^WHEN\s+(.+?)\s*:\s*(.+)$").expect("Invalid regex"));
static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\s*:\s*(\d+)$").expect("Invalid regex"));

/// Parser for the agent specification DSL.
#[derive(Debug, Clone, Default)]
pub struct SpecificationParser;

impl SpecificationParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse specification text into an [`AgentSpecification`].
    pub fn parse(&self, spec_text: &str) -> Result<AgentSpecification> {
        let mut spec = AgentSpecification {
            raw_text: spec_text.to_string(),
            ..Default::default()
        };

        match AGENT_RE.captures(spec_text) {
            Some(cap) => spec.agent_name = cap[1].to_string(),
            None => {
                return Err(Error::parse(
                    "Missing AGENT declaration",
                    first_line(spec_text),
                ))
            }
        }

        if let Some(cap) = TIER_RE.captures(spec_text) {
            if let Some(tier) = TierLevel::parse(&cap[1]) {
                spec.tier = tier;
            }
        }

        if let Some(cap) = TOOLS_RE.captures(spec_text) {
            spec.tools = cap[1]
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Some(cap) = OUTPUT_SECTION_RE.captures(spec_text) {
            for line in section_lines(&cap[1]) {
                if let Some(constraint) = self.parse_constraint_line(&line)? {
                    spec.output_constraints.push(constraint);
                }
            }
        }

        if let Some(cap) = BEHAVIOR_SECTION_RE.captures(spec_text) {
            for line in section_lines(&cap[1]) {
                if let Some(rule) = self.parse_behavior_line(&line) {
                    spec.behavior_rules.push(rule);
                }
            }
        }

        if let Some(cap) = LIMITS_SECTION_RE.captures(spec_text) {
            spec.limits = self.parse_limits(&cap[1]);
        }

        Ok(spec)
    }

    /// Parse a single constraint line; returns None for blank and comment
    /// lines.
    fn parse_constraint_line(&self, line: &str) -> Result<Option<Constraint>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        if let Some(cap) = QUANTIFIED_RE.captures(line) {
            let quantifier = if cap[1].eq_ignore_ascii_case("forall") {
                Quantifier::Forall
            } else {
                Quantifier::Exists
            };
            let inner = self
                .parse_constraint_line(&cap[4])?
                .ok_or_else(|| Error::parse("Empty quantifier body", line))?;
            return Ok(Some(Constraint::Quantified {
                quantifier,
                variable: cap[2].to_string(),
                path: PathExpr::parse(&cap[3]),
                inner: Box::new(inner),
            }));
        }

        if let Some(cap) = CONDITIONAL_RE.captures(line) {
            // `if cond: constraint`; count() conditions also contain a ':'
            // only inside parentheses, so this split is unambiguous.
            if let Some(condition) = self.parse_condition(&cap[1]) {
                let consequence = self
                    .parse_constraint_line(&cap[2])?
                    .ok_or_else(|| Error::parse("Empty conditional body", line))?;
                return Ok(Some(Constraint::Conditional {
                    condition,
                    consequence: Box::new(consequence),
                }));
            }
        }

        // Combinators, loosest binding first: OR, then AND, then a NOT
        // prefix. Splitting at the first top-level keyword makes chains
        // right-associative, which reads the same under the validator's
        // short-circuit semantics.
        if let Some((left, right)) = split_top_level_keyword(line, "OR") {
            let left = self
                .parse_constraint_line(left)?
                .ok_or_else(|| Error::parse("Empty left operand of OR", line))?;
            let right = self
                .parse_constraint_line(right)?
                .ok_or_else(|| Error::parse("Empty right operand of OR", line))?;
            return Ok(Some(Constraint::Or {
                left: Box::new(left),
                right: Box::new(right),
            }));
        }

        if let Some((left, right)) = split_top_level_keyword(line, "AND") {
            let left = self
                .parse_constraint_line(left)?
                .ok_or_else(|| Error::parse("Empty left operand of AND", line))?;
            let right = self
                .parse_constraint_line(right)?
                .ok_or_else(|| Error::parse("Empty right operand of AND", line))?;
            return Ok(Some(Constraint::And {
                left: Box::new(left),
                right: Box::new(right),
            }));
        }

        if let Some(rest) = line.strip_prefix("NOT") {
            // NOT_EMPTY and similar identifiers keep their underscore; only
            // a whitespace-separated NOT is the combinator.
            if rest.starts_with(char::is_whitespace) {
                let inner = self
                    .parse_constraint_line(rest.trim())?
                    .ok_or_else(|| Error::parse("Empty NOT body", line))?;
                return Ok(Some(Constraint::Not {
                    inner: Box::new(inner),
                }));
            }
        }

        if let Some(cap) = RANGE_RE.captures(line) {
            let min: f64 = cap[2]
                .parse()
                .map_err(|_| Error::parse("Invalid range minimum", line))?;
            let max: f64 = cap[3]
                .parse()
                .map_err(|_| Error::parse("Invalid range maximum", line))?;
            return Ok(Some(Constraint::Range {
                path: PathExpr::parse(&cap[1]),
                min,
                max,
            }));
        }

        if let Some(cap) = IN_LIST_RE.captures(line) {
            let values = cap[2].split(',').map(SpecValue::parse).collect();
            return Ok(Some(Constraint::InList {
                path: PathExpr::parse(&cap[1]),
                values,
            }));
        }

        if let Some(cap) = TYPE_RE.captures(line) {
            return Ok(Some(Constraint::Type {
                path: PathExpr::parse(&cap[1]),
                check: TypeCheck::parse(&cap[2]),
            }));
        }

        if let Some(cap) = COMPARISON_RE.captures(line) {
            let comparator = Comparator::parse(&cap[2])
                .ok_or_else(|| Error::parse("Unknown comparator", line))?;
            return Ok(Some(Constraint::Comparison {
                path: PathExpr::parse(&cap[1]),
                comparator,
                value: SpecValue::parse(&cap[3]),
            }));
        }

        Err(Error::parse("Unrecognized constraint", line))
    }

    /// Parse a condition expression; None when nothing matches.
    fn parse_condition(&self, text: &str) -> Option<Condition> {
        let text = text.trim();

        if let Some(cap) = COUNT_RE.captures(text) {
            return Some(Condition::Count {
                path: PathExpr::parse(&cap[1]),
                comparator: Comparator::parse(&cap[2])?,
                value: cap[3].parse().ok()?,
            });
        }

        if let Some(cap) = TYPE_RE.captures(text) {
            return Some(Condition::Type {
                path: PathExpr::parse(&cap[1]),
                check: TypeCheck::parse(&cap[2]),
            });
        }

        if let Some(cap) = COMPARISON_RE.captures(text) {
            return Some(Condition::Comparison {
                path: PathExpr::parse(&cap[1]),
                comparator: Comparator::parse(&cap[2])?,
                value: SpecValue::parse(&cap[3]),
            });
        }

        None
    }

    fn parse_behavior_line(&self, line: &str) -> Option<BehaviorRule> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some(cap) = PREFER_RE.captures(line) {
            return Some(BehaviorRule::Prefer {
                preferred: cap[1].trim().to_string(),
                over: cap[2].trim().to_string(),
            });
        }
        if let Some(cap) = NEVER_RE.captures(line) {
            return Some(BehaviorRule::Never {
                action: cap[1].trim().to_string(),
            });
        }
        if let Some(cap) = ALWAYS_RE.captures(line) {
            return Some(BehaviorRule::Always {
                action: cap[1].trim().to_string(),
            });
        }
        if let Some(cap) = WHEN_RE.captures(line) {
            if let Some(condition) = self.parse_condition(&cap[1]) {
                return Some(BehaviorRule::When {
                    condition,
                    action: cap[2].trim().to_string(),
                });
            }
        }
        None
    }

    fn parse_limits(&self, text: &str) -> HashMap<String, i64> {
        let mut limits = HashMap::new();
        for line in section_lines(text) {
            if line.starts_with('#') {
                continue;
            }
            if let Some(cap) = LIMIT_RE.captures(&line) {
                if let Ok(value) = cap[2].parse() {
                    limits.insert(cap[1].to_string(), value);
                }
            }
        }
        limits
    }
}

/// Split a constraint line at the first standalone `keyword` occurring
/// outside brackets, parentheses, and quotes. Returns the trimmed operands.
fn split_top_level_keyword<'a>(line: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;

    for (index, c) in line.char_indices() {
        if let Some(open) = quote {
            if c == open {
                quote = None;
            }
        } else {
            match c {
                '"' | '\'' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth = depth.saturating_sub(1),
                _ => {
                    if depth == 0 && line[index..].starts_with(keyword) {
                        let before_ok = prev.is_some_and(|p| p.is_whitespace());
                        let after = index + keyword.len();
                        let after_ok = after < line.len()
                            && line.as_bytes()[after].is_ascii_whitespace();
                        if before_ok && after_ok {
                            let left = line[..index].trim();
                            let right = line[after..].trim();
                            if !left.is_empty() && !right.is_empty() {
                                return Some((left, right));
                            }
                        }
                    }
                }
            }
        }
        prev = Some(c);
    }
    None
}

fn section_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RESEARCH_SPEC: &str = r#"
AGENT ResearchAgent:
    TIER: sonnet
    TOOLS: [WebSearch, Read, Write]
    OUTPUT MUST SATISFY:
        confidence IN RANGE [0.0, 1.0]
        sources IS NOT_EMPTY
        forall s in sources: s.url IS VALID_URL
    BEHAVIOR:
        PREFER primary sources OVER secondary sources
        NEVER make claims without citations
    LIMITS:
        max_tool_calls: 50
        timeout_seconds: 300
"#;

    #[test]
    fn test_parse_full_spec() {
        let spec = SpecificationParser::new().parse(RESEARCH_SPEC).unwrap();

        assert_eq!(spec.agent_name, "ResearchAgent");
        assert_eq!(spec.tier, TierLevel::Sonnet);
        assert_eq!(spec.tools, vec!["WebSearch", "Read", "Write"]);
        assert_eq!(spec.output_constraints.len(), 3);
        assert_eq!(spec.behavior_rules.len(), 2);
        assert_eq!(spec.limits.get("max_tool_calls"), Some(&50));
        assert_eq!(spec.limits.get("timeout_seconds"), Some(&300));
    }

    #[test]
    fn test_parse_constraints() {
        let spec = SpecificationParser::new().parse(RESEARCH_SPEC).unwrap();

        assert!(matches!(
            &spec.output_constraints[0],
            Constraint::Range { min, max, .. } if *min == 0.0 && *max == 1.0
        ));
        assert!(matches!(
            &spec.output_constraints[1],
            Constraint::Type { check: TypeCheck::NotEmpty, .. }
        ));
        match &spec.output_constraints[2] {
            Constraint::Quantified {
                quantifier,
                variable,
                path,
                inner,
            } => {
                assert_eq!(*quantifier, Quantifier::Forall);
                assert_eq!(variable, "s");
                assert_eq!(path.to_string(), "sources");
                assert!(matches!(
                    inner.as_ref(),
                    Constraint::Type { check: TypeCheck::ValidUrl, .. }
                ));
            }
            other => panic!("expected quantified constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_behavior_rules() {
        let spec = SpecificationParser::new().parse(RESEARCH_SPEC).unwrap();

        assert_eq!(
            spec.behavior_rules[0],
            BehaviorRule::Prefer {
                preferred: "primary sources".to_string(),
                over: "secondary sources".to_string(),
            }
        );
        assert_eq!(
            spec.behavior_rules[1],
            BehaviorRule::Never {
                action: "make claims without citations".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_agent_declaration() {
        let err = SpecificationParser::new()
            .parse("TIER: haiku")
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_conditional_constraint() {
        let spec_text = r#"
AGENT Conditional:
    TIER: haiku
    OUTPUT MUST SATISFY:
        if count(sources) > 2: confidence >= 0.8
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        match &spec.output_constraints[0] {
            Constraint::Conditional {
                condition,
                consequence,
            } => {
                assert!(matches!(condition, Condition::Count { value: 2, .. }));
                assert!(matches!(consequence.as_ref(), Constraint::Comparison { .. }));
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_when_rule_and_in_list() {
        let spec_text = r#"
AGENT Mixed:
    TIER: opus
    OUTPUT MUST SATISFY:
        status IN ["done", "partial"]
    BEHAVIOR:
        ALWAYS cite the original source
        WHEN confidence < 0.5: escalate to a human reviewer
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();

        assert!(matches!(
            &spec.output_constraints[0],
            Constraint::InList { values, .. } if values.len() == 2
        ));
        assert!(matches!(&spec.behavior_rules[0], BehaviorRule::Always { .. }));
        match &spec.behavior_rules[1] {
            BehaviorRule::When { condition, action } => {
                assert!(matches!(condition, Condition::Comparison { .. }));
                assert_eq!(action, "escalate to a human reviewer");
            }
            other => panic!("expected when rule, got {:?}", other),
        }
    }

    #[test]
    fn test_not_constraint() {
        let spec_text = r#"
AGENT Negated:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        NOT confidence < 0.3
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        match &spec.output_constraints[0] {
            Constraint::Not { inner } => {
                assert!(matches!(
                    inner.as_ref(),
                    Constraint::Comparison { comparator: Comparator::Lt, .. }
                ));
            }
            other => panic!("expected not constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_and_constraint() {
        let spec_text = r#"
AGENT Conjoined:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        x > 0 AND y < 5
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        match &spec.output_constraints[0] {
            Constraint::And { left, right } => {
                assert!(matches!(
                    left.as_ref(),
                    Constraint::Comparison { comparator: Comparator::Gt, .. }
                ));
                assert!(matches!(
                    right.as_ref(),
                    Constraint::Comparison { comparator: Comparator::Lt, .. }
                ));
            }
            other => panic!("expected and constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_or_constraint_and_precedence() {
        // AND binds tighter than OR: a AND b OR c parses as Or(And(a, b), c)
        let spec_text = r#"
AGENT Disjoined:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        x > 0 AND x < 5 OR x == 100
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        match &spec.output_constraints[0] {
            Constraint::Or { left, right } => {
                assert!(matches!(left.as_ref(), Constraint::And { .. }));
                assert!(matches!(
                    right.as_ref(),
                    Constraint::Comparison { comparator: Comparator::Eq, .. }
                ));
            }
            other => panic!("expected or constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_not_binds_tighter_than_and() {
        let spec_text = r#"
AGENT Mixed:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        NOT status == draft AND confidence > 0.5
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        match &spec.output_constraints[0] {
            Constraint::And { left, right } => {
                assert!(matches!(left.as_ref(), Constraint::Not { .. }));
                assert!(matches!(right.as_ref(), Constraint::Comparison { .. }));
            }
            other => panic!("expected and constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_combinators_compose_with_other_rules() {
        let spec_text = r#"
AGENT Composite:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        confidence IN RANGE [0.0, 1.0] OR confidence == NULL
        NOT sources IS NOT_EMPTY
        forall s in sources: s.url IS VALID_URL AND s.title IS NOT_EMPTY
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        assert_eq!(spec.output_constraints.len(), 3);

        match &spec.output_constraints[0] {
            Constraint::Or { left, right } => {
                assert!(matches!(left.as_ref(), Constraint::Range { .. }));
                assert!(matches!(right.as_ref(), Constraint::Comparison { .. }));
            }
            other => panic!("expected or constraint, got {:?}", other),
        }
        match &spec.output_constraints[1] {
            Constraint::Not { inner } => {
                assert!(matches!(
                    inner.as_ref(),
                    Constraint::Type { check: TypeCheck::NotEmpty, .. }
                ));
            }
            other => panic!("expected not constraint, got {:?}", other),
        }
        match &spec.output_constraints[2] {
            Constraint::Quantified { inner, .. } => {
                assert!(matches!(inner.as_ref(), Constraint::And { .. }));
            }
            other => panic!("expected quantified constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_keyword_inside_brackets_not_split() {
        let spec_text = r#"
AGENT Quoted:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        status IN ["up AND running", "down"]
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        match &spec.output_constraints[0] {
            Constraint::InList { values, .. } => assert_eq!(values.len(), 2),
            other => panic!("expected in-list constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_split_top_level_keyword() {
        assert_eq!(
            split_top_level_keyword("x > 0 AND y < 5", "AND"),
            Some(("x > 0", "y < 5"))
        );
        // Keyword needs whitespace on both sides
        assert_eq!(split_top_level_keyword("x > 0 ANDy < 5", "AND"), None);
        // Brackets and quotes shield their contents
        assert_eq!(
            split_top_level_keyword("status IN [a AND b]", "AND"),
            None
        );
        assert_eq!(
            split_top_level_keyword("name == \"Bread AND Butter\"", "AND"),
            None
        );
        // A trailing keyword has no right operand
        assert_eq!(split_top_level_keyword("x == AND", "AND"), None);
    }

    #[test]
    fn test_comments_skipped() {
        let spec_text = r#"
AGENT Commented:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        # this line is a comment
        confidence > 0.5
"#;
        let spec = SpecificationParser::new().parse(spec_text).unwrap();
        assert_eq!(spec.output_constraints.len(), 1);
    }

    #[test]
    fn test_unrecognized_constraint_errors() {
        let spec_text = r#"
AGENT Broken:
    TIER: sonnet
    OUTPUT MUST SATISFY:
        this makes no sense at all
"#;
        let err = SpecificationParser::new().parse(spec_text).unwrap_err();
        match err {
            Error::Parse { fragment, .. } => {
                assert!(fragment.contains("this makes no sense"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
