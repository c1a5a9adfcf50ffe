//! Compiles parsed specifications into enforceable components.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::specs::ast::{BehaviorRule, Condition, TierLevel};
use crate::specs::parser::SpecificationParser;
use crate::specs::validators::SpecificationValidator;

/// A compiled specification ready for enforcement.
#[derive(Debug, Clone)]
pub struct CompiledSpecification {
    pub agent_name: String,
    pub tier: TierLevel,
    pub tools: Vec<String>,
    pub validator: SpecificationValidator,
    pub behavior_prompt: String,
    pub limits: HashMap<String, i64>,
}

/// Generates natural-language prompt additions from behavior rules.
#[derive(Debug, Clone, Default)]
pub struct BehaviorPromptGenerator;

impl BehaviorPromptGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render rules as a bulleted "Behavioral Guidelines" block; empty rule
    /// lists produce an empty string.
    pub fn generate(&self, rules: &[BehaviorRule]) -> String {
        if rules.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Behavioral Guidelines".to_string(), String::new()];
        for rule in rules {
            lines.push(format!("- {}", self.rule_to_prompt(rule)));
        }
        lines.push(String::new());
        lines.join("\n")
    }

    fn rule_to_prompt(&self, rule: &BehaviorRule) -> String {
        match rule {
            BehaviorRule::Prefer { preferred, over } => {
                format!("Prefer {} over {}", preferred, over)
            }
            BehaviorRule::Never { action } => format!("Never {}", action),
            BehaviorRule::Always { action } => format!("Always {}", action),
            BehaviorRule::When { condition, action } => {
                format!("When {}: {}", self.condition_to_text(condition), action)
            }
        }
    }

    fn condition_to_text(&self, condition: &Condition) -> String {
        match condition {
            Condition::Comparison {
                path,
                comparator,
                value,
            } => {
                let op_text = match comparator.as_str() {
                    "==" => "equals",
                    "!=" => "does not equal",
                    "<" => "is less than",
                    ">" => "is greater than",
                    "<=" => "is at most",
                    ">=" => "is at least",
                    other => other,
                };
                format!("{} {} {}", path, op_text, spec_value_text(value))
            }
            Condition::Type { path, check } => format!("{} is {}", path, check.as_str()),
            Condition::Count {
                path,
                comparator,
                value,
            } => format!("count of {} {} {}", path, comparator.as_str(), value),
        }
    }
}

fn spec_value_text(value: &crate::specs::ast::SpecValue) -> String {
    use crate::specs::ast::SpecValue;
    match value {
        SpecValue::Str { value } => value.clone(),
        SpecValue::Number { value } => value.to_string(),
        SpecValue::Bool { value } => value.to_string(),
        SpecValue::Null => "null".to_string(),
        SpecValue::Date { .. } => "the reference date".to_string(),
        SpecValue::Path { path } => path.to_string(),
    }
}

/// Compiles specification DSL text to executable components.
#[derive(Debug, Clone, Default)]
pub struct SpecificationCompiler {
    parser: SpecificationParser,
    prompt_generator: BehaviorPromptGenerator,
}

impl SpecificationCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and compile a specification.
    pub fn compile(&self, spec_text: &str) -> Result<CompiledSpecification> {
        let spec = self.parser.parse(spec_text)?;
        let behavior_prompt = self.prompt_generator.generate(&spec.behavior_rules);

        Ok(CompiledSpecification {
            agent_name: spec.agent_name.clone(),
            tier: spec.tier,
            tools: spec.tools.clone(),
            behavior_prompt,
            limits: spec.limits.clone(),
            validator: SpecificationValidator::new(spec),
        })
    }

    /// Compile a specification from a file.
    pub fn compile_file(&self, file_path: impl AsRef<str>) -> Result<CompiledSpecification> {
        let expanded = shellexpand::tilde(file_path.as_ref()).into_owned();
        let path = PathBuf::from(expanded);
        if !path.exists() {
            return Err(Error::Config(format!(
                "Specification file not found: {}",
                path.display()
            )));
        }
        let spec_text = std::fs::read_to_string(&path)?;
        self.compile(&spec_text)
    }
}

/// Registry for compiled specifications, caching by name and optionally
/// loading `<name>.spec` files from a directory.
pub struct SpecificationRegistry {
    specs_dir: Option<PathBuf>,
    compiler: SpecificationCompiler,
    cache: RwLock<HashMap<String, CompiledSpecification>>,
}

impl SpecificationRegistry {
    pub fn new() -> Self {
        Self {
            specs_dir: None,
            compiler: SpecificationCompiler::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_specs_dir(specs_dir: impl AsRef<str>) -> Self {
        let expanded = shellexpand::tilde(specs_dir.as_ref()).into_owned();
        Self {
            specs_dir: Some(PathBuf::from(expanded)),
            compiler: SpecificationCompiler::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a specification from text under a name.
    pub fn register(&self, name: &str, spec_text: &str) -> Result<CompiledSpecification> {
        let compiled = self.compiler.compile(spec_text)?;
        self.cache
            .write()
            .expect("registry lock")
            .insert(name.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Load a specification by name, from cache or the specs directory.
    pub fn load(&self, name: &str) -> Result<Option<CompiledSpecification>> {
        if let Some(cached) = self.cache.read().expect("registry lock").get(name) {
            return Ok(Some(cached.clone()));
        }

        if let Some(dir) = &self.specs_dir {
            let spec_file = dir.join(format!("{}.spec", name));
            if spec_file.exists() {
                let compiled = self
                    .compiler
                    .compile_file(spec_file.to_string_lossy().as_ref())?;
                self.cache
                    .write()
                    .expect("registry lock")
                    .insert(name.to_string(), compiled.clone());
                return Ok(Some(compiled));
            }
        }

        Ok(None)
    }

    /// Get a specification by name, failing when unknown.
    pub fn get(&self, name: &str) -> Result<CompiledSpecification> {
        self.load(name)?
            .ok_or_else(|| Error::Config(format!("Specification not found: {}", name)))
    }

    /// All registered and on-disk specification names, sorted.
    pub fn list_specs(&self) -> Vec<String> {
        let mut names: std::collections::HashSet<String> = self
            .cache
            .read()
            .expect("registry lock")
            .keys()
            .cloned()
            .collect();

        if let Some(dir) = &self.specs_dir {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == "spec") {
                        if let Some(stem) = path.file_stem() {
                            names.insert(stem.to_string_lossy().into_owned());
                        }
                    }
                }
            }
        }

        let mut sorted: Vec<String> = names.into_iter().collect();
        sorted.sort();
        sorted
    }

    pub fn clear_cache(&self) {
        self.cache.write().expect("registry lock").clear();
    }
}

impl Default for SpecificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SPEC: &str = r#"
AGENT ResearchAgent:
    TIER: sonnet
    TOOLS: [WebSearch, Read]
    OUTPUT MUST SATISFY:
        confidence IN RANGE [0.0, 1.0]
    BEHAVIOR:
        PREFER primary sources OVER secondary sources
        NEVER make claims without citations
        WHEN confidence < 0.5: flag the answer for review
    LIMITS:
        max_tool_calls: 50
"#;

    #[test]
    fn test_compile() {
        let compiled = SpecificationCompiler::new().compile(SPEC).unwrap();

        assert_eq!(compiled.agent_name, "ResearchAgent");
        assert_eq!(compiled.tier, TierLevel::Sonnet);
        assert_eq!(compiled.tools, vec!["WebSearch", "Read"]);
        assert_eq!(compiled.limits.get("max_tool_calls"), Some(&50));
        assert!(compiled
            .validator
            .validate(&json!({"confidence": 0.5}))
            .is_ok());
    }

    #[test]
    fn test_behavior_prompt() {
        let compiled = SpecificationCompiler::new().compile(SPEC).unwrap();
        let prompt = &compiled.behavior_prompt;

        assert!(prompt.starts_with("## Behavioral Guidelines"));
        assert!(prompt.contains("- Prefer primary sources over secondary sources"));
        assert!(prompt.contains("- Never make claims without citations"));
        assert!(prompt.contains("- When confidence is less than 0.5: flag the answer for review"));
    }

    #[test]
    fn test_empty_behavior_prompt() {
        let generator = BehaviorPromptGenerator::new();
        assert_eq!(generator.generate(&[]), "");
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = SpecificationRegistry::new();
        registry.register("research", SPEC).unwrap();

        let compiled = registry.get("research").unwrap();
        assert_eq!(compiled.agent_name, "ResearchAgent");

        assert!(registry.get("missing").is_err());
        assert_eq!(registry.list_specs(), vec!["research"]);
    }

    #[test]
    fn test_registry_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("research.spec"), SPEC).unwrap();

        let registry = SpecificationRegistry::with_specs_dir(dir.path().to_str().unwrap());
        let compiled = registry.load("research").unwrap().unwrap();
        assert_eq!(compiled.agent_name, "ResearchAgent");

        assert!(registry.list_specs().contains(&"research".to_string()));

        registry.clear_cache();
        // Still loadable from disk after a cache clear
        assert!(registry.load("research").unwrap().is_some());
    }
}
