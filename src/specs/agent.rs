//! Specification-enforced agent execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::warn;

use crate::error::{Error, Result};
use crate::learning::{Agent, AgentResponse};
use crate::specs::compiler::CompiledSpecification;
use crate::specs::validators::ValidationResult;

/// Tracks resource usage against declared limits during one execution.
#[derive(Debug, Clone)]
pub struct LimitEnforcer {
    limits: HashMap<String, i64>,
    counters: HashMap<String, i64>,
    started: Option<Instant>,
}

impl LimitEnforcer {
    pub fn new(limits: HashMap<String, i64>) -> Self {
        let counters = limits.keys().map(|k| (k.clone(), 0)).collect();
        Self {
            limits,
            counters,
            started: None,
        }
    }

    /// Increment a named counter; errors when the cap is crossed. Unknown
    /// limit names pass through unchecked.
    pub fn check_limit(&mut self, name: &str, increment: i64) -> Result<()> {
        let cap = match self.limits.get(name) {
            Some(cap) => *cap,
            None => return Ok(()),
        };
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter += increment;
        if *counter > cap {
            return Err(Error::limit_exceeded(name, cap, *counter));
        }
        Ok(())
    }

    /// Check wall-clock elapsed time against `timeout_seconds`.
    ///
    /// The first call starts the clock.
    pub fn check_timeout(&mut self) -> Result<()> {
        let cap = match self.limits.get("timeout_seconds") {
            Some(cap) => *cap,
            None => return Ok(()),
        };

        match self.started {
            None => {
                self.started = Some(Instant::now());
                Ok(())
            }
            Some(started) => {
                let elapsed = started.elapsed().as_secs() as i64;
                if elapsed > cap {
                    Err(Error::limit_exceeded("timeout_seconds", cap, elapsed))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Current usage per limit.
    pub fn usage(&self) -> HashMap<String, (i64, i64)> {
        self.limits
            .iter()
            .map(|(name, cap)| {
                (
                    name.clone(),
                    (*self.counters.get(name).unwrap_or(&0), *cap),
                )
            })
            .collect()
    }

    /// Reset all counters and the timeout clock.
    pub fn reset(&mut self) {
        for counter in self.counters.values_mut() {
            *counter = 0;
        }
        self.started = None;
    }
}

/// Result of executing a specification-enforced agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: Value,
    pub validation_results: Vec<ValidationResult>,
    pub execution_time_ms: u64,
    pub limits_enforced: HashMap<String, i64>,
    pub spec_name: String,
}

impl ExecutionResult {
    /// True when every constraint validated.
    pub fn is_valid(&self) -> bool {
        self.validation_results.iter().all(|r| r.valid)
    }
}

/// Execution statistics for an enforced agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementStats {
    pub spec_name: String,
    pub execution_count: u64,
    pub violation_count: u64,
    pub violation_rate: f64,
}

/// Wraps an agent to enforce a compiled specification.
///
/// Adds behavioral guidelines to prompts, enforces runtime limits, and
/// validates output against the spec's constraints. In strict mode a
/// violation is an error; in soft mode the failing results travel in the
/// [`ExecutionResult`].
pub struct SpecificationEnforcedAgent {
    agent: Arc<dyn Agent>,
    spec: CompiledSpecification,
    strict: bool,
    limit_enforcer: Mutex<LimitEnforcer>,
    execution_count: Mutex<u64>,
    violation_count: Mutex<u64>,
}

impl SpecificationEnforcedAgent {
    pub fn new(agent: Arc<dyn Agent>, spec: CompiledSpecification, strict: bool) -> Self {
        let limit_enforcer = Mutex::new(LimitEnforcer::new(spec.limits.clone()));
        Self {
            agent,
            spec,
            strict,
            limit_enforcer,
            execution_count: Mutex::new(0),
            violation_count: Mutex::new(0),
        }
    }

    /// The limit enforcer, for wrapped tools to count against.
    pub fn check_limit(&self, name: &str, increment: i64) -> Result<()> {
        self.limit_enforcer
            .lock()
            .expect("limit lock")
            .check_limit(name, increment)
    }

    /// Execute a task under the specification.
    pub async fn execute(&self, task: &str) -> Result<ExecutionResult> {
        let start = Instant::now();
        *self.execution_count.lock().expect("stats lock") += 1;

        {
            let mut enforcer = self.limit_enforcer.lock().expect("limit lock");
            enforcer.reset();
            enforcer.check_timeout()?;
        }

        let prompt = self.build_prompt(task);
        let response = match self.spec.limits.get("timeout_seconds").copied() {
            Some(cap) if cap >= 0 => {
                let deadline = std::time::Duration::from_secs(cap as u64);
                tokio::time::timeout(deadline, self.agent.execute(&prompt))
                    .await
                    .map_err(|_| {
                        Error::limit_exceeded(
                            "timeout_seconds",
                            cap,
                            start.elapsed().as_secs() as i64,
                        )
                    })??
            }
            _ => self.agent.execute(&prompt).await?,
        };
        let output = response.output;

        self.limit_enforcer
            .lock()
            .expect("limit lock")
            .check_timeout()?;

        let validation_results = match self.spec.validator.validate(&output) {
            Ok(results) => results,
            Err(Error::SpecViolation {
                spec_name,
                summary,
                violations,
            }) => {
                *self.violation_count.lock().expect("stats lock") += 1;
                if self.strict {
                    return Err(Error::SpecViolation {
                        spec_name,
                        summary,
                        violations,
                    });
                }
                warn!(spec = %spec_name, "Specification violated in soft mode: {}", summary);
                violations
            }
            Err(other) => return Err(other),
        };

        Ok(ExecutionResult {
            output,
            validation_results,
            execution_time_ms: start.elapsed().as_millis() as u64,
            limits_enforced: self.spec.limits.clone(),
            spec_name: self.spec.agent_name.clone(),
        })
    }

    fn build_prompt(&self, task: &str) -> String {
        let mut parts = Vec::new();

        if !self.spec.behavior_prompt.is_empty() {
            parts.push(self.spec.behavior_prompt.clone());
        }

        if !self.spec.tools.is_empty() {
            parts.push("## Available Tools".to_string());
            parts.push(format!(
                "You may only use these tools: {}",
                self.spec.tools.join(", ")
            ));
            parts.push(String::new());
        }

        parts.push("## Task".to_string());
        parts.push(task.to_string());

        parts.join("\n")
    }

    pub fn stats(&self) -> EnforcementStats {
        let executions = *self.execution_count.lock().expect("stats lock");
        let violations = *self.violation_count.lock().expect("stats lock");
        EnforcementStats {
            spec_name: self.spec.agent_name.clone(),
            execution_count: executions,
            violation_count: violations,
            violation_rate: if executions > 0 {
                violations as f64 / executions as f64
            } else {
                0.0
            },
        }
    }
}

/// Scripted agent for tests.
pub struct MockAgent {
    response: AgentResponse,
    calls: Mutex<Vec<String>>,
}

impl MockAgent {
    pub fn new(output: Value) -> Self {
        Self {
            response: AgentResponse::new(true, 0.9, output),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock").clone()
    }
}

#[async_trait::async_trait]
impl Agent for MockAgent {
    async fn execute(&self, task: &str) -> Result<AgentResponse> {
        self.calls.lock().expect("mock lock").push(task.to_string());
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::compiler::SpecificationCompiler;
    use serde_json::json;

    const SPEC: &str = r#"
AGENT ResearchAgent:
    TIER: sonnet
    TOOLS: [WebSearch, Read]
    OUTPUT MUST SATISFY:
        confidence IN RANGE [0.0, 1.0]
    BEHAVIOR:
        NEVER make claims without citations
    LIMITS:
        max_tool_calls: 2
        timeout_seconds: 300
"#;

    fn enforced(output: Value, strict: bool) -> (Arc<MockAgent>, SpecificationEnforcedAgent) {
        let spec = SpecificationCompiler::new().compile(SPEC).unwrap();
        let agent = Arc::new(MockAgent::new(output));
        let enforced =
            SpecificationEnforcedAgent::new(Arc::clone(&agent) as Arc<dyn Agent>, spec, strict);
        (agent, enforced)
    }

    #[test]
    fn test_limit_enforcer_counts() {
        let mut enforcer =
            LimitEnforcer::new(HashMap::from([("max_tool_calls".to_string(), 2)]));

        enforcer.check_limit("max_tool_calls", 1).unwrap();
        enforcer.check_limit("max_tool_calls", 1).unwrap();
        let err = enforcer.check_limit("max_tool_calls", 1).unwrap_err();
        assert!(matches!(
            err,
            Error::LimitExceeded { limit: 2, actual: 3, .. }
        ));

        // Unknown limits pass through
        enforcer.check_limit("unknown", 100).unwrap();

        enforcer.reset();
        enforcer.check_limit("max_tool_calls", 1).unwrap();
    }

    #[test]
    fn test_limit_enforcer_usage() {
        let mut enforcer =
            LimitEnforcer::new(HashMap::from([("max_tool_calls".to_string(), 5)]));
        enforcer.check_limit("max_tool_calls", 3).unwrap();

        let usage = enforcer.usage();
        assert_eq!(usage.get("max_tool_calls"), Some(&(3, 5)));
    }

    #[tokio::test]
    async fn test_valid_execution() {
        let (agent, enforced) = enforced(json!({"confidence": 0.8}), true);

        let result = enforced.execute("research something").await.unwrap();
        assert!(result.is_valid());
        assert_eq!(result.spec_name, "ResearchAgent");
        assert_eq!(result.limits_enforced.get("max_tool_calls"), Some(&2));

        // Prompt carries the behavior block, tool restrictions, and task
        let prompt = &agent.calls()[0];
        assert!(prompt.contains("## Behavioral Guidelines"));
        assert!(prompt.contains("Never make claims without citations"));
        assert!(prompt.contains("You may only use these tools: WebSearch, Read"));
        assert!(prompt.contains("## Task\nresearch something"));
    }

    #[tokio::test]
    async fn test_strict_mode_raises_on_violation() {
        let (_agent, enforced) = enforced(json!({"confidence": 1.5}), true);

        let err = enforced.execute("task").await.unwrap_err();
        match err {
            Error::SpecViolation { violations, .. } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].path.as_deref(), Some("confidence"));
            }
            other => panic!("expected violation, got {:?}", other),
        }
        assert_eq!(enforced.stats().violation_count, 1);
    }

    #[tokio::test]
    async fn test_soft_mode_returns_violations() {
        let (_agent, enforced) = enforced(json!({"confidence": 1.5}), false);

        let result = enforced.execute("task").await.unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.validation_results.len(), 1);
        assert!(!result.validation_results[0].valid);
    }

    #[tokio::test]
    async fn test_timeout_limit_enforced() {
        struct SlowAgent;

        #[async_trait::async_trait]
        impl Agent for SlowAgent {
            async fn execute(&self, _task: &str) -> Result<AgentResponse> {
                tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
                Ok(AgentResponse::new(true, 0.9, json!({"confidence": 0.5})))
            }
        }

        let spec_text = r#"
AGENT SlowSpec:
    TIER: haiku
    OUTPUT MUST SATISFY:
        confidence IN RANGE [0.0, 1.0]
    LIMITS:
        timeout_seconds: 1
"#;
        let spec = SpecificationCompiler::new().compile(spec_text).unwrap();
        let enforced = SpecificationEnforcedAgent::new(Arc::new(SlowAgent), spec, true);

        let err = enforced.execute("task").await.unwrap_err();
        assert!(matches!(
            err,
            Error::LimitExceeded { ref name, .. } if name == "timeout_seconds"
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let (_agent, enforced) = enforced(json!({"confidence": 0.5}), true);
        enforced.execute("a").await.unwrap();
        enforced.execute("b").await.unwrap();

        let stats = enforced.stats();
        assert_eq!(stats.execution_count, 2);
        assert_eq!(stats.violation_count, 0);
        assert_eq!(stats.violation_rate, 0.0);
    }
}
