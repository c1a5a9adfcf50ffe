//! Specification DSL: parsing, compilation, validation, and enforcement.
//!
//! Specifications declare an agent's tier, allowed tools, output
//! constraints, behavioral rules, and runtime limits. The compiler turns
//! DSL text into a validator, a behavior prompt block, and a limit table;
//! the enforced agent applies all three around a wrapped agent.

mod agent;
mod ast;
mod compiler;
mod parser;
mod validators;

pub use agent::{
    EnforcementStats, ExecutionResult, LimitEnforcer, MockAgent, SpecificationEnforcedAgent,
};
pub use ast::{
    AgentSpecification, BehaviorRule, Comparator, Condition, Constraint, DateExpr, PathExpr,
    Quantifier, SpecValue, TierLevel, TimeUnit, TypeCheck,
};
pub use compiler::{
    BehaviorPromptGenerator, CompiledSpecification, SpecificationCompiler, SpecificationRegistry,
};
pub use parser::SpecificationParser;
pub use validators::{ConstraintValidator, SpecificationValidator, ValidationResult};
