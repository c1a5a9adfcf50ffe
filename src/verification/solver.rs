//! Symbolic verification of arithmetic and logical claims.
//!
//! The satisfiability core lowers boolean constraint structure to DNF and
//! decides each conjunct of linear atoms with Fourier-Motzkin elimination
//! (strictness-aware). Integer variables are witnessed by bounded rounding
//! search over the real model; systems the core cannot decide within budget
//! come back UNKNOWN rather than wrong.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::verification::expr::{parse_constraint, BoolExpr, CmpOp, LinTerm};

/// Result of symbolic verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Refuted,
    Unknown,
    NotApplicable,
}

impl VerificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Refuted => "refuted",
            Self::Unknown => "unknown",
            Self::NotApplicable => "not_applicable",
        }
    }
}

/// Variable sort for the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarSort {
    Int,
    Real,
    Bool,
}

impl VarSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "int" => Some(Self::Int),
            "real" => Some(Self::Real),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }
}

/// Output of a symbolic verification operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolicOutput {
    pub result: VerificationOutcome,
    pub explanation: String,
    pub counterexample: Option<Value>,
    pub proof_steps: Vec<String>,
    pub verification_time_ms: u64,
    pub claim_text: String,
    pub method: String,
}

impl SymbolicOutput {
    pub fn is_verified(&self) -> bool {
        self.result == VerificationOutcome::Verified
    }

    pub fn is_refuted(&self) -> bool {
        self.result == VerificationOutcome::Refuted
    }

    fn new(result: VerificationOutcome, explanation: String, claim_text: String) -> Self {
        Self {
            result,
            explanation,
            counterexample: None,
            proof_steps: Vec::new(),
            verification_time_ms: 0,
            claim_text,
            method: "symbolic".to_string(),
        }
    }
}

// ==================== Satisfiability core ====================

/// A normalized linear atom: `expr <= 0` (or `< 0` when strict).
#[derive(Debug, Clone)]
struct LinCmp {
    expr: LinTerm,
    strict: bool,
}

/// Result of a satisfiability check.
#[derive(Debug, Clone)]
pub enum SatResult {
    Sat(HashMap<String, String>),
    Unsat,
    Unknown,
}

struct Budget {
    deadline: Instant,
    steps: u64,
    max_steps: u64,
}

impl Budget {
    fn new(timeout_ms: u64) -> Self {
        Self {
            deadline: Instant::now() + std::time::Duration::from_millis(timeout_ms),
            steps: 0,
            max_steps: 200_000,
        }
    }

    fn spend(&mut self, steps: u64) -> bool {
        self.steps += steps;
        self.steps <= self.max_steps && Instant::now() <= self.deadline
    }
}

const MAX_DNF_CONJUNCTS: usize = 512;
const MAX_BOOL_VARS: usize = 12;
const EPSILON: f64 = 1e-9;

/// Convert a BoolExpr (bools already substituted) to DNF over linear atoms.
///
/// Returns None when the DNF exceeds the size bound.
fn to_dnf(expr: &BoolExpr, negated: bool) -> Option<Vec<Vec<LinCmp>>> {
    match expr {
        BoolExpr::Atom { lhs, op, rhs } => {
            let diff = lhs.sub(rhs); // atom: diff OP 0
            let effective = if negated { negate_op(*op) } else { *op };
            Some(match effective {
                CmpOp::Le => vec![vec![LinCmp { expr: diff, strict: false }]],
                CmpOp::Lt => vec![vec![LinCmp { expr: diff, strict: true }]],
                CmpOp::Ge => vec![vec![LinCmp { expr: diff.scale(-1.0), strict: false }]],
                CmpOp::Gt => vec![vec![LinCmp { expr: diff.scale(-1.0), strict: true }]],
                CmpOp::Eq => vec![vec![
                    LinCmp { expr: diff.clone(), strict: false },
                    LinCmp { expr: diff.scale(-1.0), strict: false },
                ]],
                CmpOp::Ne => vec![
                    vec![LinCmp { expr: diff.clone(), strict: true }],
                    vec![LinCmp { expr: diff.scale(-1.0), strict: true }],
                ],
            })
        }
        // Boolean variables were substituted before lowering
        BoolExpr::Var(_) => None,
        BoolExpr::Not(inner) => to_dnf(inner, !negated),
        BoolExpr::And(items) if !negated => dnf_conjoin(items, negated),
        BoolExpr::And(items) => dnf_disjoin(items, negated),
        BoolExpr::Or(items) if !negated => dnf_disjoin(items, negated),
        BoolExpr::Or(items) => dnf_conjoin(items, negated),
        BoolExpr::Implies(a, b) => {
            let rewritten = BoolExpr::Or(vec![BoolExpr::Not(a.clone()), (**b).clone()]);
            to_dnf(&rewritten, negated)
        }
        BoolExpr::Ite(c, t, e) => {
            let rewritten = BoolExpr::Or(vec![
                BoolExpr::And(vec![(**c).clone(), (**t).clone()]),
                BoolExpr::And(vec![BoolExpr::Not(c.clone()), (**e).clone()]),
            ]);
            to_dnf(&rewritten, negated)
        }
    }
}

fn dnf_conjoin(items: &[BoolExpr], negated: bool) -> Option<Vec<Vec<LinCmp>>> {
    let mut result: Vec<Vec<LinCmp>> = vec![Vec::new()];
    for item in items {
        let item_dnf = to_dnf(item, negated)?;
        let mut next = Vec::new();
        for conjunct in &result {
            for item_conjunct in &item_dnf {
                let mut merged = conjunct.clone();
                merged.extend(item_conjunct.iter().cloned());
                next.push(merged);
                if next.len() > MAX_DNF_CONJUNCTS {
                    return None;
                }
            }
        }
        result = next;
    }
    Some(result)
}

fn dnf_disjoin(items: &[BoolExpr], negated: bool) -> Option<Vec<Vec<LinCmp>>> {
    let mut result = Vec::new();
    for item in items {
        result.extend(to_dnf(item, negated)?);
        if result.len() > MAX_DNF_CONJUNCTS {
            return None;
        }
    }
    Some(result)
}

fn negate_op(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Eq => CmpOp::Ne,
        CmpOp::Ne => CmpOp::Eq,
        CmpOp::Lt => CmpOp::Ge,
        CmpOp::Le => CmpOp::Gt,
        CmpOp::Gt => CmpOp::Le,
        CmpOp::Ge => CmpOp::Lt,
    }
}

/// Substitute boolean variables with constants, simplifying as we go.
///
/// Returns None when the expression reduces to a boolean constant
/// (Some(true/false) in `constant` instead).
fn substitute_bools(expr: &BoolExpr, assignment: &HashMap<String, bool>) -> (Option<BoolExpr>, Option<bool>) {
    match expr {
        BoolExpr::Var(name) => match assignment.get(name) {
            Some(value) => (None, Some(*value)),
            None => (Some(expr.clone()), None),
        },
        BoolExpr::Atom { .. } => (Some(expr.clone()), None),
        BoolExpr::Not(inner) => match substitute_bools(inner, assignment) {
            (_, Some(value)) => (None, Some(!value)),
            (Some(e), None) => (Some(BoolExpr::Not(Box::new(e))), None),
            (None, None) => (None, None),
        },
        BoolExpr::And(items) => {
            let mut remaining = Vec::new();
            for item in items {
                match substitute_bools(item, assignment) {
                    (_, Some(false)) => return (None, Some(false)),
                    (_, Some(true)) => {}
                    (Some(e), None) => remaining.push(e),
                    (None, None) => {}
                }
            }
            if remaining.is_empty() {
                (None, Some(true))
            } else {
                (Some(BoolExpr::And(remaining)), None)
            }
        }
        BoolExpr::Or(items) => {
            let mut remaining = Vec::new();
            for item in items {
                match substitute_bools(item, assignment) {
                    (_, Some(true)) => return (None, Some(true)),
                    (_, Some(false)) => {}
                    (Some(e), None) => remaining.push(e),
                    (None, None) => {}
                }
            }
            if remaining.is_empty() {
                (None, Some(false))
            } else {
                (Some(BoolExpr::Or(remaining)), None)
            }
        }
        BoolExpr::Implies(a, b) => {
            let rewritten = BoolExpr::Or(vec![BoolExpr::Not(a.clone()), (**b).clone()]);
            substitute_bools(&rewritten, assignment)
        }
        BoolExpr::Ite(c, t, e) => {
            let rewritten = BoolExpr::Or(vec![
                BoolExpr::And(vec![(**c).clone(), (**t).clone()]),
                BoolExpr::And(vec![BoolExpr::Not(c.clone()), (**e).clone()]),
            ]);
            substitute_bools(&rewritten, assignment)
        }
    }
}

fn collect_bool_vars(expr: &BoolExpr, out: &mut BTreeSet<String>) {
    match expr {
        BoolExpr::Var(name) => {
            out.insert(name.clone());
        }
        BoolExpr::Atom { .. } => {}
        BoolExpr::Not(inner) => collect_bool_vars(inner, out),
        BoolExpr::And(items) | BoolExpr::Or(items) => {
            for item in items {
                collect_bool_vars(item, out);
            }
        }
        BoolExpr::Implies(a, b) => {
            collect_bool_vars(a, out);
            collect_bool_vars(b, out);
        }
        BoolExpr::Ite(c, t, e) => {
            collect_bool_vars(c, out);
            collect_bool_vars(t, out);
            collect_bool_vars(e, out);
        }
    }
}

fn collect_numeric_vars(conjunct: &[LinCmp]) -> BTreeSet<String> {
    let mut vars = BTreeSet::new();
    for cmp in conjunct {
        for (var, coeff) in &cmp.expr.coeffs {
            if coeff.abs() > EPSILON {
                vars.insert(var.clone());
            }
        }
    }
    vars
}

/// Decide a conjunct of linear atoms over the reals via Fourier-Motzkin,
/// producing a model when satisfiable.
fn solve_conjunct_real(
    conjunct: &[LinCmp],
    budget: &mut Budget,
) -> Option<Option<HashMap<String, f64>>> {
    // Returns Some(Some(model)) = sat, Some(None) = unsat, None = budget out
    let vars: Vec<String> = collect_numeric_vars(conjunct).into_iter().collect();
    let mut system: Vec<LinCmp> = conjunct.to_vec();
    let mut eliminated: Vec<(String, Vec<LinCmp>)> = Vec::new();

    for var in &vars {
        if !budget.spend(system.len() as u64) {
            return None;
        }

        let mut lowers: Vec<LinCmp> = Vec::new(); // var >= bound form: expr has negative coeff
        let mut uppers: Vec<LinCmp> = Vec::new();
        let mut rest: Vec<LinCmp> = Vec::new();

        for cmp in &system {
            match cmp.expr.coeffs.get(var).copied().unwrap_or(0.0) {
                c if c > EPSILON => uppers.push(cmp.clone()),
                c if c < -EPSILON => lowers.push(cmp.clone()),
                _ => rest.push(cmp.clone()),
            }
        }

        // Record the var's bounds for back-substitution
        let mut bounds: Vec<LinCmp> = lowers.clone();
        bounds.extend(uppers.clone());
        eliminated.push((var.clone(), bounds));

        // Combine every lower with every upper
        for lower in &lowers {
            for upper in &uppers {
                if !budget.spend(1) {
                    return None;
                }
                let lower_coeff = -lower.expr.coeffs.get(var).copied().unwrap_or(0.0);
                let upper_coeff = upper.expr.coeffs.get(var).copied().unwrap_or(0.0);
                // lower: (expr_l + c_l * var) <= 0 with c_l < 0, i.e.
                //   var >= expr_l / (-c_l)
                // upper: var <= -expr_u / c_u
                // Combined: c_u * expr_l + c_l' * expr_u <= 0 scaled positive
                let combined = lower
                    .expr
                    .scale(upper_coeff)
                    .add(&upper.expr.scale(lower_coeff));
                let mut combined = combined;
                combined.coeffs.remove(var);
                rest.push(LinCmp {
                    expr: combined,
                    strict: lower.strict || upper.strict,
                });
            }
        }

        system = rest;
    }

    // All variables eliminated: every remaining atom is a constant check
    for cmp in &system {
        let value = cmp.expr.constant;
        let holds = if cmp.strict { value < -EPSILON } else { value <= EPSILON };
        if !holds {
            return Some(None);
        }
    }

    // Back-substitute a model in reverse elimination order
    let mut model: HashMap<String, f64> = HashMap::new();
    for (var, bounds) in eliminated.iter().rev() {
        let mut low = f64::NEG_INFINITY;
        let mut high = f64::INFINITY;
        let mut low_strict = false;
        let mut high_strict = false;

        for cmp in bounds {
            let coeff = cmp.expr.coeffs.get(var).copied().unwrap_or(0.0);
            let mut rest_expr = cmp.expr.clone();
            rest_expr.coeffs.remove(var);
            let rest_value = rest_expr.evaluate(&model);
            // coeff * var + rest <= 0  =>  var <= -rest/coeff (coeff > 0)
            //                              var >= -rest/coeff (coeff < 0)
            let bound = -rest_value / coeff;
            if coeff > 0.0 {
                if bound < high {
                    high = bound;
                    high_strict = cmp.strict;
                }
            } else if bound > low {
                low = bound;
                low_strict = cmp.strict;
            }
        }

        let value = pick_value(low, high, low_strict, high_strict);
        model.insert(var.clone(), value);
    }

    Some(Some(model))
}

fn pick_value(low: f64, high: f64, low_strict: bool, high_strict: bool) -> f64 {
    match (low.is_finite(), high.is_finite()) {
        (true, true) => {
            if (high - low).abs() < EPSILON && !low_strict && !high_strict {
                low
            } else {
                (low + high) / 2.0
            }
        }
        (true, false) => {
            if low_strict {
                low + 1.0
            } else {
                low.max(0.0)
            }
        }
        (false, true) => {
            if high_strict {
                high - 1.0
            } else {
                high.min(0.0)
            }
        }
        (false, false) => 0.0,
    }
}

fn conjunct_holds(conjunct: &[LinCmp], model: &HashMap<String, f64>) -> bool {
    conjunct.iter().all(|cmp| {
        let value = cmp.expr.evaluate(model);
        if cmp.strict {
            value < -EPSILON
        } else {
            value <= EPSILON
        }
    })
}

/// Witness integer variables by rounding search around the real model.
fn integer_witness(
    conjunct: &[LinCmp],
    real_model: &HashMap<String, f64>,
    int_vars: &[String],
    budget: &mut Budget,
) -> Option<HashMap<String, f64>> {
    if int_vars.is_empty() {
        return Some(real_model.clone());
    }
    if int_vars.len() > 8 {
        return None;
    }

    let combos = 1usize << int_vars.len();
    for combo in 0..combos {
        if !budget.spend(1) {
            return None;
        }
        let mut candidate = real_model.clone();
        for (bit, var) in int_vars.iter().enumerate() {
            let real_value = real_model.get(var).copied().unwrap_or(0.0);
            let rounded = if combo & (1 << bit) == 0 {
                real_value.floor()
            } else {
                real_value.ceil()
            };
            candidate.insert(var.clone(), rounded);
        }
        if conjunct_holds(conjunct, &candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Check satisfiability of a set of constraints.
pub fn check_sat(
    constraints: &[BoolExpr],
    sorts: &HashMap<String, VarSort>,
    timeout_ms: u64,
) -> SatResult {
    let mut budget = Budget::new(timeout_ms);
    let combined = BoolExpr::And(constraints.to_vec());

    let mut bool_vars = BTreeSet::new();
    collect_bool_vars(&combined, &mut bool_vars);
    for (name, sort) in sorts {
        if *sort == VarSort::Bool {
            bool_vars.insert(name.clone());
        }
    }
    let bool_vars: Vec<String> = bool_vars.into_iter().collect();
    if bool_vars.len() > MAX_BOOL_VARS {
        return SatResult::Unknown;
    }

    let int_vars: Vec<String> = sorts
        .iter()
        .filter(|(_, sort)| **sort == VarSort::Int)
        .map(|(name, _)| name.clone())
        .collect();

    let mut saw_unknown = false;

    for combo in 0..(1usize << bool_vars.len()) {
        if !budget.spend(1) {
            return SatResult::Unknown;
        }

        let assignment: HashMap<String, bool> = bool_vars
            .iter()
            .enumerate()
            .map(|(bit, name)| (name.clone(), combo & (1 << bit) != 0))
            .collect();

        let (reduced, constant) = substitute_bools(&combined, &assignment);
        let reduced = match (reduced, constant) {
            (_, Some(false)) => continue,
            (_, Some(true)) => {
                // Purely boolean satisfiable under this assignment
                let model = assignment
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_string()))
                    .collect();
                return SatResult::Sat(model);
            }
            (Some(expr), None) => expr,
            (None, None) => continue,
        };

        let dnf = match to_dnf(&reduced, false) {
            Some(dnf) => dnf,
            None => {
                saw_unknown = true;
                continue;
            }
        };

        for conjunct in &dnf {
            match solve_conjunct_real(conjunct, &mut budget) {
                None => {
                    saw_unknown = true;
                }
                Some(None) => {}
                Some(Some(real_model)) => {
                    let relevant_ints: Vec<String> = int_vars
                        .iter()
                        .filter(|v| real_model.contains_key(*v))
                        .cloned()
                        .collect();
                    match integer_witness(conjunct, &real_model, &relevant_ints, &mut budget) {
                        Some(model) => {
                            let mut rendered: HashMap<String, String> = model
                                .iter()
                                .map(|(name, value)| (name.clone(), format_number(*value)))
                                .collect();
                            for (name, value) in &assignment {
                                rendered.insert(name.clone(), value.to_string());
                            }
                            return SatResult::Sat(rendered);
                        }
                        None => {
                            // Real-feasible but no integer witness found
                            saw_unknown = true;
                        }
                    }
                }
            }
        }
    }

    if saw_unknown {
        SatResult::Unknown
    } else {
        SatResult::Unsat
    }
}

fn format_number(value: f64) -> String {
    if (value - value.round()).abs() < EPSILON {
        format!("{}", value.round() as i64)
    } else {
        format!("{}", value)
    }
}

// ==================== Verifier ====================

/// Formal verification of arithmetic, satisfiability, implication, and
/// equality claims.
pub struct SymbolicVerifier {
    timeout_ms: u64,
    verification_count: std::sync::Mutex<u64>,
    verified_count: std::sync::Mutex<u64>,
    refuted_count: std::sync::Mutex<u64>,
}

impl SymbolicVerifier {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            verification_count: std::sync::Mutex::new(0),
            verified_count: std::sync::Mutex::new(0),
            refuted_count: std::sync::Mutex::new(0),
        }
    }

    fn record(&self, output: &SymbolicOutput) {
        *self.verification_count.lock().expect("stats lock") += 1;
        match output.result {
            VerificationOutcome::Verified => {
                *self.verified_count.lock().expect("stats lock") += 1
            }
            VerificationOutcome::Refuted => {
                *self.refuted_count.lock().expect("stats lock") += 1
            }
            _ => {}
        }
    }

    /// Verify an arithmetic claim: evaluate `operation` over `values` and
    /// compare to the claimed result within `tolerance`.
    pub fn verify_arithmetic(
        &self,
        values: &HashMap<String, f64>,
        claimed_result: f64,
        operation: &str,
        tolerance: f64,
    ) -> SymbolicOutput {
        let start = Instant::now();
        let claim_text = format!("{} = {}", operation, claimed_result);

        let actual = match crate::verification::expr::eval_arithmetic(operation, values) {
            Ok(actual) => actual,
            Err(e) => {
                let mut output = SymbolicOutput::new(
                    VerificationOutcome::NotApplicable,
                    format!("Could not evaluate operation: {}", e),
                    claim_text,
                );
                output.verification_time_ms = start.elapsed().as_millis() as u64;
                self.record(&output);
                return output;
            }
        };

        let difference = (actual - claimed_result).abs();
        let mut output = if difference <= tolerance {
            let mut out = SymbolicOutput::new(
                VerificationOutcome::Verified,
                format!("Arithmetic verified: {} = {}", operation, actual),
                claim_text,
            );
            out.proof_steps = vec![
                format!("Given values: {:?}", sorted_pairs(values)),
                format!("Computed: {} = {}", operation, actual),
                format!("Claimed: {}", claimed_result),
                format!("Difference: {} <= {}", difference, tolerance),
                "VERIFIED".to_string(),
            ];
            out
        } else {
            let mut out = SymbolicOutput::new(
                VerificationOutcome::Refuted,
                format!(
                    "Arithmetic error: {} = {}, not {}",
                    operation, actual, claimed_result
                ),
                claim_text,
            );
            out.counterexample = Some(json!({
                "expected": claimed_result,
                "actual": actual,
                "difference": difference,
            }));
            out.proof_steps = vec![
                format!("Given values: {:?}", sorted_pairs(values)),
                format!("Computed: {} = {}", operation, actual),
                format!("Claimed: {}", claimed_result),
                format!("Difference: {} > {}", difference, tolerance),
                "REFUTED".to_string(),
            ];
            out
        };

        output.verification_time_ms = start.elapsed().as_millis() as u64;
        self.record(&output);
        output
    }

    /// Verify that constraints are satisfiable (or unsatisfiable, when
    /// `should_be_satisfiable` is false).
    pub fn verify_constraints(
        &self,
        constraints: &[String],
        variable_types: &HashMap<String, VarSort>,
        should_be_satisfiable: bool,
    ) -> SymbolicOutput {
        let start = Instant::now();
        let claim_text = format!(
            "Constraints {:?} are {}",
            constraints,
            if should_be_satisfiable {
                "satisfiable"
            } else {
                "unsatisfiable"
            }
        );

        let mut proof_steps = vec!["Building constraint system".to_string()];
        let mut parsed = Vec::new();
        for constraint in constraints {
            match parse_constraint(constraint) {
                Ok(expr) => {
                    proof_steps.push(format!("Added constraint: {}", constraint));
                    parsed.push(expr);
                }
                Err(e) => {
                    let mut output = SymbolicOutput::new(
                        VerificationOutcome::NotApplicable,
                        format!("Could not parse constraint '{}': {}", constraint, e),
                        claim_text,
                    );
                    output.verification_time_ms = start.elapsed().as_millis() as u64;
                    self.record(&output);
                    return output;
                }
            }
        }

        proof_steps.push("Checking satisfiability...".to_string());
        let mut output = match check_sat(&parsed, variable_types, self.timeout_ms) {
            SatResult::Sat(model) => {
                proof_steps.push(format!("Found satisfying assignment: {:?}", sorted_model(&model)));
                if should_be_satisfiable {
                    proof_steps.push("VERIFIED".to_string());
                    let mut out = SymbolicOutput::new(
                        VerificationOutcome::Verified,
                        "Constraints are satisfiable as claimed".to_string(),
                        claim_text,
                    );
                    out.counterexample = Some(json!(model));
                    out
                } else {
                    proof_steps.push("REFUTED".to_string());
                    let mut out = SymbolicOutput::new(
                        VerificationOutcome::Refuted,
                        "Constraints claimed unsatisfiable but are satisfiable".to_string(),
                        claim_text,
                    );
                    out.counterexample = Some(json!(model));
                    out
                }
            }
            SatResult::Unsat => {
                proof_steps.push("No satisfying assignment exists".to_string());
                if should_be_satisfiable {
                    proof_steps.push("REFUTED".to_string());
                    SymbolicOutput::new(
                        VerificationOutcome::Refuted,
                        "Constraints claimed satisfiable but are unsatisfiable".to_string(),
                        claim_text,
                    )
                } else {
                    proof_steps.push("VERIFIED".to_string());
                    SymbolicOutput::new(
                        VerificationOutcome::Verified,
                        "Correctly identified as unsatisfiable".to_string(),
                        claim_text,
                    )
                }
            }
            SatResult::Unknown => {
                proof_steps.push("UNKNOWN - timeout or complexity limit".to_string());
                SymbolicOutput::new(
                    VerificationOutcome::Unknown,
                    format!(
                        "Could not determine satisfiability within {}ms",
                        self.timeout_ms
                    ),
                    claim_text,
                )
            }
        };

        output.proof_steps = proof_steps;
        output.verification_time_ms = start.elapsed().as_millis() as u64;
        self.record(&output);
        output
    }

    /// Verify that premises imply a conclusion by refuting
    /// premises AND NOT(conclusion).
    pub fn verify_implication(
        &self,
        premises: &[String],
        conclusion: &str,
        variable_types: &HashMap<String, VarSort>,
    ) -> SymbolicOutput {
        let start = Instant::now();
        let claim_text = format!("Given {:?}, conclude {}", premises, conclusion);

        let mut proof_steps = vec!["Setting up implication proof by contradiction".to_string()];
        let mut system = Vec::new();
        for premise in premises {
            match parse_constraint(premise) {
                Ok(expr) => {
                    proof_steps.push(format!("Added premise: {}", premise));
                    system.push(expr);
                }
                Err(e) => {
                    let mut output = SymbolicOutput::new(
                        VerificationOutcome::NotApplicable,
                        format!("Could not parse premise '{}': {}", premise, e),
                        claim_text,
                    );
                    output.verification_time_ms = start.elapsed().as_millis() as u64;
                    self.record(&output);
                    return output;
                }
            }
        }

        match parse_constraint(conclusion) {
            Ok(expr) => {
                proof_steps.push(format!("Added negation of conclusion: NOT({})", conclusion));
                system.push(BoolExpr::Not(Box::new(expr)));
            }
            Err(e) => {
                let mut output = SymbolicOutput::new(
                    VerificationOutcome::NotApplicable,
                    format!("Could not parse conclusion '{}': {}", conclusion, e),
                    claim_text,
                );
                output.verification_time_ms = start.elapsed().as_millis() as u64;
                self.record(&output);
                return output;
            }
        }

        proof_steps.push("Checking if premises AND NOT(conclusion) is satisfiable...".to_string());
        let mut output = match check_sat(&system, variable_types, self.timeout_ms) {
            SatResult::Unsat => {
                proof_steps.push("Unsatisfiable - implication holds".to_string());
                proof_steps.push("VERIFIED".to_string());
                SymbolicOutput::new(
                    VerificationOutcome::Verified,
                    format!("Conclusion '{}' logically follows from premises", conclusion),
                    claim_text,
                )
            }
            SatResult::Sat(model) => {
                proof_steps.push(format!("Found counterexample: {:?}", sorted_model(&model)));
                proof_steps.push("REFUTED".to_string());
                let mut out = SymbolicOutput::new(
                    VerificationOutcome::Refuted,
                    "Conclusion does not follow from premises".to_string(),
                    claim_text,
                );
                out.counterexample = Some(json!(model));
                out
            }
            SatResult::Unknown => {
                proof_steps.push("UNKNOWN".to_string());
                SymbolicOutput::new(
                    VerificationOutcome::Unknown,
                    "Could not verify implication within timeout".to_string(),
                    claim_text,
                )
            }
        };

        output.proof_steps = proof_steps;
        output.verification_time_ms = start.elapsed().as_millis() as u64;
        self.record(&output);
        output
    }

    /// Verify that two expressions are equal for all variable values by
    /// refuting `expr1 != expr2`.
    pub fn verify_equality(
        &self,
        expr1: &str,
        expr2: &str,
        variable_types: &HashMap<String, VarSort>,
    ) -> SymbolicOutput {
        let start = Instant::now();
        let claim_text = format!("{} == {} for all values", expr1, expr2);

        let disequality = match parse_constraint(&format!("({}) != ({})", expr1, expr2)) {
            Ok(expr) => expr,
            Err(e) => {
                let mut output = SymbolicOutput::new(
                    VerificationOutcome::NotApplicable,
                    format!("Could not parse expressions: {}", e),
                    claim_text,
                );
                output.verification_time_ms = start.elapsed().as_millis() as u64;
                self.record(&output);
                return output;
            }
        };

        let mut output = match check_sat(&[disequality], variable_types, self.timeout_ms) {
            SatResult::Unsat => SymbolicOutput::new(
                VerificationOutcome::Verified,
                format!("Expressions {} and {} are always equal", expr1, expr2),
                claim_text,
            ),
            SatResult::Sat(model) => {
                let mut out = SymbolicOutput::new(
                    VerificationOutcome::Refuted,
                    "Expressions are not always equal".to_string(),
                    claim_text,
                );
                out.counterexample = Some(json!(model));
                out
            }
            SatResult::Unknown => SymbolicOutput::new(
                VerificationOutcome::Unknown,
                "Could not determine equality within timeout".to_string(),
                claim_text,
            ),
        };

        output.verification_time_ms = start.elapsed().as_millis() as u64;
        self.record(&output);
        output
    }

    /// Verification statistics.
    pub fn stats(&self) -> Value {
        let total = *self.verification_count.lock().expect("stats lock");
        let verified = *self.verified_count.lock().expect("stats lock");
        json!({
            "total_verifications": total,
            "verified": verified,
            "refuted": *self.refuted_count.lock().expect("stats lock"),
            "verification_rate": if total > 0 { verified as f64 / total as f64 } else { 0.0 },
        })
    }
}

impl Default for SymbolicVerifier {
    fn default() -> Self {
        Self::new(5000)
    }
}

fn sorted_pairs(values: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut pairs: Vec<(String, f64)> = values
        .iter()
        .map(|(name, value)| (name.clone(), *value))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

fn sorted_model(model: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = model
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorts(pairs: &[(&str, VarSort)]) -> HashMap<String, VarSort> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_arithmetic_verified() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_arithmetic(
            &values(&[("a", 3.0), ("b", 4.0)]),
            7.0,
            "a + b",
            1e-3,
        );
        assert!(result.is_verified());
    }

    #[test]
    fn test_arithmetic_refuted_with_counterexample() {
        // total - spent claimed 10000, actually 8000
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_arithmetic(
            &values(&[("total", 50000.0), ("spent", 42000.0)]),
            10000.0,
            "total - spent",
            1e-3,
        );

        assert!(result.is_refuted());
        let counterexample = result.counterexample.unwrap();
        assert_eq!(counterexample["expected"], json!(10000.0));
        assert_eq!(counterexample["actual"], json!(8000.0));
        assert_eq!(counterexample["difference"], json!(2000.0));
    }

    #[test]
    fn test_arithmetic_not_applicable() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_arithmetic(&values(&[]), 1.0, "mystery + 1", 1e-3);
        assert_eq!(result.result, VerificationOutcome::NotApplicable);
    }

    #[test]
    fn test_constraints_contradiction_refuted() {
        // x > 0 and x < 0 claimed satisfiable: refuted
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_constraints(
            &["x > 0".to_string(), "x < 0".to_string()],
            &sorts(&[("x", VarSort::Real)]),
            true,
        );
        assert!(result.is_refuted());
    }

    #[test]
    fn test_constraints_satisfiable_with_model() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_constraints(
            &["x > 0".to_string(), "x < 10".to_string()],
            &sorts(&[("x", VarSort::Real)]),
            true,
        );
        assert!(result.is_verified());
        assert!(result.counterexample.is_some());
    }

    #[test]
    fn test_constraints_unsat_claimed_unsat() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_constraints(
            &["x > 5".to_string(), "x <= 4".to_string()],
            &sorts(&[("x", VarSort::Int)]),
            false,
        );
        assert!(result.is_verified());
    }

    #[test]
    fn test_implication_verified() {
        // x > 5 and y == x + 1 imply y > 5
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_implication(
            &["x > 5".to_string(), "y == x + 1".to_string()],
            "y > 5",
            &sorts(&[("x", VarSort::Int), ("y", VarSort::Int)]),
        );
        assert!(result.is_verified());
    }

    #[test]
    fn test_implication_refuted_with_model() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_implication(
            &["x > 0".to_string()],
            "x > 10",
            &sorts(&[("x", VarSort::Real)]),
        );
        assert!(result.is_refuted());
        assert!(result.counterexample.is_some());
    }

    #[test]
    fn test_equality_commutativity() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_equality(
            "x + y",
            "y + x",
            &sorts(&[("x", VarSort::Real), ("y", VarSort::Real)]),
        );
        assert!(result.is_verified());
    }

    #[test]
    fn test_equality_refuted() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_equality(
            "x + 1",
            "x + 2",
            &sorts(&[("x", VarSort::Real)]),
        );
        assert!(result.is_refuted());
    }

    #[test]
    fn test_function_constraints() {
        let verifier = SymbolicVerifier::default();
        // And(x > 0, x < 1) is satisfiable over reals
        let result = verifier.verify_constraints(
            &["And(x > 0, x < 1)".to_string()],
            &sorts(&[("x", VarSort::Real)]),
            true,
        );
        assert!(result.is_verified());

        // Or of two disjoint ranges is satisfiable
        let result = verifier.verify_constraints(
            &["Or(And(x > 0, x < 1), x > 100)".to_string()],
            &sorts(&[("x", VarSort::Real)]),
            true,
        );
        assert!(result.is_verified());
    }

    #[test]
    fn test_integer_gap_is_not_claimed_sat() {
        // 0 < x < 1 has no integer solution; the core must not claim SAT
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_constraints(
            &["x > 0".to_string(), "x < 1".to_string()],
            &sorts(&[("x", VarSort::Int)]),
            true,
        );
        assert_ne!(result.result, VerificationOutcome::Verified);
    }

    #[test]
    fn test_bool_variables() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_constraints(
            &["And(is_ready, Not(is_ready))".to_string()],
            &sorts(&[("is_ready", VarSort::Bool)]),
            false,
        );
        assert!(result.is_verified());
    }

    #[test]
    fn test_nonlinear_degrades() {
        let verifier = SymbolicVerifier::default();
        let result = verifier.verify_constraints(
            &["x * y > 4".to_string()],
            &sorts(&[("x", VarSort::Real), ("y", VarSort::Real)]),
            true,
        );
        assert_eq!(result.result, VerificationOutcome::NotApplicable);
    }

    #[test]
    fn test_stats() {
        let verifier = SymbolicVerifier::default();
        verifier.verify_arithmetic(&values(&[("a", 1.0)]), 1.0, "a", 1e-3);
        verifier.verify_arithmetic(&values(&[("a", 1.0)]), 2.0, "a", 1e-3);

        let stats = verifier.stats();
        assert_eq!(stats["total_verifications"], json!(2));
        assert_eq!(stats["verified"], json!(1));
        assert_eq!(stats["refuted"], json!(1));
    }
}
