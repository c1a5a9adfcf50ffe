//! Safe expression parsing: tokenizer, shunting-yard arithmetic, and a
//! small combinator parser for solver constraints.
//!
//! Untrusted strings are never handed to any evaluator; everything goes
//! through the tokenizer below.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Order matters: multi-char operators before their prefixes.
    Regex::new(r"\d+\.?\d*|[a-zA-Z_]\w*|==|!=|<=|>=|<|>|\+|-|\*\*|\*|//|/|%|\(|\)|,")
        .expect("Invalid regex")
});

/// Tokenize an expression string.
pub fn tokenize(expr: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(expr)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn is_number(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn precedence(op: &str) -> Option<u8> {
    match op {
        "+" | "-" => Some(1),
        "*" | "/" | "//" | "%" => Some(2),
        "**" => Some(3),
        _ => None,
    }
}

fn apply_op(stack: &mut Vec<f64>, op: &str) -> Result<()> {
    if stack.len() < 2 {
        return Err(Error::Validation(format!("Not enough operands for {}", op)));
    }
    let b = stack.pop().expect("checked len");
    let a = stack.pop().expect("checked len");
    let result = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "//" => (a / b).floor(),
        "%" => a % b,
        "**" => a.powf(b),
        _ => return Err(Error::Validation(format!("Unknown operator: {}", op))),
    };
    stack.push(result);
    Ok(())
}

/// Safely evaluate an arithmetic expression over named values using a
/// shunting-yard evaluator.
pub fn eval_arithmetic(expr: &str, values: &HashMap<String, f64>) -> Result<f64> {
    let tokens = tokenize(expr);
    if tokens.is_empty() {
        return Err(Error::Validation(format!("Empty expression: {}", expr)));
    }

    let mut output: Vec<f64> = Vec::new();
    let mut operators: Vec<String> = Vec::new();

    for token in &tokens {
        if is_number(token) {
            output.push(
                token
                    .parse()
                    .map_err(|_| Error::Validation(format!("Invalid number: {}", token)))?,
            );
        } else if is_identifier(token) {
            let value = values
                .get(token)
                .ok_or_else(|| Error::Validation(format!("Unknown variable: {}", token)))?;
            output.push(*value);
        } else if let Some(prec) = precedence(token) {
            while let Some(top) = operators.last() {
                match precedence(top) {
                    // ** is right-associative; the rest are left-associative
                    Some(top_prec)
                        if top_prec > prec || (top_prec == prec && token != "**") =>
                    {
                        let op = operators.pop().expect("checked last");
                        apply_op(&mut output, &op)?;
                    }
                    _ => break,
                }
            }
            operators.push(token.clone());
        } else if token == "(" {
            operators.push(token.clone());
        } else if token == ")" {
            loop {
                match operators.pop() {
                    Some(op) if op == "(" => break,
                    Some(op) => apply_op(&mut output, &op)?,
                    None => {
                        return Err(Error::Validation("Unbalanced parentheses".to_string()))
                    }
                }
            }
        } else {
            return Err(Error::Validation(format!("Unknown token: {}", token)));
        }
    }

    while let Some(op) = operators.pop() {
        if op == "(" {
            return Err(Error::Validation("Unbalanced parentheses".to_string()));
        }
        apply_op(&mut output, &op)?;
    }

    if output.len() != 1 {
        return Err(Error::Validation(format!("Invalid expression: {}", expr)));
    }
    Ok(output[0])
}

/// A linear expression: coefficient map plus constant.
///
/// The constraint layer only handles linear arithmetic; products of
/// variables are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinTerm {
    pub coeffs: HashMap<String, f64>,
    pub constant: f64,
}

impl LinTerm {
    pub fn constant(value: f64) -> Self {
        Self {
            coeffs: HashMap::new(),
            constant: value,
        }
    }

    pub fn variable(name: &str) -> Self {
        Self {
            coeffs: HashMap::from([(name.to_string(), 1.0)]),
            constant: 0.0,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.values().all(|c| *c == 0.0)
    }

    pub fn add(&self, other: &Self) -> Self {
        let mut coeffs = self.coeffs.clone();
        for (var, coeff) in &other.coeffs {
            *coeffs.entry(var.clone()).or_insert(0.0) += coeff;
        }
        Self {
            coeffs,
            constant: self.constant + other.constant,
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.scale(-1.0))
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            coeffs: self
                .coeffs
                .iter()
                .map(|(var, coeff)| (var.clone(), coeff * factor))
                .collect(),
            constant: self.constant * factor,
        }
    }

    /// Evaluate under an assignment; missing variables default to 0.
    pub fn evaluate(&self, assignment: &HashMap<String, f64>) -> f64 {
        self.constant
            + self
                .coeffs
                .iter()
                .map(|(var, coeff)| coeff * assignment.get(var).copied().unwrap_or(0.0))
                .sum::<f64>()
    }
}

/// Comparison operator in a constraint atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

/// Boolean constraint expression over linear atoms and boolean variables.
#[derive(Debug, Clone, PartialEq)]
pub enum BoolExpr {
    Atom {
        lhs: LinTerm,
        op: CmpOp,
        rhs: LinTerm,
    },
    Var(String),
    Not(Box<BoolExpr>),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
    Implies(Box<BoolExpr>, Box<BoolExpr>),
    /// If(c, t, e): boolean if-then-else.
    Ite(Box<BoolExpr>, Box<BoolExpr>, Box<BoolExpr>),
}

/// Parse a constraint string: comparison atoms over linear terms plus the
/// solver functions `And`, `Or`, `Not`, `Implies`, `If`.
pub fn parse_constraint(constraint: &str) -> Result<BoolExpr> {
    let constraint = constraint.trim();

    for func in ["And", "Or", "Not", "Implies", "If"] {
        if let Some(inner) = constraint
            .strip_prefix(func)
            .and_then(|rest| rest.trim_start().strip_prefix('('))
        {
            let inner = inner
                .strip_suffix(')')
                .ok_or_else(|| Error::Validation(format!("Unbalanced call: {}", constraint)))?;
            let args: Vec<BoolExpr> = split_args(inner)
                .iter()
                .map(|arg| parse_constraint(arg))
                .collect::<Result<_>>()?;

            return match (func, args.len()) {
                ("Not", 1) => Ok(BoolExpr::Not(Box::new(args.into_iter().next().expect("len 1")))),
                ("Not", n) => Err(Error::Validation(format!(
                    "Not requires exactly 1 argument, got {}",
                    n
                ))),
                ("And", _) => Ok(BoolExpr::And(args)),
                ("Or", _) => Ok(BoolExpr::Or(args)),
                ("Implies", 2) => {
                    let mut it = args.into_iter();
                    Ok(BoolExpr::Implies(
                        Box::new(it.next().expect("len 2")),
                        Box::new(it.next().expect("len 2")),
                    ))
                }
                ("Implies", n) => Err(Error::Validation(format!(
                    "Implies requires exactly 2 arguments, got {}",
                    n
                ))),
                ("If", 3) => {
                    let mut it = args.into_iter();
                    Ok(BoolExpr::Ite(
                        Box::new(it.next().expect("len 3")),
                        Box::new(it.next().expect("len 3")),
                        Box::new(it.next().expect("len 3")),
                    ))
                }
                ("If", n) => Err(Error::Validation(format!(
                    "If requires exactly 3 arguments, got {}",
                    n
                ))),
                _ => unreachable!(),
            };
        }
    }

    // Comparison atom: find the top-level comparison operator
    for op_str in ["==", "!=", "<=", ">=", "<", ">"] {
        if let Some(index) = find_top_level(constraint, op_str) {
            let lhs = parse_linear(&constraint[..index])?;
            let rhs = parse_linear(&constraint[index + op_str.len()..])?;
            let op = CmpOp::parse(op_str).expect("listed operators parse");
            return Ok(BoolExpr::Atom { lhs, op, rhs });
        }
    }

    // Bare identifier: a boolean variable
    let tokens = tokenize(constraint);
    if tokens.len() == 1 && is_identifier(&tokens[0]) {
        return Ok(BoolExpr::Var(tokens[0].clone()));
    }

    Err(Error::Validation(format!(
        "No comparison operator found in: {}",
        constraint
    )))
}

/// Find a top-level (depth 0) occurrence of `needle`, avoiding partial
/// matches of two-char operators.
fn find_top_level(text: &str, needle: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut index = 0usize;

    while index + needle.len() <= text.len() {
        let c = bytes[index] as char;
        if c == '(' {
            depth += 1;
        } else if c == ')' {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && text[index..].starts_with(needle) {
            // Reject "<" inside "<=", ">" inside ">=", "=" inside "=="
            if needle.len() == 1 {
                let next = bytes.get(index + 1).map(|b| *b as char);
                let prev = index.checked_sub(1).map(|i| bytes[i] as char);
                let part_of_two_char = matches!(next, Some('=')) || matches!(prev, Some('<' | '>' | '=' | '!'));
                if part_of_two_char {
                    index += 1;
                    continue;
                }
            }
            return Some(index);
        }
        index += 1;
    }
    None
}

/// Split function arguments at top-level commas.
pub fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in inner.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// Parse a linear arithmetic expression into a [`LinTerm`].
///
/// Multiplication requires a constant side; division requires a constant
/// divisor; `**` and `%` require fully constant operands. Anything else is
/// nonlinear and rejected.
pub fn parse_linear(expr: &str) -> Result<LinTerm> {
    let tokens = tokenize(expr);
    if tokens.is_empty() {
        return Err(Error::Validation(format!("Empty term: {}", expr)));
    }
    let mut pos = 0usize;
    let term = parse_sum(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(Error::Validation(format!("Trailing tokens in: {}", expr)));
    }
    Ok(term)
}

fn parse_sum(tokens: &[String], pos: &mut usize) -> Result<LinTerm> {
    // Leading unary minus/plus
    let mut term = if tokens.get(*pos).map(|t| t.as_str()) == Some("-") {
        *pos += 1;
        parse_product(tokens, pos)?.scale(-1.0)
    } else {
        if tokens.get(*pos).map(|t| t.as_str()) == Some("+") {
            *pos += 1;
        }
        parse_product(tokens, pos)?
    };

    while let Some(op) = tokens.get(*pos).map(|t| t.as_str()) {
        match op {
            "+" => {
                *pos += 1;
                let rhs = parse_product(tokens, pos)?;
                term = term.add(&rhs);
            }
            "-" => {
                *pos += 1;
                let rhs = parse_product(tokens, pos)?;
                term = term.sub(&rhs);
            }
            _ => break,
        }
    }
    Ok(term)
}

fn parse_product(tokens: &[String], pos: &mut usize) -> Result<LinTerm> {
    let mut term = parse_factor(tokens, pos)?;

    while let Some(op) = tokens.get(*pos).map(|t| t.as_str()) {
        match op {
            "*" => {
                *pos += 1;
                let rhs = parse_factor(tokens, pos)?;
                term = if term.is_constant() {
                    rhs.scale(term.constant)
                } else if rhs.is_constant() {
                    term.scale(rhs.constant)
                } else {
                    return Err(Error::Validation(
                        "Nonlinear term: product of variables".to_string(),
                    ));
                };
            }
            "/" => {
                *pos += 1;
                let rhs = parse_factor(tokens, pos)?;
                if !rhs.is_constant() || rhs.constant == 0.0 {
                    return Err(Error::Validation(
                        "Division requires a nonzero constant divisor".to_string(),
                    ));
                }
                term = term.scale(1.0 / rhs.constant);
            }
            "**" | "%" | "//" => {
                *pos += 1;
                let rhs = parse_factor(tokens, pos)?;
                if !term.is_constant() || !rhs.is_constant() {
                    return Err(Error::Validation(format!(
                        "Operator {} requires constant operands in constraints",
                        op
                    )));
                }
                let value = match op {
                    "**" => term.constant.powf(rhs.constant),
                    "%" => term.constant % rhs.constant,
                    _ => (term.constant / rhs.constant).floor(),
                };
                term = LinTerm::constant(value);
            }
            _ => break,
        }
    }
    Ok(term)
}

fn parse_factor(tokens: &[String], pos: &mut usize) -> Result<LinTerm> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| Error::Validation("Unexpected end of expression".to_string()))?;

    if token == "(" {
        *pos += 1;
        let term = parse_sum(tokens, pos)?;
        if tokens.get(*pos).map(|t| t.as_str()) != Some(")") {
            return Err(Error::Validation("Unbalanced parentheses".to_string()));
        }
        *pos += 1;
        return Ok(term);
    }
    if token == "-" {
        *pos += 1;
        return Ok(parse_factor(tokens, pos)?.scale(-1.0));
    }
    if is_number(token) {
        let value: f64 = token
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid number: {}", token)))?;
        *pos += 1;
        return Ok(LinTerm::constant(value));
    }
    if is_identifier(token) {
        let term = LinTerm::variable(token);
        *pos += 1;
        return Ok(term);
    }
    Err(Error::Validation(format!("Unexpected token: {}", token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("a + 2*b"), vec!["a", "+", "2", "*", "b"]);
        assert_eq!(tokenize("x<=5"), vec!["x", "<=", "5"]);
        assert_eq!(tokenize("2**3"), vec!["2", "**", "3"]);
        assert_eq!(tokenize("7//2"), vec!["7", "//", "2"]);
    }

    #[test]
    fn test_eval_basic() {
        let vals = values(&[("total", 50000.0), ("spent", 42000.0)]);
        assert_eq!(eval_arithmetic("total - spent", &vals).unwrap(), 8000.0);
        assert_eq!(eval_arithmetic("2 + 3 * 4", &vals).unwrap(), 14.0);
        assert_eq!(eval_arithmetic("(2 + 3) * 4", &vals).unwrap(), 20.0);
    }

    #[test]
    fn test_eval_operators() {
        let vals = HashMap::new();
        assert_eq!(eval_arithmetic("7 // 2", &vals).unwrap(), 3.0);
        assert_eq!(eval_arithmetic("7 % 2", &vals).unwrap(), 1.0);
        assert_eq!(eval_arithmetic("2 ** 3", &vals).unwrap(), 8.0);
        // ** is right-associative: 2^(3^2) = 512
        assert_eq!(eval_arithmetic("2 ** 3 ** 2", &vals).unwrap(), 512.0);
    }

    #[test]
    fn test_eval_errors() {
        let vals = HashMap::new();
        assert!(eval_arithmetic("", &vals).is_err());
        assert!(eval_arithmetic("unknown_var + 1", &vals).is_err());
        assert!(eval_arithmetic("1 +", &vals).is_err());
        assert!(eval_arithmetic("(1 + 2", &vals).is_err());
    }

    #[test]
    fn test_parse_linear() {
        let term = parse_linear("2*x + 3*y - 4").unwrap();
        assert_eq!(term.coeffs.get("x"), Some(&2.0));
        assert_eq!(term.coeffs.get("y"), Some(&3.0));
        assert_eq!(term.constant, -4.0);

        let term = parse_linear("x / 2").unwrap();
        assert_eq!(term.coeffs.get("x"), Some(&0.5));
    }

    #[test]
    fn test_parse_linear_rejects_nonlinear() {
        assert!(parse_linear("x * y").is_err());
        assert!(parse_linear("x / y").is_err());
        assert!(parse_linear("x ** 2").is_err());
    }

    #[test]
    fn test_parse_constraint_atom() {
        match parse_constraint("x > 5").unwrap() {
            BoolExpr::Atom { lhs, op, rhs } => {
                assert_eq!(lhs.coeffs.get("x"), Some(&1.0));
                assert_eq!(op, CmpOp::Gt);
                assert_eq!(rhs.constant, 5.0);
            }
            other => panic!("expected atom, got {:?}", other),
        }

        match parse_constraint("y == x + 1").unwrap() {
            BoolExpr::Atom { rhs, .. } => {
                assert_eq!(rhs.coeffs.get("x"), Some(&1.0));
                assert_eq!(rhs.constant, 1.0);
            }
            other => panic!("expected atom, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_constraint_functions() {
        match parse_constraint("And(x > 0, y < 10)").unwrap() {
            BoolExpr::And(args) => assert_eq!(args.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }

        match parse_constraint("Implies(x > 5, y > 0)").unwrap() {
            BoolExpr::Implies(_, _) => {}
            other => panic!("expected Implies, got {:?}", other),
        }

        match parse_constraint("Not(x == 0)").unwrap() {
            BoolExpr::Not(_) => {}
            other => panic!("expected Not, got {:?}", other),
        }

        // Nested calls survive argument splitting
        match parse_constraint("Or(And(x > 0, x < 1), x > 100)").unwrap() {
            BoolExpr::Or(args) => {
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], BoolExpr::And(_)));
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bool_var() {
        assert_eq!(
            parse_constraint("is_ready").unwrap(),
            BoolExpr::Var("is_ready".to_string())
        );
    }

    #[test]
    fn test_parse_constraint_errors() {
        assert!(parse_constraint("just some words here +").is_err());
        assert!(parse_constraint("Not(x > 0, y > 0)").is_err());
    }

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args("x > 0, And(y > 1, z < 2), w == 3"),
            vec!["x > 0", "And(y > 1, z < 2)", "w == 3"]
        );
    }

    #[test]
    fn test_lin_term_evaluate() {
        let term = parse_linear("2*x - y + 3").unwrap();
        let assignment = values(&[("x", 2.0), ("y", 1.0)]);
        assert_eq!(term.evaluate(&assignment), 6.0);
    }
}
