//! Placeholder substitution and condition evaluation
//!
//! Placeholders use `{{ path }}` syntax and are resolved against a
//! [`VariableStore`]. Conditions are resolved first, then parsed with a small
//! expression grammar:
//!
//! - literals: numbers, `'single'`/`"double"` strings, `true`, `false`, `null`, `undefined`
//! - identifiers: dotted variable paths (`user.count`), read from the store
//! - operators: `!`, unary `-`, `* / %`, `+ -`, `< <= > >=`, `== != === !==`, `&&`, `||`
//! - parentheses
//!
//! Comparison and truthiness follow JavaScript coercion rules, since workflow
//! authors write conditions in that dialect.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::variables::{stringify, VariableStore};

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap());

const MAX_EXPRESSION_LEN: usize = 4096;
const MAX_DEPTH: usize = 64;

/// Errors that can occur during condition evaluation
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ExpressionError {
    #[error("Expression is empty")]
    Empty,

    #[error("Expression exceeds {0} characters")]
    TooLong(usize),

    #[error("Expression nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("Unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Invalid expression syntax: {0}")]
    InvalidSyntax(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

/// Replace every `{{path}}` with the stringified value at `path`.
///
/// Unresolved placeholders are left verbatim.
pub fn resolve_placeholders(text: &str, vars: &VariableStore) -> String {
    PLACEHOLDER_REGEX
        .replace_all(text, |caps: &regex::Captures| match vars.get(&caps[1]) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Resolve placeholders inside strings of an arbitrary JSON value.
///
/// Non-string leaves pass through unchanged.
pub fn resolve_value(value: &Value, vars: &VariableStore) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_placeholders(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// A string that is exactly one placeholder (`"{{ user.items }}"`) yields the raw path
pub fn sole_placeholder(text: &str) -> Option<&str> {
    let caps = PLACEHOLDER_REGEX.captures(text.trim())?;
    let whole = caps.get(0)?;
    if whole.as_str().len() == text.trim().len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Evaluate a condition, coercing any failure to `false`
pub fn evaluate_condition(condition: &str, vars: &VariableStore) -> bool {
    try_evaluate_condition(condition, vars).unwrap_or(false)
}

/// Evaluate a condition, reporting parse and lookup failures
pub fn try_evaluate_condition(
    condition: &str,
    vars: &VariableStore,
) -> Result<bool, ExpressionError> {
    let resolved = resolve_placeholders(condition, vars);
    if resolved.len() > MAX_EXPRESSION_LEN {
        return Err(ExpressionError::TooLong(MAX_EXPRESSION_LEN));
    }

    let tokens = tokenize(&resolved)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
        skipping: 0,
        vars,
    };
    let value = parser.parse_or()?;
    if parser.pos != tokens.len() {
        return Err(ExpressionError::InvalidSyntax(format!(
            "unexpected token {:?}",
            tokens[parser.pos]
        )));
    }
    Ok(value.truthy())
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 17] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
    "=",
];

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '(' || c == ')' {
            tokens.push(if c == '(' { Token::LParen } else { Token::RParen });
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::InvalidSyntax(format!("bad number '{}'", text)))?;
            tokens.push(Token::Number(number));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(ExpressionError::UnterminatedString),
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            text.push(*next);
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(text));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            // a lone `=` is assignment, which conditions never allow
            Some(&"=") | None => return Err(ExpressionError::UnexpectedChar(c, i)),
            Some(op) => {
                tokens.push(Token::Op(*op));
                i += op.len();
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Json(Value),
}

impl Operand {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Operand::Null,
            Value::Bool(b) => Operand::Bool(*b),
            Value::Number(n) => n.as_f64().map(Operand::Number).unwrap_or(Operand::Null),
            Value::String(s) => Operand::Str(s.clone()),
            other => Operand::Json(other.clone()),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Operand::Undefined | Operand::Null => false,
            Operand::Bool(b) => *b,
            Operand::Number(n) => *n != 0.0 && !n.is_nan(),
            Operand::Str(s) => !s.is_empty(),
            Operand::Json(_) => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Operand::Undefined => f64::NAN,
            Operand::Null => 0.0,
            Operand::Bool(b) => f64::from(u8::from(*b)),
            Operand::Number(n) => *n,
            Operand::Str(s) if s.trim().is_empty() => 0.0,
            Operand::Str(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            Operand::Json(Value::Array(items)) if items.is_empty() => 0.0,
            Operand::Json(_) => f64::NAN,
        }
    }

    fn to_text(&self) -> String {
        match self {
            Operand::Undefined => "undefined".to_string(),
            Operand::Null => "null".to_string(),
            Operand::Bool(b) => b.to_string(),
            Operand::Number(n) => format_number(*n),
            Operand::Str(s) => s.clone(),
            Operand::Json(v) => stringify(v),
        }
    }

    fn strict_eq(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Number(a), Operand::Number(b)) => a == b,
            _ => self == other,
        }
    }

    fn loose_eq(&self, other: &Operand) -> bool {
        use Operand::*;
        match (self, other) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Str(a), Str(b)) => a == b,
            (Json(a), Json(b)) => a == b,
            (Json(_), _) => Str(self.to_text()).loose_eq(other),
            (_, Json(_)) => self.loose_eq(&Str(other.to_text())),
            _ => self.to_number() == other.to_number(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// ============================================================================
// Parser / evaluator
// ============================================================================

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    /// Nonzero while parsing an operand that short-circuiting discards
    skipping: usize,
    vars: &'a VariableStore,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        let op = self.peek_op().filter(|op| ops.contains(op))?;
        self.pos += 1;
        Some(op)
    }

    fn parse_or(&mut self) -> Result<Operand, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            if left.truthy() {
                self.skip(Self::parse_and)?;
            } else {
                left = self.parse_and()?;
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Operand, ExpressionError> {
        let mut left = self.parse_equality()?;
        while self.eat_op(&["&&"]).is_some() {
            if left.truthy() {
                left = self.parse_equality()?;
            } else {
                self.skip(Self::parse_equality)?;
            }
        }
        Ok(left)
    }

    /// Parse an operand for syntax only; its variables are never looked up
    fn skip(
        &mut self,
        parse: fn(&mut Self) -> Result<Operand, ExpressionError>,
    ) -> Result<(), ExpressionError> {
        self.skipping += 1;
        let parsed = parse(self);
        self.skipping -= 1;
        parsed.map(|_| ())
    }

    fn parse_equality(&mut self) -> Result<Operand, ExpressionError> {
        let mut left = self.parse_comparison()?;
        while let Some(op) = self.eat_op(&["===", "!==", "==", "!="]) {
            let right = self.parse_comparison()?;
            let result = match op {
                "===" => left.strict_eq(&right),
                "!==" => !left.strict_eq(&right),
                "==" => left.loose_eq(&right),
                _ => !left.loose_eq(&right),
            };
            left = Operand::Bool(result);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Operand, ExpressionError> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.eat_op(&["<", "<=", ">", ">="]) {
            let right = self.parse_additive()?;
            let result = match (&left, &right) {
                (Operand::Str(a), Operand::Str(b)) => match op {
                    "<" => a < b,
                    "<=" => a <= b,
                    ">" => a > b,
                    _ => a >= b,
                },
                _ => {
                    let (a, b) = (left.to_number(), right.to_number());
                    match op {
                        "<" => a < b,
                        "<=" => a <= b,
                        ">" => a > b,
                        _ => a >= b,
                    }
                }
            };
            left = Operand::Bool(result);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Operand, ExpressionError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let right = self.parse_multiplicative()?;
            left = match (op, &left, &right) {
                ("+", Operand::Str(_), _) | ("+", _, Operand::Str(_)) => {
                    Operand::Str(format!("{}{}", left.to_text(), right.to_text()))
                }
                ("+", _, _) => Operand::Number(left.to_number() + right.to_number()),
                _ => Operand::Number(left.to_number() - right.to_number()),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Operand, ExpressionError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let right = self.parse_unary()?;
            let (a, b) = (left.to_number(), right.to_number());
            left = Operand::Number(match op {
                "*" => a * b,
                "/" => a / b,
                _ => a % b,
            });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Operand, ExpressionError> {
        if let Some(op) = self.eat_op(&["!", "-", "+"]) {
            self.enter()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(match op {
                "!" => Operand::Bool(!operand.truthy()),
                "-" => Operand::Number(-operand.to_number()),
                _ => Operand::Number(operand.to_number()),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Operand, ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ExpressionError::InvalidSyntax("unexpected end of expression".into()))?;
        self.pos += 1;

        match token {
            Token::Number(n) => Ok(Operand::Number(n)),
            Token::Str(s) => Ok(Operand::Str(s)),
            Token::LParen => {
                self.enter()?;
                let value = self.parse_or()?;
                self.depth -= 1;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err(ExpressionError::InvalidSyntax("missing ')'".into())),
                }
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Operand::Bool(true)),
                "false" => Ok(Operand::Bool(false)),
                "null" => Ok(Operand::Null),
                "undefined" => Ok(Operand::Undefined),
                _ if self.skipping > 0 => Ok(Operand::Undefined),
                path => self
                    .vars
                    .get(path)
                    .map(Operand::from_json)
                    .ok_or_else(|| ExpressionError::UnknownVariable(path.to_string())),
            },
            other => Err(ExpressionError::InvalidSyntax(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> VariableStore {
        let mut vars = VariableStore::new();
        vars.set("user.count", json!(15)).unwrap();
        vars.set("user.flag", json!(true)).unwrap();
        vars.set("user.name", json!("bob")).unwrap();
        vars.set("workflow.region", json!("eu")).unwrap();
        vars
    }

    #[test]
    fn test_resolve_placeholders() {
        let mut vars = VariableStore::new();
        vars.set("user.x", json!(5)).unwrap();
        assert_eq!(resolve_placeholders("{{user.x}} items", &vars), "5 items");
        assert_eq!(resolve_placeholders("{{ x }}/{{x}}", &vars), "5/5");
    }

    #[test]
    fn test_unresolved_placeholder_left_verbatim() {
        let vars = VariableStore::new();
        assert_eq!(
            resolve_placeholders("hello {{user.missing}}!", &vars),
            "hello {{user.missing}}!"
        );
    }

    #[test]
    fn test_resolve_value_keeps_structure() {
        let vars = test_store();
        let resolved = resolve_value(&json!({"n": "{{user.name}}", "k": [1, "{{workflow.region}}"]}), &vars);
        assert_eq!(resolved, json!({"n": "bob", "k": [1, "eu"]}));
    }

    #[test]
    fn test_sole_placeholder() {
        assert_eq!(sole_placeholder("{{ user.items }}"), Some("user.items"));
        assert_eq!(sole_placeholder("items: {{user.items}}"), None);
        assert_eq!(sole_placeholder("user.items"), None);
    }

    #[test]
    fn test_numeric_comparison() {
        let vars = test_store();
        assert!(evaluate_condition("{{user.count}} > 10", &vars));
        assert!(!evaluate_condition("{{user.count}} < 10", &vars));
        assert!(evaluate_condition("user.count >= 15 && user.count <= 15", &vars));
    }

    #[test]
    fn test_unresolved_placeholder_is_false() {
        let vars = VariableStore::new();
        assert!(!evaluate_condition("{{user.count}} > 10", &vars));
        assert!(try_evaluate_condition("{{user.count}} > 10", &vars).is_err());
    }

    #[test]
    fn test_strict_equality() {
        let vars = test_store();
        assert!(evaluate_condition("{{user.flag}}===true", &vars));
        assert!(!evaluate_condition("{{user.flag}}===false", &vars));
        assert!(evaluate_condition("'{{user.name}}' === 'bob'", &vars));
        assert!(!evaluate_condition("'1' === 1", &vars));
        assert!(evaluate_condition("'1' == 1", &vars));
    }

    #[test]
    fn test_bare_word_is_lookup() {
        let vars = test_store();
        // resolves to `bob === 'bob'`, and `bob` is not a variable
        assert!(!evaluate_condition("{{user.name}} === 'bob'", &vars));
        assert!(evaluate_condition("user.name === 'bob'", &vars));
    }

    #[test]
    fn test_logical_and_grouping() {
        let vars = test_store();
        assert!(evaluate_condition("!(user.count < 10) || false", &vars));
        assert!(evaluate_condition("(1 + 2) * 3 === 9", &vars));
        assert!(evaluate_condition("10 % 4 == 2", &vars));
        assert!(evaluate_condition("'a' + 'b' === 'ab'", &vars));
        assert!(!evaluate_condition("null", &vars));
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        let vars = test_store();
        assert_eq!(try_evaluate_condition("user.flag || user.missing", &vars), Ok(true));
        assert!(evaluate_condition("user.flag || user.missing === 'x'", &vars));
        assert_eq!(try_evaluate_condition("!user.flag && user.missing", &vars), Ok(false));
        assert_eq!(
            try_evaluate_condition("user.count > 100 && (user.missing || user.other)", &vars),
            Ok(false)
        );

        // the deciding operand is still evaluated
        assert_eq!(
            try_evaluate_condition("!user.flag || user.missing", &vars),
            Err(ExpressionError::UnknownVariable("user.missing".to_string()))
        );
        assert_eq!(
            try_evaluate_condition("user.flag && user.missing", &vars),
            Err(ExpressionError::UnknownVariable("user.missing".to_string()))
        );
        // skipped operands must still parse
        assert!(try_evaluate_condition("true || (1 >", &vars).is_err());
    }

    #[test]
    fn test_rejects_assignment_and_garbage() {
        let vars = test_store();
        assert!(matches!(
            try_evaluate_condition("user.count = 1", &vars),
            Err(ExpressionError::UnexpectedChar('=', _))
        ));
        assert_eq!(try_evaluate_condition("   ", &vars), Err(ExpressionError::Empty));
        assert!(try_evaluate_condition("(1 > 0", &vars).is_err());
        assert!(try_evaluate_condition("'open", &vars).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let vars = VariableStore::new();
        let deep = format!("{}true{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(
            try_evaluate_condition(&deep, &vars),
            Err(ExpressionError::TooDeep(MAX_DEPTH))
        );
    }
}
