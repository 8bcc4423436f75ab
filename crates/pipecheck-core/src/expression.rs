//! Arithmetic expressions and `$(variable)` substitution.
//!
//! Scenario files may give any numeric field as a string expression over
//! scenario variables, e.g. `playback-time: "duration / 2"` or
//! `start: "min(position + 1.0, duration)"`. The grammar is plain
//! arithmetic with `+ - * /`, unary minus, parentheses and the two-argument
//! functions `min()` and `max()`. Identifiers resolve through a caller
//! supplied lookup so the engine can refresh `position` and `duration`
//! right before evaluating.

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::error::{PipecheckError, Result};

// ---------------------------------------------------------------------------
// Variable table
// ---------------------------------------------------------------------------

/// Named scenario variables. Holds both engine-maintained values
/// (`position`, `duration`) and user values from `set-vars` or `foreach`.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    vars: BTreeMap<String, Value>,
}

impl VarTable {
    pub fn new() -> VarTable {
        VarTable::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn set_f64(&mut self, name: impl Into<String>, value: f64) {
        self.vars.insert(name.into(), Value::from(value));
    }

    pub fn unset(&mut self, name: &str) {
        self.vars.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Numeric view of a variable. Strings holding a plain number count.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.vars.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String form used for `$(name)` substitution.
    pub fn get_string(&self, name: &str) -> Option<String> {
        match self.vars.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Replace every `$(name)` occurrence in `input` with the variable's
/// string form. With `allow_missing`, unknown names are left untouched
/// so a later pass (with more variables in scope) can finish the job;
/// otherwise an unknown name is an error.
pub fn substitute_variables(input: &str, vars: &VarTable, allow_missing: bool) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find("$(") {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 2..];
        let Some(end) = after.find(')') else {
            return Err(PipecheckError::InvalidExpression {
                expression: input.to_string(),
                reason: "unterminated $( variable reference".to_string(),
            });
        };
        let name = &after[..end];
        match vars.get_string(name) {
            Some(v) => out.push_str(&v),
            None if allow_missing => {
                out.push_str("$(");
                out.push_str(name);
                out.push(')');
            }
            None => return Err(PipecheckError::UndefinedVariable(name.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn lex(expr: &str) -> Result<Vec<Token>> {
    let err = |reason: String| PipecheckError::InvalidExpression {
        expression: expr.to_string(),
        reason,
    };
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '0'..='9' | '.' => {
                let mut end = i;
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &expr[i..end];
                let n: f64 = text
                    .parse()
                    .map_err(|_| err(format!("bad number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = i;
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(expr[i..end].to_string()));
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<f64>,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> PipecheckError {
        PipecheckError::InvalidExpression {
            expression: self.expr.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(self.error(format!("expected {expected:?}, got {t:?}"))),
            None => Err(self.error(format!("expected {expected:?}, got end of input"))),
        }
    }

    fn expression(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    if rhs == 0.0 {
                        return Err(self.error("division by zero"));
                    }
                    value /= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::LParen) => {
                let value = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let a = self.expression()?;
                    self.expect(Token::Comma)?;
                    let b = self.expression()?;
                    self.expect(Token::RParen)?;
                    match name.as_str() {
                        "min" => Ok(a.min(b)),
                        "max" => Ok(a.max(b)),
                        other => Err(self.error(format!("unknown function '{other}'"))),
                    }
                } else {
                    (self.lookup)(&name)
                        .ok_or_else(|| PipecheckError::UndefinedVariable(name.clone()))
                }
            }
            Some(t) => Err(self.error(format!("unexpected token {t:?}"))),
            None => Err(self.error("empty expression")),
        }
    }
}

/// Evaluate `expr` with identifiers resolved through `lookup`.
pub fn evaluate(expr: &str, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64> {
    let tokens = lex(expr)?;
    let mut parser = Parser {
        expr,
        tokens,
        pos: 0,
        lookup,
    };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input after expression"));
    }
    Ok(value)
}

/// Evaluate `expr` against a variable table, after `$(name)` substitution.
pub fn evaluate_with_vars(expr: &str, vars: &VarTable) -> Result<f64> {
    let substituted = substitute_variables(expr, vars, false)?;
    evaluate(&substituted, &|name| vars.get_f64(name))
}

/// Structural check used at scenario load: verifies the expression parses
/// without requiring every variable to already have a value.
pub fn check_syntax(expr: &str) -> Result<()> {
    // Stand in 1.0 for unbound names so value-dependent faults such as
    // division by a variable do not fail the structural check.
    evaluate(expr, &|_| Some(1.0)).map(|_| ())
}

/// Like [`check_syntax`] but tolerates `$(name)` references whose values
/// only become known at execution time, by standing in a placeholder
/// value for each.
pub fn check_syntax_lenient(expr: &str) -> Result<()> {
    let mut flattened = String::with_capacity(expr.len());
    let mut rest = expr;
    while let Some(idx) = rest.find("$(") {
        flattened.push_str(&rest[..idx]);
        let after = &rest[idx + 2..];
        let Some(end) = after.find(')') else {
            return Err(PipecheckError::InvalidExpression {
                expression: expr.to_string(),
                reason: "unterminated $( variable reference".to_string(),
            });
        };
        flattened.push('1');
        rest = &after[end + 1..];
    }
    flattened.push_str(rest);
    check_syntax(&flattened)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars(_: &str) -> Option<f64> {
        None
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        assert_eq!(evaluate("1 + 2 * 3", &no_vars).unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3", &no_vars).unwrap(), 9.0);
        assert_eq!(evaluate("10 / 4", &no_vars).unwrap(), 2.5);
        assert_eq!(evaluate("-3 + 5", &no_vars).unwrap(), 2.0);
    }

    #[test]
    fn evaluates_min_and_max() {
        assert_eq!(evaluate("min(3, 1 + 1)", &no_vars).unwrap(), 2.0);
        assert_eq!(evaluate("max(3, 10 / 2)", &no_vars).unwrap(), 5.0);
    }

    #[test]
    fn half_duration_of_ten_second_stream_is_five() {
        let mut vars = VarTable::new();
        vars.set_f64("duration", 10.0);
        assert_eq!(evaluate_with_vars("duration / 2", &vars).unwrap(), 5.0);
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let err = evaluate("position + 1", &no_vars).unwrap_err();
        assert!(matches!(err, PipecheckError::UndefinedVariable(name) if name == "position"));
    }

    #[test]
    fn division_by_zero_is_rejected() {
        assert!(evaluate("1 / 0", &no_vars).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(evaluate("1 + 2 )", &no_vars).is_err());
        assert!(evaluate("1 2", &no_vars).is_err());
    }

    #[test]
    fn substitutes_dollar_variables() {
        let mut vars = VarTable::new();
        vars.set("sink", serde_yaml::Value::from("videosink0"));
        let out = substitute_variables("target=$(sink)", &vars, false).unwrap();
        assert_eq!(out, "target=videosink0");
    }

    #[test]
    fn missing_variable_kept_verbatim_when_allowed() {
        let vars = VarTable::new();
        let out = substitute_variables("$(later)", &vars, true).unwrap();
        assert_eq!(out, "$(later)");
        assert!(substitute_variables("$(later)", &vars, false).is_err());
    }

    #[test]
    fn syntax_check_accepts_unbound_names() {
        assert!(check_syntax("duration / 2 - min(position, 1)").is_ok());
        assert!(check_syntax("duration +").is_err());
    }

    #[test]
    fn lenient_check_tolerates_dollar_references() {
        assert!(check_syntax_lenient("$(offset) + duration / 2").is_ok());
        assert!(check_syntax_lenient("$(offset + 1").is_err());
    }
}
