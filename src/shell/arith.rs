//! Integer evaluator for `$(( ... ))` expressions.

use super::ast::is_name;
use super::error::RuntimeError;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: &[&str] = &[
    "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!",
];

fn tokenize(expr: &str) -> Result<Vec<Tok>, RuntimeError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    'outer: while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse()
                .map_err(|_| RuntimeError::Arithmetic(format!("number out of range: {text}")))?;
            tokens.push(Tok::Num(value));
            continue;
        }
        if c == '_' || c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i] == '_' || chars[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
                continue;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
                continue;
            }
            _ => {}
        }
        for &op in OPERATORS {
            let len = op.len();
            if i + len <= chars.len() && chars[i..i + len].iter().copied().eq(op.chars()) {
                tokens.push(Tok::Op(op));
                i += len;
                continue 'outer;
            }
        }
        return Err(RuntimeError::Arithmetic(format!(
            "unexpected character '{c}' in '{expr}'"
        )));
    }

    Ok(tokens)
}

/// Deepest nesting of parentheses and prefix operators accepted.
const MAX_DEPTH: usize = 256;

struct Evaluator<'a> {
    expr: &'a str,
    tokens: Vec<Tok>,
    pos: usize,
    depth: usize,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

/// Evaluate `expr`, resolving bare identifiers through `lookup`.
///
/// Unset or empty variables count as zero.
pub fn evaluate(expr: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<i64, RuntimeError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Ok(0);
    }

    let mut evaluator = Evaluator {
        expr,
        tokens,
        pos: 0,
        depth: 0,
        lookup,
    };
    let value = evaluator.binary(0)?;
    if evaluator.pos < evaluator.tokens.len() {
        return Err(evaluator.error("unexpected trailing tokens"));
    }
    Ok(value)
}

/// Binding power of each binary operator; higher binds tighter.
fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" => 3,
        "<" | ">" | "<=" | ">=" => 4,
        "+" | "-" => 5,
        "*" | "/" | "%" => 6,
        _ => return None,
    })
}

impl<'a> Evaluator<'a> {
    fn error(&self, message: &str) -> RuntimeError {
        RuntimeError::Arithmetic(format!("{message} in '{}'", self.expr.trim()))
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn binary(&mut self, min_prec: u8) -> Result<i64, RuntimeError> {
        let mut lhs = self.unary()?;

        while let Some(Tok::Op(op)) = self.peek() {
            let op = *op;
            let Some(prec) = precedence(op) else { break };
            if prec <= min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec)?;
            lhs = self.apply(op, lhs, rhs)?;
        }

        Ok(lhs)
    }

    fn apply(&self, op: &str, lhs: i64, rhs: i64) -> Result<i64, RuntimeError> {
        Ok(match op {
            "+" => lhs.wrapping_add(rhs),
            "-" => lhs.wrapping_sub(rhs),
            "*" => lhs.wrapping_mul(rhs),
            "/" | "%" if rhs == 0 => return Err(self.error("division by zero")),
            "/" => lhs.wrapping_div(rhs),
            "%" => lhs.wrapping_rem(rhs),
            "<" => i64::from(lhs < rhs),
            ">" => i64::from(lhs > rhs),
            "<=" => i64::from(lhs <= rhs),
            ">=" => i64::from(lhs >= rhs),
            "==" => i64::from(lhs == rhs),
            "!=" => i64::from(lhs != rhs),
            "&&" => i64::from(lhs != 0 && rhs != 0),
            "||" => i64::from(lhs != 0 || rhs != 0),
            _ => return Err(self.error(&format!("unknown operator '{op}'"))),
        })
    }

    /// Run `f` one nesting level deeper.
    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<i64, RuntimeError>,
    ) -> Result<i64, RuntimeError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn unary(&mut self) -> Result<i64, RuntimeError> {
        let op = match self.peek() {
            Some(Tok::Op(op @ ("-" | "+" | "!"))) => *op,
            _ => return self.primary(),
        };
        self.pos += 1;

        let value = self.nested(Self::unary)?;
        Ok(match op {
            "-" => value.wrapping_neg(),
            "!" => i64::from(value == 0),
            _ => value,
        })
    }

    fn primary(&mut self) -> Result<i64, RuntimeError> {
        let token = self.peek().cloned();
        self.pos += 1;

        match token {
            Some(Tok::Num(value)) => Ok(value),
            Some(Tok::Ident(name)) => self.variable(&name),
            Some(Tok::LParen) => {
                let value = self.nested(|this| this.binary(0))?;
                if self.peek() != Some(&Tok::RParen) {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error("expected an operand")),
        }
    }

    fn variable(&self, name: &str) -> Result<i64, RuntimeError> {
        let value = (self.lookup)(name).unwrap_or_default();
        let value = value.trim();
        if value.is_empty() {
            return Ok(0);
        }
        if let Ok(number) = value.parse() {
            return Ok(number);
        }
        if is_name(value) {
            // One level of indirection, as in `a=b; b=3; echo $((a))`.
            return match (self.lookup)(value) {
                Some(inner) => inner
                    .trim()
                    .parse()
                    .map_err(|_| self.error(&format!("'{name}' is not a number"))),
                None => Ok(0),
            };
        }
        Err(self.error(&format!("'{name}' is not a number")))
    }
}
