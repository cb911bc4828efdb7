//! Word expansion: parameters, command substitution and arithmetic.

use super::arith;
use super::ast::{is_name, ParamExpansion, ParamOp, Word, WordPart};
use super::error::RuntimeError;
use super::lexer;
use super::parser;
use super::runner::Runner;

impl Runner {
    /// Expand a word to a single string, without field splitting.
    ///
    /// Used for assignment values and redirection targets.
    pub(super) fn expand_word(&mut self, word: &Word) -> Result<String, RuntimeError> {
        self.expand_parts(&word.parts)
    }

    fn expand_parts(&mut self, parts: &[WordPart]) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for part in parts {
            out.push_str(&self.expand_part(part)?);
        }
        Ok(out)
    }

    fn expand_part(&mut self, part: &WordPart) -> Result<String, RuntimeError> {
        match part {
            WordPart::Literal(text) | WordPart::Quoted(text) => Ok(text.clone()),
            WordPart::DoubleQuoted(inner) => self.expand_parts(inner),
            WordPart::Param(param) => self.expand_param(param),
            WordPart::CommandSub(source) => self.command_substitution(source),
            WordPart::Arithmetic(raw) => self.arithmetic(raw),
        }
    }

    /// Expand a word into command arguments.
    ///
    /// Results of unquoted expansions are split on whitespace and vanish
    /// when empty. `"$@"` yields one field per positional parameter.
    pub(super) fn expand_fields(&mut self, word: &Word) -> Result<Vec<String>, RuntimeError> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut has_current = false;

        for part in &word.parts {
            match part {
                WordPart::Literal(text) | WordPart::Quoted(text) => {
                    current.push_str(text);
                    has_current = true;
                }
                WordPart::DoubleQuoted(inner) if is_quoted_at(inner) => {
                    for (index, param) in self.positional.clone().into_iter().enumerate() {
                        if index > 0 {
                            fields.push(std::mem::take(&mut current));
                        }
                        current.push_str(&param);
                        has_current = true;
                    }
                }
                WordPart::DoubleQuoted(inner) => {
                    let text = self.expand_parts(inner)?;
                    current.push_str(&text);
                    has_current = true;
                }
                _ => {
                    let text = self.expand_part(part)?;
                    if text.starts_with(char::is_whitespace) && has_current {
                        fields.push(std::mem::take(&mut current));
                        has_current = false;
                    }
                    let mut pieces = text.split_whitespace().peekable();
                    let produced = pieces.peek().is_some();
                    for (index, piece) in pieces.enumerate() {
                        if index > 0 {
                            fields.push(std::mem::take(&mut current));
                        }
                        current.push_str(piece);
                        has_current = true;
                    }
                    if produced && text.ends_with(char::is_whitespace) {
                        fields.push(std::mem::take(&mut current));
                        has_current = false;
                    }
                }
            }
        }

        if has_current {
            fields.push(current);
        }
        Ok(fields)
    }

    /// Value of a parameter, or `None` when unset.
    pub(super) fn param_value(&self, name: &str) -> Option<String> {
        match name {
            "?" => Some(self.last_status.to_string()),
            "#" => Some(self.positional.len().to_string()),
            "@" | "*" => Some(self.positional.join(" ")),
            "$" => Some(std::process::id().to_string()),
            "0" => Some(self.script_name.clone()),
            _ if name.bytes().all(|b| b.is_ascii_digit()) => {
                let index: usize = name.parse().ok()?;
                index
                    .checked_sub(1)
                    .and_then(|i| self.positional.get(i))
                    .cloned()
            }
            _ => self.var(name).map(str::to_string),
        }
    }

    fn expand_param(&mut self, param: &ParamExpansion) -> Result<String, RuntimeError> {
        let value = self.param_value(&param.name);

        let Some(op) = &param.op else {
            return Ok(value.unwrap_or_default());
        };

        match op {
            ParamOp::Length => Ok(value.map_or(0, |v| v.chars().count()).to_string()),
            ParamOp::Default { word, colon } => {
                if is_unset(&value, *colon) {
                    self.expand_word(word)
                } else {
                    Ok(value.unwrap_or_default())
                }
            }
            ParamOp::Assign { word, colon } => {
                if !is_unset(&value, *colon) {
                    return Ok(value.unwrap_or_default());
                }
                if !is_name(&param.name) {
                    return Err(RuntimeError::BadSubstitution(format!(
                        "${}: cannot assign in this way",
                        param.name
                    )));
                }
                let assigned = self.expand_word(word)?;
                self.set_var(&param.name, assigned.clone());
                Ok(assigned)
            }
            ParamOp::Alternative { word, colon } => {
                if is_unset(&value, *colon) {
                    Ok(String::new())
                } else {
                    self.expand_word(word)
                }
            }
        }
    }

    fn command_substitution(&mut self, source: &str) -> Result<String, RuntimeError> {
        let program = parser::parse(source, &self.script_name)
            .map_err(|e| RuntimeError::BadSubstitution(e.to_string()))?;

        let output = self.capture_output(&program.body)?;
        self.substitutions += 1;

        let mut text = String::from_utf8_lossy(&output).into_owned();
        while text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }

    fn arithmetic(&mut self, raw: &str) -> Result<String, RuntimeError> {
        let word = lexer::parse_word(raw, &self.script_name)
            .map_err(|e| RuntimeError::BadSubstitution(e.to_string()))?;
        let expr = self.expand_word(&word)?;
        let value = arith::evaluate(&expr, &|name: &str| self.param_value(name))?;
        Ok(value.to_string())
    }
}

/// True for the exact double-quoted form `"$@"`.
fn is_quoted_at(parts: &[WordPart]) -> bool {
    matches!(
        parts,
        [WordPart::Param(ParamExpansion { name, op: None })] if name == "@"
    )
}

fn is_unset(value: &Option<String>, colon: bool) -> bool {
    match value {
        None => true,
        Some(v) => colon && v.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;

    fn runner() -> Runner {
        let mut runner = Runner::new(&RunnerConfig {
            inherit_env: false,
            ..RunnerConfig::default()
        })
        .unwrap();
        runner.set_var("A", "alpha");
        runner.set_var("SPACED", "  one  two ");
        runner.set_var("EMPTY", "");
        runner
    }

    fn fields(runner: &mut Runner, text: &str) -> Vec<String> {
        let word = lexer::parse_word(text, "test").unwrap();
        runner.expand_fields(&word).unwrap()
    }

    #[test]
    fn test_literal_and_quoted() {
        let mut r = runner();
        assert_eq!(fields(&mut r, "plain"), vec!["plain"]);
        assert_eq!(fields(&mut r, "''"), vec![""]);
        assert_eq!(fields(&mut r, "\"\""), vec![""]);
    }

    #[test]
    fn test_unquoted_splitting() {
        let mut r = runner();
        assert_eq!(fields(&mut r, "$SPACED"), vec!["one", "two"]);
        assert_eq!(fields(&mut r, "x${SPACED}y"), vec!["x", "one", "two", "y"]);
        assert_eq!(fields(&mut r, "\"$SPACED\""), vec!["  one  two "]);
        assert!(fields(&mut r, "$EMPTY").is_empty());
        assert!(fields(&mut r, "$UNSET").is_empty());
        assert_eq!(fields(&mut r, "pre$A"), vec!["prealpha"]);
    }

    #[test]
    fn test_quoted_at() {
        let mut r = runner();
        r.set_positional(vec!["a b".into(), "c".into()]);
        assert_eq!(fields(&mut r, "\"$@\""), vec!["a b", "c"]);
        assert_eq!(fields(&mut r, "$@"), vec!["a", "b", "c"]);
        assert_eq!(fields(&mut r, "\"$*\""), vec!["a b c"]);

        r.set_positional(Vec::new());
        assert!(fields(&mut r, "\"$@\"").is_empty());
    }

    #[test]
    fn test_positional_lookup() {
        let mut r = runner();
        r.set_positional(vec!["first".into()]);
        assert_eq!(r.param_value("1").as_deref(), Some("first"));
        assert_eq!(r.param_value("2"), None);
        assert_eq!(r.param_value("00"), None);
        assert_eq!(r.param_value("#").as_deref(), Some("1"));
    }

    #[test]
    fn test_expand_word_keeps_spacing() {
        let mut r = runner();
        let word = lexer::parse_word("[$SPACED]", "test").unwrap();
        assert_eq!(r.expand_word(&word).unwrap(), "[  one  two ]");
    }

    #[test]
    fn test_assign_operator_requires_name() {
        let mut r = runner();
        let word = lexer::parse_word("${1:=x}", "test").unwrap();
        assert!(matches!(
            r.expand_word(&word),
            Err(RuntimeError::BadSubstitution(_))
        ));
    }

    #[test]
    fn test_arithmetic_errors_propagate() {
        let mut r = runner();
        let word = lexer::parse_word("$((1 / 0))", "test").unwrap();
        assert!(matches!(
            r.expand_word(&word),
            Err(RuntimeError::Arithmetic(_))
        ));
    }
}
