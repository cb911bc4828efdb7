//! Tokenizer for shell source text.

use super::ast::{ParamExpansion, ParamOp, Word, WordPart};
use super::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    Newline,
    /// `;`
    Semi,
    /// `&&`
    AndIf,
    /// `||`
    OrIf,
    /// `|`
    Pipe,
    LParen,
    RParen,
    /// `>`
    Great,
    /// `>>`
    DGreat,
    /// `<`
    Less,
    Eof,
}

/// A token with the position it starts at.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

/// Split `source` into tokens.
pub fn tokenize(source: &str, source_name: &str) -> Result<Vec<Spanned>, ParseError> {
    Lexer::new(source, source_name).tokenize()
}

/// Lex a free-standing piece of text as a single word.
///
/// Blanks and operators are ordinary characters here; only quotes,
/// backslashes and `$` are special. Used for `${name:-word}` operands and
/// for expanding arithmetic expressions.
pub fn parse_word(text: &str, source_name: &str) -> Result<Word, ParseError> {
    Lexer::new(text, source_name).scan_word(true)
}

/// Deepest nesting of `${...}` operands inside one another.
const MAX_PARAM_NESTING: usize = 64;

struct Lexer<'a> {
    source_name: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// How many `${...}` operands enclose this text.
    depth: usize,
}

fn is_word_break(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t' | '\r' | '\n' | ';' | '&' | '|' | '(' | ')' | '<' | '>'
    )
}

fn is_special_param(c: char) -> bool {
    matches!(c, '?' | '#' | '@' | '*' | '$') || c.is_ascii_digit()
}

fn flush_literal(literal: &mut String, parts: &mut Vec<WordPart>) {
    if !literal.is_empty() {
        parts.push(WordPart::Literal(std::mem::take(literal)));
    }
}

fn push_quoted(parts: &mut Vec<WordPart>, text: &str) {
    if let Some(WordPart::Quoted(existing)) = parts.last_mut() {
        existing.push_str(text);
    } else {
        parts.push(WordPart::Quoted(text.to_string()));
    }
}

impl<'a> Lexer<'a> {
    fn new(source: &str, source_name: &'a str) -> Self {
        Self {
            source_name,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error_at(&self, line: usize, column: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(self.source_name, line, column, message)
    }

    fn tokenize(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_blanks();
            let (line, column) = (self.line, self.column);

            let Some(c) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };

            let token = match c {
                '\n' => {
                    self.bump();
                    Token::Newline
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                    continue;
                }
                ';' => {
                    self.bump();
                    if self.peek() == Some(';') {
                        return Err(self.error_at(line, column, "unexpected ';;'"));
                    }
                    Token::Semi
                }
                '&' => {
                    self.bump();
                    if self.peek() != Some('&') {
                        return Err(self.error_at(
                            line,
                            column,
                            "background jobs ('&') are not supported",
                        ));
                    }
                    self.bump();
                    Token::AndIf
                }
                '|' => {
                    self.bump();
                    if self.peek() == Some('|') {
                        self.bump();
                        Token::OrIf
                    } else {
                        Token::Pipe
                    }
                }
                '(' => {
                    self.bump();
                    Token::LParen
                }
                ')' => {
                    self.bump();
                    Token::RParen
                }
                '>' => {
                    self.bump();
                    if self.peek() == Some('>') {
                        self.bump();
                        Token::DGreat
                    } else {
                        Token::Great
                    }
                }
                '<' => {
                    self.bump();
                    Token::Less
                }
                _ => Token::Word(self.scan_word(false)?),
            };

            tokens.push(Spanned {
                token,
                line,
                column,
            });
        }
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.bump();
                }
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    fn scan_word(&mut self, embedded: bool) -> Result<Word, ParseError> {
        let mut parts = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.peek() {
            if !embedded && is_word_break(c) {
                break;
            }
            match c {
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some('\n') => {}
                        Some(escaped) => {
                            flush_literal(&mut literal, &mut parts);
                            push_quoted(&mut parts, &escaped.to_string());
                        }
                        None => literal.push('\\'),
                    }
                }
                '\'' => {
                    flush_literal(&mut literal, &mut parts);
                    let text = self.scan_single_quoted()?;
                    push_quoted(&mut parts, &text);
                }
                '"' => {
                    flush_literal(&mut literal, &mut parts);
                    let inner = self.scan_double_quoted()?;
                    parts.push(WordPart::DoubleQuoted(inner));
                }
                '$' => match self.scan_dollar()? {
                    Some(part) => {
                        flush_literal(&mut literal, &mut parts);
                        parts.push(part);
                    }
                    None => literal.push('$'),
                },
                '`' => {
                    flush_literal(&mut literal, &mut parts);
                    let body = self.scan_backquote()?;
                    parts.push(WordPart::CommandSub(body));
                }
                _ => {
                    self.bump();
                    literal.push(c);
                }
            }
        }

        flush_literal(&mut literal, &mut parts);
        Ok(Word { parts })
    }

    fn scan_single_quoted(&mut self) -> Result<String, ParseError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\'') => return Ok(text),
                Some(c) => text.push(c),
                None => return Err(self.error_at(line, column, "unterminated single quote")),
            }
        }
    }

    fn scan_double_quoted(&mut self) -> Result<Vec<WordPart>, ParseError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut parts = Vec::new();
        let mut literal = String::new();

        loop {
            let Some(c) = self.peek() else {
                return Err(self.error_at(line, column, "unterminated double quote"));
            };
            match c {
                '"' => {
                    self.bump();
                    break;
                }
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some(escaped @ ('$' | '`' | '"' | '\\')) => literal.push(escaped),
                        Some('\n') => {}
                        Some(other) => {
                            literal.push('\\');
                            literal.push(other);
                        }
                        None => {
                            return Err(self.error_at(line, column, "unterminated double quote"))
                        }
                    }
                }
                '$' => match self.scan_dollar()? {
                    Some(part) => {
                        flush_literal(&mut literal, &mut parts);
                        parts.push(part);
                    }
                    None => literal.push('$'),
                },
                '`' => {
                    flush_literal(&mut literal, &mut parts);
                    let body = self.scan_backquote()?;
                    parts.push(WordPart::CommandSub(body));
                }
                _ => {
                    self.bump();
                    literal.push(c);
                }
            }
        }

        flush_literal(&mut literal, &mut parts);
        Ok(parts)
    }

    /// Scan an expansion starting at `$`. Returns `None` for a lone `$`.
    fn scan_dollar(&mut self) -> Result<Option<WordPart>, ParseError> {
        let (line, column) = (self.line, self.column);
        self.bump();

        match self.peek() {
            Some('{') => {
                self.bump();
                let inner = self.scan_balanced('{', '}', line, column, "parameter expansion")?;
                self.parse_braced_param(&inner, line, column).map(Some)
            }
            Some('(') if self.peek_at(1) == Some('(') => {
                self.bump();
                self.bump();
                let expr = self.scan_arithmetic(line, column)?;
                Ok(Some(WordPart::Arithmetic(expr)))
            }
            Some('(') => {
                self.bump();
                let body = self.scan_balanced('(', ')', line, column, "command substitution")?;
                Ok(Some(WordPart::CommandSub(body)))
            }
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(c) = self.peek().filter(|c| *c == '_' || c.is_ascii_alphanumeric()) {
                    name.push(c);
                    self.bump();
                }
                Ok(Some(WordPart::Param(ParamExpansion { name, op: None })))
            }
            Some(c) if is_special_param(c) => {
                self.bump();
                Ok(Some(WordPart::Param(ParamExpansion {
                    name: c.to_string(),
                    op: None,
                })))
            }
            _ => Ok(None),
        }
    }

    /// Collect raw text up to the `close` that balances an already consumed `open`.
    fn scan_balanced(
        &mut self,
        open: char,
        close: char,
        line: usize,
        column: usize,
        what: &str,
    ) -> Result<String, ParseError> {
        let mut depth = 1usize;
        let mut text = String::new();

        loop {
            let Some(c) = self.bump() else {
                return Err(self.error_at(line, column, format!("unterminated {what}")));
            };
            match c {
                '\\' => {
                    text.push(c);
                    if let Some(next) = self.bump() {
                        text.push(next);
                    }
                }
                '\'' | '"' => {
                    text.push(c);
                    loop {
                        let Some(q) = self.bump() else {
                            return Err(self.error_at(line, column, format!("unterminated {what}")));
                        };
                        text.push(q);
                        if q == '\\' && c == '"' {
                            if let Some(next) = self.bump() {
                                text.push(next);
                            }
                        } else if q == c {
                            break;
                        }
                    }
                }
                _ if c == open => {
                    depth += 1;
                    text.push(c);
                }
                _ if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(text);
                    }
                    text.push(c);
                }
                _ => text.push(c),
            }
        }
    }

    fn scan_arithmetic(&mut self, line: usize, column: usize) -> Result<String, ParseError> {
        let mut depth = 0usize;
        let mut text = String::new();

        loop {
            match self.bump() {
                None => {
                    return Err(self.error_at(line, column, "unterminated arithmetic expansion"))
                }
                Some('(') => {
                    depth += 1;
                    text.push('(');
                }
                Some(')') if depth > 0 => {
                    depth -= 1;
                    text.push(')');
                }
                Some(')') => {
                    if self.bump() != Some(')') {
                        return Err(self.error_at(line, column, "expected '))' to close '$(('"));
                    }
                    return Ok(text);
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn scan_backquote(&mut self) -> Result<String, ParseError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut text = String::new();

        loop {
            match self.bump() {
                Some('`') => return Ok(text),
                Some('\\') => match self.bump() {
                    Some(escaped @ ('`' | '\\' | '$')) => text.push(escaped),
                    Some(other) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => break,
                },
                Some(c) => text.push(c),
                None => break,
            }
        }

        Err(self.error_at(line, column, "unterminated backquote"))
    }

    fn parse_braced_param(
        &self,
        inner: &str,
        line: usize,
        column: usize,
    ) -> Result<WordPart, ParseError> {
        let bad = || self.error_at(line, column, format!("bad substitution: ${{{inner}}}"));

        if let Some(name) = inner.strip_prefix('#').filter(|n| !n.is_empty()) {
            if !is_param_name(name) {
                return Err(bad());
            }
            return Ok(WordPart::Param(ParamExpansion {
                name: name.to_string(),
                op: Some(ParamOp::Length),
            }));
        }

        let name_len = match inner.chars().next() {
            Some(c) if c.is_ascii_digit() => inner.chars().take_while(|c| c.is_ascii_digit()).count(),
            Some(c) if is_special_param(c) => 1,
            Some(c) if c == '_' || c.is_ascii_alphabetic() => inner
                .chars()
                .take_while(|c| *c == '_' || c.is_ascii_alphanumeric())
                .count(),
            _ => return Err(bad()),
        };
        let (name, rest) = inner.split_at(name_len);

        if rest.is_empty() {
            return Ok(WordPart::Param(ParamExpansion {
                name: name.to_string(),
                op: None,
            }));
        }

        let (colon, rest) = match rest.strip_prefix(':') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let mut chars = rest.chars();
        let op_char = chars.next().ok_or_else(bad)?;
        if self.depth >= MAX_PARAM_NESTING {
            return Err(self.error_at(line, column, "parameter expansions nested too deeply"));
        }
        let mut operand = Lexer::new(chars.as_str(), self.source_name);
        operand.depth = self.depth + 1;
        let word = operand
            .scan_word(true)
            .map_err(|e| self.error_at(line, column, e.message))?;

        let op = match op_char {
            '-' => ParamOp::Default { word, colon },
            '=' => ParamOp::Assign { word, colon },
            '+' => ParamOp::Alternative { word, colon },
            _ => return Err(bad()),
        };

        Ok(WordPart::Param(ParamExpansion {
            name: name.to_string(),
            op: Some(op),
        }))
    }
}

fn is_param_name(name: &str) -> bool {
    super::ast::is_name(name)
        || name.chars().all(|c| c.is_ascii_digit())
        || (name.len() == 1 && name.chars().all(is_special_param))
}
