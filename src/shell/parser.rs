//! Recursive-descent parser from tokens to a [`Program`].

use std::sync::Arc;

use super::ast::{
    is_name, AndOr, Assignment, Command, CompoundCommand, Connector, List, Pipeline, Program,
    Redirect, RedirectKind, SimpleCommand, Word, WordPart,
};
use super::error::ParseError;
use super::lexer::{self, Spanned, Token};

/// Keywords that close a construct and can never start a command.
const CLOSING_KEYWORDS: &[&str] = &["then", "elif", "else", "fi", "do", "done", "}"];

/// Deepest nesting of commands inside compound commands.
const MAX_NESTING: usize = 128;

/// Parse a complete script.
pub fn parse(source: &str, source_name: &str) -> Result<Program, ParseError> {
    let tokens = lexer::tokenize(source, source_name)?;
    let mut parser = Parser {
        source_name,
        tokens,
        pos: 0,
        depth: 0,
    };

    let body = parser.parse_list(&[])?;
    if *parser.peek() != Token::Eof {
        return Err(parser.unexpected());
    }

    Ok(Program {
        source_name: source_name.to_string(),
        body,
    })
}

struct Parser<'a> {
    source_name: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(word) => match word.as_literal() {
            Some(text) => format!("'{text}'"),
            None => "word".to_string(),
        },
        Token::Newline => "newline".to_string(),
        Token::Semi => "';'".to_string(),
        Token::AndIf => "'&&'".to_string(),
        Token::OrIf => "'||'".to_string(),
        Token::Pipe => "'|'".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Great => "'>'".to_string(),
        Token::DGreat => "'>>'".to_string(),
        Token::Less => "'<'".to_string(),
        Token::Eof => "end of file".to_string(),
    }
}

fn split_assignment(word: &Word) -> Option<Assignment> {
    let Some(WordPart::Literal(text)) = word.parts.first() else {
        return None;
    };
    let eq = text.find('=')?;
    let name = &text[..eq];
    if !is_name(name) {
        return None;
    }

    let mut parts = Vec::with_capacity(word.parts.len());
    if eq + 1 < text.len() {
        parts.push(WordPart::Literal(text[eq + 1..].to_string()));
    }
    parts.extend(word.parts[1..].iter().cloned());

    Some(Assignment {
        name: name.to_string(),
        value: Word { parts },
    })
}

impl<'a> Parser<'a> {
    fn current(&self) -> &Spanned {
        &self.tokens[self.pos]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_keyword(&self) -> Option<&str> {
        match self.peek() {
            Token::Word(word) => word.as_literal(),
            _ => None,
        }
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn take_word(&mut self) -> Option<Word> {
        match self.peek() {
            Token::Word(word) => {
                let word = word.clone();
                self.advance();
                Some(word)
            }
            _ => None,
        }
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == Token::Newline {
            self.advance();
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let current = self.current();
        ParseError::new(self.source_name, current.line, current.column, message)
    }

    fn unexpected(&self) -> ParseError {
        self.error(format!("unexpected {}", describe(self.peek())))
    }

    fn missing(&self, keyword: &str, opener: &str, line: usize) -> ParseError {
        self.error(format!(
            "expected '{keyword}' to close '{opener}' from line {line}, found {}",
            describe(self.peek())
        ))
    }

    fn expect_keyword(&mut self, keyword: &str, opener: &str, line: usize) -> Result<(), ParseError> {
        if self.peek_keyword() == Some(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.missing(keyword, opener, line))
        }
    }

    fn non_empty(&self, list: List, what: &str) -> Result<List, ParseError> {
        if list.is_empty() {
            Err(self.error(format!("expected a command in {what}, found {}", describe(self.peek()))))
        } else {
            Ok(list)
        }
    }

    fn at_list_end(&self, terminators: &[&str]) -> bool {
        match self.peek() {
            Token::Eof => true,
            Token::RParen => terminators.contains(&")"),
            Token::Word(word) => word.as_literal().is_some_and(|text| {
                terminators.contains(&text) || CLOSING_KEYWORDS.contains(&text)
            }),
            _ => false,
        }
    }

    fn parse_list(&mut self, terminators: &[&str]) -> Result<List, ParseError> {
        let mut list = Vec::new();

        loop {
            self.skip_newlines();
            if self.at_list_end(terminators) {
                break;
            }
            list.push(self.parse_and_or()?);
            match self.peek() {
                Token::Semi | Token::Newline => self.advance(),
                _ => break,
            }
        }

        Ok(list)
    }

    fn parse_and_or(&mut self) -> Result<AndOr, ParseError> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();

        loop {
            let connector = match self.peek() {
                Token::AndIf => Connector::And,
                Token::OrIf => Connector::Or,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            rest.push((connector, self.parse_pipeline()?));
        }

        Ok(AndOr { first, rest })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let negated = self.peek_keyword() == Some("!");
        if negated {
            self.advance();
        }

        let mut commands = vec![self.parse_command()?];
        while *self.peek() == Token::Pipe {
            self.advance();
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }

        Ok(Pipeline { negated, commands })
    }

    fn parse_command(&mut self) -> Result<Command, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "commands nested too deeply (limit {MAX_NESTING})"
            )));
        }
        self.depth += 1;
        let command = self.parse_command_body();
        self.depth -= 1;
        command
    }

    fn parse_command_body(&mut self) -> Result<Command, ParseError> {
        let line = self.current().line;

        if *self.peek() == Token::LParen {
            self.advance();
            let body = self.parse_list(&[")"])?;
            let body = self.non_empty(body, "subshell")?;
            if *self.peek() != Token::RParen {
                return Err(self.missing(")", "(", line));
            }
            self.advance();
            return self.finish_compound(CompoundCommand::Subshell(body));
        }

        let keyword = self.peek_keyword().map(str::to_owned);
        match keyword.as_deref() {
            Some("if") => {
                let compound = self.parse_if()?;
                self.finish_compound(compound)
            }
            Some(kw @ ("while" | "until")) => {
                let until = kw == "until";
                let compound = self.parse_while(until)?;
                self.finish_compound(compound)
            }
            Some("for") => {
                let compound = self.parse_for()?;
                self.finish_compound(compound)
            }
            Some("{") => {
                self.advance();
                let body = self.parse_list(&["}"])?;
                let body = self.non_empty(body, "'{ }' group")?;
                self.expect_keyword("}", "{", line)?;
                self.finish_compound(CompoundCommand::BraceGroup(body))
            }
            Some(kw) if CLOSING_KEYWORDS.contains(&kw) => Err(self.unexpected()),
            Some(name)
                if is_name(name)
                    && self
                        .tokens
                        .get(self.pos + 1)
                        .is_some_and(|next| next.token == Token::LParen) =>
            {
                let name = name.to_string();
                self.parse_function(name)
            }
            _ => self.parse_simple(),
        }
    }

    fn finish_compound(&mut self, compound: CompoundCommand) -> Result<Command, ParseError> {
        let mut redirects = Vec::new();
        while let Some(redirect) = self.parse_redirect()? {
            redirects.push(redirect);
        }
        Ok(Command::Compound(compound, redirects))
    }

    fn parse_function(&mut self, name: String) -> Result<Command, ParseError> {
        // name ( )
        self.advance();
        self.advance();
        if *self.peek() != Token::RParen {
            return Err(self.error(format!(
                "expected ')' in definition of '{name}', found {}",
                describe(self.peek())
            )));
        }
        self.advance();
        self.skip_newlines();

        let starts_compound = *self.peek() == Token::LParen
            || matches!(
                self.peek_keyword(),
                Some("{" | "if" | "while" | "until" | "for")
            );
        if !starts_compound {
            return Err(self.error(format!(
                "expected function body for '{name}', found {}",
                describe(self.peek())
            )));
        }

        match self.parse_command()? {
            Command::Compound(body, redirects) if redirects.is_empty() => Ok(Command::FunctionDef {
                name,
                body: Arc::new(body),
            }),
            _ => Err(self.error(format!(
                "redirections on the definition of '{name}' are not supported"
            ))),
        }
    }

    fn parse_if(&mut self) -> Result<CompoundCommand, ParseError> {
        let line = self.current().line;
        self.advance();

        let mut branches = Vec::new();
        let mut else_branch = None;

        let condition = self.parse_list(&["then"])?;
        let condition = self.non_empty(condition, "'if' condition")?;
        self.expect_keyword("then", "if", line)?;
        let body = self.parse_list(&["elif", "else", "fi"])?;
        let body = self.non_empty(body, "'then' body")?;
        branches.push((condition, body));

        loop {
            match self.peek_keyword() {
                Some("elif") => {
                    self.advance();
                    let condition = self.parse_list(&["then"])?;
                    let condition = self.non_empty(condition, "'elif' condition")?;
                    self.expect_keyword("then", "elif", line)?;
                    let body = self.parse_list(&["elif", "else", "fi"])?;
                    let body = self.non_empty(body, "'then' body")?;
                    branches.push((condition, body));
                }
                Some("else") => {
                    self.advance();
                    let body = self.parse_list(&["fi"])?;
                    else_branch = Some(self.non_empty(body, "'else' body")?);
                    self.expect_keyword("fi", "if", line)?;
                    break;
                }
                Some("fi") => {
                    self.advance();
                    break;
                }
                _ => return Err(self.missing("fi", "if", line)),
            }
        }

        Ok(CompoundCommand::If {
            branches,
            else_branch,
        })
    }

    fn parse_while(&mut self, until: bool) -> Result<CompoundCommand, ParseError> {
        let line = self.current().line;
        let opener = if until { "until" } else { "while" };
        self.advance();

        let condition = self.parse_list(&["do"])?;
        let condition = self.non_empty(condition, "loop condition")?;
        self.expect_keyword("do", opener, line)?;
        let body = self.parse_list(&["done"])?;
        let body = self.non_empty(body, "loop body")?;
        self.expect_keyword("done", opener, line)?;

        Ok(CompoundCommand::While {
            condition,
            body,
            until,
        })
    }

    fn parse_for(&mut self) -> Result<CompoundCommand, ParseError> {
        let line = self.current().line;
        self.advance();

        let var = match self.take_word() {
            Some(word) if word.as_literal().is_some_and(is_name) => {
                word.as_literal().unwrap_or_default().to_string()
            }
            _ => return Err(self.error("expected a variable name after 'for'")),
        };

        self.skip_newlines();
        let items = if self.peek_keyword() == Some("in") {
            self.advance();
            let mut words = Vec::new();
            while let Some(word) = self.take_word() {
                words.push(word);
            }
            if matches!(self.peek(), Token::Semi | Token::Newline) {
                self.advance();
            }
            Some(words)
        } else {
            if *self.peek() == Token::Semi {
                self.advance();
            }
            None
        };

        self.skip_newlines();
        self.expect_keyword("do", "for", line)?;
        let body = self.parse_list(&["done"])?;
        let body = self.non_empty(body, "loop body")?;
        self.expect_keyword("done", "for", line)?;

        Ok(CompoundCommand::For { var, items, body })
    }

    fn parse_redirect(&mut self) -> Result<Option<Redirect>, ParseError> {
        let kind = match self.peek() {
            Token::Great => RedirectKind::Output,
            Token::DGreat => RedirectKind::Append,
            Token::Less => RedirectKind::Input,
            _ => return Ok(None),
        };
        let operator = describe(self.peek());
        self.advance();

        match self.take_word() {
            Some(target) => Ok(Some(Redirect { kind, target })),
            None => Err(self.error(format!(
                "expected a file name after {operator}, found {}",
                describe(self.peek())
            ))),
        }
    }

    fn parse_simple(&mut self) -> Result<Command, ParseError> {
        let line = self.current().line;
        let mut command = SimpleCommand {
            assignments: Vec::new(),
            words: Vec::new(),
            redirects: Vec::new(),
            line,
        };

        loop {
            if let Some(word) = self.take_word() {
                if command.words.is_empty() {
                    if let Some(assignment) = split_assignment(&word) {
                        command.assignments.push(assignment);
                        continue;
                    }
                }
                command.words.push(word);
            } else if let Some(redirect) = self.parse_redirect()? {
                command.redirects.push(redirect);
            } else {
                break;
            }
        }

        if command.assignments.is_empty() && command.words.is_empty() && command.redirects.is_empty()
        {
            return Err(self.unexpected());
        }

        Ok(Command::Simple(command))
    }
}
