//! Recursive-descent parser turning the token stream into an [`ast::Program`].
//!
//! The grammar is small enough that a hand-written descent over the
//! significant tokens reads better than a combinator stack; the lexical work is
//! already done by the nom-based [`tokenizer`](crate::tokenizer).

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::{
    ast::{Block, Expression, Literal, Position, Program, Statement, SwitchCase},
    tokenizer::{self, Delimiter, Keyword, Token, TokenSpan, Tokenizer, TokenizerError},
};

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Tokenize(#[from] TokenizerError),
    #[error("{position}: expected {expected}, found {found}")]
    Unexpected {
        expected: String,
        found: String,
        position: Position,
    },
    #[error("{file}: unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String, file: String },
    #[error("{position}: {message}")]
    Invalid { message: String, position: Position },
}

/// Parses a complete source file.
#[instrument(level = "debug", skip(source))]
pub fn parse_program(source: &str, file: &str) -> ParseResult<Program> {
    let tokens = Tokenizer::new().tokenize(source)?;
    let mut parser = Parser::new(tokens, file);
    let statements = parser.parse_statements()?;
    if let Some(span) = parser.peek_span() {
        return Err(parser.unexpected_at(span, "end of input"));
    }
    Ok(Program {
        file: file.to_string(),
        body: Arc::new(Block::new(statements)),
    })
}

struct Parser {
    tokens: Vec<TokenSpan>,
    cursor: usize,
    file: String,
}

impl Parser {
    fn new(tokens: Vec<TokenSpan>, file: &str) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .filter(|span| !span.token.is_trivia())
                .collect(),
            cursor: 0,
            file: file.to_string(),
        }
    }

    fn peek_span(&self) -> Option<&TokenSpan> {
        self.tokens.get(self.cursor)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_span().map(|span| &span.token)
    }

    fn advance(&mut self) -> Option<TokenSpan> {
        let span = self.tokens.get(self.cursor).cloned();
        if span.is_some() {
            self.cursor += 1;
        }
        span
    }

    fn position_of(&self, span: &TokenSpan) -> Position {
        Position::new(self.file.clone(), span.line, span.column)
    }

    fn unexpected_at(&self, span: &TokenSpan, expected: &str) -> ParseError {
        ParseError::Unexpected {
            expected: expected.to_string(),
            found: describe(&span.token),
            position: self.position_of(span),
        }
    }

    fn error_here(&self, expected: &str) -> ParseError {
        match self.peek_span() {
            Some(span) => self.unexpected_at(span, expected),
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
                file: self.file.clone(),
            },
        }
    }

    fn at_delimiter(&self, delimiter: Delimiter) -> bool {
        matches!(self.peek(), Some(Token::Delimiter(d)) if *d == delimiter)
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Some(Token::Keyword(k)) if *k == keyword)
    }

    fn expect_delimiter(&mut self, delimiter: Delimiter) -> ParseResult<()> {
        if self.at_delimiter(delimiter) {
            self.cursor += 1;
            Ok(())
        } else {
            Err(self.error_here(&format!("'{}'", delimiter)))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<()> {
        if self.at_keyword(keyword) {
            self.cursor += 1;
            Ok(())
        } else {
            Err(self.error_here(&format!("'{}'", keyword)))
        }
    }

    /// Statements up to a closing brace or the end of input.
    fn parse_statements(&mut self) -> ParseResult<Vec<Statement>> {
        let mut statements = Vec::new();
        while let Some(span) = self.peek_span() {
            if span.token == Token::Delimiter(Delimiter::CloseBrace) {
                break;
            }
            let position = self.position_of(span);
            let expression = self.parse_expression()?;
            statements.push(Statement {
                expression,
                position,
            });
        }
        Ok(statements)
    }

    fn parse_block(&mut self) -> ParseResult<Arc<Block>> {
        self.expect_delimiter(Delimiter::OpenBrace)?;
        let statements = self.parse_statements()?;
        self.expect_delimiter(Delimiter::CloseBrace)?;
        Ok(Arc::new(Block::new(statements)))
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        let Some(span) = self.peek_span().cloned() else {
            return Err(self.error_here("an expression"));
        };
        match &span.token {
            Token::Keyword(Keyword::If) => self.parse_if(),
            Token::Keyword(Keyword::While) => self.parse_while(),
            Token::Keyword(Keyword::Switch) => self.parse_switch(),
            Token::Keyword(Keyword::Func) => self.parse_function(),
            Token::Identifier(name) => {
                self.cursor += 1;
                if self.at_delimiter(Delimiter::OpenParen) {
                    self.parse_call(name.clone())
                } else {
                    Ok(Expression::Identifier(name.clone()))
                }
            }
            Token::Literal(literal) => {
                self.cursor += 1;
                Ok(Expression::Literal(convert_literal(literal.clone())))
            }
            Token::Delimiter(Delimiter::OpenBracket) => self.parse_array(),
            _ => Err(self.unexpected_at(&span, "an expression")),
        }
    }

    /// `name(args...) { block }?`, the name already consumed.
    fn parse_call(&mut self, name: String) -> ParseResult<Expression> {
        let mut arguments = self.parse_list(Delimiter::OpenParen, Delimiter::CloseParen)?;
        if self.at_delimiter(Delimiter::OpenBrace) {
            arguments.push(Expression::Block(self.parse_block()?));
        }
        Ok(Expression::Call { name, arguments })
    }

    fn parse_array(&mut self) -> ParseResult<Expression> {
        let elements = self.parse_list(Delimiter::OpenBracket, Delimiter::CloseBracket)?;
        Ok(Expression::Array(elements))
    }

    /// Comma-separated expressions; commas are optional separators.
    fn parse_list(&mut self, open: Delimiter, close: Delimiter) -> ParseResult<Vec<Expression>> {
        self.expect_delimiter(open)?;
        let mut items = Vec::new();
        loop {
            if self.at_delimiter(close) {
                self.cursor += 1;
                return Ok(items);
            }
            if self.peek().is_none() {
                return Err(self.error_here(&format!("'{}'", close)));
            }
            items.push(self.parse_expression()?);
            if self.at_delimiter(Delimiter::Comma) {
                self.cursor += 1;
            }
        }
    }

    fn parse_condition(&mut self) -> ParseResult<Expression> {
        self.expect_delimiter(Delimiter::OpenParen)?;
        let condition = self.parse_expression()?;
        self.expect_delimiter(Delimiter::CloseParen)?;
        Ok(condition)
    }

    fn parse_if(&mut self) -> ParseResult<Expression> {
        self.expect_keyword(Keyword::If)?;
        let condition = self.parse_condition()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.at_keyword(Keyword::Else) {
            self.cursor += 1;
            if self.at_keyword(Keyword::If) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(Expression::Block(self.parse_block()?)))
            }
        } else {
            None
        };
        Ok(Expression::If {
            condition: Box::new(condition),
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Expression> {
        self.expect_keyword(Keyword::While)?;
        let condition = self.parse_condition()?;
        let body = self.parse_block()?;
        Ok(Expression::While {
            condition: Box::new(condition),
            body,
        })
    }

    fn parse_switch(&mut self) -> ParseResult<Expression> {
        let start = self.peek_span().cloned();
        self.expect_keyword(Keyword::Switch)?;
        self.expect_delimiter(Delimiter::OpenParen)?;
        let subject = if self.at_delimiter(Delimiter::CloseParen) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect_delimiter(Delimiter::CloseParen)?;
        self.expect_delimiter(Delimiter::OpenBrace)?;

        let mut cases = Vec::new();
        let mut default = None;
        while !self.at_delimiter(Delimiter::CloseBrace) {
            match self.peek_span().cloned() {
                Some(TokenSpan {
                    token: Token::Keyword(Keyword::Case),
                    ..
                }) => {
                    self.cursor += 1;
                    let condition = self.parse_condition()?;
                    let body = self.parse_block()?;
                    cases.push(SwitchCase { condition, body });
                }
                Some(span @ TokenSpan {
                    token: Token::Keyword(Keyword::Default),
                    ..
                }) => {
                    if default.is_some() {
                        return Err(ParseError::Invalid {
                            message: "multiple default cases in switch".to_string(),
                            position: self.position_of(&span),
                        });
                    }
                    self.cursor += 1;
                    self.expect_delimiter(Delimiter::OpenParen)?;
                    self.expect_delimiter(Delimiter::CloseParen)?;
                    default = Some(self.parse_block()?);
                }
                _ => return Err(self.error_here("'case' or 'default'")),
            }
        }
        self.expect_delimiter(Delimiter::CloseBrace)?;

        if cases.is_empty() && default.is_none() {
            let position = start
                .map(|span| self.position_of(&span))
                .unwrap_or_else(|| Position::new(self.file.clone(), 0, 0));
            return Err(ParseError::Invalid {
                message: "switch must contain at least one case or default".to_string(),
                position,
            });
        }

        Ok(Expression::Switch {
            subject,
            cases,
            default,
        })
    }

    fn parse_function(&mut self) -> ParseResult<Expression> {
        self.expect_keyword(Keyword::Func)?;
        self.expect_delimiter(Delimiter::OpenParen)?;
        let mut parameters = Vec::new();
        while !self.at_delimiter(Delimiter::CloseParen) {
            match self.advance() {
                Some(TokenSpan {
                    token: Token::Identifier(name),
                    ..
                }) => parameters.push(name),
                Some(span) => return Err(self.unexpected_at(&span, "a parameter name")),
                None => return Err(self.error_here("')'")),
            }
            if self.at_delimiter(Delimiter::Comma) {
                self.cursor += 1;
            }
        }
        self.expect_delimiter(Delimiter::CloseParen)?;
        let body = self.parse_block()?;
        Ok(Expression::Function { parameters, body })
    }
}

fn convert_literal(literal: tokenizer::Literal) -> Literal {
    match literal {
        tokenizer::Literal::Str(s) => Literal::Str(s),
        tokenizer::Literal::Number(n) => Literal::Number(n),
        tokenizer::Literal::Boolean(b) => Literal::Boolean(b),
        tokenizer::Literal::Null => Literal::Null,
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Keyword(k) => format!("keyword '{}'", k),
        Token::Identifier(name) => format!("identifier '{}'", name),
        Token::Literal(l) => format!("literal {:?}", l),
        Token::Delimiter(d) => format!("'{}'", d),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Program {
        parse_program(source, "main.ch").unwrap()
    }

    fn string(s: &str) -> Expression {
        Expression::Literal(Literal::Str(s.to_string()))
    }

    #[test]
    fn test_statements_carry_positions() {
        let program = parse("logPrint(\"a\"); logPrint(\"b\")\n  declare(x, 'N', 5)");
        let positions: Vec<_> = program
            .body
            .statements
            .iter()
            .map(|s| (s.position.line, s.position.column))
            .collect();
        assert_eq!(positions, vec![(1, 1), (1, 16), (2, 3)]);
        assert_eq!(program.body.statements[0].position.file, "main.ch");
        assert_eq!(
            program.body.statements[0].expression,
            Expression::call("logPrint", vec![string("a")])
        );
    }

    #[test]
    fn test_call_with_trailing_block() {
        let program = parse("each(items) { logPrint('x') }");
        let Expression::Call { name, arguments } = &program.body.statements[0].expression else {
            panic!("expected call");
        };
        assert_eq!(name, "each");
        assert_eq!(arguments.len(), 2);
        assert!(matches!(arguments[1], Expression::Block(ref b) if b.statements.len() == 1));
    }

    #[test]
    fn test_if_else_if_else() {
        let program = parse(
            "if (bigger(x, 1)) { a() } else if (equal(x, 1)) { b() } else { c() }",
        );
        let Expression::If { else_branch, .. } = &program.body.statements[0].expression else {
            panic!("expected if");
        };
        let nested = else_branch.as_deref().unwrap();
        let Expression::If { else_branch, .. } = nested else {
            panic!("expected else-if");
        };
        assert!(matches!(else_branch.as_deref(), Some(Expression::Block(_))));
    }

    #[test]
    fn test_switch_with_default() {
        let program = parse("switch(x) { case(1) { a() } case(2) { b() } default() { c() } }");
        let Expression::Switch {
            subject,
            cases,
            default,
        } = &program.body.statements[0].expression
        else {
            panic!("expected switch");
        };
        assert!(subject.is_some());
        assert_eq!(cases.len(), 2);
        assert!(default.is_some());
    }

    #[test]
    fn test_switch_rejects_two_defaults() {
        let err = parse_program("switch() { default() {} default() {} }", "main.ch").unwrap_err();
        assert!(matches!(err, ParseError::Invalid { .. }));
    }

    #[test]
    fn test_function_literal() {
        let program = parse("setq(f, func(a, b) { add(a, b) })");
        let Expression::Call { arguments, .. } = &program.body.statements[0].expression else {
            panic!("expected call");
        };
        let Expression::Function { parameters, body } = &arguments[1] else {
            panic!("expected func");
        };
        assert_eq!(parameters, &vec!["a".to_string(), "b".to_string()]);
        assert_eq!(body.statements[0].position.line, 1);
    }

    #[test]
    fn test_nested_arrays_and_literals() {
        let program = parse("[1, 'two', [true, null]]");
        assert_eq!(
            program.body.statements[0].expression,
            Expression::Array(vec![
                Expression::Literal(Literal::Number(1.0)),
                string("two"),
                Expression::Array(vec![
                    Expression::Literal(Literal::Boolean(true)),
                    Expression::Literal(Literal::Null),
                ]),
            ])
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_program("logPrint('a'", "main.ch"),
            Err(ParseError::UnexpectedEof { .. })
        ));
        assert!(matches!(
            parse_program("while (x) }", "main.ch"),
            Err(ParseError::Unexpected { .. })
        ));
        assert!(matches!(
            parse_program("}", "main.ch"),
            Err(ParseError::Unexpected { .. })
        ));
    }
}
