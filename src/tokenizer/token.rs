use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::anychar,
    combinator::{map, recognize},
    error::{VerboseError, context},
    sequence::pair,
};
use thiserror::Error;

use super::{
    comment::parse_comment,
    keyword::Keyword,
    literal::{Literal, parse_literal, word_literal},
    symbol::{Delimiter, parse_delimiter},
    whitespace::{parse_newline, parse_whitespace},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Keyword(Keyword),
    Identifier(String),
    Literal(Literal),
    Delimiter(Delimiter),
    // Trivia
    Whitespace(String),
    Newline,
    Comment {
        content: String,
        comment_type: CommentType,
    },
    /// A character outside the grammar, e.g. `;`.
    Unknown(char),
}

impl Token {
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            Token::Whitespace(_) | Token::Newline | Token::Comment { .. } | Token::Unknown(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentType {
    Line,  // //
    Block, // /* */
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    current_position: usize,
    current_line: usize,
    current_column: usize,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            current_position: 0,
            current_line: 1,   // 1-based
            current_column: 1, // 1-based
        }
    }

    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn tokenize(&mut self, input: &str) -> TokenizerResult<Vec<TokenSpan>> {
        let mut tokens = Vec::new();
        let mut remaining = input;

        while !remaining.is_empty() {
            let start_position = self.current_position;
            let start_line = self.current_line;
            let start_column = self.current_column;

            let result = alt((
                parse_whitespace,
                parse_newline,
                parse_comment,
                parse_literal,
                parse_delimiter,
                parse_identifier,
                parse_unknown,
            ))(remaining);

            match result {
                Ok((new_remaining, token)) => {
                    let consumed = &remaining[..(remaining.len() - new_remaining.len())];
                    self.update_position(consumed);

                    tokens.push(TokenSpan {
                        token,
                        start: start_position,
                        end: self.current_position,
                        line: start_line,
                        column: start_column,
                    });

                    remaining = new_remaining;
                }
                Err(e) => {
                    let found = remaining.chars().take(20).collect::<String>();
                    let span = Span {
                        start: self.current_position,
                        end: self.current_position + 1,
                        line: self.current_line,
                        column: self.current_column,
                    };
                    let error = match e {
                        nom::Err::Incomplete(e) => TokenizerError::ParseError {
                            message: format!("Incomplete input, {:?}", e),
                            found,
                            span,
                        },
                        nom::Err::Error(e) | nom::Err::Failure(e) => TokenizerError::ParseError {
                            message: nom::error::convert_error(remaining, e),
                            found,
                            span,
                        },
                    };
                    tracing::debug!("{}", error);
                    return Err(error);
                }
            }
        }

        Ok(tokens)
    }

    fn update_position(&mut self, text: &str) {
        for c in text.chars() {
            self.current_position += c.len_utf8();
            if c == '\n' {
                self.current_line += 1;
                self.current_column = 1;
            } else {
                self.current_column += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenSpan {
    pub token: Token,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[tracing::instrument(level = "trace", skip(input))]
fn parse_identifier(input: &str) -> ParserResult<Token> {
    let (input, id) = context(
        "identifier",
        recognize(pair(
            take_while1(|c: char| c.is_alphabetic() || c == '_'),
            take_while(|c: char| c.is_alphanumeric() || c == '_'),
        )),
    )(input)?;

    if let Ok(kw) = Keyword::try_from(id) {
        return Ok((input, Token::Keyword(kw)));
    }
    if let Some(literal) = word_literal(id) {
        return Ok((input, Token::Literal(literal)));
    }

    Ok((input, Token::Identifier(id.to_string())))
}

#[tracing::instrument(level = "trace", skip(input))]
fn parse_unknown(input: &str) -> ParserResult<Token> {
    context("unknown character", map(anychar, Token::Unknown))(input)
}

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

pub type TokenizerResult<T> = Result<T, TokenizerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenizerError {
    #[error("Tokenize error: {message} at {span}")]
    ParseError {
        message: String,
        found: String,
        span: Span,
    },
}

impl TokenizerError {
    pub fn span(&self) -> &Span {
        match self {
            TokenizerError::ParseError { span, .. } => span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn significant(input: &str) -> Vec<Token> {
        Tokenizer::new()
            .tokenize(input)
            .unwrap()
            .into_iter()
            .map(|span| span.token)
            .filter(|token| !token.is_trivia())
            .collect()
    }

    #[test]
    fn test_identifier_for_keyword() {
        let (rest, token) = parse_identifier("while(").unwrap();
        assert_eq!(token, Token::Keyword(Keyword::While));
        assert_eq!(rest, "(");
    }

    #[test]
    fn test_identifier() {
        let (rest, token) = parse_identifier("my_var123 other").unwrap();
        assert_eq!(token, Token::Identifier("my_var123".to_string()));
        assert_eq!(rest, " other");
    }

    #[test]
    fn test_tokenizer_with_position() {
        let tokens = Tokenizer::new().tokenize("x\n  logPrint('a')").unwrap();

        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].column, 1);
        assert_eq!(tokens[0].token, Token::Identifier("x".to_string()));

        // 2行目の logPrint
        let call = tokens
            .iter()
            .find(|t| t.token == Token::Identifier("logPrint".to_string()))
            .unwrap();
        assert_eq!(call.line, 2);
        assert_eq!(call.column, 3);
    }

    #[test]
    fn test_semicolons_are_skipped() {
        let tokens = significant("logPrint(\"a\"); logPrint(\"b\")");
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("logPrint".to_string()),
                Token::Delimiter(Delimiter::OpenParen),
                Token::Literal(Literal::Str("a".to_string())),
                Token::Delimiter(Delimiter::CloseParen),
                Token::Identifier("logPrint".to_string()),
                Token::Delimiter(Delimiter::OpenParen),
                Token::Literal(Literal::Str("b".to_string())),
                Token::Delimiter(Delimiter::CloseParen),
            ]
        );
    }

    #[test]
    fn test_negative_number_and_dash() {
        let tokens = significant("add(-2, - 3)");
        assert!(tokens.contains(&Token::Literal(Literal::Number(-2.0))));
        assert!(tokens.contains(&Token::Literal(Literal::Number(3.0))));
        assert!(!tokens.contains(&Token::Literal(Literal::Number(-3.0))));
    }

    #[test]
    fn test_literal_words() {
        let tokens = significant("[true, false, null]");
        assert_eq!(tokens[1], Token::Literal(Literal::Boolean(true)));
        assert_eq!(tokens[3], Token::Literal(Literal::Boolean(false)));
        assert_eq!(tokens[5], Token::Literal(Literal::Null));
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = Tokenizer::new().tokenize("x\n'open").unwrap_err();
        assert_eq!(err.span().line, 2);
        assert_eq!(err.span().column, 1);
    }
}
