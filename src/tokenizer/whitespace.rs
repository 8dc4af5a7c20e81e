//! Whitespace and newline tokens.
//!
//! Newlines are kept as their own token so that line tracking in
//! [`Tokenizer`](super::Tokenizer) stays a pure function of the consumed text.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    combinator::map,
    error::context,
};

use super::token::{ParserResult, Token};

/// Parses a run of spaces and tabs.
///
/// ```
/// # use chariot::tokenizer::whitespace::parse_whitespace;
/// # use chariot::tokenizer::Token;
/// let (rest, token) = parse_whitespace("  \tx").unwrap();
/// assert_eq!(token, Token::Whitespace("  \t".to_string()));
/// assert_eq!(rest, "x");
/// ```
#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_whitespace(input: &str) -> ParserResult<Token> {
    context(
        "whitespace",
        map(take_while1(|c| c == ' ' || c == '\t'), |ws: &str| {
            Token::Whitespace(ws.to_string())
        }),
    )(input)
}

/// Parses a single `\n` or `\r\n`.
#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_newline(input: &str) -> ParserResult<Token> {
    context(
        "newline",
        map(alt((tag("\r\n"), tag("\n"))), |_| Token::Newline),
    )(input)
}
