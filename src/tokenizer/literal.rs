use nom::{
    branch::alt,
    bytes::complete::take_until,
    character::complete::{char, digit1},
    combinator::{map, map_res, opt, recognize},
    error::{ErrorKind, ParseError as _, VerboseError, context},
    sequence::{delimited, preceded, tuple},
};

use super::token::{ParserResult, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Number(f64),
    Boolean(bool),
    Null,
}

/// Builds a parser for a string delimited by `quote` that understands the
/// usual backslash escapes. Unknown escapes keep the escaped character.
fn quoted(quote: char) -> impl Fn(&str) -> ParserResult<String> {
    move |input: &str| {
        let (mut rest, _) = char(quote)(input)?;
        let mut content = String::new();
        loop {
            let mut chars = rest.chars();
            match chars.next() {
                None => {
                    return Err(nom::Err::Failure(VerboseError::from_error_kind(
                        input,
                        ErrorKind::Char,
                    )));
                }
                Some(c) if c == quote => return Ok((chars.as_str(), content)),
                Some('\\') => match chars.next() {
                    Some('n') => content.push('\n'),
                    Some('t') => content.push('\t'),
                    Some('r') => content.push('\r'),
                    Some(other) => content.push(other),
                    None => {
                        return Err(nom::Err::Failure(VerboseError::from_error_kind(
                            input,
                            ErrorKind::Escaped,
                        )));
                    }
                },
                Some(c) => content.push(c),
            }
            rest = chars.as_str();
        }
    }
}

#[tracing::instrument(level = "trace", skip(input))]
fn parse_backtick_string(input: &str) -> ParserResult<String> {
    context(
        "raw string",
        map(
            delimited(char('`'), take_until("`"), char('`')),
            |raw: &str| raw.to_string(),
        ),
    )(input)
}

#[tracing::instrument(level = "trace", skip(input))]
fn parse_string_literal(input: &str) -> ParserResult<Literal> {
    context(
        "string literal",
        map(
            alt((quoted('\''), quoted('"'), parse_backtick_string)),
            Literal::Str,
        ),
    )(input)
}

/// `-` only belongs to a number when a digit follows immediately.
#[tracing::instrument(level = "trace", skip(input))]
fn parse_number_literal(input: &str) -> ParserResult<Literal> {
    context(
        "number literal",
        map_res(
            recognize(tuple((
                opt(char('-')),
                digit1,
                opt(preceded(char('.'), digit1)),
            ))),
            |s: &str| s.parse::<f64>().map(Literal::Number),
        ),
    )(input)
}

#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_literal(input: &str) -> ParserResult<Token> {
    context(
        "literal",
        map(
            alt((parse_string_literal, parse_number_literal)),
            Token::Literal,
        ),
    )(input)
}

/// Maps the identifier-shaped literals.
pub fn word_literal(word: &str) -> Option<Literal> {
    match word {
        "true" => Some(Literal::Boolean(true)),
        "false" => Some(Literal::Boolean(false)),
        "null" => Some(Literal::Null),
        _ => None,
    }
}
