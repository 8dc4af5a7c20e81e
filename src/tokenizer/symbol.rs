//! # Delimiters
//!
//! Chariot has no infix operators: arithmetic and comparison are ordinary
//! calls (`add(1, 2)`, `bigger(x, 3)`), so the only symbols the grammar needs
//! are the structural delimiters below. Any other punctuation is tokenized as
//! [`Token::Unknown`] and ignored by the parser.

use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::{map, value},
    error::context,
};
use std::fmt;

use strum::AsRefStr;

use super::token::{ParserResult, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum Delimiter {
    #[strum(serialize = "(")]
    OpenParen,
    #[strum(serialize = ")")]
    CloseParen,
    #[strum(serialize = "{")]
    OpenBrace,
    #[strum(serialize = "}")]
    CloseBrace,
    #[strum(serialize = "[")]
    OpenBracket,
    #[strum(serialize = "]")]
    CloseBracket,
    #[strum(serialize = ",")]
    Comma,
}

// strum's Display reads `{` and `}` as format placeholders
impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Parses one structural delimiter.
///
/// ```
/// # use chariot::tokenizer::symbol::{parse_delimiter, Delimiter};
/// # use chariot::tokenizer::Token;
/// let (rest, token) = parse_delimiter("{ body }").unwrap();
/// assert_eq!(token, Token::Delimiter(Delimiter::OpenBrace));
/// assert_eq!(rest, " body }");
/// ```
#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_delimiter(input: &str) -> ParserResult<Token> {
    context(
        "delimiter",
        map(
            alt((
                value(Delimiter::OpenParen, tag("(")),
                value(Delimiter::CloseParen, tag(")")),
                value(Delimiter::OpenBrace, tag("{")),
                value(Delimiter::CloseBrace, tag("}")),
                value(Delimiter::OpenBracket, tag("[")),
                value(Delimiter::CloseBracket, tag("]")),
                value(Delimiter::Comma, tag(",")),
            )),
            Token::Delimiter,
        ),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiters() {
        let cases = [
            ("(", Delimiter::OpenParen),
            (")", Delimiter::CloseParen),
            ("{", Delimiter::OpenBrace),
            ("}", Delimiter::CloseBrace),
            ("[", Delimiter::OpenBracket),
            ("]", Delimiter::CloseBracket),
            (",", Delimiter::Comma),
        ];
        for (input, expected) in cases {
            let (rest, token) = parse_delimiter(input).unwrap();
            assert_eq!(token, Token::Delimiter(expected));
            assert_eq!(rest, "");
            assert_eq!(expected.to_string(), input);
        }
    }

    #[test]
    fn test_semicolon_is_not_a_delimiter() {
        assert!(parse_delimiter(";").is_err());
    }
}
