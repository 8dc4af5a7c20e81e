use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::not_line_ending,
    combinator::map,
    error::context,
    sequence::{delimited, preceded},
};

use super::token::{CommentType, ParserResult, Token};

#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_line_comment(input: &str) -> ParserResult<Token> {
    context(
        "line comment",
        map(preceded(tag("//"), not_line_ending), |content: &str| {
            Token::Comment {
                content: content.trim().to_string(),
                comment_type: CommentType::Line,
            }
        }),
    )(input)
}

#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_block_comment(input: &str) -> ParserResult<Token> {
    context(
        "block comment",
        map(
            delimited(tag("/*"), take_until("*/"), tag("*/")),
            |content: &str| Token::Comment {
                content: content.to_string(),
                comment_type: CommentType::Block,
            },
        ),
    )(input)
}

#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_comment(input: &str) -> ParserResult<Token> {
    context("comment", alt((parse_block_comment, parse_line_comment)))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_comment_stops_at_newline() {
        let (rest, token) = parse_comment("// set up\nlogPrint('a')").unwrap();
        assert_eq!(
            token,
            Token::Comment {
                content: "set up".to_string(),
                comment_type: CommentType::Line,
            }
        );
        assert_eq!(rest, "\nlogPrint('a')");
    }

    #[test]
    fn test_block_comment_spans_lines() {
        let (rest, token) = parse_comment("/* a\nb */x").unwrap();
        assert!(matches!(
            token,
            Token::Comment { comment_type: CommentType::Block, ref content } if content == " a\nb "
        ));
        assert_eq!(rest, "x");
    }

    #[test]
    fn test_single_slash_is_not_a_comment() {
        assert!(parse_comment("/ 2").is_err());
    }
}
