//! # Chariot Tokenizer
//!
//! Turns Chariot source text into a flat stream of [`TokenSpan`]s. Every span
//! remembers the 1-based line and column it started at so the parser can attach
//! source positions to statements, which the debugger later matches against
//! breakpoints.
//!
//! Trivia (whitespace, newlines, comments, and characters the grammar does not
//! know such as `;`) are still emitted as tokens; the parser drops them.

pub mod comment;
pub mod keyword;
pub mod literal;
pub mod symbol;
pub mod token;
pub mod whitespace;

pub use keyword::Keyword;
pub use literal::Literal;
pub use symbol::Delimiter;
pub use token::{Span, Token, TokenSpan, Tokenizer, TokenizerError, TokenizerResult};
