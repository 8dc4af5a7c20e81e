use strum::{AsRefStr, Display, EnumString};

/// Reserved words of the Chariot grammar.
///
/// Everything else that looks like an identifier (including `declare`,
/// `setq`, `logPrint`, ...) is an ordinary call target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    If,
    Else,
    While,
    Switch,
    Case,
    Default,
    Func,
}
