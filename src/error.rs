// src/error.rs

//! Errors surfaced to clients by the sorted-set commands.
//!
//! The `Display` text is what ends up after the `ERR ` prefix in a reply.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZsetError {
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("syntax error")]
    Syntax,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("value is not a valid float")]
    NotAFloat,

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("timestamp is not an integer or out of range")]
    InvalidTimestamp,

    #[error("min or max is not a float")]
    MinMaxNotFloat,

    /// Two modifiers that cannot be combined, e.g. `NX` with `XX`.
    #[error("{0} and {1} options at the same time are not compatible")]
    IncompatibleOptions(&'static str, &'static str),

    #[error("INCR option supports a single increment-element pair")]
    IncrSinglePair,

    /// A score argument that is itself NaN.
    #[error("score is not a number (NaN)")]
    NanScore,

    /// An increment whose result is NaN (e.g. `+inf` plus `-inf`).
    #[error("resulting score is not a number (NaN)")]
    NanResult,
}

impl ZsetError {
    /// Short machine-readable code, used as a field in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WrongArity(_) => "WRONG_ARITY",
            Self::Syntax => "SYNTAX",
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
            Self::NotAFloat => "NOT_A_FLOAT",
            Self::NotAnInteger => "NOT_AN_INTEGER",
            Self::InvalidTimestamp => "INVALID_TIMESTAMP",
            Self::MinMaxNotFloat => "MIN_MAX_NOT_FLOAT",
            Self::IncompatibleOptions(..) => "INCOMPATIBLE_OPTIONS",
            Self::IncrSinglePair => "INCR_SINGLE_PAIR",
            Self::NanScore => "NAN_SCORE",
            Self::NanResult => "NAN_RESULT",
        }
    }
}
