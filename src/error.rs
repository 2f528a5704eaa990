use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{rule::RuleId, transport::TransportKind};

/// Errors thay may occur in this library.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// Tried to put something on a transport which is not connected (or not running).
    #[error("The transport `{0}` is not connected")]
    NotConnected(TransportKind),

    /// The rule does not exist.
    #[error("The rule `{0}` does not exist")]
    NoSuchRule(RuleId),

    /// Paused rules may not be activated while the engine is stopped.
    #[error("The rule `{0}` can not be activated while the engine is stopped")]
    EngineDisabled(RuleId),

    /// A rule's regex condition does not compile.
    #[error("The regex condition of rule `{rule}` is malformed. Problem: {problem}")]
    MalformedRegex {
        /// The rule holding the pattern.
        rule: RuleId,

        /// Why it did not compile.
        problem: String,
    },

    /// Bad json.
    #[error("Could not deserialize rules. Problem: {problem}")]
    BadJson {
        /// The deserialization issue.
        problem: String,
    },

    /// The configuration is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The transport reported a problem.
    #[error("Transport issue: {0}")]
    TransportIssue(String),

    /// The console task is no longer running.
    #[error("The console is no longer running")]
    ConsoleGone,
}

impl Error {
    /// Returns the bad config message if it is one.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    /// Returns the malformed regex rule and problem if it is one.
    pub fn try_into_malformed_regex(self) -> Result<(RuleId, String), Self> {
        if let Self::MalformedRegex { rule, problem } = self {
            Ok((rule, problem))
        } else {
            Err(self)
        }
    }
}
