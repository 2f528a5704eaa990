use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a rule.
/// Opaque, unique within the library and immutable once assigned.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct RuleId(String);

impl RuleId {
    /// A fresh, random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// An id with the given text.
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(id.as_ref().into())
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Whether a rule may fire.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// Eligible to fire while the engine runs.
    #[default]
    Active,

    /// Never fires.
    Paused,
}

impl RuleStatus {
    /// The other status.
    pub fn flipped(self) -> Self {
        match self {
            RuleStatus::Active => RuleStatus::Paused,
            RuleStatus::Paused => RuleStatus::Active,
        }
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        matches!(self, RuleStatus::Active)
    }
}

impl Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleStatus::Active => write!(f, "active"),
            RuleStatus::Paused => write!(f, "paused"),
        }
    }
}

/// How a condition's value is held against inbound data.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Substring test.
    Contains,

    /// Exact equality.
    Equals,

    /// Regular expression search.
    Regex,
}

/// The stimulus part of a rule.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
pub struct Condition {
    /// See [`ConditionKind`].
    #[serde(rename = "type")]
    pub kind: ConditionKind,

    /// Pattern, text or hex depending on the kind.
    pub value: String,

    /// Human readable summary.
    #[serde(default)]
    pub description: String,
}

impl Condition {
    /// A condition without a description.
    pub fn new<S: AsRef<str>>(kind: ConditionKind, value: S) -> Self {
        Self {
            kind,
            value: value.as_ref().into(),
            description: String::new(),
        }
    }

    /// Set the description.
    pub fn describe<S: AsRef<str>>(mut self, description: S) -> Self {
        self.description = description.as_ref().into();
        self
    }
}

/// What a rule does when it fires.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Put the value on the originating transport.
    /// Parsed as hex where possible, else sent as text.
    SendHex,

    /// Only write the value to the log.
    Log,
}

/// The response part of a rule.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
pub struct Action {
    /// See [`ActionKind`].
    #[serde(rename = "type")]
    pub kind: ActionKind,

    /// Hex bytes, text, or a log message.
    pub value: String,

    /// Human readable summary.
    #[serde(default)]
    pub description: String,
}

impl Action {
    /// An action without a description.
    pub fn new<S: AsRef<str>>(kind: ActionKind, value: S) -> Self {
        Self {
            kind,
            value: value.as_ref().into(),
            description: String::new(),
        }
    }

    /// Set the description.
    pub fn describe<S: AsRef<str>>(mut self, description: S) -> Self {
        self.description = description.as_ref().into();
        self
    }
}

/// A stimulus (condition) and response (action) pair.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
pub struct Rule {
    /// See [`RuleId`].
    pub id: RuleId,

    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// See [`RuleStatus`].
    #[serde(default)]
    pub status: RuleStatus,

    /// Milliseconds between a match and the response.
    #[serde(default)]
    pub delay: u64,

    /// When to fire.
    pub condition: Condition,

    /// What to do.
    pub action: Action,
}

impl Rule {
    /// A new active rule with a generated id and no delay.
    pub fn new(condition: Condition, action: Action) -> Self {
        Self {
            id: RuleId::generate(),
            name: None,
            status: RuleStatus::Active,
            delay: 0,
            condition,
            action,
        }
    }

    /// Use this id instead of the generated one.
    pub fn with_id<I: Into<RuleId>>(mut self, id: I) -> Self {
        self.id = id.into();
        self
    }

    /// Set the delay in milliseconds.
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the display name.
    pub fn with_name<S: AsRef<str>>(mut self, name: S) -> Self {
        self.name = Some(name.as_ref().into());
        self
    }

    /// Check if this rule is eligible to fire.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The rules a fresh console ships with.
    pub fn factory_defaults() -> Vec<Rule> {
        vec![
            Rule::new(
                Condition::new(ConditionKind::Contains, "0xAA 0x55")
                    .describe("Received contains \"0xAA 0x55\""),
                Action::new(ActionKind::SendHex, "0x06 0x00").describe("Send \"0x06 0x00\""),
            )
            .with_id("r1"),
            Rule::new(
                Condition::new(ConditionKind::Equals, "0xFF").describe("RX == \"0xFF\" (Error)"),
                Action::new(ActionKind::Log, "Critical Failure")
                    .describe("LOG \"Critical Failure\""),
            )
            .with_id("r2")
            .with_status(RuleStatus::Paused),
        ]
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({name}, {})", self.id, self.status),
            None => write!(f, "{} ({})", self.id, self.status),
        }
    }
}
