//! Routing keys and subscription modes.
//!
//! Every deployment shares one `{topic}` constant. What a publisher sends and
//! what a dispatcher registers both follow from the [`SubscriptionMode`]
//! chosen at startup:
//!
//! | Mode | Publish subject | Subscription pattern | Delivery |
//! |---|---|---|---|
//! | [`SubscriptionMode::Broadcast`] | `{topic}` | `{topic}` | every subscriber gets every message |
//! | [`SubscriptionMode::QueueGroup`] | `{topic}.{id}` | `{topic}.>` | one member of the group gets each message |
//!
//! Subjects are dot-separated tokens. Patterns may use `*` to match exactly
//! one token and a trailing `>` to match one or more remaining tokens.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a subscription mode name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown subscription mode '{0}' (expected 'broadcast' or 'queue-group')")]
pub struct UnknownModeError(pub String);

/// How dispatchers consume the topic.
///
/// The two modes are mutually exclusive for one pipeline instance. The mode is
/// fixed at construction and never inferred from traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionMode {
    /// Every dispatcher receives every message.
    Broadcast,
    /// Exactly one member of the named group receives each message.
    QueueGroup {
        /// Group name shared by all competing consumers.
        group: String,
    },
}

impl SubscriptionMode {
    /// Shorthand for a queue-group mode.
    #[must_use]
    pub fn queue_group(group: impl Into<String>) -> Self {
        Self::QueueGroup {
            group: group.into(),
        }
    }

    /// Pattern a dispatcher registers for this mode.
    #[must_use]
    pub fn subscription_pattern(&self, topic: &str) -> String {
        match self {
            Self::Broadcast => topic.to_string(),
            Self::QueueGroup { .. } => format!("{topic}.>"),
        }
    }

    /// Routing key a publisher uses for an event in this mode.
    #[must_use]
    pub fn routing_key(&self, topic: &str, event_id: &str) -> RoutingKey {
        match self {
            Self::Broadcast => RoutingKey::bare(topic),
            Self::QueueGroup { .. } => RoutingKey::per_event(topic, event_id),
        }
    }

    /// Short name used in logs and configuration.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::QueueGroup { .. } => "queue-group",
        }
    }
}

impl FromStr for SubscriptionMode {
    type Err = UnknownModeError;

    /// Parse `broadcast` or `queue-group`. The group name defaults to
    /// `login_workers`; override it with [`SubscriptionMode::queue_group`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broadcast" | "pub_sub" | "pubsub" => Ok(Self::Broadcast),
            "queue-group" | "queue_group" | "workers" => Ok(Self::queue_group(DEFAULT_QUEUE_GROUP)),
            _ => Err(UnknownModeError(s.to_string())),
        }
    }
}

/// Default queue group name.
pub const DEFAULT_QUEUE_GROUP: &str = "login_workers";

/// Subject under which a message is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// `{topic}.{id}`, required for queue-group consumption.
    #[must_use]
    pub fn per_event(topic: &str, event_id: &str) -> Self {
        Self(format!("{topic}.{event_id}"))
    }

    /// Bare `{topic}`, required for broadcast consumption.
    #[must_use]
    pub fn bare(topic: &str) -> Self {
        Self(topic.to_string())
    }

    /// The subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check whether `subject` matches a subscription `pattern`.
///
/// `*` matches exactly one token, a trailing `>` matches one or more tokens,
/// any other token must match literally.
///
/// # Examples
///
/// ```
/// use credflow_core::routing::subject_matches;
///
/// assert!(subject_matches("logins.*", "logins.1234"));
/// assert!(!subject_matches("logins.*", "logins"));
/// assert!(subject_matches("logins", "logins"));
/// assert!(subject_matches("logins.>", "logins.a.b"));
/// ```
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {},
            (Some(p), Some(s)) if p == s => {},
            (None, None) => return true,
            _ => return false,
        }
    }
}
