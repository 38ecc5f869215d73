use std::fmt;

use serde::{Deserialize, Serialize};

const SEPARATOR: char = '_';

/// Canonical key of a two-party private conversation.
///
/// Both participants derive the same id independently, so there is no
/// separate "create conversation" step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// `sort([a, b]).join("_")`
    pub fn between(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{first}{SEPARATOR}{second}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the id back into its two participants.
    ///
    /// Only unambiguous when user ids contain no `_`; returns `None` otherwise.
    pub fn participants(&self) -> Option<(&str, &str)> {
        let mut parts = self.0.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) => Some((a, b)),
            _ => None,
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.participants()
            .is_some_and(|(a, b)| a == user_id || b == user_id)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
