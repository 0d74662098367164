//! Final result of one invocation.

use serde::Serialize;

use crate::bridge::protocol::{FIGHTS_CHANNEL, MASTER_INFO_CHANNEL};
use crate::collector::CollectionState;

/// Error reported when the worker did not answer both collection requests.
pub const INCOMPLETE_DATA: &str = "Parser did not return complete data";

/// Serialized as `{"fights": .., "master": ..}` on success and as
/// `{"error": .., "fights": .., "master": ..}` on failure, with `null` for
/// anything that never arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Success {
        fights: serde_json::Value,
        master: serde_json::Value,
    },
    Failure {
        error: String,
        fights: Option<serde_json::Value>,
        master: Option<serde_json::Value>,
    },
}

impl Outcome {
    /// Failure with no partial data.
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            fights: None,
            master: None,
        }
    }

    /// Build the outcome from whatever the collector gathered.
    pub fn assemble(mut state: CollectionState) -> Self {
        let fights = state.take(FIGHTS_CHANNEL);
        let master = state.take(MASTER_INFO_CHANNEL);
        match (fights, master) {
            (Some(fights), Some(master)) => Self::Success { fights, master },
            (fights, master) => Self::Failure {
                error: INCOMPLETE_DATA.to_string(),
                fights,
                master,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn fights(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success { fights, .. } => Some(fights),
            Self::Failure { fights, .. } => fights.as_ref(),
        }
    }

    pub fn master(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success { master, .. } => Some(master),
            Self::Failure { master, .. } => master.as_ref(),
        }
    }
}
