use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::api::{ApiError, ChatApi, MembershipApi, MessageRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipAction {
    Join,
    Leave,
}

impl MembershipAction {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

impl fmt::Display for MembershipAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Target room exactly as the user typed it. Commands may omit it; the
/// remote API is the one that rejects a missing name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoomName(pub Option<String>);

impl RoomName {
    pub fn named(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(name) => f.write_str(name),
            None => f.write_str("(unnamed)"),
        }
    }
}

/// A failed join/leave call. Always recovered inside the actuator as one
/// apology reply; never propagated further.
#[derive(Debug, Error)]
#[error("{action} failed for room `{room}`: {cause}")]
pub struct MembershipActionFailed {
    pub action: MembershipAction,
    pub room: RoomName,
    #[source]
    pub cause: ApiError,
}

pub struct MembershipActuator {
    api: Arc<dyn MembershipApi>,
    chat: Arc<dyn ChatApi>,
    apology_spiel: String,
}

impl MembershipActuator {
    pub fn new(
        api: Arc<dyn MembershipApi>,
        chat: Arc<dyn ChatApi>,
        apology_spiel: impl Into<String>,
    ) -> Self {
        Self { api, chat, apology_spiel: apology_spiel.into() }
    }

    /// One membership call per command, no retry. Success stays silent;
    /// failure surfaces as exactly one apology reply to the originating
    /// message.
    pub async fn apply(&self, action: MembershipAction, room: RoomName, origin: &MessageRef) {
        let result = match action {
            MembershipAction::Join => self.api.join_channel(room.as_deref()).await,
            MembershipAction::Leave => self.api.leave_channel(room.as_deref()).await,
        };

        let Err(cause) = result else {
            return;
        };

        let failure = MembershipActionFailed { action, room, cause };
        warn!(event_name = "membership.action_failed", error = %failure, "membership call failed");
        if let Err(reply_error) = self.chat.reply(origin, &self.apology_spiel).await {
            warn!(
                event_name = "membership.apology_failed",
                error = %reply_error,
                "apology reply could not be delivered"
            );
        }
    }
}
