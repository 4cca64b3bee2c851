use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::ChatApi;
use crate::events::{
    DirectedMessageService, EventContext, EventHandlerError, HandlerResult, MessageEvent,
};
use crate::membership::{MembershipAction, MembershipActuator, RoomName};

/// Verbs the bot answers to in a directed message.
pub const CONTROL_VOCABULARY: [&str; 2] = ["join", "leave"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomCommand {
    Join { room: RoomName },
    Leave { room: RoomName },
    Unrecognized { verb: String },
}

/// Takes the first whitespace token and matches it case-insensitively
/// against the control vocabulary; the second token is the target room.
/// Unmatched leading tokens never reach the actuator, and a missing room
/// is not a parse error; the membership call is where it gets rejected.
pub fn parse_room_command(text: &str) -> RoomCommand {
    let mut tokens = text.split_whitespace();
    let verb = tokens.next().unwrap_or_default();
    let room = RoomName(tokens.next().map(str::to_owned));

    match verb.to_ascii_lowercase().as_str() {
        "join" => RoomCommand::Join { room },
        "leave" => RoomCommand::Leave { room },
        _ => RoomCommand::Unrecognized { verb: verb.to_owned() },
    }
}

/// Turns directed messages into membership calls, or a confused reply when
/// the verb is not in the vocabulary. Exactly one outcome per message.
pub struct CommandInterpreter {
    actuator: MembershipActuator,
    chat: Arc<dyn ChatApi>,
    confused_spiel: String,
}

impl CommandInterpreter {
    pub fn new(
        actuator: MembershipActuator,
        chat: Arc<dyn ChatApi>,
        confused_spiel: impl Into<String>,
    ) -> Self {
        Self { actuator, chat, confused_spiel: confused_spiel.into() }
    }
}

#[async_trait]
impl DirectedMessageService for CommandInterpreter {
    async fn handle_directed(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        match parse_room_command(&event.text) {
            RoomCommand::Join { room } => {
                self.actuator.apply(MembershipAction::Join, room, &event.origin()).await;
            }
            RoomCommand::Leave { room } => {
                self.actuator.apply(MembershipAction::Leave, room, &event.origin()).await;
            }
            RoomCommand::Unrecognized { verb } => {
                debug!(
                    event_name = "command.unrecognized",
                    verb = %verb,
                    correlation_id = %ctx.correlation_id,
                    "directed message did not match the vocabulary"
                );
                if let Err(error) = self.chat.reply(&event.origin(), &self.confused_spiel).await {
                    warn!(
                        event_name = "command.confused_reply_failed",
                        error = %error,
                        "confused reply could not be delivered"
                    );
                }
            }
        }

        Ok(HandlerResult::Processed)
    }
}
