use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use gohome_core::responses::{is_tired, NudgeRng, ResponsePlan, ResponseSelector};
use gohome_core::workday::WorkdayWindow;

use crate::api::{ChatApi, ReactionRequest, UserDirectoryApi};
use crate::events::{
    AmbientMessageService, EventContext, EventHandlerError, HandlerResult, MessageEvent,
};

/// Watches ambient channel chatter and pokes anyone posting outside the
/// workday window, with either a text reply or a reaction.
pub struct Nudger {
    chat: Arc<dyn ChatApi>,
    users: Arc<dyn UserDirectoryApi>,
    window: WorkdayWindow,
    selector: ResponseSelector,
    rng: Mutex<Box<dyn NudgeRng>>,
}

impl Nudger {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        users: Arc<dyn UserDirectoryApi>,
        window: WorkdayWindow,
        selector: ResponseSelector,
        rng: Box<dyn NudgeRng>,
    ) -> Self {
        Self { chat, users, window, selector, rng: Mutex::new(rng) }
    }

    async fn author_offset(&self, event: &MessageEvent) -> Option<i32> {
        if event.author_utc_offset_seconds.is_some() {
            return event.author_utc_offset_seconds;
        }

        match self.users.user_tz_offset(&event.user_id).await {
            Ok(offset) => offset,
            Err(error) => {
                warn!(
                    event_name = "nudge.tz_lookup_failed",
                    user_id = %event.user_id,
                    error = %error,
                    "user directory lookup failed; falling back to the default offset"
                );
                None
            }
        }
    }
}

#[async_trait]
impl AmbientMessageService for Nudger {
    async fn handle_ambient(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let timestamp: f64 = event.ts.parse().map_err(|_| EventHandlerError::MalformedEvent {
            field: "ts",
            value: event.ts.clone(),
        })?;

        let offset = self.author_offset(event).await;
        if !self.window.is_late(timestamp, offset) || is_tired() {
            return Ok(HandlerResult::Processed);
        }

        debug!(
            event_name = "nudge.late_post",
            channel_id = %event.channel_id,
            user_id = %event.user_id,
            correlation_id = %ctx.correlation_id,
            "late post detected"
        );

        let plan = {
            let mut rng = self.rng.lock().await;
            self.selector.select(&mut **rng)
        };

        match plan {
            ResponsePlan::TextReply(text) => {
                if let Err(error) = self.chat.reply(&event.origin(), &text).await {
                    warn!(
                        event_name = "nudge.reply_failed",
                        error = %error,
                        "nudge reply could not be delivered"
                    );
                }
            }
            ResponsePlan::ReactionAdd(name) => {
                let request = ReactionRequest {
                    channel_id: event.channel_id.clone(),
                    timestamp: event.ts.clone(),
                    name,
                };
                if let Err(error) = self.chat.add_reaction(request).await {
                    warn!(
                        event_name = "nudge.reaction_failed",
                        error = %error,
                        "nudge reaction could not be delivered"
                    );
                }
            }
        }

        Ok(HandlerResult::Processed)
    }
}
