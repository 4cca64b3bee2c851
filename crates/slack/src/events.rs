use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use gohome_core::config::SpielConfig;
use gohome_core::responses::{NudgeRng, ResponseSelector, StdNudgeRng};
use gohome_core::workday::WorkdayWindow;

use crate::api::{ChatApi, MembershipApi, MessageRef, NoopSlackApi, UserDirectoryApi};
use crate::commands::CommandInterpreter;
use crate::membership::MembershipActuator;
use crate::nudge::Nudger;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

/// One inbound event, produced by the transport and discarded after its
/// single dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    RoomJoined(RoomJoinedEvent),
    DirectedMessage(MessageEvent),
    AmbientMessage(MessageEvent),
    ConnectionOpened,
    ConnectionClosed,
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::RoomJoined(_) => SlackEventType::RoomJoined,
            Self::DirectedMessage(_) => SlackEventType::DirectedMessage,
            Self::AmbientMessage(_) => SlackEventType::AmbientMessage,
            Self::ConnectionOpened => SlackEventType::ConnectionOpened,
            Self::ConnectionClosed => SlackEventType::ConnectionClosed,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    RoomJoined,
    DirectedMessage,
    AmbientMessage,
    ConnectionOpened,
    ConnectionClosed,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomJoinedEvent {
    pub channel_id: String,
    pub ts: String,
}

impl RoomJoinedEvent {
    pub fn origin(&self) -> MessageRef {
        MessageRef { channel_id: self.channel_id.clone(), ts: self.ts.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub ts: String,
    pub text: String,
    /// Author offset when the transport already carries it; otherwise the
    /// nudge path asks the user directory.
    pub author_utc_offset_seconds: Option<i32>,
}

impl MessageEvent {
    pub fn origin(&self) -> MessageRef {
        MessageRef { channel_id: self.channel_id.clone(), ts: self.ts.clone() }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope field `{0}` is missing or not a string")]
    MissingField(&'static str),
}

/// Decodes one transport frame into a typed envelope.
///
/// Both `bot_channel_join` and `bot_group_join` converge on
/// [`SlackEvent::RoomJoined`]; `direct_message`, `direct_mention` and
/// `mention` converge on [`SlackEvent::DirectedMessage`]. Raw `message`
/// frames are classified against the bot identity.
pub fn decode_envelope(raw: &str, bot_user_id: Option<&str>) -> Result<SlackEnvelope, WireError> {
    let value: Value = serde_json::from_str(raw)?;
    let envelope_id = string_field(&value, "envelope_id")?;
    let payload = value.get("event").ok_or(WireError::MissingField("event"))?;
    let event_type = string_field(payload, "type")?;

    let event = match event_type.as_str() {
        "bot_channel_join" | "bot_group_join" => SlackEvent::RoomJoined(RoomJoinedEvent {
            channel_id: string_field(payload, "channel")?,
            ts: string_field(payload, "ts")?,
        }),
        "direct_message" | "direct_mention" | "mention" => {
            SlackEvent::DirectedMessage(message_event(payload)?)
        }
        "ambient" => SlackEvent::AmbientMessage(message_event(payload)?),
        "message" => classify_message(message_event(payload)?, bot_user_id),
        "rtm_open" | "hello" => SlackEvent::ConnectionOpened,
        "rtm_close" | "goodbye" => SlackEvent::ConnectionClosed,
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    Ok(SlackEnvelope { envelope_id, event })
}

/// Splits raw channel messages into directed and ambient traffic: direct
/// message channels and bot mentions are directed, everything else is
/// ambient chatter. A leading mention is stripped so the command verb is
/// the first token again.
pub fn classify_message(mut message: MessageEvent, bot_user_id: Option<&str>) -> SlackEvent {
    if message.channel_id.starts_with('D') {
        return SlackEvent::DirectedMessage(message);
    }

    if let Some(id) = bot_user_id {
        let mention = format!("<@{id}>");
        let stripped = message
            .text
            .trim_start()
            .strip_prefix(mention.as_str())
            .map(|rest| rest.trim_start_matches([':', ',']).trim_start().to_owned());
        if let Some(text) = stripped {
            message.text = text;
            return SlackEvent::DirectedMessage(message);
        }
        if message.text.contains(mention.as_str()) {
            return SlackEvent::DirectedMessage(message);
        }
    }

    SlackEvent::AmbientMessage(message)
}

fn string_field(value: &Value, field: &'static str) -> Result<String, WireError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(WireError::MissingField(field))
}

fn message_event(payload: &Value) -> Result<MessageEvent, WireError> {
    Ok(MessageEvent {
        channel_id: string_field(payload, "channel")?,
        user_id: string_field(payload, "user")?,
        ts: string_field(payload, "ts")?,
        text: payload.get("text").and_then(Value::as_str).unwrap_or_default().to_owned(),
        // Non-numeric offsets decode to None and fall back downstream.
        author_utc_offset_seconds: payload
            .get("tz_offset")
            .and_then(Value::as_i64)
            .map(|offset| offset as i32),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
    /// The connection is gone; the supervisor must take over before any
    /// further event is handled on it.
    Reconnect,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("malformed event field `{field}`: `{value}`")]
    MalformedEvent { field: &'static str, value: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Binds exactly one handler per event category; dispatch never chains or
/// falls through.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
pub trait DirectedMessageService: Send + Sync {
    async fn handle_directed(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[async_trait]
pub trait AmbientMessageService: Send + Sync {
    async fn handle_ambient(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Greets every room the bot is invited into.
pub struct RoomJoinedHandler {
    chat: Arc<dyn ChatApi>,
    entry_spiel: String,
}

impl RoomJoinedHandler {
    pub fn new(chat: Arc<dyn ChatApi>, entry_spiel: impl Into<String>) -> Self {
        Self { chat, entry_spiel: entry_spiel.into() }
    }
}

#[async_trait]
impl EventHandler for RoomJoinedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::RoomJoined
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::RoomJoined(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        info!(
            event_name = "room.joined",
            channel_id = %event.channel_id,
            correlation_id = %ctx.correlation_id,
            "joined a room, posting the entry greeting"
        );
        if let Err(error) = self.chat.reply(&event.origin(), &self.entry_spiel).await {
            warn!(
                event_name = "room.greeting_failed",
                channel_id = %event.channel_id,
                error = %error,
                "entry greeting could not be delivered"
            );
        }
        Ok(HandlerResult::Processed)
    }
}

pub struct DirectedMessageHandler<S> {
    service: S,
}

impl<S> DirectedMessageHandler<S>
where
    S: DirectedMessageService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for DirectedMessageHandler<S>
where
    S: DirectedMessageService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::DirectedMessage
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::DirectedMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        self.service.handle_directed(event, ctx).await
    }
}

pub struct AmbientMessageHandler<S> {
    service: S,
}

impl<S> AmbientMessageHandler<S>
where
    S: AmbientMessageService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for AmbientMessageHandler<S>
where
    S: AmbientMessageService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AmbientMessage
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AmbientMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        self.service.handle_ambient(event, ctx).await
    }
}

pub struct ConnectionOpenedHandler;

#[async_trait]
impl EventHandler for ConnectionOpenedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ConnectionOpened
    }

    async fn handle(
        &self,
        _envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        info!(
            event_name = "connection.opened",
            correlation_id = %ctx.correlation_id,
            "event stream connected"
        );
        Ok(HandlerResult::Processed)
    }
}

pub struct ConnectionClosedHandler;

#[async_trait]
impl EventHandler for ConnectionClosedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ConnectionClosed
    }

    async fn handle(
        &self,
        _envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        info!(
            event_name = "connection.closed",
            correlation_id = %ctx.correlation_id,
            "event stream closed, handing over to the supervisor"
        );
        Ok(HandlerResult::Reconnect)
    }
}

/// Everything the bot's handler set needs; cloned into the dispatcher
/// factory so each (re)connect can rebuild the full registration.
#[derive(Clone)]
pub struct BotWiring {
    pub spiel: SpielConfig,
    pub window: WorkdayWindow,
    pub selector: ResponseSelector,
    pub chat: Arc<dyn ChatApi>,
    pub membership: Arc<dyn MembershipApi>,
    pub users: Arc<dyn UserDirectoryApi>,
}

impl Default for BotWiring {
    fn default() -> Self {
        let api = Arc::new(NoopSlackApi);
        Self {
            spiel: SpielConfig::default(),
            window: WorkdayWindow::default(),
            selector: ResponseSelector::default(),
            chat: api.clone(),
            membership: api.clone(),
            users: api,
        }
    }
}

/// The full registration set: room joins, directed messages, ambient
/// chatter, and both connectivity events. Each category gets exactly one
/// handler per dispatcher instance.
pub fn bot_dispatcher(wiring: &BotWiring, rng: Box<dyn NudgeRng>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(RoomJoinedHandler::new(wiring.chat.clone(), wiring.spiel.entry.clone()));
    dispatcher.register(DirectedMessageHandler::new(CommandInterpreter::new(
        MembershipActuator::new(
            wiring.membership.clone(),
            wiring.chat.clone(),
            wiring.spiel.apology.clone(),
        ),
        wiring.chat.clone(),
        wiring.spiel.confused.clone(),
    )));
    dispatcher.register(AmbientMessageHandler::new(Nudger::new(
        wiring.chat.clone(),
        wiring.users.clone(),
        wiring.window,
        wiring.selector.clone(),
        rng,
    )));
    dispatcher.register(ConnectionOpenedHandler);
    dispatcher.register(ConnectionClosedHandler);
    dispatcher
}

/// Dispatcher wired against the inert API client.
pub fn default_dispatcher() -> EventDispatcher {
    bot_dispatcher(&BotWiring::default(), Box::new(StdNudgeRng::from_entropy()))
}

#[cfg(test)]
mod tests {
    use super::{
        classify_message, decode_envelope, default_dispatcher, EventContext, EventDispatcher,
        HandlerResult, MessageEvent, SlackEnvelope, SlackEvent, WireError,
    };

    fn message(channel: &str, text: &str) -> MessageEvent {
        MessageEvent {
            channel_id: channel.to_owned(),
            user_id: "U100".to_owned(),
            ts: "1530071118.000184".to_owned(),
            text: text.to_owned(),
            author_utc_offset_seconds: None,
        }
    }

    #[test]
    fn both_join_event_names_converge_on_room_joined() {
        for name in ["bot_channel_join", "bot_group_join"] {
            let raw = format!(
                r#"{{"envelope_id":"env-1","event":{{"type":"{name}","channel":"C1","ts":"1.0"}}}}"#
            );
            let envelope = decode_envelope(&raw, None).expect("decode");
            assert!(matches!(envelope.event, SlackEvent::RoomJoined(_)), "{name}");
        }
    }

    #[test]
    fn all_directed_event_names_converge_on_directed_message() {
        for name in ["direct_message", "direct_mention", "mention"] {
            let raw = format!(
                r#"{{"envelope_id":"env-2","event":{{"type":"{name}","channel":"D1","user":"U1","ts":"1.0","text":"join general"}}}}"#
            );
            let envelope = decode_envelope(&raw, None).expect("decode");
            assert!(matches!(envelope.event, SlackEvent::DirectedMessage(_)), "{name}");
        }
    }

    #[test]
    fn connection_lifecycle_names_decode_to_connection_events() {
        let open = decode_envelope(
            r#"{"envelope_id":"env-3","event":{"type":"rtm_open"}}"#,
            None,
        )
        .expect("decode");
        assert_eq!(open.event, SlackEvent::ConnectionOpened);

        let close = decode_envelope(
            r#"{"envelope_id":"env-4","event":{"type":"rtm_close"}}"#,
            None,
        )
        .expect("decode");
        assert_eq!(close.event, SlackEvent::ConnectionClosed);
    }

    #[test]
    fn unknown_event_names_decode_to_unsupported() {
        let envelope = decode_envelope(
            r#"{"envelope_id":"env-5","event":{"type":"team_join"}}"#,
            None,
        )
        .expect("decode");
        assert_eq!(
            envelope.event,
            SlackEvent::Unsupported { event_type: "team_join".to_owned() }
        );
    }

    #[test]
    fn missing_envelope_id_is_a_wire_error() {
        let error = decode_envelope(r#"{"event":{"type":"ambient"}}"#, None)
            .expect_err("missing envelope id should fail");
        assert!(matches!(error, WireError::MissingField("envelope_id")));
    }

    #[test]
    fn non_numeric_tz_offset_decodes_to_none() {
        let raw = r#"{"envelope_id":"env-6","event":{"type":"ambient","channel":"C1","user":"U1","ts":"1.0","text":"hi","tz_offset":"broken"}}"#;
        let envelope = decode_envelope(raw, None).expect("decode");
        let SlackEvent::AmbientMessage(event) = envelope.event else {
            panic!("expected ambient message");
        };
        assert_eq!(event.author_utc_offset_seconds, None);
    }

    #[test]
    fn direct_message_channels_classify_as_directed() {
        let event = classify_message(message("D042", "join general"), None);
        assert!(matches!(event, SlackEvent::DirectedMessage(_)));
    }

    #[test]
    fn leading_mention_is_stripped_and_classifies_as_directed() {
        let event = classify_message(message("C042", "<@UBOT> join general"), Some("UBOT"));
        let SlackEvent::DirectedMessage(event) = event else {
            panic!("expected directed message");
        };
        assert_eq!(event.text, "join general");
    }

    #[test]
    fn mid_text_mention_classifies_as_directed_without_rewriting() {
        let event = classify_message(message("C042", "hey <@UBOT>, got a sec?"), Some("UBOT"));
        let SlackEvent::DirectedMessage(event) = event else {
            panic!("expected directed message");
        };
        assert_eq!(event.text, "hey <@UBOT>, got a sec?");
    }

    #[test]
    fn plain_channel_chatter_classifies_as_ambient() {
        let event = classify_message(message("C042", "shipping the fix now"), Some("UBOT"));
        assert!(matches!(event, SlackEvent::AmbientMessage(_)));
    }

    #[test]
    fn bot_dispatcher_registers_the_full_handler_set() {
        let dispatcher = default_dispatcher();
        assert_eq!(dispatcher.handler_count(), 5);
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_is_registered() {
        let dispatcher = EventDispatcher::new();
        let envelope = SlackEnvelope {
            envelope_id: "env-7".to_owned(),
            event: SlackEvent::AmbientMessage(message("C1", "hello")),
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn connection_close_dispatches_to_a_reconnect_result() {
        let dispatcher = default_dispatcher();
        let envelope = SlackEnvelope {
            envelope_id: "env-8".to_owned(),
            event: SlackEvent::ConnectionClosed,
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Reconnect);
    }

    #[tokio::test]
    async fn connection_open_is_processed_without_side_effects() {
        let dispatcher = default_dispatcher();
        let envelope = SlackEnvelope {
            envelope_id: "env-9".to_owned(),
            event: SlackEvent::ConnectionOpened,
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
    }

    #[tokio::test]
    async fn unsupported_events_are_ignored_by_the_bot_dispatcher() {
        let dispatcher = default_dispatcher();
        let envelope = SlackEnvelope {
            envelope_id: "env-10".to_owned(),
            event: SlackEvent::Unsupported { event_type: "team_join".to_owned() },
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }
}
