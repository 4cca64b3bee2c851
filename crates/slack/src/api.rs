use async_trait::async_trait;
use thiserror::Error;

/// Message coordinates a reply or reaction is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: String,
    pub ts: String,
}

/// Payload for `reactions.add`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionRequest {
    pub channel_id: String,
    pub timestamp: String,
    pub name: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("api call `{method}` failed: {reason}")]
    Call { method: &'static str, reason: String },
}

/// Posting surface of the Web API: threaded replies, reactions, and the
/// private conversation used for the install greeting.
///
/// One async abstraction regardless of which transport generation backs it;
/// every call is a single suspension point.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn reply(&self, origin: &MessageRef, text: &str) -> Result<(), ApiError>;

    async fn add_reaction(&self, request: ReactionRequest) -> Result<(), ApiError>;

    /// Opens a private conversation and sends each line in order.
    async fn send_private_messages(&self, user_id: &str, lines: &[&str]) -> Result<(), ApiError>;
}

/// `channels.join` / `channels.leave`. The room name is whatever the user
/// supplied; an absent name is forwarded for the remote end to reject.
#[async_trait]
pub trait MembershipApi: Send + Sync {
    async fn join_channel(&self, name: Option<&str>) -> Result<(), ApiError>;

    async fn leave_channel(&self, name: Option<&str>) -> Result<(), ApiError>;
}

/// `users.info`, reduced to the one field the bot cares about.
#[async_trait]
pub trait UserDirectoryApi: Send + Sync {
    /// The author's UTC offset in seconds, when the directory knows it.
    async fn user_tz_offset(&self, user_id: &str) -> Result<Option<i32>, ApiError>;
}

/// Inert client for wiring the bot without a live Web API connection.
#[derive(Default)]
pub struct NoopSlackApi;

#[async_trait]
impl ChatApi for NoopSlackApi {
    async fn reply(&self, _origin: &MessageRef, _text: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn add_reaction(&self, _request: ReactionRequest) -> Result<(), ApiError> {
        Ok(())
    }

    async fn send_private_messages(
        &self,
        _user_id: &str,
        _lines: &[&str],
    ) -> Result<(), ApiError> {
        Ok(())
    }
}

#[async_trait]
impl MembershipApi for NoopSlackApi {
    async fn join_channel(&self, _name: Option<&str>) -> Result<(), ApiError> {
        Ok(())
    }

    async fn leave_channel(&self, _name: Option<&str>) -> Result<(), ApiError> {
        Ok(())
    }
}

#[async_trait]
impl UserDirectoryApi for NoopSlackApi {
    async fn user_tz_offset(&self, _user_id: &str) -> Result<Option<i32>, ApiError> {
        Ok(None)
    }
}
