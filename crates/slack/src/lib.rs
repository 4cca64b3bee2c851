//! Slack Integration - event-driven workday nudge bot
//!
//! This crate provides the Slack interface for gohome:
//! - **Events** (`events`) - envelope decode, message classification, and
//!   the one-handler-per-category dispatcher
//! - **Commands** (`commands`) - `join`/`leave` directed-message vocabulary
//! - **Membership** (`membership`) - room join/leave actuation
//! - **Nudge** (`nudge`) - lateness detection and reply-or-react selection
//! - **Socket** (`socket`) - transport loop with reconnect supervision
//! - **Api** (`api`) - the Web API surface the bot consumes
//!
//! # Architecture
//!
//! ```text
//! Transport frames → decode → EventDispatcher → one handler
//!                                  ├─ directed → CommandInterpreter → MembershipActuator
//!                                  ├─ ambient  → Nudger (workday window → reply or reaction)
//!                                  └─ close    → SocketModeRunner supervisor (rebuild + reconnect)
//! ```
//!
//! # Key Types
//!
//! - `SocketModeRunner` - event loop and connection supervisor
//! - `EventDispatcher` - binds exactly one handler per event category
//! - `CommandInterpreter` - parses the `{join, leave}` vocabulary
//! - `Nudger` - nudges anyone posting outside the workday window

pub mod api;
pub mod commands;
pub mod events;
pub mod membership;
pub mod nudge;
pub mod socket;
