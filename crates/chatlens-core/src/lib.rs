//! Chatlens Core
//!
//! Command interpretation and routing: the two-form command codec, the
//! tokenizer, the authorization gate, the dispatcher state machine with
//! debug substitution, and the command handlers.

pub mod auth;
pub mod codec;
pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod message;
