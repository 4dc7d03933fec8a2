//! Analysis engine: consumes inbound envelopes, dispatches commands, and
//! persists every message with its classification.

use crate::dispatcher::Dispatcher;
use crate::message::{classify, sender_record, to_record};
use chatlens_ipc::{Envelope, EventBus};
use chatlens_storage::{MessageType, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub struct Engine {
    event_bus: EventBus,
    dispatcher: Arc<Dispatcher>,
    db_path: PathBuf,
}

impl Engine {
    pub fn new(event_bus: EventBus, dispatcher: Arc<Dispatcher>, db_path: PathBuf) -> Self {
        Self {
            event_bus,
            dispatcher,
            db_path,
        }
    }

    /// Runs until the inbound channel closes. Every update is independent
    /// and gets its own task; the dispatcher is stateless and re-entrant.
    pub async fn run(&self) {
        let mut receiver = self.event_bus.subscribe();
        info!("Engine started");

        loop {
            match receiver.recv().await {
                Ok(envelope) => {
                    let dispatcher = self.dispatcher.clone();
                    let db_path = self.db_path.clone();
                    tokio::spawn(async move {
                        process_update(dispatcher, db_path, envelope).await;
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Engine stopped: inbound channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Engine lagged; skipped {} updates", skipped);
                }
            }
        }
    }
}

async fn process_update(dispatcher: Arc<Dispatcher>, db_path: PathBuf, envelope: Envelope) {
    let message = &envelope.message;
    let trace_id = &envelope.trace_id;

    let was_command = match &message.text {
        Some(text) => {
            dispatcher
                .dispatch(message.chat_id, message.chat_id, text, message)
                .await
        }
        None => false,
    };

    let message_type = classify(message, was_command);
    if message_type == MessageType::Unknown {
        info!(trace_id, "Message with unknown type: {:?}", message);
    }

    let record = to_record(message, message_type);
    let sender = sender_record(message);
    let persisted = Storage::open(&db_path).and_then(|storage| {
        storage.add_message(&record)?;
        storage.upsert_user(&sender)
    });
    if let Err(e) = persisted {
        error!(trace_id, "Failed to persist message: {:#}", e);
    }
}
