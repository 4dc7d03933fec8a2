//! Message classification and persistence mapping.

use chatlens_ipc::{InboundMessage, MediaKind};
use chatlens_storage::{MessageRecord, MessageType, UserRecord};

/// Classifies an inbound update for persistence. Text beats media; whether
/// text was a command comes from the dispatcher, not from re-parsing here.
pub fn classify(message: &InboundMessage, was_command: bool) -> MessageType {
    if message.text.is_some() {
        return if was_command {
            MessageType::Command
        } else {
            MessageType::Text
        };
    }
    match &message.media {
        Some(MediaKind::Sticker { .. }) => MessageType::Sticker,
        Some(MediaKind::Gif { .. }) => MessageType::Gif,
        Some(MediaKind::Image { .. }) => MessageType::Image,
        Some(MediaKind::Video { .. }) => MessageType::Video,
        Some(MediaKind::Audio { .. }) => MessageType::Audio,
        Some(MediaKind::Voice { .. }) => MessageType::Voice,
        Some(MediaKind::ChatTitle { .. }) => MessageType::ChatTitle,
        Some(MediaKind::ChatPhoto { .. }) => MessageType::ChatPhoto,
        Some(MediaKind::PinnedMessage { .. }) => MessageType::PinnedMessage,
        None => MessageType::Unknown,
    }
}

fn content(message: &InboundMessage, message_type: MessageType) -> String {
    match (message_type, &message.media) {
        (MessageType::Text | MessageType::Command, _) => {
            message.text.clone().unwrap_or_default()
        }
        (_, Some(MediaKind::Sticker { file_id }))
        | (_, Some(MediaKind::Gif { file_id }))
        | (_, Some(MediaKind::Image { file_id }))
        | (_, Some(MediaKind::Video { file_id }))
        | (_, Some(MediaKind::Audio { file_id }))
        | (_, Some(MediaKind::Voice { file_id }))
        | (_, Some(MediaKind::ChatPhoto { file_id })) => file_id.clone(),
        (_, Some(MediaKind::ChatTitle { title })) => title.clone(),
        (_, Some(MediaKind::PinnedMessage { text, .. })) => {
            text.clone().unwrap_or_default()
        }
        _ => String::new(),
    }
}

/// Builds the persisted record. A pinned-message update carries the pinned
/// message's id/sender in the reply columns, the same way an explicit reply
/// does.
pub fn to_record(message: &InboundMessage, message_type: MessageType) -> MessageRecord {
    let (reply_to_message_id, reply_to_user_id) = if let Some(reply) = &message.reply_to {
        (reply.message_id, reply.user_id)
    } else if let Some(MediaKind::PinnedMessage {
        message_id,
        user_id,
        ..
    }) = &message.media
    {
        (*message_id, *user_id)
    } else {
        (0, 0)
    };

    MessageRecord {
        chat_id: message.chat_id,
        message_id: message.message_id,
        epoch_seconds: message.epoch_seconds,
        user_id: message.from.user_id,
        reply_to_message_id,
        reply_to_user_id,
        content: content(message, message_type),
        message_type,
    }
}

pub fn sender_record(message: &InboundMessage) -> UserRecord {
    UserRecord {
        user_id: message.from.user_id,
        username: message.from.username.clone(),
        first_name: message.from.first_name.clone(),
        last_name: message.from.last_name.clone(),
    }
}
