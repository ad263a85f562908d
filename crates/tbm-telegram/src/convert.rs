//! teloxide update types -> core messaging types.

use teloxide::types::{Message, Update, UpdateKind};

use tbm_core::{
    domain::{ChatId, UserId},
    messaging::types::{IncomingMessage, IncomingUpdate, MessageKind},
};

pub fn convert_update(upd: &Update) -> IncomingUpdate {
    let message = match &upd.kind {
        UpdateKind::Message(msg) => Some(convert_message(msg)),
        _ => None,
    };

    IncomingUpdate {
        update_id: i64::from(upd.id),
        message,
        raw: serde_json::to_value(upd).unwrap_or(serde_json::Value::Null),
    }
}

fn convert_message(msg: &Message) -> IncomingMessage {
    let kind = if msg.text().is_some() {
        MessageKind::Text
    } else if msg.photo().is_some() {
        MessageKind::Image
    } else if msg.document().is_some() {
        MessageKind::File
    } else {
        MessageKind::Other
    };

    IncomingMessage {
        chat_id: ChatId(msg.chat.id.0),
        from: msg.from().map(|u| UserId(u.id.0 as i64)),
        text: msg.text().map(|s| s.to_string()),
        kind,
    }
}
