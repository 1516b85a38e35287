use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Emergency,
    CheckIn,
    LocationAlert,
    #[default]
    Custom,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::CheckIn => "check_in",
            Self::LocationAlert => "location_alert",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    #[default]
    Urgent,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Location,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Location => "location",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub user_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub location: Option<GeoPoint>,
    pub severity: AlertSeverity,
    pub user_id: Uuid,
    pub circle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageKind,
    pub timestamp: DateTime<Utc>,
}

/// Everything a client may send over the socket. Closed union: adding an
/// event means adding a variant and covering it in the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    #[serde(rename = "location:update", rename_all = "camelCase")]
    LocationUpdate {
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        address: Option<String>,
    },
    #[serde(rename = "safety:alert", rename_all = "camelCase")]
    SafetyAlert {
        #[serde(rename = "type", default)]
        kind: AlertKind,
        #[serde(default)]
        severity: AlertSeverity,
        message: Option<String>,
        location: Option<GeoPoint>,
    },
    #[serde(rename = "location:request", rename_all = "camelCase")]
    LocationRequest { target_user_id: Option<Uuid> },
    #[serde(rename = "chat:typing", rename_all = "camelCase")]
    Typing { is_typing: bool },
    #[serde(rename = "chat:join", rename_all = "camelCase")]
    ChatJoin { room_id: String },
    #[serde(rename = "chat:leave", rename_all = "camelCase")]
    ChatLeave { room_id: String },
    #[serde(rename = "chat:send_message", rename_all = "camelCase")]
    ChatSend {
        room_id: String,
        content: String,
        #[serde(default)]
        message_type: MessageKind,
    },
    #[serde(rename = "chat:room_typing", rename_all = "camelCase")]
    ChatTyping { room_id: String, is_typing: bool },
}

/// Everything the server may push to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    #[serde(rename = "location:update")]
    LocationUpdate(LocationUpdate),
    #[serde(rename = "safety:alert")]
    SafetyAlert(SafetyAlert),
    #[serde(rename = "location_request", rename_all = "camelCase")]
    LocationRequest {
        from_user_id: Uuid,
        from_user_name: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "chat:typing", rename_all = "camelCase")]
    Typing { user_id: Uuid, is_typing: bool },
    #[serde(rename = "chat:message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "chat:message_sent", rename_all = "camelCase")]
    ChatMessageSent { id: Uuid, timestamp: DateTime<Utc> },
    #[serde(rename = "chat:room_typing", rename_all = "camelCase")]
    ChatRoomTyping {
        room_id: String,
        user_id: Uuid,
        is_typing: bool,
    },
    #[serde(rename = "user:online", rename_all = "camelCase")]
    UserOnline {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "user:offline", rename_all = "camelCase")]
    UserOffline {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
