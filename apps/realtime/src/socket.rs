use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use shared::{
    AlertKind, AlertSeverity, ChatMessage, ClientEvent, GeoPoint, LocationUpdate, MessageKind,
    SafetyAlert, ServerEvent,
};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::hub::{chat_room, circle_room, Hub, Presence, SessionHandle, SessionId};
use crate::store::{
    AlertRecord, ChatMessageStore, Directory, LocationHistoryStore, LocationRecord,
    SafetyAlertStore,
};

/// Handler failures surfaced to the acting session as a scoped `error`
/// event. The connection stays open; no other session ever observes them.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Not a member of any circle")]
    NoCircle,
    #[error("Target user ID is required")]
    MissingTarget,
    #[error("Not authorized to request location")]
    NotAuthorized,
    #[error("{message}")]
    Internal {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl HandlerError {
    fn internal(message: &'static str, source: anyhow::Error) -> Self {
        Self::Internal { message, source }
    }
}

pub struct Gateway {
    pub hub: Hub,
    pub presence: Presence,
    directory: Arc<dyn Directory>,
    locations: Arc<dyn LocationHistoryStore>,
    alerts: Arc<dyn SafetyAlertStore>,
    messages: Arc<dyn ChatMessageStore>,
}

impl Gateway {
    pub fn new(
        directory: Arc<dyn Directory>,
        locations: Arc<dyn LocationHistoryStore>,
        alerts: Arc<dyn SafetyAlertStore>,
        messages: Arc<dyn ChatMessageStore>,
    ) -> Self {
        Self {
            hub: Hub::default(),
            presence: Presence::default(),
            directory,
            locations,
            alerts,
            messages,
        }
    }

    /// Registers an authenticated session: circle-room join, presence count,
    /// and a `user:online` broadcast when this is the user's first session.
    pub async fn connect(
        &self,
        user_id: Uuid,
        circle_id: Option<Uuid>,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> SessionId {
        let session_id = self
            .hub
            .register(SessionHandle::new(user_id, circle_id, tx))
            .await;
        let first_session = self.presence.connect(user_id).await;

        if let Some(circle_id) = circle_id {
            let room = circle_room(circle_id);
            self.hub.join(session_id, &room).await;
            tracing::info!(%user_id, %circle_id, "user connected to circle room");
            if first_session {
                self.hub
                    .send_to_room_except(
                        &room,
                        session_id,
                        &ServerEvent::UserOnline {
                            user_id,
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
            }
        } else {
            tracing::info!(%user_id, "user connected without a circle");
        }

        session_id
    }

    /// Runs on every session teardown, graceful or not.
    pub async fn disconnect(&self, session_id: SessionId) {
        let Some(handle) = self.hub.unregister(session_id).await else {
            return;
        };
        let last_session = self.presence.disconnect(handle.user_id).await;
        tracing::info!(user_id = %handle.user_id, "user disconnected");

        if let (true, Some(circle_id)) = (last_session, handle.circle_id) {
            self.hub
                .send_to_room(
                    &circle_room(circle_id),
                    &ServerEvent::UserOffline {
                        user_id: handle.user_id,
                        timestamp: Utc::now(),
                    },
                )
                .await;
        }
    }

    /// Single dispatch point for every inbound event. Failures are logged
    /// and echoed back to the sender only; they never tear down the session.
    pub async fn handle(&self, session_id: SessionId, event: ClientEvent) {
        let Some((user_id, circle_id)) = self.hub.session_info(session_id).await else {
            return;
        };

        let result = match event {
            ClientEvent::LocationUpdate {
                latitude,
                longitude,
                accuracy,
                address,
            } => {
                self.on_location_update(session_id, user_id, circle_id, latitude, longitude, accuracy, address)
                    .await
            }
            ClientEvent::SafetyAlert {
                kind,
                severity,
                message,
                location,
            } => {
                self.on_safety_alert(session_id, user_id, circle_id, kind, severity, message, location)
                    .await
            }
            ClientEvent::LocationRequest { target_user_id } => {
                self.on_location_request(user_id, circle_id, target_user_id)
                    .await
            }
            ClientEvent::Typing { is_typing } => {
                self.on_typing(session_id, user_id, circle_id, is_typing).await
            }
            ClientEvent::ChatJoin { room_id } => {
                self.hub.join(session_id, &chat_room(&room_id)).await;
                tracing::info!(%user_id, %room_id, "joined chat room");
                Ok(())
            }
            ClientEvent::ChatLeave { room_id } => {
                self.hub.leave(session_id, &chat_room(&room_id)).await;
                tracing::info!(%user_id, %room_id, "left chat room");
                Ok(())
            }
            ClientEvent::ChatSend {
                room_id,
                content,
                message_type,
            } => {
                self.on_chat_send(session_id, user_id, room_id, content, message_type)
                    .await
            }
            ClientEvent::ChatTyping { room_id, is_typing } => {
                self.hub
                    .send_to_room_except(
                        &chat_room(&room_id),
                        session_id,
                        &ServerEvent::ChatRoomTyping {
                            room_id,
                            user_id,
                            is_typing,
                        },
                    )
                    .await;
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::error!(%user_id, ?err, "event handler failed");
            self.hub
                .send_to_session(
                    session_id,
                    &ServerEvent::Error {
                        message: err.to_string(),
                    },
                )
                .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_location_update(
        &self,
        session_id: SessionId,
        user_id: Uuid,
        circle_id: Option<Uuid>,
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        address: Option<String>,
    ) -> Result<(), HandlerError> {
        let circle_id = circle_id.ok_or(HandlerError::NoCircle)?;
        let timestamp = Utc::now();

        // Best-effort history append: a storage outage never blocks fan-out.
        let record = LocationRecord {
            user_id,
            circle_id,
            latitude,
            longitude,
            accuracy,
            address: address.clone(),
            recorded_at: timestamp,
        };
        if let Err(err) = self.locations.append(&record).await {
            tracing::error!(%user_id, ?err, "failed to persist location history");
        }

        self.hub
            .send_to_room_except(
                &circle_room(circle_id),
                session_id,
                &ServerEvent::LocationUpdate(LocationUpdate {
                    user_id,
                    latitude,
                    longitude,
                    accuracy,
                    address,
                    timestamp,
                }),
            )
            .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_safety_alert(
        &self,
        _session_id: SessionId,
        user_id: Uuid,
        circle_id: Option<Uuid>,
        kind: AlertKind,
        severity: AlertSeverity,
        message: Option<String>,
        location: Option<GeoPoint>,
    ) -> Result<(), HandlerError> {
        let circle_id = circle_id.ok_or(HandlerError::NoCircle)?;
        let timestamp = Utc::now();
        let message = message.unwrap_or_default();

        let record = AlertRecord {
            user_id,
            circle_id,
            kind,
            severity,
            message: message.clone(),
            location: location.clone(),
            created_at: timestamp,
        };
        let id = match self.alerts.insert(&record).await {
            Ok(id) => id,
            Err(err) => {
                // Synthesized id keeps the broadcast alive through an outage.
                tracing::error!(%user_id, ?err, "failed to persist safety alert");
                timestamp.timestamp_millis().to_string()
            }
        };

        // Alerts go to the whole circle, sender included, so the originator
        // sees the same confirmation as everyone else.
        self.hub
            .send_to_room(
                &circle_room(circle_id),
                &ServerEvent::SafetyAlert(SafetyAlert {
                    id,
                    kind,
                    message,
                    location,
                    severity,
                    user_id,
                    circle_id,
                    timestamp,
                    status: "active".to_string(),
                }),
            )
            .await;
        Ok(())
    }

    async fn on_location_request(
        &self,
        user_id: Uuid,
        circle_id: Option<Uuid>,
        target_user_id: Option<Uuid>,
    ) -> Result<(), HandlerError> {
        let circle_id = circle_id.ok_or(HandlerError::NoCircle)?;
        let target_user_id = target_user_id.ok_or(HandlerError::MissingTarget)?;

        // Both memberships are re-verified against the store on every
        // request; a stale session claim is not trusted.
        let requester_ok = self
            .directory
            .is_circle_member(user_id, circle_id)
            .await
            .map_err(|err| HandlerError::internal("Failed to request location", err))?;
        let target_ok = self
            .directory
            .is_circle_member(target_user_id, circle_id)
            .await
            .map_err(|err| HandlerError::internal("Failed to request location", err))?;
        if !requester_ok || !target_ok {
            return Err(HandlerError::NotAuthorized);
        }

        let from_user_name = match self.directory.find_user(user_id).await {
            Ok(Some(user)) if !user.display_name.is_empty() => user.display_name,
            Ok(_) => "Someone".to_string(),
            Err(err) => {
                tracing::error!(%user_id, ?err, "failed to resolve requester name");
                "Someone".to_string()
            }
        };

        self.hub
            .send_to_user(
                target_user_id,
                &ServerEvent::LocationRequest {
                    from_user_id: user_id,
                    from_user_name,
                    timestamp: Utc::now(),
                },
            )
            .await;
        tracing::info!(%user_id, %target_user_id, "location request delivered");
        Ok(())
    }

    async fn on_typing(
        &self,
        session_id: SessionId,
        user_id: Uuid,
        circle_id: Option<Uuid>,
        is_typing: bool,
    ) -> Result<(), HandlerError> {
        // Matching the original behavior: a typing event without a circle is
        // dropped silently rather than answered with an error.
        let Some(circle_id) = circle_id else {
            return Ok(());
        };
        self.hub
            .send_to_room_except(
                &circle_room(circle_id),
                session_id,
                &ServerEvent::Typing { user_id, is_typing },
            )
            .await;
        Ok(())
    }

    async fn on_chat_send(
        &self,
        session_id: SessionId,
        user_id: Uuid,
        room_id: String,
        content: String,
        message_type: MessageKind,
    ) -> Result<(), HandlerError> {
        let sender_name = match self.directory.find_user(user_id).await {
            Ok(Some(user)) if !user.display_name.is_empty() => user.display_name,
            _ => "Someone".to_string(),
        };

        let message = ChatMessage {
            id: Uuid::new_v4(),
            room_id: room_id.clone(),
            sender_id: user_id,
            sender_name,
            content,
            message_type,
            timestamp: Utc::now(),
        };

        // Unlike location history, a lost chat message is an error the
        // sender must hear about: no insert, no broadcast.
        self.messages
            .insert(&message)
            .await
            .map_err(|err| HandlerError::internal("Failed to send message", err))?;

        self.hub
            .send_to_room_except(
                &chat_room(&room_id),
                session_id,
                &ServerEvent::ChatMessage(message.clone()),
            )
            .await;
        self.hub
            .send_to_session(
                session_id,
                &ServerEvent::ChatMessageSent {
                    id: message.id,
                    timestamp: message.timestamp,
                },
            )
            .await;
        Ok(())
    }
}

/// Pumps one WebSocket connection: inbound frames go through the dispatcher,
/// outbound events drain from the session's mpsc queue. Teardown always runs
/// `disconnect`, whether the peer closed cleanly or the transport died.
pub async fn session_loop(
    mut ws: WebSocket,
    gateway: Arc<Gateway>,
    user_id: Uuid,
    circle_id: Option<Uuid>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session_id = gateway.connect(user_id, circle_id, tx).await;

    loop {
        tokio::select! {
            incoming = ws.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => gateway.handle(session_id, event).await,
                            Err(err) => {
                                tracing::debug!(%user_id, ?err, "ignoring unparseable client event");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(event) => {
                        let Ok(text) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if ws.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    gateway.disconnect(session_id).await;
}
