//! In-memory room and participant records.

use super::messages::ConnectionHandle;
use crate::errors::RegistryError;
use chrono::{DateTime, Utc};
use common::protocol::ServerEvent;
use common::types::{ParticipantInfo, RoomId, RoomInfo, RoomSettings, UserId};
use std::collections::HashMap;
use tracing::warn;

/// A member of a room, created on successful join.
#[derive(Debug)]
pub(super) struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub mic_muted: bool,
    pub connection: ConnectionHandle,
}

impl Participant {
    pub(super) fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            mic_muted: self.mic_muted,
        }
    }
}

/// One room: settings plus membership. The password hash lives here and
/// never appears in any wire-visible structure.
#[derive(Debug)]
pub(super) struct Room {
    pub id: RoomId,
    pub created_at: DateTime<Utc>,
    pub settings: RoomSettings,
    pub password_hash: Option<String>,
    pub participants: HashMap<UserId, Participant>,
}

impl Room {
    pub(super) fn new(id: RoomId, settings: RoomSettings, password_hash: Option<String>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            settings,
            password_hash,
            participants: HashMap::new(),
        }
    }

    pub(super) fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.id.clone(),
            settings: self.settings.clone(),
            created_at: self.created_at,
        }
    }

    pub(super) fn snapshot(&self) -> Vec<ParticipantInfo> {
        self.participants.values().map(Participant::info).collect()
    }

    /// Password gate, run before admission. Empty and missing passwords
    /// are treated alike: the caller never learns whether the room even
    /// distinguishes them.
    pub(super) fn verify_password(&self, supplied: Option<&str>) -> Result<(), RegistryError> {
        if !self.settings.password_enabled {
            return Ok(());
        }

        let Some(hash) = self.password_hash.as_deref() else {
            // password_enabled without a hash would be a registry bug.
            return Err(RegistryError::Internal(format!(
                "room {} has password_enabled but no stored hash",
                self.id
            )));
        };

        let supplied = supplied.unwrap_or_default();
        if supplied.is_empty() {
            return Err(RegistryError::AuthRequired {
                room_id: self.id.to_string(),
                hint: self.settings.password_hint.clone(),
            });
        }

        match bcrypt::verify(supplied, hash) {
            Ok(true) => Ok(()),
            Ok(false) => Err(RegistryError::AuthFailed {
                room_id: self.id.to_string(),
            }),
            Err(e) => Err(RegistryError::Internal(format!(
                "password verification failed: {e}"
            ))),
        }
    }

    /// Send `event` to every member except `except`. A closed connection
    /// just means that peer is mid-disconnect; the send is dropped.
    pub(super) fn broadcast(&self, except: Option<&UserId>, event: &ServerEvent) {
        for participant in self.participants.values() {
            if except == Some(&participant.user_id) {
                continue;
            }
            if participant.connection.send(event.clone()).is_err() {
                warn!(
                    target: "registry",
                    room_id = %self.id,
                    user_id = %participant.user_id,
                    "dropping broadcast to closed connection"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn member(id: &str) -> (Participant, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Participant {
                user_id: UserId::from(id),
                display_name: id.to_uppercase(),
                mic_muted: false,
                connection: tx,
            },
            rx,
        )
    }

    #[test]
    fn open_room_admits_any_password() {
        let room = Room::new(RoomId::from("r1"), RoomSettings::default(), None);
        assert!(room.verify_password(None).is_ok());
        assert!(room.verify_password(Some("whatever")).is_ok());
    }

    #[test]
    fn password_gate_orders_required_before_failed() {
        let hash = bcrypt::hash("secret123", crate::config::MIN_BCRYPT_COST).unwrap();
        let settings = RoomSettings {
            password_enabled: true,
            password_hint: Some("the obvious one".to_string()),
            ..RoomSettings::default()
        };
        let room = Room::new(RoomId::from("r1"), settings, Some(hash));

        assert!(matches!(
            room.verify_password(None),
            Err(RegistryError::AuthRequired { hint: Some(h), .. }) if h == "the obvious one"
        ));
        assert!(matches!(
            room.verify_password(Some("")),
            Err(RegistryError::AuthRequired { .. })
        ));
        assert!(matches!(
            room.verify_password(Some("wrong")),
            Err(RegistryError::AuthFailed { .. })
        ));
        assert!(room.verify_password(Some("secret123")).is_ok());
    }

    #[test]
    fn broadcast_skips_excluded_member() {
        let mut room = Room::new(RoomId::from("r1"), RoomSettings::default(), None);
        let (a, mut rx_a) = member("a");
        let (b, mut rx_b) = member("b");
        room.participants.insert(a.user_id.clone(), a);
        room.participants.insert(b.user_id.clone(), b);

        let sender = UserId::from("a");
        room.broadcast(Some(&sender), &ServerEvent::RoomClosed);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::RoomClosed);
    }

    #[test]
    fn broadcast_survives_closed_connections() {
        let mut room = Room::new(RoomId::from("r1"), RoomSettings::default(), None);
        let (a, rx_a) = member("a");
        let (b, mut rx_b) = member("b");
        room.participants.insert(a.user_id.clone(), a);
        room.participants.insert(b.user_id.clone(), b);
        drop(rx_a);

        room.broadcast(None, &ServerEvent::RoomClosed);
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::RoomClosed);
    }
}
