use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::{RideView, UserSummary};

/// Chat payload as submitted by a client. The server never trusts senderId
/// blindly; it is checked against the connection's claims before persisting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSend {
    pub ride_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: String,
}

/// Chat payload after the ledger write, enriched with the persisted id,
/// sender display name and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub receiver_id: Uuid,
    pub text: String,
    pub created_at: DateTime<FixedOffset>,
}

/// Events sent from client to server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Subscribe to a ride's public room
    JoinRoom { room_id: String },

    /// Driver subscribes to their private notification room; idempotent
    JoinDriverRoom { driver_id: Uuid },

    /// Both ends compute the same deterministic pairwise room and subscribe
    JoinPrivateChat {
        ride_id: Uuid,
        user_id1: Uuid,
        user_id2: Uuid,
    },

    /// Public chat scoped to the ride room
    ChatMessage(ChatSend),

    /// 1:1 chat scoped to the pairwise room
    PrivateMessage(ChatSend),
}

/// Events sent from server to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ChatMessage(ChatBroadcast),

    PrivateMessage(ChatBroadcast),

    /// Booking confirmation for the driver's private room
    RideBooked {
        ride_id: Uuid,
        by_user_id: Uuid,
        driver_id: Uuid,
        message: String,
        ride: RideView,
    },

    /// Ride creation/modification notice for the driver's private room
    RideUpdate {
        driver_id: Uuid,
        action: String,
        ride: RideView,
    },

    /// Passenger-list refresh for the ride's public room; display names only
    PassengerUpdated {
        ride_id: Uuid,
        passengers: Vec<UserSummary>,
    },

    /// Delivered to the originating connection only, never broadcast
    MessageError { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let json = r#"{
            "event": "join_private_chat",
            "data": {
                "rideId": "5f0c8e4e-0000-4000-8000-000000000001",
                "userId1": "5f0c8e4e-0000-4000-8000-000000000002",
                "userId2": "5f0c8e4e-0000-4000-8000-000000000003"
            }
        }"#;

        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ClientEvent::JoinPrivateChat { .. }));
    }

    #[test]
    fn test_server_event_uses_snake_case_names_and_camel_case_fields() {
        let event = ServerEvent::PassengerUpdated {
            ride_id: Uuid::new_v4(),
            passengers: vec![],
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "passenger_updated");
        assert!(value["data"].get("rideId").is_some());
    }

    #[test]
    fn test_chat_broadcast_round_trip() {
        let broadcast = ChatBroadcast {
            id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_name: "Asha".to_string(),
            receiver_id: Uuid::new_v4(),
            text: "Reaching the gate in 5".to_string(),
            created_at: chrono::Utc::now().fixed_offset(),
        };

        let wire = serde_json::to_string(&ServerEvent::ChatMessage(broadcast.clone())).unwrap();
        assert!(wire.contains("\"chat_message\""));
        assert!(wire.contains("\"senderName\""));

        let back: ServerEvent = serde_json::from_str(&wire).unwrap();
        match back {
            ServerEvent::ChatMessage(b) => assert_eq!(b.id, broadcast.id),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
