use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

pub type FriendRequestId = i64;

/// A friend request waiting for the receiver to answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: FriendRequestId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// What happened to a friend request, as told to the other party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendEvent {
    Requested,
    Accepted,
    Declined,
}

impl FriendEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendEvent::Requested => "requested",
            FriendEvent::Accepted => "accepted",
            FriendEvent::Declined => "declined",
        }
    }

    /// Message text shown to the recipient; `actor` is whoever acted.
    pub fn message(&self, actor: &str) -> String {
        match self {
            FriendEvent::Requested => format!("{} sent you a friend request", actor),
            FriendEvent::Accepted => format!("{} accepted your friend request", actor),
            FriendEvent::Declined => format!("{} declined your friend request", actor),
        }
    }
}

impl std::fmt::Display for FriendEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_messages() {
        assert_eq!(
            FriendEvent::Requested.message("Alice"),
            "Alice sent you a friend request"
        );
        assert_eq!(
            FriendEvent::Declined.message("Bob"),
            "Bob declined your friend request"
        );
    }
}
