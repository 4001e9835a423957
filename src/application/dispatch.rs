use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::domain::{
    BudgetNotification, Cents, FriendEvent, NotificationKind, NotificationPayload, User, UserId,
};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Recipient unreachable: {0}")]
    Unreachable(String),
}

/// Pushed to a user's messaging channel when a budget threshold is crossed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetAlert {
    pub kind: NotificationKind,
    pub category: String,
    pub limit_cents: Cents,
    pub projected_cents: Cents,
    pub text: String,
}

/// Pushed to the other party when a friend request is sent or answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FriendAlert {
    pub event: FriendEvent,
    pub from_user_id: UserId,
    pub from_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Budget(BudgetAlert),
    Friend(FriendAlert),
}

impl OutboundMessage {
    pub fn from_notification(notification: &BudgetNotification) -> Self {
        let (category, limit_cents, projected_cents) = match &notification.payload {
            NotificationPayload::Warning {
                category,
                limit_cents,
                projected_cents,
            }
            | NotificationPayload::Exceed {
                category,
                limit_cents,
                projected_cents,
            } => (category.clone(), *limit_cents, *projected_cents),
        };

        OutboundMessage::Budget(BudgetAlert {
            kind: notification.kind,
            category,
            limit_cents,
            projected_cents,
            text: notification.message.clone(),
        })
    }

    pub fn friend(event: FriendEvent, actor: &User) -> Self {
        OutboundMessage::Friend(FriendAlert {
            event,
            from_user_id: actor.id,
            from_name: actor.name.clone(),
            text: event.message(&actor.name),
        })
    }

    pub fn text(&self) -> &str {
        match self {
            OutboundMessage::Budget(alert) => &alert.text,
            OutboundMessage::Friend(alert) => &alert.text,
        }
    }

    pub fn as_budget(&self) -> Option<&BudgetAlert> {
        match self {
            OutboundMessage::Budget(alert) => Some(alert),
            OutboundMessage::Friend(_) => None,
        }
    }

    pub fn as_friend(&self) -> Option<&FriendAlert> {
        match self {
            OutboundMessage::Friend(alert) => Some(alert),
            OutboundMessage::Budget(_) => None,
        }
    }
}

/// Outbound messaging channel. Failures are reported to the caller, which
/// decides whether they matter.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), DispatchError>;
}

/// Dispatcher that only writes messages to the log.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl MessageDispatcher for LogDispatcher {
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), DispatchError> {
        match message {
            OutboundMessage::Budget(alert) => info!(
                recipient,
                kind = %alert.kind,
                category = %alert.category,
                "{}",
                alert.text
            ),
            OutboundMessage::Friend(alert) => info!(
                recipient,
                event = %alert.event,
                from = alert.from_user_id,
                "{}",
                alert.text
            ),
        }
        Ok(())
    }
}
