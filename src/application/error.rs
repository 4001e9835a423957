use thiserror::Error;

use crate::domain::{
    CategoryId, GroupTransactionId, NotificationId, SettlementId, SpaceId, SplitError,
    TransactionId, UserId, WalletId,
};

/// Coarse classification callers use to decide how to react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    PermissionDenied,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("Category not found: {0}")]
    CategoryNotFound(CategoryId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Group not found: {0}")]
    GroupNotFound(SpaceId),

    #[error("Group transaction not found: {0}")]
    GroupTransactionNotFound(GroupTransactionId),

    #[error("Settlement not found: {0}")]
    SettlementNotFound(SettlementId),

    #[error("Notification not found: {0}")]
    NotificationNotFound(NotificationId),

    #[error("No friend request between users {sender_id} and {receiver_id}")]
    FriendRequestNotFound { sender_id: UserId, receiver_id: UserId },

    #[error("Users {user_id} and {friend_id} are not friends")]
    NotFriends { user_id: UserId, friend_id: UserId },

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Invalid split: {0}")]
    InvalidSplit(#[from] SplitError),

    #[error("User {user_id} is not a member of group {space_id}")]
    NotGroupMember { space_id: SpaceId, user_id: UserId },

    #[error("User {user_id} is not an admin of group {space_id}")]
    NotGroupAdmin { space_id: SpaceId, user_id: UserId },

    #[error("User {user_id} is not a party to settlement {settlement_id}")]
    NotSettlementParty {
        settlement_id: SettlementId,
        user_id: UserId,
    },

    #[error("User {user_id} does not own category {category_id}")]
    NotCategoryOwner {
        category_id: CategoryId,
        user_id: UserId,
    },

    #[error("Wallet {0} still holds entries")]
    WalletInUse(WalletId),

    #[error("Users {user_id} and {friend_id} are already friends")]
    AlreadyFriends { user_id: UserId, friend_id: UserId },

    #[error("A friend request between users {sender_id} and {receiver_id} is already pending")]
    FriendRequestPending { sender_id: UserId, receiver_id: UserId },

    #[error("Group {0} is closed")]
    GroupClosed(SpaceId),

    #[error("Group {0} is already being confirmed")]
    ConfirmationInProgress(SpaceId),

    #[error("Deadline exceeded while confirming group {0}")]
    DeadlineExceeded(SpaceId),

    #[error("Settlement aborted at group transaction {group_transaction_id}: {source}")]
    SettlementAborted {
        group_transaction_id: GroupTransactionId,
        #[source]
        source: Box<AppError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UserNotFound(_)
            | AppError::WalletNotFound(_)
            | AppError::CategoryNotFound(_)
            | AppError::TransactionNotFound(_)
            | AppError::GroupNotFound(_)
            | AppError::GroupTransactionNotFound(_)
            | AppError::SettlementNotFound(_)
            | AppError::NotificationNotFound(_)
            | AppError::FriendRequestNotFound { .. }
            | AppError::NotFriends { .. } => ErrorKind::NotFound,
            AppError::Validation { .. } | AppError::InvalidSplit(_) => ErrorKind::Validation,
            AppError::NotGroupMember { .. }
            | AppError::NotGroupAdmin { .. }
            | AppError::NotSettlementParty { .. }
            | AppError::NotCategoryOwner { .. } => ErrorKind::PermissionDenied,
            AppError::GroupClosed(_)
            | AppError::ConfirmationInProgress(_)
            | AppError::WalletInUse(_)
            | AppError::AlreadyFriends { .. }
            | AppError::FriendRequestPending { .. } => ErrorKind::Conflict,
            AppError::DeadlineExceeded(_)
            | AppError::SettlementAborted { .. }
            | AppError::Database(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(AppError::UserNotFound(1).kind(), ErrorKind::NotFound);
        assert_eq!(
            AppError::validation("amount", "must be positive").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AppError::NotGroupAdmin {
                space_id: 1,
                user_id: 2
            }
            .kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(AppError::GroupClosed(1).kind(), ErrorKind::Conflict);
        assert_eq!(AppError::WalletInUse(3).kind(), ErrorKind::Conflict);
        assert_eq!(
            AppError::NotFriends {
                user_id: 1,
                friend_id: 2
            }
            .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_aborted_settlement_is_internal_and_keeps_cause() {
        let err = AppError::SettlementAborted {
            group_transaction_id: 7,
            source: Box::new(AppError::WalletNotFound(3)),
        };
        assert_eq!(err.kind(), ErrorKind::Internal);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Wallet not found: 3"));
    }
}
