use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, TransactionId, UserId, split_evenly};

pub type SpaceId = i64;
pub type GroupTransactionId = i64;

/// Lifecycle of a shared group. Moves forward only, except that a failed
/// confirmation hands a `Confirming` group back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Open,
    Confirming,
    Closed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Open => "open",
            GroupStatus::Confirming => "confirming",
            GroupStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(GroupStatus::Open),
            "confirming" => Some(GroupStatus::Confirming),
            "closed" => Some(GroupStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpace {
    pub id: SpaceId,
    pub name: String,
    pub description: Option<String>,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
}

impl GroupSpace {
    pub fn is_closed(&self) -> bool {
        self.status == GroupStatus::Closed
    }

    pub fn is_open(&self) -> bool {
        self.status == GroupStatus::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    Member,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Admin => "admin",
            GroupRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(GroupRole::Admin),
            "member" => Some(GroupRole::Member),
            _ => None,
        }
    }
}

impl std::fmt::Display for GroupRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub space_id: SpaceId,
    pub user_id: UserId,
    pub role: GroupRole,
}

impl GroupMember {
    pub fn is_admin(&self) -> bool {
        self.role == GroupRole::Admin
    }
}

/// One member's portion of a shared expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShare {
    pub member_id: UserId,
    pub amount_cents: Cents,
}

impl SplitShare {
    pub fn new(member_id: UserId, amount_cents: Cents) -> Self {
        Self {
            member_id,
            amount_cents,
        }
    }
}

/// A shared expense waiting for the group to be settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTransaction {
    pub id: GroupTransactionId,
    pub space_id: SpaceId,
    /// Staging ledger entry holding the total amount.
    pub transaction_id: TransactionId,
    pub description: String,
    /// Member who fronted the money.
    pub paid_member: UserId,
    /// Empty means an equal split across all current members.
    pub split: Vec<SplitShare>,
}

impl GroupTransaction {
    pub fn has_explicit_split(&self) -> bool {
        !self.split.is_empty()
    }
}

/// Equal division of `amount` across `members`, in ascending user id order.
/// Leftover cents go to the lowest ids first.
pub fn equal_split(amount: Cents, members: &[UserId]) -> Vec<SplitShare> {
    let mut ordered = members.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    let shares = split_evenly(amount, ordered.len());
    ordered
        .into_iter()
        .zip(shares)
        .map(|(member_id, amount_cents)| SplitShare::new(member_id, amount_cents))
        .collect()
}

pub fn split_total(split: &[SplitShare]) -> Cents {
    split.iter().map(|s| s.amount_cents).sum()
}

/// Check an explicit split against the transaction it divides.
///
/// The total must match exactly, every share must be positive, and every
/// member must appear at most once and belong to the group.
pub fn validate_split(
    split: &[SplitShare],
    amount: Cents,
    members: &[UserId],
) -> Result<(), SplitError> {
    let mut seen = HashSet::new();
    for share in split {
        if share.amount_cents <= 0 {
            return Err(SplitError::NonPositiveShare {
                member_id: share.member_id,
                amount_cents: share.amount_cents,
            });
        }
        if !members.contains(&share.member_id) {
            return Err(SplitError::NotAMember(share.member_id));
        }
        if !seen.insert(share.member_id) {
            return Err(SplitError::DuplicateMember(share.member_id));
        }
    }

    let total = split_total(split);
    if total != amount {
        return Err(SplitError::TotalMismatch {
            split_total: total,
            amount,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    TotalMismatch { split_total: Cents, amount: Cents },
    NonPositiveShare { member_id: UserId, amount_cents: Cents },
    DuplicateMember(UserId),
    NotAMember(UserId),
}

impl std::fmt::Display for SplitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitError::TotalMismatch {
                split_total,
                amount,
            } => write!(
                f,
                "split adds up to {} cents but the transaction is {} cents",
                split_total, amount
            ),
            SplitError::NonPositiveShare {
                member_id,
                amount_cents,
            } => write!(
                f,
                "share of member {} must be positive, got {} cents",
                member_id, amount_cents
            ),
            SplitError::DuplicateMember(id) => write!(f, "member {} appears twice", id),
            SplitError::NotAMember(id) => write!(f, "user {} is not a member of the group", id),
        }
    }
}

impl std::error::Error for SplitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            GroupStatus::Open,
            GroupStatus::Confirming,
            GroupStatus::Closed,
        ] {
            assert_eq!(GroupStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_equal_split_orders_by_member_and_spreads_remainder() {
        let shares = equal_split(10000, &[9, 2, 5]);
        assert_eq!(
            shares,
            vec![
                SplitShare::new(2, 3334),
                SplitShare::new(5, 3333),
                SplitShare::new(9, 3333),
            ]
        );
        assert_eq!(split_total(&shares), 10000);
    }

    #[test]
    fn test_equal_split_ignores_duplicate_members() {
        let shares = equal_split(30000, &[1, 1, 2, 3]);
        assert_eq!(shares.len(), 3);
        assert!(shares.iter().all(|s| s.amount_cents == 10000));
    }

    #[test]
    fn test_validate_split_accepts_exact_total() {
        let split = [
            SplitShare::new(1, 3000),
            SplitShare::new(2, 3000),
            SplitShare::new(3, 3000),
        ];
        assert_eq!(validate_split(&split, 9000, &[1, 2, 3]), Ok(()));
    }

    #[test]
    fn test_validate_split_rejects_off_by_one_cent() {
        let split = [SplitShare::new(1, 4500), SplitShare::new(2, 4499)];
        assert_eq!(
            validate_split(&split, 9000, &[1, 2]),
            Err(SplitError::TotalMismatch {
                split_total: 8999,
                amount: 9000
            })
        );
    }

    #[test]
    fn test_validate_split_rejects_outsiders_and_duplicates() {
        let outsider = [SplitShare::new(1, 500), SplitShare::new(4, 500)];
        assert_eq!(
            validate_split(&outsider, 1000, &[1, 2]),
            Err(SplitError::NotAMember(4))
        );

        let duplicate = [SplitShare::new(1, 500), SplitShare::new(1, 500)];
        assert_eq!(
            validate_split(&duplicate, 1000, &[1, 2]),
            Err(SplitError::DuplicateMember(1))
        );

        let negative = [SplitShare::new(1, 1500), SplitShare::new(2, -500)];
        assert!(matches!(
            validate_split(&negative, 1000, &[1, 2]),
            Err(SplitError::NonPositiveShare { member_id: 2, .. })
        ));
    }
}
