use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CategoryId, Cents, WalletId};

pub type TransactionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
    InitialBalance,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
            TransactionKind::InitialBalance => "initial_balance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "income" => Some(TransactionKind::Income),
            "expense" => Some(TransactionKind::Expense),
            "initial_balance" | "initial" => Some(TransactionKind::InitialBalance),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single entry in a user's ledger.
///
/// Staging entries for shared group expenses carry no wallet: they belong to
/// the group until it is settled, at which point they are replaced by one
/// personal entry per member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub wallet_id: Option<WalletId>,
    pub category_id: Option<CategoryId>,
    /// Always positive; the kind says which way the money moved.
    pub amount_cents: Cents,
    pub kind: TransactionKind,
    pub date: DateTime<Utc>,
    pub note: String,
    pub sorted: bool,
    /// Cleared on entries still waiting for settlement.
    pub paid: bool,
}

/// A ledger transaction that has not been written yet. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub wallet_id: Option<WalletId>,
    pub category_id: Option<CategoryId>,
    pub amount_cents: Cents,
    pub kind: TransactionKind,
    pub date: DateTime<Utc>,
    pub note: String,
    pub sorted: bool,
    pub paid: bool,
}

impl NewTransaction {
    pub fn new(amount_cents: Cents, kind: TransactionKind, date: DateTime<Utc>) -> Self {
        Self {
            wallet_id: None,
            category_id: None,
            amount_cents,
            kind,
            date,
            note: String::new(),
            sorted: false,
            paid: true,
        }
    }

    pub fn with_wallet(mut self, wallet_id: WalletId) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn with_category(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_paid(mut self, paid: bool) -> Self {
        self.paid = paid;
        self
    }

    pub fn into_transaction(self, id: TransactionId) -> LedgerTransaction {
        LedgerTransaction {
            id,
            wallet_id: self.wallet_id,
            category_id: self.category_id,
            amount_cents: self.amount_cents,
            kind: self.kind,
            date: self.date,
            note: self.note,
            sorted: self.sorted,
            paid: self.paid,
        }
    }
}

/// Narrowing options for listing a user's ledger entries.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub wallet_id: Option<WalletId>,
    pub category_id: Option<CategoryId>,
    pub kind: Option<TransactionKind>,
    pub min_amount: Option<Cents>,
    pub max_amount: Option<Cents>,
    /// Inclusive bounds on the entry date.
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            TransactionKind::Income,
            TransactionKind::Expense,
            TransactionKind::InitialBalance,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(
            TransactionKind::from_str("initial"),
            Some(TransactionKind::InitialBalance)
        );
    }

    #[test]
    fn test_new_transaction_builder() {
        let now = Utc::now();
        let tx = NewTransaction::new(2500, TransactionKind::Expense, now)
            .with_wallet(3)
            .with_category(Some(7))
            .with_note("Lunch")
            .with_paid(false)
            .into_transaction(42);

        assert_eq!(tx.id, 42);
        assert_eq!(tx.wallet_id, Some(3));
        assert_eq!(tx.category_id, Some(7));
        assert_eq!(tx.note, "Lunch");
        assert!(!tx.paid);
        assert!(!tx.sorted);
    }
}
