use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, SpaceId, TransactionId, UserId, is_settled};

pub type SettlementId = i64;

/// A personal ledger entry created while settling a group, kept as evidence
/// on the settlement records that involve its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributingEntry {
    pub transaction_id: TransactionId,
    pub member_id: UserId,
    pub amount_cents: Cents,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPayload {
    pub entries: Vec<ContributingEntry>,
}

/// Closing record of a group: what one member owes another.
///
/// A record whose debtor and creditor are the same member has amount zero
/// and marks a member who came out even.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryGroupTransaction {
    pub id: SettlementId,
    pub space_id: SpaceId,
    pub debtor_id: UserId,
    pub creditor_id: UserId,
    pub amount_cents: Cents,
    pub payload: SettlementPayload,
    pub description: String,
    pub debtor_paid: bool,
    pub creditor_paid: bool,
    pub created_at: DateTime<Utc>,
}

impl SummaryGroupTransaction {
    pub fn is_self_settled(&self) -> bool {
        self.debtor_id == self.creditor_id
    }

    pub fn is_fully_paid(&self) -> bool {
        self.debtor_paid && self.creditor_paid
    }
}

/// Settlement record waiting to be written.
#[derive(Debug, Clone)]
pub struct NewSettlement {
    pub space_id: SpaceId,
    pub debtor_id: UserId,
    pub creditor_id: UserId,
    pub amount_cents: Cents,
    pub payload: SettlementPayload,
    pub description: String,
    pub debtor_paid: bool,
    pub creditor_paid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementRole {
    Debtor,
    Creditor,
}

impl SettlementRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementRole::Debtor => "debtor",
            SettlementRole::Creditor => "creditor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debtor" => Some(SettlementRole::Debtor),
            "creditor" => Some(SettlementRole::Creditor),
            _ => None,
        }
    }
}

/// Which settlement records to return for a user.
#[derive(Debug, Clone, Default)]
pub struct SettlementFilter {
    pub space_id: Option<SpaceId>,
    /// Only records where the user plays this role.
    pub role: Option<SettlementRole>,
    /// Only records where the user's own side is still unpaid.
    pub unpaid_only: bool,
}

/// A settlement record joined with the names a reader needs.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementView {
    pub settlement: SummaryGroupTransaction,
    pub space_name: String,
    pub debtor_name: String,
    pub creditor_name: String,
}

/// Running totals of who paid and who owes across a group's transactions.
#[derive(Debug, Clone, Default)]
pub struct BalanceSheet {
    paid: BTreeMap<UserId, Cents>,
    owed: BTreeMap<UserId, Cents>,
    entries: BTreeMap<UserId, Vec<ContributingEntry>>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The member fronted `amount` for the group.
    pub fn record_payment(&mut self, payer: UserId, amount: Cents) {
        *self.paid.entry(payer).or_insert(0) += amount;
    }

    /// The member is responsible for `amount`, booked as `transaction_id`.
    pub fn record_share(&mut self, member: UserId, amount: Cents, transaction_id: TransactionId) {
        *self.owed.entry(member).or_insert(0) += amount;
        self.entries.entry(member).or_default().push(ContributingEntry {
            transaction_id,
            member_id: member,
            amount_cents: amount,
        });
    }

    pub fn paid(&self, member: UserId) -> Cents {
        self.paid.get(&member).copied().unwrap_or(0)
    }

    pub fn owed(&self, member: UserId) -> Cents {
        self.owed.get(&member).copied().unwrap_or(0)
    }

    pub fn entries_for(&self, member: UserId) -> &[ContributingEntry] {
        self.entries.get(&member).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Net position per participating member: positive means the member is
    /// owed money, negative means they owe.
    pub fn balances(&self) -> BTreeMap<UserId, Cents> {
        let mut balances = BTreeMap::new();
        for member in self.paid.keys().chain(self.owed.keys()) {
            balances.insert(*member, self.paid(*member) - self.owed(*member));
        }
        balances
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementTransfer {
    pub debtor: UserId,
    pub creditor: UserId,
    pub amount_cents: Cents,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementPlan {
    pub transfers: Vec<SettlementTransfer>,
    /// Members whose balance was already zero.
    pub settled: Vec<UserId>,
}

/// Collapse net balances into as few transfers as the greedy method finds.
///
/// Debtors are taken most-indebted first and creditors most-owed first, ties
/// broken by user id, so the result is deterministic. Every step clears at
/// least one party, so N members need at most N-1 transfers.
pub fn minimize_transfers(balances: &BTreeMap<UserId, Cents>) -> Vec<SettlementTransfer> {
    let mut debtors: Vec<(UserId, Cents)> = balances
        .iter()
        .filter(|(_, b)| !is_settled(**b) && **b < 0)
        .map(|(id, b)| (*id, -*b))
        .collect();
    let mut creditors: Vec<(UserId, Cents)> = balances
        .iter()
        .filter(|(_, b)| !is_settled(**b) && **b > 0)
        .map(|(id, b)| (*id, *b))
        .collect();

    debtors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    creditors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut transfers = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < debtors.len() && j < creditors.len() {
        let amount = debtors[i].1.min(creditors[j].1);
        transfers.push(SettlementTransfer {
            debtor: debtors[i].0,
            creditor: creditors[j].0,
            amount_cents: amount,
        });

        debtors[i].1 -= amount;
        creditors[j].1 -= amount;

        if is_settled(debtors[i].1) {
            i += 1;
        }
        if is_settled(creditors[j].1) {
            j += 1;
        }
    }

    transfers
}

pub fn plan_settlement(balances: &BTreeMap<UserId, Cents>) -> SettlementPlan {
    SettlementPlan {
        transfers: minimize_transfers(balances),
        settled: balances
            .iter()
            .filter(|(_, b)| is_settled(**b))
            .map(|(id, _)| *id)
            .collect(),
    }
}
