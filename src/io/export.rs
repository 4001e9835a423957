use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{
    BudgetNotification, LedgerTransaction, SettlementFilter, SettlementView, TransactionFilter,
    User, UserBudgetLimit, UserId, Wallet, format_cents,
};

/// Everything a single user owns, for a full JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct UserSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub user: User,
    pub wallets: Vec<Wallet>,
    pub transactions: Vec<LedgerTransaction>,
    pub budget_limits: Vec<UserBudgetLimit>,
    pub notifications: Vec<BudgetNotification>,
    pub settlements: Vec<SettlementView>,
}

/// Exporter for converting a user's ledger data to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
    user_id: UserId,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService, user_id: UserId) -> Self {
        Self { service, user_id }
    }

    /// Export settlement records the user is party to as CSV
    pub async fn export_settlements_csv<W: Write>(
        &self,
        writer: W,
        filter: &SettlementFilter,
    ) -> Result<usize> {
        let settlements = self.service.query_settlements(self.user_id, filter).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "group",
            "debtor",
            "creditor",
            "amount",
            "debtor_paid",
            "creditor_paid",
            "created_at",
        ])?;

        for view in &settlements {
            let s = &view.settlement;
            csv_writer.write_record([
                s.id.to_string(),
                view.space_name.clone(),
                view.debtor_name.clone(),
                view.creditor_name.clone(),
                format_cents(s.amount_cents),
                s.debtor_paid.to_string(),
                s.creditor_paid.to_string(),
                s.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(settlements.len())
    }

    /// Export the user's ledger entries as CSV, newest first
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let transactions = self
            .service
            .list_transactions(self.user_id, &TransactionFilter::default())
            .await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id", "date", "wallet", "category", "kind", "amount", "note", "sorted", "paid",
        ])?;

        for tx in &transactions {
            csv_writer.write_record([
                tx.id.to_string(),
                tx.date.to_rfc3339(),
                tx.wallet_id.map(|id| id.to_string()).unwrap_or_default(),
                tx.category_id.map(|id| id.to_string()).unwrap_or_default(),
                tx.kind.as_str().to_string(),
                format_cents(tx.amount_cents),
                tx.note.clone(),
                tx.sorted.to_string(),
                tx.paid.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export all of the user's data as a JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<UserSnapshot> {
        let snapshot = UserSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            user: self.service.get_user(self.user_id).await?,
            wallets: self.service.list_wallets(self.user_id).await?,
            transactions: self
                .service
                .list_transactions(self.user_id, &TransactionFilter::default())
                .await?,
            budget_limits: self.service.list_budget_limits(self.user_id).await?,
            notifications: self.service.list_notifications(self.user_id, false).await?,
            settlements: self
                .service
                .query_settlements(self.user_id, &SettlementFilter::default())
                .await?,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
