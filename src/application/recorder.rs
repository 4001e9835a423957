use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{
    CategoryId, Cents, LedgerTransaction, NewTransaction, TransactionId, TransactionKind, User,
    UserId, Wallet, WalletId,
};
use crate::storage::LedgerStore;

use super::AppError;
use super::notifier::{self, PendingNotification};

/// A personal ledger entry to write. Missing wallet and category fall back to
/// the user's defaults.
#[derive(Debug, Clone)]
pub struct ExpenseData {
    pub amount_cents: Cents,
    pub wallet_id: Option<WalletId>,
    pub category_id: Option<CategoryId>,
    pub kind: TransactionKind,
    pub date: Option<DateTime<Utc>>,
    pub note: String,
    pub paid: bool,
}

impl ExpenseData {
    pub fn new(amount_cents: Cents) -> Self {
        Self {
            amount_cents,
            wallet_id: None,
            category_id: None,
            kind: TransactionKind::Expense,
            date: None,
            note: String::new(),
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

    pub fn with_kind(mut self, kind: TransactionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

/// Changes to an existing entry. `None` leaves a field as it is;
/// `category_id: Some(None)` clears the category.
#[derive(Debug, Clone, Default)]
pub struct ExpenseUpdate {
    pub amount_cents: Option<Cents>,
    pub wallet_id: Option<WalletId>,
    pub category_id: Option<Option<CategoryId>>,
    pub kind: Option<TransactionKind>,
    pub date: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub sorted: Option<bool>,
    pub paid: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub transaction: LedgerTransaction,
    pub notification: Option<PendingNotification>,
}

/// Write a new entry for `user_id`, raising a budget notification if the
/// expense crosses a threshold.
pub async fn record(
    store: &mut LedgerStore<'_>,
    user_id: UserId,
    data: ExpenseData,
) -> Result<RecordOutcome, AppError> {
    let user = load_user(store, user_id).await?;

    if data.amount_cents <= 0 {
        return Err(AppError::validation("amount", "must be positive"));
    }

    let wallet_id = data.wallet_id.or(user.default_wallet_id).ok_or_else(|| {
        AppError::validation("wallet", "no wallet given and no default wallet set")
    })?;
    let wallet = owned_wallet(store, &user, wallet_id).await?;

    let category_id = data.category_id.or(user.default_category_id);
    ensure_category(store, &user, category_id).await?;

    let check = if data.kind == TransactionKind::Expense {
        Some(notifier::evaluate(store, user.id, category_id, data.amount_cents, None).await?)
    } else {
        None
    };

    let new_tx = NewTransaction::new(data.amount_cents, data.kind, data.date.unwrap_or_else(Utc::now))
        .with_wallet(wallet.id)
        .with_category(category_id)
        .with_note(data.note)
        .with_paid(data.paid);
    let transaction = store.insert_transaction(&new_tx).await?;

    let notification = match &check {
        Some(check) => notifier::raise(store, check).await?,
        None => None,
    };

    debug!(
        user_id = user.id,
        transaction_id = transaction.id,
        amount = transaction.amount_cents,
        notified = notification.is_some(),
        "Ledger entry recorded"
    );

    Ok(RecordOutcome {
        transaction,
        notification,
    })
}

/// Rewrite one of the user's entries. The budget check never counts the
/// entry's previous amount.
pub async fn update(
    store: &mut LedgerStore<'_>,
    user_id: UserId,
    transaction_id: TransactionId,
    changes: ExpenseUpdate,
) -> Result<RecordOutcome, AppError> {
    let user = load_user(store, user_id).await?;

    let mut transaction = store
        .get_transaction(transaction_id)
        .await?
        .ok_or(AppError::TransactionNotFound(transaction_id))?;

    // Entries outside the user's wallets, staging entries included, are not theirs to edit.
    let current_wallet = match transaction.wallet_id {
        Some(id) => store.get_wallet(id).await?,
        None => None,
    };
    if !current_wallet.is_some_and(|w| w.is_owned_by(user.id)) {
        return Err(AppError::TransactionNotFound(transaction_id));
    }

    if let Some(amount) = changes.amount_cents {
        if amount <= 0 {
            return Err(AppError::validation("amount", "must be positive"));
        }
        transaction.amount_cents = amount;
    }
    if let Some(wallet_id) = changes.wallet_id {
        let wallet = owned_wallet(store, &user, wallet_id).await?;
        transaction.wallet_id = Some(wallet.id);
    }
    if let Some(category_id) = changes.category_id {
        ensure_category(store, &user, category_id).await?;
        transaction.category_id = category_id;
    }
    if let Some(kind) = changes.kind {
        transaction.kind = kind;
    }
    if let Some(date) = changes.date {
        transaction.date = date;
    }
    if let Some(note) = changes.note {
        transaction.note = note;
    }
    if let Some(sorted) = changes.sorted {
        transaction.sorted = sorted;
    }
    if let Some(paid) = changes.paid {
        transaction.paid = paid;
    }

    let check = if transaction.kind == TransactionKind::Expense {
        Some(
            notifier::evaluate(
                store,
                user.id,
                transaction.category_id,
                transaction.amount_cents,
                Some(transaction.id),
            )
            .await?,
        )
    } else {
        None
    };

    store.update_transaction(&transaction).await?;

    let notification = match &check {
        Some(check) => notifier::raise(store, check).await?,
        None => None,
    };

    Ok(RecordOutcome {
        transaction,
        notification,
    })
}

async fn load_user(store: &mut LedgerStore<'_>, user_id: UserId) -> Result<User, AppError> {
    store
        .get_user(user_id)
        .await?
        .ok_or(AppError::UserNotFound(user_id))
}

async fn owned_wallet(
    store: &mut LedgerStore<'_>,
    user: &User,
    wallet_id: WalletId,
) -> Result<Wallet, AppError> {
    match store.get_wallet(wallet_id).await? {
        Some(wallet) if wallet.is_owned_by(user.id) => Ok(wallet),
        _ => Err(AppError::WalletNotFound(wallet_id)),
    }
}

/// A category, if given, must exist and be shared or owned by the user.
async fn ensure_category(
    store: &mut LedgerStore<'_>,
    user: &User,
    category_id: Option<CategoryId>,
) -> Result<(), AppError> {
    if let Some(id) = category_id {
        match store.get_category(id).await? {
            Some(category) if category.is_visible_to(user.id) => {}
            _ => return Err(AppError::CategoryNotFound(id)),
        }
    }
    Ok(())
}
