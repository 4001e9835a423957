use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::{info, warn};

use crate::domain::{
    BudgetNotification, Category, CategoryId, CategoryKind, Cents, FriendEvent, FriendRequest,
    GroupMember, GroupRole, GroupSpace, GroupStatus, GroupTransaction, GroupTransactionId,
    LedgerTransaction, NewTransaction, NewUser, NotificationId, SettlementFilter, SettlementId,
    SettlementRole, SettlementView, SpaceId, SplitShare, SummaryGroupTransaction,
    TransactionFilter, TransactionId, TransactionKind, User, UserBudgetLimit, UserId, Wallet,
    WalletId, WalletType, validate_split,
};
use crate::storage::{LedgerStore, Repository};

use super::dispatch::{LogDispatcher, MessageDispatcher, OutboundMessage};
use super::notifier;
use super::recorder::{self, ExpenseData, ExpenseUpdate, RecordOutcome};
use super::reporting::{
    CashFlowReport, CategoryReport, SummaryRange, build_cash_flow_report, build_category_report,
};
use super::settlement::{SettlementEngine, SettlementResult};
use super::AppError;

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, tests, etc.).
pub struct LedgerService {
    repo: Repository,
    dispatcher: Arc<dyn MessageDispatcher>,
}

/// A shared expense to add to a group.
#[derive(Debug, Clone)]
pub struct GroupExpense {
    pub amount_cents: Cents,
    pub description: String,
    /// Defaults to the acting user.
    pub paid_member: Option<UserId>,
    pub category_id: Option<CategoryId>,
}

/// A group transaction together with its staging entry.
#[derive(Debug, Clone)]
pub struct GroupExpenseEntry {
    pub group_transaction: GroupTransaction,
    pub transaction: LedgerTransaction,
}

impl LedgerService {
    /// Create a new ledger service that pushes notifications through `dispatcher`.
    pub fn new(repo: Repository, dispatcher: Arc<dyn MessageDispatcher>) -> Self {
        Self { repo, dispatcher }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo, Arc::new(LogDispatcher)))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo, Arc::new(LogDispatcher)))
    }

    /// Swap the messaging channel.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn MessageDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    // ========================
    // User operations
    // ========================

    pub async fn create_user(&self, user: NewUser) -> Result<User, AppError> {
        if user.name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }
        if user.email.trim().is_empty() {
            return Err(AppError::validation("email", "must not be empty"));
        }

        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        if store.get_user_by_email(&user.email).await?.is_some() {
            return Err(AppError::validation("email", "already registered"));
        }

        let user = store.insert_user(&user).await?;
        info!(user_id = user.id, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<User, AppError> {
        let mut conn = self.repo.acquire().await?;
        LedgerStore::new(&mut *conn)
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))
    }

    /// Remove a user. Their group memberships stay behind, so shares already
    /// assigned to them are absorbed by the payer when the group is settled.
    pub async fn delete_user(&self, user_id: UserId) -> Result<(), AppError> {
        let mut conn = self.repo.acquire().await?;
        if !LedgerStore::new(&mut *conn).delete_user(user_id).await? {
            return Err(AppError::UserNotFound(user_id));
        }
        info!(user_id, "User deleted");
        Ok(())
    }

    pub async fn set_default_wallet(
        &self,
        user_id: UserId,
        wallet_id: WalletId,
    ) -> Result<(), AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        let user = require_user(&mut store, user_id).await?;

        match store.get_wallet(wallet_id).await? {
            Some(wallet) if wallet.is_owned_by(user.id) => {}
            _ => return Err(AppError::WalletNotFound(wallet_id)),
        }

        store.set_default_wallet(user.id, wallet_id).await?;
        Ok(())
    }

    /// Set or clear the category used when an expense names none.
    pub async fn set_default_category(
        &self,
        user_id: UserId,
        category_id: Option<CategoryId>,
    ) -> Result<(), AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        let user = require_user(&mut store, user_id).await?;

        if let Some(id) = category_id {
            require_visible_category(&mut store, user.id, id).await?;
        }

        store.set_default_category(user.id, category_id).await?;
        Ok(())
    }

    // ========================
    // Wallet and category operations
    // ========================

    /// Create a wallet. A user's first wallet becomes their default.
    pub async fn create_wallet(
        &self,
        user_id: UserId,
        name: &str,
        wallet_type: WalletType,
    ) -> Result<Wallet, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }

        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);
        let user = require_user(&mut store, user_id).await?;

        let wallet = store.insert_wallet(user.id, name, wallet_type).await?;
        if user.default_wallet_id.is_none() {
            store.set_default_wallet(user.id, wallet.id).await?;
        }

        tx.commit().await.context("Failed to commit wallet")?;
        info!(user_id, wallet_id = wallet.id, "Wallet created");
        Ok(wallet)
    }

    pub async fn list_wallets(&self, user_id: UserId) -> Result<Vec<Wallet>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_wallets_for_user(user_id).await?)
    }

    /// Delete one of the user's wallets. A wallet that still holds entries
    /// is refused; if it was the default, the user is left without one.
    pub async fn delete_wallet(&self, user_id: UserId, wallet_id: WalletId) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);
        let user = require_user(&mut store, user_id).await?;

        match store.get_wallet(wallet_id).await? {
            Some(wallet) if wallet.is_owned_by(user.id) => {}
            _ => return Err(AppError::WalletNotFound(wallet_id)),
        }

        let entries = store.count_wallet_entries(wallet_id).await?;
        if entries > 0 {
            warn!(user_id, wallet_id, entries, "Refusing to delete wallet with entries");
            return Err(AppError::WalletInUse(wallet_id));
        }

        store.clear_default_wallet(wallet_id).await?;
        store.delete_wallet(wallet_id).await?;

        tx.commit().await.context("Failed to commit wallet deletion")?;
        info!(user_id, wallet_id, "Wallet deleted");
        Ok(())
    }

    /// Create a category owned by `user_id`, or a shared one when absent.
    pub async fn create_category(
        &self,
        user_id: Option<UserId>,
        name: &str,
        kind: CategoryKind,
    ) -> Result<Category, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }

        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        if let Some(id) = user_id {
            require_user(&mut store, id).await?;
        }
        Ok(store.insert_category(user_id, name, kind).await?)
    }

    /// The user's own categories, then the shared ones.
    pub async fn list_categories(&self, user_id: UserId) -> Result<Vec<Category>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_categories_for_user(user_id).await?)
    }

    /// Delete one of the user's own categories. Entries keep their amounts
    /// but lose the category; budget limits on it are dropped.
    pub async fn delete_category(
        &self,
        user_id: UserId,
        category_id: CategoryId,
    ) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);
        let user = require_user(&mut store, user_id).await?;

        let category = require_visible_category(&mut store, user.id, category_id).await?;
        if category.user_id != Some(user.id) {
            return Err(AppError::NotCategoryOwner {
                category_id,
                user_id,
            });
        }

        store.delete_category(category_id).await?;
        tx.commit().await.context("Failed to commit category deletion")?;
        info!(user_id, category_id, "Category deleted");
        Ok(())
    }

    // ========================
    // Budget operations
    // ========================

    /// Set the spending cap for a category, replacing any previous one.
    pub async fn set_budget_limit(
        &self,
        user_id: UserId,
        category_id: CategoryId,
        limit_cents: Cents,
    ) -> Result<UserBudgetLimit, AppError> {
        if limit_cents < 0 {
            return Err(AppError::validation("limit", "must not be negative"));
        }

        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        require_visible_category(&mut store, user_id, category_id).await?;

        let limit = UserBudgetLimit {
            user_id,
            category_id,
            limit_cents,
        };
        store.upsert_budget_limit(&limit).await?;
        info!(user_id, category_id, limit_cents, "Budget limit set");
        Ok(limit)
    }

    pub async fn list_budget_limits(&self, user_id: UserId) -> Result<Vec<UserBudgetLimit>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_budget_limits(user_id).await?)
    }

    // ========================
    // Ledger entry operations
    // ========================

    /// Record a personal entry. Any budget notification is stored with the
    /// entry and pushed once both are committed.
    pub async fn record_expense(
        &self,
        user_id: UserId,
        data: ExpenseData,
    ) -> Result<RecordOutcome, AppError> {
        info!(user_id, amount = data.amount_cents, kind = %data.kind, "Recording entry");

        let mut tx = self.repo.begin().await?;
        let outcome = recorder::record(&mut LedgerStore::new(&mut *tx), user_id, data).await?;
        tx.commit().await.context("Failed to commit entry")?;

        notifier::dispatch_all(self.dispatcher.as_ref(), outcome.notification.as_slice()).await;
        Ok(outcome)
    }

    pub async fn update_expense(
        &self,
        user_id: UserId,
        transaction_id: TransactionId,
        changes: ExpenseUpdate,
    ) -> Result<RecordOutcome, AppError> {
        info!(user_id, transaction_id, "Updating entry");

        let mut tx = self.repo.begin().await?;
        let outcome =
            recorder::update(&mut LedgerStore::new(&mut *tx), user_id, transaction_id, changes)
                .await?;
        tx.commit().await.context("Failed to commit entry")?;

        notifier::dispatch_all(self.dispatcher.as_ref(), outcome.notification.as_slice()).await;
        Ok(outcome)
    }

    /// The user's entries across all of their wallets, newest first.
    pub async fn list_transactions(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_transactions_for_user(user_id, filter).await?)
    }

    // ========================
    // Notification operations
    // ========================

    pub async fn list_notifications(
        &self,
        user_id: UserId,
        unread_only: bool,
    ) -> Result<Vec<BudgetNotification>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_notifications(user_id, unread_only).await?)
    }

    pub async fn mark_notification_read(
        &self,
        user_id: UserId,
        notification_id: NotificationId,
    ) -> Result<(), AppError> {
        let mut conn = self.repo.acquire().await?;
        if !LedgerStore::new(&mut *conn)
            .mark_notification_read(user_id, notification_id)
            .await?
        {
            return Err(AppError::NotificationNotFound(notification_id));
        }
        Ok(())
    }

    // ========================
    // Group operations
    // ========================

    /// Create a group with the acting user as admin. Invitees that do not
    /// exist are skipped.
    pub async fn create_group(
        &self,
        acting_user_id: UserId,
        name: &str,
        description: Option<&str>,
        invitees: &[UserId],
    ) -> Result<GroupSpace, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }

        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);
        require_user(&mut store, acting_user_id).await?;

        let space = store.insert_group(name, description).await?;
        store
            .add_group_member(space.id, acting_user_id, GroupRole::Admin)
            .await?;

        let found = store.list_users_by_ids(invitees).await?;
        for invitee in invitees {
            if *invitee == acting_user_id {
                continue;
            }
            if found.iter().any(|u| u.id == *invitee) {
                store
                    .add_group_member(space.id, *invitee, GroupRole::Member)
                    .await?;
            } else {
                warn!(space_id = space.id, user_id = invitee, "Skipping unknown invitee");
            }
        }

        tx.commit().await.context("Failed to commit group")?;
        info!(space_id = space.id, acting_user_id, "Group created");
        Ok(space)
    }

    /// Admin-only. Adding an existing member is a no-op.
    pub async fn add_group_member(
        &self,
        acting_user_id: UserId,
        space_id: SpaceId,
        user_id: UserId,
    ) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);

        let space = require_group(&mut store, space_id).await?;
        require_admin(&mut store, space_id, acting_user_id).await?;
        require_open(&space)?;
        require_user(&mut store, user_id).await?;

        if !store
            .add_group_member(space_id, user_id, GroupRole::Member)
            .await?
        {
            // Either already a member, or the group left the open state.
            require_open(&require_group(&mut store, space_id).await?)?;
        }

        tx.commit().await.context("Failed to commit group member")?;
        info!(space_id, user_id, "Member added");
        Ok(())
    }

    pub async fn list_groups_for_user(&self, user_id: UserId) -> Result<Vec<GroupSpace>, AppError> {
        let mut conn = self.repo.acquire().await?;
        Ok(LedgerStore::new(&mut *conn)
            .list_groups_for_user(user_id)
            .await?)
    }

    /// Member-only.
    pub async fn list_group_members(
        &self,
        acting_user_id: UserId,
        space_id: SpaceId,
    ) -> Result<Vec<GroupMember>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_group(&mut store, space_id).await?;
        require_member(&mut store, space_id, acting_user_id).await?;
        Ok(store.list_group_members(space_id).await?)
    }

    /// Add a shared expense to an open group. The money sits in a staging
    /// entry outside any wallet until the group is confirmed.
    pub async fn add_group_expense(
        &self,
        acting_user_id: UserId,
        space_id: SpaceId,
        expense: GroupExpense,
    ) -> Result<GroupTransaction, AppError> {
        if expense.amount_cents <= 0 {
            return Err(AppError::validation("amount", "must be positive"));
        }
        if expense.description.trim().is_empty() {
            return Err(AppError::validation("description", "must not be empty"));
        }

        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);

        let space = require_group(&mut store, space_id).await?;
        require_member(&mut store, space_id, acting_user_id).await?;
        require_open(&space)?;

        let payer = expense.paid_member.unwrap_or(acting_user_id);
        require_member(&mut store, space_id, payer).await?;
        if let Some(category_id) = expense.category_id {
            require_visible_category(&mut store, acting_user_id, category_id).await?;
        }

        let staging = store
            .insert_transaction(
                &NewTransaction::new(expense.amount_cents, TransactionKind::Expense, chrono::Utc::now())
                    .with_category(expense.category_id)
                    .with_note(expense.description.clone())
                    .with_paid(false),
            )
            .await?;
        let Some(group_tx) = store
            .insert_group_transaction(space_id, staging.id, &expense.description, payer)
            .await?
        else {
            return Err(left_open_state(&mut store, space_id).await);
        };

        tx.commit().await.context("Failed to commit group expense")?;
        info!(
            space_id,
            group_transaction_id = group_tx.id,
            payer,
            amount = expense.amount_cents,
            "Group expense added"
        );
        Ok(group_tx)
    }

    /// Member-only. Pending shared expenses in creation order.
    pub async fn list_group_transactions(
        &self,
        acting_user_id: UserId,
        space_id: SpaceId,
    ) -> Result<Vec<GroupExpenseEntry>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_group(&mut store, space_id).await?;
        require_member(&mut store, space_id, acting_user_id).await?;

        let mut entries = Vec::new();
        for group_transaction in store.list_group_transactions(space_id).await? {
            let transaction = store
                .get_transaction(group_transaction.transaction_id)
                .await?
                .ok_or(AppError::TransactionNotFound(group_transaction.transaction_id))?;
            entries.push(GroupExpenseEntry {
                group_transaction,
                transaction,
            });
        }
        Ok(entries)
    }

    /// Replace the split of a shared expense. An empty split goes back to
    /// dividing equally among all members.
    pub async fn assign_split(
        &self,
        group_transaction_id: GroupTransactionId,
        acting_user_id: UserId,
        split: Vec<SplitShare>,
    ) -> Result<GroupTransaction, AppError> {
        info!(group_transaction_id, acting_user_id, shares = split.len(), "Assigning split");

        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);

        let mut group_tx = store
            .get_group_transaction(group_transaction_id)
            .await?
            .ok_or(AppError::GroupTransactionNotFound(group_transaction_id))?;
        let space = require_group(&mut store, group_tx.space_id).await?;
        require_admin(&mut store, space.id, acting_user_id).await?;
        require_open(&space)?;

        if !split.is_empty() {
            let staging = store
                .get_transaction(group_tx.transaction_id)
                .await?
                .ok_or(AppError::TransactionNotFound(group_tx.transaction_id))?;
            let members: Vec<UserId> = store
                .list_group_members(space.id)
                .await?
                .into_iter()
                .map(|m| m.user_id)
                .collect();

            if let Err(e) = validate_split(&split, staging.amount_cents, &members) {
                warn!(group_transaction_id, error = %e, "Split rejected");
                return Err(e.into());
            }
        }

        if !store.update_group_split(group_tx.id, &split).await? {
            warn!(group_transaction_id, "Group left the open state before the split was saved");
            return Err(left_open_state(&mut store, space.id).await);
        }

        tx.commit().await.context("Failed to commit split")?;
        group_tx.split = split;
        Ok(group_tx)
    }

    /// Settle and close a group. See [`SettlementEngine::confirm`].
    pub async fn confirm_group(
        &self,
        acting_user_id: UserId,
        space_id: SpaceId,
        deadline: Option<Instant>,
    ) -> Result<SettlementResult, AppError> {
        info!(space_id, acting_user_id, "Confirming group");

        let confirmed = SettlementEngine::new(&self.repo)
            .confirm(acting_user_id, space_id, deadline)
            .await?;

        info!(
            space_id,
            settlements = confirmed.result.settlements.len(),
            notifications = confirmed.notifications.len(),
            "Group closed"
        );
        notifier::dispatch_all(self.dispatcher.as_ref(), &confirmed.notifications).await;
        Ok(confirmed.result)
    }

    // ========================
    // Settlement operations
    // ========================

    pub async fn query_settlements(
        &self,
        user_id: UserId,
        filter: &SettlementFilter,
    ) -> Result<Vec<SettlementView>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_settlements_for_user(user_id, filter).await?)
    }

    /// Mark the acting user's own side of a settlement as paid. Marking a
    /// side that is already paid changes nothing.
    pub async fn mark_settlement_paid(
        &self,
        acting_user_id: UserId,
        settlement_id: SettlementId,
    ) -> Result<SummaryGroupTransaction, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);

        let mut settlement = store
            .get_settlement(settlement_id)
            .await?
            .ok_or(AppError::SettlementNotFound(settlement_id))?;

        let role = if acting_user_id == settlement.debtor_id {
            SettlementRole::Debtor
        } else if acting_user_id == settlement.creditor_id {
            SettlementRole::Creditor
        } else {
            return Err(AppError::NotSettlementParty {
                settlement_id,
                user_id: acting_user_id,
            });
        };

        store.set_settlement_paid(settlement_id, role).await?;
        match role {
            SettlementRole::Debtor => settlement.debtor_paid = true,
            SettlementRole::Creditor => settlement.creditor_paid = true,
        }

        info!(settlement_id, acting_user_id, role = role.as_str(), "Settlement marked paid");
        Ok(settlement)
    }

    // ========================
    // Friend operations
    // ========================

    /// Ask `receiver_id` to become a friend. The receiver is told through the
    /// messaging channel once the request is stored.
    pub async fn send_friend_request(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<FriendRequest, AppError> {
        if sender_id == receiver_id {
            return Err(AppError::validation("friend", "cannot befriend yourself"));
        }

        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);
        let sender = require_user(&mut store, sender_id).await?;
        let receiver = require_user(&mut store, receiver_id).await?;

        if store.are_friends(sender.id, receiver.id).await? {
            return Err(AppError::AlreadyFriends {
                user_id: sender.id,
                friend_id: receiver.id,
            });
        }
        if let Some(pending) = store.find_friend_request_between(sender.id, receiver.id).await? {
            return Err(AppError::FriendRequestPending {
                sender_id: pending.sender_id,
                receiver_id: pending.receiver_id,
            });
        }

        let request = store.insert_friend_request(sender.id, receiver.id).await?;
        tx.commit().await.context("Failed to commit friend request")?;
        info!(sender_id, receiver_id, "Friend request sent");

        notifier::push(
            self.dispatcher.as_ref(),
            receiver.id,
            receiver.external_id.as_deref(),
            OutboundMessage::friend(FriendEvent::Requested, &sender),
        )
        .await;
        Ok(request)
    }

    /// Requests waiting for the user to answer.
    pub async fn list_friend_requests(&self, user_id: UserId) -> Result<Vec<FriendRequest>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_incoming_friend_requests(user_id).await?)
    }

    /// Accept the request `sender_id` sent to `receiver_id`; both become
    /// friends of each other.
    pub async fn accept_friend_request(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
    ) -> Result<(), AppError> {
        self.answer_friend_request(receiver_id, sender_id, FriendEvent::Accepted)
            .await
    }

    pub async fn decline_friend_request(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
    ) -> Result<(), AppError> {
        self.answer_friend_request(receiver_id, sender_id, FriendEvent::Declined)
            .await
    }

    async fn answer_friend_request(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
        answer: FriendEvent,
    ) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        let mut store = LedgerStore::new(&mut *tx);
        let receiver = require_user(&mut store, receiver_id).await?;
        let sender = require_user(&mut store, sender_id).await?;

        // Only the receiver can answer.
        let request = store
            .find_friend_request_between(sender.id, receiver.id)
            .await?
            .filter(|r| r.sender_id == sender.id && r.receiver_id == receiver.id)
            .ok_or(AppError::FriendRequestNotFound {
                sender_id,
                receiver_id,
            })?;

        store.delete_friend_request(request.id).await?;
        if answer == FriendEvent::Accepted {
            store.insert_friendship(sender.id, receiver.id).await?;
        }

        tx.commit().await.context("Failed to commit friend request answer")?;
        info!(sender_id, receiver_id, answer = %answer, "Friend request answered");

        notifier::push(
            self.dispatcher.as_ref(),
            sender.id,
            sender.external_id.as_deref(),
            OutboundMessage::friend(answer, &receiver),
        )
        .await;
        Ok(())
    }

    pub async fn list_friends(&self, user_id: UserId) -> Result<Vec<User>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;
        Ok(store.list_friends(user_id).await?)
    }

    /// End a friendship on both sides.
    pub async fn remove_friend(&self, user_id: UserId, friend_id: UserId) -> Result<(), AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        require_user(&mut store, user_id).await?;

        if !store.delete_friendship(user_id, friend_id).await? {
            return Err(AppError::NotFriends { user_id, friend_id });
        }
        info!(user_id, friend_id, "Friend removed");
        Ok(())
    }

    // ========================
    // Summary operations
    // ========================

    /// Expense totals per category over the range, largest first.
    pub async fn category_summary(
        &self,
        user_id: UserId,
        range: SummaryRange,
    ) -> Result<CategoryReport, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        let entries = entries_in_range(&mut store, user_id, &range).await?;
        let categories = store.list_categories_for_user(user_id).await?;
        Ok(build_category_report(&range, &entries, &categories))
    }

    /// Income and expense per day, week or month across the range.
    pub async fn cash_flow_summary(
        &self,
        user_id: UserId,
        range: SummaryRange,
    ) -> Result<CashFlowReport, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut store = LedgerStore::new(&mut *conn);
        let entries = entries_in_range(&mut store, user_id, &range).await?;
        Ok(build_cash_flow_report(&range, &entries))
    }
}

async fn entries_in_range(
    store: &mut LedgerStore<'_>,
    user_id: UserId,
    range: &SummaryRange,
) -> Result<Vec<LedgerTransaction>, AppError> {
    if range.from > range.to {
        return Err(AppError::validation("range", "start is after end"));
    }
    require_user(store, user_id).await?;

    let filter = TransactionFilter {
        from_date: Some(range.from),
        to_date: Some(range.to),
        ..Default::default()
    };
    Ok(store.list_transactions_for_user(user_id, &filter).await?)
}

async fn require_user(store: &mut LedgerStore<'_>, user_id: UserId) -> Result<User, AppError> {
    store
        .get_user(user_id)
        .await?
        .ok_or(AppError::UserNotFound(user_id))
}

async fn require_group(store: &mut LedgerStore<'_>, space_id: SpaceId) -> Result<GroupSpace, AppError> {
    store
        .get_group(space_id)
        .await?
        .ok_or(AppError::GroupNotFound(space_id))
}

async fn require_member(
    store: &mut LedgerStore<'_>,
    space_id: SpaceId,
    user_id: UserId,
) -> Result<GroupMember, AppError> {
    store
        .get_group_member(space_id, user_id)
        .await?
        .ok_or(AppError::NotGroupMember { space_id, user_id })
}

async fn require_admin(
    store: &mut LedgerStore<'_>,
    space_id: SpaceId,
    user_id: UserId,
) -> Result<GroupMember, AppError> {
    let member = require_member(store, space_id, user_id).await?;
    if !member.is_admin() {
        return Err(AppError::NotGroupAdmin { space_id, user_id });
    }
    Ok(member)
}

async fn require_visible_category(
    store: &mut LedgerStore<'_>,
    user_id: UserId,
    category_id: CategoryId,
) -> Result<Category, AppError> {
    match store.get_category(category_id).await? {
        Some(category) if category.is_visible_to(user_id) => Ok(category),
        _ => Err(AppError::CategoryNotFound(category_id)),
    }
}

/// The error for a guarded group write that matched nothing.
async fn left_open_state(store: &mut LedgerStore<'_>, space_id: SpaceId) -> AppError {
    match store.get_group(space_id).await {
        Ok(Some(space)) if space.status == GroupStatus::Confirming => {
            AppError::ConfirmationInProgress(space_id)
        }
        Ok(Some(_)) => AppError::GroupClosed(space_id),
        Ok(None) => AppError::GroupNotFound(space_id),
        Err(e) => AppError::Database(e),
    }
}

fn require_open(space: &GroupSpace) -> Result<(), AppError> {
    match space.status {
        GroupStatus::Open => Ok(()),
        GroupStatus::Confirming => Err(AppError::ConfirmationInProgress(space.id)),
        GroupStatus::Closed => Err(AppError::GroupClosed(space.id)),
    }
}
