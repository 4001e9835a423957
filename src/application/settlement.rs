use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::domain::{
    BalanceSheet, Cents, GroupSpace, GroupStatus, GroupTransaction, LedgerTransaction,
    NewSettlement, SettlementPayload, SpaceId, SplitShare, SummaryGroupTransaction, UserId,
    equal_split, plan_settlement,
};
use crate::storage::{LedgerStore, Repository};

use super::AppError;
use super::notifier::PendingNotification;
use super::recorder::{self, ExpenseData};

/// What a confirmed group produced.
#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub space: GroupSpace,
    /// Net position per participating member at confirmation time.
    pub balances: BTreeMap<UserId, Cents>,
    pub settlements: Vec<SummaryGroupTransaction>,
    /// Personal entries written for each member share.
    pub member_entries: Vec<LedgerTransaction>,
    /// Split members that no longer exist; the payer absorbed their share.
    pub skipped_members: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub struct ConfirmedSettlement {
    pub result: SettlementResult,
    pub notifications: Vec<PendingNotification>,
}

/// Closes a group: turns its shared expenses into personal entries and
/// records who owes whom.
pub struct SettlementEngine<'r> {
    repo: &'r Repository,
}

#[derive(Default)]
struct Progress {
    sheet: BalanceSheet,
    member_entries: Vec<LedgerTransaction>,
    notifications: Vec<PendingNotification>,
    skipped_members: Vec<UserId>,
}

impl<'r> SettlementEngine<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }

    /// Confirm the group on behalf of `acting_user_id`, an admin.
    ///
    /// The group is claimed first, so a concurrent confirmation fails with a
    /// conflict. Everything after the claim runs in one transaction; if any
    /// of it fails the transaction is rolled back and the group is reopened.
    pub async fn confirm(
        &self,
        acting_user_id: UserId,
        space_id: SpaceId,
        deadline: Option<Instant>,
    ) -> Result<ConfirmedSettlement, AppError> {
        let space = {
            let mut conn = self.repo.acquire().await?;
            let mut store = LedgerStore::new(&mut *conn);

            let space = store
                .get_group(space_id)
                .await?
                .ok_or(AppError::GroupNotFound(space_id))?;

            match store.get_group_member(space_id, acting_user_id).await? {
                Some(member) if member.is_admin() => {}
                Some(_) => {
                    return Err(AppError::NotGroupAdmin {
                        space_id,
                        user_id: acting_user_id,
                    });
                }
                None => {
                    return Err(AppError::NotGroupMember {
                        space_id,
                        user_id: acting_user_id,
                    });
                }
            }

            match space.status {
                GroupStatus::Closed => return Err(AppError::GroupClosed(space_id)),
                GroupStatus::Confirming => return Err(AppError::ConfirmationInProgress(space_id)),
                GroupStatus::Open => {}
            }

            if !store.claim_group_for_confirmation(space_id).await? {
                warn!(space_id, "Lost confirmation race");
                return Err(AppError::ConfirmationInProgress(space_id));
            }
            space
        };

        match self.settle(&space, deadline).await {
            Ok(confirmed) => Ok(confirmed),
            Err(e) => {
                warn!(space_id, error = %e, "Confirmation failed, reopening group");
                self.reopen(space_id).await;
                Err(e)
            }
        }
    }

    async fn settle(
        &self,
        space: &GroupSpace,
        deadline: Option<Instant>,
    ) -> Result<ConfirmedSettlement, AppError> {
        let mut tx = self.repo.begin().await?;

        let mut store = LedgerStore::new(&mut *tx);
        let outcome = settle_in(&mut store, space, deadline).await;

        match outcome {
            Ok(confirmed) => {
                tx.commit()
                    .await
                    .context("Failed to commit settlement")?;
                Ok(confirmed)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(space_id = space.id, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Hand a claimed group back after a failed confirmation.
    async fn reopen(&self, space_id: SpaceId) {
        let result = async {
            let mut conn = self.repo.acquire().await?;
            LedgerStore::new(&mut *conn)
                .set_group_status(space_id, GroupStatus::Open)
                .await
        }
        .await;

        if let Err(e) = result {
            error!(space_id, error = %e, "Failed to reopen group after aborted confirmation");
        }
    }
}

async fn settle_in(
    store: &mut LedgerStore<'_>,
    space: &GroupSpace,
    deadline: Option<Instant>,
) -> Result<ConfirmedSettlement, AppError> {
    let member_ids: Vec<UserId> = store
        .list_group_members(space.id)
        .await?
        .into_iter()
        .map(|m| m.user_id)
        .collect();
    let group_transactions = store.list_group_transactions(space.id).await?;

    info!(
        space_id = space.id,
        members = member_ids.len(),
        transactions = group_transactions.len(),
        "Settling group"
    );

    let mut progress = Progress::default();
    for group_tx in &group_transactions {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(space_id = space.id, group_transaction_id = group_tx.id, "Deadline reached");
            return Err(AppError::DeadlineExceeded(space.id));
        }

        settle_transaction(store, space, group_tx, &member_ids, &mut progress)
            .await
            .map_err(|e| AppError::SettlementAborted {
                group_transaction_id: group_tx.id,
                source: Box::new(e),
            })?;
    }

    let balances = progress.sheet.balances();
    let plan = plan_settlement(&balances);
    debug!(space_id = space.id, ?balances, transfers = plan.transfers.len(), "Netted balances");

    let description = format!("Settlement of {}", space.name);
    let mut settlements = Vec::with_capacity(plan.transfers.len() + plan.settled.len());

    for transfer in &plan.transfers {
        let mut entries = progress.sheet.entries_for(transfer.debtor).to_vec();
        entries.extend_from_slice(progress.sheet.entries_for(transfer.creditor));

        let settlement = store
            .insert_settlement(&NewSettlement {
                space_id: space.id,
                debtor_id: transfer.debtor,
                creditor_id: transfer.creditor,
                amount_cents: transfer.amount_cents,
                payload: SettlementPayload { entries },
                description: description.clone(),
                debtor_paid: false,
                creditor_paid: false,
            })
            .await?;
        settlements.push(settlement);
    }

    // Members who came out even still get a record tying them to their entries.
    for member in &plan.settled {
        let settlement = store
            .insert_settlement(&NewSettlement {
                space_id: space.id,
                debtor_id: *member,
                creditor_id: *member,
                amount_cents: 0,
                payload: SettlementPayload {
                    entries: progress.sheet.entries_for(*member).to_vec(),
                },
                description: description.clone(),
                debtor_paid: true,
                creditor_paid: true,
            })
            .await?;
        settlements.push(settlement);
    }

    store.set_group_status(space.id, GroupStatus::Closed).await?;

    let mut space = space.clone();
    space.status = GroupStatus::Closed;

    Ok(ConfirmedSettlement {
        result: SettlementResult {
            space,
            balances,
            settlements,
            member_entries: progress.member_entries,
            skipped_members: progress.skipped_members,
        },
        notifications: progress.notifications,
    })
}

/// Book every share of one shared expense to its member and retire the
/// staging entry.
async fn settle_transaction(
    store: &mut LedgerStore<'_>,
    space: &GroupSpace,
    group_tx: &GroupTransaction,
    member_ids: &[UserId],
    progress: &mut Progress,
) -> Result<(), AppError> {
    let staging = store
        .get_transaction(group_tx.transaction_id)
        .await?
        .ok_or(AppError::TransactionNotFound(group_tx.transaction_id))?;
    let payer = store
        .get_user(group_tx.paid_member)
        .await?
        .ok_or(AppError::UserNotFound(group_tx.paid_member))?;

    // Members only inherit a category they can see; otherwise their default applies.
    let staging_category = match staging.category_id {
        Some(id) => store.get_category(id).await?,
        None => None,
    };

    let split = if group_tx.has_explicit_split() {
        group_tx.split.clone()
    } else {
        equal_split(staging.amount_cents, member_ids)
    };

    let requested: Vec<UserId> = split.iter().map(|s| s.member_id).collect();
    let existing: HashSet<UserId> = store
        .list_users_by_ids(&requested)
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();

    let mut shares: Vec<SplitShare> = Vec::with_capacity(split.len());
    for share in split {
        if existing.contains(&share.member_id) {
            shares.push(share);
        } else {
            warn!(
                group_transaction_id = group_tx.id,
                member_id = share.member_id,
                amount = share.amount_cents,
                "Split member no longer exists, payer absorbs the share"
            );
            progress.skipped_members.push(share.member_id);
        }
    }

    let absorbed = staging.amount_cents - shares.iter().map(|s| s.amount_cents).sum::<Cents>();
    if absorbed > 0 {
        match shares.iter_mut().find(|s| s.member_id == payer.id) {
            Some(share) => share.amount_cents += absorbed,
            None => shares.push(SplitShare::new(payer.id, absorbed)),
        }
    }

    let note = format!("{} (group: {})", group_tx.description, space.name);
    for share in shares.iter().filter(|s| s.amount_cents > 0) {
        let category_id = staging_category
            .as_ref()
            .filter(|c| c.is_visible_to(share.member_id))
            .map(|c| c.id);
        let data = ExpenseData::new(share.amount_cents)
            .with_category(category_id)
            .with_date(staging.date)
            .with_note(note.clone());

        let outcome = recorder::record(store, share.member_id, data).await?;
        progress
            .sheet
            .record_share(share.member_id, share.amount_cents, outcome.transaction.id);
        progress.member_entries.push(outcome.transaction);
        progress.notifications.extend(outcome.notification);
    }

    progress.sheet.record_payment(payer.id, staging.amount_cents);

    store.delete_group_transaction(group_tx.id).await?;
    store.delete_transaction(staging.id).await?;

    debug!(
        group_transaction_id = group_tx.id,
        payer = payer.id,
        amount = staging.amount_cents,
        shares = shares.len(),
        "Group transaction settled"
    );
    Ok(())
}
