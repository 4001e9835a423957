use tracing::{debug, warn};

use crate::domain::{
    BudgetNotification, Category, CategoryId, Cents, NotificationDecision, NotificationPayload,
    TransactionId, UserId,
};
use crate::storage::LedgerStore;

use super::dispatch::{MessageDispatcher, OutboundMessage};
use super::AppError;

/// Result of checking a candidate expense against the user's budget limit,
/// with the figures behind the decision.
#[derive(Debug, Clone)]
pub struct BudgetCheck {
    pub user_id: UserId,
    /// Messaging address of the user, if they have one.
    pub recipient: Option<String>,
    pub category: Option<Category>,
    pub limit_cents: Option<Cents>,
    pub prior_spend: Cents,
    pub projected: Cents,
    pub decision: NotificationDecision,
}

impl BudgetCheck {
    fn quiet(user_id: UserId, recipient: Option<String>) -> Self {
        Self {
            user_id,
            recipient,
            category: None,
            limit_cents: None,
            prior_spend: 0,
            projected: 0,
            decision: NotificationDecision::None,
        }
    }
}

/// A stored notification waiting to be pushed once its write has committed.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub notification: BudgetNotification,
    pub recipient: Option<String>,
}

/// Decide whether spending `candidate` in `category_id` crosses the user's
/// budget thresholds.
///
/// Prior spend is every expense the user has in the category across all of
/// their wallets, minus `exclude`, which is the entry about to be rewritten.
pub async fn evaluate(
    store: &mut LedgerStore<'_>,
    user_id: UserId,
    category_id: Option<CategoryId>,
    candidate: Cents,
    exclude: Option<TransactionId>,
) -> Result<BudgetCheck, AppError> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or(AppError::UserNotFound(user_id))?;

    let Some(category_id) = category_id else {
        return Ok(BudgetCheck::quiet(user.id, user.external_id));
    };

    let category = store
        .get_category(category_id)
        .await?
        .ok_or(AppError::CategoryNotFound(category_id))?;

    let Some(limit) = store.get_budget_limit(user.id, category_id).await? else {
        let mut check = BudgetCheck::quiet(user.id, user.external_id);
        check.category = Some(category);
        return Ok(check);
    };

    let prior_spend = store
        .sum_expenses_for_category(user.id, category_id, exclude)
        .await?;
    let projected = prior_spend + candidate;
    let decision = NotificationDecision::for_projection(projected, limit.limit_cents);

    debug!(
        user_id = user.id,
        category = %category.name,
        limit = limit.limit_cents,
        prior_spend,
        projected,
        ?decision,
        "Budget evaluated"
    );

    Ok(BudgetCheck {
        user_id: user.id,
        recipient: user.external_id,
        category: Some(category),
        limit_cents: Some(limit.limit_cents),
        prior_spend,
        projected,
        decision,
    })
}

/// Persist the notification a check calls for, if any.
pub async fn raise(
    store: &mut LedgerStore<'_>,
    check: &BudgetCheck,
) -> Result<Option<PendingNotification>, AppError> {
    let (Some(kind), Some(category), Some(limit)) =
        (check.decision.kind(), &check.category, check.limit_cents)
    else {
        return Ok(None);
    };

    let payload = NotificationPayload::new(kind, category.name.clone(), limit, check.projected);
    let notification = store
        .insert_notification(check.user_id, category.id, &payload)
        .await?;

    Ok(Some(PendingNotification {
        notification,
        recipient: check.recipient.clone(),
    }))
}

/// Push notifications out. Never fails: undeliverable messages are logged
/// and dropped, since the notification itself is already stored.
pub async fn dispatch_all(dispatcher: &dyn MessageDispatcher, pending: &[PendingNotification]) {
    for item in pending {
        let Some(recipient) = item.recipient.as_deref() else {
            debug!(
                user_id = item.notification.user_id,
                "No messaging address, notification kept in store only"
            );
            continue;
        };

        let message = OutboundMessage::from_notification(&item.notification);
        if let Err(e) = dispatcher.send(recipient, &message).await {
            warn!(
                user_id = item.notification.user_id,
                notification_id = item.notification.id,
                error = %e,
                "Failed to dispatch budget notification"
            );
        }
    }
}

/// Push a single message, logging and dropping it on failure.
pub async fn push(
    dispatcher: &dyn MessageDispatcher,
    user_id: UserId,
    recipient: Option<&str>,
    message: OutboundMessage,
) {
    let Some(recipient) = recipient else {
        debug!(user_id, "No messaging address, message dropped");
        return;
    };

    if let Err(e) = dispatcher.send(recipient, &message).await {
        warn!(user_id, error = %e, "Failed to dispatch message");
    }
}
