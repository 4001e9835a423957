mod common;

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Result;
use common::{Household, add_shared, assert_kind, recording_service, test_service};
use splitledger::application::{AppError, ErrorKind, GroupExpense, SettlementResult};
use splitledger::domain::{
    CategoryKind, Cents, GroupStatus, NewUser, NotificationKind, SettlementFilter, SettlementRole, SplitShare,
    SummaryGroupTransaction, TransactionFilter, UserId,
};

/// Net effect of the non-trivial settlement records on each member.
fn net_effect(settlements: &[SummaryGroupTransaction]) -> BTreeMap<UserId, Cents> {
    let mut net = BTreeMap::new();
    for s in settlements.iter().filter(|s| !s.is_self_settled()) {
        *net.entry(s.creditor_id).or_insert(0) += s.amount_cents;
        *net.entry(s.debtor_id).or_insert(0) -= s.amount_cents;
    }
    net
}

fn transfer(result: &SettlementResult, debtor: UserId, creditor: UserId) -> Option<Cents> {
    result
        .settlements
        .iter()
        .find(|s| s.debtor_id == debtor && s.creditor_id == creditor)
        .map(|s| s.amount_cents)
}

fn share_of(result: &SettlementResult, member: &splitledger::domain::User) -> Cents {
    result
        .member_entries
        .iter()
        .filter(|t| t.wallet_id == member.default_wallet_id)
        .map(|t| t.amount_cents)
        .sum()
}

#[tokio::test]
async fn test_equal_split_single_payer() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.alice, 30000, "Dinner").await?;

    let result = service.confirm_group(home.alice.id, space.id, None).await?;

    assert_eq!(result.space.status, GroupStatus::Closed);
    assert_eq!(result.balances[&home.alice.id], 20000);
    assert_eq!(result.balances[&home.bob.id], -10000);
    assert_eq!(result.balances[&home.carol.id], -10000);

    assert_eq!(result.settlements.len(), 2);
    assert_eq!(transfer(&result, home.bob.id, home.alice.id), Some(10000));
    assert_eq!(transfer(&result, home.carol.id, home.alice.id), Some(10000));
    for s in &result.settlements {
        assert_eq!(s.description, "Settlement of Trip");
        assert!(!s.debtor_paid);
        assert!(!s.creditor_paid);
        // Debtor's entry plus creditor's entry
        assert_eq!(s.payload.entries.len(), 2);
    }

    assert_eq!(result.member_entries.len(), 3);
    assert!(result.skipped_members.is_empty());

    let bobs = service
        .list_transactions(home.bob.id, &TransactionFilter::default())
        .await?;
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].amount_cents, 10000);
    assert_eq!(bobs[0].wallet_id, Some(home.bob_wallet.id));
    assert_eq!(bobs[0].category_id, Some(home.food.id));
    assert_eq!(bobs[0].note, "Dinner (group: Trip)");

    let groups = service.list_groups_for_user(home.bob.id).await?;
    assert_eq!(groups[0].status, GroupStatus::Closed);
    assert!(
        service
            .list_group_transactions(home.alice.id, space.id)
            .await?
            .is_empty()
    );
    Ok(())
}

#[tokio::test]
async fn test_explicit_split_is_honoured() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    let group_tx = add_shared(&service, &home, &space, &home.alice, 9000, "Tickets").await?;

    service
        .assign_split(
            group_tx.id,
            home.alice.id,
            vec![
                SplitShare::new(home.alice.id, 1000),
                SplitShare::new(home.bob.id, 5000),
                SplitShare::new(home.carol.id, 3000),
            ],
        )
        .await?;

    let result = service.confirm_group(home.alice.id, space.id, None).await?;

    assert_eq!(share_of(&result, &home.alice), 1000);
    assert_eq!(share_of(&result, &home.bob), 5000);
    assert_eq!(share_of(&result, &home.carol), 3000);

    // Most indebted first
    assert_eq!(result.settlements[0].debtor_id, home.bob.id);
    assert_eq!(result.settlements[0].amount_cents, 5000);
    assert_eq!(transfer(&result, home.carol.id, home.alice.id), Some(3000));
    Ok(())
}

#[tokio::test]
async fn test_equal_split_remainder_goes_to_lowest_ids() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.carol, 10000, "Taxi").await?;

    let result = service.confirm_group(home.alice.id, space.id, None).await?;

    assert_eq!(share_of(&result, &home.alice), 3334);
    assert_eq!(share_of(&result, &home.bob), 3333);
    assert_eq!(share_of(&result, &home.carol), 3333);

    assert_eq!(result.balances[&home.carol.id], 6667);
    assert_eq!(transfer(&result, home.alice.id, home.carol.id), Some(3334));
    assert_eq!(transfer(&result, home.bob.id, home.carol.id), Some(3333));
    Ok(())
}

#[tokio::test]
async fn test_netting_preserves_every_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;

    add_shared(&service, &home, &space, &home.alice, 9000, "Hotel").await?;
    add_shared(&service, &home, &space, &home.bob, 6000, "Fuel").await?;
    add_shared(&service, &home, &space, &home.carol, 1500, "Coffee").await?;

    let result = service.confirm_group(home.alice.id, space.id, None).await?;

    assert_eq!(result.balances[&home.alice.id], 3500);
    assert_eq!(result.balances[&home.bob.id], 500);
    assert_eq!(result.balances[&home.carol.id], -4000);
    assert_eq!(result.balances.values().sum::<Cents>(), 0);

    let transfers: Vec<_> = result
        .settlements
        .iter()
        .filter(|s| !s.is_self_settled())
        .collect();
    assert!(transfers.len() <= result.balances.len() - 1);
    assert!(transfers.iter().all(|s| s.amount_cents > 0));
    assert_eq!(net_effect(&result.settlements), result.balances);

    // Every shared cent was booked to someone
    let total: Cents = result.member_entries.iter().map(|t| t.amount_cents).sum();
    assert_eq!(total, 16500);
    Ok(())
}

#[tokio::test]
async fn test_even_member_gets_self_settled_record() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;

    let dinner = add_shared(&service, &home, &space, &home.alice, 3000, "Dinner").await?;
    service
        .assign_split(
            dinner.id,
            home.alice.id,
            vec![
                SplitShare::new(home.alice.id, 1000),
                SplitShare::new(home.bob.id, 2000),
            ],
        )
        .await?;
    let book = add_shared(&service, &home, &space, &home.carol, 1000, "Book").await?;
    service
        .assign_split(
            book.id,
            home.alice.id,
            vec![SplitShare::new(home.carol.id, 1000)],
        )
        .await?;

    let result = service.confirm_group(home.alice.id, space.id, None).await?;

    assert_eq!(result.balances[&home.carol.id], 0);
    assert_eq!(result.settlements.len(), 2);

    let even = result
        .settlements
        .iter()
        .find(|s| s.is_self_settled())
        .expect("self-settled record");
    assert_eq!(even.debtor_id, home.carol.id);
    assert_eq!(even.amount_cents, 0);
    assert!(even.is_fully_paid());
    assert_eq!(even.payload.entries.len(), 1);
    assert_eq!(even.payload.entries[0].amount_cents, 1000);

    assert_eq!(transfer(&result, home.bob.id, home.alice.id), Some(2000));
    Ok(())
}

#[tokio::test]
async fn test_deleted_member_share_is_absorbed_by_payer() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.alice, 30000, "Cabin").await?;

    service.delete_user(home.carol.id).await?;

    let result = service.confirm_group(home.alice.id, space.id, None).await?;

    assert_eq!(result.skipped_members, vec![home.carol.id]);
    assert_eq!(share_of(&result, &home.alice), 20000);
    assert_eq!(share_of(&result, &home.bob), 10000);
    assert!(!result.balances.contains_key(&home.carol.id));

    let transfers: Vec<_> = result
        .settlements
        .iter()
        .filter(|s| !s.is_self_settled())
        .collect();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].debtor_id, home.bob.id);
    assert_eq!(transfers[0].amount_cents, 10000);
    Ok(())
}

#[tokio::test]
async fn test_confirm_is_admin_only_and_happens_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.bob, 1200, "Lunch").await?;

    assert_kind(
        service.confirm_group(home.bob.id, space.id, None).await,
        ErrorKind::PermissionDenied,
    );
    assert_kind(
        service.confirm_group(home.alice.id, 999, None).await,
        ErrorKind::NotFound,
    );

    service.confirm_group(home.alice.id, space.id, None).await?;

    let first = service
        .query_settlements(home.alice.id, &SettlementFilter::default())
        .await?;
    assert_kind(
        service.confirm_group(home.alice.id, space.id, None).await,
        ErrorKind::Conflict,
    );
    let second = service
        .query_settlements(home.alice.id, &SettlementFilter::default())
        .await?;
    assert_eq!(first.len(), second.len());
    Ok(())
}

#[tokio::test]
async fn test_empty_group_closes_without_records() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;

    let result = service.confirm_group(home.alice.id, space.id, None).await?;
    assert_eq!(result.space.status, GroupStatus::Closed);
    assert!(result.settlements.is_empty());
    assert!(result.balances.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_passed_deadline_leaves_group_untouched() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.alice, 3000, "Fuel").await?;

    assert_kind(
        service
            .confirm_group(home.alice.id, space.id, Some(Instant::now()))
            .await,
        ErrorKind::Internal,
    );

    let groups = service.list_groups_for_user(home.alice.id).await?;
    assert_eq!(groups[0].status, GroupStatus::Open);
    assert_eq!(
        service
            .list_group_transactions(home.alice.id, space.id)
            .await?
            .len(),
        1
    );
    assert!(
        service
            .list_transactions(home.bob.id, &TransactionFilter::default())
            .await?
            .is_empty()
    );

    // Reopened, so a later attempt goes through
    let result = service.confirm_group(home.alice.id, space.id, None).await?;
    assert_eq!(result.member_entries.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_member_entry_rolls_back_everything() -> Result<()> {
    let (service, dispatcher, _temp) = recording_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    let walletless = service
        .create_user(NewUser::new("Dave", "dave@example.com"))
        .await?;
    service
        .add_group_member(home.alice.id, space.id, walletless.id)
        .await?;
    // Alice's share alone would raise a warning
    service
        .set_budget_limit(home.alice.id, home.food.id, 1200)
        .await?;
    add_shared(&service, &home, &space, &home.alice, 4000, "Groceries").await?;

    match service.confirm_group(home.alice.id, space.id, None).await {
        Err(AppError::SettlementAborted { source, .. }) => {
            assert_eq!(source.kind(), ErrorKind::Validation);
        }
        other => panic!("expected aborted settlement, got {:?}", other),
    }

    // Alice's entry was written before Dave's failed; it must be gone
    assert!(
        service
            .list_transactions(home.alice.id, &TransactionFilter::default())
            .await?
            .is_empty()
    );
    assert!(service.list_notifications(home.alice.id, false).await?.is_empty());
    assert!(dispatcher.sent().is_empty());
    assert!(
        service
            .query_settlements(home.alice.id, &SettlementFilter::default())
            .await?
            .is_empty()
    );

    let groups = service.list_groups_for_user(home.alice.id).await?;
    assert_eq!(groups[0].status, GroupStatus::Open);
    assert_eq!(
        service
            .list_group_transactions(home.alice.id, space.id)
            .await?
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_notifications_are_sent_after_commit() -> Result<()> {
    let (service, dispatcher, _temp) = recording_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    service
        .set_budget_limit(home.alice.id, home.food.id, 10000)
        .await?;
    // Bob has no messaging address
    service
        .set_budget_limit(home.bob.id, home.food.id, 5000)
        .await?;
    add_shared(&service, &home, &space, &home.alice, 30000, "Dinner").await?;

    service.confirm_group(home.alice.id, space.id, None).await?;

    let sent = dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "chat-alice");
    let alert = sent[0].1.as_budget().expect("budget alert");
    assert_eq!(alert.kind, NotificationKind::Warning);
    assert_eq!(alert.projected_cents, 10000);

    let bobs = service.list_notifications(home.bob.id, false).await?;
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].kind, NotificationKind::Exceed);
    Ok(())
}

#[tokio::test]
async fn test_mark_paid_sides_independently() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.alice, 30000, "Dinner").await?;
    let result = service.confirm_group(home.alice.id, space.id, None).await?;

    let bob_to_alice = result
        .settlements
        .iter()
        .find(|s| s.debtor_id == home.bob.id)
        .expect("bob owes alice")
        .id;

    assert_kind(
        service.mark_settlement_paid(home.carol.id, bob_to_alice).await,
        ErrorKind::PermissionDenied,
    );
    assert_kind(
        service.mark_settlement_paid(home.bob.id, 999).await,
        ErrorKind::NotFound,
    );

    let marked = service.mark_settlement_paid(home.bob.id, bob_to_alice).await?;
    assert!(marked.debtor_paid);
    assert!(!marked.creditor_paid);

    // Marking again changes nothing
    let again = service.mark_settlement_paid(home.bob.id, bob_to_alice).await?;
    assert!(again.debtor_paid);
    assert!(!again.creditor_paid);

    let marked = service.mark_settlement_paid(home.alice.id, bob_to_alice).await?;
    assert!(marked.is_fully_paid());

    let stored = service
        .query_settlements(home.bob.id, &SettlementFilter::default())
        .await?;
    assert!(stored[0].settlement.is_fully_paid());
    Ok(())
}

#[tokio::test]
async fn test_query_settlements_filters() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.alice, 30000, "Dinner").await?;
    service.confirm_group(home.alice.id, space.id, None).await?;

    let bobs = service
        .query_settlements(home.bob.id, &SettlementFilter::default())
        .await?;
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].space_name, "Trip");
    assert_eq!(bobs[0].debtor_name, "Bob");
    assert_eq!(bobs[0].creditor_name, "Alice");

    let with_role = |role| SettlementFilter {
        role: Some(role),
        ..Default::default()
    };
    assert!(
        service
            .query_settlements(home.bob.id, &with_role(SettlementRole::Creditor))
            .await?
            .is_empty()
    );
    assert_eq!(
        service
            .query_settlements(home.alice.id, &with_role(SettlementRole::Creditor))
            .await?
            .len(),
        2
    );

    let other_space = SettlementFilter {
        space_id: Some(space.id + 1),
        ..Default::default()
    };
    assert!(
        service
            .query_settlements(home.alice.id, &other_space)
            .await?
            .is_empty()
    );

    // Unpaid only looks at the caller's own side
    let unpaid = SettlementFilter {
        unpaid_only: true,
        ..Default::default()
    };
    service
        .mark_settlement_paid(home.bob.id, bobs[0].settlement.id)
        .await?;
    assert!(service.query_settlements(home.bob.id, &unpaid).await?.is_empty());
    assert_eq!(
        service
            .query_settlements(home.alice.id, &unpaid)
            .await?
            .len(),
        2
    );

    assert_kind(
        service
            .query_settlements(999, &SettlementFilter::default())
            .await,
        ErrorKind::NotFound,
    );
    Ok(())
}

#[tokio::test]
async fn test_private_category_stays_with_its_owner() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;

    let hobby = service
        .create_category(Some(home.alice.id), "Hobby", CategoryKind::Expense)
        .await?;
    service
        .set_default_category(home.bob.id, Some(home.food.id))
        .await?;

    // Bob cannot file a shared expense under Alice's category
    assert_kind(
        service
            .add_group_expense(
                home.bob.id,
                space.id,
                GroupExpense {
                    amount_cents: 3000,
                    description: "Paint".into(),
                    paid_member: None,
                    category_id: Some(hobby.id),
                },
            )
            .await,
        ErrorKind::NotFound,
    );

    service
        .add_group_expense(
            home.alice.id,
            space.id,
            GroupExpense {
                amount_cents: 3000,
                description: "Paint".into(),
                paid_member: None,
                category_id: Some(hobby.id),
            },
        )
        .await?;
    service.confirm_group(home.alice.id, space.id, None).await?;

    let alices = service
        .list_transactions(home.alice.id, &TransactionFilter::default())
        .await?;
    assert_eq!(alices[0].category_id, Some(hobby.id));

    // Bob falls back to his default, Carol has none
    let bobs = service
        .list_transactions(home.bob.id, &TransactionFilter::default())
        .await?;
    assert_eq!(bobs[0].amount_cents, 1000);
    assert_eq!(bobs[0].category_id, Some(home.food.id));

    let carols = service
        .list_transactions(home.carol.id, &TransactionFilter::default())
        .await?;
    assert_eq!(carols[0].category_id, None);

    Ok(())
}
