// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use splitledger::application::{
    AppError, DispatchError, ErrorKind, GroupExpense, LedgerService, MessageDispatcher,
    OutboundMessage,
};
use splitledger::domain::{
    Category, CategoryKind, Cents, GroupSpace, GroupTransaction, NewUser, User, Wallet,
    WalletType,
};
use splitledger::storage::Repository;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// A second, independent pool on the test database, standing in for another
/// process working on the same file.
pub async fn second_repository(temp_dir: &TempDir) -> Result<Repository> {
    let db_path = temp_dir.path().join("test.db");
    Repository::connect(&format!("sqlite:{}", db_path.to_str().unwrap())).await
}

/// Test service whose outbound messages are captured.
pub async fn recording_service() -> Result<(LedgerService, Arc<RecordingDispatcher>, TempDir)> {
    let (service, temp_dir) = test_service().await?;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let service = service.with_dispatcher(dispatcher.clone());
    Ok((service, dispatcher, temp_dir))
}

/// Assert that a result failed with the given error kind.
pub fn assert_kind<T: std::fmt::Debug>(result: Result<T, AppError>, kind: ErrorKind) {
    match result {
        Ok(value) => panic!("expected {:?} error, got Ok({:?})", kind, value),
        Err(e) => assert_eq!(e.kind(), kind, "unexpected error: {}", e),
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageDispatcher for RecordingDispatcher {
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));
        Ok(())
    }
}

/// Dispatcher whose channel is always down.
pub struct FailingDispatcher;

#[async_trait]
impl MessageDispatcher for FailingDispatcher {
    async fn send(&self, recipient: &str, _message: &OutboundMessage) -> Result<(), DispatchError> {
        Err(DispatchError::Unreachable(recipient.to_string()))
    }
}

/// Test fixture: three users, each with a cash wallet, sharing a Food category.
/// Alice has a messaging address, the others do not.
pub struct Household {
    pub alice: User,
    pub bob: User,
    pub carol: User,
    pub alice_wallet: Wallet,
    pub bob_wallet: Wallet,
    pub carol_wallet: Wallet,
    pub food: Category,
}

impl Household {
    pub async fn create(service: &LedgerService) -> Result<Self> {
        let alice = service
            .create_user(NewUser::new("Alice", "alice@example.com").with_external_id("chat-alice"))
            .await?;
        let bob = service
            .create_user(NewUser::new("Bob", "bob@example.com"))
            .await?;
        let carol = service
            .create_user(NewUser::new("Carol", "carol@example.com"))
            .await?;

        let alice_wallet = service
            .create_wallet(alice.id, "Cash", WalletType::Cash)
            .await?;
        let bob_wallet = service
            .create_wallet(bob.id, "Cash", WalletType::Cash)
            .await?;
        let carol_wallet = service
            .create_wallet(carol.id, "Cash", WalletType::Cash)
            .await?;

        let food = service
            .create_category(None, "Food", CategoryKind::Expense)
            .await?;

        // Reload so the default wallet set by the first wallet is visible.
        let alice = service.get_user(alice.id).await?;
        let bob = service.get_user(bob.id).await?;
        let carol = service.get_user(carol.id).await?;

        Ok(Self {
            alice,
            bob,
            carol,
            alice_wallet,
            bob_wallet,
            carol_wallet,
            food,
        })
    }

    /// Group with Alice as admin and Bob and Carol as members.
    pub async fn trip(&self, service: &LedgerService) -> Result<GroupSpace> {
        Ok(service
            .create_group(
                self.alice.id,
                "Trip",
                Some("Weekend away"),
                &[self.bob.id, self.carol.id],
            )
            .await?)
    }
}

/// Add a shared expense in the Food category.
pub async fn add_shared(
    service: &LedgerService,
    household: &Household,
    space: &GroupSpace,
    payer: &User,
    amount_cents: Cents,
    description: &str,
) -> Result<GroupTransaction> {
    Ok(service
        .add_group_expense(
            payer.id,
            space.id,
            GroupExpense {
                amount_cents,
                description: description.to_string(),
                paid_member: Some(payer.id),
                category_id: Some(household.food.id),
            },
        )
        .await?)
}
