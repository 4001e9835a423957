use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::application::{
    ExpenseData, ExpenseUpdate, GroupExpense, LedgerService, SummaryPeriod, SummaryRange,
};
use crate::domain::{
    CategoryId, CategoryKind, Cents, GroupTransactionId, NewUser, SettlementFilter,
    SettlementRole, SpaceId, SplitShare, TransactionFilter, TransactionKind, UserId, WalletId,
    WalletType, format_cents, parse_cents,
};

/// Splitledger - personal and shared expense ledger
#[derive(Parser)]
#[command(name = "splitledger")]
#[command(about = "Track personal expenses and settle shared group costs")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(
        short,
        long,
        env = "SPLITLEDGER_DATABASE",
        default_value = "splitledger.db"
    )]
    pub database: String,

    /// Enable verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Category management commands
    #[command(subcommand)]
    Category(CategoryCommands),

    /// Record a personal ledger entry
    Expense {
        /// Acting user id
        #[arg(short, long)]
        user: UserId,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Wallet id (defaults to the user's default wallet)
        #[arg(short, long)]
        wallet: Option<WalletId>,

        /// Category id (defaults to the user's default category)
        #[arg(short, long)]
        category: Option<CategoryId>,

        /// Kind: expense, income, initial
        #[arg(short, long, default_value = "expense")]
        kind: String,

        /// Note
        #[arg(short, long, default_value = "")]
        note: String,

        /// Date (ISO 8601 format: YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Change an existing ledger entry
    Update {
        /// Acting user id
        #[arg(short, long)]
        user: UserId,

        /// Transaction id
        id: i64,

        /// New amount
        #[arg(short, long)]
        amount: Option<String>,

        /// Move to another wallet
        #[arg(short, long)]
        wallet: Option<WalletId>,

        /// New category id
        #[arg(short, long, conflicts_with = "clear_category")]
        category: Option<CategoryId>,

        /// Remove the category from the entry
        #[arg(long)]
        clear_category: bool,

        /// New kind: expense, income, initial
        #[arg(short, long)]
        kind: Option<String>,

        /// New note
        #[arg(short, long)]
        note: Option<String>,

        /// New date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// Mark as sorted
        #[arg(long)]
        sorted: Option<bool>,

        /// Mark as paid
        #[arg(long)]
        paid: Option<bool>,
    },

    /// List ledger entries, newest first
    Transactions {
        /// Acting user id
        #[arg(short, long)]
        user: UserId,

        /// Filter by wallet id
        #[arg(long)]
        wallet: Option<WalletId>,

        /// Filter by category id
        #[arg(long)]
        category: Option<CategoryId>,

        /// Filter by kind
        #[arg(long)]
        kind: Option<String>,

        /// Minimum amount
        #[arg(long)]
        min: Option<String>,

        /// Maximum amount
        #[arg(long)]
        max: Option<String>,

        /// Earliest date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Latest date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Budget limit commands
    #[command(subcommand)]
    Budget(BudgetCommands),

    /// Budget notification commands
    #[command(subcommand)]
    Notification(NotificationCommands),

    /// Shared group commands
    #[command(subcommand)]
    Group(GroupCommands),

    /// Settlement record commands
    #[command(subcommand)]
    Settlement(SettlementCommands),

    /// Friend commands
    #[command(subcommand)]
    Friend(FriendCommands),

    /// Spending summaries
    #[command(subcommand)]
    Summary(SummaryCommands),

    /// Export data to CSV or JSON
    Export {
        /// Acting user id
        #[arg(short, long)]
        user: UserId,

        /// What to export: settlements, transactions, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a user
    Create {
        name: String,

        email: String,

        /// Messaging channel recipient id
        #[arg(long)]
        external_id: Option<String>,
    },

    /// Show a user
    Show { id: UserId },

    /// Delete a user
    Delete { id: UserId },

    /// Set the wallet used when an expense names none
    DefaultWallet { user: UserId, wallet: WalletId },

    /// Set or clear the category used when an expense names none
    DefaultCategory {
        user: UserId,

        /// Category id (omit to clear)
        category: Option<CategoryId>,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new wallet
    Create {
        /// Owner id
        #[arg(short, long)]
        user: UserId,

        /// Wallet name
        name: String,

        /// Wallet type: cash, credit-card, bank-transfer
        #[arg(short = 't', long = "type", default_value = "cash")]
        wallet_type: String,
    },

    /// List a user's wallets
    List {
        #[arg(short, long)]
        user: UserId,
    },

    /// Delete a wallet with no entries
    Delete {
        #[arg(short, long)]
        user: UserId,

        id: WalletId,
    },
}

#[derive(Subcommand)]
pub enum CategoryCommands {
    /// Create a category
    Create {
        /// Category name
        name: String,

        /// Kind: income, expense
        #[arg(short, long, default_value = "expense")]
        kind: String,

        /// Owner (omit for a shared category)
        #[arg(long)]
        user: Option<UserId>,
    },

    /// List categories a user can use
    List {
        #[arg(short, long)]
        user: UserId,
    },

    /// Delete one of your own categories
    Delete {
        #[arg(short, long)]
        user: UserId,

        id: CategoryId,
    },
}

#[derive(Subcommand)]
pub enum BudgetCommands {
    /// Set the spending limit for a category
    Set {
        #[arg(short, long)]
        user: UserId,

        #[arg(short, long)]
        category: CategoryId,

        /// Limit (e.g., "400" or "400.00")
        amount: String,
    },

    /// List budget limits
    List {
        #[arg(short, long)]
        user: UserId,
    },
}

#[derive(Subcommand)]
pub enum NotificationCommands {
    /// List notifications, newest first
    List {
        #[arg(short, long)]
        user: UserId,

        /// Only unread notifications
        #[arg(long)]
        unread: bool,
    },

    /// Mark a notification as read
    Read {
        #[arg(short, long)]
        user: UserId,

        id: i64,
    },
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Create a group with yourself as admin
    Create {
        #[arg(short, long)]
        user: UserId,

        name: String,

        #[arg(short, long)]
        description: Option<String>,

        /// User ids to invite
        #[arg(long = "invite", num_args = 1..)]
        invitees: Vec<UserId>,
    },

    /// Add a member (admin only)
    AddMember {
        #[arg(short, long)]
        user: UserId,

        group: SpaceId,

        member: UserId,
    },

    /// List your groups
    List {
        #[arg(short, long)]
        user: UserId,
    },

    /// List members of a group
    Members {
        #[arg(short, long)]
        user: UserId,

        group: SpaceId,
    },

    /// Add a shared expense
    Expense {
        #[arg(short, long)]
        user: UserId,

        group: SpaceId,

        amount: String,

        description: String,

        /// Member who paid (defaults to you)
        #[arg(long)]
        payer: Option<UserId>,

        #[arg(short, long)]
        category: Option<CategoryId>,
    },

    /// List pending shared expenses
    Transactions {
        #[arg(short, long)]
        user: UserId,

        group: SpaceId,
    },

    /// Assign an explicit split (admin only); no shares resets to equal split
    Split {
        #[arg(short, long)]
        user: UserId,

        /// Group transaction id
        id: GroupTransactionId,

        /// Shares as MEMBER:AMOUNT, e.g. 2:30.00
        shares: Vec<String>,
    },

    /// Settle and close the group (admin only)
    Confirm {
        #[arg(short, long)]
        user: UserId,

        group: SpaceId,

        /// Give up if settling takes longer than this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum SettlementCommands {
    /// List settlement records you are party to
    List {
        #[arg(short, long)]
        user: UserId,

        #[arg(short, long)]
        group: Option<SpaceId>,

        /// Only records where you are: debtor, creditor
        #[arg(long)]
        role: Option<String>,

        /// Only records where your side is unpaid
        #[arg(long)]
        unpaid: bool,
    },

    /// Mark your side of a settlement as paid
    Pay {
        #[arg(short, long)]
        user: UserId,

        id: i64,
    },
}

#[derive(Subcommand)]
pub enum FriendCommands {
    /// Send a friend request
    Request {
        #[arg(short, long)]
        user: UserId,

        to: UserId,
    },

    /// List friend requests waiting for you
    Requests {
        #[arg(short, long)]
        user: UserId,
    },

    /// Accept a friend request
    Accept {
        #[arg(short, long)]
        user: UserId,

        from: UserId,
    },

    /// Decline a friend request
    Decline {
        #[arg(short, long)]
        user: UserId,

        from: UserId,
    },

    /// List your friends
    List {
        #[arg(short, long)]
        user: UserId,
    },

    /// Remove a friend
    Remove {
        #[arg(short, long)]
        user: UserId,

        friend: UserId,
    },
}

#[derive(Subcommand)]
pub enum SummaryCommands {
    /// Spending per category
    Categories {
        #[arg(short, long)]
        user: UserId,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Income and expense over time
    CashFlow {
        #[arg(short, long)]
        user: UserId,

        #[command(flatten)]
        range: RangeArgs,
    },
}

#[derive(clap::Args)]
pub struct RangeArgs {
    /// Period ending today: week, month, year
    #[arg(short, long, default_value = "month", conflicts_with = "from")]
    period: String,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// End date (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    to: Option<String>,
}

impl RangeArgs {
    fn resolve(&self) -> Result<SummaryRange> {
        let to = match &self.to {
            // Inclusive of the whole end day
            Some(date) => parse_date(date)? + chrono::Duration::days(1) - chrono::Duration::seconds(1),
            None => Utc::now(),
        };
        if let Some(from) = &self.from {
            return Ok(SummaryRange::between(parse_date(from)?, to));
        }
        let period = SummaryPeriod::from_str(&self.period).ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid period '{}'. Valid periods: week, month, year",
                self.period
            )
        })?;
        Ok(SummaryRange::last(period, to))
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::User(user_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_user_command(&service, user_cmd).await?;
            }

            Commands::Wallet(wallet_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_wallet_command(&service, wallet_cmd).await?;
            }

            Commands::Category(category_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_category_command(&service, category_cmd).await?;
            }

            Commands::Expense {
                user,
                amount,
                wallet,
                category,
                kind,
                note,
                date,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let amount_cents = parse_amount(&amount)?;

                let mut data = ExpenseData::new(amount_cents)
                    .with_category(category)
                    .with_kind(parse_kind(&kind)?)
                    .with_note(note);
                if let Some(wallet_id) = wallet {
                    data = data.with_wallet(wallet_id);
                }
                if let Some(date_str) = date {
                    data = data.with_date(parse_date(&date_str)?);
                }

                let outcome = service.record_expense(user, data).await?;
                println!(
                    "Recorded {}: {} ({})",
                    outcome.transaction.kind,
                    format_cents(outcome.transaction.amount_cents),
                    outcome.transaction.id
                );
                if let Some(pending) = outcome.notification {
                    println!("  ! {}", pending.notification.message);
                }
            }

            Commands::Update {
                user,
                id,
                amount,
                wallet,
                category,
                clear_category,
                kind,
                note,
                date,
                sorted,
                paid,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let changes = ExpenseUpdate {
                    amount_cents: amount.as_deref().map(parse_amount).transpose()?,
                    wallet_id: wallet,
                    category_id: if clear_category {
                        Some(None)
                    } else {
                        category.map(Some)
                    },
                    kind: kind.as_deref().map(parse_kind).transpose()?,
                    date: date.as_deref().map(parse_date).transpose()?,
                    note,
                    sorted,
                    paid,
                };

                let outcome = service.update_expense(user, id, changes).await?;
                println!(
                    "Updated entry {}: {}",
                    outcome.transaction.id,
                    format_cents(outcome.transaction.amount_cents)
                );
                if let Some(pending) = outcome.notification {
                    println!("  ! {}", pending.notification.message);
                }
            }

            Commands::Transactions {
                user,
                wallet,
                category,
                kind,
                min,
                max,
                from,
                to,
                limit,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let filter = TransactionFilter {
                    wallet_id: wallet,
                    category_id: category,
                    kind: kind.as_deref().map(parse_kind).transpose()?,
                    min_amount: min.as_deref().map(parse_amount).transpose()?,
                    max_amount: max.as_deref().map(parse_amount).transpose()?,
                    from_date: from.as_deref().map(parse_date).transpose()?,
                    to_date: to
                        .as_deref()
                        .map(parse_date)
                        .transpose()?
                        .map(|d| d + chrono::Duration::days(1) - chrono::Duration::seconds(1)),
                    limit,
                };
                run_transactions_command(&service, user, &filter).await?;
            }

            Commands::Budget(budget_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_budget_command(&service, budget_cmd).await?;
            }

            Commands::Notification(cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_notification_command(&service, cmd).await?;
            }

            Commands::Group(group_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_group_command(&service, group_cmd).await?;
            }

            Commands::Settlement(cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_settlement_command(&service, cmd).await?;
            }

            Commands::Friend(cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_friend_command(&service, cmd).await?;
            }

            Commands::Summary(cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_summary_command(&service, cmd).await?;
            }

            Commands::Export {
                user,
                export_type,
                output,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                run_export_command(&service, user, &export_type, output.as_deref()).await?;
            }
        }

        Ok(())
    }
}

async fn run_user_command(service: &LedgerService, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create {
            name,
            email,
            external_id,
        } => {
            let mut new_user = NewUser::new(name, email);
            if let Some(external_id) = external_id {
                new_user = new_user.with_external_id(external_id);
            }
            let user = service.create_user(new_user).await?;
            println!("Created user: {} ({})", user.name, user.id);
        }

        UserCommands::Show { id } => {
            let user = service.get_user(id).await?;
            println!("User: {}", user.name);
            println!("  ID:               {}", user.id);
            println!("  Email:            {}", user.email);
            if let Some(external_id) = &user.external_id {
                println!("  Messaging id:     {}", external_id);
            }
            if let Some(wallet_id) = user.default_wallet_id {
                println!("  Default wallet:   {}", wallet_id);
            }
            if let Some(category_id) = user.default_category_id {
                println!("  Default category: {}", category_id);
            }
            println!(
                "  Created:          {}",
                user.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        UserCommands::Delete { id } => {
            service.delete_user(id).await?;
            println!("Deleted user: {}", id);
        }

        UserCommands::DefaultWallet { user, wallet } => {
            service.set_default_wallet(user, wallet).await?;
            println!("Default wallet set to {}", wallet);
        }

        UserCommands::DefaultCategory { user, category } => {
            service.set_default_category(user, category).await?;
            match category {
                Some(id) => println!("Default category set to {}", id),
                None => println!("Default category cleared"),
            }
        }
    }
    Ok(())
}

async fn run_wallet_command(service: &LedgerService, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Create {
            user,
            name,
            wallet_type,
        } => {
            let wt = WalletType::from_str(&wallet_type).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid wallet type '{}'. Valid types: cash, credit-card, bank-transfer",
                    wallet_type
                )
            })?;

            let wallet = service.create_wallet(user, &name, wt).await?;
            println!(
                "Created wallet: {} ({}, {})",
                wallet.name, wallet.wallet_type, wallet.id
            );
        }

        WalletCommands::List { user } => {
            let wallets = service.list_wallets(user).await?;
            if wallets.is_empty() {
                println!("No wallets found.");
            } else {
                println!("{:<6} {:<20} {:<14}", "ID", "NAME", "TYPE");
                println!("{}", "-".repeat(42));
                for wallet in wallets {
                    println!(
                        "{:<6} {:<20} {:<14}",
                        wallet.id, wallet.name, wallet.wallet_type
                    );
                }
            }
        }

        WalletCommands::Delete { user, id } => {
            service.delete_wallet(user, id).await?;
            println!("Deleted wallet: {}", id);
        }
    }
    Ok(())
}

async fn run_category_command(service: &LedgerService, cmd: CategoryCommands) -> Result<()> {
    match cmd {
        CategoryCommands::Create { name, kind, user } => {
            let kind = CategoryKind::from_str(&kind).ok_or_else(|| {
                anyhow::anyhow!("Invalid category kind '{}'. Valid kinds: income, expense", kind)
            })?;
            let category = service.create_category(user, &name, kind).await?;
            println!("Created category: {} ({})", category.name, category.id);
        }

        CategoryCommands::List { user } => {
            let categories = service.list_categories(user).await?;
            if categories.is_empty() {
                println!("No categories found.");
            } else {
                println!("{:<6} {:<20} {:<8} {:<6}", "ID", "NAME", "KIND", "OWNER");
                println!("{}", "-".repeat(42));
                for category in categories {
                    println!(
                        "{:<6} {:<20} {:<8} {:<6}",
                        category.id,
                        truncate(&category.name, 20),
                        category.kind,
                        if category.user_id.is_some() { "you" } else { "shared" }
                    );
                }
            }
        }

        CategoryCommands::Delete { user, id } => {
            service.delete_category(user, id).await?;
            println!("Deleted category: {}", id);
        }
    }
    Ok(())
}

async fn run_transactions_command(
    service: &LedgerService,
    user: UserId,
    filter: &TransactionFilter,
) -> Result<()> {
    let transactions = service.list_transactions(user, filter).await?;
    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<12} {:<16} {:>12} {:<30}",
        "ID", "DATE", "KIND", "AMOUNT", "NOTE"
    );
    println!("{}", "-".repeat(80));
    for tx in transactions {
        println!(
            "{:<6} {:<12} {:<16} {:>12} {:<30}",
            tx.id,
            tx.date.format("%Y-%m-%d"),
            tx.kind,
            format_cents(tx.amount_cents),
            truncate(&tx.note, 30)
        );
    }
    Ok(())
}

async fn run_budget_command(service: &LedgerService, cmd: BudgetCommands) -> Result<()> {
    match cmd {
        BudgetCommands::Set {
            user,
            category,
            amount,
        } => {
            let limit = service
                .set_budget_limit(user, category, parse_amount(&amount)?)
                .await?;
            println!(
                "Budget for category {} set to {}",
                limit.category_id,
                format_cents(limit.limit_cents)
            );
        }

        BudgetCommands::List { user } => {
            let limits = service.list_budget_limits(user).await?;
            if limits.is_empty() {
                println!("No budget limits found.");
            } else {
                println!("{:<10} {:>12}", "CATEGORY", "LIMIT");
                println!("{}", "-".repeat(24));
                for limit in limits {
                    println!(
                        "{:<10} {:>12}",
                        limit.category_id,
                        format_cents(limit.limit_cents)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_notification_command(
    service: &LedgerService,
    cmd: NotificationCommands,
) -> Result<()> {
    match cmd {
        NotificationCommands::List { user, unread } => {
            let notifications = service.list_notifications(user, unread).await?;
            if notifications.is_empty() {
                println!("No notifications.");
            }
            for n in notifications {
                let marker = if n.is_read { " " } else { "*" };
                println!(
                    "{} {:<5} {:<8} {}  {}",
                    marker,
                    n.id,
                    n.kind,
                    n.created_at.format("%Y-%m-%d %H:%M"),
                    n.message
                );
            }
        }

        NotificationCommands::Read { user, id } => {
            service.mark_notification_read(user, id).await?;
            println!("Marked notification {} as read", id);
        }
    }
    Ok(())
}

async fn run_group_command(service: &LedgerService, cmd: GroupCommands) -> Result<()> {
    match cmd {
        GroupCommands::Create {
            user,
            name,
            description,
            invitees,
        } => {
            let space = service
                .create_group(user, &name, description.as_deref(), &invitees)
                .await?;
            println!("Created group: {} ({})", space.name, space.id);
        }

        GroupCommands::AddMember {
            user,
            group,
            member,
        } => {
            service.add_group_member(user, group, member).await?;
            println!("Added user {} to group {}", member, group);
        }

        GroupCommands::List { user } => {
            let groups = service.list_groups_for_user(user).await?;
            if groups.is_empty() {
                println!("No groups found.");
            } else {
                println!("{:<6} {:<24} {:<12}", "ID", "NAME", "STATUS");
                println!("{}", "-".repeat(44));
                for group in groups {
                    println!("{:<6} {:<24} {:<12}", group.id, group.name, group.status);
                }
            }
        }

        GroupCommands::Members { user, group } => {
            for member in service.list_group_members(user, group).await? {
                println!("{:<6} {}", member.user_id, member.role);
            }
        }

        GroupCommands::Expense {
            user,
            group,
            amount,
            description,
            payer,
            category,
        } => {
            let group_tx = service
                .add_group_expense(
                    user,
                    group,
                    GroupExpense {
                        amount_cents: parse_amount(&amount)?,
                        description,
                        paid_member: payer,
                        category_id: category,
                    },
                )
                .await?;
            println!(
                "Added shared expense {} paid by {}",
                group_tx.id, group_tx.paid_member
            );
        }

        GroupCommands::Transactions { user, group } => {
            let entries = service.list_group_transactions(user, group).await?;
            if entries.is_empty() {
                println!("No pending shared expenses.");
            } else {
                println!(
                    "{:<6} {:<24} {:>12} {:<8} {:<10}",
                    "ID", "DESCRIPTION", "AMOUNT", "PAYER", "SPLIT"
                );
                println!("{}", "-".repeat(64));
                for entry in entries {
                    let gt = &entry.group_transaction;
                    println!(
                        "{:<6} {:<24} {:>12} {:<8} {:<10}",
                        gt.id,
                        truncate(&gt.description, 24),
                        format_cents(entry.transaction.amount_cents),
                        gt.paid_member,
                        if gt.has_explicit_split() { "custom" } else { "equal" }
                    );
                }
            }
        }

        GroupCommands::Split { user, id, shares } => {
            let split = shares
                .iter()
                .map(|s| parse_share(s))
                .collect::<Result<Vec<_>>>()?;
            let group_tx = service.assign_split(id, user, split).await?;
            if group_tx.has_explicit_split() {
                println!("Split assigned to {} members", group_tx.split.len());
            } else {
                println!("Split reset to equal division");
            }
        }

        GroupCommands::Confirm {
            user,
            group,
            timeout,
        } => {
            let deadline = timeout.map(|secs| Instant::now() + Duration::from_secs(secs));
            let result = service.confirm_group(user, group, deadline).await?;

            println!("Closed group: {}", result.space.name);
            for s in result.settlements.iter().filter(|s| !s.is_self_settled()) {
                println!(
                    "  {} owes {}: {}",
                    s.debtor_id,
                    s.creditor_id,
                    format_cents(s.amount_cents)
                );
            }
            for member in &result.skipped_members {
                println!("  user {} no longer exists; share absorbed by payer", member);
            }
        }
    }
    Ok(())
}

async fn run_settlement_command(service: &LedgerService, cmd: SettlementCommands) -> Result<()> {
    match cmd {
        SettlementCommands::List {
            user,
            group,
            role,
            unpaid,
        } => {
            let role = role
                .map(|r| {
                    SettlementRole::from_str(&r).ok_or_else(|| {
                        anyhow::anyhow!("Invalid role '{}'. Valid roles: debtor, creditor", r)
                    })
                })
                .transpose()?;
            let filter = SettlementFilter {
                space_id: group,
                role,
                unpaid_only: unpaid,
            };

            let views = service.query_settlements(user, &filter).await?;
            if views.is_empty() {
                println!("No settlements found.");
                return Ok(());
            }

            println!(
                "{:<6} {:<18} {:<14} {:<14} {:>12} {:<6}",
                "ID", "GROUP", "DEBTOR", "CREDITOR", "AMOUNT", "PAID"
            );
            println!("{}", "-".repeat(76));
            for view in views {
                let s = &view.settlement;
                let paid = match (s.debtor_paid, s.creditor_paid) {
                    (true, true) => "both",
                    (true, false) => "debtor",
                    (false, true) => "cred.",
                    (false, false) => "no",
                };
                println!(
                    "{:<6} {:<18} {:<14} {:<14} {:>12} {:<6}",
                    s.id,
                    truncate(&view.space_name, 18),
                    truncate(&view.debtor_name, 14),
                    truncate(&view.creditor_name, 14),
                    format_cents(s.amount_cents),
                    paid
                );
            }
        }

        SettlementCommands::Pay { user, id } => {
            let settlement = service.mark_settlement_paid(user, id).await?;
            println!(
                "Settlement {} marked paid (debtor: {}, creditor: {})",
                settlement.id, settlement.debtor_paid, settlement.creditor_paid
            );
        }
    }
    Ok(())
}

async fn run_friend_command(service: &LedgerService, cmd: FriendCommands) -> Result<()> {
    match cmd {
        FriendCommands::Request { user, to } => {
            service.send_friend_request(user, to).await?;
            println!("Friend request sent to {}", to);
        }

        FriendCommands::Requests { user } => {
            let requests = service.list_friend_requests(user).await?;
            if requests.is_empty() {
                println!("No pending friend requests.");
            }
            for request in requests {
                println!(
                    "{:<6} {}",
                    request.sender_id,
                    request.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        FriendCommands::Accept { user, from } => {
            service.accept_friend_request(user, from).await?;
            println!("You are now friends with {}", from);
        }

        FriendCommands::Decline { user, from } => {
            service.decline_friend_request(user, from).await?;
            println!("Declined friend request from {}", from);
        }

        FriendCommands::List { user } => {
            let friends = service.list_friends(user).await?;
            if friends.is_empty() {
                println!("No friends yet.");
            }
            for friend in friends {
                println!("{:<6} {}", friend.id, friend.name);
            }
        }

        FriendCommands::Remove { user, friend } => {
            service.remove_friend(user, friend).await?;
            println!("Removed friend {}", friend);
        }
    }
    Ok(())
}

async fn run_summary_command(service: &LedgerService, cmd: SummaryCommands) -> Result<()> {
    match cmd {
        SummaryCommands::Categories { user, range } => {
            let report = service.category_summary(user, range.resolve()?).await?;
            println!(
                "Spending {} to {}",
                report.from_date.format("%Y-%m-%d"),
                report.to_date.format("%Y-%m-%d")
            );
            println!("{:<20} {:>12} {:>6} {:>7}", "CATEGORY", "TOTAL", "COUNT", "%");
            println!("{}", "-".repeat(48));
            for c in &report.categories {
                println!(
                    "{:<20} {:>12} {:>6} {:>6.1}%",
                    truncate(&c.category, 20),
                    format_cents(c.total),
                    c.count,
                    c.percentage
                );
            }
            println!("{}", "-".repeat(48));
            println!("{:<20} {:>12}", "Total", format_cents(report.total));
        }

        SummaryCommands::CashFlow { user, range } => {
            let report = service.cash_flow_summary(user, range.resolve()?).await?;
            println!(
                "{:<12} {:>12} {:>12} {:>12}",
                "PERIOD", "INCOME", "EXPENSE", "NET"
            );
            println!("{}", "-".repeat(51));
            for p in &report.periods {
                println!(
                    "{:<12} {:>12} {:>12} {:>12}",
                    p.label,
                    format_cents(p.income),
                    format_cents(p.expense),
                    format_cents(p.net)
                );
            }
        }
    }
    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    user: UserId,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service, user);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "settlements" => {
            let count = exporter
                .export_settlements_csv(writer, &SettlementFilter::default())
                .await?;
            if output.is_some() {
                eprintln!("Exported {} settlements", count);
            }
        }
        "transactions" => {
            let count = exporter.export_transactions_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported {} wallets, {} transactions, {} settlements",
                    snapshot.wallets.len(),
                    snapshot.transactions.len(),
                    snapshot.settlements.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: settlements, transactions, full",
                export_type
            );
        }
    }

    Ok(())
}

fn parse_amount(input: &str) -> Result<Cents> {
    parse_cents(input).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn parse_kind(input: &str) -> Result<TransactionKind> {
    TransactionKind::from_str(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid kind '{}'. Valid kinds: expense, income, initial",
            input
        )
    })
}

/// Parse `MEMBER:AMOUNT` into a split share.
fn parse_share(input: &str) -> Result<SplitShare> {
    let (member, amount) = input
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid share '{}'. Use MEMBER:AMOUNT", input))?;
    let member_id: UserId = member
        .trim()
        .parse()
        .with_context(|| format!("Invalid member id in share '{}'", input))?;
    Ok(SplitShare::new(member_id, parse_amount(amount)?))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    use chrono::NaiveDate;

    // Parse YYYY-MM-DD format
    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", date_str))?;

    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;

    Ok(DateTime::from_naive_utc_and_offset(naive_datetime, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_share() {
        let share = parse_share("2:30.50").unwrap();
        assert_eq!(share, SplitShare::new(2, 3050));
        assert!(parse_share("2-30").is_err());
        assert!(parse_share("x:30").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long note", 10), "a rathe...");
    }

    #[test]
    fn test_cli_parses_clear_category() {
        let cli = Cli::try_parse_from([
            "splitledger",
            "update",
            "--user",
            "1",
            "7",
            "--clear-category",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Update {
                id: 7,
                category: None,
                clear_category: true,
                ..
            }
        ));

        assert!(
            Cli::try_parse_from([
                "splitledger",
                "update",
                "--user",
                "1",
                "7",
                "--category",
                "3",
                "--clear-category",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_summary_range_from_dates() {
        let range = RangeArgs {
            period: "month".into(),
            from: Some("2024-01-01".into()),
            to: Some("2024-01-31".into()),
        }
        .resolve()
        .unwrap();
        assert_eq!(range.from, parse_date("2024-01-01").unwrap());
        assert_eq!(range.to.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-31 23:59:59");

        let bad = RangeArgs {
            period: "decade".into(),
            from: None,
            to: None,
        };
        assert!(bad.resolve().is_err());
    }

    #[test]
    fn test_cli_parses_confirm() {
        let cli = Cli::try_parse_from([
            "splitledger",
            "--database",
            "x.db",
            "group",
            "confirm",
            "--user",
            "1",
            "4",
            "--timeout",
            "30",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Group(GroupCommands::Confirm {
                user: 1,
                group: 4,
                timeout: Some(30)
            })
        ));
    }
}
