use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};

use crate::domain::{
    BudgetNotification, Category, CategoryId, CategoryKind, Cents, LedgerTransaction,
    NewTransaction, NewUser, NotificationId, NotificationKind, NotificationPayload,
    TransactionFilter, TransactionId, TransactionKind, User, UserBudgetLimit, UserId, Wallet,
    WalletId, WalletType,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_FRIENDS};

/// Owns the SQLite connection pool and hands out connections and transactions.
/// All queries live on [`LedgerStore`], which runs on whatever connection it
/// is given, so the same code works inside and outside a transaction.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::raw_sql(MIGRATION_002_FRIENDS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Check out a plain connection; every statement commits on its own.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context("Failed to acquire database connection")
    }

    /// Open a transaction. Dropping it without committing rolls it back.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }
}

/// Query interface over a single borrowed connection.
pub struct LedgerStore<'c> {
    pub(super) conn: &'c mut SqliteConnection,
}

impl<'c> LedgerStore<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    // ========================
    // User operations
    // ========================

    pub async fn insert_user(&mut self, user: &NewUser) -> Result<User> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, email, external_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.external_id)
        .bind(created_at.to_rfc3339())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save user")?;

        Ok(User {
            id: result.last_insert_rowid(),
            name: user.name.clone(),
            email: user.email.clone(),
            external_id: user.external_id.clone(),
            default_wallet_id: None,
            default_category_id: None,
            created_at,
        })
    }

    pub async fn get_user(&mut self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, external_id, default_wallet_id, default_category_id, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch user")?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, external_id, default_wallet_id, default_category_id, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch user by email")?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// Fetch every user whose id is in `ids`. Unknown ids are simply absent.
    pub async fn list_users_by_ids(&mut self, ids: &[UserId]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!(
            "SELECT id, name, email, external_id, default_wallet_id, default_category_id, created_at FROM users WHERE id IN ({}) ORDER BY id",
            placeholders
        );

        let mut sql_query = sqlx::query(&query);
        for id in ids {
            sql_query = sql_query.bind(*id);
        }

        let rows = sql_query
            .fetch_all(&mut *self.conn)
            .await
            .context("Failed to list users by id")?;

        rows.iter().map(row_to_user).collect()
    }

    /// Returns false if there was no such user.
    pub async fn delete_user(&mut self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_default_wallet(&mut self, user_id: UserId, wallet_id: WalletId) -> Result<()> {
        sqlx::query("UPDATE users SET default_wallet_id = ? WHERE id = ?")
            .bind(wallet_id)
            .bind(user_id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to set default wallet")?;
        Ok(())
    }

    pub async fn set_default_category(
        &mut self,
        user_id: UserId,
        category_id: Option<CategoryId>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET default_category_id = ? WHERE id = ?")
            .bind(category_id)
            .bind(user_id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to set default category")?;
        Ok(())
    }

    // ========================
    // Wallet and category operations
    // ========================

    pub async fn insert_wallet(
        &mut self,
        user_id: UserId,
        name: &str,
        wallet_type: WalletType,
    ) -> Result<Wallet> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO wallets (user_id, name, wallet_type, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(wallet_type.as_str())
        .bind(created_at.to_rfc3339())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save wallet")?;

        Ok(Wallet {
            id: result.last_insert_rowid(),
            user_id,
            name: name.to_string(),
            wallet_type,
            created_at,
        })
    }

    pub async fn get_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            "SELECT id, user_id, name, wallet_type, created_at FROM wallets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch wallet")?;

        row.as_ref().map(row_to_wallet).transpose()
    }

    pub async fn list_wallets_for_user(&mut self, user_id: UserId) -> Result<Vec<Wallet>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, wallet_type, created_at FROM wallets WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list wallets")?;

        rows.iter().map(row_to_wallet).collect()
    }

    pub async fn insert_category(
        &mut self,
        user_id: Option<UserId>,
        name: &str,
        kind: CategoryKind,
    ) -> Result<Category> {
        let result = sqlx::query("INSERT INTO categories (user_id, name, kind) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(name)
            .bind(kind.as_str())
            .execute(&mut *self.conn)
            .await
            .context("Failed to save category")?;

        Ok(Category {
            id: result.last_insert_rowid(),
            user_id,
            name: name.to_string(),
            kind,
        })
    }

    pub async fn get_category(&mut self, id: CategoryId) -> Result<Option<Category>> {
        let row = sqlx::query("SELECT id, user_id, name, kind FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .context("Failed to fetch category")?;

        row.as_ref().map(row_to_category).transpose()
    }

    /// Returns false if there was no such wallet.
    pub async fn delete_wallet(&mut self, id: WalletId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM wallets WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete wallet")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_wallet_entries(&mut self, wallet_id: WalletId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM transactions WHERE wallet_id = ?")
            .bind(wallet_id)
            .fetch_one(&mut *self.conn)
            .await
            .context("Failed to count wallet entries")?;
        Ok(row.get("count"))
    }

    /// Clear the default wallet of every user pointing at `wallet_id`.
    pub async fn clear_default_wallet(&mut self, wallet_id: WalletId) -> Result<()> {
        sqlx::query("UPDATE users SET default_wallet_id = NULL WHERE default_wallet_id = ?")
            .bind(wallet_id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to clear default wallet")?;
        Ok(())
    }

    /// The user's own categories followed by the shared ones.
    pub async fn list_categories_for_user(&mut self, user_id: UserId) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, kind FROM categories
            WHERE user_id = ? OR user_id IS NULL
            ORDER BY user_id IS NULL, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list categories")?;

        rows.iter().map(row_to_category).collect()
    }

    /// Delete a category and detach everything that refers to it: entries
    /// lose their category, budget limits go, defaults are cleared.
    pub async fn delete_category(&mut self, id: CategoryId) -> Result<bool> {
        sqlx::query("UPDATE transactions SET category_id = NULL WHERE category_id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to detach category from transactions")?;

        sqlx::query("DELETE FROM user_budget_limits WHERE category_id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete budget limits for category")?;

        sqlx::query("UPDATE users SET default_category_id = NULL WHERE default_category_id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to clear default category")?;

        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete category")?;
        Ok(result.rows_affected() > 0)
    }

    // ========================
    // Ledger transaction operations
    // ========================

    pub async fn insert_transaction(&mut self, tx: &NewTransaction) -> Result<LedgerTransaction> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (wallet_id, category_id, amount_cents, kind, date, note, sorted, paid)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.wallet_id)
        .bind(tx.category_id)
        .bind(tx.amount_cents)
        .bind(tx.kind.as_str())
        .bind(tx.date.to_rfc3339())
        .bind(&tx.note)
        .bind(tx.sorted)
        .bind(tx.paid)
        .execute(&mut *self.conn)
        .await
        .context("Failed to save transaction")?;

        Ok(tx.clone().into_transaction(result.last_insert_rowid()))
    }

    pub async fn get_transaction(&mut self, id: TransactionId) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, wallet_id, category_id, amount_cents, kind, date, note, sorted, paid
            FROM transactions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    pub async fn update_transaction(&mut self, tx: &LedgerTransaction) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET wallet_id = ?, category_id = ?, amount_cents = ?, kind = ?, date = ?, note = ?, sorted = ?, paid = ?
            WHERE id = ?
            "#,
        )
        .bind(tx.wallet_id)
        .bind(tx.category_id)
        .bind(tx.amount_cents)
        .bind(tx.kind.as_str())
        .bind(tx.date.to_rfc3339())
        .bind(&tx.note)
        .bind(tx.sorted)
        .bind(tx.paid)
        .bind(tx.id)
        .execute(&mut *self.conn)
        .await
        .context("Failed to update transaction")?;
        Ok(())
    }

    pub async fn delete_transaction(&mut self, id: TransactionId) -> Result<()> {
        sqlx::query("DELETE FROM transactions WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete transaction")?;
        Ok(())
    }

    /// List a user's transactions (across all their wallets), newest first.
    pub async fn list_transactions_for_user(
        &mut self,
        user_id: UserId,
        filter: &TransactionFilter,
    ) -> Result<Vec<LedgerTransaction>> {
        let mut query = String::from(
            "SELECT t.id AS id, t.wallet_id AS wallet_id, t.category_id AS category_id, t.amount_cents AS amount_cents, t.kind AS kind, t.date AS date, t.note AS note, t.sorted AS sorted, t.paid AS paid \
             FROM transactions t JOIN wallets w ON w.id = t.wallet_id \
             WHERE w.user_id = ?",
        );

        if filter.wallet_id.is_some() {
            query.push_str(" AND t.wallet_id = ?");
        }
        if filter.category_id.is_some() {
            query.push_str(" AND t.category_id = ?");
        }
        if filter.kind.is_some() {
            query.push_str(" AND t.kind = ?");
        }
        if filter.min_amount.is_some() {
            query.push_str(" AND t.amount_cents >= ?");
        }
        if filter.max_amount.is_some() {
            query.push_str(" AND t.amount_cents <= ?");
        }
        if filter.from_date.is_some() {
            query.push_str(" AND t.date >= ?");
        }
        if filter.to_date.is_some() {
            query.push_str(" AND t.date <= ?");
        }

        query.push_str(" ORDER BY t.date DESC, t.id DESC");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query).bind(user_id);
        if let Some(wallet_id) = filter.wallet_id {
            sql_query = sql_query.bind(wallet_id);
        }
        if let Some(category_id) = filter.category_id {
            sql_query = sql_query.bind(category_id);
        }
        if let Some(kind) = filter.kind {
            sql_query = sql_query.bind(kind.as_str());
        }
        if let Some(min) = filter.min_amount {
            sql_query = sql_query.bind(min);
        }
        if let Some(max) = filter.max_amount {
            sql_query = sql_query.bind(max);
        }
        if let Some(from) = filter.from_date {
            sql_query = sql_query.bind(from.to_rfc3339());
        }
        if let Some(to) = filter.to_date {
            sql_query = sql_query.bind(to.to_rfc3339());
        }

        let rows = sql_query
            .fetch_all(&mut *self.conn)
            .await
            .context("Failed to list filtered transactions")?;

        rows.iter().map(row_to_transaction).collect()
    }

    /// Total of the user's expense entries in a category across all of their
    /// wallets, leaving out `exclude` if given.
    pub async fn sum_expenses_for_category(
        &mut self,
        user_id: UserId,
        category_id: CategoryId,
        exclude: Option<TransactionId>,
    ) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(t.amount_cents), 0) as total
            FROM transactions t
            JOIN wallets w ON w.id = t.wallet_id
            WHERE w.user_id = ?
              AND t.category_id = ?
              AND t.kind = ?
              AND (? IS NULL OR t.id <> ?)
            "#,
        )
        .bind(user_id)
        .bind(category_id)
        .bind(TransactionKind::Expense.as_str())
        .bind(exclude)
        .bind(exclude)
        .fetch_one(&mut *self.conn)
        .await
        .context("Failed to sum expenses by category")?;

        Ok(row.get("total"))
    }

    // ========================
    // Budget limit and notification operations
    // ========================

    pub async fn upsert_budget_limit(&mut self, limit: &UserBudgetLimit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_budget_limits (user_id, category_id, limit_cents)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id, category_id) DO UPDATE SET limit_cents = excluded.limit_cents
            "#,
        )
        .bind(limit.user_id)
        .bind(limit.category_id)
        .bind(limit.limit_cents)
        .execute(&mut *self.conn)
        .await
        .context("Failed to save budget limit")?;
        Ok(())
    }

    pub async fn get_budget_limit(
        &mut self,
        user_id: UserId,
        category_id: CategoryId,
    ) -> Result<Option<UserBudgetLimit>> {
        let row = sqlx::query(
            "SELECT user_id, category_id, limit_cents FROM user_budget_limits WHERE user_id = ? AND category_id = ?",
        )
        .bind(user_id)
        .bind(category_id)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch budget limit")?;

        Ok(row.map(|row| UserBudgetLimit {
            user_id: row.get("user_id"),
            category_id: row.get("category_id"),
            limit_cents: row.get("limit_cents"),
        }))
    }

    pub async fn list_budget_limits(&mut self, user_id: UserId) -> Result<Vec<UserBudgetLimit>> {
        let rows = sqlx::query(
            "SELECT user_id, category_id, limit_cents FROM user_budget_limits WHERE user_id = ? ORDER BY category_id",
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list budget limits")?;

        Ok(rows
            .iter()
            .map(|row| UserBudgetLimit {
                user_id: row.get("user_id"),
                category_id: row.get("category_id"),
                limit_cents: row.get("limit_cents"),
            })
            .collect())
    }

    pub async fn insert_notification(
        &mut self,
        user_id: UserId,
        category_id: CategoryId,
        payload: &NotificationPayload,
    ) -> Result<BudgetNotification> {
        let created_at = Utc::now();
        let message = payload.message();
        let payload_json = serde_json::to_string(payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO budget_notifications (user_id, category_id, kind, message, payload, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(user_id)
        .bind(category_id)
        .bind(payload.kind().as_str())
        .bind(&message)
        .bind(&payload_json)
        .bind(created_at.to_rfc3339())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save notification")?;

        Ok(BudgetNotification {
            id: result.last_insert_rowid(),
            user_id,
            category_id,
            kind: payload.kind(),
            message,
            payload: payload.clone(),
            is_read: false,
            created_at,
        })
    }

    pub async fn list_notifications(
        &mut self,
        user_id: UserId,
        unread_only: bool,
    ) -> Result<Vec<BudgetNotification>> {
        let query = if unread_only {
            "SELECT id, user_id, category_id, kind, message, payload, is_read, created_at FROM budget_notifications WHERE user_id = ? AND is_read = 0 ORDER BY id DESC"
        } else {
            "SELECT id, user_id, category_id, kind, message, payload, is_read, created_at FROM budget_notifications WHERE user_id = ? ORDER BY id DESC"
        };

        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&mut *self.conn)
            .await
            .context("Failed to list notifications")?;

        rows.iter().map(row_to_notification).collect()
    }

    /// Returns false if the user has no such notification.
    pub async fn mark_notification_read(
        &mut self,
        user_id: UserId,
        id: NotificationId,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE budget_notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .execute(&mut *self.conn)
                .await
                .context("Failed to mark notification read")?;
        Ok(result.rows_affected() > 0)
    }
}

pub(super) fn parse_timestamp(value: &str, what: &'static str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {} timestamp", what))?
        .with_timezone(&Utc))
}

pub(super) fn row_to_user(row: &SqliteRow) -> Result<User> {
    let created_at_str: String = row.get("created_at");

    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        external_id: row.get("external_id"),
        default_wallet_id: row.get("default_wallet_id"),
        default_category_id: row.get("default_category_id"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
    let wallet_type_str: String = row.get("wallet_type");
    let created_at_str: String = row.get("created_at");

    Ok(Wallet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        wallet_type: WalletType::from_str(&wallet_type_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid wallet type: {}", wallet_type_str))?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_category(row: &SqliteRow) -> Result<Category> {
    let kind_str: String = row.get("kind");

    Ok(Category {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        kind: CategoryKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid category kind: {}", kind_str))?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<LedgerTransaction> {
    let kind_str: String = row.get("kind");
    let date_str: String = row.get("date");

    Ok(LedgerTransaction {
        id: row.get("id"),
        wallet_id: row.get("wallet_id"),
        category_id: row.get("category_id"),
        amount_cents: row.get("amount_cents"),
        kind: TransactionKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
        date: parse_timestamp(&date_str, "date")?,
        note: row.get("note"),
        sorted: row.get::<bool, _>("sorted"),
        paid: row.get::<bool, _>("paid"),
    })
}

fn row_to_notification(row: &SqliteRow) -> Result<BudgetNotification> {
    let kind_str: String = row.get("kind");
    let payload_json: String = row.get("payload");
    let created_at_str: String = row.get("created_at");

    Ok(BudgetNotification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        category_id: row.get("category_id"),
        kind: NotificationKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid notification kind: {}", kind_str))?,
        message: row.get("message"),
        payload: serde_json::from_str(&payload_json).context("Invalid notification payload")?,
        is_read: row.get::<bool, _>("is_read"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
