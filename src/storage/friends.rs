use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::domain::{FriendRequest, FriendRequestId, User, UserId};

use super::repository::{LedgerStore, parse_timestamp, row_to_user};

impl LedgerStore<'_> {
    // ========================
    // Friend request operations
    // ========================

    pub async fn insert_friend_request(
        &mut self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<FriendRequest> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO friend_requests (sender_id, receiver_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(created_at.to_rfc3339())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save friend request")?;

        Ok(FriendRequest {
            id: result.last_insert_rowid(),
            sender_id,
            receiver_id,
            created_at,
        })
    }

    /// A pending request between the two users, in either direction.
    pub async fn find_friend_request_between(
        &mut self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<FriendRequest>> {
        let row = sqlx::query(
            r#"
            SELECT id, sender_id, receiver_id, created_at FROM friend_requests
            WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch friend request")?;

        row.as_ref().map(row_to_friend_request).transpose()
    }

    /// Requests waiting for `receiver_id` to answer, oldest first.
    pub async fn list_incoming_friend_requests(
        &mut self,
        receiver_id: UserId,
    ) -> Result<Vec<FriendRequest>> {
        let rows = sqlx::query(
            "SELECT id, sender_id, receiver_id, created_at FROM friend_requests WHERE receiver_id = ? ORDER BY id",
        )
        .bind(receiver_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list friend requests")?;

        rows.iter().map(row_to_friend_request).collect()
    }

    pub async fn delete_friend_request(&mut self, id: FriendRequestId) -> Result<()> {
        sqlx::query("DELETE FROM friend_requests WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete friend request")?;
        Ok(())
    }

    // ========================
    // Friendship operations
    // ========================

    /// Record the friendship in both directions.
    pub async fn insert_friendship(&mut self, a: UserId, b: UserId) -> Result<()> {
        let created_at = Utc::now().to_rfc3339();
        for (user_id, friend_id) in [(a, b), (b, a)] {
            sqlx::query(
                "INSERT INTO friendships (user_id, friend_id, created_at) VALUES (?, ?, ?) ON CONFLICT (user_id, friend_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(friend_id)
            .bind(&created_at)
            .execute(&mut *self.conn)
            .await
            .context("Failed to save friendship")?;
        }
        Ok(())
    }

    pub async fn are_friends(&mut self, a: UserId, b: UserId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM friendships WHERE user_id = ? AND friend_id = ?",
        )
        .bind(a)
        .bind(b)
        .fetch_one(&mut *self.conn)
        .await
        .context("Failed to check friendship")?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Remove the friendship in both directions. Returns false if there was none.
    pub async fn delete_friendship(&mut self, a: UserId, b: UserId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM friendships WHERE (user_id = ? AND friend_id = ?) OR (user_id = ? AND friend_id = ?)",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .execute(&mut *self.conn)
        .await
        .context("Failed to delete friendship")?;
        Ok(result.rows_affected() > 0)
    }

    /// Friends of `user_id` that still exist, ordered by id.
    pub async fn list_friends(&mut self, user_id: UserId) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id AS id, u.name AS name, u.email AS email, u.external_id AS external_id,
                   u.default_wallet_id AS default_wallet_id, u.default_category_id AS default_category_id,
                   u.created_at AS created_at
            FROM friendships f
            JOIN users u ON u.id = f.friend_id
            WHERE f.user_id = ?
            ORDER BY u.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list friends")?;

        rows.iter().map(row_to_user).collect()
    }
}

fn row_to_friend_request(row: &SqliteRow) -> Result<FriendRequest> {
    let created_at_str: String = row.get("created_at");

    Ok(FriendRequest {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        receiver_id: row.get("receiver_id"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
