use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::domain::{
    GroupMember, GroupRole, GroupSpace, GroupStatus, GroupTransaction, GroupTransactionId,
    NewSettlement, SettlementFilter, SettlementId, SettlementRole, SettlementView, SpaceId,
    SplitShare, SummaryGroupTransaction, TransactionId, UserId,
};

use super::repository::{LedgerStore, parse_timestamp};

const SETTLEMENT_COLUMNS: &str = "s.id AS id, s.space_id AS space_id, s.debtor_id AS debtor_id, s.creditor_id AS creditor_id, s.amount_cents AS amount_cents, s.payload AS payload, s.description AS description, s.debtor_paid AS debtor_paid, s.creditor_paid AS creditor_paid, s.created_at AS created_at";

impl LedgerStore<'_> {
    // ========================
    // Group space operations
    // ========================

    pub async fn insert_group(&mut self, name: &str, description: Option<&str>) -> Result<GroupSpace> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO group_spaces (name, description, status, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(GroupStatus::Open.as_str())
        .bind(created_at.to_rfc3339())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save group")?;

        Ok(GroupSpace {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
            status: GroupStatus::Open,
            created_at,
        })
    }

    pub async fn get_group(&mut self, id: SpaceId) -> Result<Option<GroupSpace>> {
        let row = sqlx::query(
            "SELECT id, name, description, status, created_at FROM group_spaces WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch group")?;

        row.as_ref().map(row_to_group).transpose()
    }

    pub async fn set_group_status(&mut self, id: SpaceId, status: GroupStatus) -> Result<()> {
        sqlx::query("UPDATE group_spaces SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to update group status")?;
        Ok(())
    }

    /// Move an open group to `Confirming` in one conditional update.
    /// Returns false when the group was not open, i.e. someone else holds it
    /// or it is already closed.
    pub async fn claim_group_for_confirmation(&mut self, id: SpaceId) -> Result<bool> {
        let result = sqlx::query("UPDATE group_spaces SET status = ? WHERE id = ? AND status = ?")
            .bind(GroupStatus::Confirming.as_str())
            .bind(id)
            .bind(GroupStatus::Open.as_str())
            .execute(&mut *self.conn)
            .await
            .context("Failed to claim group for confirmation")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_groups_for_user(&mut self, user_id: UserId) -> Result<Vec<GroupSpace>> {
        let rows = sqlx::query(
            r#"
            SELECT g.id AS id, g.name AS name, g.description AS description, g.status AS status, g.created_at AS created_at
            FROM group_spaces g
            JOIN group_members m ON m.space_id = g.id
            WHERE m.user_id = ?
            ORDER BY g.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list groups")?;

        rows.iter().map(row_to_group).collect()
    }

    // ========================
    // Membership operations
    // ========================

    /// Adds the membership while the group is open. Returns false when
    /// nothing was written: the user is already a member or the group has
    /// left the open state.
    pub async fn add_group_member(
        &mut self,
        space_id: SpaceId,
        user_id: UserId,
        role: GroupRole,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_members (space_id, user_id, role)
            SELECT ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM group_spaces WHERE id = ? AND status = ?)
            ON CONFLICT (space_id, user_id) DO NOTHING
            "#,
        )
        .bind(space_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(space_id)
        .bind(GroupStatus::Open.as_str())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save group member")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_group_member(
        &mut self,
        space_id: SpaceId,
        user_id: UserId,
    ) -> Result<Option<GroupMember>> {
        let row = sqlx::query(
            "SELECT space_id, user_id, role FROM group_members WHERE space_id = ? AND user_id = ?",
        )
        .bind(space_id)
        .bind(user_id)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch group member")?;

        row.as_ref().map(row_to_member).transpose()
    }

    /// Members ordered by user id.
    pub async fn list_group_members(&mut self, space_id: SpaceId) -> Result<Vec<GroupMember>> {
        let rows = sqlx::query(
            "SELECT space_id, user_id, role FROM group_members WHERE space_id = ? ORDER BY user_id",
        )
        .bind(space_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list group members")?;

        rows.iter().map(row_to_member).collect()
    }

    // ========================
    // Group transaction operations
    // ========================

    /// Insert a group transaction if the group is still open; `None` means
    /// the group was claimed or closed first.
    pub async fn insert_group_transaction(
        &mut self,
        space_id: SpaceId,
        transaction_id: TransactionId,
        description: &str,
        paid_member: UserId,
    ) -> Result<Option<GroupTransaction>> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_transactions (space_id, transaction_id, description, paid_member_id, split)
            SELECT ?, ?, ?, ?, '[]'
            WHERE EXISTS (SELECT 1 FROM group_spaces WHERE id = ? AND status = ?)
            "#,
        )
        .bind(space_id)
        .bind(transaction_id)
        .bind(description)
        .bind(paid_member)
        .bind(space_id)
        .bind(GroupStatus::Open.as_str())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save group transaction")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(GroupTransaction {
            id: result.last_insert_rowid(),
            space_id,
            transaction_id,
            description: description.to_string(),
            paid_member,
            split: Vec::new(),
        }))
    }

    pub async fn get_group_transaction(
        &mut self,
        id: GroupTransactionId,
    ) -> Result<Option<GroupTransaction>> {
        let row = sqlx::query(
            "SELECT id, space_id, transaction_id, description, paid_member_id, split FROM group_transactions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch group transaction")?;

        row.as_ref().map(row_to_group_transaction).transpose()
    }

    /// Group transactions in creation order.
    pub async fn list_group_transactions(
        &mut self,
        space_id: SpaceId,
    ) -> Result<Vec<GroupTransaction>> {
        let rows = sqlx::query(
            "SELECT id, space_id, transaction_id, description, paid_member_id, split FROM group_transactions WHERE space_id = ? ORDER BY id",
        )
        .bind(space_id)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list group transactions")?;

        rows.iter().map(row_to_group_transaction).collect()
    }

    /// Replace the split while the owning group is open. Returns false when
    /// the transaction is gone or its group is no longer open.
    pub async fn update_group_split(
        &mut self,
        id: GroupTransactionId,
        split: &[SplitShare],
    ) -> Result<bool> {
        let split_json = serde_json::to_string(split)?;
        let result = sqlx::query(
            r#"
            UPDATE group_transactions SET split = ?
            WHERE id = ?
              AND space_id IN (SELECT id FROM group_spaces WHERE status = ?)
            "#,
        )
        .bind(&split_json)
        .bind(id)
        .bind(GroupStatus::Open.as_str())
        .execute(&mut *self.conn)
        .await
        .context("Failed to update split")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_group_transaction(&mut self, id: GroupTransactionId) -> Result<()> {
        sqlx::query("DELETE FROM group_transactions WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete group transaction")?;
        Ok(())
    }

    // ========================
    // Settlement operations
    // ========================

    pub async fn insert_settlement(
        &mut self,
        settlement: &NewSettlement,
    ) -> Result<SummaryGroupTransaction> {
        let created_at = Utc::now();
        let payload_json = serde_json::to_string(&settlement.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO summary_group_transactions
                (space_id, debtor_id, creditor_id, amount_cents, payload, description, debtor_paid, creditor_paid, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(settlement.space_id)
        .bind(settlement.debtor_id)
        .bind(settlement.creditor_id)
        .bind(settlement.amount_cents)
        .bind(&payload_json)
        .bind(&settlement.description)
        .bind(settlement.debtor_paid)
        .bind(settlement.creditor_paid)
        .bind(created_at.to_rfc3339())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save settlement")?;

        Ok(SummaryGroupTransaction {
            id: result.last_insert_rowid(),
            space_id: settlement.space_id,
            debtor_id: settlement.debtor_id,
            creditor_id: settlement.creditor_id,
            amount_cents: settlement.amount_cents,
            payload: settlement.payload.clone(),
            description: settlement.description.clone(),
            debtor_paid: settlement.debtor_paid,
            creditor_paid: settlement.creditor_paid,
            created_at,
        })
    }

    pub async fn get_settlement(
        &mut self,
        id: SettlementId,
    ) -> Result<Option<SummaryGroupTransaction>> {
        let query = format!(
            "SELECT {} FROM summary_group_transactions s WHERE s.id = ?",
            SETTLEMENT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .context("Failed to fetch settlement")?;

        row.as_ref().map(row_to_settlement).transpose()
    }

    /// Settlement records in which the user is debtor or creditor, joined
    /// with party and group names.
    pub async fn list_settlements_for_user(
        &mut self,
        user_id: UserId,
        filter: &SettlementFilter,
    ) -> Result<Vec<SettlementView>> {
        let mut query = format!(
            "SELECT {}, g.name as space_name, \
             COALESCE(d.name, '') as debtor_name, COALESCE(c.name, '') as creditor_name \
             FROM summary_group_transactions s \
             JOIN group_spaces g ON g.id = s.space_id \
             LEFT JOIN users d ON d.id = s.debtor_id \
             LEFT JOIN users c ON c.id = s.creditor_id \
             WHERE ",
            SETTLEMENT_COLUMNS
        );

        match filter.role {
            Some(SettlementRole::Debtor) => query.push_str("s.debtor_id = ?"),
            Some(SettlementRole::Creditor) => query.push_str("s.creditor_id = ?"),
            None => query.push_str("(s.debtor_id = ? OR s.creditor_id = ?)"),
        }
        if filter.space_id.is_some() {
            query.push_str(" AND s.space_id = ?");
        }
        if filter.unpaid_only {
            query.push_str(
                " AND ((s.debtor_id = ? AND s.debtor_paid = 0) OR (s.creditor_id = ? AND s.creditor_paid = 0))",
            );
        }
        query.push_str(" ORDER BY s.id");

        let mut sql_query = sqlx::query(&query).bind(user_id);
        if filter.role.is_none() {
            sql_query = sql_query.bind(user_id);
        }
        if let Some(space_id) = filter.space_id {
            sql_query = sql_query.bind(space_id);
        }
        if filter.unpaid_only {
            sql_query = sql_query.bind(user_id).bind(user_id);
        }

        let rows = sql_query
            .fetch_all(&mut *self.conn)
            .await
            .context("Failed to query settlements")?;

        rows.iter()
            .map(|row| {
                Ok(SettlementView {
                    settlement: row_to_settlement(row)?,
                    space_name: row.get("space_name"),
                    debtor_name: row.get("debtor_name"),
                    creditor_name: row.get("creditor_name"),
                })
            })
            .collect()
    }

    pub async fn set_settlement_paid(
        &mut self,
        id: SettlementId,
        role: SettlementRole,
    ) -> Result<()> {
        let query = match role {
            SettlementRole::Debtor => "UPDATE summary_group_transactions SET debtor_paid = 1 WHERE id = ?",
            SettlementRole::Creditor => {
                "UPDATE summary_group_transactions SET creditor_paid = 1 WHERE id = ?"
            }
        };
        sqlx::query(query)
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .context("Failed to mark settlement paid")?;
        Ok(())
    }
}

fn row_to_group(row: &SqliteRow) -> Result<GroupSpace> {
    let status_str: String = row.get("status");
    let created_at_str: String = row.get("created_at");

    Ok(GroupSpace {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        status: GroupStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid group status: {}", status_str))?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_member(row: &SqliteRow) -> Result<GroupMember> {
    let role_str: String = row.get("role");

    Ok(GroupMember {
        space_id: row.get("space_id"),
        user_id: row.get("user_id"),
        role: GroupRole::from_str(&role_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid group role: {}", role_str))?,
    })
}

fn row_to_group_transaction(row: &SqliteRow) -> Result<GroupTransaction> {
    let split_json: String = row.get("split");

    Ok(GroupTransaction {
        id: row.get("id"),
        space_id: row.get("space_id"),
        transaction_id: row.get("transaction_id"),
        description: row.get("description"),
        paid_member: row.get("paid_member_id"),
        split: serde_json::from_str(&split_json).context("Invalid split")?,
    })
}

fn row_to_settlement(row: &SqliteRow) -> Result<SummaryGroupTransaction> {
    let payload_json: String = row.get("payload");
    let created_at_str: String = row.get("created_at");

    Ok(SummaryGroupTransaction {
        id: row.get("id"),
        space_id: row.get("space_id"),
        debtor_id: row.get("debtor_id"),
        creditor_id: row.get("creditor_id"),
        amount_cents: row.get("amount_cents"),
        payload: serde_json::from_str(&payload_json).context("Invalid settlement payload")?,
        description: row.get("description"),
        debtor_paid: row.get::<bool, _>("debtor_paid"),
        creditor_paid: row.get::<bool, _>("creditor_paid"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
