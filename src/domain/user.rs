use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CategoryId, WalletId};

pub type UserId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Recipient id on the external messaging channel, if the user linked one.
    pub external_id: Option<String>,
    pub default_wallet_id: Option<WalletId>,
    pub default_category_id: Option<CategoryId>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub external_id: Option<String>,
}

impl NewUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}
