use serde::{Deserialize, Serialize};

use super::UserId;

pub type CategoryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    Expense,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Income => "income",
            CategoryKind::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(CategoryKind::Income),
            "expense" => Some(CategoryKind::Expense),
            _ => None,
        }
    }
}

impl std::fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    /// Owner of a personal category; `None` for categories shared by everyone.
    pub user_id: Option<UserId>,
    pub name: String,
    pub kind: CategoryKind,
}

impl Category {
    /// Shared categories are visible to everyone, personal ones to their owner.
    pub fn is_visible_to(&self, user_id: UserId) -> bool {
        self.user_id.is_none_or(|owner| owner == user_id)
    }
}
