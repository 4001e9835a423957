use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CategoryId, Cents, UserId, format_cents};

pub type NotificationId = i64;

/// A spending cap a user sets for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBudgetLimit {
    pub user_id: UserId,
    pub category_id: CategoryId,
    pub limit_cents: Cents,
}

/// Share of the limit above which a warning is raised, as a fraction.
pub const WARNING_NUMERATOR: Cents = 4;
pub const WARNING_DENOMINATOR: Cents = 5;

/// Outcome of checking a candidate expense against a budget limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDecision {
    None,
    Warning,
    Exceed,
}

impl NotificationDecision {
    /// Decide from the projected spend after the candidate expense.
    ///
    /// `Exceed` iff projected > limit, `Warning` iff
    /// limit * 0.8 < projected <= limit. Compared in integers so that the
    /// boundaries are exact.
    pub fn for_projection(projected: Cents, limit: Cents) -> Self {
        if projected > limit {
            NotificationDecision::Exceed
        } else if projected * WARNING_DENOMINATOR > limit * WARNING_NUMERATOR {
            NotificationDecision::Warning
        } else {
            NotificationDecision::None
        }
    }

    pub fn kind(&self) -> Option<NotificationKind> {
        match self {
            NotificationDecision::None => None,
            NotificationDecision::Warning => Some(NotificationKind::Warning),
            NotificationDecision::Exceed => Some(NotificationKind::Exceed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Warning,
    Exceed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Warning => "warning",
            NotificationKind::Exceed => "exceed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "warning" => Some(NotificationKind::Warning),
            "exceed" => Some(NotificationKind::Exceed),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Structured body of a budget notification, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationPayload {
    Warning {
        category: String,
        limit_cents: Cents,
        projected_cents: Cents,
    },
    Exceed {
        category: String,
        limit_cents: Cents,
        projected_cents: Cents,
    },
}

impl NotificationPayload {
    pub fn new(
        kind: NotificationKind,
        category: String,
        limit_cents: Cents,
        projected_cents: Cents,
    ) -> Self {
        match kind {
            NotificationKind::Warning => NotificationPayload::Warning {
                category,
                limit_cents,
                projected_cents,
            },
            NotificationKind::Exceed => NotificationPayload::Exceed {
                category,
                limit_cents,
                projected_cents,
            },
        }
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationPayload::Warning { .. } => NotificationKind::Warning,
            NotificationPayload::Exceed { .. } => NotificationKind::Exceed,
        }
    }

    /// Human-readable one-liner stored alongside the payload.
    pub fn message(&self) -> String {
        match self {
            NotificationPayload::Warning {
                category,
                limit_cents,
                projected_cents,
            } => format!(
                "Spending in {} reached {} of your {} budget",
                category,
                format_cents(*projected_cents),
                format_cents(*limit_cents)
            ),
            NotificationPayload::Exceed {
                category,
                limit_cents,
                projected_cents,
            } => format!(
                "Spending in {} is {}, over your {} budget",
                category,
                format_cents(*projected_cents),
                format_cents(*limit_cents)
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetNotification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub category_id: CategoryId,
    pub kind: NotificationKind,
    pub message: String,
    pub payload: NotificationPayload,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_above_eighty_percent() {
        // limit 1000, prior 750, new 100 => 850
        assert_eq!(
            NotificationDecision::for_projection(85000, 100000),
            NotificationDecision::Warning
        );
    }

    #[test]
    fn test_exceed_above_limit() {
        // limit 1000, prior 750, new 300 => 1050
        assert_eq!(
            NotificationDecision::for_projection(105000, 100000),
            NotificationDecision::Exceed
        );
    }

    #[test]
    fn test_boundaries_are_exact() {
        let limit = 100000;
        assert_eq!(
            NotificationDecision::for_projection(limit, limit),
            NotificationDecision::Warning
        );
        assert_eq!(
            NotificationDecision::for_projection(limit + 1, limit),
            NotificationDecision::Exceed
        );
        assert_eq!(
            NotificationDecision::for_projection(80000, limit),
            NotificationDecision::None
        );
        assert_eq!(
            NotificationDecision::for_projection(80001, limit),
            NotificationDecision::Warning
        );
    }

    #[test]
    fn test_boundary_with_fractional_threshold() {
        // 80% of 0.99 is 0.792: 0.79 stays quiet, 0.80 warns
        assert_eq!(
            NotificationDecision::for_projection(79, 99),
            NotificationDecision::None
        );
        assert_eq!(
            NotificationDecision::for_projection(80, 99),
            NotificationDecision::Warning
        );
    }

    #[test]
    fn test_payload_serializes_with_tag() {
        let payload =
            NotificationPayload::new(NotificationKind::Exceed, "Food".into(), 100000, 105000);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "exceed");
        assert_eq!(json["category"], "Food");
        assert_eq!(payload.kind(), NotificationKind::Exceed);
        assert!(payload.message().contains("1050.00"));
    }
}
