use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

pub type WalletId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    Cash,
    CreditCard,
    BankTransfer,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Cash => "cash",
            WalletType::CreditCard => "credit_card",
            WalletType::BankTransfer => "bank_transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cash" => Some(WalletType::Cash),
            "credit_card" => Some(WalletType::CreditCard),
            "bank_transfer" => Some(WalletType::BankTransfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A place a user's money lives. Every personal ledger transaction is booked
/// against exactly one wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub name: String,
    pub wallet_type: WalletType,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_type_roundtrip() {
        for wt in [
            WalletType::Cash,
            WalletType::CreditCard,
            WalletType::BankTransfer,
        ] {
            assert_eq!(WalletType::from_str(wt.as_str()), Some(wt));
        }
    }

    #[test]
    fn test_wallet_type_accepts_dashes() {
        assert_eq!(
            WalletType::from_str("Credit-Card"),
            Some(WalletType::CreditCard)
        );
        assert_eq!(WalletType::from_str("crypto"), None);
    }
}
