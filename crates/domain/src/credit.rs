//! Customers, credit tiers and the overdraft rules that gate payment.

use common::{CreditTierId, CustomerId};
use serde::{Deserialize, Serialize};

use crate::value_objects::{DiscountRate, Money};

/// How far below zero a tier lets a customer's balance go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "limit", rename_all = "snake_case")]
pub enum OverdraftPolicy {
    NotAllowed,
    Limited(Money),
    Unlimited,
}

impl OverdraftPolicy {
    pub fn allows_overdraft(&self) -> bool {
        !matches!(self, OverdraftPolicy::NotAllowed)
    }

    /// Funds available to a customer holding `balance` under this policy.
    pub fn available(&self, balance: Money) -> AvailableFunds {
        match self {
            OverdraftPolicy::NotAllowed => AvailableFunds::Bounded(balance),
            OverdraftPolicy::Limited(limit) => AvailableFunds::Bounded(balance + *limit),
            OverdraftPolicy::Unlimited => AvailableFunds::Unbounded,
        }
    }
}

impl std::fmt::Display for OverdraftPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverdraftPolicy::NotAllowed => write!(f, "overdraft not allowed"),
            OverdraftPolicy::Limited(limit) => write!(f, "overdraft limit {limit}"),
            OverdraftPolicy::Unlimited => write!(f, "unlimited overdraft"),
        }
    }
}

/// Spending power computed from a balance and an overdraft policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailableFunds {
    Bounded(Money),
    Unbounded,
}

impl AvailableFunds {
    pub fn covers(&self, amount: Money) -> bool {
        match self {
            AvailableFunds::Bounded(available) => *available >= amount,
            AvailableFunds::Unbounded => true,
        }
    }
}

/// A customer classification controlling discount and overdraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTier {
    pub id: CreditTierId,
    pub name: String,
    pub discount_rate: DiscountRate,
    pub overdraft: OverdraftPolicy,
    /// Cumulative spend needed to reach this tier.
    pub upgrade_threshold: Money,
}

impl CreditTier {
    pub fn allows_overdraft(&self) -> bool {
        self.overdraft.allows_overdraft()
    }
}

/// Credit tiers ordered by ascending upgrade threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<CreditTier>,
}

impl TierTable {
    pub fn new(mut tiers: Vec<CreditTier>) -> Self {
        tiers.sort_by_key(|t| (t.upgrade_threshold, t.id));
        Self { tiers }
    }

    /// The bookstore's reference table of five tiers.
    pub fn bookstore_default() -> Self {
        let tier = |id: i64, bp: u32, overdraft, threshold: i64| CreditTier {
            id: CreditTierId::new(id),
            name: format!("Level {id}"),
            discount_rate: DiscountRate::from_basis_points(bp).unwrap_or_default(),
            overdraft,
            upgrade_threshold: Money::from_units(threshold),
        };
        Self::new(vec![
            tier(1, 9_000, OverdraftPolicy::NotAllowed, 0),
            tier(2, 8_500, OverdraftPolicy::NotAllowed, 500),
            tier(3, 8_500, OverdraftPolicy::Limited(Money::from_units(5_000)), 2_000),
            tier(4, 8_000, OverdraftPolicy::Limited(Money::from_units(10_000)), 5_000),
            tier(5, 7_500, OverdraftPolicy::Unlimited, 10_000),
        ])
    }

    pub fn tiers(&self) -> &[CreditTier] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn get(&self, id: CreditTierId) -> Option<&CreditTier> {
        self.tiers.iter().find(|t| t.id == id)
    }

    /// The highest tier whose threshold `spend` has reached.
    pub fn tier_for_spend(&self, spend: Money) -> Option<&CreditTier> {
        self.tiers
            .iter()
            .take_while(|t| t.upgrade_threshold <= spend)
            .last()
    }

    /// Returns the tier to move to, if `spend` qualifies for one above `current`.
    ///
    /// Never returns a lower tier.
    pub fn upgrade_for(&self, current: CreditTierId, spend: Money) -> Option<&CreditTier> {
        let computed = self.tier_for_spend(spend)?;
        match self.get(current) {
            Some(current) if computed.upgrade_threshold <= current.upgrade_threshold => None,
            _ if computed.id == current => None,
            _ => Some(computed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerStatus {
    #[default]
    Active,
    Frozen,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "ACTIVE",
            CustomerStatus::Frozen => "FROZEN",
        }
    }
}

impl std::str::FromStr for CustomerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(CustomerStatus::Active),
            "FROZEN" => Ok(CustomerStatus::Frozen),
            other => Err(format!("unknown customer status: {other}")),
        }
    }
}

/// A customer account as seen by settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    /// Negative only while the tier allows overdraft.
    pub balance: Money,
    pub cumulative_spend: Money,
    pub credit_tier_id: CreditTierId,
    pub status: CustomerStatus,
}

impl Customer {
    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }

    pub fn available_funds(&self, tier: &CreditTier) -> AvailableFunds {
        tier.overdraft.available(self.balance)
    }
}

/// A customer account not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    pub balance: Money,
    pub cumulative_spend: Money,
    pub credit_tier_id: CreditTierId,
    pub status: CustomerStatus,
}

impl NewCustomer {
    pub fn into_customer(self, id: CustomerId) -> Customer {
        Customer {
            id,
            name: self.name,
            balance: self.balance,
            cumulative_spend: self.cumulative_spend,
            credit_tier_id: self.credit_tier_id,
            status: self.status,
        }
    }
}
