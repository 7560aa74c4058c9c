//! Settlement authorizer: credit-gated balance debit and tier re-evaluation.

use common::CustomerId;
use domain::{CreditTier, Customer, Money, TierTable};
use store::UnitOfWork;

use crate::error::{FulfillmentError, Result};

/// Outcome of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// The customer after the debit and any tier change.
    pub customer: Customer,
    /// Tier held before the charge.
    pub previous_tier: CreditTier,
    /// Set when cumulative spend crossed a higher threshold.
    pub upgraded_to: Option<CreditTier>,
}

/// Charges customers against balance plus overdraft allowance.
pub struct SettlementAuthorizer;

impl SettlementAuthorizer {
    /// Loads the tier table from the unit of work.
    pub async fn tier_table(uow: &mut dyn UnitOfWork) -> Result<TierTable> {
        Ok(TierTable::new(uow.list_credit_tiers().await?))
    }

    /// Looks up the tier a customer currently holds.
    pub async fn tier_of(uow: &mut dyn UnitOfWork, customer: &Customer) -> Result<CreditTier> {
        Self::tier_table(uow)
            .await?
            .get(customer.credit_tier_id)
            .cloned()
            .ok_or_else(|| FulfillmentError::not_found("credit tier", customer.credit_tier_id))
    }

    /// Debits `payable` from the customer if balance and overdraft cover it,
    /// then upgrades the tier when the new cumulative spend qualifies.
    ///
    /// The customer row stays locked until the unit of work ends, so two
    /// charges against the same customer cannot interleave.
    #[tracing::instrument(skip(uow))]
    pub async fn authorize_and_charge(
        uow: &mut dyn UnitOfWork,
        customer_id: CustomerId,
        payable: Money,
    ) -> Result<Settlement> {
        let customer = uow
            .lock_customer(customer_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("customer", customer_id))?;
        if !customer.is_active() {
            return Err(FulfillmentError::invalid_state(
                "customer",
                customer_id,
                customer.status.as_str(),
                "pay",
            ));
        }

        let tiers = Self::tier_table(uow).await?;
        let tier = tiers
            .get(customer.credit_tier_id)
            .cloned()
            .ok_or_else(|| FulfillmentError::not_found("credit tier", customer.credit_tier_id))?;

        if !customer.available_funds(&tier).covers(payable) {
            metrics::counter!("payments_declined_total").increment(1);
            tracing::warn!(balance = %customer.balance, overdraft = %tier.overdraft, "payment declined");
            return Err(FulfillmentError::InsufficientFunds {
                payable,
                balance: customer.balance,
                overdraft: tier.overdraft,
            });
        }

        let mut charged = uow.debit_customer(customer_id, payable).await?;

        let upgraded_to = tiers
            .upgrade_for(tier.id, charged.cumulative_spend)
            .cloned();
        if let Some(next) = &upgraded_to {
            uow.set_customer_tier(customer_id, next.id).await?;
            charged.credit_tier_id = next.id;
            tracing::info!(from = %tier.id, to = %next.id, "credit tier upgraded");
        }

        metrics::counter!("payments_authorized_total").increment(1);
        Ok(Settlement {
            customer: charged,
            previous_tier: tier,
            upgraded_to,
        })
    }
}
