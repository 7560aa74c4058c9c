pub mod health;
pub mod metrics;
pub mod orders;
pub mod purchase_orders;
pub mod shortages;
