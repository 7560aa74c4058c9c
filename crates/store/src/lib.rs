pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod unit_of_work;

pub use error::{Result, StoreError};
pub use event::RecordedEvent;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use unit_of_work::{Store, UnitOfWork};
