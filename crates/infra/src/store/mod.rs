//! Storage boundary.
//!
//! Two capability sets live here:
//!
//! - [`TransferStore`] / [`UnitOfWork`]: the narrow, transactional surface
//!   the transfer engine runs on.
//! - [`AccountRepository`], [`EntryRepository`], [`TransferRepository`],
//!   [`UserRepository`], [`SessionRepository`]: plain CRUD used by request
//!   handlers.
//!
//! Both the in-memory and the Postgres store implement all of them.

mod lock_table;

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryOptions, InMemoryStore};
pub use postgres::PostgresStore;
pub use r#trait::{
    AccountRepository, EntryRepository, SessionRepository, StoreError, TransferRepository, TransferStore,
    UnitOfWork, UserRepository,
};
