//! The migration pipeline: resolve identities, migrate users, migrate tasks.

pub mod comments;
pub mod driver;
pub mod identity;
pub mod tasks;
pub mod users;


pub use driver::{FailurePolicy, MigrationDriver, RunOptions, RunSummary, Step};
