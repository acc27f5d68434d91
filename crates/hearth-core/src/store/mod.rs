//! Fact Store (§4.1): a relational + full-text index of facts.

mod migrations;
mod sqlite;

pub use migrations::MIGRATIONS;
pub use sqlite::{FactFilter, FactStore, StoreStats};
