//! rollgate-state — embedded state store for Rollgate.
//!
//! Backed by [redb](https://docs.rs/redb), holds the registered clusters
//! the daemon can reach and the append-only audit trail of every rollout
//! mutation.
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
