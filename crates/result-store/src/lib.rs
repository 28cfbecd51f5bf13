//! result-store: persistence for hackeval evaluation results
//!
//! ## Key Components
//!
//! - `ResultStore`: put/get/history contract the engine depends on
//! - `SurrealResultStore`: SurrealDB backend (`mem://` or `surrealkv://`)
//! - `MemoryResultStore`: in-process store for tests and one-shot runs

mod error;
pub mod fakes;
pub mod store_traits;
pub mod surreal_store;

pub use error::{StoreError, StoreResult};
pub use fakes::MemoryResultStore;
pub use store_traits::ResultStore;
pub use surreal_store::SurrealResultStore;
