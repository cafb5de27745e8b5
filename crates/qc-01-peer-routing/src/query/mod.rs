//! # Query Engine
//!
//! Iterative, concurrency-bounded traversal towards a key. Each traversal
//! owns its frontier and visited set and is dropped when it terminates.

mod manager;
mod state;

pub use manager::{QueryContext, QueryManager, QueryOptions};
pub use state::{QueryOutcome, QueryState};

#[cfg(test)]
mod tests;
