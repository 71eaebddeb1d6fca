//! Domain building blocks shared by the API and monitor crates: validated
//! identifiers, the transfer intent state machine, chain observations, the
//! scan cursor, storage contracts and environment configuration.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use config::*;
pub use model::*;
pub use services::*;
pub use storage::*;
