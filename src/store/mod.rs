//! Persistence layer: libSQL-backed storage for profiles, lifecycle markers
//! and durable sessions.

pub mod libsql_backend;
pub mod migrations;
pub mod profiles;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use profiles::{ProfileStore, UpsertStrategy};
pub use traits::Database;
