//! Postgres persistence for the task-proxy engine. Implements
//! `cyclo_core::delta::DeltaSink` against the schema in `migrations/`;
//! the core crate never links `sqlx`.

pub mod config;
pub mod models;
pub mod pool;
pub mod sink;

pub use config::DbConfig;
pub use sink::PgDeltaSink;
