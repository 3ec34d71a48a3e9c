//! Daily pipeline that collects deposit and savings product listings from
//! the FSS finlife open API, normalizes them into one canonical table,
//! upserts them idempotently into the shared store, runs the server-side
//! "better than our bank" comparison, and emails the result to active
//! subscribers when there is one.

pub mod config;
pub mod finlife;
pub mod normalization;
pub mod notify;
pub mod orchestrator;
pub mod store;

pub mod util {
    pub mod db;
    pub mod env;
}
