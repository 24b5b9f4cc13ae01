//! Workplace environmental monitoring.
//!
//! Measurements of eight sensor classes are recorded together with a snapshot of the limits
//! that applied at the time, classified as in or out of spec, aggregated into statistics and
//! trends, and persisted to a local and an optional remote store. Every mutation is audited.
pub mod audit;
pub mod classify;
pub mod config;
pub mod database;
pub mod error;
pub mod history;
pub mod limits;
pub mod local;
pub mod monitor;
pub mod notify;
pub mod record;
pub mod specification;
pub mod stats;
pub mod storage;
pub mod store;
pub mod transfer;
pub mod validate;
pub mod writer;

pub use error::{Error, Result};
