//! The ingestion pipeline — dedup, orchestration, validation, replies.

pub mod controller;
pub mod reply;
pub mod validate;

pub use controller::{AckDecision, IngestionController};
pub use validate::{validate, ValidatedTransaction, ValidationContext};
