//! Core types and traits for fluentmap.
//!
//! This crate provides the foundational abstractions shared by the query
//! builders and the drivers:
//!
//! - `Entity` trait and the static column/reference metadata it exposes
//! - `Col` typed column handles used by the fluent builders
//! - `Value`, `Row` and `FromValue` for moving data in and out of the database
//! - `Connection` trait, the low-level data-access contract
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod entity;
pub mod error;
pub mod row;
pub mod value;

pub use connection::Connection;
pub use entity::{Col, ColumnMeta, ColumnRole, Entity, ReferenceMeta, is_identifier};
pub use error::{Error, Result};
pub use row::{FromValue, Row, RowFragment};
pub use value::Value;
