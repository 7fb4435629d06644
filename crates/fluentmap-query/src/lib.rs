//! Fluent statement builders for fluentmap.
//!
//! `fluentmap-query` is the **statement layer**. It turns `Entity` metadata
//! into parameterized SQL, executes it through the `Connection` trait from
//! `fluentmap-core`, and maps result rows back onto entity graphs.
//!
//! # Role In The Architecture
//!
//! - **Filters**: `where`/`and`/`or` plus comparison, prefix and set
//!   terminals, shared by SELECT and DELETE.
//! - **Select**: projection, inner joins, ordering and `LIMIT offset, count`,
//!   with per-table row fragments attached to navigation properties.
//! - **Writes**: grouped inserts, optimistic updates guarded by the row
//!   version, deletes and soft deletes.
//! - **Units of work**: `FluentTransaction` runs registered writes or a
//!   block atomically, joining any transaction already open on the
//!   connection.
//!
//! Most users reach these builders through the `fluentmap` facade crate.

pub mod column;
pub mod delete;
pub mod filter;
pub mod insert;
pub mod manager;
pub mod materialize;
pub mod select;
pub mod statement;
pub mod transaction;
pub mod update;

#[cfg(test)]
mod fixtures;

pub use column::ColumnRef;
pub use delete::{Delete, SoftDelete};
pub use filter::{ColumnStyle, Condition, Conjunction, Filtered, Operator, WhereClause};
pub use insert::{Insert, InsertPlan};
pub use manager::EntityManager;
pub use materialize::{Projected, RowBuilder};
pub use select::{Direction, Select, SelectPlan};
pub use statement::{BoxFuture, Executable, ResetPolicy, Statement};
pub use transaction::FluentTransaction;
pub use update::{Update, UpdateRow};

/// Create a one-shot SELECT for an entity.
///
/// # Example
///
/// ```ignore
/// let dramas = select!(Genre)
///     .select_all()
///     .r#where(Genre::NAME).starts_with("Dra")
///     .query(&cx, &conn)
///     .await;
/// ```
#[macro_export]
macro_rules! select {
    ($entity:ty) => {
        $crate::Select::<$entity>::new()
    };
}

/// Create a one-shot DELETE for an entity.
///
/// # Example
///
/// ```ignore
/// let removed = delete!(Schedule)
///     .r#where(Schedule::MOVIE_ID).equal(4_i64)
///     .execute(&cx, &conn)
///     .await;
/// ```
#[macro_export]
macro_rules! delete {
    ($entity:ty) => {
        $crate::Delete::<$entity>::new()
    };
}
