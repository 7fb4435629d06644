//! fluentmap - attribute-driven entity mapping with a fluent query surface.
//!
//! fluentmap maps plain structs onto tables through `#[derive(Entity)]` and
//! builds parameterized SQL through chained calls:
//!
//! - Typed column handles generated as associated constants (`Movie::NAME`)
//! - SELECT with inner joins that populate navigation properties
//! - Grouped inserts, optimistic updates guarded by a row-version timestamp
//! - Deletes, soft deletes and an active-rows filter
//! - Units of work that join any transaction already open on the connection
//!
//! # Quick Start
//!
//! ```ignore
//! use fluentmap::prelude::*;
//!
//! #[derive(Debug, Default, Clone, Entity)]
//! #[entity(table = "genre")]
//! struct Genre {
//!     #[entity(key)]
//!     id: i64,
//!     name: String,
//!     #[entity(row_version)]
//!     row_version: NaiveDateTime,
//!     #[entity(soft_delete)]
//!     deleted: bool,
//! }
//!
//! async fn example(cx: &Cx, conn: &SqliteConnection) {
//!     let mut horror = Genre { name: "Horror".to_string(), ..Genre::default() };
//!     Insert::one(&mut horror).execute(cx, conn).await;
//!
//!     let active = Select::<Genre>::new()
//!         .select_all()
//!         .where_active()
//!         .order_by_ascending(Genre::NAME)
//!         .query(cx, conn)
//!         .await;
//!
//!     horror.name = "Slasher".to_string();
//!     // 0 means another writer got there first
//!     let updated = Update::one(&mut horror).execute(cx, conn).await;
//! }
//! ```

pub use fluentmap_core::{
    Col, ColumnMeta, ColumnRole, Connection, Cx, Entity, Error, FromValue, Outcome,
    ReferenceMeta, Result, Row, RowFragment, Value,
};
pub use fluentmap_core::error;
pub use fluentmap_macros::Entity;
pub use fluentmap_query::{
    ColumnRef, Condition, Delete, Direction, EntityManager, Executable, Filtered,
    FluentTransaction, Insert, ResetPolicy, Select, SoftDelete, Statement, Update, delete,
    select,
};
pub use fluentmap_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

/// Member crates, for lower-level access.
pub use fluentmap_query as query;
pub use fluentmap_sqlite as sqlite;

/// Everything needed to declare entities and run fluent queries.
pub mod prelude {
    pub use crate::{
        Col, Connection, Cx, Delete, Entity, EntityManager, Error, Filtered, FluentTransaction,
        Insert, Outcome, ResetPolicy, Result, Select, SoftDelete, SqliteConfig, SqliteConnection,
        Statement, Update, Value, delete, select,
    };
    pub use chrono::{NaiveDate, NaiveDateTime};
}

/// Open an in-memory SQLite database.
#[tracing::instrument(level = "debug")]
pub fn open_memory() -> Result<SqliteConnection> {
    SqliteConnection::open_memory()
}

/// Open a SQLite database from a `sqlite:` URL or a file path.
#[tracing::instrument(level = "debug")]
pub fn open(url: &str) -> Result<SqliteConnection> {
    SqliteConnection::open_url(url)
}
