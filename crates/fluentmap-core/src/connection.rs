//! The low-level data-access contract.
//!
//! Builders render SQL plus bound parameters and hand them to a
//! [`Connection`]. All operations take a `Cx` context so drivers can honor
//! cancellation and timeouts.
//!
//! Transactions are flat and nesting-aware: `begin` on a connection that is
//! already inside a transaction joins it, and only the outermost `commit` or
//! `rollback` reaches the database.

use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A database connection capable of executing statements.
///
/// Implementations must be `Send + Sync` for use across async boundaries.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query(&cx, "SELECT id FROM genre WHERE name = ?", &[Value::from("Drama")]).await;
///
/// conn.begin(&cx).await;
/// conn.execute(&cx, "UPDATE genre SET deleted = ? WHERE id = ?", &[true.into(), 3_i64.into()]).await;
/// conn.commit(&cx).await;
/// ```
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, crate::Error>> + Send {
        async move {
            match self.query(cx, sql, params).await {
                Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// Execute a statement (UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Execute an INSERT and return the generated row id.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, crate::Error>> + Send;

    /// Open a transaction, or join the one already open on this connection.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Commit the innermost scope.
    ///
    /// Only the outermost commit is issued against the database. If an inner
    /// scope rolled back, the outermost commit rolls back instead and returns
    /// a `RollbackOnly` transaction error.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Roll back the innermost scope.
    ///
    /// An inner rollback marks the whole transaction rollback-only; the
    /// outermost rollback is issued against the database.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Number of open transaction scopes (0 when autocommitting).
    fn transaction_depth(&self) -> u32;

    /// Undo the innermost scope without awaiting.
    ///
    /// Called when a scope is abandoned by a panic or a dropped future, so it
    /// must not block on an executor. Behaves like `rollback`: the outermost
    /// scope is rolled back against the database and an inner one marks the
    /// transaction rollback-only. Failures are logged, not returned.
    fn abort_scope(&self);

    /// Check if the connection is still usable.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move {
            match self.query(cx, "SELECT 1", &[]).await {
                Outcome::Ok(_) => Outcome::Ok(()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}
