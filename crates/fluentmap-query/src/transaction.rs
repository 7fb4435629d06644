//! Unit-of-work coordinator.
//!
//! A [`FluentTransaction`] collects either a list of writes or a single
//! async block, then runs them inside one driver transaction on `commit`.
//! Any failure rolls the whole unit back. Because drivers join nested
//! `begin` calls into the open transaction, a coordinator created inside
//! another coordinator's block shares its fate: its commit is a no-op
//! against the database and a later failure in the outer block still
//! undoes its writes.
//!
//! A scope opened by `commit` is undone synchronously if the commit future
//! is dropped or unwinds before the scope is closed.

use crate::statement::{BoxFuture, Executable};
use fluentmap_core::{Connection, Cx, Error, Outcome};
use std::future::Future;

type Block<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Outcome<(), Error>> + Send + 'a>;

enum Work<'a, C: Connection> {
    Idle,
    Statements(Vec<Box<dyn Executable<C> + 'a>>),
    Block(Block<'a>),
}

impl<C: Connection> Work<'_, C> {
    fn describe(&self) -> &'static str {
        match self {
            Work::Idle => "idle",
            Work::Statements(_) => "statements",
            Work::Block(_) => "block",
        }
    }
}

/// Registers work against one connection and commits it atomically.
///
/// Builders passed to [`perform`](Self::perform) keep their entities
/// mutably borrowed for the coordinator's lifetime. Generated keys and row
/// versions are written back during `commit` and can be read once the
/// coordinator is dropped.
///
/// # Example
///
/// ```ignore
/// let mut tx = FluentTransaction::new(&conn)
///     .perform(Insert::one(&mut genre))
///     .perform(SoftDelete::<Movie>::by_id(4_i64))
///     .perform(Statement::new("DELETE FROM schedule WHERE movie_id = ?", vec![4_i64.into()]));
/// tx.commit(&cx).await;
/// drop(tx);
/// assert!(genre.id > 0);
/// ```
pub struct FluentTransaction<'a, C: Connection> {
    conn: &'a C,
    work: Work<'a, C>,
    misuse: Option<String>,
}

impl<C: Connection> std::fmt::Debug for FluentTransaction<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluentTransaction")
            .field("work", &self.work.describe())
            .field("pending", &self.pending())
            .field("misuse", &self.misuse)
            .finish()
    }
}

impl<'a, C: Connection> FluentTransaction<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            conn,
            work: Work::Idle,
            misuse: None,
        }
    }

    /// Number of registered units (statements, or 1 for a block).
    pub fn pending(&self) -> usize {
        match &self.work {
            Work::Idle => 0,
            Work::Statements(list) => list.len(),
            Work::Block(_) => 1,
        }
    }

    /// Register a write. Writes run in registration order.
    pub fn perform(mut self, statement: impl Executable<C> + 'a) -> Self {
        match &mut self.work {
            Work::Idle => self.work = Work::Statements(vec![Box::new(statement)]),
            Work::Statements(list) => list.push(Box::new(statement)),
            Work::Block(_) => {
                self.misuse = Some("perform cannot be combined with perform_block".to_string());
            }
        }
        self
    }

    /// Register an async block to run inside the transaction.
    ///
    /// A coordinator holds at most one block and no statements alongside it.
    pub fn perform_block<F, Fut>(mut self, block: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Outcome<(), Error>> + Send + 'a,
    {
        let misuse = match self.work {
            Work::Idle => None,
            Work::Statements(_) => Some("perform_block cannot be combined with perform"),
            Work::Block(_) => Some("only one perform_block may be registered"),
        };
        match misuse {
            None => {
                self.work = Work::Block(Box::new(move || -> BoxFuture<'a, Outcome<(), Error>> {
                    Box::pin(block())
                }));
            }
            Some(message) => self.misuse = Some(message.to_string()),
        }
        self
    }

    /// Run the registered work in a transaction.
    ///
    /// Returns the summed affected-row count of the registered writes (0 for
    /// a block). On any failure the transaction is rolled back and the
    /// original outcome is returned. The coordinator is empty afterwards.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<u64, Error> {
        let work = std::mem::replace(&mut self.work, Work::Idle);
        if let Some(message) = self.misuse.take() {
            return Outcome::Err(Error::InvalidOperation(message));
        }
        if matches!(work, Work::Idle) {
            tracing::trace!("Nothing registered; commit is a no-op");
            return Outcome::Ok(0);
        }

        let conn = self.conn;
        match conn.begin(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        tracing::debug!(depth = conn.transaction_depth(), "Transaction scope opened");
        let mut guard = ScopeGuard::new(conn);

        let outcome = match work {
            Work::Statements(list) => run_statements(cx, conn, list).await,
            Work::Block(block) => match block().await {
                Outcome::Ok(()) => Outcome::Ok(0),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            Work::Idle => Outcome::Ok(0),
        };

        // From here the driver call owns the scope, whatever it returns.
        guard.disarm();
        match outcome {
            Outcome::Ok(affected) => match conn.commit(cx).await {
                Outcome::Ok(()) => {
                    tracing::debug!(affected, "Transaction scope committed");
                    Outcome::Ok(affected)
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            failed => {
                match conn.rollback(cx).await {
                    Outcome::Ok(()) => {
                        tracing::debug!(depth = conn.transaction_depth(), "Transaction scope rolled back");
                    }
                    Outcome::Err(e) => {
                        tracing::warn!(error = %e, "Rollback after failed unit of work failed");
                    }
                    Outcome::Cancelled(r) => {
                        tracing::warn!(reason = ?r, "Rollback after failed unit of work was cancelled");
                    }
                    Outcome::Panicked(p) => {
                        tracing::warn!(payload = ?p, "Rollback after failed unit of work panicked");
                    }
                }
                failed
            }
        }
    }
}

/// Undoes an open scope that is abandoned before commit or rollback.
struct ScopeGuard<'c, C: Connection> {
    conn: &'c C,
    armed: bool,
}

impl<'c, C: Connection> ScopeGuard<'c, C> {
    fn new(conn: &'c C) -> Self {
        Self { conn, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: Connection> Drop for ScopeGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                depth = self.conn.transaction_depth(),
                panicking = std::thread::panicking(),
                "Transaction scope abandoned; rolling back"
            );
            self.conn.abort_scope();
        }
    }
}

async fn run_statements<'a, C: Connection>(
    cx: &Cx,
    conn: &C,
    list: Vec<Box<dyn Executable<C> + 'a>>,
) -> Outcome<u64, Error> {
    let mut total = 0;
    for (index, statement) in list.into_iter().enumerate() {
        match statement.run(cx, conn).await {
            Outcome::Ok(affected) => {
                tracing::trace!(index, affected, "Unit of work statement done");
                total += affected;
            }
            Outcome::Err(e) => {
                tracing::debug!(index, error = %e, "Unit of work statement failed");
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }
    Outcome::Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::Statement;
    use asupersync::runtime::RuntimeBuilder;
    use fluentmap_core::error::{QueryError, QueryErrorKind};
    use fluentmap_core::{Row, Value};
    use std::panic::AssertUnwindSafe;
    use std::pin::{Pin, pin};
    use std::sync::Mutex;
    use std::task::{Context, Poll, Waker};

    /// Records every call and fails any statement containing "FAIL".
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
        depth: Mutex<u32>,
    }

    impl Recorder {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn record(&self, entry: &str) {
            self.log.lock().unwrap().push(entry.to_string());
        }
    }

    impl Connection for Recorder {
        fn query(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            async { Outcome::Ok(Vec::new()) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            self.record(sql);
            let outcome = if sql.contains("FAIL") {
                Outcome::Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Constraint,
                    sql: Some(sql.to_string()),
                    code: None,
                    message: "forced failure".to_string(),
                    source: None,
                }))
            } else {
                Outcome::Ok(1)
            };
            async move { outcome }
        }

        fn insert(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<i64, Error>> + Send {
            self.record(sql);
            async { Outcome::Ok(1) }
        }

        fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            let mut depth = self.depth.lock().unwrap();
            if *depth == 0 {
                self.record("BEGIN");
            }
            *depth += 1;
            async { Outcome::Ok(()) }
        }

        fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            let mut depth = self.depth.lock().unwrap();
            *depth -= 1;
            if *depth == 0 {
                self.record("COMMIT");
            }
            async { Outcome::Ok(()) }
        }

        fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            let mut depth = self.depth.lock().unwrap();
            *depth -= 1;
            if *depth == 0 {
                self.record("ROLLBACK");
            }
            async { Outcome::Ok(()) }
        }

        fn transaction_depth(&self) -> u32 {
            *self.depth.lock().unwrap()
        }

        fn abort_scope(&self) {
            let mut depth = self.depth.lock().unwrap();
            *depth -= 1;
            if *depth == 0 {
                self.record("ABORT");
            }
        }
    }

    fn stmt(sql: &str) -> Statement {
        Statement::new(sql, Vec::new())
    }

    fn run<F: Future<Output = ()>>(f: F) {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(f);
    }

    #[test]
    fn statements_run_in_order_and_commit() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        run(async {
            let mut tx = FluentTransaction::new(&conn)
                .perform(stmt("A"))
                .perform(stmt("B"));
            assert_eq!(tx.pending(), 2);
            let outcome = tx.commit(&cx).await;
            assert!(matches!(outcome, Outcome::Ok(2)));
            assert_eq!(tx.pending(), 0);
        });
        assert_eq!(conn.log(), vec!["BEGIN", "A", "B", "COMMIT"]);
    }

    #[test]
    fn failure_rolls_back_and_stops() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        run(async {
            let mut tx = FluentTransaction::new(&conn)
                .perform(stmt("A"))
                .perform(stmt("B FAIL"))
                .perform(stmt("C"));
            let outcome = tx.commit(&cx).await;
            assert!(matches!(outcome, Outcome::Err(ref e) if e.is_constraint_violation()));
        });
        assert_eq!(conn.log(), vec!["BEGIN", "A", "B FAIL", "ROLLBACK"]);
        assert_eq!(conn.transaction_depth(), 0);
    }

    #[test]
    fn nested_block_joins_outer_transaction() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        run(async {
            let conn = &conn;
            let cx = &cx;
            let mut outer = FluentTransaction::new(conn).perform_block(move || async move {
                let mut inner = FluentTransaction::new(conn).perform(stmt("INNER"));
                if let Outcome::Err(e) = inner.commit(cx).await {
                    return Outcome::Err(e);
                }
                conn.execute(cx, "OUTER FAIL", &[]).await.map_ok_unit()
            });
            let outcome = outer.commit(cx).await;
            assert!(matches!(outcome, Outcome::Err(_)));
        });
        assert_eq!(conn.log(), vec!["BEGIN", "INNER", "OUTER FAIL", "ROLLBACK"]);
    }

    #[test]
    fn mixing_statements_and_block_is_rejected() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        run(async {
            let mut tx = FluentTransaction::new(&conn)
                .perform(stmt("A"))
                .perform_block(|| async { Outcome::Ok(()) });
            let outcome = tx.commit(&cx).await;
            assert!(matches!(outcome, Outcome::Err(ref e) if e.is_invalid_operation()));
        });
        assert!(conn.log().is_empty());
    }

    #[test]
    fn empty_commit_touches_nothing() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        run(async {
            let mut tx = FluentTransaction::new(&conn);
            assert!(matches!(tx.commit(&cx).await, Outcome::Ok(0)));
        });
        assert!(conn.log().is_empty());
    }

    fn poll_once<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
        future.poll(&mut Context::from_waker(Waker::noop()))
    }

    #[test]
    fn panicking_block_aborts_the_scope() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        let (conn_ref, cx_ref) = (&conn, &cx);
        let mut tx = FluentTransaction::new(&conn).perform_block(move || async move {
            if let Outcome::Err(e) = conn_ref.execute(cx_ref, "A", &[]).await {
                return Outcome::Err(e);
            }
            panic!("projector caught fire")
        });

        let unwound = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut commit = pin!(tx.commit(&cx));
            let _ = poll_once(commit.as_mut());
        }));
        assert!(unwound.is_err());
        assert_eq!(conn.log(), vec!["BEGIN", "A", "ABORT"]);
        assert_eq!(conn.transaction_depth(), 0);
    }

    #[test]
    fn dropped_commit_future_aborts_the_scope() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        let mut tx = FluentTransaction::new(&conn).perform_block(|| async {
            std::future::pending::<()>().await;
            Outcome::Ok(())
        });

        {
            let mut commit = pin!(tx.commit(&cx));
            assert!(poll_once(commit.as_mut()).is_pending());
            assert_eq!(conn.transaction_depth(), 1);
        }
        assert_eq!(conn.log(), vec!["BEGIN", "ABORT"]);
        assert_eq!(conn.transaction_depth(), 0);
    }

    #[test]
    fn finished_scope_is_not_aborted_again() {
        let conn = Recorder::default();
        let cx = Cx::for_testing();
        run(async {
            let mut tx = FluentTransaction::new(&conn).perform(stmt("FAIL"));
            assert!(matches!(tx.commit(&cx).await, Outcome::Err(_)));
        });
        assert!(!conn.log().iter().any(|entry| entry == "ABORT"));
    }

    trait UnitOutcome {
        fn map_ok_unit(self) -> Outcome<(), Error>;
    }

    impl UnitOutcome for Outcome<u64, Error> {
        fn map_ok_unit(self) -> Outcome<(), Error> {
            match self {
                Outcome::Ok(_) => Outcome::Ok(()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}
