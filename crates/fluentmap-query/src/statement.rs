//! Rendered statements and the executable seam used by transactions.

use chrono::{NaiveDateTime, TimeDelta, Timelike, Utc};
use fluentmap_core::{Connection, Cx, Error, Outcome, Value};
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether a builder clears its accumulated state after executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Clear WHERE, ORDER and LIMIT state after every execution.
    #[default]
    OneShot,
    /// Keep state so the same shape can run again.
    Reusable,
}

/// SQL text with `?` placeholders and the values bound to them.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// The SQL with each placeholder replaced by its literal, for logs and
    /// diagnostics. Never executed.
    pub fn to_inline_sql(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut params = self.params.iter();
        let mut in_string = false;
        for ch in self.sql.chars() {
            match ch {
                '\'' => {
                    in_string = !in_string;
                    out.push(ch);
                }
                '?' if !in_string => match params.next() {
                    Some(value) => out.push_str(&value.to_sql_literal()),
                    None => out.push('?'),
                },
                _ => out.push(ch),
            }
        }
        out
    }

    /// Execute and return the affected row count.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(sql = %self.sql))]
    pub async fn execute<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        conn.execute(cx, &self.sql, &self.params).await
    }
}

/// A write that can be registered with a transaction and run later.
///
/// Implemented by every write builder and by raw [`Statement`]s. The result
/// is the number of rows the write touched.
pub trait Executable<C: Connection>: Send {
    fn run<'f>(self: Box<Self>, cx: &'f Cx, conn: &'f C) -> BoxFuture<'f, Outcome<u64, Error>>
    where
        Self: 'f;
}

impl<C: Connection> Executable<C> for Statement {
    fn run<'f>(self: Box<Self>, cx: &'f Cx, conn: &'f C) -> BoxFuture<'f, Outcome<u64, Error>>
    where
        Self: 'f,
    {
        Box::pin(async move { conn.execute(cx, &self.sql, &self.params).await })
    }
}

/// Current UTC time at microsecond precision, the row-version resolution.
pub fn now_stamp() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    let micros = now.nanosecond() / 1_000 * 1_000;
    now.with_nanosecond(micros).unwrap_or(now)
}

/// The next row version after `previous`: now, or one microsecond past
/// `previous` if the clock has not moved beyond it.
pub fn next_stamp(previous: &Value, now: NaiveDateTime) -> NaiveDateTime {
    match previous.as_datetime() {
        Some(prev) if prev >= now => prev + TimeDelta::microseconds(1),
        _ => now,
    }
}
