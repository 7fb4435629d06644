//! SQLite driver for fluentmap.
//!
// FFI bindings require unsafe code
#![allow(unsafe_code)]
//!
//! Implements the `Connection` trait from fluentmap-core over libsqlite3
//! (compiled from the bundled amalgamation by `libsqlite3-sys`).
//!
//! # Features
//!
//! - Parameter binding for every `Value` variant
//! - Depth-counted nested transactions (`BEGIN IMMEDIATE` at the outermost
//!   scope only) with rollback-only propagation
//! - In-memory and file databases, `sqlite:` URLs
//! - Configurable open flags, busy timeout and foreign-key enforcement
//!
//! # Example
//!
//! ```rust,ignore
//! use fluentmap_sqlite::SqliteConnection;
//! use fluentmap_core::{Connection, Cx, Outcome, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE genre (id INTEGER PRIMARY KEY, name TEXT)")?;
//!
//! let cx = Cx::for_testing();
//! match conn.insert(&cx, "INSERT INTO genre (name) VALUES (?)", &[Value::from("Drama")]).await {
//!     Outcome::Ok(id) => println!("inserted genre {}", id),
//!     Outcome::Err(e) => eprintln!("error: {}", e),
//!     _ => {}
//! }
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool` | INTEGER (0/1) |
//! | `TinyInt` .. `BigInt`, `Unsigned` | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text`, `Decimal` | TEXT |
//! | `Bytes` | BLOB |
//! | `Timestamp` | TEXT `YYYY-MM-DD HH:MM:SS.ffffff` |
//! | `Date` | TEXT `YYYY-MM-DD` |
//! | `Json` | TEXT |
//!
//! # Thread Safety
//!
//! `SqliteConnection` is `Send + Sync`; the handle sits behind a mutex, and
//! an insert and its `last_insert_rowid` read happen under one lock.

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
        assert!(sqlite_version_number() >= 3_000_000);
    }
}
