//! SQLite connection with depth-counted transactions.
//!
//! Safe wrappers around SQLite's C API implementing the `Connection` trait
//! from fluentmap-core. Transactions nest by depth: only the outermost
//! `begin` issues `BEGIN IMMEDIATE` and only the outermost `commit` or
//! `rollback` ends it.

// Casts match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi;
use crate::types;
use fluentmap_core::{
    Connection, Cx, Error, Outcome, Row, Value,
    error::{
        ConfigError, ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind,
        TransactionError, TransactionErrorKind,
    },
    row::ColumnInfo,
};
use std::ffi::{CStr, CString, c_int};
use std::future::Future;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

const MEMORY_PATH: &str = ":memory:";

/// Where and how to open a database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds; 0 disables it.
    pub busy_timeout_ms: u32,
    /// Run `PRAGMA foreign_keys = ON` after opening.
    pub foreign_keys: bool,
}

/// Access mode passed to `sqlite3_open_v2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    /// Read-write, creating the file when missing.
    pub create: bool,
    /// Interpret the path as a `file:` URI.
    pub uri: bool,
    pub no_mutex: bool,
    pub full_mutex: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write; the database must exist.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }

        // Default to read-write-create if no mode was chosen
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: MEMORY_PATH.to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    /// Parse `sqlite::memory:`, `sqlite://<path>`, `sqlite:<path>` or a bare
    /// file path.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        let url = url.trim();
        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if url.contains("://") {
            return Err(config_error(format!(
                "unsupported database URL '{}': expected a sqlite: URL or a file path",
                url
            )));
        } else {
            url
        };

        match path {
            "" => Err(config_error(format!("database URL '{}' has no path", url))),
            ":memory:" => Ok(Self::memory()),
            path => Ok(Self::file(path)),
        }
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }
}

fn config_error(message: String) -> Error {
    Error::Config(ConfigError {
        message,
        source: None,
    })
}

/// Connection state guarded by the mutex.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    /// Open transaction scopes; 0 means autocommit.
    depth: u32,
    /// An inner scope rolled back; the outermost commit must roll back.
    rollback_only: bool,
}

// SAFETY: the handle is only touched while the Mutex is held.
unsafe impl Send for SqliteInner {}

/// A single SQLite handle usable from any task.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("depth", &self.transaction_depth())
            .finish()
    }
}

impl SqliteConnection {
    /// Open a connection with the given configuration.
    #[tracing::instrument(level = "debug", skip(config), fields(path = %config.path))]
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: valid pointers; return code checked below
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is non-null; it must be closed even on failure
                unsafe {
                    let msg = ffi::last_error_message(db);
                    ffi::sqlite3_close_v2(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner {
                db,
                depth: 0,
                rollback_only: false,
            }),
            path: config.path.clone(),
        };

        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }

        tracing::debug!(flags, "Opened SQLite database");
        Ok(conn)
    }

    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    pub fn open_file(path: impl Into<String>) -> Result<Self, Error> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Open from a `sqlite:` URL or a file path.
    pub fn open_url(url: &str) -> Result<Self, Error> {
        Self::open(&SqliteConfig::from_url(url)?)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteInner>, Error> {
        self.inner.lock().map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Unavailable,
                message: "connection lock poisoned by a panicking thread".to_string(),
                source: None,
            })
        })
    }

    /// Execute SQL without parameters (DDL, pragmas, multi-statement scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        let inner = self.lock()?;
        exec_raw(inner.db, sql)
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> Result<i64, Error> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> Result<u64, Error> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(inner.db) }.max(0) as u64)
    }

    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let inner = self.lock()?;
        let stmt = Prepared::new(inner.db, sql, params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let mut names = Vec::with_capacity(col_count.max(0) as usize);
        for i in 0..col_count {
            // SAFETY: stmt is valid and i is in range
            let name = unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i));
            names.push(name);
        }
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let mut values = Vec::with_capacity(columns.len());
                    for i in 0..col_count {
                        // SAFETY: the last step returned SQLITE_ROW
                        values.push(unsafe { types::read_column(stmt.raw, i) });
                    }
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(inner.db, sql)),
            }
        }

        tracing::trace!(sql, rows = rows.len(), "SQLite query complete");
        Ok(rows)
    }

    fn execute_locked(inner: &SqliteInner, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let stmt = Prepared::new(inner.db, sql, params)?;
        // SAFETY: stmt is valid
        match unsafe { ffi::sqlite3_step(stmt.raw) } {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let changes = unsafe { ffi::sqlite3_changes(inner.db) }.max(0) as u64;
                tracing::trace!(sql, affected = changes, "SQLite statement complete");
                Ok(changes)
            }
            _ => Err(step_error(inner.db, sql)),
        }
    }

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let inner = self.lock()?;
        Self::execute_locked(&inner, sql, params)
    }

    fn insert_sync(&self, sql: &str, params: &[Value]) -> Result<i64, Error> {
        let inner = self.lock()?;
        Self::execute_locked(&inner, sql, params)?;
        // SAFETY: db is valid; the lock keeps other statements out in between
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    fn begin_sync(&self) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if inner.depth == 0 {
            exec_raw(inner.db, "BEGIN IMMEDIATE")?;
            inner.rollback_only = false;
        }
        inner.depth += 1;
        tracing::debug!(depth = inner.depth, "Transaction scope begun");
        Ok(())
    }

    fn commit_sync(&self) -> Result<(), Error> {
        let mut inner = self.lock()?;
        match inner.depth {
            0 => Err(not_active("commit")),
            1 => {
                inner.depth = 0;
                if inner.rollback_only {
                    inner.rollback_only = false;
                    exec_raw(inner.db, "ROLLBACK")?;
                    tracing::debug!("Outer commit rolled back after inner rollback");
                    return Err(Error::Transaction(TransactionError {
                        kind: TransactionErrorKind::RollbackOnly,
                        message: "an inner scope rolled back; the transaction was rolled back"
                            .to_string(),
                    }));
                }
                if let Err(e) = exec_raw(inner.db, "COMMIT") {
                    // A failed COMMIT leaves SQLite in the transaction; end it.
                    if let Err(rollback) = exec_raw(inner.db, "ROLLBACK") {
                        tracing::warn!(error = %rollback, "Rollback after failed commit failed");
                    }
                    return Err(e);
                }
                tracing::debug!("Transaction committed");
                Ok(())
            }
            _ => {
                inner.depth -= 1;
                tracing::debug!(depth = inner.depth, "Inner scope committed");
                Ok(())
            }
        }
    }

    fn rollback_sync(&self) -> Result<(), Error> {
        let mut inner = self.lock()?;
        match inner.depth {
            0 => Err(not_active("rollback")),
            1 => {
                inner.depth = 0;
                inner.rollback_only = false;
                exec_raw(inner.db, "ROLLBACK")?;
                tracing::debug!("Transaction rolled back");
                Ok(())
            }
            _ => {
                inner.depth -= 1;
                inner.rollback_only = true;
                tracing::debug!(depth = inner.depth, "Inner scope rolled back; transaction is rollback-only");
                Ok(())
            }
        }
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut() {
            if !inner.db.is_null() {
                // SAFETY: db is valid and no longer shared
                unsafe {
                    ffi::sqlite3_close_v2(inner.db);
                }
                inner.db = ptr::null_mut();
            }
        }
    }
}

impl Connection for SqliteConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.query_sync(sql, params);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self
            .query_sync(sql, params)
            .map(|rows| rows.into_iter().next());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.execute_sync(sql, params);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let result = self.insert_sync(sql, params);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.begin_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.commit_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.rollback_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn transaction_depth(&self) -> u32 {
        self.lock().map(|inner| inner.depth).unwrap_or(0)
    }

    fn abort_scope(&self) {
        if let Err(e) = self.rollback_sync() {
            tracing::warn!(error = %e, "Rolling back an abandoned scope failed");
        }
    }
}

/// A prepared statement with its parameters bound; finalized on drop.
struct Prepared {
    raw: *mut ffi::sqlite3_stmt,
}

impl Prepared {
    fn new(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<Self, Error> {
        let c_sql = CString::new(sql).map_err(|_| {
            query_error(QueryErrorKind::Syntax, sql, None, "SQL contains null byte".to_string())
        })?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let len = c_int::try_from(c_sql.as_bytes().len()).unwrap_or(c_int::MAX);
        // SAFETY: all pointers are valid for the duration of the call
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), len, &mut raw, ptr::null_mut()) };
        if rc != ffi::SQLITE_OK {
            return Err(step_error(db, sql));
        }
        let stmt = Self { raw };

        // SAFETY: stmt is valid
        let expected = unsafe { ffi::sqlite3_bind_parameter_count(stmt.raw) };
        if usize::try_from(expected).unwrap_or(0) != params.len() {
            return Err(query_error(
                QueryErrorKind::Bind,
                sql,
                Some(ffi::SQLITE_RANGE),
                format!(
                    "statement expects {} parameters, {} supplied",
                    expected,
                    params.len()
                ),
            ));
        }

        for (i, param) in params.iter().enumerate() {
            let index = c_int::try_from(i + 1).unwrap_or(c_int::MAX);
            // SAFETY: stmt is valid, index is 1-based and in range
            let rc = unsafe { types::bind_value(stmt.raw, index, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { ffi::last_error_message(db) };
                return Err(query_error(
                    QueryErrorKind::Bind,
                    sql,
                    Some(rc),
                    format!("Failed to bind parameter {}: {}", i + 1, msg),
                ));
            }
        }
        Ok(stmt)
    }
}

impl Drop for Prepared {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: raw is a valid statement handle, finalized exactly once
            unsafe {
                ffi::sqlite3_finalize(self.raw);
            }
        }
    }
}

fn exec_raw(db: *mut ffi::sqlite3, sql: &str) -> Result<(), Error> {
    let c_sql = CString::new(sql).map_err(|_| {
        query_error(QueryErrorKind::Syntax, sql, None, "SQL contains null byte".to_string())
    })?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

    if rc != ffi::SQLITE_OK {
        let msg = if errmsg.is_null() {
            ffi::error_string(rc).to_string()
        } else {
            // SAFETY: errmsg was allocated by SQLite and is freed exactly once
            unsafe {
                let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                ffi::sqlite3_free(errmsg.cast());
                msg
            }
        };
        return Err(query_error(error_code_to_kind(rc), sql, Some(rc), msg));
    }
    tracing::trace!(sql, "SQLite exec complete");
    Ok(())
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (ffi::last_error_message(db), ffi::sqlite3_errcode(db)) };
    query_error(error_code_to_kind(code), sql, Some(code), msg)
}

fn query_error(kind: QueryErrorKind, sql: &str, code: Option<c_int>, message: String) -> Error {
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        code,
        message,
        source: None,
    })
}

fn not_active(operation: &str) -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: format!("cannot {} without an open transaction", operation),
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // Extended codes carry the primary code in the low byte.
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => QueryErrorKind::Cancelled,
        ffi::SQLITE_RANGE => QueryErrorKind::Bind,
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}
