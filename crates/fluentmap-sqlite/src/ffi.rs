//! Low-level bindings to libsqlite3.
//!
//! The raw declarations come from `libsqlite3-sys` (bundled amalgamation).
//! This module narrows them to what the driver uses and adds the few safe
//! helpers that read static strings out of the library.

#![allow(non_camel_case_types)]

use std::ffi::{CStr, c_int};

pub use libsqlite3_sys::{
    sqlite3, sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int64, sqlite3_bind_null,
    sqlite3_bind_parameter_count, sqlite3_bind_text, sqlite3_busy_timeout, sqlite3_changes,
    sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_count,
    sqlite3_column_double, sqlite3_column_int64, sqlite3_column_name, sqlite3_column_text,
    sqlite3_column_type, sqlite3_destructor_type, sqlite3_errcode, sqlite3_errmsg, sqlite3_errstr,
    sqlite3_exec, sqlite3_finalize, sqlite3_free, sqlite3_last_insert_rowid,
    sqlite3_libversion, sqlite3_libversion_number, sqlite3_open_v2, sqlite3_prepare_v2,
    sqlite3_step, sqlite3_stmt,
};

// `libsqlite3-sys` leaves `sqlite3_close_v2` out of its bundled bindings;
// the bundled amalgamation still exports the symbol.
unsafe extern "C" {
    pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

// Result codes
pub use libsqlite3_sys::{
    SQLITE_AUTH, SQLITE_BUSY, SQLITE_CONSTRAINT, SQLITE_DONE, SQLITE_ERROR, SQLITE_INTERRUPT,
    SQLITE_LOCKED, SQLITE_NOTFOUND, SQLITE_OK, SQLITE_PERM, SQLITE_RANGE, SQLITE_READONLY,
    SQLITE_ROW, SQLITE_TOOBIG,
};

// sqlite3_open_v2 flags
pub use libsqlite3_sys::{
    SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_NOMUTEX, SQLITE_OPEN_READONLY,
    SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI,
};

// Fundamental data types
pub use libsqlite3_sys::{SQLITE_BLOB, SQLITE_FLOAT, SQLITE_INTEGER, SQLITE_NULL, SQLITE_TEXT};

/// Destructor telling SQLite to copy bound text and blobs immediately.
pub fn transient() -> sqlite3_destructor_type {
    libsqlite3_sys::SQLITE_TRANSIENT()
}

/// SQLite library version string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// SQLite library version number (`3XXXYYY`).
pub fn version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number has no preconditions
    unsafe { sqlite3_libversion_number() }
}

/// English description of a result code.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a pointer to a static string
    unsafe {
        let ptr = sqlite3_errstr(code);
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}

/// Most recent error message on `db`.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn last_error_message(db: *mut sqlite3) -> String {
    // SAFETY: caller guarantees db is valid; errmsg never returns null for a valid handle
    unsafe {
        let ptr = sqlite3_errmsg(db);
        if ptr.is_null() {
            return String::from("unknown error");
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}
