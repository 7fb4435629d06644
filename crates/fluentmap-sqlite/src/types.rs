//! Value encoding and decoding between fluentmap and SQLite.
//!
//! SQLite has five storage classes (INTEGER, REAL, TEXT, BLOB, NULL).
//! Booleans are stored as 0/1, timestamps as TEXT
//! `YYYY-MM-DD HH:MM:SS.ffffff` so they compare correctly as strings,
//! dates as `YYYY-MM-DD`, and JSON as its text form.

#![allow(clippy::cast_possible_truncation)]

use crate::ffi;
use fluentmap_core::Value;
use fluentmap_core::value::{DATE_FORMAT, TIMESTAMP_STORAGE_FORMAT};
use std::ffi::{CStr, c_int};

/// Text form a value is bound as, for values SQLite has no native class for.
pub fn storage_text(value: &Value) -> Option<String> {
    match value {
        Value::Decimal(s) | Value::Text(s) => Some(s.clone()),
        Value::Unsigned(v) if i64::try_from(*v).is_err() => Some(v.to_string()),
        Value::Timestamp(_) => value
            .as_datetime()
            .map(|dt| dt.format(TIMESTAMP_STORAGE_FORMAT).to_string()),
        Value::Date(_) => value.as_date().map(|d| d.format(DATE_FORMAT).to_string()),
        Value::Json(json) => Some(json.to_string()),
        _ => None,
    }
}

/// Bind a value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    if let Some(text) = storage_text(value) {
        // SAFETY: stmt is valid; SQLITE_TRANSIENT makes SQLite copy the bytes
        return unsafe { bind_text(stmt, index, &text) };
    }

    // SAFETY: stmt is valid and index is in range (caller contract)
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*b)),
            Value::TinyInt(v) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*v)),
            Value::SmallInt(v) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*v)),
            Value::Int(v) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*v)),
            Value::BigInt(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Unsigned(v) => {
                ffi::sqlite3_bind_int64(stmt, index, i64::try_from(*v).unwrap_or(i64::MAX))
            }
            Value::Float(v) => ffi::sqlite3_bind_double(stmt, index, f64::from(*v)),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Bytes(b) => ffi::sqlite3_bind_blob(
                stmt,
                index,
                b.as_ptr().cast(),
                b.len() as c_int,
                ffi::transient(),
            ),
            // Unparseable temporal values fall through storage_text; bind NULL.
            Value::Decimal(_)
            | Value::Text(_)
            | Value::Timestamp(_)
            | Value::Date(_)
            | Value::Json(_) => ffi::sqlite3_bind_null(stmt, index),
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, text: &str) -> c_int {
    let bytes = text.as_bytes();
    // SAFETY: stmt is valid; the bytes outlive the call and SQLite copies them
    unsafe {
        ffi::sqlite3_bind_text(
            stmt,
            index,
            bytes.as_ptr().cast(),
            bytes.len() as c_int,
            ffi::transient(),
        )
    }
}

/// Read a column value from the current result row.
///
/// INTEGER columns always decode as `BigInt`; callers narrow through
/// `FromValue`.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: caller contract
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::BigInt(ffi::sqlite3_column_int64(stmt, index)),
            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() {
                    Value::Null
                } else {
                    let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() || len == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
                    Value::Bytes(slice.to_vec())
                }
            }
            _ => Value::Null,
        }
    }
}

/// Name (or alias) of a result column.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller contract
    unsafe {
        let ptr = ffi::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            CStr::from_ptr(ptr).to_str().ok().map(String::from)
        }
    }
}
