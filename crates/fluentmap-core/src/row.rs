//! Result rows and their conversion into field values.
//!
//! Select statements alias every projected column (`movietitle`,
//! `genrename`), so rows are looked up by alias first and split into
//! per-table [`RowFragment`]s by the query layer.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;

/// Result-set column names, shared by every row of one statement.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(position, alias)| (alias.clone(), position))
            .collect();
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of an alias in the result set.
    pub fn position(&self, alias: &str) -> Option<usize> {
        self.positions.get(alias).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One result row.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Build a standalone row. Drivers reading a whole result set use
    /// [`Row::with_columns`] so the names are allocated once.
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value under a result-set alias.
    pub fn get_by_name(&self, alias: &str) -> Option<&Value> {
        let position = self.columns.position(alias)?;
        self.values.get(position)
    }

    /// Convert the value at `index`; a missing index is a type error.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        match self.get(index) {
            Some(value) => T::from_value(value),
            None => Err(Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("no column at position {} of {}", index, self.len()),
                column: None,
            })),
        }
    }

    /// Convert the value under `alias`, naming the alias in any error.
    pub fn get_named<T: FromValue>(&self, alias: &str) -> Result<T> {
        match self.get_by_name(alias) {
            Some(value) => T::from_value(value).map_err(|e| with_column(e, alias)),
            None => Err(Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: "absent from result set".to_string(),
                column: Some(alias.to_string()),
            })),
        }
    }

    /// `(alias, value)` pairs in result-set order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(&self.values)
    }
}

fn with_column(err: Error, column: &str) -> Error {
    match err {
        Error::Type(mut te) => {
            te.column = Some(column.to_string());
            Error::Type(te)
        }
        e => e,
    }
}

/// The selected columns of one table within one result row.
///
/// The select renderer aliases every column, so a joined row carries the
/// columns of several tables side by side; the materializer splits it into
/// one fragment per participating table and hands each to the entity that
/// owns that table.
#[derive(Debug, Clone)]
pub struct RowFragment<'r> {
    table: &'r str,
    entries: Vec<(&'r str, &'r Value)>,
}

impl<'r> RowFragment<'r> {
    pub fn new(table: &'r str) -> Self {
        Self {
            table,
            entries: Vec::new(),
        }
    }

    /// Add a column value to this fragment.
    pub fn push(&mut self, column: &'r str, value: &'r Value) {
        self.entries.push((column, value));
    }

    /// Table these columns belong to.
    pub fn table(&self) -> &str {
        self.table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw value of a column, if it was selected.
    pub fn value(&self, column: &str) -> Option<&'r Value> {
        self.entries
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| *value)
    }

    /// Assign a selected column to a field.
    ///
    /// Columns that were not selected leave the field untouched. NULL maps to
    /// `None` for optional fields and to the type's default otherwise.
    pub fn assign<T: FromValue + Default>(&self, slot: &mut T, column: &str) -> Result<()> {
        let Some(value) = self.value(column) else {
            return Ok(());
        };
        if value.is_null() {
            *slot = T::from_value(value).unwrap_or_default();
            return Ok(());
        }
        *slot = T::from_value(value).map_err(|e| with_column(e, column))?;
        Ok(())
    }
}

/// Field types a selected column can be read into.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

fn out_of_range(expected: &'static str, v: i64) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("value {} out of range", v),
        column: None,
    })
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self> {
        let v = value.as_i64().ok_or_else(|| mismatch("i16", value))?;
        i16::try_from(v).map_err(|_| out_of_range("i16", v))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let v = value.as_i64().ok_or_else(|| mismatch("i32", value))?;
        i32::try_from(v).map_err(|_| out_of_range("i32", v))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch("i64", value))
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self> {
        let v = value.as_i64().ok_or_else(|| mismatch("u32", value))?;
        u32::try_from(v).map_err(|_| out_of_range("u32", v))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self> {
        if let Value::Unsigned(v) = value {
            return Ok(*v);
        }
        let v = value.as_i64().ok_or_else(|| mismatch("u64", value))?;
        u64::try_from(v).map_err(|_| out_of_range("u64", v))
    }
}

#[allow(clippy::cast_possible_truncation)]
impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| mismatch("f32", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Json(j) => Ok(j.to_string()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_datetime()
            .ok_or_else(|| mismatch("NaiveDateTime", value))
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_date().ok_or_else(|| mismatch("NaiveDate", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|e| {
                Error::Type(TypeError {
                    expected: "valid JSON",
                    actual: format!("invalid JSON: {}", e),
                    column: None,
                })
            }),
            _ => Err(mismatch("JSON", value)),
        }
    }
}
