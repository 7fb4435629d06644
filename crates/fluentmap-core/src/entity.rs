//! Entity trait and the static metadata it exposes.
//!
//! An entity is a struct mapped to one table. Its metadata (table name,
//! columns with their roles, navigation references) is static data, usually
//! emitted by `#[derive(Entity)]`. Resolution is read-only: nothing here
//! touches the database, and missing metadata surfaces as
//! [`Error::Metadata`] when a builder renders SQL.

use crate::Result;
use crate::error::Error;
use crate::row::RowFragment;
use crate::value::Value;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

/// What a column is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColumnRole {
    /// Ordinary data column
    Data,
    /// Surrogate identity
    Key,
    /// Optimistic-concurrency timestamp, re-stamped on every write
    RowVersion,
    /// Boolean "inactive" flag
    SoftDelete,
}

/// Metadata for one persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    /// Rust field name
    pub field: &'static str,
    /// Physical column name
    pub name: &'static str,
    pub role: ColumnRole,
}

impl ColumnMeta {
    pub const fn new(field: &'static str, name: &'static str, role: ColumnRole) -> Self {
        Self { field, name, role }
    }

    pub const fn data(field: &'static str, name: &'static str) -> Self {
        Self::new(field, name, ColumnRole::Data)
    }

    pub const fn key(field: &'static str, name: &'static str) -> Self {
        Self::new(field, name, ColumnRole::Key)
    }

    pub const fn row_version(field: &'static str, name: &'static str) -> Self {
        Self::new(field, name, ColumnRole::RowVersion)
    }

    pub const fn soft_delete(field: &'static str, name: &'static str) -> Self {
        Self::new(field, name, ColumnRole::SoftDelete)
    }

    /// Column name, checked to be a plain SQL identifier.
    pub fn checked_name<E>(&self) -> Result<&'static str> {
        if is_identifier(self.name) {
            Ok(self.name)
        } else {
            Err(Error::metadata::<E>(format!(
                "column '{}' of field '{}' is not a valid identifier",
                self.name, self.field
            )))
        }
    }
}

/// Metadata for a navigation property.
///
/// Navigation properties are populated by joins and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferenceMeta {
    /// Rust field name
    pub field: &'static str,
    /// Related table, if one could be resolved
    pub table: Option<&'static str>,
}

impl ReferenceMeta {
    pub const fn new(field: &'static str, table: Option<&'static str>) -> Self {
        Self { field, table }
    }
}

/// Whether `name` can be emitted unquoted as a table or column identifier.
pub fn is_identifier(name: &str) -> bool {
    static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Typed handle to a column of entity `E`.
///
/// The derive emits one associated constant per persisted field
/// (`Genre::NAME`), so builders take columns without string lookups and the
/// compiler rejects a column of the wrong entity.
pub struct Col<E> {
    meta: ColumnMeta,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Col<E> {
    pub const fn new(field: &'static str, name: &'static str, role: ColumnRole) -> Self {
        Self {
            meta: ColumnMeta::new(field, name, role),
            _entity: PhantomData,
        }
    }

    /// Physical column name.
    pub const fn name(&self) -> &'static str {
        self.meta.name
    }

    /// Rust field name.
    pub const fn field(&self) -> &'static str {
        self.meta.field
    }

    pub const fn role(&self) -> ColumnRole {
        self.meta.role
    }

    pub const fn meta(&self) -> ColumnMeta {
        self.meta
    }
}

impl<E: Entity> Col<E> {
    /// Table that owns this column.
    pub fn table(&self) -> Result<&'static str> {
        E::table()
    }

    /// Column name, validated.
    pub fn checked_name(&self) -> Result<&'static str> {
        self.meta.checked_name::<E>()
    }

    /// `table.column`
    pub fn qualified(&self) -> Result<String> {
        Ok(format!("{}.{}", self.table()?, self.checked_name()?))
    }
}

impl<E> Clone for Col<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Col<E> {}

impl<E> fmt::Debug for Col<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Col")
            .field("entity", &std::any::type_name::<E>())
            .field("field", &self.meta.field)
            .field("name", &self.meta.name)
            .field("role", &self.meta.role)
            .finish()
    }
}

/// A struct mapped to one table.
///
/// Usually derived:
///
/// ```ignore
/// use fluentmap::prelude::*;
///
/// #[derive(Debug, Default, Clone, Entity)]
/// #[entity(table = "movie")]
/// struct Movie {
///     #[entity(key)]
///     id: i64,
///     name: String,
///     #[entity(column = "genre_id")]
///     genre_id: i64,
///     #[entity(row_version)]
///     row_version: NaiveDateTime,
///     #[entity(soft_delete)]
///     deleted: bool,
///     #[entity(navigation)]
///     genre: Option<Genre>,
/// }
/// ```
pub trait Entity: Default + Send + Sync + Sized + 'static {
    /// Declared table name, if any.
    const TABLE_NAME: Option<&'static str>;

    /// Persisted columns in declaration order.
    fn columns() -> &'static [ColumnMeta];

    /// Navigation properties.
    fn references() -> &'static [ReferenceMeta] {
        &[]
    }

    /// Current value of every persisted column, keyed by column name.
    fn to_values(&self) -> Vec<(&'static str, Value)>;

    /// Assign this entity's fields from the columns selected for its table.
    fn apply_fragment(&mut self, fragment: &RowFragment<'_>) -> Result<()>;

    /// Attach a joined table's fragment to the matching navigation property.
    ///
    /// Returns `false` if no navigation property (direct or nested) accepts
    /// the fragment's table.
    fn attach(&mut self, fragment: &RowFragment<'_>) -> Result<bool> {
        let _ = fragment;
        Ok(false)
    }

    /// Identity value.
    fn key_value(&self) -> Value;

    /// Store a generated identity.
    fn set_key_value(&mut self, id: i64) -> Result<()>;

    /// Row version currently carried by this instance.
    fn row_version_value(&self) -> Value;

    /// Store a freshly stamped row version.
    fn set_row_version_value(&mut self, value: &Value) -> Result<()>;

    /// Validated table name.
    fn table() -> Result<&'static str> {
        match Self::TABLE_NAME {
            Some(name) if is_identifier(name) => Ok(name),
            Some(name) => Err(Error::metadata::<Self>(format!(
                "table name '{}' is not a valid identifier",
                name
            ))),
            None => Err(Error::metadata::<Self>(
                "no table name declared (add #[entity(table = \"...\")])",
            )),
        }
    }

    /// First column with the given role.
    fn column_with_role(role: ColumnRole) -> Option<&'static ColumnMeta> {
        Self::columns().iter().find(|c| c.role == role)
    }

    fn key_column() -> Result<&'static ColumnMeta> {
        Self::column_with_role(ColumnRole::Key)
            .ok_or_else(|| Error::metadata::<Self>("no key column declared"))
    }

    fn row_version_column() -> Result<&'static ColumnMeta> {
        Self::column_with_role(ColumnRole::RowVersion)
            .ok_or_else(|| Error::metadata::<Self>("no row version column declared"))
    }

    fn soft_delete_column() -> Result<&'static ColumnMeta> {
        Self::column_with_role(ColumnRole::SoftDelete)
            .ok_or_else(|| Error::metadata::<Self>("no soft delete column declared"))
    }

    /// Column metadata for a Rust field; `None` for unannotated or skipped fields.
    fn column_for_field(field: &str) -> Option<&'static ColumnMeta> {
        Self::columns().iter().find(|c| c.field == field)
    }

    /// Related table of a navigation property; `None` if absent or unresolved.
    fn reference_table(field: &str) -> Option<&'static str> {
        Self::references()
            .iter()
            .find(|r| r.field == field)
            .and_then(|r| r.table)
    }

    /// `table.column` for a Rust field.
    fn qualified_column(field: &str) -> Result<String> {
        let column = Self::column_for_field(field).ok_or_else(|| {
            Error::metadata::<Self>(format!("field '{}' is not a mapped column", field))
        })?;
        Ok(format!("{}.{}", Self::table()?, column.checked_name::<Self>()?))
    }
}
