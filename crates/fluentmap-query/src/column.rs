//! Untyped column references used inside builders.
//!
//! Builders accept typed `Col<E>` handles but store columns of several
//! entities side by side (root, joined tables). A `ColumnRef` keeps the
//! column name together with a resolver monomorphized for its entity, so
//! table lookup and identifier validation happen when SQL is rendered.

use fluentmap_core::{Col, Entity, Error, Result, is_identifier};
use std::fmt;

type Resolver = fn(&'static str) -> Result<(&'static str, &'static str)>;

/// A column of some entity, resolved to `(table, column)` at render time.
#[derive(Clone, Copy)]
pub struct ColumnRef {
    name: &'static str,
    entity: &'static str,
    resolve: Resolver,
}

impl ColumnRef {
    /// Reference to a column of `E` by physical name.
    pub fn of<E: Entity>(name: &'static str) -> Self {
        Self {
            name,
            entity: std::any::type_name::<E>(),
            resolve: resolve_named::<E>,
        }
    }

    /// Reference to the soft-delete flag of `E`, whatever it is called.
    pub fn soft_delete<E: Entity>() -> Self {
        Self {
            name: "",
            entity: std::any::type_name::<E>(),
            resolve: resolve_soft_delete::<E>,
        }
    }

    /// Reference to the key column of `E`.
    pub fn key<E: Entity>() -> Self {
        Self {
            name: "",
            entity: std::any::type_name::<E>(),
            resolve: resolve_key::<E>,
        }
    }

    /// `(table, column)`, or the metadata error explaining why not.
    pub fn resolve(&self) -> Result<(&'static str, &'static str)> {
        (self.resolve)(self.name)
    }
}

impl<E: Entity> From<Col<E>> for ColumnRef {
    fn from(col: Col<E>) -> Self {
        ColumnRef::of::<E>(col.name())
    }
}

impl fmt::Debug for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnRef")
            .field("entity", &self.entity)
            .field("name", &self.name)
            .finish()
    }
}

fn resolve_named<E: Entity>(name: &'static str) -> Result<(&'static str, &'static str)> {
    let table = E::table()?;
    if is_identifier(name) {
        Ok((table, name))
    } else {
        Err(Error::metadata::<E>(format!(
            "column '{}' is not a valid identifier",
            name
        )))
    }
}

fn resolve_soft_delete<E: Entity>(_: &'static str) -> Result<(&'static str, &'static str)> {
    let column = E::soft_delete_column()?;
    Ok((E::table()?, column.checked_name::<E>()?))
}

fn resolve_key<E: Entity>(_: &'static str) -> Result<(&'static str, &'static str)> {
    let column = E::key_column()?;
    Ok((E::table()?, column.checked_name::<E>()?))
}
