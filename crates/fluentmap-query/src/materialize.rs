//! Mapping result rows back onto entity graphs.
//!
//! The select renderer aliases every projected column as `tablecolumn`. For
//! each row, [`RowBuilder`] splits the aliased values into one fragment per
//! participating table, builds the root entity from its own fragment, and
//! hands the joined fragments (in join order) to the root's navigation
//! properties.

use fluentmap_core::error::TypeError;
use fluentmap_core::{Entity, Error, Result, Row, RowFragment};

/// One projected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projected {
    pub table: &'static str,
    pub column: &'static str,
    pub alias: String,
}

impl Projected {
    pub fn new(table: &'static str, column: &'static str) -> Self {
        Self {
            table,
            column,
            alias: format!("{}{}", table, column),
        }
    }
}

/// Per-query row builder keyed by table.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    /// Root table first, then joined tables in join order.
    tables: Vec<&'static str>,
    columns: Vec<Projected>,
}

impl RowBuilder {
    pub fn new(tables: Vec<&'static str>, columns: Vec<Projected>) -> Self {
        Self { tables, columns }
    }

    pub fn columns(&self) -> &[Projected] {
        &self.columns
    }

    /// Split a row into one fragment per table, in table order.
    pub fn fragments<'a>(&'a self, row: &'a Row) -> Result<Vec<RowFragment<'a>>> {
        let mut fragments: Vec<RowFragment<'a>> =
            self.tables.iter().map(|t| RowFragment::new(*t)).collect();
        for projected in &self.columns {
            let value = row.get_by_name(&projected.alias).ok_or_else(|| {
                Error::Type(TypeError {
                    expected: "selected column",
                    actual: "missing from result set".to_string(),
                    column: Some(projected.alias.clone()),
                })
            })?;
            if let Some(index) = self.tables.iter().position(|t| *t == projected.table) {
                fragments[index].push(projected.column, value);
            }
        }
        Ok(fragments)
    }

    /// Build one root entity, with navigation properties populated from the
    /// joined fragments.
    pub fn build<E: Entity>(&self, row: &Row) -> Result<E> {
        let fragments = self.fragments(row)?;
        let mut fragments = fragments.iter();
        let mut entity = E::default();
        if let Some(root) = fragments.next() {
            entity.apply_fragment(root)?;
        }
        for fragment in fragments {
            if fragment.is_empty() {
                continue;
            }
            if !entity.attach(fragment)? {
                tracing::trace!(
                    table = fragment.table(),
                    "No navigation property accepts joined table"
                );
            }
        }
        Ok(entity)
    }

    /// Materialize every row.
    pub fn build_all<E: Entity>(&self, rows: &[Row]) -> Result<Vec<E>> {
        rows.iter().map(|row| self.build(row)).collect()
    }
}
