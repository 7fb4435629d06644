//! DELETE and soft-delete builders.

use crate::column::ColumnRef;
use crate::filter::{ColumnStyle, Filtered, WhereClause};
use crate::statement::{BoxFuture, Executable, ResetPolicy, Statement, now_stamp};
use chrono::NaiveDateTime;
use fluentmap_core::{Connection, Cx, Entity, Error, Outcome, Result, Value};
use std::marker::PhantomData;

/// `DELETE FROM table WHERE ...`
///
/// A delete without any WHERE fragment is rejected unless
/// [`all_rows`](Self::all_rows) was requested.
#[derive(Debug)]
pub struct Delete<E: Entity> {
    policy: ResetPolicy,
    all_rows: bool,
    where_clause: WhereClause,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for Delete<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Delete<E> {
    pub fn new() -> Self {
        Self::with_policy(ResetPolicy::OneShot)
    }

    pub fn template() -> Self {
        Self::with_policy(ResetPolicy::Reusable)
    }

    pub fn with_policy(policy: ResetPolicy) -> Self {
        Self {
            policy,
            all_rows: false,
            where_clause: WhereClause::new(),
            _entity: PhantomData,
        }
    }

    /// Allow the statement to run without a WHERE clause.
    pub fn all_rows(mut self) -> Self {
        self.all_rows = true;
        self
    }

    /// Rebind the values of the `index`th WHERE fragment of a template.
    pub fn set_filter_values<I, V>(&mut self, index: usize, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_clause
            .rebind(index, values.into_iter().map(Into::into).collect())
    }

    pub fn reset(&mut self) {
        self.all_rows = false;
        self.where_clause.clear();
    }

    pub fn build(&self) -> Result<Statement> {
        let table = E::table()?;
        if self.where_clause.is_empty() && !self.all_rows {
            return Err(Error::InvalidOperation(format!(
                "refusing to delete every row of {}; add a where clause or call all_rows()",
                table
            )));
        }
        let mut sql = format!("DELETE FROM {}", table);
        let mut params = Vec::new();
        self.where_clause
            .render(ColumnStyle::Bare, &[table], &mut sql, &mut params)?;
        Ok(Statement::new(sql, params))
    }

    /// Run the delete and return the affected count.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn execute<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let statement = self.build();
        if self.policy == ResetPolicy::OneShot {
            self.reset();
        }
        let statement = match statement {
            Ok(statement) => statement,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "Executing delete");
        statement.execute(cx, conn).await
    }
}

impl<E: Entity> Filtered for Delete<E> {
    type Target = E;

    fn where_clause_mut(&mut self) -> &mut WhereClause {
        &mut self.where_clause
    }
}

impl<E: Entity, C: Connection> Executable<C> for Delete<E> {
    fn run<'f>(self: Box<Self>, cx: &'f Cx, conn: &'f C) -> BoxFuture<'f, Outcome<u64, Error>>
    where
        Self: 'f,
    {
        let mut delete = *self;
        Box::pin(async move { delete.execute(cx, conn).await })
    }
}

/// Flag one row as deleted: `UPDATE table SET deleted = ?, row_version = ? WHERE id = ?`.
///
/// The row version is re-stamped when the entity declares one.
#[derive(Debug)]
pub struct SoftDelete<E: Entity> {
    id: Value,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SoftDelete<E> {
    pub fn by_id(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            _entity: PhantomData,
        }
    }

    pub fn build_at(&self, now: NaiveDateTime) -> Result<Statement> {
        let table = E::table()?;
        let (_, flag) = ColumnRef::soft_delete::<E>().resolve()?;
        let (_, key) = ColumnRef::key::<E>().resolve()?;

        let mut sql = format!("UPDATE {} SET {} = ?", table, flag);
        let mut params = vec![Value::Bool(true)];
        if let Ok(row_version) = E::row_version_column() {
            sql.push_str(&format!(", {} = ?", row_version.checked_name::<E>()?));
            params.push(Value::from(now));
        }
        sql.push_str(&format!(" WHERE {} = ?", key));
        params.push(self.id.clone());
        Ok(Statement::new(sql, params))
    }

    pub fn build(&self) -> Result<Statement> {
        self.build_at(now_stamp())
    }

    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn execute<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let statement = match self.build() {
            Ok(statement) => statement,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %statement.sql, "Executing soft delete");
        statement.execute(cx, conn).await
    }
}

impl<E: Entity, C: Connection> Executable<C> for SoftDelete<E> {
    fn run<'f>(self: Box<Self>, cx: &'f Cx, conn: &'f C) -> BoxFuture<'f, Outcome<u64, Error>>
    where
        Self: 'f,
    {
        Box::pin(async move { self.execute(cx, conn).await })
    }
}
