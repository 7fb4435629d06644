//! SELECT query builder.

use crate::column::ColumnRef;
use crate::filter::{ColumnStyle, Conjunction, Filtered, Operator, WhereClause};
use crate::materialize::{Projected, RowBuilder};
use crate::statement::{ResetPolicy, Statement};
use fluentmap_core::{Col, Connection, Cx, Entity, Error, Outcome, Result, Value};
use std::collections::HashMap;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// `INNER JOIN dest ON source = dest_column`; the destination table comes
/// from the joined entity type.
#[derive(Debug, Clone, Copy)]
struct JoinSpec {
    source: ColumnRef,
    dest: ColumnRef,
    dest_columns: fn() -> Result<Vec<&'static str>>,
}

fn column_names<E: Entity>() -> Result<Vec<&'static str>> {
    E::columns()
        .iter()
        .map(|column| column.checked_name::<E>())
        .collect()
}

/// A rendered select plus the row builder that maps its results.
#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub statement: Statement,
    pub rows: RowBuilder,
}

/// A SELECT over entity `E`, optionally joined to related entities.
///
/// # Example
///
/// ```ignore
/// let movies = Select::<Movie>::new()
///     .select_all()
///     .inner_join(Movie::GENRE_ID, Genre::ID)
///     .r#where(Genre::NAME).equal("Horror")
///     .order_by_ascending(Movie::NAME)
///     .limit(20, 0)
///     .query(&cx, &conn)
///     .await;
/// ```
#[derive(Debug)]
pub struct Select<E: Entity> {
    policy: ResetPolicy,
    all_columns: bool,
    columns: Vec<ColumnRef>,
    joins: Vec<JoinSpec>,
    where_clause: WhereClause,
    order_by: Vec<(ColumnRef, Direction)>,
    limit: Option<(u64, u64)>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for Select<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Select<E> {
    /// One-shot select: all accumulated state is cleared after it runs.
    pub fn new() -> Self {
        Self::with_policy(ResetPolicy::OneShot)
    }

    /// Reusable select: state survives execution so the same shape can run
    /// again (paging with [`set_limit`](Self::set_limit), for example).
    pub fn template() -> Self {
        Self::with_policy(ResetPolicy::Reusable)
    }

    pub fn with_policy(policy: ResetPolicy) -> Self {
        Self {
            policy,
            all_columns: false,
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: WhereClause::new(),
            order_by: Vec::new(),
            limit: None,
            _entity: PhantomData,
        }
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    /// Project every column of `E` and of every joined table.
    pub fn select_all(mut self) -> Self {
        self.all_columns = true;
        self
    }

    /// Alias for [`select_all`](Self::select_all).
    pub fn all_columns(self) -> Self {
        self.select_all()
    }

    /// Project one column of `E`.
    pub fn column(mut self, column: Col<E>) -> Self {
        self.columns.push(column.into());
        self
    }

    /// Project one column of a joined entity.
    pub fn column_ref<R: Entity>(mut self, column: Col<R>) -> Self {
        self.columns.push(column.into());
        self
    }

    /// Inner-join `D` on `source = dest`. `source` must belong to `E` or to
    /// a table joined earlier.
    pub fn inner_join<S: Entity, D: Entity>(mut self, source: Col<S>, dest: Col<D>) -> Self {
        self.joins.push(JoinSpec {
            source: source.into(),
            dest: dest.into(),
            dest_columns: column_names::<D>,
        });
        self
    }

    pub fn order_by_ascending<R: Entity>(mut self, column: Col<R>) -> Self {
        self.order_by.push((column.into(), Direction::Ascending));
        self
    }

    pub fn order_by_descending<R: Entity>(mut self, column: Col<R>) -> Self {
        self.order_by.push((column.into(), Direction::Descending));
        self
    }

    /// `LIMIT offset, count`; replaces any earlier limit.
    pub fn limit(mut self, count: u64, offset: u64) -> Self {
        self.set_limit(count, offset);
        self
    }

    /// In-place [`limit`](Self::limit), for paging a reusable template.
    pub fn set_limit(&mut self, count: u64, offset: u64) {
        self.limit = Some((count, offset));
    }

    /// Rebind the values of the `index`th WHERE fragment (0-based, in the
    /// order the filters were added), for rerunning a reusable template
    /// with new arguments.
    pub fn set_filter_values<I, V>(&mut self, index: usize, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_clause
            .rebind(index, values.into_iter().map(Into::into).collect())
    }

    /// Clear columns, joins, filters, ordering and limit.
    pub fn reset(&mut self) {
        self.all_columns = false;
        self.columns.clear();
        self.joins.clear();
        self.where_clause.clear();
        self.order_by.clear();
        self.limit = None;
    }

    fn finish(&mut self) {
        if self.policy == ResetPolicy::OneShot {
            self.reset();
        }
    }

    /// Root table followed by joined tables, validating the join graph.
    fn tables(&self) -> Result<Vec<&'static str>> {
        let mut tables = vec![E::table()?];
        for join in &self.joins {
            let (source_table, _) = join.source.resolve()?;
            let (dest_table, _) = join.dest.resolve()?;
            if !tables.contains(&source_table) {
                return Err(Error::InvalidOperation(format!(
                    "join source table '{}' is neither the root table nor joined before '{}'",
                    source_table, dest_table
                )));
            }
            if tables.contains(&dest_table) {
                return Err(Error::metadata::<E>(format!(
                    "table '{}' appears more than once in the query",
                    dest_table
                )));
            }
            tables.push(dest_table);
        }
        Ok(tables)
    }

    fn joins_sql(&self, sql: &mut String) -> Result<()> {
        for join in &self.joins {
            let (source_table, source_column) = join.source.resolve()?;
            let (dest_table, dest_column) = join.dest.resolve()?;
            sql.push_str(&format!(
                " INNER JOIN {} ON {}.{} = {}.{}",
                dest_table, source_table, source_column, dest_table, dest_column
            ));
        }
        Ok(())
    }

    fn projection(&self, tables: &[&'static str]) -> Result<Vec<Projected>> {
        let mut wanted: Vec<(&'static str, &'static str)> = Vec::new();

        if self.all_columns {
            for name in column_names::<E>()? {
                wanted.push((tables[0], name));
            }
            for (join, table) in self.joins.iter().zip(&tables[1..]) {
                for name in (join.dest_columns)()? {
                    wanted.push((*table, name));
                }
            }
        }

        for column in &self.columns {
            let (table, name) = column.resolve()?;
            if !tables.contains(&table) {
                return Err(Error::InvalidOperation(format!(
                    "column {}.{} belongs to a table that is not joined",
                    table, name
                )));
            }
            wanted.push((table, name));
        }

        let mut projected: Vec<Projected> = Vec::with_capacity(wanted.len());
        let mut aliases: HashMap<String, (&'static str, &'static str)> = HashMap::new();
        for (table, column) in wanted {
            let candidate = Projected::new(table, column);
            match aliases.get(&candidate.alias) {
                Some(&existing) if existing == (table, column) => continue,
                Some(&(other_table, other_column)) => {
                    return Err(Error::metadata::<E>(format!(
                        "alias '{}' is produced by both {}.{} and {}.{}",
                        candidate.alias, other_table, other_column, table, column
                    )));
                }
                None => {
                    aliases.insert(candidate.alias.clone(), (table, column));
                    projected.push(candidate);
                }
            }
        }

        if projected.is_empty() {
            return Err(Error::InvalidOperation(
                "select has no columns; call select_all() or column()".to_string(),
            ));
        }
        Ok(projected)
    }

    fn tail_sql(&self, tables: &[&'static str], sql: &mut String) -> Result<()> {
        if !self.order_by.is_empty() {
            let mut parts = Vec::with_capacity(self.order_by.len());
            for (column, direction) in &self.order_by {
                let (table, name) = column.resolve()?;
                if !tables.contains(&table) {
                    return Err(Error::InvalidOperation(format!(
                        "order column {}.{} belongs to a table that is not joined",
                        table, name
                    )));
                }
                parts.push(format!("{}.{} {}", table, name, direction.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }
        if let Some((count, offset)) = self.limit {
            sql.push_str(&format!(" LIMIT {}, {}", offset, count));
        }
        Ok(())
    }

    /// Render SQL, parameters and the row builder.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn plan(&self) -> Result<SelectPlan> {
        let tables = self.tables()?;
        let projected = self.projection(&tables)?;

        let select_list: Vec<String> = projected
            .iter()
            .map(|p| format!("{}.{} AS {}", p.table, p.column, p.alias))
            .collect();

        let mut sql = format!("SELECT {} FROM {}", select_list.join(", "), tables[0]);
        let mut params: Vec<Value> = Vec::new();
        self.joins_sql(&mut sql)?;
        self.where_clause
            .render(ColumnStyle::Qualified, &tables, &mut sql, &mut params)?;
        self.tail_sql(&tables, &mut sql)?;

        Ok(SelectPlan {
            statement: Statement::new(sql, params),
            rows: RowBuilder::new(tables, projected),
        })
    }

    /// Render the SELECT statement.
    pub fn build(&self) -> Result<Statement> {
        self.plan().map(|plan| plan.statement)
    }

    /// Render `SELECT COUNT(*)` over the same joins and filters.
    pub fn build_count(&self) -> Result<Statement> {
        let tables = self.tables()?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", tables[0]);
        let mut params = Vec::new();
        self.joins_sql(&mut sql)?;
        self.where_clause
            .render(ColumnStyle::Qualified, &tables, &mut sql, &mut params)?;
        Ok(Statement::new(sql, params))
    }

    /// Execute and materialize every matching row.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn query<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<Vec<E>, Error> {
        let plan = self.plan();
        self.finish();
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };

        tracing::debug!(
            entity = std::any::type_name::<E>(),
            sql = %plan.statement.sql,
            params = plan.statement.params.len(),
            "Executing select"
        );

        match conn
            .query(cx, &plan.statement.sql, &plan.statement.params)
            .await
        {
            Outcome::Ok(rows) => {
                tracing::debug!(rows = rows.len(), "Materializing select results");
                plan.rows
                    .build_all::<E>(&rows)
                    .map_or_else(Outcome::Err, Outcome::Ok)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Execute expecting zero or one row.
    ///
    /// More than one row is an [`Error::InvalidOperation`]; `limit(1, 0)`
    /// makes the query safe on multi-row data.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn query_single<C: Connection>(
        &mut self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<Option<E>, Error> {
        match self.query(cx, conn).await {
            Outcome::Ok(mut results) => {
                if results.len() > 1 {
                    return Outcome::Err(Error::InvalidOperation(format!(
                        "query_single expected at most one row, found {}",
                        results.len()
                    )));
                }
                Outcome::Ok(results.pop())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Count matching rows.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn count<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let statement = self.build_count();
        self.finish();
        let statement = match statement {
            Ok(statement) => statement,
            Err(e) => return Outcome::Err(e),
        };

        tracing::debug!(sql = %statement.sql, "Executing count");

        match conn.query(cx, &statement.sql, &statement.params).await {
            Outcome::Ok(rows) => {
                let count = match rows.first() {
                    Some(row) => row.get_as::<u64>(0),
                    None => Ok(0),
                };
                count.map_or_else(Outcome::Err, Outcome::Ok)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Load one entity by key (all columns, `limit(1, 0)`).
    pub async fn find_by_id<C: Connection>(
        cx: &Cx,
        conn: &C,
        id: impl Into<Value>,
    ) -> Outcome<Option<E>, Error> {
        let mut select = Self::new().select_all().limit(1, 0);
        select.where_clause.push(
            Conjunction::Where,
            ColumnRef::key::<E>(),
            Operator::Equal,
            vec![id.into()],
        );
        select.query_single(cx, conn).await
    }
}

impl<E: Entity> Filtered for Select<E> {
    type Target = E;

    fn where_clause_mut(&mut self) -> &mut WhereClause {
        &mut self.where_clause
    }
}
