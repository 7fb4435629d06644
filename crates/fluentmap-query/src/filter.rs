//! WHERE clause accumulation.
//!
//! A clause is a linear list of `(conjunction, column, operator, values)`
//! fragments rendered left to right without grouping, so `a AND b OR c`
//! follows SQL precedence. Every value is bound as a parameter.

use crate::column::ColumnRef;
use fluentmap_core::{Col, Entity, Error, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    Where,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    GreaterThan,
    LowerThan,
    GreaterThanEquals,
    LowerThanEquals,
    /// Trailing-wildcard `LIKE`
    StartsWith,
    In,
    NotIn,
}

impl Operator {
    fn comparison(self) -> Option<&'static str> {
        match self {
            Operator::Equal => Some("="),
            Operator::GreaterThan => Some(">"),
            Operator::LowerThan => Some("<"),
            Operator::GreaterThanEquals => Some(">="),
            Operator::LowerThanEquals => Some("<="),
            Operator::StartsWith | Operator::In | Operator::NotIn => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Fragment {
    conjunction: Conjunction,
    column: ColumnRef,
    operator: Operator,
    values: Vec<Value>,
}

/// How rendered columns are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnStyle {
    /// `table.column`, for SELECT with joins
    Qualified,
    /// `column`, for single-table UPDATE and DELETE
    Bare,
}

/// Accumulated WHERE fragments.
#[derive(Debug, Clone, Default)]
pub struct WhereClause {
    fragments: Vec<Fragment>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    pub fn push(
        &mut self,
        conjunction: Conjunction,
        column: ColumnRef,
        operator: Operator,
        values: Vec<Value>,
    ) {
        self.fragments.push(Fragment {
            conjunction,
            column,
            operator,
            values,
        });
    }

    /// Replace the values of the `index`th fragment, keeping its column and
    /// operator. A `starts_with` fragment escapes a text prefix again.
    pub fn rebind(&mut self, index: usize, values: Vec<Value>) -> Result<()> {
        let count = self.fragments.len();
        let fragment = self.fragments.get_mut(index).ok_or_else(|| {
            Error::InvalidOperation(format!(
                "filter {} does not exist; the clause has {} fragment(s)",
                index, count
            ))
        })?;
        let values = match fragment.operator {
            Operator::In | Operator::NotIn => values,
            operator if values.len() != 1 => {
                return Err(Error::InvalidOperation(format!(
                    "{:?} filter takes exactly one value, got {}",
                    operator,
                    values.len()
                )));
            }
            Operator::StartsWith => values
                .into_iter()
                .map(|value| match value {
                    Value::Text(prefix) => Value::Text(like_prefix(&prefix)),
                    other => other,
                })
                .collect(),
            _ => values,
        };
        fragment.values = values;
        Ok(())
    }

    /// Tables referenced by the clause.
    pub fn tables(&self) -> Result<Vec<&'static str>> {
        let mut tables = Vec::new();
        for fragment in &self.fragments {
            let (table, _) = fragment.column.resolve()?;
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// Append ` WHERE ...` to `sql` and the bound values to `params`.
    ///
    /// The first fragment always opens with `WHERE`; a later `where` call
    /// continues the clause with `AND`. Columns whose table is not in
    /// `tables` are rejected.
    pub fn render(
        &self,
        style: ColumnStyle,
        tables: &[&str],
        sql: &mut String,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        for (index, fragment) in self.fragments.iter().enumerate() {
            let (table, column) = fragment.column.resolve()?;
            if !tables.contains(&table) {
                return Err(Error::InvalidOperation(format!(
                    "filter column {}.{} belongs to a table that is not part of the statement",
                    table, column
                )));
            }

            sql.push_str(match (index, fragment.conjunction) {
                (0, _) => " WHERE ",
                (_, Conjunction::Where | Conjunction::And) => " AND ",
                (_, Conjunction::Or) => " OR ",
            });

            let target = match style {
                ColumnStyle::Qualified => format!("{}.{}", table, column),
                ColumnStyle::Bare => column.to_string(),
            };

            if let Some(op) = fragment.operator.comparison() {
                sql.push_str(&format!("{} {} ?", target, op));
                params.extend(fragment.values.iter().take(1).cloned());
                continue;
            }

            match fragment.operator {
                Operator::StartsWith => {
                    sql.push_str(&format!("{} LIKE ? ESCAPE '\\'", target));
                    params.extend(fragment.values.iter().take(1).cloned());
                }
                Operator::In | Operator::NotIn if fragment.values.is_empty() => {
                    // Nothing is in the empty set; everything is outside it.
                    sql.push_str(if fragment.operator == Operator::In {
                        "1 = 0"
                    } else {
                        "1 = 1"
                    });
                }
                Operator::In | Operator::NotIn => {
                    let keyword = if fragment.operator == Operator::In {
                        "IN"
                    } else {
                        "NOT IN"
                    };
                    let placeholders = vec!["?"; fragment.values.len()].join(", ");
                    sql.push_str(&format!("{} {} ({})", target, keyword, placeholders));
                    params.extend(fragment.values.iter().cloned());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Escape `LIKE` wildcards in a prefix and append the trailing `%`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Builders that accumulate a WHERE clause.
pub trait Filtered: Sized {
    /// Entity the statement targets.
    type Target: Entity;

    fn where_clause_mut(&mut self) -> &mut WhereClause;

    /// Start the clause on `column`.
    fn r#where<R: Entity>(self, column: Col<R>) -> Condition<Self> {
        Condition::new(self, Conjunction::Where, column.into())
    }

    /// Continue the clause with `AND column ...`.
    fn and<R: Entity>(self, column: Col<R>) -> Condition<Self> {
        Condition::new(self, Conjunction::And, column.into())
    }

    /// Continue the clause with `OR column ...`.
    fn or<R: Entity>(self, column: Col<R>) -> Condition<Self> {
        Condition::new(self, Conjunction::Or, column.into())
    }

    /// Only rows whose soft-delete flag is false.
    fn where_active(self) -> Self {
        Condition::new(self, Conjunction::And, ColumnRef::soft_delete::<Self::Target>()).equal(false)
    }
}

/// A column waiting for its operator.
#[must_use = "a condition does nothing until an operator such as `equal` completes it"]
pub struct Condition<B> {
    builder: B,
    conjunction: Conjunction,
    column: ColumnRef,
}

impl<B: Filtered> Condition<B> {
    fn new(builder: B, conjunction: Conjunction, column: ColumnRef) -> Self {
        Self {
            builder,
            conjunction,
            column,
        }
    }

    fn complete(mut self, operator: Operator, values: Vec<Value>) -> B {
        self.builder
            .where_clause_mut()
            .push(self.conjunction, self.column, operator, values);
        self.builder
    }

    pub fn equal(self, value: impl Into<Value>) -> B {
        self.complete(Operator::Equal, vec![value.into()])
    }

    pub fn greater_than(self, value: impl Into<Value>) -> B {
        self.complete(Operator::GreaterThan, vec![value.into()])
    }

    pub fn lower_than(self, value: impl Into<Value>) -> B {
        self.complete(Operator::LowerThan, vec![value.into()])
    }

    pub fn greater_than_equals(self, value: impl Into<Value>) -> B {
        self.complete(Operator::GreaterThanEquals, vec![value.into()])
    }

    pub fn lower_than_equals(self, value: impl Into<Value>) -> B {
        self.complete(Operator::LowerThanEquals, vec![value.into()])
    }

    /// `column LIKE 'prefix%'`, with wildcards in `prefix` matched literally.
    pub fn starts_with(self, prefix: impl AsRef<str>) -> B {
        let pattern = like_prefix(prefix.as_ref());
        self.complete(Operator::StartsWith, vec![Value::Text(pattern)])
    }

    pub fn is_in<I, V>(self, values: I) -> B
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.complete(Operator::In, values)
    }

    pub fn not_in<I, V>(self, values: I) -> B
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.complete(Operator::NotIn, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Genre, Movie, Untabled};

    struct Scratch<E> {
        clause: WhereClause,
        _entity: std::marker::PhantomData<E>,
    }

    impl<E: Entity> Scratch<E> {
        fn new() -> Self {
            Self {
                clause: WhereClause::new(),
                _entity: std::marker::PhantomData,
            }
        }

        fn render(&self, style: ColumnStyle, tables: &[&str]) -> Result<(String, Vec<Value>)> {
            let mut sql = String::new();
            let mut params = Vec::new();
            self.clause.render(style, tables, &mut sql, &mut params)?;
            Ok((sql, params))
        }
    }

    impl<E: Entity> Filtered for Scratch<E> {
        type Target = E;

        fn where_clause_mut(&mut self) -> &mut WhereClause {
            &mut self.clause
        }
    }

    #[test]
    fn rebind_swaps_values_in_place() {
        let mut scratch = Scratch::<Genre>::new()
            .r#where(Genre::NAME)
            .starts_with("Dr")
            .and(Genre::ID)
            .is_in([1_i64, 2]);
        scratch.clause.rebind(0, vec![Value::from("50%")]).unwrap();
        scratch
            .clause
            .rebind(1, vec![Value::from(7_i64), Value::from(8_i64), Value::from(9_i64)])
            .unwrap();

        let (sql, params) = scratch.render(ColumnStyle::Bare, &["genre"]).unwrap();
        assert_eq!(sql, " WHERE name LIKE ? ESCAPE '\\' AND id IN (?, ?, ?)");
        assert_eq!(params[0], Value::from("50\\%%"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn rebind_checks_index_and_arity() {
        let mut scratch = Scratch::<Genre>::new().r#where(Genre::NAME).equal("Drama");
        let err = scratch.clause.rebind(3, vec![Value::from("Horror")]).unwrap_err();
        assert!(err.is_invalid_operation(), "{err}");
        let err = scratch.clause.rebind(0, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("exactly one value"), "{err}");

        let (_, params) = scratch.render(ColumnStyle::Bare, &["genre"]).unwrap();
        assert_eq!(params, vec![Value::from("Drama")]);
    }

    #[test]
    fn renders_linear_conjunctions() {
        let scratch = Scratch::<Movie>::new()
            .r#where(Movie::NAME)
            .equal("Alien")
            .and(Movie::GENRE_ID)
            .greater_than(2_i64)
            .or(Movie::GENRE_ID)
            .lower_than_equals(0_i64);

        let (sql, params) = scratch.render(ColumnStyle::Qualified, &["movie"]).unwrap();
        assert_eq!(
            sql,
            " WHERE movie.name = ? AND movie.genre_id > ? OR movie.genre_id <= ?"
        );
        assert_eq!(
            params,
            vec![
                Value::Text("Alien".to_string()),
                Value::BigInt(2),
                Value::BigInt(0)
            ]
        );
    }

    #[test]
    fn bare_style_drops_table() {
        let scratch = Scratch::<Genre>::new()
            .r#where(Genre::NAME)
            .greater_than_equals("A")
            .and(Genre::ID)
            .lower_than(10_i64);
        let (sql, _) = scratch.render(ColumnStyle::Bare, &["genre"]).unwrap();
        assert_eq!(sql, " WHERE name >= ? AND id < ?");
    }

    #[test]
    fn repeated_where_continues_with_and() {
        let scratch = Scratch::<Genre>::new()
            .r#where(Genre::NAME)
            .equal("Drama")
            .r#where(Genre::ID)
            .equal(1_i64);
        let (sql, _) = scratch.render(ColumnStyle::Bare, &["genre"]).unwrap();
        assert_eq!(sql, " WHERE name = ? AND id = ?");
    }

    #[test]
    fn starts_with_escapes_wildcards() {
        let scratch = Scratch::<Genre>::new().r#where(Genre::NAME).starts_with("50%_off\\");
        let (sql, params) = scratch.render(ColumnStyle::Qualified, &["genre"]).unwrap();
        assert_eq!(sql, " WHERE genre.name LIKE ? ESCAPE '\\'");
        assert_eq!(params, vec![Value::Text("50\\%\\_off\\\\%".to_string())]);
    }

    #[test]
    fn set_membership() {
        let scratch = Scratch::<Genre>::new()
            .r#where(Genre::ID)
            .is_in([1_i64, 2, 3])
            .and(Genre::NAME)
            .not_in(["Horror"]);
        let (sql, params) = scratch.render(ColumnStyle::Bare, &["genre"]).unwrap();
        assert_eq!(sql, " WHERE id IN (?, ?, ?) AND name NOT IN (?)");
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn empty_sets_render_constant_predicates() {
        let scratch = Scratch::<Genre>::new()
            .r#where(Genre::ID)
            .is_in(Vec::<i64>::new())
            .or(Genre::ID)
            .not_in(Vec::<i64>::new());
        let (sql, params) = scratch.render(ColumnStyle::Bare, &["genre"]).unwrap();
        assert_eq!(sql, " WHERE 1 = 0 OR 1 = 1");
        assert!(params.is_empty());
    }

    #[test]
    fn where_active_uses_soft_delete_column() {
        let scratch = Scratch::<Genre>::new().where_active();
        let (sql, params) = scratch.render(ColumnStyle::Qualified, &["genre"]).unwrap();
        assert_eq!(sql, " WHERE genre.deleted = ?");
        assert_eq!(params, vec![Value::Bool(false)]);
    }

    #[test]
    fn missing_table_fails_at_render() {
        let scratch = Scratch::<Untabled>::new().r#where(Untabled::LABEL).equal("x");
        let err = scratch.render(ColumnStyle::Bare, &[]).unwrap_err();
        assert!(matches!(err, Error::Metadata(_)), "{err}");
    }

    #[test]
    fn foreign_table_is_rejected() {
        let scratch = Scratch::<Genre>::new().r#where(Movie::NAME).equal("x");
        let err = scratch.render(ColumnStyle::Bare, &["genre"]).unwrap_err();
        assert!(err.is_invalid_operation(), "{err}");
    }

    #[test]
    fn like_prefix_plain() {
        assert_eq!(like_prefix("Star"), "Star%");
        assert_eq!(like_prefix(""), "%");
    }
}
