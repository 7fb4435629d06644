//! INSERT builder.
//!
//! Entities are grouped by column-set signature: an entity whose key is
//! still unassigned leaves the key column out so the database generates it.
//! Each group shares one `INSERT INTO ... VALUES (...)` template, executed
//! once per entity in input order.

use crate::statement::{BoxFuture, Executable, Statement, next_stamp, now_stamp};
use chrono::NaiveDateTime;
use fluentmap_core::{ColumnRole, Connection, Cx, Entity, Error, Outcome, Result, Value};
use std::collections::HashMap;

/// One template shared by all entities with the same column set.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertGroup {
    pub columns: Vec<&'static str>,
    pub sql: String,
}

/// One entity's parameters against its group template.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    pub group: usize,
    pub params: Vec<Value>,
    /// Key supplied by the caller, if it was assigned.
    pub assigned_key: Option<i64>,
}

/// Rendered inserts in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub groups: Vec<InsertGroup>,
    pub rows: Vec<InsertRow>,
    /// Row version stamped on every entity, if the entity declares one.
    pub stamp: Option<Value>,
}

impl InsertPlan {
    /// Statement for the `index`th entity.
    pub fn statement(&self, index: usize) -> Option<Statement> {
        let row = self.rows.get(index)?;
        let group = self.groups.get(row.group)?;
        Some(Statement::new(group.sql.clone(), row.params.clone()))
    }
}

/// Inserts one or more entities, writing generated keys and row versions
/// back into them.
#[derive(Debug)]
pub struct Insert<'a, E: Entity> {
    entities: &'a mut [E],
}

impl<'a, E: Entity> Insert<'a, E> {
    pub fn one(entity: &'a mut E) -> Self {
        Self {
            entities: std::slice::from_mut(entity),
        }
    }

    pub fn many(entities: &'a mut [E]) -> Self {
        Self { entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Render every insert, stamping row versions with `now`.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn build_at(&self, now: NaiveDateTime) -> Result<InsertPlan> {
        let table = E::table()?;
        let key = E::column_with_role(ColumnRole::Key)
            .map(|c| c.checked_name::<E>())
            .transpose()?;
        let row_version = E::column_with_role(ColumnRole::RowVersion)
            .map(|c| c.checked_name::<E>())
            .transpose()?;
        for column in E::columns() {
            column.checked_name::<E>()?;
        }

        let stamp = row_version.map(|_| Value::from(next_stamp(&Value::Null, now)));

        let mut groups: Vec<InsertGroup> = Vec::new();
        let mut by_signature: HashMap<Vec<&'static str>, usize> = HashMap::new();
        let mut rows = Vec::with_capacity(self.entities.len());

        for entity in self.entities.iter() {
            let mut columns = Vec::new();
            let mut params = Vec::new();
            let mut assigned_key = None;

            for (name, value) in entity.to_values() {
                if Some(name) == key {
                    if value.is_unassigned_key() {
                        continue;
                    }
                    let id = value.as_i64().ok_or_else(|| {
                        Error::metadata::<E>(format!(
                            "key column `{name}` holds a {} value; only integer keys can be inserted",
                            value.type_name()
                        ))
                    })?;
                    assigned_key = Some(id);
                }
                columns.push(name);
                if Some(name) == row_version {
                    params.push(stamp.clone().unwrap_or(Value::Null));
                } else {
                    params.push(value);
                }
            }

            let group = match by_signature.get(&columns) {
                Some(&index) => index,
                None => {
                    let placeholders = vec!["?"; columns.len()].join(", ");
                    let sql = format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        table,
                        columns.join(", "),
                        placeholders
                    );
                    groups.push(InsertGroup {
                        columns: columns.clone(),
                        sql,
                    });
                    by_signature.insert(columns, groups.len() - 1);
                    groups.len() - 1
                }
            };

            rows.push(InsertRow {
                group,
                params,
                assigned_key,
            });
        }

        Ok(InsertPlan {
            groups,
            rows,
            stamp,
        })
    }

    /// Render every insert with the current time.
    pub fn build(&self) -> Result<InsertPlan> {
        self.build_at(now_stamp())
    }

    /// Insert every entity and return their keys in input order.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn execute<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<i64>, Error> {
        if self.entities.is_empty() {
            return Outcome::Ok(Vec::new());
        }
        let plan = match self.build() {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };

        tracing::debug!(
            table = E::TABLE_NAME.unwrap_or_default(),
            rows = plan.rows.len(),
            templates = plan.groups.len(),
            "Executing insert"
        );

        let mut ids = Vec::with_capacity(plan.rows.len());
        for (entity, row) in self.entities.iter_mut().zip(&plan.rows) {
            let sql = &plan.groups[row.group].sql;
            let generated = match conn.insert(cx, sql, &row.params).await {
                Outcome::Ok(id) => id,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            let id = match row.assigned_key {
                Some(id) => id,
                None => {
                    if let Err(e) = entity.set_key_value(generated) {
                        return Outcome::Err(e);
                    }
                    generated
                }
            };
            if let Some(stamp) = &plan.stamp {
                if let Err(e) = entity.set_row_version_value(stamp) {
                    return Outcome::Err(e);
                }
            }
            tracing::trace!(id, "Inserted row");
            ids.push(id);
        }
        Outcome::Ok(ids)
    }
}

impl<'a, E: Entity, C: Connection> Executable<C> for Insert<'a, E> {
    fn run<'f>(self: Box<Self>, cx: &'f Cx, conn: &'f C) -> BoxFuture<'f, Outcome<u64, Error>>
    where
        Self: 'f,
    {
        let insert = *self;
        Box::pin(async move {
            match insert.execute(cx, conn).await {
                Outcome::Ok(ids) => Outcome::Ok(ids.len() as u64),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Genre, Rating, Untabled};
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(12, 0, 0, 250)
            .unwrap()
    }

    fn genre(id: i64, name: &str) -> Genre {
        Genre {
            id,
            name: name.to_string(),
            ..Genre::default()
        }
    }

    #[test]
    fn unassigned_key_is_left_to_the_database() {
        let mut drama = genre(0, "Drama");
        let plan = Insert::one(&mut drama).build_at(noon()).unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(
            plan.groups[0].sql,
            "INSERT INTO genre (name, row_version, deleted) VALUES (?, ?, ?)"
        );
        assert_eq!(
            plan.rows[0].params,
            vec![Value::from("Drama"), Value::from(noon()), Value::Bool(false)]
        );
        assert_eq!(plan.rows[0].assigned_key, None);
    }

    #[test]
    fn heterogeneous_batch_groups_by_signature() {
        let mut genres = vec![genre(0, "Drama"), genre(42, "Horror"), genre(0, "Comedy")];
        let plan = Insert::many(&mut genres).build_at(noon()).unwrap();

        assert_eq!(plan.groups.len(), 2);
        assert_eq!(
            plan.groups[1].sql,
            "INSERT INTO genre (id, name, row_version, deleted) VALUES (?, ?, ?, ?)"
        );
        let groups: Vec<usize> = plan.rows.iter().map(|r| r.group).collect();
        assert_eq!(groups, vec![0, 1, 0]);
        assert_eq!(plan.rows[1].assigned_key, Some(42));
        assert_eq!(
            plan.statement(2).unwrap().params[0],
            Value::from("Comedy")
        );
    }

    #[test]
    fn row_version_is_always_stamped() {
        let mut stale = Genre {
            row_version: NaiveDate::from_ymd_opt(2001, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            ..genre(0, "Drama")
        };
        let plan = Insert::one(&mut stale).build_at(noon()).unwrap();
        assert_eq!(plan.stamp, Some(Value::from(noon())));
        assert_eq!(plan.rows[0].params[1], Value::from(noon()));
    }

    #[test]
    fn empty_batch_renders_nothing() {
        let mut none: Vec<Genre> = Vec::new();
        let insert = Insert::many(&mut none);
        assert!(insert.is_empty());
        let plan = insert.build_at(noon()).unwrap();
        assert!(plan.groups.is_empty());
        assert!(plan.statement(0).is_none());
    }

    #[test]
    fn text_key_is_rejected_before_anything_runs() {
        let mut ratings = vec![
            Rating {
                code: String::new(),
                label: "Unrated".to_string(),
            },
            Rating {
                code: "PG".to_string(),
                label: "Parental guidance".to_string(),
            },
        ];
        let err = Insert::many(&mut ratings).build_at(noon()).unwrap_err();
        assert!(matches!(err, Error::Metadata(_)), "{err}");
        assert!(err.to_string().contains("only integer keys"), "{err}");
        assert_eq!(ratings[1].code, "PG");
    }

    #[test]
    fn missing_table_is_a_metadata_error() {
        let mut entity = Untabled::default();
        let err = Insert::one(&mut entity).build_at(noon()).unwrap_err();
        assert!(matches!(err, Error::Metadata(_)), "{err}");
    }
}
