//! Optimistic UPDATE builder.
//!
//! Every non-key column is written and the row version is re-stamped. The
//! WHERE clause matches the key and the row version the caller last read, so
//! a concurrent writer turns this update into a zero-row no-op.

use crate::statement::{BoxFuture, Executable, Statement, next_stamp, now_stamp};
use chrono::NaiveDateTime;
use fluentmap_core::{ColumnRole, Connection, Cx, Entity, Error, Outcome, Result, Value};

/// One rendered update and the stamp it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    pub statement: Statement,
    pub stamp: Value,
}

/// Updates one or more entities by key and row version.
#[derive(Debug)]
pub struct Update<'a, E: Entity> {
    entities: &'a mut [E],
}

impl<'a, E: Entity> Update<'a, E> {
    pub fn one(entity: &'a mut E) -> Self {
        Self {
            entities: std::slice::from_mut(entity),
        }
    }

    pub fn many(entities: &'a mut [E]) -> Self {
        Self { entities }
    }

    /// Render every update, stamping row versions relative to `now`.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn build_at(&self, now: NaiveDateTime) -> Result<Vec<UpdateRow>> {
        let table = E::table()?;
        let key = E::key_column()?.checked_name::<E>()?;
        let row_version = E::row_version_column()?.checked_name::<E>()?;

        let mut assignments = Vec::new();
        for column in E::columns() {
            if column.role != ColumnRole::Key {
                assignments.push(format!("{} = ?", column.checked_name::<E>()?));
            }
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ? AND {} = ?",
            table,
            assignments.join(", "),
            key,
            row_version
        );

        let mut rows = Vec::with_capacity(self.entities.len());
        for entity in self.entities.iter() {
            let key_value = entity.key_value();
            if key_value.is_unassigned_key() {
                return Err(Error::InvalidOperation(format!(
                    "cannot update a {} row that was never inserted (key is unassigned)",
                    table
                )));
            }
            let previous = entity.row_version_value();
            let stamp = Value::from(next_stamp(&previous, now));

            let mut params = Vec::with_capacity(assignments.len() + 2);
            for (name, value) in entity.to_values() {
                if name == key {
                    continue;
                }
                if name == row_version {
                    params.push(stamp.clone());
                } else {
                    params.push(value);
                }
            }
            params.push(key_value);
            params.push(previous);

            rows.push(UpdateRow {
                statement: Statement::new(sql.clone(), params),
                stamp,
            });
        }
        Ok(rows)
    }

    pub fn build(&self) -> Result<Vec<UpdateRow>> {
        self.build_at(now_stamp())
    }

    /// Run every update and return the summed affected count.
    ///
    /// An entity whose update matched exactly one row takes the new row
    /// version; a stale entity keeps the version it had.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn execute<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        if self.entities.is_empty() {
            return Outcome::Ok(0);
        }
        let rows = match self.build() {
            Ok(rows) => rows,
            Err(e) => return Outcome::Err(e),
        };

        let mut total = 0;
        for (entity, row) in self.entities.iter_mut().zip(&rows) {
            tracing::debug!(sql = %row.statement.sql, "Executing update");
            let affected = match row.statement.execute(cx, conn).await {
                Outcome::Ok(n) => n,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if affected == 1 {
                if let Err(e) = entity.set_row_version_value(&row.stamp) {
                    return Outcome::Err(e);
                }
            } else {
                tracing::debug!(
                    table = E::TABLE_NAME.unwrap_or_default(),
                    affected,
                    "Update matched no current row version"
                );
            }
            total += affected;
        }
        Outcome::Ok(total)
    }
}

impl<'a, E: Entity, C: Connection> Executable<C> for Update<'a, E> {
    fn run<'f>(self: Box<Self>, cx: &'f Cx, conn: &'f C) -> BoxFuture<'f, Outcome<u64, Error>>
    where
        Self: 'f,
    {
        let update = *self;
        Box::pin(update.execute(cx, conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Genre, Untabled};
    use chrono::{NaiveDate, TimeDelta};

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, minute, 0)
            .unwrap()
    }

    #[test]
    fn renders_optimistic_update() {
        let mut genre = Genre {
            id: 3,
            name: "Noir".to_string(),
            row_version: at(0),
            deleted: false,
        };
        let rows = Update::one(&mut genre).build_at(at(5)).unwrap();
        assert_eq!(rows.len(), 1);
        let stmt = &rows[0].statement;
        assert_eq!(
            stmt.sql,
            "UPDATE genre SET name = ?, row_version = ?, deleted = ? WHERE id = ? AND row_version = ?"
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::from("Noir"),
                Value::from(at(5)),
                Value::Bool(false),
                Value::BigInt(3),
                Value::from(at(0)),
            ]
        );
        assert_eq!(rows[0].stamp, Value::from(at(5)));
    }

    #[test]
    fn stamp_advances_past_a_future_version() {
        let mut genre = Genre {
            id: 3,
            row_version: at(10),
            ..Genre::default()
        };
        let rows = Update::one(&mut genre).build_at(at(5)).unwrap();
        assert_eq!(
            rows[0].stamp,
            Value::from(at(10) + TimeDelta::microseconds(1))
        );
    }

    #[test]
    fn batch_renders_one_statement_per_entity() {
        let mut genres = vec![
            Genre {
                id: 1,
                ..Genre::default()
            },
            Genre {
                id: 2,
                ..Genre::default()
            },
        ];
        let rows = Update::many(&mut genres).build_at(at(1)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].statement.params[3], Value::BigInt(2));
    }

    #[test]
    fn unassigned_key_is_rejected() {
        let mut genre = Genre::default();
        let err = Update::one(&mut genre).build_at(at(1)).unwrap_err();
        assert!(err.is_invalid_operation(), "{err}");
    }

    #[test]
    fn entity_without_row_version_is_a_metadata_error() {
        let mut entity = Untabled {
            id: 1,
            label: "x".to_string(),
        };
        let err = Update::one(&mut entity).build_at(at(1)).unwrap_err();
        assert!(matches!(err, Error::Metadata(_)), "{err}");
    }
}
