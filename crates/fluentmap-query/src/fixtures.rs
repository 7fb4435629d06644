//! Entities shared by the unit tests.

use chrono::NaiveDateTime;
use fluentmap_core::{ColumnMeta, Entity, Error, Result, RowFragment, Value};
use fluentmap_macros::Entity;

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "genre")]
pub struct Genre {
    #[entity(key)]
    pub id: i64,
    pub name: String,
    #[entity(row_version)]
    pub row_version: NaiveDateTime,
    #[entity(soft_delete)]
    pub deleted: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "movie")]
pub struct Movie {
    #[entity(key)]
    pub id: i64,
    pub name: String,
    pub genre_id: i64,
    #[entity(row_version)]
    pub row_version: NaiveDateTime,
    #[entity(soft_delete)]
    pub deleted: bool,
    #[entity(navigation)]
    pub genre: Option<Genre>,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "schedule")]
pub struct Schedule {
    #[entity(key)]
    pub id: i64,
    pub movie_id: i64,
    pub starts_at: NaiveDateTime,
    #[entity(row_version)]
    pub row_version: NaiveDateTime,
    #[entity(soft_delete)]
    pub deleted: bool,
    #[entity(reference = "movie")]
    pub movie: Option<Movie>,
}

/// Declares no table name.
#[derive(Debug, Default, Clone, PartialEq, Entity)]
pub struct Untabled {
    #[entity(key)]
    pub id: i64,
    pub label: String,
}

/// Written by hand: the derive only accepts integer keys.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Rating {
    pub code: String,
    pub label: String,
}

static RATING_COLUMNS: &[ColumnMeta] = &[
    ColumnMeta::key("code", "code"),
    ColumnMeta::data("label", "label"),
];

impl Entity for Rating {
    const TABLE_NAME: Option<&'static str> = Some("rating");

    fn columns() -> &'static [ColumnMeta] {
        RATING_COLUMNS
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("code", Value::from(self.code.clone())),
            ("label", Value::from(self.label.clone())),
        ]
    }

    fn apply_fragment(&mut self, fragment: &RowFragment<'_>) -> Result<()> {
        fragment.assign(&mut self.code, "code")?;
        fragment.assign(&mut self.label, "label")
    }

    fn key_value(&self) -> Value {
        Value::from(self.code.clone())
    }

    fn set_key_value(&mut self, _id: i64) -> Result<()> {
        Err(Error::metadata::<Self>("text keys are never generated"))
    }

    fn row_version_value(&self) -> Value {
        Value::Null
    }

    fn set_row_version_value(&mut self, _value: &Value) -> Result<()> {
        Ok(())
    }
}
