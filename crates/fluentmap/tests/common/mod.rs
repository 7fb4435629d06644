#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use fluentmap::prelude::*;
use std::path::PathBuf;

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
    #[entity(column = "title")]
    pub name: String,
    pub genre_id: i64,
    pub rating: Option<String>,
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
    #[entity(skip)]
    pub note: String,
}

pub const SCHEMA: &str = "
    CREATE TABLE genre (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        row_version TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE movie (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        genre_id INTEGER NOT NULL,
        rating TEXT,
        row_version TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE schedule (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        movie_id INTEGER NOT NULL,
        starts_at TEXT NOT NULL,
        row_version TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    );
";

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

/// Drop the value, keep the failure.
pub fn unit<T>(outcome: Outcome<T, Error>) -> Outcome<(), Error> {
    match outcome {
        Outcome::Ok(_) => Outcome::Ok(()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Run a test body on a fresh current-thread runtime.
pub fn run<F: std::future::Future<Output = ()>>(body: F) {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(body);
}

pub fn memory_db() -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    conn.execute_raw(SCHEMA).expect("create schema");
    conn
}

/// A fresh database file unique to this process and test.
pub struct TempDb {
    pub path: PathBuf,
}

impl TempDb {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "fluentmap-{}-{}.db",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        let db = Self { path };
        db.connect()
            .execute_raw(SCHEMA)
            .expect("create schema");
        db
    }

    pub fn connect(&self) -> SqliteConnection {
        let path = self.path.to_str().expect("utf-8 temp path");
        SqliteConnection::open(&SqliteConfig::file(path)).expect("open sqlite file db")
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub fn genre(name: &str) -> Genre {
    Genre {
        name: name.to_string(),
        ..Genre::default()
    }
}

pub fn movie(name: &str, genre_id: i64) -> Movie {
    Movie {
        name: name.to_string(),
        genre_id,
        ..Movie::default()
    }
}
