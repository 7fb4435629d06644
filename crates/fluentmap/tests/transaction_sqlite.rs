mod common;

use common::{
    Genre, Movie, TempDb, expect_err, genre, memory_db, movie, run, unit, unwrap_outcome,
};
use fluentmap::prelude::*;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::task::{Context, Poll, Waker};

fn null_name_insert() -> Statement {
    Statement::new(
        "INSERT INTO genre (name, row_version, deleted) VALUES (NULL, '', 0)",
        vec![],
    )
}

async fn genre_count(cx: &Cx, conn: &SqliteConnection) -> u64 {
    unwrap_outcome(Select::<Genre>::new().count(cx, conn).await)
}

async fn genre_names(cx: &Cx, conn: &SqliteConnection) -> Vec<String> {
    let rows = unwrap_outcome(
        Select::<Genre>::new()
            .column(Genre::NAME)
            .order_by_ascending(Genre::NAME)
            .query(cx, conn)
            .await,
    );
    rows.into_iter().map(|g| g.name).collect()
}

fn poll_once<F: Future>(future: std::pin::Pin<&mut F>) -> Poll<F::Output> {
    future.poll(&mut Context::from_waker(Waker::noop()))
}

#[test]
fn registered_writes_commit_together() {
    let cx = Cx::for_testing();
    run(async {
        let conn = memory_db();
        let mut seeded = genre("Drama");
        unwrap_outcome(Insert::one(&mut seeded).execute(&cx, &conn).await);

        let mut horror = genre("Horror");
        let mut comedy = genre("Comedy");
        seeded.name = "Melodrama".to_string();

        let mut tx = FluentTransaction::new(&conn)
            .perform(Insert::one(&mut horror))
            .perform(Insert::one(&mut comedy))
            .perform(Update::one(&mut seeded));
        assert_eq!(tx.pending(), 3);
        let affected = unwrap_outcome(tx.commit(&cx).await);
        assert_eq!(affected, 3);
        assert_eq!(tx.pending(), 0);
        assert_eq!(conn.transaction_depth(), 0);
        // Written-back keys are readable once the coordinator lets go of the entities.
        drop(tx);

        assert!(horror.id > 0 && comedy.id > 0);
        assert_eq!(genre_count(&cx, &conn).await, 3);
        let stored = unwrap_outcome(Select::<Genre>::find_by_id(&cx, &conn, seeded.id).await)
            .expect("row exists");
        assert_eq!(stored.name, "Melodrama");
    });
}

#[test]
fn failing_write_rolls_back_the_unit() {
    let cx = Cx::for_testing();
    run(async {
        let conn = memory_db();
        let mut horror = genre("Horror");
        let mut comedy = genre("Comedy");

        let mut tx = FluentTransaction::new(&conn)
            .perform(Insert::one(&mut horror))
            .perform(Insert::one(&mut comedy))
            .perform(null_name_insert());
        let err = expect_err(tx.commit(&cx).await);
        assert!(err.is_constraint_violation(), "{err}");

        assert_eq!(conn.transaction_depth(), 0);
        assert_eq!(genre_count(&cx, &conn).await, 0);
    });
}

#[test]
fn block_commits_its_writes() {
    let cx = Cx::for_testing();
    run(async {
        let conn = memory_db();
        let (cx_ref, conn_ref) = (&cx, &conn);

        let mut tx = FluentTransaction::new(&conn).perform_block(move || async move {
            let mut horror = genre("Horror");
            let genre_id = match Insert::one(&mut horror).execute(cx_ref, conn_ref).await {
                Outcome::Ok(ids) => ids[0],
                other => return unit(other),
            };
            let mut feature = movie("Halloween", genre_id);
            unit(Insert::one(&mut feature).execute(cx_ref, conn_ref).await)
        });
        assert_eq!(unwrap_outcome(tx.commit(&cx).await), 0);

        let movies = unwrap_outcome(
            Select::<Movie>::new()
                .select_all()
                .inner_join(Movie::GENRE_ID, Genre::ID)
                .query(&cx, &conn)
                .await,
        );
        assert_eq!(movies.len(), 1);
        assert_eq!(
            movies[0].genre.as_ref().map(|g| g.name.as_str()),
            Some("Horror")
        );
    });
}

#[test]
fn nested_commit_is_undone_by_outer_failure() {
    let cx = Cx::for_testing();
    run(async {
        let conn = memory_db();
        let (cx_ref, conn_ref) = (&cx, &conn);

        let mut outer = FluentTransaction::new(&conn).perform_block(move || async move {
            let mut inner_genre = genre("Inner");
            let mut inner = FluentTransaction::new(conn_ref).perform(Insert::one(&mut inner_genre));
            match inner.commit(cx_ref).await {
                Outcome::Ok(_) => {}
                other => return unit(other),
            }
            // The inner insert is visible inside the still-open outer scope.
            match Select::<Genre>::new().count(cx_ref, conn_ref).await {
                Outcome::Ok(1) => {}
                Outcome::Ok(n) => {
                    return Outcome::Err(Error::InvalidOperation(format!("saw {n} rows")));
                }
                other => return unit(other),
            }
            Outcome::Err(Error::InvalidOperation("abort after nested commit".to_string()))
        });

        let err = expect_err(outer.commit(&cx).await);
        assert!(err.to_string().contains("abort after nested commit"), "{err}");
        assert_eq!(conn.transaction_depth(), 0);
        assert_eq!(genre_count(&cx, &conn).await, 0);
    });
}

#[test]
fn nested_failure_poisons_the_outer_scope() {
    let cx = Cx::for_testing();
    run(async {
        let conn = memory_db();
        let (cx_ref, conn_ref) = (&cx, &conn);

        let mut outer = FluentTransaction::new(&conn).perform_block(move || async move {
            let mut kept = genre("Kept?");
            if let Outcome::Err(e) = Insert::one(&mut kept).execute(cx_ref, conn_ref).await {
                return Outcome::Err(e);
            }
            let mut inner = FluentTransaction::new(conn_ref).perform(null_name_insert());
            // The inner failure is swallowed; the outer scope is still doomed.
            let _ = inner.commit(cx_ref).await;
            Outcome::Ok(())
        });

        let err = expect_err(outer.commit(&cx).await);
        assert!(!err.is_constraint_violation(), "{err}");
        assert_eq!(conn.transaction_depth(), 0);
        assert_eq!(genre_count(&cx, &conn).await, 0);
    });
}

#[test]
fn mixing_statements_and_block_is_rejected() {
    let cx = Cx::for_testing();
    run(async {
        let conn = memory_db();
        let mut horror = genre("Horror");

        let mut tx = FluentTransaction::new(&conn)
            .perform(Insert::one(&mut horror))
            .perform_block(|| async { Outcome::Ok(()) });
        let err = expect_err(tx.commit(&cx).await);
        assert!(err.is_invalid_operation(), "{err}");
        assert_eq!(genre_count(&cx, &conn).await, 0);
    });
}

#[test]
fn committed_work_is_visible_to_other_connections() {
    let db = TempDb::new("tx-visibility");
    let cx = Cx::for_testing();
    run(async {
        let writer = db.connect();
        let reader = db.connect();

        let mut horror = genre("Horror");
        let mut tx = FluentTransaction::new(&writer).perform(Insert::one(&mut horror));
        unwrap_outcome(tx.commit(&cx).await);
        drop(tx);

        let seen = unwrap_outcome(Select::<Genre>::find_by_id(&cx, &reader, horror.id).await);
        assert_eq!(seen.map(|g| g.name), Some("Horror".to_string()));
    });
}

#[test]
fn entity_manager_transaction_mixes_write_kinds() {
    let cx = Cx::for_testing();
    run(async {
        let conn = memory_db();
        let em = EntityManager::new(&conn);

        let mut genres = vec![genre("Horror"), genre("Comedy"), genre("Drama")];
        let ids = unwrap_outcome(em.insert_many(&cx, &mut genres).await);

        let mut tx = em
            .transaction()
            .perform(em.soft_delete_by_id::<Genre>(ids[0]))
            .perform(em.delete::<Genre>().r#where(Genre::ID).equal(ids[1]))
            .perform(Statement::new(
                "UPDATE genre SET name = ? WHERE id = ?",
                vec![Value::from("Tragedy"), Value::from(ids[2])],
            ));
        assert_eq!(unwrap_outcome(tx.commit(&cx).await), 3);

        let left = unwrap_outcome(
            em.select_all::<Genre>()
                .order_by_ascending(Genre::ID)
                .query(&cx, &conn)
                .await,
        );
        assert_eq!(left.len(), 2);
        assert!(left[0].deleted);
        assert_eq!(left[1].name, "Tragedy");
    });
}

#[test]
fn panicking_block_leaves_no_open_transaction() {
    let db = TempDb::new("tx-panic");
    let cx = Cx::for_testing();
    let writer = db.connect();
    let reader = db.connect();
    let (cx_ref, writer_ref) = (&cx, &writer);

    let mut tx = FluentTransaction::new(&writer).perform_block(move || async move {
        let mut doomed = genre("Doomed");
        if let Outcome::Err(e) = Insert::one(&mut doomed).execute(cx_ref, writer_ref).await {
            return Outcome::Err(e);
        }
        panic!("block gave up halfway")
    });
    let unwound = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut commit = pin!(tx.commit(&cx));
        let _ = poll_once(commit.as_mut());
    }));
    assert!(unwound.is_err());
    drop(tx);
    assert_eq!(writer.transaction_depth(), 0);

    run(async {
        // A later write autocommits instead of landing in a leftover transaction.
        let mut later = genre("Later");
        unwrap_outcome(Insert::one(&mut later).execute(&cx, &writer).await);
        assert_eq!(genre_names(&cx, &reader).await, vec!["Later"]);
    });
}

#[test]
fn dropped_commit_rolls_back_the_scope() {
    let db = TempDb::new("tx-dropped");
    let cx = Cx::for_testing();
    let writer = db.connect();
    let reader = db.connect();
    let (cx_ref, writer_ref) = (&cx, &writer);

    let mut tx = FluentTransaction::new(&writer).perform_block(move || async move {
        let mut abandoned = genre("Abandoned");
        if let Outcome::Err(e) = Insert::one(&mut abandoned).execute(cx_ref, writer_ref).await {
            return Outcome::Err(e);
        }
        std::future::pending::<()>().await;
        Outcome::Ok(())
    });
    {
        let mut commit = pin!(tx.commit(&cx));
        assert!(poll_once(commit.as_mut()).is_pending());
        assert_eq!(writer.transaction_depth(), 1);
    }
    drop(tx);
    assert_eq!(writer.transaction_depth(), 0);

    run(async {
        assert_eq!(genre_count(&cx, &writer).await, 0);
        let mut later = genre("Later");
        unwrap_outcome(Insert::one(&mut later).execute(&cx, &writer).await);
        assert_eq!(genre_names(&cx, &reader).await, vec!["Later"]);
    });
}
