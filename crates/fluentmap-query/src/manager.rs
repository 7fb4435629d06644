//! Per-connection entry point bundling the builders.

use crate::delete::{Delete, SoftDelete};
use crate::insert::Insert;
use crate::select::Select;
use crate::transaction::FluentTransaction;
use crate::update::Update;
use fluentmap_core::{Connection, Cx, Entity, Error, Outcome, Value};

/// Builders and one-call CRUD helpers bound to one connection.
///
/// ```ignore
/// let em = EntityManager::new(&conn);
/// let id = em.insert(&cx, &mut genre).await;
/// let horror = em.select::<Movie>().select_all().r#where(Movie::NAME).equal("Alien");
/// ```
#[derive(Debug)]
pub struct EntityManager<'c, C: Connection> {
    conn: &'c C,
}

impl<C: Connection> Clone for EntityManager<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Connection> Copy for EntityManager<'_, C> {}

impl<'c, C: Connection> EntityManager<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'c C {
        self.conn
    }

    /// One-shot select with no columns chosen yet.
    pub fn select<E: Entity>(&self) -> Select<E> {
        Select::new()
    }

    /// One-shot select over every column of `E`.
    pub fn select_all<E: Entity>(&self) -> Select<E> {
        Select::new().select_all()
    }

    /// Reusable select.
    pub fn select_template<E: Entity>(&self) -> Select<E> {
        Select::template()
    }

    pub fn delete<E: Entity>(&self) -> Delete<E> {
        Delete::new()
    }

    pub fn soft_delete_by_id<E: Entity>(&self, id: impl Into<Value>) -> SoftDelete<E> {
        SoftDelete::by_id(id)
    }

    pub fn transaction(&self) -> FluentTransaction<'c, C> {
        FluentTransaction::new(self.conn)
    }

    /// Insert one entity and return its key.
    pub async fn insert<E: Entity>(&self, cx: &Cx, entity: &mut E) -> Outcome<i64, Error> {
        match Insert::one(entity).execute(cx, self.conn).await {
            Outcome::Ok(ids) => match ids.first() {
                Some(&id) => Outcome::Ok(id),
                None => Outcome::Err(Error::Custom("insert returned no key".to_string())),
            },
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub async fn insert_many<E: Entity>(
        &self,
        cx: &Cx,
        entities: &mut [E],
    ) -> Outcome<Vec<i64>, Error> {
        Insert::many(entities).execute(cx, self.conn).await
    }

    /// Optimistic update; 0 means the row changed since it was read.
    pub async fn update<E: Entity>(&self, cx: &Cx, entity: &mut E) -> Outcome<u64, Error> {
        Update::one(entity).execute(cx, self.conn).await
    }

    pub async fn update_many<E: Entity>(
        &self,
        cx: &Cx,
        entities: &mut [E],
    ) -> Outcome<u64, Error> {
        Update::many(entities).execute(cx, self.conn).await
    }

    pub async fn find_by_id<E: Entity>(
        &self,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> Outcome<Option<E>, Error> {
        Select::<E>::find_by_id(cx, self.conn, id).await
    }

    /// Count every row of `E`, soft-deleted ones included.
    pub async fn count<E: Entity>(&self, cx: &Cx) -> Outcome<u64, Error> {
        Select::<E>::new().count(cx, self.conn).await
    }

    pub async fn soft_delete<E: Entity>(
        &self,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> Outcome<u64, Error> {
        SoftDelete::<E>::by_id(id).execute(cx, self.conn).await
    }
}
