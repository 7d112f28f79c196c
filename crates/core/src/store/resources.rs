//! Resource persistence
//!
//! Resources hold the raw iCalendar text; loading re-parses it so
//! callers always see a valid component tree. Every mutation bumps the
//! parent collection's CTag inside the same transaction.

use kalends_ical::Calendar;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::collections::bump_ctag;
use super::{Mutation, Store, StoreError, is_constraint, random_etag};
use crate::models::Resource;

fn resource_from_row(row: &SqliteRow) -> Result<Resource, StoreError> {
    let data: String = row.get(0);
    let ical = Calendar::parse(data.as_bytes(), None)?;
    Ok(Resource {
        data,
        etag: row.get(1),
        url: row.get(2),
        id: row.get(3),
        collection: row.get(4),
        ical,
    })
}

const RESOURCE_COLS: &str = "data,etag,url,id,collection";

impl Store {
    /// Store a new resource under a fresh random ETag. `Constraint`
    /// means a resource by that URL already exists.
    pub async fn resource_create(
        &self,
        collection: i64,
        url: &str,
        data: &str,
    ) -> Result<Mutation<String>, StoreError> {
        let etag = random_etag();
        let mut tx = self.begin().await?;

        let res = sqlx::query("INSERT INTO resource (data,url,collection,etag) VALUES (?,?,?,?)")
            .bind(data)
            .bind(url)
            .bind(collection)
            .bind(&etag)
            .execute(&mut *tx)
            .await;
        match res {
            Ok(_) => {}
            Err(e) if is_constraint(&e) => return Ok(Mutation::Constraint),
            Err(e) => return Err(e.into()),
        }

        bump_ctag(&mut tx, collection).await?;
        tx.commit().await?;
        self.log().info(format_args!("resource created: {url}"));
        Ok(Mutation::Done(etag))
    }

    pub async fn resource_load(
        &self,
        collection: i64,
        url: &str,
    ) -> Result<Option<Resource>, StoreError> {
        let sql = format!("SELECT {RESOURCE_COLS} FROM resource WHERE collection=? AND url=?");
        let row = self
            .with_retry(async || {
                sqlx::query(&sql)
                    .bind(collection)
                    .bind(url)
                    .fetch_optional(self.pool())
                    .await
            })
            .await?;
        row.map(|r| resource_from_row(&r)).transpose()
    }

    /// All resources in a collection, parsed.
    pub async fn collection_resources(&self, collection: i64) -> Result<Vec<Resource>, StoreError> {
        let sql = format!("SELECT {RESOURCE_COLS} FROM resource WHERE collection=?");
        let rows = self
            .with_retry(async || {
                sqlx::query(&sql)
                    .bind(collection)
                    .fetch_all(self.pool())
                    .await
            })
            .await?;
        rows.iter().map(resource_from_row).collect()
    }

    /// Replace a resource's content if its current ETag matches.
    /// `Constraint` covers both a missing resource and a stale ETag.
    pub async fn resource_update(
        &self,
        collection: i64,
        url: &str,
        data: &str,
        expect_etag: &str,
    ) -> Result<Mutation<String>, StoreError> {
        let etag = random_etag();
        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT id,etag FROM resource WHERE collection=? AND url=?")
            .bind(collection)
            .bind(url)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(Mutation::Constraint);
        };
        let current: String = row.get(1);
        if current != expect_etag {
            return Ok(Mutation::Constraint);
        }
        let id: i64 = row.get(0);

        sqlx::query("UPDATE resource SET data=?,etag=? WHERE id=?")
            .bind(data)
            .bind(&etag)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        bump_ctag(&mut tx, collection).await?;
        tx.commit().await?;
        self.log().info(format_args!("resource updated: {url}"));
        Ok(Mutation::Done(etag))
    }

    /// Delete a resource only when its ETag matches. `Constraint`
    /// means the stored ETag differs.
    pub async fn resource_delete(
        &self,
        collection: i64,
        url: &str,
        expect_etag: &str,
    ) -> Result<Mutation, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT id FROM resource WHERE collection=? AND url=? AND etag=?")
            .bind(collection)
            .bind(url)
            .bind(expect_etag)
            .fetch_optional(&mut *tx)
            .await?;
        if row.is_none() {
            return Ok(Mutation::Constraint);
        }

        sqlx::query("DELETE FROM resource WHERE collection=? AND url=? AND etag=?")
            .bind(collection)
            .bind(url)
            .bind(expect_etag)
            .execute(&mut *tx)
            .await?;
        bump_ctag(&mut tx, collection).await?;
        tx.commit().await?;
        self.log().info(format_args!("resource removed: {url}"));
        Ok(Mutation::Done(()))
    }

    /// Delete a resource without checking its ETag.
    pub async fn resource_remove(&self, collection: i64, url: &str) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        sqlx::query("DELETE FROM resource WHERE collection=? AND url=?")
            .bind(collection)
            .bind(url)
            .execute(&mut *tx)
            .await?;
        bump_ctag(&mut tx, collection).await?;
        tx.commit().await?;
        self.log()
            .info(format_args!("resource removed (unsafe): {url}"));
        Ok(())
    }
}
