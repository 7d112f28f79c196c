//! Collection persistence
//!
//! The collection's CTag is the version clients poll; every mutation
//! beneath a collection bumps it inside the same transaction as the
//! change itself.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{Mutation, Store, StoreError, is_constraint};
use crate::models::Collection;

fn collection_from_row(row: &SqliteRow, principal: i64) -> Collection {
    Collection {
        url: row.get(0),
        displayname: row.get(1),
        colour: row.get(2),
        description: row.get(3),
        ctag: row.get(4),
        id: row.get(5),
        principal,
    }
}

/// Advance the CTag. Runs on the caller's connection so it lands in
/// the caller's transaction.
pub(crate) async fn bump_ctag(conn: &mut SqliteConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE collection SET ctag=ctag+1 WHERE id=?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

const COLLECTION_COLS: &str = "url,displayname,colour,description,ctag,id";

impl Store {
    /// Create an empty collection. `Constraint` means the URL is taken
    /// under this principal.
    pub async fn collection_create(
        &self,
        principal: i64,
        url: &str,
    ) -> Result<Mutation<i64>, StoreError> {
        let res = sqlx::query("INSERT INTO collection (principal, url) VALUES (?,?)")
            .bind(principal)
            .bind(url)
            .execute(self.pool())
            .await;
        match res {
            Ok(done) => {
                self.log().info(format_args!("collection created: {url}"));
                Ok(Mutation::Done(done.last_insert_rowid()))
            }
            Err(e) if is_constraint(&e) => Ok(Mutation::Constraint),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn collection_load(
        &self,
        principal: i64,
        url: &str,
    ) -> Result<Option<Collection>, StoreError> {
        let sql = format!("SELECT {COLLECTION_COLS} FROM collection WHERE principal=? AND url=?");
        let row = self
            .with_retry(async || {
                sqlx::query(&sql)
                    .bind(principal)
                    .bind(url)
                    .fetch_optional(self.pool())
                    .await
            })
            .await?;
        Ok(row.map(|r| collection_from_row(&r, principal)))
    }

    pub async fn collection_load_by_id(
        &self,
        principal: i64,
        id: i64,
    ) -> Result<Option<Collection>, StoreError> {
        let sql = format!("SELECT {COLLECTION_COLS} FROM collection WHERE principal=? AND id=?");
        let row = self
            .with_retry(async || {
                sqlx::query(&sql)
                    .bind(principal)
                    .bind(id)
                    .fetch_optional(self.pool())
                    .await
            })
            .await?;
        Ok(row.map(|r| collection_from_row(&r, principal)))
    }

    /// Push displayname, colour, and description, bumping the CTag in
    /// the same transaction.
    pub async fn collection_update(&self, coln: &Collection) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        sqlx::query("UPDATE collection SET displayname=?,colour=?,description=? WHERE id=?")
            .bind(&coln.displayname)
            .bind(&coln.colour)
            .bind(&coln.description)
            .bind(coln.id)
            .execute(&mut *tx)
            .await?;
        bump_ctag(&mut tx, coln.id).await?;
        tx.commit().await?;
        self.log()
            .info(format_args!("collection updated: {}", coln.id));
        Ok(())
    }

    /// Advance a collection's CTag outside any other mutation.
    pub async fn collection_bump_ctag(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        bump_ctag(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a collection and, through the schema, everything in it.
    pub async fn collection_remove(&self, id: i64) -> Result<(), StoreError> {
        self.with_retry(async || {
            sqlx::query("DELETE FROM collection WHERE id=?")
                .bind(id)
                .execute(self.pool())
                .await
                .map(|_| ())
        })
        .await?;
        self.log()
            .info(format_args!("collection removed (maybe): {id}"));
        Ok(())
    }
}
