//! Principal persistence

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::{Mutation, Store, StoreError, is_constraint};
use crate::models::{Collection, Principal, ProxyBits, ProxyGrant};

fn grant_from_row(row: &SqliteRow) -> Result<ProxyGrant, StoreError> {
    let bits_raw: i64 = row.get(2);
    let bits = ProxyBits::from_i64(bits_raw)
        .ok_or_else(|| StoreError::Sys(format!("bad proxy bits: {bits_raw}")))?;
    Ok(ProxyGrant {
        email: row.get(0),
        name: row.get(1),
        bits,
        peer: row.get(3),
        id: row.get(4),
    })
}

impl Store {
    /// Create a principal together with its initial collection, as one
    /// transaction. `Constraint` means the name or email is taken.
    pub async fn principal_create(
        &self,
        name: &str,
        hash: &str,
        email: &str,
        directory: &str,
    ) -> Result<Mutation<i64>, StoreError> {
        let mut tx = self.begin().await?;

        let res = sqlx::query("INSERT INTO principal (name,hash,email) VALUES (?,?,?)")
            .bind(name)
            .bind(hash)
            .bind(email)
            .execute(&mut *tx)
            .await;
        let id = match res {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if is_constraint(&e) => return Ok(Mutation::Constraint),
            Err(e) => return Err(e.into()),
        };

        let res = sqlx::query("INSERT INTO collection (principal, url) VALUES (?,?)")
            .bind(id)
            .bind(directory)
            .execute(&mut *tx)
            .await;
        match res {
            Ok(_) => {}
            Err(e) if is_constraint(&e) => return Ok(Mutation::Constraint),
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        self.log()
            .info(format_args!("principal created: {email}, {name}"));
        Ok(Mutation::Done(id))
    }

    /// Load a principal by login name with its collections and both
    /// proxy directions.
    pub async fn principal_load(&self, name: &str) -> Result<Option<Principal>, StoreError> {
        let row = self
            .with_retry(async || {
                sqlx::query("SELECT hash,id,email FROM principal WHERE name=?")
                    .bind(name)
                    .fetch_optional(self.pool())
                    .await
            })
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get(1);
        let (quota_used, quota_available) = self.quota_figures()?;
        let mut principal = Principal {
            id,
            name: name.to_string(),
            hash: row.get(0),
            email: row.get(2),
            quota_used,
            quota_available,
            collections: Vec::new(),
            delegates: Vec::new(),
            grantors: Vec::new(),
        };

        let rows = self
            .with_retry(async || {
                sqlx::query(
                    "SELECT url,displayname,colour,description,ctag,id \
                     FROM collection WHERE principal=?",
                )
                .bind(id)
                .fetch_all(self.pool())
                .await
            })
            .await?;
        for row in &rows {
            principal.collections.push(Collection {
                url: row.get(0),
                displayname: row.get(1),
                colour: row.get(2),
                description: row.get(3),
                ctag: row.get(4),
                id: row.get(5),
                principal: id,
            });
        }

        // Grantors: edges where this principal is the delegate.
        let rows = self
            .with_retry(async || {
                sqlx::query(
                    "SELECT p.email,p.name,proxy.bits,proxy.principal,proxy.id FROM proxy \
                     INNER JOIN principal p ON p.id=proxy.principal WHERE proxy.proxy=?",
                )
                .bind(id)
                .fetch_all(self.pool())
                .await
            })
            .await?;
        for row in &rows {
            principal.grantors.push(grant_from_row(row)?);
        }

        // Delegates: edges where this principal is the grantor.
        let rows = self
            .with_retry(async || {
                sqlx::query(
                    "SELECT p.email,p.name,proxy.bits,proxy.proxy,proxy.id FROM proxy \
                     INNER JOIN principal p ON p.id=proxy.proxy WHERE proxy.principal=?",
                )
                .bind(id)
                .fetch_all(self.pool())
                .await
            })
            .await?;
        for row in &rows {
            principal.delegates.push(grant_from_row(row)?);
        }

        Ok(Some(principal))
    }

    /// Resolve an email address to a principal id.
    pub async fn principal_identify(&self, email: &str) -> Result<Option<i64>, StoreError> {
        let row = self
            .with_retry(async || {
                sqlx::query("SELECT id FROM principal WHERE email=?")
                    .bind(email)
                    .fetch_optional(self.pool())
                    .await
            })
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Update the credential hash and email. `Constraint` means the
    /// email is already taken.
    pub async fn principal_update(
        &self,
        id: i64,
        hash: &str,
        email: &str,
    ) -> Result<Mutation, StoreError> {
        let res = sqlx::query("UPDATE principal SET hash=?,email=? WHERE id=?")
            .bind(hash)
            .bind(email)
            .bind(id)
            .execute(self.pool())
            .await;
        match res {
            Ok(_) => {
                self.log().info(format_args!("principal updated"));
                Ok(Mutation::Done(()))
            }
            Err(e) if is_constraint(&e) => Ok(Mutation::Constraint),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::open_store;

    #[tokio::test]
    async fn create_load_roundtrip() {
        let (_dir, store) = open_store().await;
        let id = store
            .principal_create("alice", "abcd", "alice@example.com", "calendars")
            .await
            .expect("create")
            .done()
            .expect("created");

        let p = store
            .principal_load("alice")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(p.id, id);
        assert_eq!(p.hash, "abcd");
        assert_eq!(p.email, "alice@example.com");
        assert_eq!(p.collections.len(), 1);
        assert_eq!(p.collections[0].url, "calendars");
        assert!(p.quota_available > 0);

        assert!(store.principal_load("bob").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn duplicate_name_or_email_is_constraint() {
        let (_dir, store) = open_store().await;
        store
            .principal_create("alice", "x", "alice@example.com", "calendars")
            .await
            .expect("create");

        let dup = store
            .principal_create("alice", "x", "other@example.com", "calendars")
            .await
            .expect("query");
        assert_eq!(dup, Mutation::Constraint);

        let dup = store
            .principal_create("bob", "x", "alice@example.com", "calendars")
            .await
            .expect("query");
        assert_eq!(dup, Mutation::Constraint);
    }

    #[tokio::test]
    async fn update_and_identify() {
        let (_dir, store) = open_store().await;
        let id = store
            .principal_create("alice", "h1", "alice@example.com", "calendars")
            .await
            .expect("create")
            .done()
            .expect("id");

        store
            .principal_update(id, "h2", "new@example.com")
            .await
            .expect("update");
        let p = store
            .principal_load("alice")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(p.hash, "h2");
        assert_eq!(p.email, "new@example.com");

        assert_eq!(
            store
                .principal_identify("new@example.com")
                .await
                .expect("identify"),
            Some(id)
        );
        assert_eq!(
            store
                .principal_identify("alice@example.com")
                .await
                .expect("identify"),
            None
        );
    }
}
