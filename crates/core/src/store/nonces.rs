//! Digest nonce persistence
//!
//! Nonces are replay-protection state for HTTP Digest auth. The table
//! is capped so an attacker replaying random challenges cannot grow it
//! without bound; when full, the oldest 20 rows are evicted inside the
//! same transaction that inserts the replacement.

use sqlx::Row;

use super::{Mutation, Store, StoreError, is_constraint, random_nonce};

/// How many nonces may exist at once. Too few and a flood of bogus
/// challenges evicts live sessions; too many and lookups get
/// ponderous.
const NONCE_MAX: i64 = 1000;

/// How many rows one eviction clears.
const NONCE_EVICT: i64 = 20;

/// Result of checking a client nonce against stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    Ok,
    NotFound,
    /// The client presented a count below the stored one.
    Replay,
}

impl Store {
    /// Mint a new nonce, evicting the oldest rows when the table is
    /// full. The uniqueness constraint guarantees the value is unique;
    /// collisions just redraw.
    pub async fn nonce_new(&self) -> Result<String, StoreError> {
        let mut tx = self.begin().await?;

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM nonce")
            .fetch_one(&mut *tx)
            .await?;
        if count >= NONCE_MAX {
            self.log.debug(format_args!("culling from nonce database"));
            sqlx::query(
                "DELETE FROM nonce WHERE id IN (SELECT id FROM nonce ORDER BY id LIMIT ?)",
            )
            .bind(NONCE_EVICT)
            .execute(&mut *tx)
            .await?;
        }

        let nonce = loop {
            let nonce = random_nonce();
            let res = sqlx::query("INSERT INTO nonce (nonce) VALUES (?)")
                .bind(&nonce)
                .execute(&mut *tx)
                .await;
            match res {
                Ok(_) => break nonce,
                Err(e) if is_constraint(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        tx.commit().await?;
        self.log.debug(format_args!("nonce created: {nonce}"));
        Ok(nonce)
    }

    /// Check a client count against the stored one without touching
    /// state. Used before the read-write update so bogus nonces never
    /// take the writer lock.
    pub async fn nonce_validate(&self, nonce: &str, count: i64) -> Result<NonceCheck, StoreError> {
        let row = self
            .with_retry(async || {
                sqlx::query("SELECT count FROM nonce WHERE nonce=?")
                    .bind(nonce)
                    .fetch_optional(self.pool())
                    .await
            })
            .await?;
        let Some(row) = row else {
            return Ok(NonceCheck::NotFound);
        };
        let stored: i64 = row.get(0);
        if count < stored {
            self.log.errx(format_args!(
                "nonce replay attack: {nonce}, {count} < {stored}"
            ));
            return Ok(NonceCheck::Replay);
        }
        Ok(NonceCheck::Ok)
    }

    /// Validate and advance the stored count to one past the client's,
    /// as a single transaction.
    pub async fn nonce_update(&self, nonce: &str, count: i64) -> Result<NonceCheck, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT count FROM nonce WHERE nonce=?")
            .bind(nonce)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(NonceCheck::NotFound);
        };
        let stored: i64 = row.get(0);
        if count < stored {
            self.log.errx(format_args!(
                "nonce replay attack: {nonce}, {count} < {stored}"
            ));
            return Ok(NonceCheck::Replay);
        }

        sqlx::query("UPDATE nonce SET count=? WHERE nonce=?")
            .bind(count + 1)
            .bind(nonce)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.log.debug(format_args!(
            "nonce updated: {nonce}, count {}",
            count + 1
        ));
        Ok(NonceCheck::Ok)
    }

    /// Drop a nonce (logout).
    pub async fn nonce_delete(&self, nonce: &str) -> Result<Mutation, StoreError> {
        sqlx::query("DELETE FROM nonce WHERE nonce=?")
            .bind(nonce)
            .execute(self.pool())
            .await?;
        self.log.debug(format_args!("deleted nonce: {nonce}"));
        Ok(Mutation::Done(()))
    }
}
