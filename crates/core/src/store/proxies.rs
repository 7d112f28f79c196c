//! Proxy edge persistence

use super::{Mutation, Store, StoreError, is_constraint};
use crate::models::ProxyBits;

impl Store {
    /// Grant `peer` the given access on `principal`, or change an
    /// existing grant. The insert-then-update dance runs inside one
    /// transaction so two writers cannot interleave. `Constraint`
    /// means the peer principal does not exist.
    pub async fn proxy_upsert(
        &self,
        principal: i64,
        peer: i64,
        bits: ProxyBits,
    ) -> Result<Mutation, StoreError> {
        let mut tx = self.begin().await?;

        let res = sqlx::query("INSERT INTO proxy (principal,proxy,bits) VALUES (?,?,?)")
            .bind(principal)
            .bind(peer)
            .bind(bits as i64)
            .execute(&mut *tx)
            .await;
        match res {
            Ok(_) => {
                tx.commit().await?;
                self.log()
                    .info(format_args!("proxy created to {peer}: {}", bits as i64));
                return Ok(Mutation::Done(()));
            }
            Err(e) if is_constraint(&e) => {}
            Err(e) => return Err(e.into()),
        }

        // The edge (or a foreign-key problem) already exists; try the
        // update against the same pair.
        let res = sqlx::query("UPDATE proxy SET bits=? WHERE principal=? AND proxy=?")
            .bind(bits as i64)
            .bind(principal)
            .bind(peer)
            .execute(&mut *tx)
            .await;
        match res {
            Ok(done) if done.rows_affected() > 0 => {
                tx.commit().await?;
                self.log()
                    .info(format_args!("proxy updated to {peer}: {}", bits as i64));
                Ok(Mutation::Done(()))
            }
            Ok(_) => Ok(Mutation::Constraint),
            Err(e) if is_constraint(&e) => Ok(Mutation::Constraint),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a proxy edge if present.
    pub async fn proxy_remove(&self, principal: i64, peer: i64) -> Result<(), StoreError> {
        self.with_retry(async || {
            sqlx::query("DELETE FROM proxy WHERE principal=? AND proxy=?")
                .bind(principal)
                .bind(peer)
                .execute(self.pool())
                .await
                .map(|_| ())
        })
        .await?;
        self.log()
            .info(format_args!("deleted proxy (maybe) to {peer}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::open_store;

    async fn two_principals(store: &Store) -> (i64, i64) {
        let alice = store
            .principal_create("alice", "h", "alice@example.com", "cal")
            .await
            .expect("create")
            .done()
            .expect("id");
        let bob = store
            .principal_create("bob", "h", "bob@example.com", "cal")
            .await
            .expect("create")
            .done()
            .expect("id");
        (alice, bob)
    }

    #[tokio::test]
    async fn grant_appears_on_both_sides() {
        let (_dir, store) = open_store().await;
        let (alice, bob) = two_principals(&store).await;

        store
            .proxy_upsert(alice, bob, ProxyBits::Read)
            .await
            .expect("grant")
            .done()
            .expect("done");

        let alice_p = store
            .principal_load("alice")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(alice_p.delegates.len(), 1);
        assert_eq!(alice_p.delegates[0].peer, bob);
        assert_eq!(alice_p.delegates[0].name, "bob");
        assert_eq!(alice_p.delegates[0].bits, ProxyBits::Read);
        assert_eq!(alice_p.delegated_bits(bob), Some(ProxyBits::Read));

        let bob_p = store
            .principal_load("bob")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(bob_p.grantors.len(), 1);
        assert_eq!(bob_p.grantors[0].peer, alice);
        assert_eq!(bob_p.grantors[0].name, "alice");
    }

    #[tokio::test]
    async fn upsert_changes_bits() {
        let (_dir, store) = open_store().await;
        let (alice, bob) = two_principals(&store).await;

        store
            .proxy_upsert(alice, bob, ProxyBits::Read)
            .await
            .expect("grant");
        store
            .proxy_upsert(alice, bob, ProxyBits::Write)
            .await
            .expect("upgrade");

        let alice_p = store
            .principal_load("alice")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(alice_p.delegates.len(), 1);
        assert_eq!(alice_p.delegates[0].bits, ProxyBits::Write);
    }

    #[tokio::test]
    async fn remove_revokes_access() {
        let (_dir, store) = open_store().await;
        let (alice, bob) = two_principals(&store).await;

        store
            .proxy_upsert(alice, bob, ProxyBits::Write)
            .await
            .expect("grant");
        store.proxy_remove(alice, bob).await.expect("remove");

        let alice_p = store
            .principal_load("alice")
            .await
            .expect("load")
            .expect("present");
        assert!(alice_p.delegates.is_empty());
        assert_eq!(alice_p.delegated_bits(bob), None);
    }

    #[tokio::test]
    async fn unknown_peer_is_constraint() {
        let (_dir, store) = open_store().await;
        let (alice, _bob) = two_principals(&store).await;

        let res = store
            .proxy_upsert(alice, 9999, ProxyBits::Read)
            .await
            .expect("query");
        assert_eq!(res, Mutation::Constraint);
    }
}
