//! Domain model
//!
//! Rows come out of the store as owned values; a loaded [`Principal`]
//! carries its collections and both proxy directions so request
//! handling never goes back to the database for authorization data.

use kalends_ical::Calendar;

/// Access level a proxy edge grants. The stored bit is exactly one of
/// the two; WRITE implies READ when routing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyBits {
    Read = 1,
    Write = 2,
}

impl ProxyBits {
    pub fn from_i64(v: i64) -> Option<ProxyBits> {
        match v {
            1 => Some(ProxyBits::Read),
            2 => Some(ProxyBits::Write),
            _ => None,
        }
    }
}

/// One direction of a proxy relationship, joined with the peer
/// principal's name and email for serialization.
#[derive(Debug, Clone)]
pub struct ProxyGrant {
    pub id: i64,
    /// The principal on the other end of the edge.
    pub peer: i64,
    pub name: String,
    pub email: String,
    pub bits: ProxyBits,
}

/// A calendar collection owned by one principal.
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: i64,
    pub principal: i64,
    pub url: String,
    pub displayname: String,
    pub colour: String,
    pub description: String,
    /// Strictly increases on every successful mutation beneath the
    /// collection and on metadata change.
    pub ctag: i64,
}

/// An authenticated user.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub name: String,
    /// MD5 over `name:realm:password`; cleartext is never stored.
    pub hash: String,
    pub email: String,
    pub quota_used: u64,
    pub quota_available: u64,
    pub collections: Vec<Collection>,
    /// Forward proxies: principals allowed to act as this one.
    pub delegates: Vec<ProxyGrant>,
    /// Reverse proxies: principals this one may act as.
    pub grantors: Vec<ProxyGrant>,
}

impl Principal {
    pub fn collection_by_url(&self, url: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.url == url)
    }

    /// The access a given peer has been delegated on this principal.
    pub fn delegated_bits(&self, peer: i64) -> Option<ProxyBits> {
        self.delegates
            .iter()
            .find(|p| p.peer == peer)
            .map(|p| p.bits)
    }
}

/// A stored iCalendar object together with its parsed form.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: i64,
    pub collection: i64,
    pub url: String,
    /// Opaque version tag, re-randomized on every mutation.
    pub etag: String,
    pub data: String,
    pub ical: Calendar,
}
