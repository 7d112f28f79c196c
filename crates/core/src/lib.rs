//! Domain model, storage engine, and shared validation for the
//! kalends CalDAV server.

pub mod conf;
pub mod digest;
pub mod log;
pub mod models;
pub mod store;
pub mod validation;

pub use models::{Collection, Principal, ProxyBits, ProxyGrant, Resource};
pub use store::{Mutation, NonceCheck, Store, StoreError};
