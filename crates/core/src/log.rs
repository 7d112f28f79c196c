//! Storage-engine log sinks
//!
//! The store reports what it changed through four levels. The default
//! sink is silent so library consumers (tests, the admin tool) get no
//! output unless they ask; the server installs [`TracingLog`].

use std::fmt;

pub trait StoreLog: Send + Sync {
    /// Minor database traffic (nonce updates and the like).
    fn debug(&self, _msg: fmt::Arguments<'_>) {}
    /// An operation that changed the database.
    fn info(&self, _msg: fmt::Arguments<'_>) {}
    /// An error with an underlying cause worth reporting.
    fn err(&self, _msg: fmt::Arguments<'_>) {}
    /// An error in the store's own logic or data.
    fn errx(&self, _msg: fmt::Arguments<'_>) {}
}

/// The default, silent sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl StoreLog for Silent {}

/// Forwards store messages into the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl StoreLog for TracingLog {
    fn debug(&self, msg: fmt::Arguments<'_>) {
        tracing::debug!(target: "kalends_core::store", "{msg}");
    }

    fn info(&self, msg: fmt::Arguments<'_>) {
        tracing::info!(target: "kalends_core::store", "{msg}");
    }

    fn err(&self, msg: fmt::Arguments<'_>) {
        tracing::error!(target: "kalends_core::store", "{msg}");
    }

    fn errx(&self, msg: fmt::Arguments<'_>) {
        tracing::error!(target: "kalends_core::store", "{msg}");
    }
}
