//! iCalendar (RFC 5545) support for the kalends CalDAV server.
//!
//! The crate deliberately keeps two views of a parsed document: the
//! typed component tree the server validates and queries, and the
//! ordered raw content lines the folding printer round-trips back to
//! clients.

mod error;
mod lines;
mod parser;
mod print;
mod types;

pub use error::ParseError;
pub use parser::{Calendar, Component, Node};
pub use types::{
    CompKind, Duration, Frequency, RecurRule, Time, TimeKind, TzObservance, TzRuleKind, UtcOffset,
    Weekday, WeekdayNum,
};
