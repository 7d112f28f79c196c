//! Request middleware: the method/auth gate and response headers

pub mod digest;
pub mod headers;
