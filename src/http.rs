//! Structured HTTP client with middleware chains and in-flight GET coalescing.

pub mod client;
pub mod coalesce;
pub mod middleware;
pub mod options;

pub use client::{HttpClient, HttpConfig};
pub use middleware::{AfterReturning, BeforeRequest, Flow, RequestContext};
pub use options::{ApiRoot, CancelToken, Envelope, RequestOptions, ResponseType, Terminal};
