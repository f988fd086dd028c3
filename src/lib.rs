//! Shared-transport MQTT fan-out client — per-component subscription
//! multiplexing, cross-realm interest counting, and coalesced HTTP interest
//! notifications.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod business;
pub mod cache;
pub mod http;
pub mod hub;
pub mod interest;
pub mod locator;
pub mod service;
pub mod transport;
pub mod worker;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
pub use crate::{
	business::{Bid, Business},
	error::{Error, Result},
	interest::InterestRegistry,
	locator::ServiceLocator,
	service::{DirectProfile, HubProfile, Service, ServiceConfig, ServiceEvent, ServiceState},
	worker::Worker,
};
