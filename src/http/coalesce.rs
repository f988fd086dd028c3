//! In-flight GET coalescing.
//!
//! Identical GETs issued within the reuse window share one wire call and
//! observe the same resolution. Non-GETs never enter the table.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use futures::{
	FutureExt,
	future::{BoxFuture, Shared},
};
use serde_json::json;
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, http::options::Envelope};

/// Reuse window for an in-flight GET.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(500);

pub(crate) type SharedOutcome = std::result::Result<Envelope, Arc<Error>>;
pub(crate) type SharedRequest = Shared<BoxFuture<'static, SharedOutcome>>;

struct Entry {
	created_at: Instant,
	request: SharedRequest,
}

/// Table of in-flight GETs keyed by a content hash of the request.
#[derive(Default)]
pub(crate) struct Coalescer {
	entries: Mutex<HashMap<String, Entry>>,
}
impl Coalescer {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Content hash over everything that shapes the wire request.
	pub(crate) fn digest(
		method: &str,
		url: &str,
		params: &serde_json::Map<String, serde_json::Value>,
		extra: &serde_json::Value,
	) -> String {
		let canonical = json!({
			"method": method,
			"url": url,
			"params": params,
			"extra": extra,
		});
		let mut hasher = Sha256::new();

		hasher.update(canonical.to_string().as_bytes());

		format!("{:x}", hasher.finalize())
	}

	/// Join an in-flight request fresher than the window, or install the
	/// one produced by `make`.
	pub(crate) fn join_or_insert(
		&self,
		key: String,
		make: impl FnOnce() -> BoxFuture<'static, SharedOutcome>,
	) -> SharedRequest {
		let mut entries = self.entries.lock().expect("coalescer lock poisoned");
		let now = Instant::now();

		entries.retain(|_, entry| now.duration_since(entry.created_at) <= COALESCE_WINDOW);

		if let Some(entry) = entries.get(&key) {
			tracing::debug!(%key, "joining in-flight request");

			return entry.request.clone();
		}

		let request = make().shared();

		entries.insert(key, Entry { created_at: now, request: request.clone() });

		request
	}
}
