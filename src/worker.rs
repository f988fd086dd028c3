//! Per-component subscription multiplexer.
//!
//! One worker per UI component: it records follows, filters shared-transport
//! messages for them, and drives the HTTP interest notifications through the
//! cross-realm reference counter.

// std
use std::{
	collections::{HashMap, HashSet},
	sync::{Mutex, Weak},
};
// crates.io
use serde_json::{Map, Value, json};
// self
use crate::{
	_prelude::*,
	business::Business,
	http::{HttpClient, RequestOptions},
	interest::InterestRegistry,
	transport::{
		TOPIC_ROOT, Transport, topic_for,
		event::{ListenerId, TransportEvent, TransportEventKind},
	},
};

/// Interest subscription endpoint.
pub const NOTIFY_SUB: &str = "/v2/client/notify/sub";
/// Interest unsubscription endpoint.
pub const NOTIFY_UNSUB: &str = "/v2/client/notify/unsub";

type Digest = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Default)]
struct Follows {
	follows: HashMap<String, Business>,
	latest: HashMap<String, Value>,
	digests: HashMap<String, Digest>,
	api_aware: HashSet<String>,
}

/// Per-component subscription manager bound to a shared transport.
pub struct Worker {
	transport: Arc<dyn Transport>,
	http: Arc<HttpClient>,
	registry: Arc<InterestRegistry>,
	state: Arc<Mutex<Follows>>,
	listener: Mutex<Option<ListenerId>>,
}
impl Worker {
	/// Create a worker and install its message listener on the transport.
	pub fn new(
		transport: Arc<dyn Transport>,
		http: Arc<HttpClient>,
		registry: Arc<InterestRegistry>,
	) -> Arc<Self> {
		let state = Arc::new(Mutex::new(Follows::default()));
		let worker = Arc::new(Self {
			transport: transport.clone(),
			http,
			registry,
			state: state.clone(),
			listener: Mutex::new(None),
		});
		let weak = Arc::downgrade(&state);
		let client_id = transport.client_id();
		let id = transport.add_listener(
			TransportEventKind::Message,
			Arc::new(move |event| route_message(&weak, &client_id, event)),
		);

		*worker.listener.lock().expect("worker lock poisoned") = Some(id);

		worker
	}

	/// Start following a business.
	///
	/// The first watcher across all realms triggers exactly one interest
	/// notification; later watchers only bump the reference count.
	#[tracing::instrument(skip(self, business), fields(identity = %business.identity()))]
	pub async fn watch(&self, business: &Business) -> Result<()> {
		let identity = business.identity();
		let (watching, aware) = {
			let state = self.state.lock().expect("worker lock poisoned");

			(state.follows.contains_key(&identity), state.api_aware.contains(&identity))
		};

		if watching && (business.bid.is_none() || aware) {
			return Ok(());
		}

		if let Some(bid) = &business.bid {
			let reference = self.registry.collect(business).await;

			if reference == 1 && !aware && !self.transport.is_guest() {
				self.notify(NOTIFY_SUB, bid, &business.subject).await?;
				self.state
					.lock()
					.expect("worker lock poisoned")
					.api_aware
					.insert(identity.clone());
			}
		}

		let digest = make_digest(Arc::downgrade(&self.state), identity.clone());
		let mut state = self.state.lock().expect("worker lock poisoned");

		state.follows.insert(identity.clone(), business.clone());
		state.digests.insert(identity, digest);

		Ok(())
	}

	/// Stop following a business.
	///
	/// The last watcher across all realms triggers exactly one interest
	/// unsubscription.
	#[tracing::instrument(skip(self, business), fields(identity = %business.identity()))]
	pub async fn unwatch(&self, business: &Business) -> Result<()> {
		self.unwatch_inner(business, true).await
	}

	/// Gracefully release every follow, notifying the API where counts
	/// reach zero, then detach from the transport. Idempotent.
	pub async fn quit(&self) -> Result<()> {
		self.teardown(true).await
	}

	/// Release every follow without HTTP notifications (used when the
	/// session token is already invalid), then detach. Idempotent.
	pub async fn force_quit(&self) -> Result<()> {
		self.teardown(false).await
	}

	/// Latest payload received for a follow, if any.
	pub fn latest_payload(&self, business: &Business) -> Option<Value> {
		self.state.lock().expect("worker lock poisoned").latest.get(&business.identity()).cloned()
	}

	/// Whether the worker currently follows the business.
	pub fn is_watching(&self, business: &Business) -> bool {
		self.state.lock().expect("worker lock poisoned").follows.contains_key(&business.identity())
	}

	/// The transport this worker multiplexes onto.
	pub fn transport(&self) -> Arc<dyn Transport> {
		self.transport.clone()
	}

	async fn unwatch_inner(&self, business: &Business, notify_api: bool) -> Result<()> {
		let identity = business.identity();

		if !self.state.lock().expect("worker lock poisoned").follows.contains_key(&identity) {
			return Ok(());
		}

		if let Some(bid) = &business.bid {
			let reference = self.registry.release(business).await;

			if reference == 0 {
				if notify_api && !self.transport.is_guest() {
					self.notify(NOTIFY_UNSUB, bid, &business.subject).await?;
				}

				self.state.lock().expect("worker lock poisoned").api_aware.remove(&identity);
			}
		}

		let mut state = self.state.lock().expect("worker lock poisoned");

		state.follows.remove(&identity);
		state.latest.remove(&identity);
		state.digests.remove(&identity);

		Ok(())
	}

	async fn teardown(&self, notify_api: bool) -> Result<()> {
		let follows = {
			let state = self.state.lock().expect("worker lock poisoned");

			state.follows.values().cloned().collect::<Vec<_>>()
		};

		for business in follows {
			if let Err(err) = self.unwatch_inner(&business, notify_api).await {
				tracing::warn!(
					identity = %business.identity(),
					error = %err,
					"release failed during teardown",
				);
			}
		}

		if let Some(id) = self.listener.lock().expect("worker lock poisoned").take() {
			self.transport.remove_listener(TransportEventKind::Message, id);
		}

		Ok(())
	}

	async fn notify(&self, endpoint: &str, bid: &crate::business::Bid, subject: &str) -> Result<()> {
		let mut params = Map::new();

		params.insert("bid".into(), serde_json::to_value(bid)?);
		params.insert("topic".into(), json!(format!("{TOPIC_ROOT}/uuid/{subject}")));
		params.insert("clientId".into(), json!(self.transport.client_id()));

		self.http.post(endpoint, params, RequestOptions::default()).await?;

		Ok(())
	}
}

// Two follows on the same subject with different bids both receive the
// message: the topic alone cannot tell them apart.
fn route_message(state: &Weak<Mutex<Follows>>, client_id: &str, event: &TransportEvent) {
	let TransportEvent::Message { topic, payload } = event else {
		return;
	};
	let Some(state) = state.upgrade() else {
		return;
	};
	let digests = {
		let state = state.lock().expect("worker lock poisoned");

		state
			.follows
			.iter()
			.filter(|(_, business)| topic_for(client_id, &business.subject) == *topic)
			.filter_map(|(identity, _)| state.digests.get(identity).cloned())
			.collect::<Vec<_>>()
	};

	for digest in digests {
		digest(payload);
	}
}

// The digest decodes a UTF-8 JSON payload into the latest-value slot for
// its follow.
fn make_digest(state: Weak<Mutex<Follows>>, identity: String) -> Digest {
	Arc::new(move |payload: &[u8]| {
		let Some(state) = state.upgrade() else {
			return;
		};

		match serde_json::from_slice::<Value>(payload) {
			Ok(value) => {
				state.lock().expect("worker lock poisoned").latest.insert(identity.clone(), value);
			},
			Err(err) => {
				tracing::debug!(%identity, error = %err, "discarding undecodable payload");
			},
		}
	})
}
