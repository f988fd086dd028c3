//! Shared fixtures: an observable in-process transport and client wiring.

// std
use std::sync::{
	Arc, Mutex,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use async_trait::async_trait;
use mqtt_fanout::{
	Result,
	cache::{persistent::PersistentCache, storage::MemoryStorage},
	http::{HttpClient, HttpConfig},
	transport::{
		Transport,
		event::{EventCallback, EventListeners, ListenerId, TransportEvent, TransportEventKind},
	},
};

/// Transport double that records outbound calls and lets tests fire events.
pub struct FakeTransport {
	client_id: String,
	listeners: EventListeners,
	pub subscriptions: Mutex<Vec<Vec<String>>>,
	pub ends: AtomicUsize,
	pub reconnects: AtomicUsize,
	pub connects: AtomicUsize,
}
impl FakeTransport {
	pub fn new(client_id: &str) -> Arc<Self> {
		Arc::new(Self {
			client_id: client_id.into(),
			listeners: EventListeners::new(),
			subscriptions: Mutex::new(Vec::new()),
			ends: AtomicUsize::new(0),
			reconnects: AtomicUsize::new(0),
			connects: AtomicUsize::new(0),
		})
	}

	pub fn fire(&self, event: &TransportEvent) {
		self.listeners.dispatch(event);
	}
}
#[async_trait]
impl Transport for FakeTransport {
	async fn connect(&self) -> Result<()> {
		self.connects.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	async fn end(&self, _force: bool) -> Result<()> {
		self.ends.fetch_add(1, Ordering::SeqCst);
		self.listeners.dispatch(&TransportEvent::End);

		Ok(())
	}

	async fn reconnect(&self) -> Result<()> {
		self.reconnects.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	async fn subscribe(&self, topics: Vec<String>) -> Result<()> {
		self.subscriptions.lock().expect("lock").push(topics);

		Ok(())
	}

	async fn unsubscribe(&self, _topics: Vec<String>) -> Result<()> {
		Ok(())
	}

	async fn publish(&self, _topic: String, _payload: Vec<u8>) -> Result<()> {
		Ok(())
	}

	fn add_listener(&self, kind: TransportEventKind, callback: EventCallback) -> ListenerId {
		self.listeners.add(kind, callback)
	}

	fn remove_listener(&self, kind: TransportEventKind, id: ListenerId) {
		self.listeners.remove(kind, id);
	}

	fn client_id(&self) -> String {
		self.client_id.clone()
	}

	fn connected(&self) -> bool {
		true
	}

	fn reconnecting(&self) -> bool {
		false
	}
}

/// A persistent cache over a fresh in-process backing.
pub async fn fresh_cache() -> (Arc<MemoryStorage>, Arc<PersistentCache>) {
	let storage = Arc::new(MemoryStorage::new());
	let cache = Arc::new(PersistentCache::load(storage.clone()).await.expect("cache load"));

	(storage, cache)
}

/// An HTTP client pointed at a wiremock server.
pub fn http_client(base_url: &str, cache: Arc<PersistentCache>) -> Arc<HttpClient> {
	let config = HttpConfig::new(base_url.parse().expect("base url"));

	Arc::new(HttpClient::new(config, cache).expect("http client"))
}
