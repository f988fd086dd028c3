//! Service lifecycle: state machine, credentials assembly, shared
//! transport, and worker factory.

// std
use std::sync::{
	Mutex,
	atomic::{AtomicU32, Ordering},
};
// crates.io
use async_trait::async_trait;
use serde_json::{Map, json};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{Cache, keys, persistent::PersistentCache},
	http::{HttpClient, RequestOptions},
	hub::Hub,
	interest::InterestRegistry,
	transport::{
		ConnectSettings, GUEST_CLIENT_ID, TOPIC_ROOT, Transport, WillMessage,
		direct::DirectTransport,
		event::TransportEventKind,
		shared::HubTransport,
	},
	worker::Worker,
};

/// Lifecycle states; transitions are monotone and illegal ones no-op.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
	Created,
	Initializing,
	Running,
	Suspending,
	Suspended,
	Resuming,
	Stopping,
}

fn allowed(from: ServiceState, to: ServiceState) -> bool {
	use ServiceState::*;

	matches!(
		(from, to),
		(Created, Initializing)
			| (Initializing, Running)
			| (Initializing, Created)
			| (Running, Suspending)
			| (Suspending, Suspended)
			| (Suspended, Resuming)
			| (Resuming, Running)
			| (Running, Stopping)
			| (Stopping, Created)
	)
}

/// Events the service surfaces to its host binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceEvent {
	/// The shared connection ended with no token left; the host should
	/// navigate to the sign-in page.
	SessionExpired {
		/// Target location, `/login` or `/login?from={current}`.
		redirect: String,
	},
}

/// Host callback for service events.
pub type ServiceCallback = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

/// Page kind reported when fetching the client id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PageKind {
	/// Top-level page.
	#[default]
	BasePage,
	/// Embedded sub-page.
	SubPage,
}
impl PageKind {
	fn as_param(self) -> &'static str {
		match self {
			Self::BasePage => "base-page",
			Self::SubPage => "sub-page",
		}
	}
}

/// Chooses a transport variant and carries its behavioral flags.
#[async_trait]
pub trait TransportProfile: Send + Sync {
	/// End the connection when the realm becomes hidden, reconnect when it
	/// becomes visible again.
	fn suspend_when_hidden(&self) -> bool;

	/// Fetch the client id once and cache it for every realm.
	fn use_shared_client_id(&self) -> bool;

	/// Build the shared transport.
	async fn build(&self, settings: ConnectSettings) -> Result<Arc<dyn Transport>>;
}

/// Profile owning a private MQTT client per realm.
///
/// Suspends while hidden and fetches a per-realm client id.
#[derive(Debug, Default)]
pub struct DirectProfile;
#[async_trait]
impl TransportProfile for DirectProfile {
	fn suspend_when_hidden(&self) -> bool {
		true
	}

	fn use_shared_client_id(&self) -> bool {
		false
	}

	async fn build(&self, settings: ConnectSettings) -> Result<Arc<dyn Transport>> {
		Ok(Arc::new(DirectTransport::new(settings)))
	}
}

/// Profile multiplexing onto the cross-realm hub.
///
/// Never suspends (the client outlives any one realm) and shares the
/// cached client id.
pub struct HubProfile {
	hub: Hub,
}
impl HubProfile {
	/// Profile over an existing hub handle.
	pub fn new(hub: Hub) -> Self {
		Self { hub }
	}
}
#[async_trait]
impl TransportProfile for HubProfile {
	fn suspend_when_hidden(&self) -> bool {
		false
	}

	fn use_shared_client_id(&self) -> bool {
		true
	}

	async fn build(&self, settings: ConnectSettings) -> Result<Arc<dyn Transport>> {
		let transport: Arc<dyn Transport> = HubTransport::attach(self.hub.clone(), settings).await?;

		Ok(transport)
	}
}

/// Service configuration.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
	/// Page kind reported in the client-id fetch.
	pub page_kind: PageKind,
	/// Path of the sign-in page.
	pub sign_in_path: String,
}
impl Default for ServiceConfig {
	fn default() -> Self {
		Self { page_kind: PageKind::default(), sign_in_path: "/login".into() }
	}
}

/// One service instance per realm: owns the shared transport and the
/// workers multiplexed onto it.
pub struct Service {
	http: Arc<HttpClient>,
	cache: Arc<PersistentCache>,
	registry: Arc<InterestRegistry>,
	profile: Arc<dyn TransportProfile>,
	config: ServiceConfig,
	state: Mutex<ServiceState>,
	transport: Mutex<Option<Arc<dyn Transport>>>,
	workers: Mutex<Vec<Arc<Worker>>>,
	callbacks: Mutex<Vec<ServiceCallback>>,
	location: Mutex<Option<String>>,
	seq: AtomicU32,
}
impl Service {
	/// Assemble a service from its collaborators.
	pub fn new(
		http: Arc<HttpClient>,
		cache: Arc<PersistentCache>,
		registry: Arc<InterestRegistry>,
		profile: Arc<dyn TransportProfile>,
		config: ServiceConfig,
	) -> Arc<Self> {
		Arc::new(Self {
			http,
			cache,
			registry,
			profile,
			config,
			state: Mutex::new(ServiceState::Created),
			transport: Mutex::new(None),
			workers: Mutex::new(Vec::new()),
			callbacks: Mutex::new(Vec::new()),
			location: Mutex::new(None),
			seq: AtomicU32::new(1),
		})
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ServiceState {
		*self.state.lock().expect("service lock poisoned")
	}

	/// Register a host callback for service events.
	pub fn on_event(&self, callback: ServiceCallback) {
		self.callbacks.lock().expect("service lock poisoned").push(callback);
	}

	/// Record the realm's current location, used for the sign-in redirect.
	pub fn set_location(&self, location: impl Into<String>) {
		*self.location.lock().expect("service lock poisoned") = Some(location.into());
	}

	/// Read credentials, fetch the client id, build the shared transport,
	/// and connect.
	#[tracing::instrument(skip(self))]
	pub async fn init(self: &Arc<Self>) -> Result<()> {
		if !self.transition(ServiceState::Created, ServiceState::Initializing) {
			return Ok(());
		}

		match self.do_init().await {
			Ok(()) => {
				self.transition(ServiceState::Initializing, ServiceState::Running);

				Ok(())
			},
			Err(err) => {
				self.transition(ServiceState::Initializing, ServiceState::Created);

				Err(err)
			},
		}
	}

	/// Create a worker bound to the given transport, or the shared one.
	pub fn create_worker(&self, transport: Option<Arc<dyn Transport>>) -> Result<Arc<Worker>> {
		let transport = match transport {
			Some(transport) => transport,
			None => self.shared_transport().ok_or(Error::Validation {
				field: "state",
				reason: "service has no transport yet; call init first".into(),
			})?,
		};
		let worker = Worker::new(transport, self.http.clone(), self.registry.clone());

		self.workers.lock().expect("service lock poisoned").push(worker.clone());

		Ok(worker)
	}

	/// Gracefully release every worker and end the shared transport.
	/// Idempotent.
	#[tracing::instrument(skip(self))]
	pub async fn quit(&self) -> Result<()> {
		if !self.transition(ServiceState::Running, ServiceState::Stopping) {
			return Ok(());
		}

		let workers = std::mem::take(&mut *self.workers.lock().expect("service lock poisoned"));

		for worker in workers {
			if let Err(err) = worker.quit().await {
				tracing::warn!(error = %err, "worker teardown failed");
			}
		}

		if let Some(transport) = self.take_transport() {
			let _ = transport.end(false).await;
		}

		self.transition(ServiceState::Stopping, ServiceState::Created);

		Ok(())
	}

	/// Tear everything down without HTTP notifications, ending per-worker
	/// transports too. Idempotent.
	#[tracing::instrument(skip(self))]
	pub async fn force_quit(&self) -> Result<()> {
		if !self.transition(ServiceState::Running, ServiceState::Stopping) {
			return Ok(());
		}

		let workers = std::mem::take(&mut *self.workers.lock().expect("service lock poisoned"));

		for worker in workers {
			let _ = worker.force_quit().await;
			let _ = worker.transport().end(true).await;
		}

		if let Some(transport) = self.take_transport() {
			let _ = transport.end(true).await;
		}

		self.transition(ServiceState::Stopping, ServiceState::Created);

		Ok(())
	}

	/// End the shared transport while keeping workers registered.
	#[tracing::instrument(skip(self))]
	pub async fn suspend(&self) -> Result<()> {
		if !self.transition(ServiceState::Running, ServiceState::Suspending) {
			return Ok(());
		}

		if let Some(transport) = self.shared_transport() {
			let _ = transport.end(false).await;
		}

		self.transition(ServiceState::Suspending, ServiceState::Suspended);

		Ok(())
	}

	/// Reconnect the shared transport after a suspension.
	#[tracing::instrument(skip(self))]
	pub async fn resume(&self) -> Result<()> {
		if !self.transition(ServiceState::Suspended, ServiceState::Resuming) {
			return Ok(());
		}

		if let Some(transport) = self.shared_transport() {
			let _ = transport.reconnect().await;
		}

		self.transition(ServiceState::Resuming, ServiceState::Running);

		Ok(())
	}

	/// Visibility hook: suspend or resume when the profile asks for it.
	pub async fn set_hidden(&self, hidden: bool) -> Result<()> {
		if !self.profile.suspend_when_hidden() {
			return Ok(());
		}

		if hidden { self.suspend().await } else { self.resume().await }
	}

	/// The shared transport, once initialized.
	pub fn shared_transport(&self) -> Option<Arc<dyn Transport>> {
		self.transport.lock().expect("service lock poisoned").clone()
	}

	fn take_transport(&self) -> Option<Arc<dyn Transport>> {
		self.transport.lock().expect("service lock poisoned").take()
	}

	fn transition(&self, from: ServiceState, to: ServiceState) -> bool {
		let mut state = self.state.lock().expect("service lock poisoned");

		if *state == from && allowed(from, to) {
			tracing::debug!(?from, ?to, "service state transition");
			*state = to;

			true
		} else {
			tracing::debug!(current = ?*state, requested = ?to, "ignoring illegal state transition");

			false
		}
	}

	async fn do_init(self: &Arc<Self>) -> Result<()> {
		let token = self.cache.get_str(keys::TOKEN);
		let password = self.cache.get_str(keys::MQTT_PASSWORD).unwrap_or_default();
		let client_id = match &token {
			Some(_) => self.resolve_client_id(&password).await?,
			None => GUEST_CLIENT_ID.to_string(),
		};
		let broker_url = self.broker_url()?;
		let mut settings = ConnectSettings::new(broker_url, &client_id);

		settings.password = password;
		settings.will = token.as_deref().map(|token| self.will_message(&client_id, token));

		let transport = self.profile.build(settings).await?;

		self.install_listeners(&transport, &client_id);
		*self.transport.lock().expect("service lock poisoned") = Some(transport.clone());

		transport.connect().await
	}

	async fn resolve_client_id(&self, password: &str) -> Result<String> {
		if self.profile.use_shared_client_id()
			&& let Ok(Some(cached)) = self.cache.read_through(keys::CLIENT_ID).await
			&& let Some(cached) = cached.as_str()
		{
			return Ok(cached.to_string());
		}

		let mut params = Map::new();

		params.insert("uuid".into(), json!(self.cache.get_str(keys::MQTT_UUID)));
		params.insert("mqttPwd".into(), json!(password));
		params.insert("type".into(), json!(self.config.page_kind.as_param()));

		let envelope = self.http.get("/v2/client/getClientId", params, RequestOptions::default()).await?;
		let client_id = envelope
			.data
			.as_str()
			.map(|id| id.to_string())
			.filter(|id| !id.is_empty())
			.ok_or(Error::Validation {
				field: "clientId",
				reason: "client-id endpoint returned no usable id".into(),
			})?;

		if self.profile.use_shared_client_id() {
			self.cache.set_item(keys::CLIENT_ID, json!(client_id), None);

			if let Err(err) = self.cache.flush().await {
				tracing::warn!(error = %err, "client id not persisted");
			}
		}

		Ok(client_id)
	}

	fn broker_url(&self) -> Result<Url> {
		let host = self.cache.get_str(keys::MQTT_HOST).ok_or(Error::Validation {
			field: "mqttHost",
			reason: "no broker host cached".into(),
		})?;
		let protocol = self.cache.get_str(keys::MQTT_HOST_PROTOCOL).unwrap_or_else(|| "wss".into());

		Ok(Url::parse(&format!("{protocol}://{host}/mqtt"))?)
	}

	fn will_message(&self, client_id: &str, token: &str) -> WillMessage {
		let signature = token.split('.').nth(2).unwrap_or_default();
		let body = json!({
			"service": "user",
			"method": "disconnect",
			"seq": self.seq.fetch_add(1, Ordering::Relaxed),
			"srcAddr": format!("0.{client_id}"),
			"clientId": client_id,
			"payload": {
				"timestamp": Utc::now().timestamp_millis(),
				"uniqueMsgId": 0,
				"token": signature,
			},
		});

		WillMessage {
			topic: format!("iot/v1/cb/{client_id}/user/disconnect"),
			payload: body.to_string().into_bytes(),
		}
	}

	fn install_listeners(self: &Arc<Self>, transport: &Arc<dyn Transport>, client_id: &str) {
		// On connect, claim the whole per-client topic space.
		let wildcard = format!("{TOPIC_ROOT}/{client_id}/#");
		let subscriber = transport.clone();

		transport.add_listener(
			TransportEventKind::Connect,
			Arc::new(move |_| {
				let transport = subscriber.clone();
				let wildcard = wildcard.clone();

				tokio::spawn(async move {
					let _ = transport.subscribe(vec![wildcard]).await;
				});
			}),
		);

		let weak = Arc::downgrade(self);

		transport.add_listener(
			TransportEventKind::End,
			Arc::new(move |_| {
				let Some(service) = weak.upgrade() else {
					return;
				};

				tokio::spawn(async move {
					service.handle_session_end().await;
				});
			}),
		);
	}

	// The session is over when the connection ends and no token remains;
	// the host binding performs the actual navigation.
	async fn handle_session_end(&self) {
		let token = match self.cache.read_through(keys::TOKEN).await {
			Ok(token) => token.and_then(|value| value.as_str().map(|s| s.to_string())),
			Err(_) => self.cache.get_str(keys::TOKEN),
		};

		if token.is_some() {
			return;
		}

		let location = self.location.lock().expect("service lock poisoned").clone();

		if let Some(location) = &location
			&& location.starts_with(&self.config.sign_in_path)
		{
			return;
		}

		let redirect = login_redirect(&self.config.sign_in_path, location.as_deref());
		let callbacks = self.callbacks.lock().expect("service lock poisoned").clone();
		let event = ServiceEvent::SessionExpired { redirect };

		for callback in callbacks {
			callback(&event);
		}
	}
}

fn login_redirect(sign_in_path: &str, location: Option<&str>) -> String {
	match location {
		Some(current) if current != "/" => format!("{sign_in_path}?from={current}"),
		_ => sign_in_path.to_string(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn transitions_follow_the_lifecycle_only() {
		use ServiceState::*;

		assert!(allowed(Created, Initializing));
		assert!(allowed(Initializing, Running));
		assert!(allowed(Running, Suspending));
		assert!(allowed(Suspending, Suspended));
		assert!(allowed(Suspended, Resuming));
		assert!(allowed(Resuming, Running));
		assert!(allowed(Running, Stopping));
		assert!(allowed(Stopping, Created));

		assert!(!allowed(Created, Running));
		assert!(!allowed(Suspended, Running));
		assert!(!allowed(Running, Created));
		assert!(!allowed(Suspended, Stopping));
	}

	#[test]
	fn redirect_carries_the_origin_unless_at_root() {
		assert_eq!(login_redirect("/login", Some("/devices/3")), "/login?from=/devices/3");
		assert_eq!(login_redirect("/login", Some("/")), "/login");
		assert_eq!(login_redirect("/login", None), "/login");
	}
}
