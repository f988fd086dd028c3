//! Service lifecycle against a mocked API and an observable transport.

// std
use std::{
	sync::{Arc, Mutex, atomic::Ordering},
	time::Duration,
};
// crates.io
use async_trait::async_trait;
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path, query_param},
};
// self
use super::support::{self, FakeTransport};
use mqtt_fanout::{
	InterestRegistry, Result, Service, ServiceConfig, ServiceEvent, ServiceState,
	cache::{Cache, keys, persistent::PersistentCache},
	service::TransportProfile,
	transport::{ConnectSettings, Transport, event::TransportEvent},
};

struct FakeProfile {
	transport: Arc<FakeTransport>,
	settings: Mutex<Option<ConnectSettings>>,
}
impl FakeProfile {
	fn new(transport: Arc<FakeTransport>) -> Arc<Self> {
		Arc::new(Self { transport, settings: Mutex::new(None) })
	}
}
#[async_trait]
impl TransportProfile for FakeProfile {
	fn suspend_when_hidden(&self) -> bool {
		true
	}

	fn use_shared_client_id(&self) -> bool {
		false
	}

	async fn build(&self, settings: ConnectSettings) -> Result<Arc<dyn Transport>> {
		*self.settings.lock().expect("lock") = Some(settings);

		let transport: Arc<dyn Transport> = self.transport.clone();

		Ok(transport)
	}
}

struct Fixture {
	_server: MockServer,
	transport: Arc<FakeTransport>,
	profile: Arc<FakeProfile>,
	service: Arc<Service>,
	cache: Arc<PersistentCache>,
}

async fn fixture() -> Fixture {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/api/v2/client/getClientId"))
		.and(query_param("type", "base-page"))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(json!({"code": 200, "data": "CID", "desc": ""})),
		)
		.mount(&server)
		.await;

	let (_, cache) = support::fresh_cache().await;

	cache.set_item(keys::TOKEN, json!("a.b.c"), None);
	cache.set_item(keys::MQTT_PASSWORD, json!("secret"), None);
	cache.set_item(keys::MQTT_UUID, json!("uuid-1"), None);
	cache.set_item(keys::MQTT_HOST, json!("broker.example"), None);
	cache.set_item(keys::MQTT_HOST_PROTOCOL, json!("wss"), None);
	cache.flush().await.expect("flush");

	let http = support::http_client(&server.uri(), cache.clone());
	let registry = Arc::new(InterestRegistry::new(cache.clone()));
	let transport = FakeTransport::new("CID");
	let profile = FakeProfile::new(transport.clone());
	let service =
		Service::new(http, cache.clone(), registry, profile.clone(), ServiceConfig::default());

	Fixture { _server: server, transport, profile, service, cache }
}

#[tokio::test]
async fn init_assembles_credentials_and_connects() {
	let fixture = fixture().await;

	fixture.service.init().await.expect("init");

	assert_eq!(fixture.service.state(), ServiceState::Running);
	assert_eq!(fixture.transport.connects.load(Ordering::SeqCst), 1);

	let settings =
		fixture.profile.settings.lock().expect("lock").clone().expect("captured settings");

	assert_eq!(settings.client_id, "CID");
	assert_eq!(settings.username, "CID");
	assert_eq!(settings.password, "secret");
	assert_eq!(settings.broker_url.as_str(), "wss://broker.example/mqtt");
	assert_eq!(settings.keep_alive_secs, 60);
	assert_eq!(settings.reconnect_secs, 5);
	assert_eq!(settings.connect_timeout_secs, 6);

	let will = settings.will.expect("will message");

	assert_eq!(will.topic, "iot/v1/cb/CID/user/disconnect");

	let body: serde_json::Value = serde_json::from_slice(&will.payload).expect("will body");

	assert_eq!(body["service"], "user");
	assert_eq!(body["method"], "disconnect");
	assert_eq!(body["srcAddr"], "0.CID");
	assert_eq!(body["clientId"], "CID");
	assert_eq!(body["payload"]["uniqueMsgId"], 0);
	assert_eq!(body["payload"]["token"], "c");

	// Second init is a no-op: the machine only leaves Created once.
	fixture.service.init().await.expect("re-init");

	assert_eq!(fixture.transport.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_event_subscribes_the_client_wildcard() {
	let fixture = fixture().await;

	fixture.service.init().await.expect("init");
	fixture.transport.fire(&TransportEvent::Connect { session_present: false });
	tokio::time::sleep(Duration::from_millis(50)).await;

	let subscriptions = fixture.transport.subscriptions.lock().expect("lock").clone();

	assert_eq!(subscriptions, vec![vec!["iot/v1/c/CID/#".to_string()]]);
}

#[tokio::test]
async fn suspend_and_resume_restore_running() {
	let fixture = fixture().await;

	fixture.service.init().await.expect("init");
	fixture.service.set_hidden(true).await.expect("suspend");

	assert_eq!(fixture.service.state(), ServiceState::Suspended);
	assert_eq!(fixture.transport.ends.load(Ordering::SeqCst), 1);

	// Visibility events can repeat; the machine must not move.
	fixture.service.set_hidden(true).await.expect("suspend again");

	assert_eq!(fixture.service.state(), ServiceState::Suspended);

	fixture.service.set_hidden(false).await.expect("resume");

	assert_eq!(fixture.service.state(), ServiceState::Running);
	assert_eq!(fixture.transport.reconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn quit_returns_to_created_and_is_idempotent() {
	let fixture = fixture().await;

	fixture.service.init().await.expect("init");
	fixture.service.create_worker(None).expect("worker");
	fixture.service.quit().await.expect("quit");

	assert_eq!(fixture.service.state(), ServiceState::Created);
	assert!(fixture.transport.ends.load(Ordering::SeqCst) >= 1);

	fixture.service.quit().await.expect("re-quit");

	assert_eq!(fixture.service.state(), ServiceState::Created);
}

#[tokio::test]
async fn session_end_without_token_emits_the_redirect() {
	let fixture = fixture().await;

	fixture.service.init().await.expect("init");
	fixture.service.set_location("/devices/3");

	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = events.clone();

	fixture.service.on_event(Arc::new(move |event| {
		sink.lock().expect("lock").push(event.clone());
	}));

	// Token still cached: the end event must not expire the session.
	fixture.transport.fire(&TransportEvent::End);
	tokio::time::sleep(Duration::from_millis(50)).await;

	assert!(events.lock().expect("lock").is_empty());

	// Drop the token (as the auth layer does) and end again.
	fixture.cache.remove_item(keys::TOKEN);
	fixture.cache.flush().await.expect("flush");

	fixture.transport.fire(&TransportEvent::End);
	tokio::time::sleep(Duration::from_millis(50)).await;

	let seen = events.lock().expect("lock").clone();

	assert_eq!(
		seen,
		vec![ServiceEvent::SessionExpired { redirect: "/login?from=/devices/3".into() }],
	);
}
