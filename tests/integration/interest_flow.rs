//! Watch/unwatch flows: interest notifications, dedup, and routing.

// std
use std::sync::Arc;
// crates.io
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_json, method, path},
};
// self
use super::support::{self, FakeTransport};
use mqtt_fanout::{
	Business, InterestRegistry, Worker, transport::event::TransportEvent,
};

struct Fixture {
	server: MockServer,
	transport: Arc<FakeTransport>,
	registry: Arc<InterestRegistry>,
	http: Arc<mqtt_fanout::http::HttpClient>,
}
impl Fixture {
	async fn new() -> Self {
		let _ = tracing_subscriber::fmt::try_init();

		let server = MockServer::start().await;
		let (_, cache) = support::fresh_cache().await;
		let http = support::http_client(&server.uri(), cache.clone());
		let registry = Arc::new(InterestRegistry::new(cache));
		let transport = FakeTransport::new("CID");

		Self { server, transport, registry, http }
	}

	fn worker(&self) -> Arc<Worker> {
		Worker::new(self.transport.clone(), self.http.clone(), self.registry.clone())
	}
}

fn ok_envelope() -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(json!({"code": 200, "data": {}, "desc": ""}))
}

#[tokio::test]
async fn first_watch_posts_the_interest_subscription() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.and(body_json(json!({
			"bid": "B1",
			"topic": "iot/v1/c/uuid/log/detail",
			"clientId": "CID",
		})))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;

	let worker = fixture.worker();

	worker.watch(&Business::new("log/detail", "B1")).await.expect("watch");

	assert!(worker.is_watching(&Business::new("log/detail", "B1")));
	fixture.server.verify().await;
}

#[tokio::test]
async fn two_watchers_produce_exactly_one_subscription_post() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;

	let business = Business::new("log/detail", "B1");
	let first = fixture.worker();
	let second = fixture.worker();

	first.watch(&business).await.expect("watch");
	second.watch(&business).await.expect("watch");

	fixture.server.verify().await;
}

#[tokio::test]
async fn only_the_last_release_posts_the_unsubscription() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;
	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/unsub"))
		.and(body_json(json!({
			"bid": "B1",
			"topic": "iot/v1/c/uuid/log/detail",
			"clientId": "CID",
		})))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;

	let business = Business::new("log/detail", "B1");
	let first = fixture.worker();
	let second = fixture.worker();

	first.watch(&business).await.expect("watch");
	second.watch(&business).await.expect("watch");

	// Not the last watcher; no unsubscription yet.
	first.unwatch(&business).await.expect("unwatch");
	second.unwatch(&business).await.expect("unwatch");

	fixture.server.verify().await;
}

#[tokio::test]
async fn watch_then_unwatch_leaves_no_server_side_interest() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;
	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/unsub"))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;

	let business = Business::new("log/detail", "B1");
	let worker = fixture.worker();

	worker.watch(&business).await.expect("watch");
	worker.unwatch(&business).await.expect("unwatch");

	assert!(!worker.is_watching(&business));
	fixture.server.verify().await;
}

#[tokio::test]
async fn bidless_follows_skip_interest_notifications() {
	let fixture = Fixture::new().await;

	// No mocks mounted: any HTTP call would fail the worker.
	let business = Business::subject_only("layout_device/status");
	let worker = fixture.worker();

	worker.watch(&business).await.expect("watch");
	worker.unwatch(&business).await.expect("unwatch");
}

#[tokio::test]
async fn guest_workers_never_notify_the_api() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.expect(0)
		.mount(&fixture.server)
		.await;
	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/unsub"))
		.respond_with(ok_envelope())
		.expect(0)
		.mount(&fixture.server)
		.await;

	let transport = FakeTransport::new("guest");
	let worker = Worker::new(transport, fixture.http.clone(), fixture.registry.clone());
	let business = Business::new("log/detail", "B1");

	worker.watch(&business).await.expect("watch");

	assert!(worker.is_watching(&business));

	worker.unwatch(&business).await.expect("unwatch");
	fixture.server.verify().await;
}

#[tokio::test]
async fn messages_route_to_the_matching_follow_only() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.mount(&fixture.server)
		.await;

	let logs = Business::new("log/detail", "B1");
	let devices = Business::new("layout_device/status", "B2");
	let log_worker = fixture.worker();
	let device_worker = fixture.worker();

	log_worker.watch(&logs).await.expect("watch");
	device_worker.watch(&devices).await.expect("watch");

	fixture.transport.fire(&TransportEvent::Message {
		topic: "iot/v1/c/CID/log/detail".into(),
		payload: br#"{"payload":{"x":1}}"#.to_vec().into(),
	});

	assert_eq!(log_worker.latest_payload(&logs), Some(json!({"payload": {"x": 1}})));
	assert_eq!(device_worker.latest_payload(&devices), None);
}

#[tokio::test]
async fn same_subject_different_bids_both_receive_the_message() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.mount(&fixture.server)
		.await;

	let one = Business::new("log/detail", "B1");
	let other = Business::new("log/detail", "B2");
	let worker = fixture.worker();

	worker.watch(&one).await.expect("watch");
	worker.watch(&other).await.expect("watch");

	fixture.transport.fire(&TransportEvent::Message {
		topic: "iot/v1/c/CID/log/detail".into(),
		payload: br#"{"n":7}"#.to_vec().into(),
	});

	// Topic-only routing cannot tell the two follows apart.
	assert_eq!(worker.latest_payload(&one), Some(json!({"n": 7})));
	assert_eq!(worker.latest_payload(&other), Some(json!({"n": 7})));
}

#[tokio::test]
async fn quit_releases_follows_and_detaches_the_listener() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;
	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/unsub"))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;

	let business = Business::new("log/detail", "B1");
	let worker = fixture.worker();

	worker.watch(&business).await.expect("watch");
	worker.quit().await.expect("quit");
	worker.quit().await.expect("idempotent quit");

	fixture.transport.fire(&TransportEvent::Message {
		topic: "iot/v1/c/CID/log/detail".into(),
		payload: br#"{"n":1}"#.to_vec().into(),
	});

	assert_eq!(worker.latest_payload(&business), None);
	fixture.server.verify().await;
}

#[tokio::test]
async fn force_quit_releases_without_http_notifications() {
	let fixture = Fixture::new().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/sub"))
		.respond_with(ok_envelope())
		.expect(1)
		.mount(&fixture.server)
		.await;
	Mock::given(method("POST"))
		.and(path("/api/v2/client/notify/unsub"))
		.respond_with(ok_envelope())
		.expect(0)
		.mount(&fixture.server)
		.await;

	let business = Business::new("log/detail", "B1");
	let worker = fixture.worker();

	worker.watch(&business).await.expect("watch");
	worker.force_quit().await.expect("force quit");

	assert_eq!(fixture.registry.get_reference(&business).await, 0);
	fixture.server.verify().await;
}
