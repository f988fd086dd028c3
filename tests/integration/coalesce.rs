//! GET coalescing against a live HTTP server.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use serde_json::{Map, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use super::support;
use mqtt_fanout::http::RequestOptions;

fn params() -> Map<String, serde_json::Value> {
	let mut params = Map::new();

	params.insert("x".into(), json!(1));
	params
}

#[tokio::test]
async fn identical_gets_inside_the_window_share_one_wire_call() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let hits = Arc::new(AtomicUsize::new(0));
	let counter = hits.clone();

	Mock::given(method("GET"))
		.and(path("/api/v2/a"))
		.respond_with(move |_: &wiremock::Request| {
			counter.fetch_add(1, Ordering::SeqCst);

			ResponseTemplate::new(200).set_body_json(json!({"code": 200, "data": {"ok": true}, "desc": ""}))
		})
		.mount(&server)
		.await;

	let (_, cache) = support::fresh_cache().await;
	let http = support::http_client(&server.uri(), cache);

	let (first, second) = tokio::join!(
		http.get("/v2/a", params(), RequestOptions::default()),
		http.get("/v2/a", params(), RequestOptions::default()),
	);
	let first = first.expect("first");
	let second = second.expect("second");

	assert_eq!(first.code, 200);
	assert_eq!(first.data, second.data);
	assert_eq!(hits.load(Ordering::SeqCst), 1, "both calls must share one request");

	// Outside the window a fresh wire call is issued.
	tokio::time::sleep(Duration::from_millis(600)).await;

	http.get("/v2/a", params(), RequestOptions::default()).await.expect("third");

	assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn different_params_never_coalesce() {
	let server = MockServer::start().await;
	let hits = Arc::new(AtomicUsize::new(0));
	let counter = hits.clone();

	Mock::given(method("GET"))
		.and(path("/api/v2/a"))
		.respond_with(move |_: &wiremock::Request| {
			counter.fetch_add(1, Ordering::SeqCst);

			ResponseTemplate::new(200).set_body_json(json!({"code": 200, "data": {}, "desc": ""}))
		})
		.mount(&server)
		.await;

	let (_, cache) = support::fresh_cache().await;
	let http = support::http_client(&server.uri(), cache);
	let mut other = Map::new();

	other.insert("x".into(), json!(2));

	let (first, second) = tokio::join!(
		http.get("/v2/a", params(), RequestOptions::default()),
		http.get("/v2/a", other, RequestOptions::default()),
	);

	first.expect("first");
	second.expect("second");

	assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn posts_bypass_the_coalescer() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/api/v2/a"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200, "data": {}, "desc": ""})))
		.expect(2)
		.mount(&server)
		.await;

	let (_, cache) = support::fresh_cache().await;
	let http = support::http_client(&server.uri(), cache);

	let (first, second) = tokio::join!(
		http.post("/v2/a", params(), RequestOptions::default()),
		http.post("/v2/a", params(), RequestOptions::default()),
	);

	first.expect("first");
	second.expect("second");
	server.verify().await;
}
