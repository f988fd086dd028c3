//! Request options, cancellation, and the API response envelope.

// crates.io
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(50);
/// Conventional service prefix used with [`RequestOptions::api_change`].
pub const DEFAULT_SERVICE_PREFIX: &str = "building";

/// Header names the caller may not override.
pub(crate) const RESERVED_HEADERS: [&str; 3] = ["access-token", "terminal", "token"];

/// API response envelope: `{code, data, desc}`.
///
/// Binary response types carry their payload in `bytes`; the field never
/// crosses serialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
	/// Business status code; `200` means success.
	pub code: i64,
	/// Payload.
	#[serde(default)]
	pub data: Value,
	/// Human-readable outcome description.
	#[serde(default)]
	pub desc: String,
	/// Raw body for binary response types.
	#[serde(skip)]
	pub bytes: Option<Bytes>,
}
impl Envelope {
	/// Whether the business code signals success.
	pub fn is_success(&self) -> bool {
		self.code == 200
	}

	/// Synthesize an envelope from a bare HTTP outcome.
	pub fn from_status(status: StatusCode) -> Self {
		Self {
			code: status.as_u16() as _,
			data: Value::Object(Default::default()),
			desc: status.canonical_reason().unwrap_or_default().into(),
			bytes: None,
		}
	}

	/// The envelope produced when a request is canceled by its caller.
	pub fn canceled(code: i64) -> Self {
		Self { code, data: Value::Null, desc: "canceled by user".into(), bytes: None }
	}
}

/// Decode target for a response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
	/// Raw bytes, buffered.
	ArrayBuffer,
	/// Raw bytes, buffered (kept distinct for callers porting blob flows).
	Blob,
	/// Markup delivered as text.
	Document,
	/// JSON, decoded through the envelope.
	#[default]
	Json,
	/// Plain text.
	Text,
	/// Raw bytes read incrementally, feeding the download-progress hook.
	Stream,
}

/// Terminal class reported to the API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Terminal {
	/// Mobile embedding.
	App,
	/// Desktop browser embedding.
	#[default]
	Web,
}
impl Terminal {
	pub(crate) fn as_header(self) -> &'static str {
		match self {
			Self::App => "APP",
			Self::Web => "WEB",
		}
	}
}

/// Which API root the client prepends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApiRoot {
	/// `/api`.
	#[default]
	Api,
	/// `/api2`.
	Api2,
}
impl ApiRoot {
	pub(crate) fn as_path(self) -> &'static str {
		match self {
			Self::Api => "/api",
			Self::Api2 => "/api2",
		}
	}
}

/// Cooperative cancellation handle for one request.
#[derive(Clone, Debug)]
pub struct CancelToken {
	inner: Arc<watch::Sender<bool>>,
}
impl CancelToken {
	/// Create an un-canceled token.
	pub fn new() -> Self {
		Self { inner: Arc::new(watch::channel(false).0) }
	}

	/// Cancel the request(s) holding this token.
	pub fn cancel(&self) {
		let _ = self.inner.send(true);
	}

	/// Whether the token has been canceled.
	pub fn is_canceled(&self) -> bool {
		*self.inner.borrow()
	}

	/// Resolve once the token is canceled; pends forever otherwise.
	pub async fn canceled(&self) {
		// Self holds a sender, so the channel cannot close while waiting.
		let mut rx = self.inner.subscribe();

		loop {
			if *rx.borrow() {
				return;
			}
			if rx.changed().await.is_err() {
				std::future::pending::<()>().await;
			}
		}
	}
}

impl Default for CancelToken {
	fn default() -> Self {
		Self::new()
	}
}

/// Progress callback, `(received_bytes, total_bytes_if_known)`.
pub type ProgressHook = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Per-request options.
#[derive(Clone, Default)]
pub struct RequestOptions {
	/// Optional service prefix; when present the path is rewritten to
	/// `/api/{prefix}{url}`.
	pub api_change: Option<String>,
	/// Extra headers; reserved names are dropped.
	pub headers: Vec<(String, String)>,
	/// Suppress the `_r=<random>` cache-buster query parameter.
	pub hide_times: bool,
	/// When absent or true, non-success envelopes resolve; when false they
	/// reject.
	pub is_catch: Option<bool>,
	/// Body/decoding selector.
	pub response_type: ResponseType,
	/// Per-request timeout override.
	pub timeout: Option<Duration>,
	/// Send the body form-encoded instead of as JSON.
	pub using_form_data: bool,
	/// Send the body as raw JSON bytes with a binary content type.
	pub using_blob: bool,
	/// Cancellation hook.
	pub cancel: Option<CancelToken>,
	/// Download progress hook; fires for binary response types.
	pub on_download_progress: Option<ProgressHook>,
	/// Upload progress hook; accepted for interface parity, currently
	/// unwired.
	pub on_upload_progress: Option<ProgressHook>,
}
impl RequestOptions {
	/// Options carrying the conventional service prefix.
	pub fn with_api_change() -> Self {
		Self { api_change: Some(DEFAULT_SERVICE_PREFIX.into()), ..Default::default() }
	}

	/// Resolved `is_catch` flag (defaults to true).
	pub fn catches(&self) -> bool {
		self.is_catch.unwrap_or(true)
	}

	/// Resolved timeout (defaults to [`DEFAULT_TIMEOUT`]).
	pub fn timeout_or_default(&self) -> Duration {
		self.timeout.unwrap_or(DEFAULT_TIMEOUT)
	}
}
