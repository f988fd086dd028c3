//! HTTP verbs, request assembly, and response classification.

// std
use std::sync::RwLock;
// crates.io
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use rand::Rng;
use reqwest::Client;
use serde_json::{Map, Value, json};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{keys, persistent::PersistentCache},
	http::{
		coalesce::Coalescer,
		middleware::{AfterReturning, BeforeRequest, Flow, RequestContext, lift_after, lift_before},
		options::{
			ApiRoot, CancelToken, Envelope, ProgressHook, RESERVED_HEADERS, RequestOptions,
			ResponseType, Terminal,
		},
	},
};

/// Client configuration.
#[derive(Clone, Debug)]
pub struct HttpConfig {
	/// Absolute origin the API roots hang off.
	pub base_url: Url,
	/// Which API root to prepend when no service prefix is requested.
	pub api_root: ApiRoot,
	/// Terminal class reported through the `terminal` header.
	pub terminal: Terminal,
	/// Optional `language` header value.
	pub language: Option<String>,
}
impl HttpConfig {
	/// Configuration with default root and terminal class.
	pub fn new(base_url: Url) -> Self {
		Self { base_url, api_root: ApiRoot::default(), terminal: Terminal::default(), language: None }
	}
}

/// Structured request/response client with middleware chains and in-flight
/// GET coalescing.
pub struct HttpClient {
	client: Client,
	config: HttpConfig,
	cache: Arc<PersistentCache>,
	before: RwLock<Vec<Arc<dyn BeforeRequest>>>,
	after: RwLock<Vec<Arc<dyn AfterReturning>>>,
	coalescer: Coalescer,
}
impl HttpClient {
	/// Build a client over the shared credential cache.
	pub fn new(config: HttpConfig, cache: Arc<PersistentCache>) -> Result<Self> {
		let client = Client::builder()
			.user_agent(format!("mqtt-fanout/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self {
			client,
			config,
			cache,
			before: RwLock::new(Vec::new()),
			after: RwLock::new(Vec::new()),
			coalescer: Coalescer::new(),
		})
	}

	/// Append an async hook to the `before_request` chain.
	pub fn before_request(&self, hook: impl BeforeRequest + 'static) {
		self.before.write().expect("middleware lock poisoned").push(Arc::new(hook));
	}

	/// Append a synchronous hook to the `before_request` chain, lifting it
	/// into async.
	pub fn before_request_fn(
		&self,
		hook: impl Fn(&mut RequestContext) -> Flow + Send + Sync + 'static,
	) {
		self.before_request(lift_before(hook));
	}

	/// Append an async hook to the `after_returning` chain.
	pub fn after_returning(&self, hook: impl AfterReturning + 'static) {
		self.after.write().expect("middleware lock poisoned").push(Arc::new(hook));
	}

	/// Append a synchronous hook to the `after_returning` chain, lifting it
	/// into async.
	pub fn after_returning_fn(&self, hook: impl Fn(&mut Envelope) -> Flow + Send + Sync + 'static) {
		self.after_returning(lift_after(hook));
	}

	/// Issue a GET; identical in-flight GETs within the reuse window share
	/// one wire call.
	pub async fn get(
		&self,
		path: &str,
		params: Map<String, Value>,
		options: RequestOptions,
	) -> Result<Envelope> {
		self.request(Method::GET, path, params, options).await
	}

	/// Issue a POST.
	pub async fn post(
		&self,
		path: &str,
		params: Map<String, Value>,
		options: RequestOptions,
	) -> Result<Envelope> {
		self.request(Method::POST, path, params, options).await
	}

	/// Issue a PUT.
	pub async fn put(
		&self,
		path: &str,
		params: Map<String, Value>,
		options: RequestOptions,
	) -> Result<Envelope> {
		self.request(Method::PUT, path, params, options).await
	}

	/// Issue a PATCH.
	pub async fn patch(
		&self,
		path: &str,
		params: Map<String, Value>,
		options: RequestOptions,
	) -> Result<Envelope> {
		self.request(Method::PATCH, path, params, options).await
	}

	/// Issue a DELETE.
	pub async fn delete(
		&self,
		path: &str,
		params: Map<String, Value>,
		options: RequestOptions,
	) -> Result<Envelope> {
		self.request(Method::DELETE, path, params, options).await
	}

	async fn request(
		&self,
		method: Method,
		path: &str,
		params: Map<String, Value>,
		options: RequestOptions,
	) -> Result<Envelope> {
		let mut ctx = RequestContext {
			method: method.clone(),
			path: path.into(),
			params: strip_nulls(params),
			headers: filter_reserved(options.headers.clone()),
		};
		let before = self.before.read().expect("middleware lock poisoned").clone();

		for hook in &before {
			if hook.call(&mut ctx).await == Flow::Halt {
				return Err(Error::Rejected);
			}
		}

		let logical_path = rewrite_path(&ctx.path, &options, self.config.api_root);
		let url = self.assemble_url(&ctx, &options, &logical_path)?;
		let args = ExecuteArgs {
			client: self.client.clone(),
			method: ctx.method.clone(),
			url,
			headers: self.base_headers(&ctx),
			body: body_of(&ctx, &options),
			response_type: options.response_type,
			timeout: options.timeout_or_default(),
			catches: options.catches(),
			cancel: options.cancel.clone(),
			progress: options.on_download_progress.clone(),
			after: self.after.read().expect("middleware lock poisoned").clone(),
		};

		if method == Method::GET {
			let extra = json!({
				"apiChange": options.api_change,
				"responseType": options.response_type,
				"hideTimes": options.hide_times,
			});
			let key = Coalescer::digest(method.as_str(), &logical_path, &ctx.params, &extra);
			let shared =
				self.coalescer.join_or_insert(key, move || {
					Box::pin(async move { execute(args).await.map_err(Arc::new) })
				});

			shared.await.map_err(Error::Shared)
		} else {
			execute(args).await
		}
	}

	fn assemble_url(
		&self,
		ctx: &RequestContext,
		options: &RequestOptions,
		logical_path: &str,
	) -> Result<Url> {
		let mut url = self.config.base_url.join(logical_path)?;

		if ctx.method == Method::GET {
			let mut query = url.query_pairs_mut();

			for (key, value) in &ctx.params {
				query.append_pair(key, &query_value(value));
			}

			if !options.hide_times {
				query.append_pair("_r", &rand::rng().random::<u32>().to_string());
			}
		}

		Ok(url)
	}

	fn base_headers(&self, ctx: &RequestContext) -> Vec<(String, String)> {
		let mut headers = Vec::new();

		if let Some(token) = self.cache.get_str(keys::TOKEN) {
			headers.push(("token".into(), token.clone()));
			headers.push(("access-token".into(), token));
		}

		headers.push(("terminal".into(), self.config.terminal.as_header().into()));

		if let Some(language) = &self.config.language {
			headers.push(("language".into(), language.clone()));
		}

		headers.extend(ctx.headers.iter().cloned());
		headers
	}
}

enum BodyKind {
	Json(Map<String, Value>),
	Form(Map<String, Value>),
	Blob(Vec<u8>),
}

struct ExecuteArgs {
	client: Client,
	method: Method,
	url: Url,
	headers: Vec<(String, String)>,
	body: Option<BodyKind>,
	response_type: ResponseType,
	timeout: Duration,
	catches: bool,
	cancel: Option<CancelToken>,
	progress: Option<ProgressHook>,
	after: Vec<Arc<dyn AfterReturning>>,
}

async fn execute(args: ExecuteArgs) -> Result<Envelope> {
	let ExecuteArgs {
		client,
		method,
		url,
		headers,
		body,
		response_type,
		timeout,
		catches,
		cancel,
		progress,
		after,
	} = args;
	let mut builder = client.request(method, url).timeout(timeout);

	for (name, value) in headers {
		builder = builder.header(name, value);
	}

	builder = match body {
		Some(BodyKind::Json(map)) => builder.json(&map),
		Some(BodyKind::Form(map)) => builder.form(&map),
		Some(BodyKind::Blob(bytes)) =>
			builder.header(http::header::CONTENT_TYPE, "application/octet-stream").body(bytes),
		None => builder,
	};

	let send = builder.send();
	let response = if let Some(token) = &cancel {
		tokio::select! {
			_ = token.canceled() => return Err(Error::Canceled(Envelope::canceled(0))),
			response = send => response,
		}
	} else {
		send.await
	};
	let response = match response {
		Ok(response) => response,
		Err(err) => {
			// Transport failure without an envelope.
			let code = err.status().map(|status| status.as_u16() as i64).unwrap_or(0);
			let envelope =
				Envelope { code, data: json!({}), desc: err.to_string(), bytes: None };

			return if catches { Ok(envelope) } else { Err(Error::Api(envelope)) };
		},
	};
	let status = response.status();

	match response_type {
		ResponseType::Json => {
			let bytes = response.bytes().await?;

			match serde_json::from_slice::<Envelope>(&bytes) {
				Ok(mut envelope) => {
					for hook in &after {
						if hook.call(&mut envelope).await == Flow::Halt {
							return if catches { Ok(envelope) } else { Err(Error::Api(envelope)) };
						}
					}

					if envelope.is_success() || catches {
						Ok(envelope)
					} else {
						Err(Error::Api(envelope))
					}
				},
				Err(_) if status.is_success() => {
					let data = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);

					Ok(Envelope {
						code: status.as_u16() as _,
						data,
						desc: status.canonical_reason().unwrap_or_default().into(),
						bytes: None,
					})
				},
				Err(_) => {
					let envelope = Envelope::from_status(status);

					if catches { Ok(envelope) } else { Err(Error::Api(envelope)) }
				},
			}
		},
		ResponseType::Text | ResponseType::Document => {
			let text = response.text().await?;

			if status.is_success() {
				Ok(Envelope {
					code: status.as_u16() as _,
					data: Value::String(text),
					desc: status.canonical_reason().unwrap_or_default().into(),
					bytes: None,
				})
			} else {
				let envelope = Envelope::from_status(status);

				if catches { Ok(envelope) } else { Err(Error::Api(envelope)) }
			}
		},
		_ => {
			if !status.is_success() {
				let envelope = Envelope::from_status(status);

				return if catches { Ok(envelope) } else { Err(Error::Api(envelope)) };
			}

			let total = response.content_length();
			let mut stream = response.bytes_stream();
			let mut buffer = Vec::new();

			// Cancellation also interrupts an in-flight body read.
			loop {
				let chunk = if let Some(token) = &cancel {
					tokio::select! {
						_ = token.canceled() =>
							return Err(Error::Canceled(Envelope::canceled(status.as_u16() as _))),
						chunk = stream.next() => chunk,
					}
				} else {
					stream.next().await
				};
				let Some(chunk) = chunk else {
					break;
				};
				let chunk = chunk?;

				buffer.extend_from_slice(&chunk);

				if let Some(hook) = &progress {
					hook(buffer.len() as u64, total);
				}
			}

			Ok(Envelope {
				code: status.as_u16() as _,
				data: Value::Null,
				desc: status.canonical_reason().unwrap_or_default().into(),
				bytes: Some(Bytes::from(buffer)),
			})
		},
	}
}

fn strip_nulls(params: Map<String, Value>) -> Map<String, Value> {
	params.into_iter().filter(|(_, value)| !value.is_null()).collect()
}

fn filter_reserved(headers: Vec<(String, String)>) -> Vec<(String, String)> {
	headers
		.into_iter()
		.filter(|(name, _)| {
			!RESERVED_HEADERS.iter().any(|reserved| name.eq_ignore_ascii_case(reserved))
		})
		.collect()
}

fn rewrite_path(path: &str, options: &RequestOptions, api_root: ApiRoot) -> String {
	match &options.api_change {
		Some(prefix) => format!("/api/{prefix}{path}"),
		None => format!("{}{path}", api_root.as_path()),
	}
}

fn body_of(ctx: &RequestContext, options: &RequestOptions) -> Option<BodyKind> {
	if ctx.method == Method::GET {
		return None;
	}

	if options.using_blob {
		Some(BodyKind::Blob(Value::Object(ctx.params.clone()).to_string().into_bytes()))
	} else if options.using_form_data {
		Some(BodyKind::Form(ctx.params.clone()))
	} else {
		Some(BodyKind::Json(ctx.params.clone()))
	}
}

fn query_value(value: &Value) -> String {
	match value {
		Value::String(text) => text.clone(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn null_params_are_stripped() {
		let params = [("a".to_string(), json!(1)), ("b".to_string(), Value::Null)]
			.into_iter()
			.collect::<Map<_, _>>();
		let stripped = strip_nulls(params);

		assert_eq!(stripped.len(), 1);
		assert!(stripped.contains_key("a"));
	}

	#[test]
	fn reserved_headers_are_dropped_case_insensitively() {
		let headers = vec![
			("Access-Token".to_string(), "x".to_string()),
			("terminal".to_string(), "x".to_string()),
			("TOKEN".to_string(), "x".to_string()),
			("x-custom".to_string(), "kept".to_string()),
		];
		let filtered = filter_reserved(headers);

		assert_eq!(filtered, vec![("x-custom".to_string(), "kept".to_string())]);
	}

	#[test]
	fn api_change_rewrites_the_path() {
		let plain = rewrite_path("/v2/client/getClientId", &RequestOptions::default(), ApiRoot::Api);
		let alt = rewrite_path("/v2/client/getClientId", &RequestOptions::default(), ApiRoot::Api2);
		let prefixed =
			rewrite_path("/v2/client/getClientId", &RequestOptions::with_api_change(), ApiRoot::Api);

		assert_eq!(plain, "/api/v2/client/getClientId");
		assert_eq!(alt, "/api2/v2/client/getClientId");
		assert_eq!(prefixed, "/api/building/v2/client/getClientId");
	}
}
