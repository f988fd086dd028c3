//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the fan-out client.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	MqttClient(#[from] rumqttc::ClientError),
	#[error(transparent)]
	MqttOption(#[from] rumqttc::OptionError),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("API code {}: {}", .0.code, .0.desc)]
	Api(crate::http::Envelope),
	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Request canceled: code {}", .0.code)]
	Canceled(crate::http::Envelope),
	#[error("Hub error: {0}")]
	Hub(String),
	#[error("Rejected by request middleware")]
	Rejected,
	#[error("{0}")]
	Shared(Arc<Error>),
	#[error("Invalid {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// The API envelope carried by `Api`/`Canceled` errors, if any.
	pub fn envelope(&self) -> Option<&crate::http::Envelope> {
		match self {
			Self::Api(envelope) | Self::Canceled(envelope) => Some(envelope),
			Self::Shared(inner) => inner.envelope(),
			_ => None,
		}
	}
}
