//! Transport contract shared by the direct and hub-mediated variants.

pub mod direct;
pub mod event;
pub mod protocol;
pub mod shared;

// crates.io
use async_trait::async_trait;
use rumqttc::{LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	transport::event::{EventCallback, ListenerId, TransportEventKind},
};

/// Root all client subscription topics hang off.
pub const TOPIC_ROOT: &str = "iot/v1/c";
/// Sentinel client id meaning "no authenticated session yet".
pub const GUEST_CLIENT_ID: &str = "guest";

/// Compose the full topic for a subject under a client id.
pub fn topic_for(client_id: &str, subject: &str) -> String {
	format!("{TOPIC_ROOT}/{client_id}/{subject}")
}

/// Recover the subject portion of a topic, if it belongs to the client id.
pub fn subject_of(client_id: &str, topic: &str) -> Option<String> {
	topic.strip_prefix(&format!("{TOPIC_ROOT}/{client_id}/")).map(|subject| subject.to_string())
}

/// Last-will description carried in the connect settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WillMessage {
	/// Topic the broker publishes on unclean disconnect.
	pub topic: String,
	/// Will payload.
	pub payload: Vec<u8>,
}

/// Broker connection parameters, wire-serializable so they can cross the
/// hub port boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectSettings {
	/// Broker endpoint, e.g. `wss://host/mqtt`.
	pub broker_url: Url,
	/// MQTT client identifier; also used as the username.
	pub client_id: String,
	/// Broker username.
	pub username: String,
	/// Broker password.
	pub password: String,
	/// Keep-alive interval in seconds.
	pub keep_alive_secs: u64,
	/// Whether to request a clean session.
	pub clean_session: bool,
	/// Delay between reconnect attempts, in seconds.
	pub reconnect_secs: u64,
	/// Initial connect deadline, in seconds.
	pub connect_timeout_secs: u64,
	/// Optional will message, published at QoS 1.
	pub will: Option<WillMessage>,
}
impl ConnectSettings {
	/// Settings with the deployment defaults (keep-alive 60 s, clean
	/// session, reconnect 5 s, connect timeout 6 s).
	pub fn new(broker_url: Url, client_id: impl Into<String>) -> Self {
		let client_id = client_id.into();

		Self {
			broker_url,
			username: client_id.clone(),
			client_id,
			password: String::new(),
			keep_alive_secs: 60,
			clean_session: true,
			reconnect_secs: 5,
			connect_timeout_secs: 6,
			will: None,
		}
	}

	/// Whether the settings describe the unauthenticated sentinel.
	pub fn is_guest(&self) -> bool {
		self.client_id == GUEST_CLIENT_ID
	}

	pub(crate) fn reconnect_period(&self) -> Duration {
		Duration::from_secs(self.reconnect_secs)
	}

	pub(crate) fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.connect_timeout_secs)
	}

	/// Translate into MQTT 3.1.1 client options.
	pub(crate) fn mqtt_options(&self) -> MqttOptions {
		let url = &self.broker_url;
		let mut options = match url.scheme() {
			"ws" | "wss" => {
				let port = url.port_or_known_default().unwrap_or(443);
				let mut options = MqttOptions::new(&self.client_id, url.as_str(), port);

				if url.scheme() == "ws" {
					options.set_transport(rumqttc::Transport::Ws);
				} else {
					options.set_transport(rumqttc::Transport::wss_with_default_config());
				}

				options
			},
			_ => MqttOptions::new(
				&self.client_id,
				url.host_str().unwrap_or_default(),
				url.port().unwrap_or(1883),
			),
		};

		options.set_credentials(&self.username, &self.password);
		options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
		options.set_clean_session(self.clean_session);

		if let Some(will) = &self.will {
			options.set_last_will(LastWill::new(
				&will.topic,
				will.payload.clone(),
				QoS::AtLeastOnce,
				false,
			));
		}

		options
	}
}

/// The MQTT-bearing channel multiplexed across workers.
///
/// Transport failures surface as events, never as `Err` from `subscribe`
/// or `publish`; every outbound method short-circuits in guest mode.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Open the broker connection.
	async fn connect(&self) -> Result<()>;

	/// Close the broker connection. `force` skips the graceful goodbye.
	async fn end(&self, force: bool) -> Result<()>;

	/// Tear down and re-open the connection.
	async fn reconnect(&self) -> Result<()>;

	/// Subscribe to the given topics at QoS 1.
	async fn subscribe(&self, topics: Vec<String>) -> Result<()>;

	/// Drop subscriptions for the given topics.
	async fn unsubscribe(&self, topics: Vec<String>) -> Result<()>;

	/// Publish a payload on a topic.
	async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<()>;

	/// Register a listener for one event kind.
	fn add_listener(&self, kind: TransportEventKind, callback: EventCallback) -> ListenerId;

	/// Remove a previously registered listener.
	fn remove_listener(&self, kind: TransportEventKind, id: ListenerId);

	/// MQTT client identifier.
	fn client_id(&self) -> String;

	/// Whether the broker connection is currently up.
	fn connected(&self) -> bool;

	/// Whether a reconnect cycle is in progress.
	fn reconnecting(&self) -> bool;

	/// Whether the transport carries the unauthenticated sentinel id.
	fn is_guest(&self) -> bool {
		self.client_id() == GUEST_CLIENT_ID
	}

	/// Full topic for a subject under this transport's client id.
	fn topic_for(&self, subject: &str) -> String {
		topic_for(&self.client_id(), subject)
	}

	/// Subject portion of a topic under this transport's client id.
	fn subject_of(&self, topic: &str) -> Option<String> {
		subject_of(&self.client_id(), topic)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn topic_round_trips_through_subject() {
		let topic = topic_for("CID", "layout_device/status");

		assert_eq!(topic, "iot/v1/c/CID/layout_device/status");
		assert_eq!(subject_of("CID", &topic).as_deref(), Some("layout_device/status"));
	}

	#[test]
	fn foreign_topics_yield_no_subject() {
		assert_eq!(subject_of("CID", "iot/v1/c/OTHER/log/detail"), None);
		assert_eq!(subject_of("CID", "totally/unrelated"), None);
	}

	#[test]
	fn default_settings_match_the_deployment() {
		let settings =
			ConnectSettings::new("wss://broker.example/mqtt".parse().expect("url"), "CID");

		assert_eq!(settings.keep_alive_secs, 60);
		assert!(settings.clean_session);
		assert_eq!(settings.reconnect_secs, 5);
		assert_eq!(settings.connect_timeout_secs, 6);
		assert_eq!(settings.username, "CID");
	}
}
