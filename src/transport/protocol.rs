//! Wire protocol spoken across the hub port boundary.
//!
//! Every message serializes as `{type, args}`; the two enums are the closed
//! action/feedback sets. The protocol stays serde round-trippable so the
//! port can later cross a process boundary without changing the contract.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::transport::ConnectSettings;

/// Connection acknowledgement relayed to ports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnAckInfo {
	/// Whether the broker resumed an existing session.
	pub session_present: bool,
	/// MQTT 3.1.1 connect return code; `0` means accepted.
	pub code: u8,
}
impl ConnAckInfo {
	/// The synthetic acknowledgement unicast to late joiners.
	pub fn accepted() -> Self {
		Self { session_present: false, code: 0 }
	}
}

/// Realm → hub requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum HubAction {
	/// Open (or join) the shared broker connection.
	MqttConnect {
		/// Connection parameters; the first settler's settings win.
		settings: ConnectSettings,
	},
	/// Close the shared connection for every port.
	MqttEnd {
		/// Skip the graceful goodbye.
		force: bool,
	},
	/// Publish through the shared connection.
	MqttPublish {
		/// Target topic.
		topic: String,
		/// Raw payload.
		payload: Vec<u8>,
	},
	/// Tear down and re-open the shared connection.
	MqttReconnect,
	/// Subscribe; already-subscribed topics produce no broker traffic.
	MqttSubscribe {
		/// Requested topics.
		topics: Vec<String>,
	},
	/// Unsubscribe; only previously subscribed topics reach the broker.
	MqttUnsubscribe {
		/// Topics to drop.
		topics: Vec<String>,
	},
	/// The realm is going away; close its port.
	Detach,
}

/// Hub → realm feedback.
// Variant names mirror the wire protocol's closed feedback set.
#[allow(clippy::enum_variant_names)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum HubFeedback {
	/// Broker acknowledged the connection (real or synthetic for late
	/// joiners).
	MqttConnect {
		/// Acknowledgement detail.
		connack: ConnAckInfo,
	},
	/// A reconnect cycle started.
	MqttReconnect,
	/// The network connection closed.
	MqttClose,
	/// The broker requested a disconnect.
	MqttDisconnect,
	/// The shared client went offline.
	MqttOffline,
	/// A transport-level failure.
	MqttError {
		/// Failure description.
		error: String,
	},
	/// The shared connection ended; the session is over for every port.
	MqttEnd,
	/// An application message arrived.
	MqttMessage {
		/// Full broker topic.
		topic: String,
		/// Raw payload.
		payload: Vec<u8>,
	},
	/// The broker granted a subscription.
	MqttSubscribeResolve {
		/// Granted topics.
		granted: Vec<String>,
	},
	/// The broker or client rejected a subscription.
	MqttSubscribeReject {
		/// Failure description.
		error: String,
	},
}
