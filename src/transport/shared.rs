//! Hub-mediated transport: the realm shares the one MQTT client owned by
//! the hub actor, speaking the port protocol instead of the wire.

// std
use std::sync::{
	Mutex,
	atomic::{AtomicBool, Ordering},
};
// crates.io
use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	hub::{Hub, PortId},
	transport::{
		ConnectSettings, Transport,
		event::{EventCallback, EventListeners, ListenerId, TransportEvent, TransportEventKind},
		protocol::{HubAction, HubFeedback},
	},
};

#[derive(Default)]
struct Flags {
	connected: AtomicBool,
	reconnecting: AtomicBool,
}

/// Transport backed by a port onto the [`Hub`].
///
/// Keeps local `connected`/`reconnecting` shadow flags updated from hub
/// feedback and re-dispatches every feedback as a [`TransportEvent`].
pub struct HubTransport {
	hub: Hub,
	port: PortId,
	settings: ConnectSettings,
	listeners: Arc<EventListeners>,
	flags: Arc<Flags>,
	pump: Mutex<Option<JoinHandle<()>>>,
	detached: AtomicBool,
}
impl HubTransport {
	/// Attach a new port to the hub.
	pub async fn attach(hub: Hub, settings: ConnectSettings) -> Result<Arc<Self>> {
		let (port, mut feedback) = hub.attach().await?;
		let transport = Arc::new(Self {
			hub,
			port,
			settings,
			listeners: Arc::new(EventListeners::new()),
			flags: Arc::new(Flags::default()),
			pump: Mutex::new(None),
			detached: AtomicBool::new(false),
		});
		let listeners = transport.listeners.clone();
		let flags = transport.flags.clone();
		let handle = tokio::spawn(async move {
			while let Some(feedback) = feedback.recv().await {
				apply(&listeners, &flags, feedback);
			}
		});

		*transport.pump.lock().expect("pump lock poisoned") = Some(handle);

		Ok(transport)
	}

	/// Announce the realm is going away and close the port.
	///
	/// Idempotent; the unload hook may fire more than once.
	pub fn detach(&self) {
		if self.detached.swap(true, Ordering::SeqCst) {
			return;
		}

		let _ = self.hub.post(self.port, HubAction::Detach);

		self.hub.detach(self.port);

		if let Some(handle) = self.pump.lock().expect("pump lock poisoned").take() {
			handle.abort();
		}
	}
}
#[async_trait]
impl Transport for HubTransport {
	async fn connect(&self) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		self.hub.post(self.port, HubAction::MqttConnect { settings: self.settings.clone() })
	}

	// A graceful end only takes this realm off the hub; the session-over
	// broadcast that empties every port is reserved for the forced path.
	async fn end(&self, force: bool) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		if force {
			self.hub.post(self.port, HubAction::MqttEnd { force })?;
		} else {
			self.detach();
			self.flags.connected.store(false, Ordering::SeqCst);
			self.flags.reconnecting.store(false, Ordering::SeqCst);
			self.listeners.dispatch(&TransportEvent::End);
		}

		Ok(())
	}

	async fn reconnect(&self) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		self.hub.post(self.port, HubAction::MqttReconnect)
	}

	async fn subscribe(&self, topics: Vec<String>) -> Result<()> {
		if self.is_guest() || topics.is_empty() {
			return Ok(());
		}

		self.hub.post(self.port, HubAction::MqttSubscribe { topics })
	}

	async fn unsubscribe(&self, topics: Vec<String>) -> Result<()> {
		if self.is_guest() || topics.is_empty() {
			return Ok(());
		}

		self.hub.post(self.port, HubAction::MqttUnsubscribe { topics })
	}

	async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		self.hub.post(self.port, HubAction::MqttPublish { topic, payload })
	}

	fn add_listener(&self, kind: TransportEventKind, callback: EventCallback) -> ListenerId {
		self.listeners.add(kind, callback)
	}

	fn remove_listener(&self, kind: TransportEventKind, id: ListenerId) {
		self.listeners.remove(kind, id);
	}

	fn client_id(&self) -> String {
		self.settings.client_id.clone()
	}

	fn connected(&self) -> bool {
		self.flags.connected.load(Ordering::SeqCst)
	}

	fn reconnecting(&self) -> bool {
		self.flags.reconnecting.load(Ordering::SeqCst)
	}
}
impl Drop for HubTransport {
	fn drop(&mut self) {
		if let Some(handle) = self.pump.lock().expect("pump lock poisoned").take() {
			handle.abort();
		}
	}
}

fn apply(listeners: &Arc<EventListeners>, flags: &Arc<Flags>, feedback: HubFeedback) {
	match feedback {
		HubFeedback::MqttConnect { connack } => {
			flags.connected.store(true, Ordering::SeqCst);
			flags.reconnecting.store(false, Ordering::SeqCst);
			listeners
				.dispatch(&TransportEvent::Connect { session_present: connack.session_present });
		},
		HubFeedback::MqttReconnect => {
			flags.reconnecting.store(true, Ordering::SeqCst);
			listeners.dispatch(&TransportEvent::Reconnect);
		},
		HubFeedback::MqttClose => {
			flags.connected.store(false, Ordering::SeqCst);
			listeners.dispatch(&TransportEvent::Close);
		},
		HubFeedback::MqttDisconnect => {
			listeners.dispatch(&TransportEvent::Disconnect);
		},
		HubFeedback::MqttOffline => {
			flags.connected.store(false, Ordering::SeqCst);
			listeners.dispatch(&TransportEvent::Offline);
		},
		HubFeedback::MqttError { error } => {
			listeners.dispatch(&TransportEvent::Error { message: error });
		},
		HubFeedback::MqttEnd => {
			flags.connected.store(false, Ordering::SeqCst);
			flags.reconnecting.store(false, Ordering::SeqCst);
			listeners.dispatch(&TransportEvent::End);
		},
		HubFeedback::MqttMessage { topic, payload } => {
			listeners.dispatch(&TransportEvent::Message { topic, payload: Bytes::from(payload) });
		},
		HubFeedback::MqttSubscribeResolve { granted } => {
			listeners.dispatch(&TransportEvent::SubscribeResolve { granted });
		},
		HubFeedback::MqttSubscribeReject { error } => {
			listeners.dispatch(&TransportEvent::SubscribeReject { error });
		},
	}
}
