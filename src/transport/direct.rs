//! Direct transport: this realm owns the MQTT client.

// std
use std::sync::{
	Mutex,
	atomic::{AtomicBool, Ordering},
};
// crates.io
use async_trait::async_trait;
use rumqttc::{
	AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet, QoS,
	SubscribeFilter, SubscribeReasonCode,
};
use tokio::{task::JoinHandle, time};
// self
use crate::{
	_prelude::*,
	transport::{
		ConnectSettings, Transport,
		event::{EventCallback, EventListeners, ListenerId, TransportEvent, TransportEventKind},
	},
};

#[derive(Default)]
struct Flags {
	connected: AtomicBool,
	reconnecting: AtomicBool,
	ended: AtomicBool,
}

/// Transport wrapping a single MQTT client owned by this realm.
pub struct DirectTransport {
	settings: ConnectSettings,
	listeners: Arc<EventListeners>,
	flags: Arc<Flags>,
	client: Mutex<Option<AsyncClient>>,
	pump: Mutex<Option<JoinHandle<()>>>,
}
impl DirectTransport {
	/// Create a transport; no broker traffic happens until [`connect`].
	///
	/// [`connect`]: Transport::connect
	pub fn new(settings: ConnectSettings) -> Self {
		Self {
			settings,
			listeners: Arc::new(EventListeners::new()),
			flags: Arc::new(Flags::default()),
			client: Mutex::new(None),
			pump: Mutex::new(None),
		}
	}

	fn take_client(&self) -> Option<AsyncClient> {
		self.client.lock().expect("client lock poisoned").take()
	}

	fn abort_pump(&self) {
		if let Some(handle) = self.pump.lock().expect("pump lock poisoned").take() {
			handle.abort();
		}
	}
}
#[async_trait]
impl Transport for DirectTransport {
	async fn connect(&self) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}
		if self.client.lock().expect("client lock poisoned").is_some() {
			return Ok(());
		}

		let (client, eventloop) = AsyncClient::new(self.settings.mqtt_options(), 64);

		*self.client.lock().expect("client lock poisoned") = Some(client.clone());
		self.flags.ended.store(false, Ordering::SeqCst);

		let handle = tokio::spawn(pump(
			eventloop,
			client,
			self.listeners.clone(),
			self.flags.clone(),
			self.settings.reconnect_period(),
			self.settings.connect_timeout(),
		));

		*self.pump.lock().expect("pump lock poisoned") = Some(handle);

		Ok(())
	}

	async fn end(&self, force: bool) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		let Some(client) = self.take_client() else {
			return Ok(());
		};

		self.flags.ended.store(true, Ordering::SeqCst);

		if force {
			self.abort_pump();

			let _ = client.try_disconnect();
		} else {
			let _ = client.disconnect().await;

			self.abort_pump();
		}

		self.flags.connected.store(false, Ordering::SeqCst);
		self.flags.reconnecting.store(false, Ordering::SeqCst);
		self.listeners.dispatch(&TransportEvent::End);

		Ok(())
	}

	async fn reconnect(&self) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		if let Some(client) = self.take_client() {
			self.flags.ended.store(true, Ordering::SeqCst);

			let _ = client.try_disconnect();

			self.abort_pump();
		}

		self.flags.reconnecting.store(true, Ordering::SeqCst);
		self.listeners.dispatch(&TransportEvent::Reconnect);
		self.connect().await
	}

	async fn subscribe(&self, topics: Vec<String>) -> Result<()> {
		if self.is_guest() || topics.is_empty() {
			return Ok(());
		}

		let client = self.client.lock().expect("client lock poisoned").clone();
		let Some(client) = client else {
			self.listeners
				.dispatch(&TransportEvent::SubscribeReject { error: "not connected".into() });

			return Ok(());
		};
		let filters = topics
			.into_iter()
			.map(|topic| SubscribeFilter::new(topic, QoS::AtLeastOnce))
			.collect::<Vec<_>>();

		if let Err(err) = client.subscribe_many(filters).await {
			self.listeners.dispatch(&TransportEvent::SubscribeReject { error: err.to_string() });
		}

		Ok(())
	}

	async fn unsubscribe(&self, topics: Vec<String>) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		let client = self.client.lock().expect("client lock poisoned").clone();
		let Some(client) = client else {
			return Ok(());
		};

		for topic in topics {
			if let Err(err) = client.unsubscribe(&topic).await {
				self.listeners.dispatch(&TransportEvent::Error { message: err.to_string() });
			}
		}

		Ok(())
	}

	async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<()> {
		if self.is_guest() {
			return Ok(());
		}

		let client = self.client.lock().expect("client lock poisoned").clone();
		let Some(client) = client else {
			return Ok(());
		};

		if let Err(err) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
			self.listeners.dispatch(&TransportEvent::Error { message: err.to_string() });
		}

		Ok(())
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

async fn pump(
	mut eventloop: EventLoop,
	client: AsyncClient,
	listeners: Arc<EventListeners>,
	flags: Arc<Flags>,
	reconnect_period: Duration,
	connect_timeout: Duration,
) {
	let mut acked_once = false;

	loop {
		let polled = if acked_once {
			eventloop.poll().await
		} else {
			match time::timeout(connect_timeout, eventloop.poll()).await {
				Ok(polled) => polled,
				Err(_) => {
					fatal(&client, &listeners, &flags, "broker connect timed out").await;

					return;
				},
			}
		};

		match polled {
			Ok(Event::Incoming(Packet::ConnAck(ack))) => {
				if ack.code != ConnectReturnCode::Success {
					fatal(&client, &listeners, &flags, &format!("connection rejected: {:?}", ack.code))
						.await;

					return;
				}

				acked_once = true;
				flags.connected.store(true, Ordering::SeqCst);
				flags.reconnecting.store(false, Ordering::SeqCst);
				listeners.dispatch(&TransportEvent::Connect { session_present: ack.session_present });
			},
			Ok(Event::Incoming(Packet::Publish(publish))) => {
				listeners.dispatch(&TransportEvent::Message {
					topic: publish.topic.clone(),
					payload: publish.payload.clone(),
				});
			},
			Ok(Event::Incoming(Packet::SubAck(ack))) => {
				let rejected = ack
					.return_codes
					.iter()
					.any(|code| matches!(code, SubscribeReasonCode::Failure));

				if rejected {
					listeners.dispatch(&TransportEvent::SubscribeReject {
						error: "broker rejected subscription".into(),
					});
				} else {
					listeners.dispatch(&TransportEvent::SubscribeResolve {
						granted: ack.return_codes.iter().map(|code| format!("{code:?}")).collect(),
					});
				}
			},
			Ok(Event::Incoming(Packet::Disconnect)) => {
				listeners.dispatch(&TransportEvent::Disconnect);
			},
			Ok(Event::Incoming(_)) => {
				listeners.dispatch(&TransportEvent::PacketReceive);
			},
			Ok(Event::Outgoing(_)) => {
				listeners.dispatch(&TransportEvent::PacketSend);
			},
			Err(err) => {
				flags.connected.store(false, Ordering::SeqCst);

				if flags.ended.load(Ordering::SeqCst) {
					return;
				}

				if let ConnectionError::ConnectionRefused(code) = &err {
					fatal(&client, &listeners, &flags, &format!("connection refused: {code:?}"))
						.await;

					return;
				}

				tracing::debug!(error = %err, "broker connection lost, retrying");
				listeners.dispatch(&TransportEvent::Close);
				listeners.dispatch(&TransportEvent::Offline);
				flags.reconnecting.store(true, Ordering::SeqCst);
				listeners.dispatch(&TransportEvent::Reconnect);
				time::sleep(reconnect_period).await;
			},
		}
	}
}

// The fatal path both reports the error and ends the client; the resulting
// extra end is observable and kept.
async fn fatal(client: &AsyncClient, listeners: &Arc<EventListeners>, flags: &Arc<Flags>, message: &str) {
	tracing::warn!(%message, "direct transport failed");
	listeners.dispatch(&TransportEvent::Error { message: message.into() });

	let _ = client.try_disconnect();

	flags.connected.store(false, Ordering::SeqCst);
	flags.reconnecting.store(false, Ordering::SeqCst);
	flags.ended.store(true, Ordering::SeqCst);
	listeners.dispatch(&TransportEvent::End);
	listeners.clear();
}
