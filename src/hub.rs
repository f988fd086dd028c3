//! Cross-realm hub: the one process-wide owner of the real MQTT client.
//!
//! Realms attach ports and speak the [`HubAction`]/[`HubFeedback`] protocol;
//! the actor deduplicates topic subscriptions and fans broker events out to
//! every live port.

// std
use std::{
	collections::{HashMap, HashSet},
	sync::atomic::{AtomicBool, Ordering},
};
// crates.io
use async_trait::async_trait;
use rumqttc::{
	AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS, SubscribeFilter,
};
use tokio::{
	sync::{mpsc, oneshot},
	time,
};
// self
use crate::{
	_prelude::*,
	transport::{
		ConnectSettings,
		protocol::{ConnAckInfo, HubAction, HubFeedback},
	},
};

/// Handle identifying one attached port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortId(u64);

/// Live broker connection owned by the hub.
#[async_trait]
pub trait BrokerLink: Send + Sync {
	/// Subscribe to topics at QoS 1.
	async fn subscribe(&self, topics: Vec<String>) -> Result<()>;

	/// Drop subscriptions.
	async fn unsubscribe(&self, topics: Vec<String>) -> Result<()>;

	/// Publish a payload.
	async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<()>;

	/// Close the connection.
	async fn disconnect(&self) -> Result<()>;
}

/// Factory building a [`BrokerLink`]; broker events flow back through the
/// supplied feedback sender.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
	/// Open a broker connection.
	async fn connect(
		&self,
		settings: &ConnectSettings,
		feedback: mpsc::UnboundedSender<HubFeedback>,
	) -> Result<Box<dyn BrokerLink>>;
}

enum Command {
	Attach { reply: oneshot::Sender<(PortId, mpsc::UnboundedReceiver<HubFeedback>)> },
	Detach { port: PortId },
	Action { port: PortId, action: HubAction },
	Link { epoch: u64, feedback: HubFeedback },
	LinkReady { epoch: u64, result: std::result::Result<Box<dyn BrokerLink>, String> },
	PortCount { reply: oneshot::Sender<usize> },
}

/// Cloneable handle onto the hub actor.
#[derive(Clone)]
pub struct Hub {
	tx: mpsc::UnboundedSender<Command>,
}
impl Hub {
	/// Spawn the actor over the given broker connector.
	pub fn spawn(connector: Arc<dyn BrokerConnector>) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let actor = Actor {
			connector,
			tx: tx.clone(),
			ports: HashMap::new(),
			subscribed: HashSet::new(),
			settings: None,
			is_setting_up: false,
			is_settled: false,
			link: None,
			epoch: 0,
			next_port: 0,
		};

		tokio::spawn(actor.run(rx));

		Self { tx }
	}

	/// Attach a new port, receiving its feedback stream.
	pub async fn attach(&self) -> Result<(PortId, mpsc::UnboundedReceiver<HubFeedback>)> {
		let (reply, response) = oneshot::channel();

		self.tx
			.send(Command::Attach { reply })
			.map_err(|_| Error::Hub("hub actor is gone".into()))?;
		response.await.map_err(|_| Error::Hub("hub actor is gone".into()))
	}

	/// Close a port.
	pub fn detach(&self, port: PortId) {
		let _ = self.tx.send(Command::Detach { port });
	}

	/// Post an action on behalf of a port.
	pub fn post(&self, port: PortId, action: HubAction) -> Result<()> {
		self.tx
			.send(Command::Action { port, action })
			.map_err(|_| Error::Hub("hub actor is gone".into()))
	}

	/// Number of currently attached ports.
	pub async fn port_count(&self) -> usize {
		let (reply, response) = oneshot::channel();

		if self.tx.send(Command::PortCount { reply }).is_err() {
			return 0;
		}

		response.await.unwrap_or(0)
	}
}

struct Actor {
	connector: Arc<dyn BrokerConnector>,
	tx: mpsc::UnboundedSender<Command>,
	ports: HashMap<PortId, mpsc::UnboundedSender<HubFeedback>>,
	subscribed: HashSet<String>,
	settings: Option<ConnectSettings>,
	is_setting_up: bool,
	is_settled: bool,
	link: Option<Box<dyn BrokerLink>>,
	// Bumped on every setup; stale link feedback is dropped by epoch.
	epoch: u64,
	next_port: u64,
}
impl Actor {
	async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
		while let Some(command) = rx.recv().await {
			self.handle(command).await;
		}
	}

	async fn handle(&mut self, command: Command) {
		match command {
			Command::Attach { reply } => {
				let port = PortId(self.next_port);
				let (tx, rx) = mpsc::unbounded_channel();

				self.next_port += 1;
				self.ports.insert(port, tx);

				let _ = reply.send((port, rx));
			},
			Command::Detach { port } => {
				self.ports.remove(&port);
			},
			Command::Action { port, action } => self.action(port, action).await,
			Command::Link { epoch, feedback } => {
				// Feedback from a link that has since been replaced.
				if epoch != self.epoch {
					return;
				}

				match feedback {
					HubFeedback::MqttEnd => self.shutdown(),
					HubFeedback::MqttConnect { connack } => {
						// Settlement waits for the broker's real acknowledgement,
						// not for client construction.
						tracing::debug!("hub link settled");
						self.is_settled = true;
						self.is_setting_up = false;
						self.broadcast(HubFeedback::MqttConnect { connack });
					},
					other => self.broadcast(other),
				}
			},
			Command::LinkReady { epoch, result } => {
				if epoch != self.epoch {
					return;
				}

				match result {
					Ok(link) => {
						// The client exists but is not acked yet; `is_setting_up`
						// stays true so racing connects keep no-oping.
						self.link = Some(link);
					},
					Err(error) => {
						tracing::warn!(%error, "hub link setup failed");
						self.is_setting_up = false;
						self.broadcast(HubFeedback::MqttError { error });
					},
				}
			},
			Command::PortCount { reply } => {
				let _ = reply.send(self.ports.len());
			},
		}
	}

	async fn action(&mut self, port: PortId, action: HubAction) {
		match action {
			HubAction::MqttConnect { settings } => {
				if self.is_setting_up {
					return;
				}
				if self.is_settled {
					// The client already exists; acknowledge the newcomer only.
					self.unicast(port, HubFeedback::MqttConnect { connack: ConnAckInfo::accepted() });

					return;
				}

				self.settings = Some(settings.clone());
				self.begin_setup(settings);
			},
			HubAction::MqttEnd { force } => {
				if let Some(link) = self.link.take() {
					if !force {
						let _ = link.disconnect().await;
					}
				}

				self.shutdown();
			},
			HubAction::MqttReconnect => {
				if let Some(link) = self.link.take() {
					let _ = link.disconnect().await;
				}

				self.is_settled = false;
				self.subscribed.clear();
				self.broadcast(HubFeedback::MqttReconnect);

				if let Some(settings) = self.settings.clone() {
					self.begin_setup(settings);
				}
			},
			HubAction::MqttSubscribe { topics } => {
				let fresh = topics
					.into_iter()
					.filter(|topic| !self.subscribed.contains(topic))
					.collect::<Vec<_>>();

				if fresh.is_empty() {
					self.unicast(port, HubFeedback::MqttSubscribeResolve { granted: Vec::new() });

					return;
				}

				let Some(link) = &self.link else {
					self.unicast(
						port,
						HubFeedback::MqttSubscribeReject { error: "not connected".into() },
					);

					return;
				};

				match link.subscribe(fresh.clone()).await {
					Ok(()) => {
						self.subscribed.extend(fresh.iter().cloned());
						self.broadcast(HubFeedback::MqttSubscribeResolve { granted: fresh });
					},
					Err(err) => {
						self.broadcast(HubFeedback::MqttSubscribeReject { error: err.to_string() });
					},
				}
			},
			HubAction::MqttUnsubscribe { topics } => {
				let known = topics
					.into_iter()
					.filter(|topic| self.subscribed.remove(topic))
					.collect::<Vec<_>>();

				if known.is_empty() {
					return;
				}
				if let Some(link) = &self.link
					&& let Err(err) = link.unsubscribe(known).await
				{
					self.broadcast(HubFeedback::MqttError { error: err.to_string() });
				}
			},
			HubAction::MqttPublish { topic, payload } => {
				if let Some(link) = &self.link
					&& let Err(err) = link.publish(topic, payload).await
				{
					self.broadcast(HubFeedback::MqttError { error: err.to_string() });
				}
			},
			HubAction::Detach => {
				self.ports.remove(&port);
			},
		}
	}

	fn begin_setup(&mut self, settings: ConnectSettings) {
		self.is_setting_up = true;
		self.epoch += 1;

		let epoch = self.epoch;
		let connector = self.connector.clone();
		let tx = self.tx.clone();

		tokio::spawn(async move {
			let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();

			match connector.connect(&settings, feedback_tx).await {
				Ok(link) => {
					let _ = tx.send(Command::LinkReady { epoch, result: Ok(link) });

					while let Some(feedback) = feedback_rx.recv().await {
						if tx.send(Command::Link { epoch, feedback }).is_err() {
							break;
						}
					}
				},
				Err(err) => {
					let _ = tx.send(Command::LinkReady { epoch, result: Err(err.to_string()) });
				},
			}
		});
	}

	// Session-over for every port: broadcast, drop everything, reset flags.
	fn shutdown(&mut self) {
		self.broadcast(HubFeedback::MqttEnd);
		self.ports.clear();
		self.subscribed.clear();
		self.is_setting_up = false;
		self.is_settled = false;
		self.link = None;
	}

	fn broadcast(&mut self, feedback: HubFeedback) {
		self.ports.retain(|_, tx| tx.send(feedback.clone()).is_ok());
	}

	fn unicast(&self, port: PortId, feedback: HubFeedback) {
		if let Some(tx) = self.ports.get(&port) {
			let _ = tx.send(feedback);
		}
	}
}

/// Production [`BrokerConnector`] over rumqttc.
#[derive(Debug, Default)]
pub struct RumqttcConnector;
#[async_trait]
impl BrokerConnector for RumqttcConnector {
	async fn connect(
		&self,
		settings: &ConnectSettings,
		feedback: mpsc::UnboundedSender<HubFeedback>,
	) -> Result<Box<dyn BrokerLink>> {
		let (client, eventloop) = AsyncClient::new(settings.mqtt_options(), 64);
		let ended = Arc::new(AtomicBool::new(false));

		tokio::spawn(link_pump(
			eventloop,
			feedback,
			ended.clone(),
			settings.reconnect_period(),
			settings.connect_timeout(),
		));

		Ok(Box::new(RumqttcLink { client, ended }))
	}
}

struct RumqttcLink {
	client: AsyncClient,
	ended: Arc<AtomicBool>,
}
#[async_trait]
impl BrokerLink for RumqttcLink {
	async fn subscribe(&self, topics: Vec<String>) -> Result<()> {
		let filters = topics
			.into_iter()
			.map(|topic| SubscribeFilter::new(topic, QoS::AtLeastOnce))
			.collect::<Vec<_>>();

		self.client.subscribe_many(filters).await.map_err(Into::into)
	}

	async fn unsubscribe(&self, topics: Vec<String>) -> Result<()> {
		for topic in topics {
			self.client.unsubscribe(topic).await?;
		}

		Ok(())
	}

	async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<()> {
		self.client.publish(topic, QoS::AtLeastOnce, false, payload).await.map_err(Into::into)
	}

	async fn disconnect(&self) -> Result<()> {
		self.ended.store(true, Ordering::SeqCst);
		self.client.disconnect().await.map_err(Into::into)
	}
}

async fn link_pump(
	mut eventloop: EventLoop,
	feedback: mpsc::UnboundedSender<HubFeedback>,
	ended: Arc<AtomicBool>,
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
					let _ = feedback
						.send(HubFeedback::MqttError { error: "broker connect timed out".into() });
					let _ = feedback.send(HubFeedback::MqttEnd);

					return;
				},
			}
		};

		match polled {
			Ok(Event::Incoming(Packet::ConnAck(ack))) => {
				if ack.code != ConnectReturnCode::Success {
					let _ = feedback.send(HubFeedback::MqttError {
						error: format!("connection rejected: {:?}", ack.code),
					});
					let _ = feedback.send(HubFeedback::MqttEnd);

					return;
				}

				acked_once = true;

				let _ = feedback.send(HubFeedback::MqttConnect {
					connack: ConnAckInfo { session_present: ack.session_present, code: 0 },
				});
			},
			Ok(Event::Incoming(Packet::Publish(publish))) => {
				let _ = feedback.send(HubFeedback::MqttMessage {
					topic: publish.topic.clone(),
					payload: publish.payload.to_vec(),
				});
			},
			Ok(Event::Incoming(Packet::Disconnect)) => {
				let _ = feedback.send(HubFeedback::MqttDisconnect);
			},
			Ok(_) => {},
			Err(err) => {
				if ended.load(Ordering::SeqCst) {
					let _ = feedback.send(HubFeedback::MqttEnd);

					return;
				}

				tracing::debug!(error = %err, "hub broker connection lost, retrying");

				let _ = feedback.send(HubFeedback::MqttClose);
				let _ = feedback.send(HubFeedback::MqttOffline);
				let _ = feedback.send(HubFeedback::MqttReconnect);

				time::sleep(reconnect_period).await;
			},
		}
	}
}
