//! Transport event set and uniform listener dispatch.

// std
use std::{
	collections::HashMap,
	sync::{
		Mutex,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use bytes::Bytes;
// self
use crate::_prelude::*;

/// Events emitted by a transport.
#[derive(Clone, Debug)]
pub enum TransportEvent {
	/// Broker acknowledged the connection.
	Connect {
		/// Whether the broker resumed an existing session.
		session_present: bool,
	},
	/// A reconnect cycle started.
	Reconnect,
	/// The network connection closed.
	Close,
	/// The broker requested a disconnect.
	Disconnect,
	/// The client went offline.
	Offline,
	/// A transport-level failure.
	Error {
		/// Failure description.
		message: String,
	},
	/// The connection ended for good.
	End,
	/// An application message arrived.
	Message {
		/// Full broker topic.
		topic: String,
		/// Raw payload.
		payload: Bytes,
	},
	/// A control packet left the client.
	PacketSend,
	/// A control packet reached the client.
	PacketReceive,
	/// The broker granted a subscription.
	SubscribeResolve {
		/// Granted topics.
		granted: Vec<String>,
	},
	/// The broker or client rejected a subscription.
	SubscribeReject {
		/// Failure description.
		error: String,
	},
}
impl TransportEvent {
	/// The kind used for listener registration.
	pub fn kind(&self) -> TransportEventKind {
		match self {
			Self::Connect { .. } => TransportEventKind::Connect,
			Self::Reconnect => TransportEventKind::Reconnect,
			Self::Close => TransportEventKind::Close,
			Self::Disconnect => TransportEventKind::Disconnect,
			Self::Offline => TransportEventKind::Offline,
			Self::Error { .. } => TransportEventKind::Error,
			Self::End => TransportEventKind::End,
			Self::Message { .. } => TransportEventKind::Message,
			Self::PacketSend => TransportEventKind::PacketSend,
			Self::PacketReceive => TransportEventKind::PacketReceive,
			Self::SubscribeResolve { .. } => TransportEventKind::SubscribeResolve,
			Self::SubscribeReject { .. } => TransportEventKind::SubscribeReject,
		}
	}
}

/// Closed set of event kinds.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
	Connect,
	Reconnect,
	Close,
	Disconnect,
	Offline,
	Error,
	End,
	Message,
	PacketSend,
	PacketReceive,
	SubscribeResolve,
	SubscribeReject,
}

/// Listener callback; infallible so one listener cannot abort fan-out.
pub type EventCallback = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Uniform listener registry; dispatch invokes every listener registered
/// for the event's kind, in registration order.
#[derive(Default)]
pub struct EventListeners {
	listeners: Mutex<HashMap<TransportEventKind, Vec<(ListenerId, EventCallback)>>>,
	next_id: AtomicU64,
}
impl EventListeners {
	/// Create an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a callback for one event kind.
	pub fn add(&self, kind: TransportEventKind, callback: EventCallback) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let mut listeners = self.listeners.lock().expect("listener lock poisoned");

		listeners.entry(kind).or_default().push((id, callback));

		id
	}

	/// Remove one callback.
	pub fn remove(&self, kind: TransportEventKind, id: ListenerId) {
		let mut listeners = self.listeners.lock().expect("listener lock poisoned");

		if let Some(entries) = listeners.get_mut(&kind) {
			entries.retain(|(entry_id, _)| *entry_id != id);
		}
	}

	/// Invoke every listener registered for the event's kind.
	pub fn dispatch(&self, event: &TransportEvent) {
		let callbacks = {
			let listeners = self.listeners.lock().expect("listener lock poisoned");

			listeners
				.get(&event.kind())
				.map(|entries| entries.iter().map(|(_, callback)| callback.clone()).collect::<Vec<_>>())
				.unwrap_or_default()
		};

		for callback in callbacks {
			callback(event);
		}
	}

	/// Drop every listener.
	pub fn clear(&self) {
		self.listeners.lock().expect("listener lock poisoned").clear();
	}
}
