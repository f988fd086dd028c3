//! Before/after middleware chains.
//!
//! Hooks run in registration order; each sees the result of the previous
//! one. Returning [`Flow::Halt`] short-circuits: a halted `before_request`
//! rejects before the wire call, a halted `after_returning` rejects or
//! resolves with the envelope depending on the request's catch flag.

// crates.io
use futures::future::BoxFuture;
use http::Method;
use serde_json::{Map, Value};
// self
use crate::http::options::Envelope;

/// Outcome of one middleware hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
	/// Proceed to the next hook.
	Continue,
	/// Short-circuit the chain.
	Halt,
}

/// Mutable request view handed to `before_request` hooks.
#[derive(Clone, Debug)]
pub struct RequestContext {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the API root, before prefix rewriting.
	pub path: String,
	/// Query or body parameters, nulls already stripped.
	pub params: Map<String, Value>,
	/// Extra headers, reserved names already dropped.
	pub headers: Vec<(String, String)>,
}

/// Async hook running before the wire call.
pub trait BeforeRequest: Send + Sync {
	/// Inspect or rewrite the outgoing request.
	fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Flow>;
}
impl<F> BeforeRequest for F
where
	F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Flow> + Send + Sync,
{
	fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Flow> {
		self(ctx)
	}
}

/// Async hook running on every decoded envelope.
pub trait AfterReturning: Send + Sync {
	/// Inspect or rewrite the incoming envelope.
	fn call<'a>(&'a self, envelope: &'a mut Envelope) -> BoxFuture<'a, Flow>;
}
impl<F> AfterReturning for F
where
	F: for<'a> Fn(&'a mut Envelope) -> BoxFuture<'a, Flow> + Send + Sync,
{
	fn call<'a>(&'a self, envelope: &'a mut Envelope) -> BoxFuture<'a, Flow> {
		self(envelope)
	}
}

struct LiftedBefore<F>(F);
impl<F> BeforeRequest for LiftedBefore<F>
where
	F: Fn(&mut RequestContext) -> Flow + Send + Sync,
{
	fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Flow> {
		let flow = (self.0)(ctx);

		Box::pin(async move { flow })
	}
}

struct LiftedAfter<F>(F);
impl<F> AfterReturning for LiftedAfter<F>
where
	F: Fn(&mut Envelope) -> Flow + Send + Sync,
{
	fn call<'a>(&'a self, envelope: &'a mut Envelope) -> BoxFuture<'a, Flow> {
		let flow = (self.0)(envelope);

		Box::pin(async move { flow })
	}
}

/// Lift a synchronous before-hook into the async chain.
pub fn lift_before<F>(hook: F) -> impl BeforeRequest
where
	F: Fn(&mut RequestContext) -> Flow + Send + Sync,
{
	LiftedBefore(hook)
}

/// Lift a synchronous after-hook into the async chain.
pub fn lift_after<F>(hook: F) -> impl AfterReturning
where
	F: Fn(&mut Envelope) -> Flow + Send + Sync,
{
	LiftedAfter(hook)
}
