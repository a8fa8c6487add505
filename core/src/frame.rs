//! The `Adaptable` frame accessor. Wire decoding and the domain model
//! live outside this crate; a frame here is whatever the caller's codec
//! already produced, exposed through the handful of fields the bus and
//! the search driver need to route it.

use std::fmt::Debug;

/// The outcome signalled by a frame that belongs to a search session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchAction {
	HasNext,
	Complete,
	Failed,
}

/// A decoded inbound frame, as handed to the bus by whatever sits above
/// this crate. Implementors are expected to be cheap to construct views
/// over — the bus clones the `Arc` it wraps around a frame, never the
/// frame itself.
pub trait Adaptable: Debug + Send + Sync + 'static {
	/// Correlation id carried by request/response style exchanges, if any.
	fn correlation_id(&self) -> Option<&str>;

	/// The topic's group segment, if the frame's topic carries one (e.g.
	/// a live-commands group name).
	fn group(&self) -> Option<&str>;

	/// The topic's channel segment, if present.
	fn channel(&self) -> Option<&str>;

	/// The topic's free-form criterion segment, if present (e.g. a
	/// filter or search expression carried alongside group/channel).
	fn criterion(&self) -> Option<&str>;

	/// The search session id embedded in the frame's topic path, if this
	/// frame belongs to an active search session.
	fn search_subscription_id(&self) -> Option<&str>;

	/// Present only on frames that belong to an active search session.
	fn search_action(&self) -> Option<SearchAction>;

	/// Opaque payload, handed back to the caller untouched.
	fn payload(&self) -> &serde_json::Value;
}

/// Parses a raw string message into a frame of type `A`. Returns `None`
/// on a parse failure — the bus logs that case and moves on, it is
/// never surfaced as an `Error`.
pub type ParseFrame<A> = std::sync::Arc<dyn Fn(&str) -> Option<A> + Send + Sync>;
