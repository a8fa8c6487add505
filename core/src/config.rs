use std::time::Duration;

/// Configuration for the connection transport and the bus it feeds.
/// Mirrors the shape of the teacher's `ClientConfiguration`: a small
/// plain struct with a `Default` impl rather than a builder, since every
/// field has an obvious sane default.
#[derive(Clone, Debug)]
pub struct ClientConfiguration {
	/// Maximum number of outbound messages held while the connection is
	/// unavailable or throttled. `None` disables buffering entirely: any
	/// submission that can't be handed straight to the socket fails fast
	/// instead of queueing.
	pub buffer_size: Option<usize>,
	/// Whether the transport should attempt to reconnect on a dropped
	/// connection at all, or surface `ConnectionLost` immediately.
	pub reconnect_enabled: bool,
	/// Default timeout applied to one-shot bus subscriptions that don't
	/// specify their own.
	pub timeout: Duration,
	/// Bounds for the reconnect backoff delay.
	pub reconnect_backoff: (Duration, Duration),
}

impl Default for ClientConfiguration {
	fn default() -> Self {
		Self {
			buffer_size: Some(1024),
			reconnect_enabled: true,
			timeout: Duration::from_secs(30),
			reconnect_backoff: (Duration::from_millis(500), Duration::from_secs(30)),
		}
	}
}
