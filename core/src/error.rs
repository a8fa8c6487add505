use thiserror::Error;

/// Errors surfaced to callers of the bus, the search driver, or the
/// transport. `ParseFailure` deliberately has no variant here — a failed
/// parse is logged at the call site and never observed by a caller.
#[derive(Debug, Error, Clone)]
pub enum Error {
	#[error("no response within the configured timeout")]
	Timeout,

	#[error("search subscriber requested non-positive demand")]
	IllegalDemand,

	#[error("received a frame this session cannot interpret")]
	UnexpectedSignal,

	#[error("connection unavailable while reconnecting")]
	ConnectionUnavailable,

	#[error("the connection was interrupted while a request was outstanding")]
	ConnectionInterrupted,

	#[error("the connection was lost and reconnect attempts were exhausted")]
	ConnectionLost,

	#[error("outbound buffer is at capacity")]
	BufferOverflow,

	#[error("the server returned an error response")]
	RemoteFailure(serde_json::Value),

	#[error("the bus has shut down")]
	Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;
