//! Connection transport and reconnect resilience (C1). Owns a single
//! logical connection, a bounded outbound buffer, and the reconnect
//! loop. The wire protocol, TLS, auth and URL construction all live
//! above this crate; `Socket` is the seam an embedder plugs a real
//! connection into.

pub mod holdoff;

use crate::config::ClientConfiguration;
use crate::error::{Error, Result};
use bytes::Bytes;
use holdoff::HoldOff;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// The resilience state machine driving a single logical connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
	Connected,
	BackPressure,
	Buffering,
	Reconnecting,
	Disconnected,
	BufferFull,
}

/// Observes transitions of the connection state machine. Implementors
/// are called synchronously from the transport task, so they must not
/// block.
pub trait ConnectionStateObserver: Send + Sync {
	fn on_state_change(&self, state: ConnectionState);
}

/// Receives non-fatal connection errors (e.g. a connect attempt that
/// failed and will be retried) for logging or metrics, independent of
/// the `Error` values returned to callers.
pub trait ConnectionErrorSink: Send + Sync {
	fn on_error(&self, error: &Error);
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The raw duplex abstraction a `Transport` drives. An embedder
/// implements this over whatever actual connection (WebSocket, raw TCP,
/// an in-memory test double) carries messages; `Transport` never
/// constructs one directly, only through the supplied connector.
pub trait Socket: Send + 'static {
	fn send(&mut self, message: Bytes) -> BoxFuture<'_, io::Result<()>>;
	fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Bytes>>>;
}

/// Builds a fresh `Socket` for each connection attempt.
pub type Connector<S> = Arc<dyn Fn() -> BoxFuture<'static, io::Result<S>> + Send + Sync>;

/// A queued outbound submission: the payload plus the channel its
/// caller is awaiting. The sender is resolved wherever the message is
/// actually handed to the socket — on enqueue it is left untouched.
type Buffered = (Bytes, oneshot::Sender<Result<()>>);

enum TransportCommand {
	Send(Bytes, oneshot::Sender<Result<()>>),
	ReportBackPressure(serde_json::Value),
	ReportRecovered,
	Shutdown,
}

/// A cheap, cloneable handle to a running transport task.
#[derive(Clone)]
pub struct ConnectionHandle {
	tx: mpsc::UnboundedSender<TransportCommand>,
}

impl ConnectionHandle {
	/// Submits a message for delivery. When connected and not throttled,
	/// hands it straight to the socket and resolves once that write
	/// completes. Otherwise, if buffering is enabled
	/// (`ClientConfiguration::buffer_size`), queues it and resolves only
	/// once it is actually sent — on reconnect replay, or once
	/// [`ConnectionHandle::report_recovered`] drains the backlog. If
	/// buffering is disabled, fails immediately with the error matching
	/// the current state. Fails with `BufferOverflow` if the buffer is
	/// already at capacity.
	pub async fn send(&self, message: Bytes) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.tx
			.send(TransportCommand::Send(message, tx))
			.map_err(|_| Error::Shutdown)?;
		rx.await.map_err(|_| Error::Shutdown)?
	}

	/// Reports that the server has signalled throttling (e.g. a
	/// 429-class response to some outstanding request). Moves a
	/// currently connected, unthrottled transport into `BackPressure`;
	/// further submissions buffer (or fail fast, if buffering is
	/// disabled) rather than reach the socket until
	/// [`ConnectionHandle::report_recovered`] is called.
	pub fn report_back_pressure(&self, payload: serde_json::Value) {
		let _ = self.tx.send(TransportCommand::ReportBackPressure(payload));
	}

	/// Reports that a round-trip succeeded, clearing throttling. Replays
	/// anything queued while throttled, in order, and returns to
	/// `Connected` once the backlog is drained.
	pub fn report_recovered(&self) {
		let _ = self.tx.send(TransportCommand::ReportRecovered);
	}

	pub fn shutdown(&self) {
		let _ = self.tx.send(TransportCommand::Shutdown);
	}
}

/// Spawns the transport task and returns a handle to it along with a
/// receiver of inbound messages.
pub fn spawn<S: Socket>(
	connector: Connector<S>,
	config: ClientConfiguration,
	observer: Option<Arc<dyn ConnectionStateObserver>>,
	error_sink: Option<Arc<dyn ConnectionErrorSink>>,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<Bytes>) {
	let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
	let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
	tokio::spawn(run(connector, config, cmd_rx, inbound_tx, observer, error_sink));
	(ConnectionHandle { tx: cmd_tx }, inbound_rx)
}

fn set_state(
	current: &mut ConnectionState,
	next: ConnectionState,
	observer: &Option<Arc<dyn ConnectionStateObserver>>,
) {
	if *current != next {
		*current = next;
		if let Some(observer) = observer {
			observer.on_state_change(next);
		}
	}
}

/// Buffers `message` and leaves `response` unresolved if capacity
/// allows; otherwise resolves `response` immediately with either
/// `fail_fast` (buffering disabled via `buffer_size: None`) or
/// `BufferOverflow` (buffer already at capacity).
fn enqueue_or_fail(
	outbound: &mut VecDeque<Buffered>,
	buffer_size: Option<usize>,
	message: Bytes,
	response: oneshot::Sender<Result<()>>,
	state: &mut ConnectionState,
	observer: &Option<Arc<dyn ConnectionStateObserver>>,
	fail_fast: Error,
) {
	match buffer_size {
		None => {
			let _ = response.send(Err(fail_fast));
		}
		Some(limit) => {
			if outbound.len() >= limit {
				set_state(state, ConnectionState::BufferFull, observer);
				let _ = response.send(Err(Error::BufferOverflow));
			} else {
				outbound.push_back((message, response));
				set_state(state, ConnectionState::Buffering, observer);
			}
		}
	}
}

fn fail_all_buffered(outbound: &mut VecDeque<Buffered>, error: Error) {
	for (_, response) in outbound.drain(..) {
		let _ = response.send(Err(error.clone()));
	}
}

enum ConnectOutcome<S> {
	Connected(S),
	GiveUp,
	Shutdown,
}

/// Dials the connector, retrying with backoff, until it succeeds,
/// reconnect is disabled and an attempt fails, or the transport is shut
/// down. Throughout, still services `Send` submissions arriving on
/// `cmd_rx` — buffered if enabled, failed fast with
/// `ConnectionUnavailable` otherwise — so commands submitted between
/// connection attempts are never silently queued past the configured
/// buffer capacity.
async fn connect<S: Socket>(
	connector: &Connector<S>,
	cmd_rx: &mut mpsc::UnboundedReceiver<TransportCommand>,
	outbound: &mut VecDeque<Buffered>,
	config: &ClientConfiguration,
	holdoff: &mut HoldOff,
	state: &mut ConnectionState,
	observer: &Option<Arc<dyn ConnectionStateObserver>>,
	error_sink: &Option<Arc<dyn ConnectionErrorSink>>,
) -> ConnectOutcome<S> {
	'attempt: loop {
		let mut attempt = connector();
		loop {
			tokio::select! {
				result = &mut attempt => {
					match result {
						Ok(socket) => return ConnectOutcome::Connected(socket),
						Err(error) => {
							tracing::warn!(error = ?error, "failed to connect");
							if let Some(sink) = error_sink {
								sink.on_error(&Error::ConnectionUnavailable);
							}
							if !config.reconnect_enabled {
								return ConnectOutcome::GiveUp;
							}
							break;
						}
					}
				}
				command = cmd_rx.recv() => {
					match command {
						Some(TransportCommand::Send(message, response)) => {
							enqueue_or_fail(outbound, config.buffer_size, message, response, state, observer, Error::ConnectionUnavailable);
						}
						Some(TransportCommand::ReportBackPressure(_)) | Some(TransportCommand::ReportRecovered) => {}
						Some(TransportCommand::Shutdown) | None => return ConnectOutcome::Shutdown,
					}
				}
			}
		}

		let backoff = holdoff.wait_and_increase();
		tokio::pin!(backoff);
		loop {
			tokio::select! {
				_ = &mut backoff => continue 'attempt,
				command = cmd_rx.recv() => {
					match command {
						Some(TransportCommand::Send(message, response)) => {
							enqueue_or_fail(outbound, config.buffer_size, message, response, state, observer, Error::ConnectionUnavailable);
						}
						Some(TransportCommand::ReportBackPressure(_)) | Some(TransportCommand::ReportRecovered) => {}
						Some(TransportCommand::Shutdown) | None => return ConnectOutcome::Shutdown,
					}
				}
			}
		}
	}
}

/// The terminal `disconnected` state from the spec's state table:
/// reconnect is disabled and an attempt has already failed. Fails
/// everything still buffered with `ConnectionLost`, then responds the
/// same way to every further `Send` until shutdown.
async fn terminal(mut cmd_rx: mpsc::UnboundedReceiver<TransportCommand>, mut outbound: VecDeque<Buffered>) {
	fail_all_buffered(&mut outbound, Error::ConnectionLost);
	while let Some(command) = cmd_rx.recv().await {
		match command {
			TransportCommand::Send(_, response) => {
				let _ = response.send(Err(Error::ConnectionLost));
			}
			TransportCommand::ReportBackPressure(_) | TransportCommand::ReportRecovered => {}
			TransportCommand::Shutdown => return,
		}
	}
}

async fn run<S: Socket>(
	connector: Connector<S>,
	config: ClientConfiguration,
	mut cmd_rx: mpsc::UnboundedReceiver<TransportCommand>,
	inbound_tx: mpsc::UnboundedSender<Bytes>,
	observer: Option<Arc<dyn ConnectionStateObserver>>,
	error_sink: Option<Arc<dyn ConnectionErrorSink>>,
) {
	let (min, max) = config.reconnect_backoff;
	let mut holdoff = HoldOff::new(min..max);
	let mut outbound: VecDeque<Buffered> = VecDeque::new();
	let mut state = ConnectionState::Disconnected;
	// Payload from the most recent `ReportBackPressure`, cleared on
	// `ReportRecovered` or a fresh reconnect. `Some` means the transport
	// is currently throttled and must not hand sends straight to the
	// socket.
	let mut back_pressure: Option<serde_json::Value> = None;

	'reconnect: loop {
		set_state(&mut state, ConnectionState::Reconnecting, &observer);

		let mut socket = match connect(&connector, &mut cmd_rx, &mut outbound, &config, &mut holdoff, &mut state, &observer, &error_sink).await {
			ConnectOutcome::Connected(socket) => socket,
			ConnectOutcome::GiveUp => {
				set_state(&mut state, ConnectionState::Disconnected, &observer);
				return terminal(cmd_rx, outbound).await;
			}
			ConnectOutcome::Shutdown => {
				fail_all_buffered(&mut outbound, Error::Shutdown);
				return;
			}
		};
		holdoff.reset();
		back_pressure = None;

		if !outbound.is_empty() {
			set_state(&mut state, ConnectionState::Buffering, &observer);
		}
		while let Some((message, response)) = outbound.pop_front() {
			match socket.send(message.clone()).await {
				Ok(()) => {
					let _ = response.send(Ok(()));
				}
				Err(error) => {
					tracing::warn!(error = ?error, "failed to replay buffered message");
					if let Some(sink) = &error_sink {
						sink.on_error(&Error::ConnectionInterrupted);
					}
					outbound.push_front((message, response));
					continue 'reconnect;
				}
			}
		}
		set_state(&mut state, ConnectionState::Connected, &observer);

		loop {
			tokio::select! {
				command = cmd_rx.recv() => {
					match command {
						Some(TransportCommand::Send(message, response)) => {
							if let Some(payload) = &back_pressure {
								enqueue_or_fail(&mut outbound, config.buffer_size, message, response, &mut state, &observer, Error::RemoteFailure(payload.clone()));
								continue;
							}
							match socket.send(message.clone()).await {
								Ok(()) => {
									let _ = response.send(Ok(()));
								}
								Err(error) => {
									tracing::warn!(error = ?error, "send failed");
									if let Some(sink) = &error_sink {
										sink.on_error(&Error::ConnectionInterrupted);
									}
									enqueue_or_fail(&mut outbound, config.buffer_size, message, response, &mut state, &observer, Error::ConnectionInterrupted);
									break;
								}
							}
						}
						Some(TransportCommand::ReportBackPressure(payload)) => {
							if back_pressure.is_none() {
								set_state(&mut state, ConnectionState::BackPressure, &observer);
							}
							back_pressure = Some(payload);
						}
						Some(TransportCommand::ReportRecovered) => {
							if back_pressure.take().is_some() {
								let mut broke = false;
								while let Some((message, response)) = outbound.pop_front() {
									match socket.send(message.clone()).await {
										Ok(()) => {
											let _ = response.send(Ok(()));
										}
										Err(error) => {
											tracing::warn!(error = ?error, "failed to replay message after recovery");
											if let Some(sink) = &error_sink {
												sink.on_error(&Error::ConnectionInterrupted);
											}
											outbound.push_front((message, response));
											broke = true;
											break;
										}
									}
								}
								if broke {
									break;
								}
								set_state(&mut state, ConnectionState::Connected, &observer);
							}
						}
						Some(TransportCommand::Shutdown) | None => {
							fail_all_buffered(&mut outbound, Error::Shutdown);
							return;
						}
					}
				}
				received = socket.recv() => {
					match received {
						Ok(Some(bytes)) => {
							if inbound_tx.send(bytes).is_err() {
								return;
							}
						}
						Ok(None) => {
							tracing::warn!("connection closed by peer");
							break;
						}
						Err(error) => {
							tracing::warn!(error = ?error, "connection read failed");
							if let Some(sink) = &error_sink {
								sink.on_error(&Error::ConnectionInterrupted);
							}
							break;
						}
					}
				}
			}
		}

		if !config.reconnect_enabled {
			set_state(&mut state, ConnectionState::Disconnected, &observer);
			return terminal(cmd_rx, outbound).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;
	use std::time::Duration;
	use tokio::sync::mpsc as tmpsc;

	struct ChannelSocket {
		outgoing: tmpsc::UnboundedSender<Bytes>,
		incoming: tmpsc::UnboundedReceiver<Bytes>,
		fail_next_send: Arc<Mutex<bool>>,
	}

	impl Socket for ChannelSocket {
		fn send(&mut self, message: Bytes) -> BoxFuture<'_, io::Result<()>> {
			Box::pin(async move {
				if std::mem::take(&mut *self.fail_next_send.lock().unwrap()) {
					return Err(io::Error::new(io::ErrorKind::Other, "forced failure"));
				}
				self.outgoing
					.send(message)
					.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
			})
		}

		fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Bytes>>> {
			Box::pin(async move { Ok(self.incoming.recv().await) })
		}
	}

	#[tokio::test]
	async fn delivers_a_sent_message_when_connected() {
		let (server_tx, mut server_rx) = tmpsc::unbounded_channel();
		// Held for the test's duration so the transport's `recv` never
		// observes a closed channel and spins into a reconnect storm.
		let (incoming_tx, incoming_rx) = tmpsc::unbounded_channel::<Bytes>();
		let incoming_rx = Arc::new(Mutex::new(Some(incoming_rx)));
		let fail = Arc::new(Mutex::new(false));
		let connector: Connector<ChannelSocket> = Arc::new(move || {
			let server_tx = server_tx.clone();
			let fail = fail.clone();
			let incoming = incoming_rx.lock().unwrap().take().expect("connector invoked only once in this test");
			Box::pin(async move {
				Ok(ChannelSocket {
					outgoing: server_tx,
					incoming,
					fail_next_send: fail,
				})
			})
		});

		let (handle, _inbound) = spawn(connector, ClientConfiguration::default(), None, None);
		let _keep_alive = incoming_tx;
		handle.send(Bytes::from_static(b"hello")).await.unwrap();
		let received = server_rx.recv().await.unwrap();
		assert_eq!(received, Bytes::from_static(b"hello"));
		handle.shutdown();
	}

	#[tokio::test]
	async fn reconnects_and_replays_after_a_transient_send_failure() {
		let (server_tx, mut server_rx) = tmpsc::unbounded_channel();
		// Shared across every socket the connector hands out: the first
		// send attempt fails and consumes the flag, so the replay on the
		// next connect attempt succeeds.
		let fail = Arc::new(Mutex::new(true));
		let connector: Connector<ChannelSocket> = Arc::new(move || {
			let server_tx = server_tx.clone();
			let fail = fail.clone();
			Box::pin(async move {
				let (_incoming_tx, incoming_rx) = tmpsc::unbounded_channel();
				Ok(ChannelSocket {
					outgoing: server_tx,
					incoming: incoming_rx,
					fail_next_send: fail,
				})
			})
		});
		let config = ClientConfiguration {
			reconnect_backoff: (Duration::from_millis(1), Duration::from_millis(10)),
			..ClientConfiguration::default()
		};

		let (handle, _inbound) = spawn(connector, config, None, None);
		handle.send(Bytes::from_static(b"hello")).await.unwrap();
		let received = server_rx.recv().await.unwrap();
		assert_eq!(received, Bytes::from_static(b"hello"));
		handle.shutdown();
	}

	#[tokio::test]
	async fn buffer_overflow_is_reported_when_there_is_no_room_to_queue() {
		// buffer_size: Some(0) means no buffering tolerated at all: a send
		// that fails to reach the socket is rejected outright rather than
		// queued, since there is no room to queue it. The connection is
		// never re-dialled for this case, so a single never-resolving
		// `incoming` receiver is all the connector ever needs to hand out.
		let (server_tx, _server_rx) = tmpsc::unbounded_channel();
		let (_incoming_tx, incoming_rx) = tmpsc::unbounded_channel::<Bytes>();
		let incoming_rx = Arc::new(Mutex::new(Some(incoming_rx)));
		let fail = Arc::new(Mutex::new(true));
		let connector: Connector<ChannelSocket> = Arc::new(move || {
			let server_tx = server_tx.clone();
			let fail = fail.clone();
			let incoming = incoming_rx.lock().unwrap().take().expect("connector invoked only once in this test");
			Box::pin(async move {
				Ok(ChannelSocket {
					outgoing: server_tx,
					incoming,
					fail_next_send: fail,
				})
			})
		});
		let config = ClientConfiguration {
			buffer_size: Some(0),
			reconnect_backoff: (Duration::from_millis(1), Duration::from_millis(10)),
			..ClientConfiguration::default()
		};

		let (handle, _inbound) = spawn(connector, config, None, None);
		let result = handle.send(Bytes::from_static(b"overflow")).await;
		assert!(matches!(result, Err(Error::BufferOverflow)));
		handle.shutdown();
	}

	#[tokio::test]
	async fn buffered_message_future_resolves_only_once_actually_sent() {
		let (server_tx, mut server_rx) = tmpsc::unbounded_channel();
		// First send attempt fails; the message must be queued, and the
		// caller's future must stay pending until the reconnect replay
		// actually delivers it — not resolve the instant it is buffered.
		let fail = Arc::new(Mutex::new(true));
		let connector: Connector<ChannelSocket> = Arc::new(move || {
			let server_tx = server_tx.clone();
			let fail = fail.clone();
			Box::pin(async move {
				let (_incoming_tx, incoming_rx) = tmpsc::unbounded_channel();
				Ok(ChannelSocket {
					outgoing: server_tx,
					incoming: incoming_rx,
					fail_next_send: fail,
				})
			})
		});
		let config = ClientConfiguration {
			reconnect_backoff: (Duration::from_millis(1), Duration::from_millis(10)),
			..ClientConfiguration::default()
		};

		let (handle, _inbound) = spawn(connector, config, None, None);
		let send_task = tokio::spawn({
			let handle = handle.clone();
			async move { handle.send(Bytes::from_static(b"hello")).await }
		});

		tokio::time::sleep(Duration::from_millis(2)).await;
		assert!(!send_task.is_finished(), "future resolved before the message was actually sent");

		let received = server_rx.recv().await.unwrap();
		assert_eq!(received, Bytes::from_static(b"hello"));
		assert!(send_task.await.unwrap().is_ok());
		handle.shutdown();
	}

	#[derive(Clone, Default)]
	struct RecordingObserver(Arc<Mutex<Vec<ConnectionState>>>);

	impl ConnectionStateObserver for RecordingObserver {
		fn on_state_change(&self, state: ConnectionState) {
			self.0.lock().unwrap().push(state);
		}
	}

	#[tokio::test]
	async fn back_pressure_buffers_then_recovers_and_replays() {
		let (server_tx, mut server_rx) = tmpsc::unbounded_channel();
		let (incoming_tx, incoming_rx) = tmpsc::unbounded_channel::<Bytes>();
		let incoming_rx = Arc::new(Mutex::new(Some(incoming_rx)));
		let fail = Arc::new(Mutex::new(false));
		let connector: Connector<ChannelSocket> = Arc::new(move || {
			let server_tx = server_tx.clone();
			let fail = fail.clone();
			let incoming = incoming_rx.lock().unwrap().take().expect("connector invoked only once in this test");
			Box::pin(async move {
				Ok(ChannelSocket {
					outgoing: server_tx,
					incoming,
					fail_next_send: fail,
				})
			})
		});
		let config = ClientConfiguration {
			buffer_size: Some(4),
			..ClientConfiguration::default()
		};
		let observer = RecordingObserver::default();

		let (handle, _inbound) = spawn(connector, config, Some(Arc::new(observer.clone())), None);
		let _keep_alive = incoming_tx;

		handle.send(Bytes::from_static(b"a")).await.unwrap();

		handle.report_back_pressure(serde_json::json!({"status": 429}));
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert_eq!(observer.0.lock().unwrap().last().copied(), Some(ConnectionState::BackPressure));

		let send_task = tokio::spawn({
			let handle = handle.clone();
			async move { handle.send(Bytes::from_static(b"b")).await }
		});
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert!(!send_task.is_finished(), "submission under back-pressure must buffer, not send directly");
		assert!(observer.0.lock().unwrap().contains(&ConnectionState::Buffering));

		handle.report_recovered();
		let received = server_rx.recv().await.unwrap();
		assert_eq!(received, Bytes::from_static(b"b"));
		assert!(send_task.await.unwrap().is_ok());
		assert_eq!(observer.0.lock().unwrap().last().copied(), Some(ConnectionState::Connected));
		handle.shutdown();
	}

	#[tokio::test]
	async fn back_pressure_fails_fast_when_buffering_disabled() {
		let (server_tx, _server_rx) = tmpsc::unbounded_channel();
		let (_incoming_tx, incoming_rx) = tmpsc::unbounded_channel::<Bytes>();
		let incoming_rx = Arc::new(Mutex::new(Some(incoming_rx)));
		let fail = Arc::new(Mutex::new(false));
		let connector: Connector<ChannelSocket> = Arc::new(move || {
			let server_tx = server_tx.clone();
			let fail = fail.clone();
			let incoming = incoming_rx.lock().unwrap().take().expect("connector invoked only once in this test");
			Box::pin(async move {
				Ok(ChannelSocket {
					outgoing: server_tx,
					incoming,
					fail_next_send: fail,
				})
			})
		});
		let config = ClientConfiguration {
			buffer_size: None,
			..ClientConfiguration::default()
		};

		let (handle, _inbound) = spawn(connector, config, None, None);
		handle.report_back_pressure(serde_json::json!({"retry_after": 5}));
		tokio::time::sleep(Duration::from_millis(5)).await;
		let result = handle.send(Bytes::from_static(b"x")).await;
		assert!(matches!(result, Err(Error::RemoteFailure(_))));
		handle.shutdown();
	}

	#[tokio::test]
	async fn submission_while_reconnecting_fails_fast_when_buffering_disabled() {
		let connector: Connector<ChannelSocket> = Arc::new(|| Box::pin(async move { Err(io::Error::new(io::ErrorKind::Other, "down")) }));
		let config = ClientConfiguration {
			buffer_size: None,
			reconnect_backoff: (Duration::from_millis(50), Duration::from_millis(50)),
			..ClientConfiguration::default()
		};

		let (handle, _inbound) = spawn(connector, config, None, None);
		let result = handle.send(Bytes::from_static(b"x")).await;
		assert!(matches!(result, Err(Error::ConnectionUnavailable)));
		handle.shutdown();
	}

	#[tokio::test]
	async fn submissions_after_terminal_disconnect_fail_with_connection_lost() {
		let connector: Connector<ChannelSocket> = Arc::new(|| Box::pin(async move { Err(io::Error::new(io::ErrorKind::Other, "down")) }));
		let config = ClientConfiguration {
			buffer_size: None,
			reconnect_enabled: false,
			..ClientConfiguration::default()
		};

		let (handle, _inbound) = spawn(connector, config, None, None);
		// Give the task a chance to give up and reach the terminal state
		// before we submit, so this isn't racing the give-up decision.
		tokio::time::sleep(Duration::from_millis(5)).await;
		let result = handle.send(Bytes::from_static(b"x")).await;
		assert!(matches!(result, Err(Error::ConnectionLost)));
		handle.shutdown();
	}
}
