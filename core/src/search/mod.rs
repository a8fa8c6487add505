//! Search subscription driver (C3): bridges a server-side pull-based
//! search session to a local reactive-streams-style publisher with
//! demand signalling. All state mutation and downstream delivery runs
//! on a per-session single-thread dispatcher, supplied externally and
//! owned by the caller — never finalized by the session itself (see
//! the cyclic-ownership note in this crate's design ledger).

use crate::bus::{Bus, SubscriptionId};
use crate::classify::ClassificationKey;
use crate::error::{Error, Result};
use crate::frame::{Adaptable, SearchAction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Downstream consumer of a search session. Exactly one of
/// `on_complete`/`on_error` is ever called, and never before
/// `on_subscribe`.
pub trait SearchSubscriber<A>: Send + Sync + 'static {
	fn on_subscribe(&self, handle: SearchSubscriptionHandle);
	fn on_next(&self, page: Arc<A>);
	fn on_complete(&self);
	fn on_error(&self, error: Error);
}

enum DemandCommand {
	Request(i64),
	Cancel,
}

enum FrameEvent<A> {
	Frame(Arc<A>),
	IdleTimeout,
}

/// Client-facing demand control for a search session.
#[derive(Clone)]
pub struct SearchSubscriptionHandle {
	tx: mpsc::UnboundedSender<DemandCommand>,
}

impl SearchSubscriptionHandle {
	pub fn request(&self, n: i64) {
		let _ = self.tx.send(DemandCommand::Request(n));
	}

	pub fn cancel(&self) {
		let _ = self.tx.send(DemandCommand::Cancel);
	}
}

/// Emits the two outbound frames a search session ever produces. The
/// wire encoding of `request-from`/`cancel` is left to the embedder;
/// this crate only needs to know when to call it and with what.
pub trait SearchOutbound: Send + Sync + 'static {
	fn request_from(&self, session_id: &str, demand: i64, correlation_id: &str);
	fn cancel(&self, session_id: &str);
}

/// Drives one search session to completion. Constructed once the
/// server's `created(sessionId)` signal has arrived.
pub struct SearchSubscriptionDriver {
	session_id: String,
	cancelled: Arc<AtomicBool>,
	handle: SearchSubscriptionHandle,
}

impl SearchSubscriptionDriver {
	/// Wires a persistent, idle-timeout-guarded bus subscription under
	/// the session's tag, spawns the session's dispatch loop onto the
	/// externally supplied single-thread `dispatcher`, and calls
	/// `downstream.on_subscribe` exactly once.
	pub async fn start<A, S>(
		session_id: String,
		idle_timeout: Duration,
		bus: Bus<A>,
		outbound: Arc<dyn SearchOutbound>,
		downstream: Arc<S>,
		dispatcher: tokio::runtime::Handle,
	) -> Result<Self>
	where
		A: Adaptable,
		S: SearchSubscriber<A>,
	{
		let (demand_tx, demand_rx) = mpsc::unbounded_channel();
		let (frame_tx, frame_rx) = mpsc::unbounded_channel();
		let handle = SearchSubscriptionHandle { tx: demand_tx };
		let cancelled = Arc::new(AtomicBool::new(false));

		downstream.on_subscribe(handle.clone());

		let tag = ClassificationKey::SearchSession(session_id.clone());
		let on_frame_tx = frame_tx.clone();
		let on_timeout_tx = frame_tx;
		let subscription_id = bus
			.subscribe_for_frame_with_idle_timeout(
				tag,
				idle_timeout,
				Arc::new(move |frame: Arc<A>| {
					let _ = on_frame_tx.send(FrameEvent::Frame(frame));
				}),
				Arc::new(|frame: &A| {
					matches!(frame.search_action(), Some(SearchAction::Complete) | Some(SearchAction::Failed))
				}),
				Arc::new(move |_err: Error| {
					let _ = on_timeout_tx.send(FrameEvent::IdleTimeout);
				}),
			)
			.await?;

		dispatcher.spawn(session_loop(
			session_id.clone(),
			subscription_id,
			bus,
			outbound,
			downstream,
			cancelled.clone(),
			demand_rx,
			frame_rx,
		));

		Ok(Self {
			session_id,
			cancelled,
			handle,
		})
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn handle(&self) -> SearchSubscriptionHandle {
		self.handle.clone()
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

async fn session_loop<A, S>(
	session_id: String,
	subscription_id: SubscriptionId,
	bus: Bus<A>,
	outbound: Arc<dyn SearchOutbound>,
	downstream: Arc<S>,
	cancelled: Arc<AtomicBool>,
	mut demand_rx: mpsc::UnboundedReceiver<DemandCommand>,
	mut frame_rx: mpsc::UnboundedReceiver<FrameEvent<A>>,
) where
	A: Adaptable,
	S: SearchSubscriber<A>,
{
	let mut demand_correlation = 0u64;

	loop {
		let event = tokio::select! {
			command = demand_rx.recv() => match command {
				Some(command) => Event::Demand(command),
				None => break,
			},
			event = frame_rx.recv() => match event {
				Some(event) => Event::Frame(event),
				None => break,
			},
		};

		match event {
			Event::Demand(DemandCommand::Request(n)) => {
				if n <= 0 {
					cancelled.store(true, Ordering::SeqCst);
					bus.unsubscribe(subscription_id).await;
					downstream.on_error(Error::IllegalDemand);
					return;
				}
				demand_correlation += 1;
				let correlation_id = format!("{session_id}-{demand_correlation}");
				outbound.request_from(&session_id, n, &correlation_id);
			}
			Event::Demand(DemandCommand::Cancel) => {
				cancelled.store(true, Ordering::SeqCst);
				bus.unsubscribe(subscription_id).await;
				outbound.cancel(&session_id);
				return;
			}
			Event::Frame(FrameEvent::IdleTimeout) => {
				cancelled.store(true, Ordering::SeqCst);
				downstream.on_error(Error::Timeout);
				return;
			}
			Event::Frame(FrameEvent::Frame(frame)) => match frame.search_action() {
				Some(SearchAction::HasNext) => {
					downstream.on_next(frame);
				}
				Some(SearchAction::Complete) => {
					cancelled.store(true, Ordering::SeqCst);
					bus.unsubscribe(subscription_id).await;
					downstream.on_complete();
					return;
				}
				Some(SearchAction::Failed) => {
					cancelled.store(true, Ordering::SeqCst);
					bus.unsubscribe(subscription_id).await;
					downstream.on_error(Error::RemoteFailure(frame.payload().clone()));
					return;
				}
				None => {
					cancelled.store(true, Ordering::SeqCst);
					bus.unsubscribe(subscription_id).await;
					downstream.on_error(Error::UnexpectedSignal);
					return;
				}
			},
		}
	}
}

enum Event<A> {
	Demand(DemandCommand),
	Frame(FrameEvent<A>),
}
