//! The adaptable bus (C2): classifies inbound raw strings and frames,
//! dispatches to one-shot waiters or persistent subscribers, and
//! enforces per-subscription and idle timeouts. Everything here runs on
//! a single actor task — the public `Bus<A>` handle is a cheap `Clone`
//! wrapper around a command channel, mirroring the teacher's
//! `Client`/`client_task` split.

mod registry;

pub use registry::SubscriptionId;

use crate::classify::{ClassificationKey, FrameClassifierFn, StringClassifierFn};
use crate::error::{Error, Result};
use crate::frame::{Adaptable, ParseFrame};
use registry::{IdleState, OneShotEntry, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Acknowledgement frames follow the platform's `<request>:ACK` naming
/// convention; an untracked one is logged and dropped before a frame
/// parse is even attempted.
const ACK_SUFFIX: &str = ":ACK";

pub type Callback<A> = Arc<dyn Fn(Arc<A>) + Send + Sync>;
pub type TerminationPred<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;
pub type OnTimeout = Arc<dyn Fn(Error) + Send + Sync>;

enum PersistentCallback<A: Adaptable> {
	Plain(Callback<A>),
	WithIdle {
		callback: Callback<A>,
		termination: TerminationPred<A>,
		on_timeout: OnTimeout,
	},
}

enum Command<A: Adaptable> {
	AddStringClassifier(StringClassifierFn),
	AddFrameClassifier(FrameClassifierFn<A>),
	SubscribeOnceString {
		tag: ClassificationKey,
		timeout: Duration,
		response: oneshot::Sender<Result<String>>,
	},
	SubscribeOnceFrame {
		tag: ClassificationKey,
		timeout: Duration,
		response: oneshot::Sender<Result<Arc<A>>>,
	},
	SubscribeFrame {
		tag: ClassificationKey,
		callback: Callback<A>,
		response: oneshot::Sender<SubscriptionId>,
	},
	SubscribeFrameWithIdleTimeout {
		tag: ClassificationKey,
		idle: Duration,
		callback: Callback<A>,
		termination: TerminationPred<A>,
		on_timeout: OnTimeout,
		response: oneshot::Sender<SubscriptionId>,
	},
	Unsubscribe {
		id: SubscriptionId,
		response: oneshot::Sender<bool>,
	},
	Publish(String),
	OneShotStringExpired(ClassificationKey, SubscriptionId),
	OneShotFrameExpired(ClassificationKey, SubscriptionId),
	IdleExpired(SubscriptionId),
	Shutdown,
}

/// A cheap, cloneable handle onto a running bus dispatcher.
pub struct Bus<A: Adaptable> {
	tx: mpsc::UnboundedSender<Command<A>>,
}

impl<A: Adaptable> Clone for Bus<A> {
	fn clone(&self) -> Self {
		Self { tx: self.tx.clone() }
	}
}

impl<A: Adaptable> Bus<A> {
	/// Spawns the dispatcher task. `parse_frame` is the injected wire
	/// decoder; the identity string-classifier (exact match on the raw
	/// string) is installed as the first classifier, as required by the
	/// dispatch algorithm.
	pub fn new(parse_frame: ParseFrame<A>) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let bus_tx = tx.clone();
		tokio::spawn(run(rx, bus_tx, parse_frame));
		Self { tx }
	}

	pub fn add_string_classifier(&self, classifier: StringClassifierFn) {
		let _ = self.tx.send(Command::AddStringClassifier(classifier));
	}

	pub fn add_frame_classifier(&self, classifier: FrameClassifierFn<A>) {
		let _ = self.tx.send(Command::AddFrameClassifier(classifier));
	}

	pub async fn subscribe_once_for_string(&self, tag: ClassificationKey, timeout: Duration) -> Result<String> {
		let (response, rx) = oneshot::channel();
		self.tx
			.send(Command::SubscribeOnceString { tag, timeout, response })
			.map_err(|_| Error::Shutdown)?;
		rx.await.map_err(|_| Error::Shutdown)?
	}

	pub async fn subscribe_once_for_frame(&self, tag: ClassificationKey, timeout: Duration) -> Result<Arc<A>> {
		let (response, rx) = oneshot::channel();
		self.tx
			.send(Command::SubscribeOnceFrame { tag, timeout, response })
			.map_err(|_| Error::Shutdown)?;
		rx.await.map_err(|_| Error::Shutdown)?
	}

	pub async fn subscribe_for_frame(&self, tag: ClassificationKey, callback: Callback<A>) -> Result<SubscriptionId> {
		let (response, rx) = oneshot::channel();
		self.tx
			.send(Command::SubscribeFrame { tag, callback, response })
			.map_err(|_| Error::Shutdown)?;
		rx.await.map_err(|_| Error::Shutdown)
	}

	pub async fn subscribe_for_frame_with_idle_timeout(
		&self,
		tag: ClassificationKey,
		idle: Duration,
		callback: Callback<A>,
		termination: TerminationPred<A>,
		on_timeout: OnTimeout,
	) -> Result<SubscriptionId> {
		let (response, rx) = oneshot::channel();
		self.tx
			.send(Command::SubscribeFrameWithIdleTimeout {
				tag,
				idle,
				callback,
				termination,
				on_timeout,
				response,
			})
			.map_err(|_| Error::Shutdown)?;
		rx.await.map_err(|_| Error::Shutdown)
	}

	pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let (response, rx) = oneshot::channel();
		if self.tx.send(Command::Unsubscribe { id, response }).is_err() {
			return false;
		}
		rx.await.unwrap_or(false)
	}

	/// Enqueues a raw inbound string for dispatch. Never blocks.
	pub fn publish(&self, raw: impl Into<String>) {
		let _ = self.tx.send(Command::Publish(raw.into()));
	}

	pub fn shutdown(&self) {
		let _ = self.tx.send(Command::Shutdown);
	}
}

struct BusState<A: Adaptable> {
	string_classifiers: Vec<StringClassifierFn>,
	frame_classifiers: Vec<FrameClassifierFn<A>>,
	registry: Registry<oneshot::Sender<Result<String>>, oneshot::Sender<Result<Arc<A>>>, PersistentCallback<A>>,
	timers: std::collections::HashMap<SubscriptionId, JoinHandle<()>>,
	parse_frame: ParseFrame<A>,
}

fn identity_classifier() -> StringClassifierFn {
	Box::new(|raw: &str| Some(ClassificationKey::Identity(raw.to_string())))
}

async fn run<A: Adaptable>(
	mut rx: mpsc::UnboundedReceiver<Command<A>>,
	self_tx: mpsc::UnboundedSender<Command<A>>,
	parse_frame: ParseFrame<A>,
) {
	let mut state = BusState {
		string_classifiers: vec![identity_classifier()],
		frame_classifiers: Vec::new(),
		registry: Registry::default(),
		timers: std::collections::HashMap::new(),
		parse_frame,
	};

	while let Some(command) = rx.recv().await {
		match command {
			Command::AddStringClassifier(c) => state.string_classifiers.push(c),
			Command::AddFrameClassifier(c) => state.frame_classifiers.push(c),
			Command::SubscribeOnceString { tag, timeout, response } => {
				subscribe_once_string(&mut state, &self_tx, tag, timeout, response);
			}
			Command::SubscribeOnceFrame { tag, timeout, response } => {
				subscribe_once_frame(&mut state, &self_tx, tag, timeout, response);
			}
			Command::SubscribeFrame { tag, callback, response } => {
				let id = state
					.registry
					.add_persistent(tag, PersistentCallback::Plain(callback), None);
				let _ = response.send(id);
			}
			Command::SubscribeFrameWithIdleTimeout {
				tag,
				idle,
				callback,
				termination,
				on_timeout,
				response,
			} => {
				let id = state.registry.add_persistent(
					tag,
					PersistentCallback::WithIdle {
						callback,
						termination,
						on_timeout,
					},
					Some(IdleState {
						duration: idle,
						last_message: Instant::now(),
					}),
				);
				arm_idle_timer(&mut state, &self_tx, id, idle);
				let _ = response.send(id);
			}
			Command::Unsubscribe { id, response } => {
				if let Some(handle) = state.timers.remove(&id) {
					handle.abort();
				}
				let removed = state.registry.remove_persistent(id);
				let _ = response.send(removed);
			}
			Command::Publish(raw) => dispatch(&mut state, raw).await,
			Command::OneShotStringExpired(tag, id) => {
				if let Some(entries) = state.registry.one_shot_string.get_mut(&tag) {
					if let Some(pos) = entries.iter().position(|entry| entry.id == id) {
						let entry = entries.remove(pos).unwrap();
						let _ = entry.response.send(Err(Error::Timeout));
					}
					if entries.is_empty() {
						state.registry.one_shot_string.remove(&tag);
					}
				}
				state.timers.remove(&id);
			}
			Command::OneShotFrameExpired(tag, id) => {
				if let Some(entries) = state.registry.one_shot_frame.get_mut(&tag) {
					if let Some(pos) = entries.iter().position(|entry| entry.id == id) {
						let entry = entries.remove(pos).unwrap();
						let _ = entry.response.send(Err(Error::Timeout));
					}
					if entries.is_empty() {
						state.registry.one_shot_frame.remove(&tag);
					}
				}
				state.timers.remove(&id);
			}
			Command::IdleExpired(id) => on_idle_fired(&mut state, &self_tx, id),
			Command::Shutdown => {
				fail_all_one_shots(&mut state);
				return;
			}
		}
	}
	fail_all_one_shots(&mut state);
}

fn subscribe_once_string<A: Adaptable>(
	state: &mut BusState<A>,
	self_tx: &mpsc::UnboundedSender<Command<A>>,
	tag: ClassificationKey,
	timeout: Duration,
	response: oneshot::Sender<Result<String>>,
) {
	let id = SubscriptionId::next();
	state
		.registry
		.one_shot_string
		.entry(tag.clone())
		.or_default()
		.push_back(OneShotEntry { id, response });
	let tx = self_tx.clone();
	let handle = tokio::spawn(async move {
		tokio::time::sleep(timeout).await;
		let _ = tx.send(Command::OneShotStringExpired(tag, id));
	});
	state.timers.insert(id, handle);
}

fn subscribe_once_frame<A: Adaptable>(
	state: &mut BusState<A>,
	self_tx: &mpsc::UnboundedSender<Command<A>>,
	tag: ClassificationKey,
	timeout: Duration,
	response: oneshot::Sender<Result<Arc<A>>>,
) {
	let id = SubscriptionId::next();
	state
		.registry
		.one_shot_frame
		.entry(tag.clone())
		.or_default()
		.push_back(OneShotEntry { id, response });
	let tx = self_tx.clone();
	let handle = tokio::spawn(async move {
		tokio::time::sleep(timeout).await;
		let _ = tx.send(Command::OneShotFrameExpired(tag, id));
	});
	state.timers.insert(id, handle);
}

fn arm_idle_timer<A: Adaptable>(
	state: &mut BusState<A>,
	self_tx: &mpsc::UnboundedSender<Command<A>>,
	id: SubscriptionId,
	delay: Duration,
) {
	let tx = self_tx.clone();
	let handle = tokio::spawn(async move {
		tokio::time::sleep(delay).await;
		let _ = tx.send(Command::IdleExpired(id));
	});
	state.timers.insert(id, handle);
}

fn on_idle_fired<A: Adaptable>(state: &mut BusState<A>, self_tx: &mpsc::UnboundedSender<Command<A>>, id: SubscriptionId) {
	state.timers.remove(&id);
	let Some(tag) = state.registry.persistent_index.get(&id).cloned() else {
		return;
	};
	let Some(entries) = state.registry.persistent.get(&tag) else {
		return;
	};
	let Some(entry) = entries.iter().find(|entry| entry.id == id) else {
		return;
	};
	let Some(idle) = &entry.idle else { return };
	let elapsed = idle.last_message.elapsed();
	if elapsed >= idle.duration {
		let on_timeout = match &entry.callback {
			PersistentCallback::WithIdle { on_timeout, .. } => on_timeout.clone(),
			PersistentCallback::Plain(_) => return,
		};
		state.registry.remove_persistent(id);
		on_timeout(Error::Timeout);
	} else {
		let remaining = idle.duration - elapsed;
		arm_idle_timer(state, self_tx, id, remaining);
	}
}

fn fail_all_one_shots<A: Adaptable>(state: &mut BusState<A>) {
	for (_, entries) in state.registry.one_shot_string.drain() {
		for entry in entries {
			let _ = entry.response.send(Err(Error::Shutdown));
		}
	}
	for (_, entries) in state.registry.one_shot_frame.drain() {
		for entry in entries {
			let _ = entry.response.send(Err(Error::Shutdown));
		}
	}
	for (_, handle) in state.timers.drain() {
		handle.abort();
	}
}

async fn dispatch<A: Adaptable>(state: &mut BusState<A>, raw: String) {
	// Step 1: first-match-wins across string classifiers, against any
	// waiting one-shot string subscriber.
	for classifier in &state.string_classifiers {
		if let Some(tag) = classifier(&raw) {
			if let Some(entries) = state.registry.one_shot_string.get_mut(&tag) {
				if let Some(entry) = entries.pop_front() {
					if let Some(handle) = state.timers.remove(&entry.id) {
						handle.abort();
					}
					if entries.is_empty() {
						state.registry.one_shot_string.remove(&tag);
					}
					let _ = entry.response.send(Ok(raw));
					return;
				}
			}
		}
	}

	// Step 2: an untracked acknowledgement is dropped before a parse is
	// even attempted.
	if raw.ends_with(ACK_SUFFIX) {
		tracing::debug!(frame = %raw, "dropping untracked acknowledgement");
		return;
	}

	// Step 3: parse as a frame; a parse failure is logged, never surfaced.
	let Some(frame) = (state.parse_frame)(&raw) else {
		tracing::warn!(raw = %raw, "failed to parse inbound frame");
		return;
	};
	let frame = Arc::new(frame);

	// Step 4: collect every tag this frame classifies under.
	let tags: Vec<ClassificationKey> = state
		.frame_classifiers
		.iter()
		.filter_map(|classifier| classifier(&frame))
		.collect();

	// Step 5: a one-shot frame waiter under any tag wins outright and
	// skips persistent delivery for the whole frame.
	for tag in &tags {
		if let Some(entries) = state.registry.one_shot_frame.get_mut(tag) {
			if let Some(entry) = entries.pop_front() {
				if let Some(handle) = state.timers.remove(&entry.id) {
					handle.abort();
				}
				if entries.is_empty() {
					state.registry.one_shot_frame.remove(tag);
				}
				let _ = entry.response.send(Ok(frame));
				return;
			}
		}
	}

	// Step 6: fan out to every persistent subscriber across every tag.
	let mut delivered = false;
	let now = Instant::now();
	for tag in &tags {
		let Some(entries) = state.registry.persistent.get(tag) else {
			continue;
		};
		// Snapshot ids + callbacks so delivery doesn't hold a borrow of
		// the registry across a callback that might itself unsubscribe.
		let snapshot: Vec<(SubscriptionId, bool, Option<TerminationPred<A>>, Callback<A>)> = entries
			.iter()
			.map(|entry| match &entry.callback {
				PersistentCallback::Plain(callback) => (entry.id, false, None, callback.clone()),
				PersistentCallback::WithIdle {
					callback, termination, ..
				} => (entry.id, true, Some(termination.clone()), callback.clone()),
			})
			.collect();

		for (id, has_idle, termination, callback) in snapshot {
			delivered = true;
			if has_idle {
				state.registry.touch_idle(id, now);
			}
			let sequential = tag.must_be_sequential();
			let deliver_frame = frame.clone();
			if sequential {
				run_callback(&callback, deliver_frame);
			} else {
				tokio::spawn(async move {
					run_callback(&callback, deliver_frame);
				});
			}
			if let Some(termination) = termination {
				if termination(&frame) {
					if let Some(handle) = state.timers.remove(&id) {
						handle.abort();
					}
					state.registry.remove_persistent(id);
				}
			}
		}
	}

	if !delivered {
		tracing::debug!(tags = ?tags, "unhandled frame");
	}
}

fn run_callback<A: Adaptable>(callback: &Callback<A>, frame: Arc<A>) {
	let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(frame)));
	if result.is_err() {
		tracing::error!("bus subscriber callback panicked");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::SearchAction;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;

	#[derive(Debug)]
	struct TestFrame {
		tag: String,
		payload: serde_json::Value,
	}

	impl Adaptable for TestFrame {
		fn correlation_id(&self) -> Option<&str> {
			None
		}
		fn group(&self) -> Option<&str> {
			Some(&self.tag)
		}
		fn channel(&self) -> Option<&str> {
			None
		}
		fn criterion(&self) -> Option<&str> {
			None
		}
		fn search_subscription_id(&self) -> Option<&str> {
			None
		}
		fn search_action(&self) -> Option<SearchAction> {
			None
		}
		fn payload(&self) -> &serde_json::Value {
			&self.payload
		}
	}

	fn parse_frame() -> ParseFrame<TestFrame> {
		Arc::new(|raw: &str| {
			raw.strip_prefix("frame:").map(|rest| TestFrame {
				tag: rest.to_string(),
				payload: serde_json::Value::String(rest.to_string()),
			})
		})
	}

	fn tag_classifier() -> FrameClassifierFn<TestFrame> {
		Box::new(|frame: &TestFrame| Some(ClassificationKey::Identity(frame.tag.clone())))
	}

	#[tokio::test]
	async fn one_shot_string_delivers_exactly_once() {
		let bus = Bus::<TestFrame>::new(parse_frame());
		let waiter = bus.subscribe_once_for_string(ClassificationKey::Identity("ping:ACK".into()), Duration::from_secs(1));
		bus.publish("ping:ACK");
		assert_eq!(waiter.await.unwrap(), "ping:ACK");
	}

	#[tokio::test]
	async fn untracked_ack_is_dropped_without_parse() {
		let bus = Bus::<TestFrame>::new(parse_frame());
		bus.add_frame_classifier(tag_classifier());
		// A plain publish with an ACK suffix should never reach a
		// frame-based persistent subscriber, even one matching by tag.
		let seen = Arc::new(AtomicUsize::new(0));
		let seen2 = seen.clone();
		bus.subscribe_for_frame(
			ClassificationKey::Identity("foo:ACK".into()),
			Arc::new(move |_frame| {
				seen2.fetch_add(1, Ordering::SeqCst);
			}),
		)
		.await
		.unwrap();
		bus.publish("foo:ACK");
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(seen.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn persistent_subscriber_receives_matching_frames() {
		let bus = Bus::<TestFrame>::new(parse_frame());
		bus.add_frame_classifier(tag_classifier());
		let received = Arc::new(Mutex::new(Vec::new()));
		let received2 = received.clone();
		bus.subscribe_for_frame(
			ClassificationKey::Identity("topic-a".into()),
			Arc::new(move |frame| received2.lock().unwrap().push(frame.tag.clone())),
		)
		.await
		.unwrap();
		bus.publish("frame:topic-a");
		bus.publish("frame:topic-a");
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(*received.lock().unwrap(), vec!["topic-a", "topic-a"]);
	}

	#[tokio::test]
	async fn unsubscribe_stops_further_delivery() {
		let bus = Bus::<TestFrame>::new(parse_frame());
		bus.add_frame_classifier(tag_classifier());
		let count = Arc::new(AtomicUsize::new(0));
		let count2 = count.clone();
		let id = bus
			.subscribe_for_frame(
				ClassificationKey::Identity("topic-b".into()),
				Arc::new(move |_frame| {
					count2.fetch_add(1, Ordering::SeqCst);
				}),
			)
			.await
			.unwrap();
		bus.publish("frame:topic-b");
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(bus.unsubscribe(id).await);
		assert!(!bus.unsubscribe(id).await);
		bus.publish("frame:topic-b");
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn one_shot_waiter_times_out() {
		let bus = Bus::<TestFrame>::new(parse_frame());
		let waiter = bus.subscribe_once_for_string(ClassificationKey::Identity("never".into()), Duration::from_secs(5));
		tokio::time::advance(Duration::from_secs(6)).await;
		assert!(matches!(waiter.await, Err(Error::Timeout)));
	}

	#[tokio::test(start_paused = true)]
	async fn idle_timeout_rearms_until_gap_exceeds_window() {
		let bus = Bus::<TestFrame>::new(parse_frame());
		bus.add_frame_classifier(tag_classifier());
		let timed_out = Arc::new(AtomicUsize::new(0));
		let timed_out2 = timed_out.clone();
		bus.subscribe_for_frame_with_idle_timeout(
			ClassificationKey::Identity("topic-c".into()),
			Duration::from_secs(10),
			Arc::new(|_frame| {}),
			Arc::new(|_frame: &TestFrame| false),
			Arc::new(move |_err| {
				timed_out2.fetch_add(1, Ordering::SeqCst);
			}),
		)
		.await
		.unwrap();

		// Keep feeding frames inside the idle window: no timeout fires.
		for _ in 0..3 {
			tokio::time::advance(Duration::from_secs(8)).await;
			bus.publish("frame:topic-c");
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
		assert_eq!(timed_out.load(Ordering::SeqCst), 0);

		// Now let the gap exceed the idle window.
		tokio::time::advance(Duration::from_secs(11)).await;
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert_eq!(timed_out.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn termination_predicate_removes_entry_without_on_timeout() {
		let bus = Bus::<TestFrame>::new(parse_frame());
		bus.add_frame_classifier(tag_classifier());
		let timed_out = Arc::new(AtomicUsize::new(0));
		let timed_out2 = timed_out.clone();
		bus.subscribe_for_frame_with_idle_timeout(
			ClassificationKey::Identity("topic-d".into()),
			Duration::from_secs(30),
			Arc::new(|_frame| {}),
			Arc::new(|frame: &TestFrame| frame.tag == "topic-d"),
			Arc::new(move |_err| {
				timed_out2.fetch_add(1, Ordering::SeqCst);
			}),
		)
		.await
		.unwrap();
		bus.publish("frame:topic-d");
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(timed_out.load(Ordering::SeqCst), 0);
	}
}
