//! Registry of live subscriptions, owned exclusively by the bus task.
//! No locks: the single-owner-task pattern mirrors the teacher's
//! `ClientState`, which owns all mutable client state and is only ever
//! touched from inside `client_task`.

use crate::classify::ClassificationKey;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Opaque handle to a persistent subscription, returned at subscribe
/// time and required to unsubscribe. Backed by a wrapping counter
/// rather than a `Uuid` — identity, not randomness, is all that's
/// needed, and a counter is cheaper to generate per the teacher's
/// packet-id allocation style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
	pub(crate) fn next() -> Self {
		Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
	}
}

pub(crate) struct OneShotEntry<T> {
	pub id: SubscriptionId,
	pub response: T,
}

pub(crate) struct PersistentEntry<C> {
	pub id: SubscriptionId,
	pub callback: C,
	pub idle: Option<IdleState>,
}

pub(crate) struct IdleState {
	pub duration: std::time::Duration,
	pub last_message: Instant,
}

/// Keeps every live waiter and subscriber, keyed by classification tag.
pub(crate) struct Registry<OneShotString, OneShotFrame, PersistentCallback> {
	pub one_shot_string: HashMap<ClassificationKey, VecDeque<OneShotEntry<OneShotString>>>,
	pub one_shot_frame: HashMap<ClassificationKey, VecDeque<OneShotEntry<OneShotFrame>>>,
	pub persistent: HashMap<ClassificationKey, Vec<PersistentEntry<PersistentCallback>>>,
	/// Reverse index from subscription id to its tag, so unsubscribe
	/// doesn't need to scan every tag bucket.
	pub persistent_index: HashMap<SubscriptionId, ClassificationKey>,
}

impl<S, F, C> Default for Registry<S, F, C> {
	fn default() -> Self {
		Self {
			one_shot_string: HashMap::new(),
			one_shot_frame: HashMap::new(),
			persistent: HashMap::new(),
			persistent_index: HashMap::new(),
		}
	}
}

impl<S, F, C> Registry<S, F, C> {
	pub fn add_persistent(&mut self, tag: ClassificationKey, callback: C, idle: Option<IdleState>) -> SubscriptionId {
		let id = SubscriptionId::next();
		self.persistent
			.entry(tag.clone())
			.or_default()
			.push(PersistentEntry { id, callback, idle });
		self.persistent_index.insert(id, tag);
		id
	}

	pub fn remove_persistent(&mut self, id: SubscriptionId) -> bool {
		let Some(tag) = self.persistent_index.remove(&id) else {
			return false;
		};
		if let Some(entries) = self.persistent.get_mut(&tag) {
			entries.retain(|entry| entry.id != id);
			if entries.is_empty() {
				self.persistent.remove(&tag);
			}
		}
		true
	}

	pub fn touch_idle(&mut self, id: SubscriptionId, now: Instant) {
		if let Some(tag) = self.persistent_index.get(&id) {
			if let Some(entries) = self.persistent.get_mut(tag) {
				if let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) {
					if let Some(idle) = &mut entry.idle {
						idle.last_message = now;
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn subscription_ids_are_unique() {
		let a = SubscriptionId::next();
		let b = SubscriptionId::next();
		assert_ne!(a, b);
	}

	#[test]
	fn remove_persistent_drops_empty_bucket() {
		let mut registry: Registry<(), (), ()> = Registry::default();
		let tag = ClassificationKey::Identity("x".into());
		let id = registry.add_persistent(tag.clone(), (), None);
		assert!(registry.persistent.contains_key(&tag));
		assert!(registry.remove_persistent(id));
		assert!(!registry.persistent.contains_key(&tag));
		assert!(!registry.remove_persistent(id));
	}
}
