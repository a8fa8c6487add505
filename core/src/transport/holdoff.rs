use std::ops::Range;
use std::time::Duration;

/// Exponential-backoff delay generator for the reconnect loop. Tracks a
/// current delay between `min` and `max`, doubling on each call to
/// [`HoldOff::increase`] and resetting once the connection is
/// re-established.
#[derive(Clone, Debug)]
pub struct HoldOff {
	min: Duration,
	max: Duration,
	cur: Option<Duration>,
}

impl HoldOff {
	pub fn new(range: Range<Duration>) -> Self {
		Self {
			min: range.start,
			max: range.end,
			cur: None,
		}
	}

	/// Clears the current delay so the next wait is `min` again.
	pub fn reset(&mut self) {
		self.cur = None;
	}

	/// Doubles the current delay (starting from `min`), clamped to `max`.
	pub fn increase(&mut self) {
		let next = match self.cur {
			Some(cur) => cur.saturating_mul(2),
			None => self.min,
		};
		self.cur = Some(next.min(self.max));
	}

	/// Sleeps for the current delay, leaving it unchanged.
	pub async fn wait(&self) {
		if let Some(cur) = self.cur {
			tokio::time::sleep(cur).await;
		}
	}

	/// Sleeps for the current delay then doubles it for next time.
	pub async fn wait_and_increase(&mut self) {
		self.wait().await;
		self.increase();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_unset() {
		let h = HoldOff::new(Duration::from_millis(100)..Duration::from_secs(10));
		assert_eq!(h.cur, None);
	}

	#[test]
	fn increase_doubles_from_min_and_clamps() {
		let mut h = HoldOff::new(Duration::from_millis(100)..Duration::from_millis(350));
		h.increase();
		assert_eq!(h.cur, Some(Duration::from_millis(100)));
		h.increase();
		assert_eq!(h.cur, Some(Duration::from_millis(200)));
		h.increase();
		assert_eq!(h.cur, Some(Duration::from_millis(350)));
	}

	#[test]
	fn reset_clears_current_delay() {
		let mut h = HoldOff::new(Duration::from_millis(100)..Duration::from_secs(10));
		h.increase();
		h.increase();
		h.reset();
		assert_eq!(h.cur, None);
	}

	#[tokio::test(start_paused = true)]
	async fn wait_and_increase_sleeps_then_advances() {
		let mut h = HoldOff::new(Duration::from_millis(100)..Duration::from_secs(10));
		h.increase();
		let start = tokio::time::Instant::now();
		h.wait_and_increase().await;
		assert_eq!(start.elapsed(), Duration::from_millis(100));
		assert_eq!(h.cur, Some(Duration::from_millis(200)));
	}
}
