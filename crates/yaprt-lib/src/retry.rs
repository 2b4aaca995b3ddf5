//! Retrying of fallible operations that can fail for transient reasons.
//!
//! Only wrap operations whose failure may go away on its own, such as network fetches or clones.
//! Checkout conflicts and unsatisfiable constraints must never be retried.

use std::time::Duration;

use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Number of tries, not retries. `0` is treated as `1`.
	pub attempts: u32,
	pub delay: Duration,
	/// Multiplier applied to the delay after every failed attempt.
	pub backoff: f64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempts: 3,
			delay: Duration::from_secs(1),
			backoff: 1.0,
		}
	}
}

impl RetryPolicy {
	/// A policy which tries exactly once.
	pub fn never() -> Self {
		Self { attempts: 1, delay: Duration::ZERO, backoff: 1.0 }
	}

	/// Calls `operation` until it succeeds or the attempts run out.
	///
	/// # Returns
	/// The first success, or the error of the last attempt paired with the number of attempts made.
	pub fn run<T, E, F>(&self, description: &str, mut operation: F) -> Result<T, (u32, E)>
	where
		F: FnMut() -> Result<T, E>,
		E: std::fmt::Display,
	{
		let attempts = self.attempts.max(1);
		let mut delay = self.delay;
		let mut attempt = 1;
		loop {
			match operation() {
				Ok(v) => return Ok(v),
				Err(e) if attempt >= attempts => return Err((attempt, e)),
				Err(e) => {
					log::warn!("{} failed (attempt {}/{}): {}", description, attempt, attempts, e);
					if !delay.is_zero() {
						std::thread::sleep(delay);
					}
					delay = self.next_delay(delay);
					attempt += 1;
				},
			}
		}
	}

	/// `delay` grown by the backoff, saturating at [`Duration::MAX`].
	fn next_delay(&self, delay: Duration) -> Duration {
		if delay.is_zero() {
			return delay;
		}
		Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff.max(0.0)).unwrap_or(Duration::MAX)
	}

	/// Same as [`run`](RetryPolicy::run) but escalates an exhausted operation to [`Transient`](crate::Error::Transient).
	pub fn run_transient<T, E, F>(&self, description: &str, operation: F) -> crate::Result<T>
	where
		F: FnMut() -> Result<T, E>,
		E: std::fmt::Display,
	{
		self.run(description, operation).map_err(|(attempts, e)| crate::Error::Transient {
			attempts,
			message: format!("{}: {}", description, e),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn instant(attempts: u32) -> RetryPolicy {
		RetryPolicy { attempts, delay: Duration::ZERO, backoff: 2.0 }
	}

	#[test]
	fn retry_returns_first_success() {
		let mut calls = 0;
		let res: Result<u32, (u32, String)> = instant(3).run("flaky", || {
			calls += 1;
			if calls < 2 { Err("nope".to_string()) } else { Ok(calls) }
		});
		assert_eq!(res.unwrap(), 2);
		assert_eq!(calls, 2);
	}

	#[test]
	fn retry_gives_up_after_attempts() {
		let mut calls = 0;
		let res: Result<(), (u32, String)> = instant(3).run("broken", || {
			calls += 1;
			Err(format!("failure {}", calls))
		});
		assert_eq!(res.unwrap_err(), (3, "failure 3".to_string()));
		assert_eq!(calls, 3);
	}

	#[test]
	fn retry_zero_attempts_still_tries_once() {
		let mut calls = 0;
		let _ = instant(0).run("once", || -> Result<(), String> { calls += 1; Err("x".into()) });
		assert_eq!(calls, 1);
	}

	#[test]
	fn retry_backoff_saturates() {
		let policy = RetryPolicy { attempts: 3, delay: Duration::from_secs(1), backoff: f64::MAX };
		assert_eq!(policy.next_delay(Duration::from_secs(1)), Duration::MAX);
		assert_eq!(policy.next_delay(Duration::MAX), Duration::MAX);
		assert_eq!(policy.next_delay(Duration::ZERO), Duration::ZERO);

		let doubling = RetryPolicy { backoff: 2.0, ..policy };
		assert_eq!(doubling.next_delay(Duration::from_millis(250)), Duration::from_millis(500));
		let negative = RetryPolicy { backoff: -1.0, ..doubling };
		assert_eq!(negative.next_delay(Duration::from_secs(1)), Duration::ZERO);
	}

	#[test]
	fn retry_escalates_to_transient() {
		let err = instant(2).run_transient("fetch", || -> Result<(), String> { Err("timeout".into()) }).unwrap_err();
		match err {
			crate::Error::Transient { attempts, message } => {
				assert_eq!(attempts, 2);
				assert!(message.contains("timeout"));
			},
			e => panic!("unexpected error {:?}", e),
		}
	}
}
