// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generic wait-with-timeout primitive.
//!
//! Every blocking operation in this crate (connection establishment,
//! subscription activation, message arrival) is built on [`wait_until`]:
//! poll a predicate until it holds or a deadline elapses, then return the
//! predicate's final value. Timeouts never become errors.

use std::time::Duration;

use tokio::time::Instant;

/// Default poll-resolution divisor.
pub const DEFAULT_RESOLUTION: u32 = 100;

/// Polls `condition` until it returns true or `timeout` elapses.
///
/// Returns the final value of `condition`, so a timeout degrades to `false`
/// rather than an error. If the condition already holds, returns `true`
/// without sleeping.
///
/// Without a timeout the loop polls forever with a fixed 1 second sleep.
/// With a timeout the sleep interval is `min(1s, timeout / resolution)`, so
/// short timeouts still get fine-grained polling while long ones are capped
/// at 1 second ticks.
///
/// A progress line is emitted via `tracing` roughly once per elapsed whole
/// second, carrying `reason`, to aid diagnosing stuck waits. Pass an empty
/// reason to suppress progress logging.
///
/// The condition may read shared state that flips back and forth; nothing
/// here assumes it is monotonic.
pub async fn wait_until<F>(
    condition: F,
    timeout: Option<Duration>,
    resolution: u32,
    reason: &str,
) -> bool
where
    F: Fn() -> bool,
{
    if condition() {
        return true;
    }

    let started = Instant::now();
    let deadline = timeout.map(|t| started + t);
    let interval = match timeout {
        None => Duration::from_secs(1),
        Some(t) => Duration::from_secs(1).min(t / resolution.max(1)),
    };

    let mut last_logged_secs = 0;
    loop {
        if condition() {
            return true;
        }
        if deadline.is_some_and(|d| Instant::now() > d) {
            return condition();
        }

        tokio::time::sleep(interval).await;

        let elapsed = started.elapsed();
        if !reason.is_empty() && elapsed.as_secs() > last_logged_secs {
            last_logged_secs = elapsed.as_secs();
            if let Some(t) = timeout {
                tracing::info!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    timeout_secs = t.as_secs_f64(),
                    "waiting: {reason}"
                );
            } else {
                tracing::info!(elapsed_secs = elapsed.as_secs_f64(), "waiting: {reason}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_condition_holds() {
        let started = Instant::now();
        let result = wait_until(|| true, Some(Duration::from_secs(10)), 10, "").await;
        assert!(result);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_one_poll_interval() {
        let timeout = Duration::from_millis(500);
        let started = Instant::now();
        let result = wait_until(|| false, Some(timeout), 10, "never").await;
        assert!(!result);

        // Interval is min(1s, 500ms / 10) = 50ms; elapsed must land in
        // [timeout, timeout + interval].
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "returned before the deadline: {elapsed:?}");
        assert!(
            elapsed <= timeout + Duration::from_millis(50),
            "overshot by more than one poll interval: {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn observes_condition_flipping_true() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            setter.store(true, Ordering::Release);
        });

        let started = Instant::now();
        let result = wait_until(
            || flag.load(Ordering::Acquire),
            Some(Duration::from_secs(5)),
            100,
            "flag",
        )
        .await;
        assert!(result);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn long_timeout_polls_at_one_second_ticks() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            setter.store(true, Ordering::Release);
        });

        // timeout / resolution = 6s, capped at 1s ticks; the flag flips at
        // 1.5s so the wait must observe it on the 2s tick.
        let started = Instant::now();
        let result = wait_until(
            || flag.load(Ordering::Acquire),
            Some(Duration::from_secs(600)),
            100,
            "tick",
        )
        .await;
        assert!(result);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn no_timeout_blocks_until_condition() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            setter.store(true, Ordering::Release);
        });

        let result = wait_until(|| flag.load(Ordering::Acquire), None, 10, "").await;
        assert!(result);
    }
}
