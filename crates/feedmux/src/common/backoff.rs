// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Exponential backoff with a cap and optional jitter for reconnection delays.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff state.
///
/// Each call to [`ExponentialBackoff::next_duration`] returns the current delay (plus up to
/// `jitter_ms` of random jitter) and then multiplies the delay by `factor`, capped at
/// `delay_max`. With `jitter_ms == 0` the sequence is fully deterministic.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    delay_initial: Duration,
    delay_max: Duration,
    delay_current: Duration,
    factor: f64,
    jitter_ms: u64,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`] instance.
    ///
    /// # Errors
    ///
    /// Returns an error if `delay_initial` is zero, `delay_max` is below `delay_initial`, or
    /// `factor` is not within `[1.0, 100.0]`.
    pub fn new(
        delay_initial: Duration,
        delay_max: Duration,
        factor: f64,
        jitter_ms: u64,
    ) -> anyhow::Result<Self> {
        if delay_initial.is_zero() {
            anyhow::bail!("delay_initial must be greater than zero");
        }
        if delay_max < delay_initial {
            anyhow::bail!("delay_max ({delay_max:?}) must be >= delay_initial ({delay_initial:?})");
        }
        if !(1.0..=100.0).contains(&factor) {
            anyhow::bail!("factor must be within [1.0, 100.0], was {factor}");
        }

        Ok(Self {
            delay_initial,
            delay_max,
            delay_current: delay_initial,
            factor,
            jitter_ms,
        })
    }

    /// Returns the next delay and advances the backoff.
    pub fn next_duration(&mut self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };

        let delay = (self.delay_current + jitter).min(self.delay_max);

        let next_nanos = (self.delay_current.as_nanos() as f64 * self.factor).round();
        let max_nanos = self.delay_max.as_nanos() as f64;
        self.delay_current = Duration::from_nanos(next_nanos.min(max_nanos) as u64);

        delay
    }

    /// Resets the delay to its initial value (called after a successful connection).
    pub fn reset(&mut self) {
        self.delay_current = self.delay_initial;
    }

    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.delay_current
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_sequence_doubles_until_cap() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            2.0,
            0,
        )
        .unwrap();

        let delays: Vec<u128> = (0..6).map(|_| backoff.next_duration().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[rstest]
    fn test_reset_restores_initial_delay() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(5), 3.0, 0)
                .unwrap();
        backoff.next_duration();
        backoff.next_duration();
        assert_eq!(backoff.current_delay(), Duration::from_millis(450));

        backoff.reset();
        assert_eq!(backoff.next_duration(), Duration::from_millis(50));
    }

    #[rstest]
    fn test_jitter_stays_within_bound() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            1.0,
            25,
        )
        .unwrap();

        for _ in 0..50 {
            let delay = backoff.next_duration();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[rstest]
    #[case(Duration::ZERO, Duration::from_secs(1), 2.0)]
    #[case(Duration::from_secs(2), Duration::from_secs(1), 2.0)]
    #[case(Duration::from_secs(1), Duration::from_secs(2), 0.5)]
    #[case(Duration::from_secs(1), Duration::from_secs(2), 101.0)]
    fn test_invalid_parameters(
        #[case] initial: Duration,
        #[case] max: Duration,
        #[case] factor: f64,
    ) {
        assert!(ExponentialBackoff::new(initial, max, factor, 0).is_err());
    }
}
