//! Sliding-window release budgets, the ledgers behind the per-second and per-minute ceilings.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Returned when a window has no budget left to reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExhausted;

/// A sliding-window release budget: at most `limit` reservations in any `window`.
///
/// Each reservation is handed back `window` after it was made. Reservations are queued in
/// the order they were made, which is also the order in which they expire, so expiry pops
/// from the front of a ring buffer in constant time per reservation.
pub struct WindowBudget {
    window: Duration,
    limit: usize,
    reservations: VecDeque<Instant>,
}

impl WindowBudget {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            window,
            limit,
            reservations: VecDeque::new(),
        }
    }

    /// Hand back every reservation whose window has closed by `now`.
    fn expire(&mut self, now: Instant) {
        while let Some(&made_at) = self.reservations.front() {
            if made_at + self.window > now {
                break; // Everything behind this one is younger still
            }
            self.reservations.pop_front();
        }
    }

    /// How many reservations could still be made at `now`.
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.limit.saturating_sub(self.reservations.len())
    }

    /// Reserve one release at `now`.
    pub fn try_reserve(&mut self, now: Instant) -> Result<(), BudgetExhausted> {
        if self.remaining(now) == 0 {
            return Err(BudgetExhausted);
        }
        self.reservations.push_back(now);
        Ok(())
    }

    /// The instant at which the oldest outstanding reservation will be handed back.
    pub fn next_release(&mut self, now: Instant) -> Option<Instant> {
        self.expire(now);
        self.reservations.front().map(|&made_at| made_at + self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::advance;

    /// Test basic functionality of a one-per-second window.
    #[tokio::test(start_paused = true)]
    async fn test_single_slot_window() {
        let one_second = Duration::from_secs(1);
        let one_nano = Duration::from_nanos(1);

        let mut budget = WindowBudget::new(1, one_second);

        assert_eq!(budget.try_reserve(Instant::now()), Ok(()));
        assert_eq!(budget.try_reserve(Instant::now()), Err(BudgetExhausted));

        // Nearly a second later, still exhausted
        advance(one_second - one_nano).await;
        assert_eq!(budget.try_reserve(Instant::now()), Err(BudgetExhausted));

        // The rest of the way: exactly one more
        advance(one_nano).await;
        assert_eq!(budget.try_reserve(Instant::now()), Ok(()));
        assert_eq!(budget.try_reserve(Instant::now()), Err(BudgetExhausted));

        // A long idle spell does not bank extra budget
        advance(5 * one_second).await;
        assert_eq!(budget.remaining(Instant::now()), 1);
    }

    /// Reservations spread across a minute are handed back one by one, sixty seconds after each.
    #[tokio::test(start_paused = true)]
    async fn test_rolling_minute() {
        let one_minute = Duration::from_secs(60);
        let ten_seconds = Duration::from_secs(10);
        let one_nano = Duration::from_nanos(1);

        let mut budget = WindowBudget::new(3, one_minute);
        let start = Instant::now();

        for _ in 0..3 {
            assert_eq!(budget.try_reserve(Instant::now()), Ok(()));
            advance(ten_seconds).await;
        }
        assert_eq!(budget.remaining(Instant::now()), 0);
        assert_eq!(budget.next_release(Instant::now()), Some(start + one_minute));

        // Just before the first reservation expires
        advance(one_minute - 3 * ten_seconds - one_nano).await;
        assert_eq!(budget.remaining(Instant::now()), 0);

        advance(one_nano).await;
        assert_eq!(budget.remaining(Instant::now()), 1);
        assert_eq!(
            budget.next_release(Instant::now()),
            Some(start + one_minute + ten_seconds)
        );

        advance(2 * ten_seconds).await;
        assert_eq!(budget.remaining(Instant::now()), 3);
        assert_eq!(budget.next_release(Instant::now()), None);
    }

    /// A full ledger of a couple of hundred thousand reservations expires in one pass without
    /// stalling the caller.
    #[tokio::test(start_paused = true)]
    async fn test_large_ledger_expires_in_one_pass() {
        let limit = 200_000;
        let mut budget = WindowBudget::new(limit, Duration::from_secs(60));

        for _ in 0..limit {
            assert_eq!(budget.try_reserve(Instant::now()), Ok(()));
        }
        assert_eq!(budget.remaining(Instant::now()), 0);
        assert_eq!(budget.try_reserve(Instant::now()), Err(BudgetExhausted));

        advance(Duration::from_secs(61)).await;

        let wall_clock = std::time::Instant::now();
        assert_eq!(budget.remaining(Instant::now()), limit);
        assert!(
            wall_clock.elapsed() < Duration::from_secs(2),
            "expiring {} reservations took {:?}",
            limit,
            wall_clock.elapsed()
        );
        assert_eq!(budget.next_release(Instant::now()), None);
    }
}
