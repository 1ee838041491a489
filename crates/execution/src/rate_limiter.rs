//! Broker order throttling.
//!
//! Three trailing windows (second, minute, day) sized below the broker's
//! published ceilings, a bounded queue that absorbs short bursts, and an
//! in-flight table that refuses a second live order for the same
//! (symbol, strategy) key.
//!
//! A send stays counted in every window for that window's full span, so no
//! interval of one second, one minute or one day ever holds more sends than
//! the effective limit. Queued orders are additionally paced to one per
//! `1s / per_second` so a drained backlog does not arrive as a burst.
//! Orders cancelled while queued are dropped before they take budget.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tradeflow_core::{Order, OrderKey, RateLimitConfig};
use uuid::Uuid;

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86_400);

/// Result of asking the limiter to send an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Send budget taken; send now.
    Accepted,
    /// Windows full; the order waits in the queue for [`OrderRateLimiter::next_ready`].
    Queued,
    /// Windows full and queue full. Callers must not retry in a loop.
    RateLimited,
    /// A live order already exists for the key.
    Duplicate,
}

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n.max(1)).unwrap_or(NonZeroU32::MIN)
}

/// Send times inside one trailing window.
#[derive(Debug)]
struct SendWindow {
    span: Duration,
    limit: usize,
    sent: VecDeque<Instant>,
}

impl SendWindow {
    fn new(span: Duration, limit: u32) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            span,
            limit,
            sent: VecDeque::with_capacity(limit.min(256)),
        }
    }

    fn expire(&mut self, now: Instant) {
        while self.sent.front().is_some_and(|at| *at + self.span <= now) {
            self.sent.pop_front();
        }
    }

    /// Time until one more send fits; zero when it fits now.
    fn wait(&self, now: Instant) -> Duration {
        if self.sent.len() < self.limit {
            return Duration::ZERO;
        }
        self.sent
            .front()
            .map_or(Duration::ZERO, |oldest| (*oldest + self.span).saturating_duration_since(now))
    }
}

pub struct OrderRateLimiter {
    /// Per-second, per-minute and per-day windows.
    windows: Mutex<[SendWindow; 3]>,
    /// Spaces sends drained from the queue.
    pacer: GovernorLimiter,
    limits: (u32, u32, u32),
    queue_tx: mpsc::Sender<Order>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Order>>,
    in_flight: Mutex<HashSet<OrderKey>>,
    /// Queued orders cancelled before their turn.
    discarded: Mutex<HashSet<Uuid>>,
}

impl OrderRateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let (second, minute, day) = (config.per_second(), config.per_minute(), config.per_day());
        let pace = Quota::with_period(SECOND / second.max(1))
            .unwrap_or_else(|| Quota::per_second(non_zero(second)))
            .allow_burst(NonZeroU32::MIN);
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        info!(
            per_second = second,
            per_minute = minute,
            per_day = day,
            queue = config.queue_capacity,
            "Order rate limiter configured"
        );

        Self {
            windows: Mutex::new([
                SendWindow::new(SECOND, second),
                SendWindow::new(MINUTE, minute),
                SendWindow::new(DAY, day),
            ]),
            pacer: RateLimiter::direct(pace),
            limits: (second, minute, day),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            in_flight: Mutex::new(HashSet::new()),
            discarded: Mutex::new(HashSet::new()),
        }
    }

    /// Effective (second, minute, day) budgets after the safety margin.
    #[must_use]
    pub fn limits(&self) -> (u32, u32, u32) {
        self.limits
    }

    /// Records a send in every window if all of them have room. Otherwise
    /// nothing is recorded and the longest wait is returned.
    fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let mut wait = Duration::ZERO;
        for window in windows.iter_mut() {
            window.expire(now);
            wait = wait.max(window.wait(now));
        }
        if wait > Duration::ZERO {
            return Err(wait);
        }
        for window in windows.iter_mut() {
            window.sent.push_back(now);
        }
        Ok(())
    }

    /// Admits an order for sending. Never waits. A queued order is copied
    /// into the queue; the caller keeps its own for bookkeeping.
    pub fn admit(&self, order: &Order) -> Admission {
        let key = order.key.clone();
        if !self.claim(&key) {
            debug!(key = %key, "Order refused: key already in flight");
            return Admission::Duplicate;
        }

        if self.try_acquire().is_ok() {
            return Admission::Accepted;
        }

        match self.queue_tx.try_send(order.clone()) {
            Ok(()) => {
                debug!(key = %key, "Order queued for send budget");
                Admission::Queued
            }
            Err(_) => {
                self.release(&key);
                warn!(key = %key, "Order rate limited: queue full");
                Admission::RateLimited
            }
        }
    }

    /// Waits for the next queued order and for room to send it. Discarded
    /// orders are skipped without taking budget. Returns `None` once the
    /// limiter is dropped.
    pub async fn next_ready(&self) -> Option<Order> {
        'next: loop {
            let order = self.queue_rx.lock().await.recv().await?;
            loop {
                if self.take_discarded(&order) {
                    continue 'next;
                }
                self.pacer.until_ready().await;
                if self.take_discarded(&order) {
                    continue 'next;
                }
                match self.try_acquire() {
                    Ok(()) => return Some(order),
                    Err(wait) => {
                        debug!(
                            key = %order.key,
                            wait_ms = millis(wait),
                            "Queued order waiting for window"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
    }

    /// Marks a queued order as cancelled; its copy in the queue is dropped
    /// instead of sent.
    pub fn discard(&self, order_id: Uuid) {
        self.discarded.lock().insert(order_id);
    }

    fn take_discarded(&self, order: &Order) -> bool {
        let skipped = self.discarded.lock().remove(&order.order_id);
        if skipped {
            debug!(
                order_id = %order.order_id,
                key = %order.key,
                "Discarded queued order skipped"
            );
        }
        skipped
    }

    /// Drops discarded orders from the queue now, freeing their slots, and
    /// returns how many were dropped. Live orders keep their place. A worker
    /// parked on the queue holds it only while it is empty; anything it
    /// takes afterwards is still skipped by [`Self::next_ready`].
    pub fn purge_discarded(&self) -> usize {
        let Ok(mut rx) = self.queue_rx.try_lock() else {
            return 0;
        };
        let mut kept = Vec::new();
        let mut dropped = 0;
        {
            let mut discarded = self.discarded.lock();
            while let Ok(order) = rx.try_recv() {
                if discarded.remove(&order.order_id) {
                    dropped += 1;
                } else {
                    kept.push(order);
                }
            }
        }
        for order in kept {
            // Room is guaranteed: everything was just taken out
            if let Err(e) = self.queue_tx.try_send(order) {
                warn!(error = %e, "Queued order lost while purging");
            }
        }
        dropped
    }

    /// Empties the queue without sending (used on shutdown). Returns
    /// nothing if a worker is still parked on the queue.
    pub fn drain_queued(&self) -> Vec<Order> {
        let Ok(mut rx) = self.queue_rx.try_lock() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Ok(order) = rx.try_recv() {
            drained.push(order);
        }
        let mut discarded = self.discarded.lock();
        for order in &drained {
            discarded.remove(&order.order_id);
        }
        drained
    }

    /// Marks `key` as having a live order. False if it already had one.
    pub fn claim(&self, key: &OrderKey) -> bool {
        self.in_flight.lock().insert(key.clone())
    }

    /// Frees `key` once its order reaches a terminal state.
    pub fn release(&self, key: &OrderKey) {
        self.in_flight.lock().remove(key);
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &OrderKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for OrderRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRateLimiter")
            .field("limits", &self.limits)
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradeflow_core::{Instrument, OrderType, Side};

    fn order(symbol: &str, strategy: &str) -> Order {
        Order::new(
            format!("sig-{symbol}"),
            OrderKey::new(symbol, strategy),
            Instrument::equity(symbol, "NSE"),
            Side::Buy,
            1,
            OrderType::Market,
        )
    }

    #[test]
    fn fifteen_orders_against_seven_per_second() {
        let limiter = OrderRateLimiter::new(&RateLimitConfig::default());
        assert_eq!(limiter.limits(), (7, 140, 2100));

        let results: Vec<_> = (0..15)
            .map(|i| limiter.admit(&order(&format!("SYM{i}"), "burst")))
            .collect();
        let accepted = results.iter().filter(|a| **a == Admission::Accepted).count();
        let deferred = results
            .iter()
            .filter(|a| matches!(a, Admission::Queued | Admission::RateLimited))
            .count();
        assert_eq!(accepted, 7);
        assert_eq!(deferred, 8);
    }

    #[test]
    fn full_queue_fails_fast_and_frees_the_key() {
        let config = RateLimitConfig {
            queue_capacity: 3,
            ..RateLimitConfig::default()
        };
        let limiter = OrderRateLimiter::new(&config);
        let results: Vec<_> = (0..15)
            .map(|i| limiter.admit(&order(&format!("SYM{i}"), "burst")))
            .collect();
        let count = |want: Admission| results.iter().filter(|a| **a == want).count();
        assert_eq!(count(Admission::Accepted), 7);
        assert_eq!(count(Admission::Queued), 3);
        assert_eq!(count(Admission::RateLimited), 5);
        // Rate-limited keys are not left in flight
        assert_eq!(limiter.in_flight_count(), 10);
    }

    #[test]
    fn second_order_for_live_key_is_refused() {
        let limiter = OrderRateLimiter::new(&RateLimitConfig::default());
        assert_eq!(limiter.admit(&order("INFY", "momentum")), Admission::Accepted);
        assert_eq!(limiter.admit(&order("INFY", "momentum")), Admission::Duplicate);
        // Same symbol, different strategy is a different key
        assert_eq!(limiter.admit(&order("INFY", "reversal")), Admission::Accepted);

        limiter.release(&OrderKey::new("INFY", "momentum"));
        assert_eq!(limiter.admit(&order("INFY", "momentum")), Admission::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn no_one_second_window_exceeds_the_budget() {
        let limiter = OrderRateLimiter::new(&RateLimitConfig::default());
        let start = Instant::now();
        let mut accepted = Vec::new();
        for i in 0..500 {
            if limiter.admit(&order(&format!("T{i}"), "steady")) == Admission::Accepted {
                accepted.push(Instant::now() - start);
            }
            tokio::time::advance(Duration::from_millis(5)).await;
        }

        // 2.5 seconds of traffic: three windows' worth, never more
        assert_eq!(accepted.len(), 21);
        for (i, first) in accepted.iter().enumerate() {
            let in_window = accepted[i..]
                .iter()
                .take_while(|at| **at < *first + SECOND)
                .count();
            assert!(in_window <= 7, "{in_window} sends within 1s of {first:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn minute_budget_holds_across_second_windows() {
        let config = RateLimitConfig {
            broker_per_second: 100,
            queue_capacity: 1,
            ..RateLimitConfig::default()
        };
        let limiter = OrderRateLimiter::new(&config);
        assert_eq!(limiter.limits(), (70, 140, 2100));

        let mut accepted = 0;
        for second in 0..61 {
            for i in 0..100 {
                let symbol = format!("M{second}-{i}");
                if limiter.admit(&order(&symbol, "steady")) == Admission::Accepted {
                    accepted += 1;
                }
            }
            if second == 59 {
                assert_eq!(accepted, 140);
            }
            tokio::time::advance(SECOND).await;
        }
        // The first second's sends expire at 60s
        assert_eq!(accepted, 210);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_orders_come_out_in_order() {
        let limiter = OrderRateLimiter::new(&RateLimitConfig::default());
        for i in 0..9 {
            limiter.admit(&order(&format!("Q{i}"), "drain"));
        }
        let first = limiter.next_ready().await.unwrap();
        assert_eq!(first.key.symbol, "Q7");
        let rest = limiter.drain_queued();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key.symbol, "Q8");
    }

    #[tokio::test(start_paused = true)]
    async fn discarded_orders_are_skipped_without_taking_budget() {
        let limiter = OrderRateLimiter::new(&RateLimitConfig::default());
        let orders: Vec<Order> = (0..10).map(|i| order(&format!("D{i}"), "drain")).collect();
        for o in &orders {
            limiter.admit(o);
        }
        limiter.discard(orders[7].order_id);
        limiter.discard(orders[8].order_id);

        let next = limiter.next_ready().await.unwrap();
        assert_eq!(next.key.symbol, "D9");
        // Seven direct sends plus D9; the day window saw nothing else
        assert_eq!(limiter.windows.lock()[2].sent.len(), 8);
        assert!(limiter.discarded.lock().is_empty());
    }

    #[test]
    fn purge_frees_slots_and_keeps_live_orders_in_order() {
        let config = RateLimitConfig {
            queue_capacity: 3,
            ..RateLimitConfig::default()
        };
        let limiter = OrderRateLimiter::new(&config);
        let orders: Vec<Order> = (0..10).map(|i| order(&format!("P{i}"), "purge")).collect();
        for o in &orders {
            limiter.admit(o);
        }
        // Queue full: P7, P8, P9
        assert_eq!(limiter.admit(&order("EXIT", "purge")), Admission::RateLimited);

        limiter.discard(orders[7].order_id);
        limiter.discard(orders[9].order_id);
        assert_eq!(limiter.purge_discarded(), 2);
        assert_eq!(limiter.admit(&order("EXIT", "purge")), Admission::Queued);

        let left: Vec<String> = limiter
            .drain_queued()
            .into_iter()
            .map(|o| o.key.symbol)
            .collect();
        assert_eq!(left, ["P8", "EXIT"]);
    }

    #[test]
    fn drain_forgets_discarded_ids() {
        let limiter = OrderRateLimiter::new(&RateLimitConfig::default());
        let orders: Vec<Order> = (0..9).map(|i| order(&format!("F{i}"), "drain")).collect();
        for o in &orders {
            limiter.admit(o);
        }
        limiter.discard(orders[8].order_id);
        let drained = limiter.drain_queued();
        assert_eq!(drained.len(), 2);
        assert!(limiter.discarded.lock().is_empty());
    }
}
