// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Injectable time sources.
//!
//! All freshness comparisons and the periodic auto-update tick go through a
//! [`Clock`] so that freeze detection and scheduling are deterministic
//! under test. [`SystemClock`] is used in production; [`ManualClock`] only
//! moves when told to and fires its tickers synchronously from `advance`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt::Debug;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// A source of the current time and of periodic ticks.
pub trait Clock: Debug + Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns a channel that receives a tick roughly every `period`.
    /// Delivery stops once the receiver is dropped.
    fn ticker(&self, period: Duration) -> Receiver<DateTime<Utc>>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn ticker(&self, period: Duration) -> Receiver<DateTime<Utc>> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || loop {
            thread::sleep(period);
            if tx.send(Utc::now()).is_err() {
                break;
            }
        });
        rx
    }
}

/// A clock that only moves when [`advance`](ManualClock::advance) is
/// called. Registered tickers fire synchronously during `advance`, once per
/// elapsed period, which makes interval behavior exact in tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    tickers: Vec<ManualTicker>,
}

#[derive(Debug)]
struct ManualTicker {
    due: DateTime<Utc>,
    period: ChronoDuration,
    tx: Sender<DateTime<Utc>>,
}

impl ManualClock {
    /// A manual clock starting at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: start,
                tickers: Vec::new(),
            })),
        }
    }

    /// Moves the clock forward, firing any tickers that come due. Tickers
    /// whose receiver has gone away are discarded.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        let now = state.now
            + ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::max_value());
        state.now = now;
        state.tickers.retain_mut(|ticker| {
            while ticker.due <= now {
                if ticker.tx.send(now).is_err() {
                    return false;
                }
                ticker.due += ticker.period;
            }
            true
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn ticker(&self, period: Duration) -> Receiver<DateTime<Utc>> {
        let (tx, rx) = mpsc::channel();
        let period = ChronoDuration::from_std(period)
            .unwrap_or_else(|_| ChronoDuration::max_value());
        let mut state = self.lock();
        let due = state.now + period;
        state.tickers.push(ManualTicker { due, period, tx });
        rx
    }
}
