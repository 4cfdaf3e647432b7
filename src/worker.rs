// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single-threaded worker that owns all validator state.
//!
//! Every operation against the repository — a caller's update or download,
//! and the periodic automatic update — arrives here as an event, and the
//! worker serves exactly one event at a time. External callers block on a
//! reply channel for their submitted job, so no locking is needed anywhere
//! in the validator: the worker thread is the only context that can reach
//! it.

use crate::autoupdate::AutoUpdater;
use crate::error::{self, Result};
use crate::refresh::RepoManager;
use log::debug;
use snafu::ResultExt;
use std::sync::mpsc::Receiver;
use std::thread::{Builder, JoinHandle};

/// One unit of work executed with exclusive access to the session.
pub(crate) type Job = Box<dyn FnOnce(&mut Session) + Send>;

/// Events the worker reacts to, one at a time, in arrival order. Ticks are
/// forwarded into the same mailbox as jobs, so a tick is always served
/// between jobs and never during one.
pub(crate) enum Event {
    /// A function submitted by an external call.
    Job(Job),
    /// The periodic check signal.
    Tick,
    /// Run the automatic update immediately, without waiting for the first
    /// tick.
    Force,
    /// Shut down; the worker drains nothing and returns.
    Quit,
}

/// The state owned by the worker thread.
pub(crate) struct Session {
    pub(crate) repo: RepoManager,
    pub(crate) auto: Option<AutoUpdater>,
}

impl Session {
    fn auto_update(&mut self) {
        if let Some(auto) = self.auto.as_mut() {
            auto.run(&mut self.repo);
        }
    }
}

pub(crate) fn spawn(mut session: Session, events: Receiver<Event>) -> Result<JoinHandle<()>> {
    Builder::new()
        .name("sturdy-worker".to_string())
        .spawn(move || {
            // a closed mailbox means every handle to the client is gone;
            // treat it like a quit
            while let Ok(event) = events.recv() {
                match event {
                    Event::Job(job) => job(&mut session),
                    Event::Tick | Event::Force => session.auto_update(),
                    Event::Quit => break,
                }
            }
            debug!("worker exiting");
        })
        .context(error::WorkerSpawnSnafu)
}
