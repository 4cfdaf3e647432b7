// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The public client: construction options and the blocking API.

use crate::autoupdate::{AutoUpdater, Notifier};
use crate::clock::{Clock, SystemClock};
use crate::error::{self, Result};
use crate::local::LocalRepo;
use crate::refresh::{RepoManager, UpdateReport};
use crate::remote::{Mirror, Notary};
use crate::transport::{HttpTransport, Transport};
use crate::worker::{self, Event, Session};
use crate::Settings;
use chrono::Duration as ChronoDuration;
use log::debug;
use snafu::ensure;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the auto-updater checks for changes unless configured
/// otherwise.
pub const DEFAULT_CHECK_FREQUENCY: Duration = Duration::from_secs(60 * 60);

/// The smallest check frequency a client will accept.
pub const MINIMUM_CHECK_FREQUENCY: Duration = Duration::from_secs(10 * 60);

/// How long repository backups are kept unless configured otherwise.
pub const DEFAULT_BACKUP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Builds a [`Client`] from [`Settings`] plus options.
///
/// ```no_run
/// # use sturdy::{ClientBuilder, Settings};
/// # fn main() -> Result<(), sturdy::Error> {
/// let client = ClientBuilder::new(Settings {
///     local_repo: "/var/lib/app/tuf".into(),
///     notary_url: "https://notary.example.com".to_string(),
///     mirror_url: "https://releases.example.com".to_string(),
///     gun: "example/app/linux".to_string(),
/// })
/// .build()?;
/// let report = client.update()?;
/// println!("latest: {}", report.latest());
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    settings: Settings,
    check_frequency: Duration,
    backup_age: Duration,
    transport: Option<Box<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    auto_update: Option<(String, PathBuf, Notifier)>,
    load_on_start: bool,
}

impl ClientBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            check_frequency: DEFAULT_CHECK_FREQUENCY,
            backup_age: DEFAULT_BACKUP_AGE,
            transport: None,
            clock: None,
            auto_update: None,
            load_on_start: true,
        }
    }

    /// How often the auto-updater wakes up. Values below
    /// [`MINIMUM_CHECK_FREQUENCY`] are rejected at build time.
    #[must_use]
    pub fn check_frequency(mut self, value: Duration) -> Self {
        self.check_frequency = value;
        self
    }

    /// How long repository backups are kept before being collected.
    #[must_use]
    pub fn backup_age(mut self, value: Duration) -> Self {
        self.backup_age = value;
        self
    }

    /// Replaces the HTTPS transport, e.g. with a custom-configured
    /// [`HttpTransport`](crate::HttpTransport) or a test double.
    #[must_use]
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the clock every freshness check and tick runs against.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Watches `target` and stages validated new versions of it under
    /// `staging_dir`, reporting each outcome to `notifier`.
    #[must_use]
    pub fn auto_update<T, P, F>(mut self, target: T, staging_dir: P, notifier: F) -> Self
    where
        T: Into<String>,
        P: Into<PathBuf>,
        F: Fn(std::result::Result<PathBuf, crate::error::Error>) + Send + 'static,
    {
        self.auto_update = Some((target.into(), staging_dir.into(), Box::new(notifier)));
        self
    }

    /// Whether a configured auto-updater runs once at startup instead of
    /// waiting for the first tick. Defaults to `true`.
    #[must_use]
    pub fn load_on_start(mut self, value: bool) -> Self {
        self.load_on_start = value;
        self
    }

    /// Validates the configuration, confirms the Notary server is
    /// reachable, and starts the worker.
    pub fn build(self) -> Result<Client> {
        ensure!(
            self.check_frequency >= MINIMUM_CHECK_FREQUENCY,
            error::CheckFrequencyTooSmallSnafu {
                minimum: MINIMUM_CHECK_FREQUENCY,
            }
        );
        let backup_age = ChronoDuration::from_std(self.backup_age)
            .unwrap_or_else(|_| ChronoDuration::max_value());

        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(HttpTransport::default()));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let notary = Notary::new(
            &self.settings.notary_url,
            &self.settings.gun,
            transport.clone(),
        )?;
        notary.ping()?;
        let mirror = Mirror::new(&self.settings.mirror_url, &self.settings.gun, transport)?;
        let local = LocalRepo::new(&self.settings.local_repo)?;

        let repo = RepoManager::new(local, notary, mirror, Arc::clone(&clock), backup_age);
        let auto_configured = self.auto_update.is_some();
        let session = Session {
            repo,
            auto: self
                .auto_update
                .map(|(target, staging, notifier)| AutoUpdater::new(target, staging, notifier)),
        };

        let (events, mailbox) = mpsc::channel();
        let handle = worker::spawn(session, mailbox)?;

        if auto_configured {
            // ticks flow into the same mailbox as jobs, so they are served
            // between jobs, never during one
            let ticks = clock.ticker(self.check_frequency);
            let tick_events = events.clone();
            std::thread::spawn(move || {
                while ticks.recv().is_ok() {
                    if tick_events.send(Event::Tick).is_err() {
                        break;
                    }
                }
            });
            if self.load_on_start {
                let _ = events.send(Event::Force);
            }
        }

        Ok(Client {
            events: Mutex::new(events),
            worker: Mutex::new(Some(handle)),
        })
    }
}

/// A secure update client for one repository.
///
/// All methods are safe to call from any thread; operations are serialized
/// onto the worker and each caller blocks until its own operation
/// completes.
pub struct Client {
    events: Mutex<Sender<Event>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Builds a client with default options. See [`ClientBuilder`] for the
    /// available knobs.
    pub fn new(settings: Settings) -> Result<Client> {
        ClientBuilder::new(settings).build()
    }

    /// Refreshes and validates all role metadata, persists it as the new
    /// local baseline, and reports which target paths changed.
    pub fn update(&self) -> Result<UpdateReport> {
        self.call(|repo| repo.update())
    }

    /// Refreshes, then downloads and verifies the named target from the
    /// mirror into `dest`. `dest` is handed back once every declared digest
    /// has checked out.
    pub fn download<W>(&self, target: &str, mut dest: W) -> Result<W>
    where
        W: Write + Send + 'static,
    {
        let name = target.to_string();
        self.call(move |repo| {
            repo.download(&name, &mut dest)?;
            Ok(dest)
        })
    }

    /// Stops the worker and blocks until it has fully exited. Operations
    /// submitted after this fail with [`Error::ClientStopped`](crate::Error).
    pub fn stop(&self) {
        {
            let events = self.lock_events();
            // the worker may already be gone; nothing to signal then
            let _ = events.send(Event::Quit);
        }
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            worker.take()
        };
        if let Some(handle) = handle {
            debug!("waiting for worker to exit");
            let _ = handle.join();
        }
    }

    /// Runs `operation` on the worker with exclusive access to the
    /// repository state, blocking until it completes.
    fn call<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RepoManager) -> Result<T> + Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        {
            let events = self.lock_events();
            events
                .send(Event::Job(Box::new(move |session| {
                    let _ = reply.send(operation(&mut session.repo));
                })))
                .map_err(|_| error::ClientStoppedSnafu.build())?;
        }
        // a dropped reply channel means the worker shut down mid-queue
        result
            .recv()
            .map_err(|_| error::ClientStoppedSnafu.build())?
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, Sender<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}
