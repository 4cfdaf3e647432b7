// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Watches one named target and stages new versions of it.
//!
//! On each tick the repository is refreshed; if the watched target's
//! integrity metadata changed since the last successful staging, the file
//! is downloaded from the mirror into the staging directory and the
//! notifier is told where it landed. The staged file is fully written and
//! closed before the notifier runs, so the host application may move or
//! rename it immediately. Nothing is left in staging when a download fails,
//! and the remembered metadata is not advanced, so the next tick retries.

use crate::error::{self, Error, Result};
use crate::persist;
use crate::refresh::RepoManager;
use crate::schema::FileIntegrity;
use log::{debug, info};
use snafu::ResultExt;
use std::fs::{self, File};
use std::path::PathBuf;

/// Called with the staging path of a newly validated download, or with the
/// error that stopped an automatic update cycle.
pub type Notifier = Box<dyn Fn(std::result::Result<PathBuf, Error>) + Send>;

pub(crate) struct AutoUpdater {
    target: String,
    staging_dir: PathBuf,
    notifier: Notifier,
    current: Option<FileIntegrity>,
}

impl AutoUpdater {
    pub(crate) fn new(target: String, staging_dir: PathBuf, notifier: Notifier) -> Self {
        Self {
            target,
            staging_dir,
            notifier,
            current: None,
        }
    }

    /// One automatic update cycle: refresh, compare, stage.
    pub(crate) fn run(&mut self, repo: &mut RepoManager) {
        if let Err(err) = repo.update() {
            (self.notifier)(Err(err));
            return;
        }

        // a watched target the repository doesn't declare is not an error;
        // it may appear in a later refresh
        let Some(next) = repo.target_integrity(&self.target) else {
            debug!("watched target '{}' is not in the target tree", self.target);
            return;
        };
        if self.current.as_ref() == Some(&next) {
            return;
        }

        match self.stage(repo, &next) {
            Ok(staged) => {
                info!("staged '{}' at '{}'", self.target, staged.display());
                self.current = Some(next);
                (self.notifier)(Ok(staged));
            }
            Err(err) => (self.notifier)(Err(err)),
        }
    }

    fn stage(&self, repo: &RepoManager, integrity: &FileIntegrity) -> Result<PathBuf> {
        let staged = self.staging_dir.join(&self.target);
        if let Some(parent) = staged.parent() {
            persist::create_dir_all(parent)?;
        }
        let file = File::create(&staged).context(error::FileCreateSnafu { path: &staged })?;
        match repo.fetch_target(&self.target, integrity, file) {
            Ok(_) => Ok(staged),
            Err(err) => {
                // the file handle is already closed; take the partial
                // content with it
                let _ = fs::remove_file(&staged);
                Err(err)
            }
        }
    }
}
