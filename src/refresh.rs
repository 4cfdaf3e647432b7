// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The refresh engine: TUF 5.1 applied against a Notary server.
//!
//! A refresh walks the root version chain forward from the trusted root,
//! cross-verifying each step under both the old and the new key sets, then
//! validates timestamp, snapshot, and the full targets delegation tree in
//! order. Every role is checked for rollback (a version older than the one
//! already trusted) and freeze (metadata past its expiration), and every
//! snapshot-pinned file is bounded by its declared length and hashes before
//! it is parsed. Only after the whole chain validates is anything persisted
//! or any in-memory trust replaced.

use crate::clock::Clock;
use crate::error::{self, Result};
use crate::local::LocalRepo;
use crate::persist::{self, SaveRequest};
use crate::remote::{Mirror, Notary};
use crate::schema::{
    FileIntegrity, Key, Role, RoleId, RoleKind, Root, Signed, Snapshot, Targets, Timestamp,
};
use crate::tree::{self, TargetTree, TargetsFetcher};
use crate::verify::{verify_signed, verify_threshold};
use chrono::Duration;
use log::debug;
use snafu::{ensure, OptionExt};
use std::collections::HashMap;
use std::io::Write;
use std::num::NonZeroU64;
use std::sync::Arc;

/// The result of a completed update cycle.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// Target paths whose integrity metadata differs from the local
    /// baseline, with the newly trusted metadata for each.
    pub changed: HashMap<String, FileIntegrity>,
}

impl UpdateReport {
    /// Whether the repository was already up to date. A refresh that only
    /// re-signed metadata without touching any target path counts as
    /// "latest".
    pub fn latest(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Owns all trusted repository state. Reachable only from the worker
/// thread, so interior mutability and locks are unnecessary.
pub(crate) struct RepoManager {
    local: LocalRepo,
    notary: Notary,
    mirror: Mirror,
    clock: Arc<dyn Clock>,
    backup_age: Duration,
    root: Option<Signed<Root>>,
    timestamp: Option<Signed<Timestamp>>,
    snapshot: Option<Signed<Snapshot>>,
    targets: Option<TargetTree>,
}

impl RepoManager {
    pub(crate) fn new(
        local: LocalRepo,
        notary: Notary,
        mirror: Mirror,
        clock: Arc<dyn Clock>,
        backup_age: Duration,
    ) -> Self {
        Self {
            local,
            notary,
            mirror,
            clock,
            backup_age,
            root: None,
            timestamp: None,
            snapshot: None,
            targets: None,
        }
    }

    /// Refreshes all roles from the Notary server and, if every validation
    /// step passes, persists the result as the new local baseline.
    pub(crate) fn update(&mut self) -> Result<UpdateReport> {
        let changed = self.refresh()?;
        self.save()?;
        Ok(UpdateReport { changed })
    }

    /// Downloads a target from the mirror into `dest` after refreshing, so
    /// the integrity metadata used to check the content is current.
    pub(crate) fn download<W: Write>(&mut self, name: &str, dest: W) -> Result<()> {
        self.update()?;
        let integrity = self
            .target_integrity(name)
            .context(error::NoSuchTargetSnafu { name })?;
        self.mirror.download(name, &integrity, dest)?;
        Ok(())
    }

    /// Streams a target with already-known integrity metadata, used by the
    /// auto-updater after it has decided a watched target changed.
    pub(crate) fn fetch_target<W: Write>(
        &self,
        name: &str,
        integrity: &FileIntegrity,
        dest: W,
    ) -> Result<u64> {
        self.mirror.download(name, integrity, dest)
    }

    /// The trusted integrity metadata for a target path, if it is present
    /// in the current tree.
    pub(crate) fn target_integrity(&self, name: &str) -> Option<FileIntegrity> {
        self.targets
            .as_ref()
            .and_then(|tree| tree.paths().get(name).cloned())
    }

    fn refresh(&mut self) -> Result<HashMap<String, FileIntegrity>> {
        let root = self.refresh_root()?;
        let timestamp = self.refresh_timestamp(&root)?;
        let local_targets = self.local.targets()?;
        let snapshot = self.refresh_snapshot(&root, &timestamp, &local_targets)?;
        let targets = self.refresh_targets(&root, &snapshot, &local_targets)?;

        let changed = changed_paths(local_targets.paths(), targets.paths());
        debug!("refresh complete; {} path(s) changed", changed.len());

        self.root = Some(root);
        self.timestamp = Some(timestamp);
        self.snapshot = Some(snapshot);
        self.targets = Some(targets);
        Ok(changed)
    }

    /// TUF 5.1: establish a trusted root by walking published versions
    /// forward from the root we already have.
    fn refresh_root(&self) -> Result<Signed<Root>> {
        let mut current = self.local.root()?;

        // The persisted root must satisfy the key set and threshold it
        // declares for itself. Its expiration is deliberately ignored; an
        // expired-but-trusted root is exactly what the version walk below
        // repairs.
        verify_signed(
            "root",
            &current,
            &current.signed.keys,
            current.signed.role_keys(RoleKind::Root)?,
        )?;

        loop {
            let Some(next_version) = current.signed.version.checked_add(1) else {
                break;
            };
            let next = match self.notary.root(Some(next_version)) {
                // the first unpublished version ends the chain
                Err(crate::error::Error::NotFound { .. }) => break,
                result => result?,
            };

            // each step must verify under the keys we already trust and
            // under the keys it declares for itself
            verify_signed(
                "root",
                &next,
                &current.signed.keys,
                current.signed.role_keys(RoleKind::Root)?,
            )?;
            verify_signed(
                "root",
                &next,
                &next.signed.keys,
                next.signed.role_keys(RoleKind::Root)?,
            )?;
            check_rollback("root", current.signed.version, next.signed.version)?;

            debug!("root advanced to version {}", next.signed.version);
            current = next;
        }

        ensure!(
            !current.signed.consistent_snapshot,
            error::ConsistentSnapshotSnafu
        );
        self.check_freeze("root", current.signed.expires())?;
        Ok(current)
    }

    fn refresh_timestamp(&self, root: &Signed<Root>) -> Result<Signed<Timestamp>> {
        let remote = self.notary.timestamp()?;
        verify_signed(
            "timestamp",
            &remote,
            &root.signed.keys,
            root.signed.role_keys(RoleKind::Timestamp)?,
        )?;

        let trusted = self.local.timestamp()?;
        check_rollback("timestamp", trusted.signed.version, remote.signed.version)?;
        self.check_freeze("timestamp", remote.signed.expires())?;
        Ok(remote)
    }

    fn refresh_snapshot(
        &self,
        root: &Signed<Root>,
        timestamp: &Signed<Timestamp>,
        local_targets: &TargetTree,
    ) -> Result<Signed<Snapshot>> {
        let integrity = timestamp
            .signed
            .meta
            .get("snapshot")
            .context(error::FimMissingSnafu { role: "snapshot" })?;
        let remote = self.notary.snapshot(integrity)?;
        verify_signed(
            "snapshot",
            &remote,
            &root.signed.keys,
            root.signed.role_keys(RoleKind::Snapshot)?,
        )?;

        let trusted = self.local.snapshot()?;
        check_rollback("snapshot", trusted.signed.version, remote.signed.version)?;

        // a snapshot that claims to be newer must not describe targets
        // roles older than the ones we already trust
        for entry in local_targets.entries() {
            ensure!(
                entry.envelope.signed.version <= remote.signed.version,
                error::RollbackAttackSnafu {
                    role: entry.role.clone(),
                    trusted: u64::from(entry.envelope.signed.version),
                    remote: u64::from(remote.signed.version),
                }
            );
        }

        self.check_freeze("snapshot", remote.signed.expires())?;
        Ok(remote)
    }

    fn refresh_targets(
        &self,
        root: &Signed<Root>,
        snapshot: &Signed<Snapshot>,
        local_targets: &TargetTree,
    ) -> Result<TargetTree> {
        let mut fetcher = NotaryTargetsFetcher {
            notary: &self.notary,
            root,
            snapshot,
            trusted: local_targets,
            clock: self.clock.as_ref(),
            keys: HashMap::new(),
            delegations: HashMap::new(),
        };
        tree::build(&mut fetcher)
    }

    fn save(&self) -> Result<()> {
        let request = SaveRequest {
            base_dir: self.local.base_dir(),
            backup_age: self.backup_age,
            now: self.clock.now(),
            root: self.cached(&self.root, "root")?,
            timestamp: self.cached(&self.timestamp, "timestamp")?,
            snapshot: self.cached(&self.snapshot, "snapshot")?,
            targets: self
                .targets
                .as_ref()
                .context(error::RoleNotCachedSnafu { role: "targets" })?,
        };
        persist::save(&request)
    }

    fn cached<'a, T>(&self, role: &'a Option<Signed<T>>, name: &str) -> Result<&'a Signed<T>> {
        role.as_ref()
            .context(error::RoleNotCachedSnafu { role: name })
    }

    fn check_freeze(&self, role: &str, expires: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let now = self.clock.now();
        ensure!(
            now <= expires,
            error::FreezeAttackSnafu { role, expires, now }
        );
        Ok(())
    }
}

fn check_rollback(role: &str, trusted: NonZeroU64, remote: NonZeroU64) -> Result<()> {
    ensure!(
        trusted <= remote,
        error::RollbackAttackSnafu {
            role,
            trusted: u64::from(trusted),
            remote: u64::from(remote),
        }
    );
    Ok(())
}

/// Paths whose integrity metadata in `remote` is new or different from the
/// local baseline.
fn changed_paths(
    local: &HashMap<String, FileIntegrity>,
    remote: &HashMap<String, FileIntegrity>,
) -> HashMap<String, FileIntegrity> {
    let mut changed = HashMap::new();
    for (path, integrity) in remote {
        if local.get(path) != Some(integrity) {
            changed.insert(path.clone(), integrity.clone());
        }
    }
    changed
}

/// Fetches and validates targets roles for the tree walk.
///
/// Verifying keys accumulate along the delegation path: the top-level
/// `targets` role is checked against the root's key set, and each delegate
/// is checked against the keys and threshold its parent declared, resolved
/// from the union of `delegations.keys` collected from the roles above it.
struct NotaryTargetsFetcher<'a> {
    notary: &'a Notary,
    root: &'a Signed<Root>,
    snapshot: &'a Signed<Snapshot>,
    trusted: &'a TargetTree,
    clock: &'a dyn Clock,
    keys: HashMap<String, Key>,
    delegations: HashMap<String, (Vec<String>, NonZeroU64)>,
}

impl TargetsFetcher for NotaryTargetsFetcher<'_> {
    fn fetch(&mut self, role: &str) -> Result<Signed<Targets>> {
        let role_id: RoleId = role.parse()?;
        let integrity = self
            .snapshot
            .signed
            .meta
            .get(role)
            .context(error::FimMissingSnafu { role })?;
        let envelope = self.notary.targets(&role_id, integrity)?;

        if matches!(role_id, RoleId::Targets) {
            verify_signed(
                role,
                &envelope,
                &self.root.signed.keys,
                self.root.signed.role_keys(RoleKind::Targets)?,
            )?;
        } else {
            let (keyids, threshold) = self
                .delegations
                .get(role)
                .context(error::UndeclaredDelegateSnafu { role })?;
            verify_threshold(role, &envelope, &self.keys, keyids, threshold.get())?;
        }

        // rollback against the version of this role we already trust, if
        // we have one
        if let Some(trusted) = self.trusted.role(role) {
            check_rollback(role, trusted.signed.version, envelope.signed.version)?;
        }
        let now = self.clock.now();
        ensure!(
            now <= envelope.signed.expires(),
            error::FreezeAttackSnafu {
                role,
                expires: envelope.signed.expires(),
                now,
            }
        );

        // fold this role's delegations into the accumulators before its
        // children are fetched
        for (keyid, key) in &envelope.signed.delegations.keys {
            self.keys.insert(keyid.clone(), key.clone());
        }
        for delegated in &envelope.signed.delegations.roles {
            self.delegations.insert(
                delegated.name.clone(),
                (delegated.keyids.clone(), delegated.threshold),
            );
        }

        Ok(envelope)
    }
}
