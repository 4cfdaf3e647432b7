// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Saving and backing up the local TUF repository.
//!
//! A save first garbage-collects stale backups, then copies every current
//! `*.json` file to a sibling tagged with the current UTC second
//! (`name.YYYYMMDDhhmmss.json`), then writes the validated roles. If any
//! write fails, the tagged copies are restored before the error surfaces,
//! so the repository on disk is always one coherent refresh result.

use crate::error::{self, Result};
use crate::schema::{Root, Signed, Snapshot, Timestamp};
use crate::tree::TargetTree;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};
use serde::Serialize;
use snafu::{ensure, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BACKUP_TAG_FORMAT: &str = "%Y%m%d%H%M%S";
const BACKUP_TAG_LEN: usize = 14;

/// Everything needed to persist one refresh result.
pub(crate) struct SaveRequest<'a> {
    pub(crate) base_dir: &'a Path,
    pub(crate) backup_age: Duration,
    pub(crate) now: DateTime<Utc>,
    pub(crate) root: &'a Signed<Root>,
    pub(crate) timestamp: &'a Signed<Timestamp>,
    pub(crate) snapshot: &'a Signed<Snapshot>,
    pub(crate) targets: &'a TargetTree,
}

pub(crate) fn save(request: &SaveRequest<'_>) -> Result<()> {
    check_directory(request.base_dir)?;
    remove_aged_backups(request.base_dir, request.backup_age, request.now)?;

    let tag = request.now.format(BACKUP_TAG_FORMAT).to_string();
    backup_repo(request.base_dir, &tag)?;
    debug!("backed up repository with tag '{tag}'");

    if let Err(err) = write_roles(request) {
        // put the previous repository back before surfacing the original
        // failure
        if let Err(restore_err) = restore_repo(request.base_dir, &tag) {
            warn!("restore after failed save also failed: {restore_err}");
        }
        return Err(err);
    }
    Ok(())
}

/// Copies every current role file to its `<tag>`-suffixed sibling.
fn backup_repo(base: &Path, tag: &str) -> Result<()> {
    for file in json_files(base)? {
        if backup_tag(&file).is_some() {
            continue;
        }
        let backup = with_backup_tag(&file, tag);
        copy_file(&file, &backup)?;
    }
    Ok(())
}

/// Copies every `<tag>`-suffixed file back over its unsuffixed sibling.
fn restore_repo(base: &Path, tag: &str) -> Result<()> {
    for file in json_files(base)? {
        if backup_tag(&file).as_deref() == Some(tag) {
            let original = without_backup_tag(&file, tag);
            copy_file(&file, &original)?;
        }
    }
    Ok(())
}

/// Removes backup files whose tag is older than `age`.
fn remove_aged_backups(base: &Path, age: Duration, now: DateTime<Utc>) -> Result<()> {
    for file in json_files(base)? {
        let Some(tag) = backup_tag(&file) else {
            continue;
        };
        let taken = NaiveDateTime::parse_from_str(&tag, BACKUP_TAG_FORMAT)
            .context(error::BackupTagInvalidSnafu { path: &file })?;
        let expires = Utc.from_utc_datetime(&taken) + age;
        if now > expires {
            debug!("removing aged backup '{}'", file.display());
            fs::remove_file(&file).context(error::FileRemoveSnafu { path: &file })?;
        }
    }
    Ok(())
}

fn write_roles(request: &SaveRequest<'_>) -> Result<()> {
    write_role(request.base_dir, Path::new("root.json"), request.root)?;
    write_role(
        request.base_dir,
        Path::new("timestamp.json"),
        request.timestamp,
    )?;
    write_role(
        request.base_dir,
        Path::new("snapshot.json"),
        request.snapshot,
    )?;

    // the first entry of the tree is the top-level targets role; the rest
    // are delegates in nested directories
    for entry in request.targets.entries() {
        let relative = PathBuf::from(format!("{}.json", entry.role));
        write_role(request.base_dir, &relative, &entry.envelope)?;
    }
    Ok(())
}

fn write_role<T: Serialize>(base: &Path, relative: &Path, envelope: &Signed<T>) -> Result<()> {
    let path = base.join(relative);
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let bytes = envelope.canonical_form()?;
    write_file(&path, &bytes)
}

fn check_directory(dir: &Path) -> Result<()> {
    let metadata = fs::metadata(dir).context(error::DirMissingSnafu { path: dir })?;
    ensure!(metadata.is_dir(), error::NotADirectorySnafu { path: dir });
    Ok(())
}

/// Every regular `*.json` file under `base`, backups included.
fn json_files(base: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(base) {
        let entry = entry.context(error::WalkRepoSnafu { path: base })?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "json")
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Extracts the time tag from a backup file name
/// (`name.YYYYMMDDhhmmss.json`), or `None` for regular role files.
fn backup_tag(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".json")?;
    if stem.len() <= BACKUP_TAG_LEN {
        return None;
    }
    let (rest, tag) = stem.split_at(stem.len() - BACKUP_TAG_LEN);
    if rest.ends_with('.') && tag.bytes().all(|b| b.is_ascii_digit()) {
        Some(tag.to_string())
    } else {
        None
    }
}

fn with_backup_tag(path: &Path, tag: &str) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let tagged = name.replacen(".json", &format!(".{tag}.json"), 1);
    path.with_file_name(tagged)
}

fn without_backup_tag(path: &Path, tag: &str) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let original = name.replacen(&format!(".{tag}.json"), ".json", 1);
    path.with_file_name(original)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(|_| ())
        .context(error::FileCopySnafu { from, to })
}

#[cfg(unix)]
fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .context(error::FileCreateSnafu { path })?;
    file.write_all(bytes)
        .context(error::FileWriteSnafu { path })
}

#[cfg(not(unix))]
fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).context(error::FileWriteSnafu { path })
}

/// Creates a directory and any missing parents with mode `0755`, umask
/// notwithstanding. Also used for staging directories.
#[cfg(unix)]
pub(crate) fn create_dir_all(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if path.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .context(error::DirCreateSnafu { path })
}

#[cfg(not(unix))]
pub(crate) fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).context(error::DirCreateSnafu { path })
}
