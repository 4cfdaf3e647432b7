// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The on-disk repository of trusted role metadata.
//!
//! Roles live at `<base>/<role>.json`, with delegated targets roles in
//! nested directories mirroring their names. Reads go through the same
//! [`Transport`] abstraction as remote fetches, via `file://` URLs and the
//! [`FilesystemTransport`]. The files here are the trusted baseline from
//! the previous refresh (or the out-of-band seed), so they are read without
//! re-verifying signatures; only the root role is ever re-checked, and the
//! refresh engine does that itself.

use crate::error::{self, Result};
use crate::schema::{RoleId, Root, Signed, Snapshot, Targets, Timestamp};
use crate::transport::{FilesystemTransport, Transport};
use crate::tree::{self, TargetTree, TargetsFetcher};
use serde::de::DeserializeOwned;
use snafu::{ensure, ResultExt};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone)]
pub(crate) struct LocalRepo {
    base: PathBuf,
    transport: FilesystemTransport,
}

impl LocalRepo {
    /// Opens a local repository. The path must exist and be a directory (or
    /// a symlink to one). The path is canonicalized so that role files can
    /// be addressed as `file://` URLs even when the repository was
    /// configured with a relative path.
    pub(crate) fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&base).context(error::DirMissingSnafu { path: &base })?;
        ensure!(metadata.is_dir(), error::NotADirectorySnafu { path: &base });
        let base = base
            .canonicalize()
            .context(error::DirMissingSnafu { path: &base })?;
        Ok(Self {
            base,
            transport: FilesystemTransport,
        })
    }

    pub(crate) fn base_dir(&self) -> &Path {
        &self.base
    }

    pub(crate) fn root(&self) -> Result<Signed<Root>> {
        self.role(&RoleId::Root)
    }

    pub(crate) fn timestamp(&self) -> Result<Signed<Timestamp>> {
        self.role(&RoleId::Timestamp)
    }

    pub(crate) fn snapshot(&self) -> Result<Signed<Snapshot>> {
        self.role(&RoleId::Snapshot)
    }

    /// Assembles the trusted target tree by walking the delegation graph
    /// through the files on disk.
    pub(crate) fn targets(&self) -> Result<TargetTree> {
        let mut fetcher = LocalTargetsFetcher { repo: self };
        tree::build(&mut fetcher)
    }

    fn role<T: DeserializeOwned>(&self, role: &RoleId) -> Result<Signed<T>> {
        let path = self.base.join(role.filename());
        let url =
            Url::from_file_path(&path).map_err(|()| error::FileUrlSnafu { path: &path }.build())?;
        let reader = self
            .transport
            .fetch(url)
            .context(error::LocalRoleSnafu {
                role: role.to_string(),
            })?;
        serde_json::from_reader(BufReader::new(reader)).context(error::ParseMetadataSnafu {
            role: role.to_string(),
        })
    }
}

/// Reads targets roles out of the local repository for tree traversal.
struct LocalTargetsFetcher<'a> {
    repo: &'a LocalRepo,
}

impl TargetsFetcher for LocalTargetsFetcher<'_> {
    fn fetch(&mut self, role: &str) -> Result<Signed<Targets>> {
        let role: RoleId = role.parse()?;
        self.repo.role(&role)
    }
}
