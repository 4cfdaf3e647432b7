// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sturdy` is a client for [The Update Framework (TUF)][tuf] repositories
//! served by a [Notary]-compatible metadata server, paired with a content
//! mirror that hosts the actual distribution files.
//!
//! The client keeps a local directory of trusted role metadata. On each
//! update it walks new root versions forward from the trusted root
//! (cross-verifying old and new key sets), validates the timestamp,
//! snapshot, and targets roles plus the full delegation tree, and defends
//! against rollback and freeze attacks at every step. Validated state is
//! persisted atomically with timestamped backups, and target files are
//! downloaded from the mirror with their length and digests pinned by the
//! metadata.
//!
//! All repository state is owned by a single worker thread; calls like
//! [`Client::update`] and [`Client::download`] are serialized onto it and
//! block until their result is ready. An optional auto-updater watches one
//! named target and stages validated new versions of it into a directory
//! for the host application to pick up.
//!
//! The initial trusted root is provisioned out of band: the local
//! repository directory must be seeded with role files (`0600` permissions
//! are recommended for the seed) before a client is constructed.
//!
//! [tuf]: https://theupdateframework.github.io/
//! [Notary]: https://github.com/notaryproject/notary

#![deny(rust_2018_idioms)]
// identifiers like `_extra` are deliberate, see schema
#![allow(clippy::used_underscore_binding)]

mod autoupdate;
mod client;
mod clock;
mod error;
mod integrity;
mod local;
mod persist;
mod refresh;
mod remote;
pub mod schema;
mod transport;
mod tree;
mod verify;
mod worker;

pub use crate::autoupdate::Notifier;
pub use crate::client::{
    Client, ClientBuilder, DEFAULT_BACKUP_AGE, DEFAULT_CHECK_FREQUENCY, MINIMUM_CHECK_FREQUENCY,
};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::{Error, Result};
pub use crate::refresh::UpdateReport;
pub use crate::transport::{
    FilesystemTransport, HttpTransport, HttpTransportBuilder, Transport, TransportError,
    TransportErrorKind,
};

use std::path::PathBuf;

/// Where the repositories this client talks to live.
///
/// Both remote URLs must use the `https` scheme; construction fails
/// otherwise.
#[derive(Debug, Clone)]
pub struct Settings {
    /// The directory of trusted role metadata. Must exist, and should be
    /// seeded out of band with the initial trusted roles.
    pub local_repo: PathBuf,

    /// The base URL of the Notary server where role metadata is fetched,
    /// e.g. `https://notary.example.com`.
    pub notary_url: String,

    /// The base URL where distribution files are mirrored.
    pub mirror_url: String,

    /// The Globally Unique Name of the repository, e.g.
    /// `example/agent/linux`.
    pub gun: String,
}
