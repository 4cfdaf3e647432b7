// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for this library.

#![allow(clippy::default_trait_access)]

use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A backup file carries a time tag that cannot be parsed back into a
    /// timestamp, which would make aging it out impossible.
    #[snafu(display("Unparseable time tag on backup file '{}': {}", path.display(), source))]
    BackupTagInvalid {
        path: PathBuf,
        source: chrono::format::ParseError,
    },

    #[snafu(display("Check frequency must be at least {:?}", minimum))]
    CheckFrequencyTooSmall { minimum: Duration },

    /// The client has been stopped; no further jobs are accepted.
    #[snafu(display("Client worker has shut down"))]
    ClientStopped,

    #[snafu(display("Root declares consistent snapshots, which this client does not support"))]
    ConsistentSnapshot,

    #[snafu(display("Failed to copy '{}' to '{}': {}", from.display(), to.display(), source))]
    FileCopy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to create '{}': {}", path.display(), source))]
    FileCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    DirCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Repository directory '{}' is not usable: {}", path.display(), source))]
    DirMissing {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("'{}' exists but is not a directory", path.display()))]
    NotADirectory { path: PathBuf },

    #[snafu(display("Failed to remove '{}': {}", path.display(), source))]
    FileRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A fetched file failed its declared integrity metadata; wraps the
    /// specific length or hash failure.
    #[snafu(display("File integrity check failed for '{}': {}", name, source))]
    FileIntegrityCheckFailed {
        name: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// The snapshot role does not describe a targets file we were asked to
    /// fetch, so there is nothing to bound the download with.
    #[snafu(display("No file integrity metadata for role '{}' in snapshot", role))]
    FimMissing { role: String },

    #[snafu(display("Remote '{}' role is expired (expired {}, checked at {})", role, expires, now))]
    FreezeAttack {
        role: String,
        expires: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[snafu(display("Calculated {} digest does not match the declared digest", algorithm))]
    HashMismatch { algorithm: String },

    #[snafu(display("Declared digest for algorithm '{}' is not valid base64: {}", algorithm, source))]
    HashDecode {
        algorithm: String,
        source: base64::DecodeError,
    },

    #[snafu(display("Stream was {} bytes but {} bytes were declared", actual, expected))]
    LengthMismatch { expected: u64, actual: u64 },

    #[snafu(display("Key type '{}' cannot be used for signature verification", keytype))]
    InvalidKeyType { keytype: String },

    #[snafu(display("Role name '{}' is not valid", role))]
    InvalidRole { role: String },

    #[snafu(display("Invalid URL '{}': {}", url, source))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("Failed to serialize {} to JSON: {}", what, source))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to parse '{}' metadata as JSON: {}", role, source))]
    ParseMetadata {
        role: String,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to decode public key: {}", source))]
    KeyDecode { source: base64::DecodeError },

    #[snafu(display("Failed to parse public key: {}", reason))]
    KeyParse { reason: String },

    #[snafu(display("Cannot express '{}' as a file URL", path.display()))]
    FileUrl { path: PathBuf },

    #[snafu(display("Failed to read local '{}' role: {}", role, source))]
    LocalRole {
        role: String,
        source: TransportError,
    },

    #[snafu(display("Response for '{}' exceeded the maximum size of {} bytes", url, max))]
    MaxSizeExceeded { max: u64, url: String },

    #[snafu(display("GUN must not be empty"))]
    MissingGun,

    #[snafu(display("Root role does not list keys for the '{}' role", role))]
    MissingRoleKeys { role: String },

    /// 404 from the Notary server. This is structural for the root version
    /// chain, which walks versions until the first hole.
    #[snafu(display("Role '{}' was not found on the Notary server", role))]
    NotFound { role: String },

    #[snafu(display("Notary server at '{}' is not reachable: {}", url, source))]
    NotaryPing { url: String, source: TransportError },

    #[snafu(display("Target '{}' is not present in the trusted target tree", name))]
    NoSuchTarget { name: String },

    #[snafu(display("URL '{}' must use the https scheme", url))]
    NotHttps { url: String },

    /// A refresh step produced no cached state to persist. This indicates a
    /// bug in the refresh sequencing rather than bad remote data.
    #[snafu(display("Required role '{}' is not cached; refresh before saving", role))]
    RoleNotCached { role: String },

    #[snafu(display(
        "Rollback attack: trusted '{}' role has version {} but the remote offered {}",
        role,
        trusted,
        remote
    ))]
    RollbackAttack {
        role: String,
        trusted: u64,
        remote: u64,
    },

    #[snafu(display("I/O failure while streaming verified content: {}", source))]
    StreamIo { source: std::io::Error },

    #[snafu(display("Signature is not valid base64: {}", source))]
    SignatureDecode { source: base64::DecodeError },

    #[snafu(display("Signature did not verify"))]
    SignatureCheckFailed,

    #[snafu(display("Signature is {} bytes; expected {}", actual, expected))]
    SignatureLength { expected: usize, actual: usize },

    #[snafu(display(
        "Signature threshold not met for role '{}': {} of {} required signatures verified",
        role,
        valid,
        threshold
    ))]
    SignatureThresholdNotMet {
        role: String,
        valid: u64,
        threshold: u64,
    },

    /// A delegated role appeared a second time during traversal; the branch
    /// is skipped so that delegation cycles terminate.
    #[snafu(display("Delegated role '{}' has already been visited", role))]
    TargetAlreadySeen { role: String },

    #[snafu(display("Delegation traversal exceeded the maximum of {} roles", max))]
    TooManyDelegates { max: usize },

    #[snafu(display("Transport failed to fetch '{}': {}", url, source))]
    Transport { url: String, source: TransportError },

    #[snafu(display("Delegated role '{}' was fetched before its parent declared it", role))]
    UndeclaredDelegate { role: String },

    #[snafu(display("Hash algorithm '{}' is not supported", algorithm))]
    UnsupportedHash { algorithm: String },

    #[snafu(display("Signing method '{}' is not supported", method))]
    UnsupportedSigningMethod { method: String },

    #[snafu(display("URL '{}' cannot be extended with path segments", url))]
    UrlSegments { url: String },

    #[snafu(display("Failed to walk repository directory '{}': {}", path.display(), source))]
    WalkRepo {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[snafu(display("Failed to spawn worker thread: {}", source))]
    WorkerSpawn { source: std::io::Error },
}
