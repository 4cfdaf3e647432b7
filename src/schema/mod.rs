#![allow(clippy::used_underscore_binding)]

//! Provides the schema objects for TUF role metadata as served by a Notary
//! server.
//!
//! Every signed body keeps a flattened `_extra` map of fields we do not
//! model. Signature verification digests the canonical JSON of the body, so
//! dropping unknown fields on deserialization would change the canonical
//! bytes and break otherwise-valid signatures.

use crate::error::{self, Error, Result};
use chrono::{DateTime, Utc};
use olpc_cjson::CanonicalFormatter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{ensure, ResultExt};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

/// The type of a top-level metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleKind {
    /// The root role delegates trust to specific keys trusted for all other
    /// top-level roles used in the system.
    Root,
    /// The snapshot role lists the current version of all targets metadata
    /// on the repository.
    Snapshot,
    /// The targets role's signature indicates which target files are
    /// trusted by clients.
    Targets,
    /// The timestamp role is frequently re-signed to limit the amount of
    /// time a client can be kept unaware of interference with obtaining
    /// updates.
    Timestamp,
}

forward_display_to_serde!(RoleKind);
forward_from_str_to_serde!(RoleKind);

/// The name of a metadata file on the Notary server: one of the four fixed
/// roles, a versioned root (`N.root`), or a delegated targets role whose
/// name is a `/`-separated path below `targets`.
///
/// Modeling this as a sum type means a role name and the metadata type it
/// carries can never disagree at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleId {
    /// `root.json`.
    Root,
    /// `N.root.json`, the root at a specific version.
    VersionedRoot(NonZeroU64),
    /// `timestamp.json`.
    Timestamp,
    /// `snapshot.json`.
    Snapshot,
    /// `targets.json`, the top of the delegation tree.
    Targets,
    /// A delegated targets role, e.g. `targets/releases`.
    Delegate(String),
}

impl RoleId {
    /// Parses a delegated role path. Delegate names must be rooted at
    /// `targets` and must not contain empty or dot segments, which keeps
    /// them safe to map onto the local filesystem.
    pub fn delegate(name: &str) -> Result<Self> {
        let mut segments = name.split('/');
        ensure!(
            segments.next() == Some("targets"),
            error::InvalidRoleSnafu { role: name }
        );
        let mut seen_child = false;
        for segment in segments {
            seen_child = true;
            ensure!(
                !segment.is_empty()
                    && segment != "."
                    && segment != ".."
                    && !segment.contains('\\'),
                error::InvalidRoleSnafu { role: name }
            );
        }
        ensure!(seen_child, error::InvalidRoleSnafu { role: name });
        Ok(RoleId::Delegate(name.to_string()))
    }

    /// The relative path of this role's metadata file, e.g. `snapshot.json`
    /// or `targets/releases.json`.
    pub fn filename(&self) -> String {
        format!("{self}.json")
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleId::Root => write!(f, "root"),
            RoleId::VersionedRoot(v) => write!(f, "{v}.root"),
            RoleId::Timestamp => write!(f, "timestamp"),
            RoleId::Snapshot => write!(f, "snapshot"),
            RoleId::Targets => write!(f, "targets"),
            RoleId::Delegate(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for RoleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "root" => Ok(RoleId::Root),
            "timestamp" => Ok(RoleId::Timestamp),
            "snapshot" => Ok(RoleId::Snapshot),
            "targets" => Ok(RoleId::Targets),
            _ => {
                if let Some(version) = s.strip_suffix(".root") {
                    // the version must be a decimal integer with no leading
                    // zero, mirroring `^[1-9][0-9]*\.root$`
                    ensure!(
                        !version.is_empty()
                            && !version.starts_with('0')
                            && version.bytes().all(|b| b.is_ascii_digit()),
                        error::InvalidRoleSnafu { role: s }
                    );
                    let version: NonZeroU64 = version
                        .parse()
                        .ok()
                        .ok_or_else(|| error::InvalidRoleSnafu { role: s }.build())?;
                    Ok(RoleId::VersionedRoot(version))
                } else {
                    RoleId::delegate(s)
                }
            }
        }
    }
}

/// Common trait implemented by all roles.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const KIND: RoleKind;

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    fn expires(&self) -> DateTime<Utc>;

    /// An integer that is greater than 0. Clients MUST NOT replace a
    /// metadata file with a version number less than the one currently
    /// trusted.
    fn version(&self) -> NonZeroU64;

    /// A deterministic JSON serialization used when calculating the digest
    /// of a metadata object.
    /// [More info on canonical JSON](http://wiki.laptop.org/go/Canonical_JSON)
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "role" })?;
        Ok(data)
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

impl<T: Serialize> Signed<T> {
    /// The canonical JSON bytes of the whole envelope, which is the form
    /// written to the local repository.
    pub fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "envelope" })?;
        Ok(data)
    }
}

/// A signature and the server-assigned ID of the key that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in root.json or in a delegating role) that made
    /// this signature.
    pub keyid: String,
    /// The signing method the key was used with.
    pub method: SigningMethod,
    /// The base64-encoded signature of the canonical JSON form of a role.
    pub sig: String,
}

/// The cryptographic method a signature was produced with. Only ECDSA
/// signatures can be verified by this client.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SigningMethod {
    /// ECDSA over P-256, signature as raw `(r, s)` octet halves.
    Ecdsa,
    /// Reserved; not verifiable by this client.
    Rsa,
    /// Reserved; not verifiable by this client.
    Ed25519,
}

forward_display_to_serde!(SigningMethod);

/// A public key as served in role metadata.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Key {
    /// The type of the key material in `keyval`.
    pub keytype: KeyType,
    /// The key material.
    pub keyval: KeyVal,

    /// Extra fields found during deserialization, kept so signatures over
    /// this object still verify.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The encoding of a public key's material.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// Base64 of a PKIX `SubjectPublicKeyInfo` holding an ECDSA key.
    Ecdsa,
    /// Base64 of a PEM-encoded x509 certificate whose subject key is ECDSA.
    EcdsaX509,
    /// Reserved; not verifiable by this client.
    RsaX509,
    /// Reserved; not verifiable by this client.
    Ed25519,
}

forward_display_to_serde!(KeyType);

/// The contents of a key. Only the public half is ever relevant here; the
/// `private` field servers emit as `null` is preserved through `_extra`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct KeyVal {
    /// The base64-encoded public key.
    pub public: String,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The length and digests of a file-shaped resource, used to ensure the
/// binary footprint of the file has not been tampered with.
#[derive(Debug, Clone, Deserialize, Serialize, Eq)]
pub struct FileIntegrity {
    /// A map of hash algorithm name to the base64-encoded digest of the
    /// file. Algorithms other than `sha256` and `sha512` are carried but
    /// cannot be verified.
    pub hashes: BTreeMap<String, String>,

    /// The length of the file in bytes.
    pub length: u64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// Equality of file integrity metadata is elementwise over the length and
/// the declared digests; extra fields do not participate.
impl PartialEq for FileIntegrity {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.hashes == other.hashes
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root role. It indicates which keys are authorized for all top-level
/// roles, including the root role itself. Revocation and replacement of
/// top-level role keys is done by publishing a new version of this file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Root {
    /// The role type tag as issued by the server (e.g. `Root`).
    #[serde(rename = "_type")]
    pub type_tag: String,

    /// Whether the repository supports consistent snapshots. Consistent
    /// snapshots are not supported by this client; accepted metadata must
    /// carry `false`.
    pub consistent_snapshot: bool,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// The public keys trusted by this root, by server-assigned key ID.
    pub keys: HashMap<String, Key>,

    /// The key IDs and signature threshold for each top-level role.
    pub roles: HashMap<RoleKind, RoleKeys>,

    /// An integer that is greater than 0. Clients MUST NOT replace a
    /// metadata file with a version number less than the one currently
    /// trusted.
    pub version: NonZeroU64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// The key IDs and threshold the root declares for `role`, or an error
    /// if the root does not mention the role at all.
    pub fn role_keys(&self, role: RoleKind) -> Result<&RoleKeys> {
        self.roles.get(&role).ok_or_else(|| {
            error::MissingRoleKeysSnafu {
                role: role.to_string(),
            }
            .build()
        })
    }
}

impl Role for Root {
    const KIND: RoleKind = RoleKind::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// The key IDs used for a role and the threshold of signatures required to
/// validate it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<String>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp role. It pins the current snapshot and is frequently
/// re-signed to limit the amount of time a client can be kept unaware of
/// interference with obtaining updates.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Timestamp {
    /// The role type tag as issued by the server.
    #[serde(rename = "_type")]
    pub type_tag: String,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// Integrity metadata for the snapshot role, keyed by role name.
    pub meta: HashMap<String, FileIntegrity>,

    /// An integer that is greater than 0. Clients MUST NOT replace a
    /// metadata file with a version number less than the one currently
    /// trusted.
    pub version: NonZeroU64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Role for Timestamp {
    const KIND: RoleKind = RoleKind::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// The snapshot role. It lists the current version, length, and hashes of
/// the top-level targets metadata and every delegated targets file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Snapshot {
    /// The role type tag as issued by the server.
    #[serde(rename = "_type")]
    pub type_tag: String,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// Integrity metadata for targets metadata files, keyed by role name
    /// (`targets` plus each delegate, e.g. `targets/releases`).
    pub meta: HashMap<String, FileIntegrity>,

    /// An integer that is greater than 0. Clients MUST NOT replace a
    /// metadata file with a version number less than the one currently
    /// trusted.
    pub version: NonZeroU64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Role for Snapshot {
    const KIND: RoleKind = RoleKind::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A targets role: the top-level `targets` file or any delegated targets
/// file below it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Targets {
    /// The role type tag as issued by the server.
    #[serde(rename = "_type")]
    pub type_tag: String,

    /// Signing information for targets hosted by external principals.
    #[serde(default)]
    pub delegations: Delegations,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// Integrity metadata for each target path this role declares.
    pub targets: HashMap<String, FileIntegrity>,

    /// An integer that is greater than 0. Clients MUST NOT replace a
    /// metadata file with a version number less than the one currently
    /// trusted.
    pub version: NonZeroU64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Role for Targets {
    const KIND: RoleKind = RoleKind::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// Keys and roles for targets delegated to other principals.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// The public keys used to verify signatures of delegated targets
    /// roles, by server-assigned key ID.
    pub keys: HashMap<String, Key>,

    /// The list of delegated roles, in the order that determines their
    /// precedence during traversal.
    pub roles: Vec<DelegatedRole>,
}

/// A delegated targets role as declared by its parent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The name of the delegated role, e.g. `targets/releases`.
    pub name: String,

    /// The key IDs this role signs with.
    pub keyids: Vec<String>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// The target paths this role is trusted to provide.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}
