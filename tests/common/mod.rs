// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Utilities for tests: deterministic signing keys, an in-memory transport,
//! and builders that assemble fully signed repository versions. Not every
//! test module uses every helper, so we suppress unused warnings.
#![allow(unused)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use ring::digest;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::{Arc, Mutex};
use sturdy::schema::{
    DelegatedRole, Delegations, FileIntegrity, Key, KeyType, KeyVal, Role, RoleKeys, RoleKind,
    Root, Signature, Signed, SigningMethod, Snapshot, Targets, Timestamp,
};
use sturdy::{Transport, TransportError, TransportErrorKind};
use url::Url;

pub const GUN: &str = "acme/agent/linux";
pub const NOTARY_URL: &str = "https://notary.test";
pub const MIRROR_URL: &str = "https://mirror.test";

/// The "now" most tests run at.
pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 7, 1, 18, 0, 0).unwrap()
}

pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
}

pub fn in_the_past() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A [`Transport`] serving canned bytes keyed by full URL. Unknown URLs
/// yield `FileNotFound`, which is exactly what a Notary 404 looks like.
#[derive(Debug, Clone, Default)]
pub struct MemTransport {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemTransport {
    pub fn put(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(url.into(), bytes.into());
    }

    pub fn remove(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }
}

impl Transport for MemTransport {
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        let files = self.files.lock().unwrap();
        match files.get(url.as_str()) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(TransportError::new(
                TransportErrorKind::FileNotFound,
                url,
                "no such entry",
            )),
        }
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Deterministic signing keys, one per role plus two delegate keys.
pub struct KeyRing {
    pub root: SigningKey,
    pub root2: SigningKey,
    pub timestamp: SigningKey,
    pub snapshot: SigningKey,
    pub targets: SigningKey,
    pub alpha: SigningKey,
    pub beta: SigningKey,
}

impl KeyRing {
    pub fn new() -> Self {
        Self {
            root: key_from_seed(1),
            root2: key_from_seed(2),
            timestamp: key_from_seed(3),
            snapshot: key_from_seed(4),
            targets: key_from_seed(5),
            alpha: key_from_seed(6),
            beta: key_from_seed(7),
        }
    }
}

fn key_from_seed(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

/// A schema `Key` for the public half of a signing key, in the raw PKIX
/// `ecdsa` form.
pub fn public_key(sk: &SigningKey) -> Key {
    let der = sk
        .verifying_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    Key {
        keytype: KeyType::Ecdsa,
        keyval: KeyVal {
            public: BASE64.encode(der),
            _extra: HashMap::new(),
        },
        _extra: HashMap::new(),
    }
}

/// Signs a role body with each `(keyid, key)` pair.
pub fn sign_role<T: Role>(role: T, signers: &[(&str, &SigningKey)]) -> Signed<T> {
    let canonical = role.canonical_form().unwrap();
    let signatures = signers
        .iter()
        .map(|(keyid, sk)| {
            let signature: EcdsaSignature = sk.sign(&canonical);
            Signature {
                keyid: keyid.to_string(),
                method: SigningMethod::Ecdsa,
                sig: BASE64.encode(signature.to_bytes()),
            }
        })
        .collect();
    Signed {
        signed: role,
        signatures,
    }
}

/// Integrity metadata (sha256 + sha512) for a byte string.
pub fn fim_of(bytes: &[u8]) -> FileIntegrity {
    let mut hashes = BTreeMap::new();
    hashes.insert(
        "sha256".to_string(),
        BASE64.encode(digest::digest(&digest::SHA256, bytes)),
    );
    hashes.insert(
        "sha512".to_string(),
        BASE64.encode(digest::digest(&digest::SHA512, bytes)),
    );
    FileIntegrity {
        hashes,
        length: bytes.len() as u64,
        _extra: HashMap::new(),
    }
}

pub fn role_keys(keyids: &[&str]) -> RoleKeys {
    RoleKeys {
        keyids: keyids.iter().map(|s| s.to_string()).collect(),
        threshold: NonZeroU64::new(1).unwrap(),
        _extra: HashMap::new(),
    }
}

/// A root declaring one key per role. `root_keyid` names the root key so
/// rotation tests can introduce a second one.
pub fn root_role(
    version: u64,
    root_keyid: &str,
    root_key: &SigningKey,
    keys: &KeyRing,
) -> Root {
    let mut key_map = HashMap::new();
    key_map.insert(root_keyid.to_string(), public_key(root_key));
    key_map.insert("timestamp-key".to_string(), public_key(&keys.timestamp));
    key_map.insert("snapshot-key".to_string(), public_key(&keys.snapshot));
    key_map.insert("targets-key".to_string(), public_key(&keys.targets));

    let mut roles = HashMap::new();
    roles.insert(RoleKind::Root, role_keys(&[root_keyid]));
    roles.insert(RoleKind::Timestamp, role_keys(&["timestamp-key"]));
    roles.insert(RoleKind::Snapshot, role_keys(&["snapshot-key"]));
    roles.insert(RoleKind::Targets, role_keys(&["targets-key"]));

    Root {
        type_tag: "Root".to_string(),
        consistent_snapshot: false,
        expires: far_future(),
        keys: key_map,
        roles,
        version: NonZeroU64::new(version).unwrap(),
        _extra: HashMap::new(),
    }
}

/// A targets body declaring `targets` paths (each with the integrity of its
/// mirror content) and delegating to `delegates`.
pub fn targets_role(
    version: u64,
    paths: &[(&str, &[u8])],
    delegate_keys: &[(&str, &SigningKey)],
    delegates: &[(&str, &str)],
) -> Targets {
    Targets {
        type_tag: "Targets".to_string(),
        delegations: Delegations {
            keys: delegate_keys
                .iter()
                .map(|(keyid, sk)| (keyid.to_string(), public_key(sk)))
                .collect(),
            roles: delegates
                .iter()
                .map(|(name, keyid)| DelegatedRole {
                    name: name.to_string(),
                    keyids: vec![keyid.to_string()],
                    threshold: NonZeroU64::new(1).unwrap(),
                    paths: vec![format!("{name}/*")],
                    _extra: HashMap::new(),
                })
                .collect(),
        },
        expires: far_future(),
        targets: paths
            .iter()
            .map(|(path, content)| (path.to_string(), fim_of(content)))
            .collect(),
        version: NonZeroU64::new(version).unwrap(),
        _extra: HashMap::new(),
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// One complete, internally consistent version of the repository: signed
/// targets files, a snapshot pinning their exact bytes, and a timestamp
/// pinning the snapshot.
pub struct RepoVersion {
    pub root: Signed<Root>,
    pub timestamp: Signed<Timestamp>,
    pub snapshot: Signed<Snapshot>,
    /// `(role name, envelope, canonical bytes)`; the top-level `targets`
    /// role first, delegates after it.
    pub targets_files: Vec<(String, Signed<Targets>, Vec<u8>)>,
}

/// Assembles the metadata chain for the given targets files. `signers`
/// carries the timestamp and snapshot keys so expired/rolled-back variants
/// can reuse it.
pub fn repo_version(
    meta_version: u64,
    root: Signed<Root>,
    targets_files: Vec<(String, Signed<Targets>)>,
    keys: &KeyRing,
    expires: DateTime<Utc>,
) -> RepoVersion {
    let targets_files: Vec<(String, Signed<Targets>, Vec<u8>)> = targets_files
        .into_iter()
        .map(|(name, envelope)| {
            let bytes = envelope.canonical_form().unwrap();
            (name, envelope, bytes)
        })
        .collect();

    let snapshot_meta: HashMap<String, FileIntegrity> = targets_files
        .iter()
        .map(|(name, _, bytes)| (name.clone(), fim_of(bytes)))
        .collect();
    let snapshot = sign_role(
        Snapshot {
            type_tag: "Snapshot".to_string(),
            expires,
            meta: snapshot_meta,
            version: NonZeroU64::new(meta_version).unwrap(),
            _extra: HashMap::new(),
        },
        &[("snapshot-key", &keys.snapshot)],
    );

    let mut timestamp_meta = HashMap::new();
    timestamp_meta.insert(
        "snapshot".to_string(),
        fim_of(&snapshot.canonical_form().unwrap()),
    );
    let timestamp = sign_role(
        Timestamp {
            type_tag: "Timestamp".to_string(),
            expires,
            meta: timestamp_meta,
            version: NonZeroU64::new(meta_version).unwrap(),
            _extra: HashMap::new(),
        },
        &[("timestamp-key", &keys.timestamp)],
    );

    RepoVersion {
        root,
        timestamp,
        snapshot,
        targets_files,
    }
}

/// Writes a repository version into a local directory as the trusted
/// baseline.
pub fn write_local(dir: &Path, repo: &RepoVersion) {
    let write = |relative: String, bytes: Vec<u8>| {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, bytes).unwrap();
    };
    write("root.json".to_string(), repo.root.canonical_form().unwrap());
    write(
        "timestamp.json".to_string(),
        repo.timestamp.canonical_form().unwrap(),
    );
    write(
        "snapshot.json".to_string(),
        repo.snapshot.canonical_form().unwrap(),
    );
    for (name, _, bytes) in &repo.targets_files {
        write(format!("{name}.json"), bytes.clone());
    }
}

/// Serves a repository version from the Notary URLs, plus the health
/// endpoint. Root metadata is published at its versioned URL, which is the
/// only root form the client fetches.
pub fn serve_remote(transport: &MemTransport, repo: &RepoVersion) {
    transport.put(format!("{NOTARY_URL}/_notary_server/health"), Vec::new());
    serve_root(transport, &repo.root);
    transport.put(
        notary_role_url("timestamp"),
        repo.timestamp.canonical_form().unwrap(),
    );
    transport.put(
        notary_role_url("snapshot"),
        repo.snapshot.canonical_form().unwrap(),
    );
    for (name, _, bytes) in &repo.targets_files {
        transport.put(notary_role_url(name), bytes.clone());
    }
}

/// Publishes a root at its `N.root` URL, e.g. during a rotation.
pub fn serve_root(transport: &MemTransport, root: &Signed<Root>) {
    let version = u64::from(root.signed.version);
    transport.put(
        notary_role_url(&format!("{version}.root")),
        root.canonical_form().unwrap(),
    );
}

pub fn notary_role_url(role: &str) -> String {
    format!("{NOTARY_URL}/v2/{GUN}/_trust/tuf/{role}.json")
}

pub fn mirror_url(target: &str) -> String {
    format!("{MIRROR_URL}/{GUN}/{target}")
}

pub fn settings(local_repo: &Path) -> sturdy::Settings {
    sturdy::Settings {
        local_repo: local_repo.to_path_buf(),
        notary_url: NOTARY_URL.to_string(),
        mirror_url: MIRROR_URL.to_string(),
        gun: GUN.to_string(),
    }
}
