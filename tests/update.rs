// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end refresh scenarios against signed in-memory repositories.

mod common;

use common::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use sturdy::schema::{Root, Signed, Timestamp};
use sturdy::{Client, ClientBuilder, Error, ManualClock};
use tempfile::TempDir;

fn client(local: &Path, transport: &MemTransport) -> Client {
    ClientBuilder::new(settings(local))
        .transport(Box::new(transport.clone()))
        .clock(Arc::new(ManualClock::new(test_time())))
        .build()
        .unwrap()
}

/// Local baseline and transport for a repository whose delegate
/// `targets/releases` owns `edge/target`.
struct Edge {
    keys: KeyRing,
    root: Signed<Root>,
    local_dir: TempDir,
    transport: MemTransport,
}

fn edge_setup(local_content: &[u8]) -> Edge {
    let keys = KeyRing::new();
    let root = sign_role(
        root_role(1, "root-key-1", &keys.root, &keys),
        &[("root-key-1", &keys.root)],
    );
    let top = sign_role(
        targets_role(
            1,
            &[],
            &[("alpha-key", &keys.alpha)],
            &[("targets/releases", "alpha-key")],
        ),
        &[("targets-key", &keys.targets)],
    );
    let releases = sign_role(
        targets_role(1, &[("edge/target", local_content)], &[], &[]),
        &[("alpha-key", &keys.alpha)],
    );
    let local = repo_version(
        1,
        root.clone(),
        vec![
            ("targets".to_string(), top),
            ("targets/releases".to_string(), releases),
        ],
        &keys,
        far_future(),
    );
    let local_dir = tempfile::tempdir().unwrap();
    write_local(local_dir.path(), &local);
    Edge {
        keys,
        root,
        local_dir,
        transport: MemTransport::default(),
    }
}

/// The remote counterpart of [`edge_setup`], with `edge/target` at
/// `content` and the metadata chain at `meta_version`.
fn edge_remote(edge: &Edge, meta_version: u64, content: &[u8]) -> RepoVersion {
    let top = sign_role(
        targets_role(
            1,
            &[],
            &[("alpha-key", &edge.keys.alpha)],
            &[("targets/releases", "alpha-key")],
        ),
        &[("targets-key", &edge.keys.targets)],
    );
    let releases = sign_role(
        targets_role(meta_version, &[("edge/target", content)], &[], &[]),
        &[("alpha-key", &edge.keys.alpha)],
    );
    repo_version(
        meta_version,
        edge.root.clone(),
        vec![
            ("targets".to_string(), top),
            ("targets/releases".to_string(), releases),
        ],
        &edge.keys,
        far_future(),
    )
}

#[test]
fn refreshed_metadata_without_target_changes_is_latest() {
    let content = b"edge target content";
    let edge = edge_setup(content);
    let remote = edge_remote(&edge, 2, content);
    serve_remote(&edge.transport, &remote);

    let client = client(edge.local_dir.path(), &edge.transport);
    let report = client.update().unwrap();
    assert!(report.latest());
    assert!(report.changed.is_empty());

    // the re-signed timestamp and snapshot became the local baseline
    let timestamp: Signed<Timestamp> =
        serde_json::from_slice(&fs::read(edge.local_dir.path().join("timestamp.json")).unwrap())
            .unwrap();
    assert_eq!(u64::from(timestamp.signed.version), 2);
    client.stop();
}

#[test]
fn changed_target_is_reported() {
    let edge = edge_setup(b"old bytes");
    let new_content = b"new bytes entirely";
    let remote = edge_remote(&edge, 2, new_content);
    serve_remote(&edge.transport, &remote);

    let client = client(edge.local_dir.path(), &edge.transport);
    let report = client.update().unwrap();
    assert!(!report.latest());
    assert_eq!(report.changed.len(), 1);
    assert_eq!(report.changed["edge/target"], fim_of(new_content));

    // immediately updating again finds nothing new
    let report = client.update().unwrap();
    assert!(report.latest());
    client.stop();
}

#[test]
fn root_rotation_is_followed_and_persisted() {
    let content: &[u8] = b"content";
    let edge = edge_setup(content);

    // version 2 swaps the root key; it is signed by both the outgoing and
    // the incoming key
    let root2 = sign_role(
        root_role(2, "root-key-2", &edge.keys.root2, &edge.keys),
        &[
            ("root-key-1", &edge.keys.root),
            ("root-key-2", &edge.keys.root2),
        ],
    );
    let mut remote = edge_remote(&edge, 2, content);
    remote.root = root2;
    serve_remote(&edge.transport, &remote);

    let client = client(edge.local_dir.path(), &edge.transport);
    client.update().unwrap();

    let root: Signed<Root> =
        serde_json::from_slice(&fs::read(edge.local_dir.path().join("root.json")).unwrap())
            .unwrap();
    assert_eq!(u64::from(root.signed.version), 2);
    client.stop();
}

#[test]
fn unrotated_root_chain_stops_at_first_missing_version() {
    let content: &[u8] = b"content";
    let edge = edge_setup(content);
    let remote = edge_remote(&edge, 2, content);
    // serve_remote publishes 1.root; 2.root does not exist, so the chain
    // keeps the local root
    serve_remote(&edge.transport, &remote);

    let client = client(edge.local_dir.path(), &edge.transport);
    client.update().unwrap();

    let root: Signed<Root> =
        serde_json::from_slice(&fs::read(edge.local_dir.path().join("root.json")).unwrap())
            .unwrap();
    assert_eq!(u64::from(root.signed.version), 1);
    client.stop();
}

#[test]
fn rotated_root_signed_only_by_its_own_key_is_rejected() {
    let content: &[u8] = b"content";
    let edge = edge_setup(content);
    let root2 = sign_role(
        root_role(2, "root-key-2", &edge.keys.root2, &edge.keys),
        // missing the outgoing key's signature
        &[("root-key-2", &edge.keys.root2)],
    );
    let mut remote = edge_remote(&edge, 2, content);
    remote.root = root2;
    serve_remote(&edge.transport, &remote);

    let client = client(edge.local_dir.path(), &edge.transport);
    let err = client.update().unwrap_err();
    assert!(matches!(err, Error::SignatureThresholdNotMet { .. }));
    client.stop();
}

#[test]
fn timestamp_rollback_is_detected() {
    let content: &[u8] = b"content";
    let keys = KeyRing::new();
    let root = sign_role(
        root_role(1, "root-key-1", &keys.root, &keys),
        &[("root-key-1", &keys.root)],
    );
    let top = sign_role(
        targets_role(1, &[("plain/target", content)], &[], &[]),
        &[("targets-key", &keys.targets)],
    );
    let local = repo_version(
        5,
        root.clone(),
        vec![("targets".to_string(), top.clone())],
        &keys,
        far_future(),
    );
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), &local);

    // the remote is older than what we already trust
    let remote = repo_version(
        4,
        root,
        vec![("targets".to_string(), top)],
        &keys,
        far_future(),
    );
    let transport = MemTransport::default();
    serve_remote(&transport, &remote);

    let client = client(dir.path(), &transport);
    let err = client.update().unwrap_err();
    match err {
        Error::RollbackAttack {
            role,
            trusted,
            remote,
        } => {
            assert_eq!(role, "timestamp");
            assert_eq!((trusted, remote), (5, 4));
        }
        other => panic!("unexpected error: {other}"),
    }
    client.stop();
}

#[test]
fn expired_remote_metadata_is_a_freeze_attack() {
    let content: &[u8] = b"content";
    let keys = KeyRing::new();
    let root = sign_role(
        root_role(1, "root-key-1", &keys.root, &keys),
        &[("root-key-1", &keys.root)],
    );
    let top = sign_role(
        targets_role(1, &[("plain/target", content)], &[], &[]),
        &[("targets-key", &keys.targets)],
    );
    let local = repo_version(
        1,
        root.clone(),
        vec![("targets".to_string(), top.clone())],
        &keys,
        far_future(),
    );
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), &local);

    let remote = repo_version(
        2,
        root,
        vec![("targets".to_string(), top)],
        &keys,
        in_the_past(),
    );
    let transport = MemTransport::default();
    serve_remote(&transport, &remote);

    let client = client(dir.path(), &transport);
    let err = client.update().unwrap_err();
    assert!(matches!(err, Error::FreezeAttack { .. }));
    client.stop();
}

#[test]
fn tampered_snapshot_fails_its_integrity_check() {
    let content: &[u8] = b"content";
    let edge = edge_setup(content);
    let remote = edge_remote(&edge, 2, content);
    serve_remote(&edge.transport, &remote);

    // flip one byte of the served snapshot; the timestamp-declared hashes
    // no longer match
    let mut bytes = remote.snapshot.canonical_form().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    edge.transport.put(notary_role_url("snapshot"), bytes);

    let client = client(edge.local_dir.path(), &edge.transport);
    let err = client.update().unwrap_err();
    match err {
        Error::FileIntegrityCheckFailed { name, source } => {
            assert_eq!(name, "snapshot");
            assert!(matches!(source.as_ref(), Error::HashMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    // the failed refresh persisted nothing; the local timestamp is still
    // at its baseline version
    let timestamp: Signed<Timestamp> =
        serde_json::from_slice(&fs::read(edge.local_dir.path().join("timestamp.json")).unwrap())
            .unwrap();
    assert_eq!(u64::from(timestamp.signed.version), 1);
    client.stop();
}

#[test]
fn lower_precedence_claim_on_an_owned_path_changes_nothing() {
    let keys = KeyRing::new();
    let owned: &[u8] = b"alpha owns this content";
    let beta_only: &[u8] = b"content only beta provides";
    let imposter: &[u8] = b"imposter bytes here!!!!"; // not what alpha pinned
    assert_eq!(owned.len(), imposter.len());

    let root = sign_role(
        root_role(1, "root-key-1", &keys.root, &keys),
        &[("root-key-1", &keys.root)],
    );
    let top = |version| {
        sign_role(
            targets_role(
                version,
                &[],
                &[("alpha-key", &keys.alpha), ("beta-key", &keys.beta)],
                &[("targets/alpha", "alpha-key"), ("targets/beta", "beta-key")],
            ),
            &[("targets-key", &keys.targets)],
        )
    };
    let alpha = sign_role(
        targets_role(1, &[("alpha/shared", owned)], &[], &[]),
        &[("alpha-key", &keys.alpha)],
    );
    let beta_v1 = sign_role(
        targets_role(1, &[("beta/only", beta_only)], &[], &[]),
        &[("beta-key", &keys.beta)],
    );
    // in the next version, beta also claims alpha's path with different
    // content
    let beta_v2 = sign_role(
        targets_role(
            2,
            &[("beta/only", beta_only), ("alpha/shared", imposter)],
            &[],
            &[],
        ),
        &[("beta-key", &keys.beta)],
    );

    let local = repo_version(
        1,
        root.clone(),
        vec![
            ("targets".to_string(), top(1)),
            ("targets/alpha".to_string(), alpha.clone()),
            ("targets/beta".to_string(), beta_v1),
        ],
        &keys,
        far_future(),
    );
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), &local);

    let remote = repo_version(
        2,
        root,
        vec![
            ("targets".to_string(), top(1)),
            ("targets/alpha".to_string(), alpha),
            ("targets/beta".to_string(), beta_v2),
        ],
        &keys,
        far_future(),
    );
    let transport = MemTransport::default();
    serve_remote(&transport, &remote);
    // the mirror carries beta's bytes for the contested path
    transport.put(mirror_url("alpha/shared"), imposter.to_vec());
    transport.put(mirror_url("beta/only"), beta_only.to_vec());

    let client = client(dir.path(), &transport);
    // the owning delegate did not change its metadata, so this is latest
    let report = client.update().unwrap();
    assert!(report.latest());

    // a path only the lower-precedence delegate declares downloads fine
    let out = client.download("beta/only", Vec::new()).unwrap();
    assert_eq!(out, beta_only);

    // the contested path is verified against the owner's metadata, and the
    // mirror's content does not hash to it
    let err = client.download("alpha/shared", Vec::new()).unwrap_err();
    match err {
        Error::FileIntegrityCheckFailed { source, .. } => {
            assert!(matches!(source.as_ref(), Error::HashMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    client.stop();
}
