// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mirror download behavior: exact bytes on success, clean failures on
//! truncated or corrupted content.

mod common;

use common::*;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use sturdy::{Client, ClientBuilder, Error, ManualClock};
use tempfile::TempDir;

const TARGET: &str = "edge/target";
const CONTENT: &[u8] = b"distribution payload bytes, version 2";

fn client(local: &Path, transport: &MemTransport) -> Client {
    ClientBuilder::new(settings(local))
        .transport(Box::new(transport.clone()))
        .clock(Arc::new(ManualClock::new(test_time())))
        .build()
        .unwrap()
}

/// A repository whose top-level targets role declares [`TARGET`] at
/// [`CONTENT`]; local and remote agree.
fn setup() -> (TempDir, MemTransport) {
    let keys = KeyRing::new();
    let root = sign_role(
        root_role(1, "root-key-1", &keys.root, &keys),
        &[("root-key-1", &keys.root)],
    );
    let top = sign_role(
        targets_role(1, &[(TARGET, CONTENT)], &[], &[]),
        &[("targets-key", &keys.targets)],
    );
    let repo = repo_version(
        1,
        root,
        vec![("targets".to_string(), top)],
        &keys,
        far_future(),
    );
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), &repo);
    let transport = MemTransport::default();
    serve_remote(&transport, &repo);
    (dir, transport)
}

#[test]
fn download_writes_exactly_the_declared_bytes() {
    let (dir, transport) = setup();
    transport.put(mirror_url(TARGET), CONTENT.to_vec());
    let client = client(dir.path(), &transport);

    let out = client.download(TARGET, Vec::new()).unwrap();
    assert_eq!(out, CONTENT);

    // and through a real file, the size on disk matches the metadata
    let dest_dir = tempfile::tempdir().unwrap();
    let dest_path = dest_dir.path().join("staged");
    client
        .download(TARGET, File::create(&dest_path).unwrap())
        .unwrap();
    let metadata = fs::metadata(&dest_path).unwrap();
    assert_eq!(metadata.len(), CONTENT.len() as u64);
    assert_eq!(fs::read(&dest_path).unwrap(), CONTENT);
    client.stop();
}

#[test]
fn truncated_body_is_a_length_mismatch() {
    let (dir, transport) = setup();
    transport.put(mirror_url(TARGET), CONTENT[..CONTENT.len() - 5].to_vec());
    let client = client(dir.path(), &transport);

    let err = client.download(TARGET, Vec::new()).unwrap_err();
    match err {
        Error::FileIntegrityCheckFailed { name, source } => {
            assert_eq!(name, TARGET);
            assert!(matches!(source.as_ref(), Error::LengthMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    client.stop();
}

#[test]
fn over_long_body_is_a_length_mismatch() {
    let (dir, transport) = setup();
    let mut long = CONTENT.to_vec();
    long.push(b'!');
    transport.put(mirror_url(TARGET), long);
    let client = client(dir.path(), &transport);

    let err = client.download(TARGET, Vec::new()).unwrap_err();
    match err {
        Error::FileIntegrityCheckFailed { source, .. } => {
            assert!(matches!(source.as_ref(), Error::LengthMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    client.stop();
}

#[test]
fn corrupted_body_is_a_hash_mismatch() {
    let (dir, transport) = setup();
    let mut corrupt = CONTENT.to_vec();
    corrupt[0] ^= 0x20;
    transport.put(mirror_url(TARGET), corrupt);
    let client = client(dir.path(), &transport);

    let err = client.download(TARGET, Vec::new()).unwrap_err();
    match err {
        Error::FileIntegrityCheckFailed { source, .. } => {
            assert!(matches!(source.as_ref(), Error::HashMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    client.stop();
}

#[test]
fn unknown_target_is_rejected_before_touching_the_mirror() {
    let (dir, transport) = setup();
    let client = client(dir.path(), &transport);

    let err = client.download("no/such/target", Vec::new()).unwrap_err();
    match err {
        Error::NoSuchTarget { name } => assert_eq!(name, "no/such/target"),
        other => panic!("unexpected error: {other}"),
    }
    client.stop();
}
