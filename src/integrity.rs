// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming length and multi-hash validation against file integrity
//! metadata, per TUF 5.5.2.

use crate::error::{self, Result};
use crate::schema::FileIntegrity;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::constant_time::verify_slices_are_equal;
use ring::digest;
use snafu::{ensure, ResultExt};
use std::io::{self, Read, Write};

/// Consumes a byte stream once, feeding every declared digest algorithm and
/// checking the exact declared length. Unknown algorithms are rejected up
/// front rather than silently skipped.
pub(crate) struct IntegrityTester {
    digests: Vec<HashCheck>,
    expected_length: u64,
}

struct HashCheck {
    algorithm: String,
    context: digest::Context,
    expected: Vec<u8>,
}

impl IntegrityTester {
    pub(crate) fn new(fim: &FileIntegrity) -> Result<Self> {
        let mut digests = Vec::with_capacity(fim.hashes.len());
        for (algorithm, encoded) in &fim.hashes {
            let context = match algorithm.as_str() {
                "sha256" => digest::Context::new(&digest::SHA256),
                "sha512" => digest::Context::new(&digest::SHA512),
                _ => return error::UnsupportedHashSnafu { algorithm }.fail(),
            };
            let expected = BASE64
                .decode(encoded)
                .context(error::HashDecodeSnafu { algorithm })?;
            digests.push(HashCheck {
                algorithm: algorithm.clone(),
                context,
                expected,
            });
        }
        Ok(Self {
            digests,
            expected_length: fim.length,
        })
    }

    /// Streams `reader` into `out`, reading at most one byte past the
    /// declared length so that an over-long body is detected without
    /// draining the transport. Returns the number of bytes written, which
    /// on success always equals the declared length.
    pub(crate) fn verify_stream<R, W>(mut self, reader: R, mut out: W) -> Result<u64>
    where
        R: Read,
        W: Write,
    {
        let mut limited = reader.take(self.expected_length.saturating_add(1));
        let mut buf = [0; 8 * 1024];
        let mut length: u64 = 0;
        loop {
            match limited.read(&mut buf).context(error::StreamIoSnafu)? {
                0 => break,
                n => {
                    for check in &mut self.digests {
                        check.context.update(&buf[..n]);
                    }
                    out.write_all(&buf[..n]).context(error::StreamIoSnafu)?;
                    length += n as u64;
                }
            }
        }
        ensure!(
            length == self.expected_length,
            error::LengthMismatchSnafu {
                expected: self.expected_length,
                actual: length,
            }
        );
        for check in self.digests {
            let calculated = check.context.finish();
            verify_slices_are_equal(calculated.as_ref(), &check.expected).map_err(|_| {
                error::HashMismatchSnafu {
                    algorithm: check.algorithm,
                }
                .build()
            })?;
        }
        Ok(length)
    }
}

impl FileIntegrity {
    /// Verifies an in-memory buffer against this metadata.
    pub fn verify_bytes(&self, bytes: &[u8]) -> Result<()> {
        IntegrityTester::new(self)?
            .verify_stream(bytes, io::sink())
            .map(|_| ())
    }

    /// Streams `reader` into `writer`, verifying length and digests along
    /// the way. The write side may have received partial output when this
    /// fails; callers owning a destination file are responsible for
    /// removing it.
    pub fn verify_copy<R, W>(&self, reader: R, writer: W) -> Result<u64>
    where
        R: Read,
        W: Write,
    {
        IntegrityTester::new(self)?.verify_stream(reader, writer)
    }
}
