// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fetches role metadata from a Notary server and distribution files from a
//! content mirror.

use crate::error::{self, Result};
use crate::schema::{FileIntegrity, RoleId, Root, Signed, Snapshot, Targets, Timestamp};
use crate::transport::{Transport, TransportErrorKind};
use log::debug;
use snafu::{ensure, ResultExt};
use std::io::{Read, Write};
use std::num::NonZeroU64;
use url::Url;

/// Clients must limit read sizes per the TUF spec; this is the bound used
/// for roles whose size is not pinned by other metadata.
pub(crate) const DEFAULT_MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

const TUF_API_PREFIX: &str = "v2";
const TUF_API_SUFFIX: &str = "_trust/tuf";
const HEALTH_PATH: &str = "_notary_server/health";

/// A Notary metadata repository for one GUN.
#[derive(Debug, Clone)]
pub(crate) struct Notary {
    url: Url,
    gun: String,
    max_response_size: u64,
    transport: Box<dyn Transport>,
}

impl Notary {
    pub(crate) fn new(base_url: &str, gun: &str, transport: Box<dyn Transport>) -> Result<Self> {
        let url = parse_https_url(base_url)?;
        ensure!(!gun.is_empty(), error::MissingGunSnafu);
        Ok(Self {
            url,
            gun: gun.to_string(),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            transport,
        })
    }

    /// Fetches the current root, or a specific version when `version` is
    /// given (the `N.root` form used while walking the root chain).
    pub(crate) fn root(&self, version: Option<NonZeroU64>) -> Result<Signed<Root>> {
        let role = match version {
            Some(v) => RoleId::VersionedRoot(v),
            None => RoleId::Root,
        };
        self.role(&role, None)
    }

    pub(crate) fn timestamp(&self) -> Result<Signed<Timestamp>> {
        self.role(&RoleId::Timestamp, None)
    }

    /// Fetches the snapshot role bounded by the length and hashes the
    /// timestamp role declared for it.
    pub(crate) fn snapshot(&self, integrity: &FileIntegrity) -> Result<Signed<Snapshot>> {
        self.role(&RoleId::Snapshot, Some(integrity))
    }

    /// Fetches a targets role (top-level or delegate) bounded by the length
    /// and hashes the snapshot declared for it.
    pub(crate) fn targets(
        &self,
        role: &RoleId,
        integrity: &FileIntegrity,
    ) -> Result<Signed<Targets>> {
        self.role(role, Some(integrity))
    }

    /// Checks that the server on the other end is a reachable Notary. A 401
    /// counts as reachable; the health endpoint sits behind the same
    /// authentication as the rest of the API on some deployments.
    pub(crate) fn ping(&self) -> Result<()> {
        let url = join_url(&self.url, HEALTH_PATH)?;
        debug!("pinging notary server at '{url}'");
        match self.transport.fetch(url.clone()) {
            Ok(_) => Ok(()),
            Err(err) if err.kind == TransportErrorKind::Unauthorized => Ok(()),
            Err(err) => Err(err).context(error::NotaryPingSnafu {
                url: url.to_string(),
            }),
        }
    }

    fn role<T>(&self, role: &RoleId, integrity: Option<&FileIntegrity>) -> Result<Signed<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.role_url(role)?;
        debug!("fetching '{role}' from '{url}'");
        let reader = match self.transport.fetch(url.clone()) {
            Ok(reader) => reader,
            // 404 is structural: the root chain walks versions until the
            // first hole
            Err(err) if err.kind == TransportErrorKind::FileNotFound => {
                return error::NotFoundSnafu {
                    role: role.to_string(),
                }
                .fail();
            }
            Err(err) => {
                return Err(err).context(error::TransportSnafu {
                    url: url.to_string(),
                });
            }
        };

        // The body is buffered, bounded either by the integrity metadata's
        // exact length or by the default cap, and tested before any JSON is
        // parsed.
        let buffer = match integrity {
            Some(fim) => {
                let mut buffer = Vec::with_capacity(fim.length as usize);
                fim.verify_copy(reader, &mut buffer)
                    .context(error::FileIntegrityCheckFailedSnafu {
                        name: role.to_string(),
                    })?;
                buffer
            }
            None => read_bounded(reader, self.max_response_size, &url)?,
        };

        serde_json::from_slice(&buffer).context(error::ParseMetadataSnafu {
            role: role.to_string(),
        })
    }

    fn role_url(&self, role: &RoleId) -> Result<Url> {
        join_url(
            &self.url,
            &format!(
                "{TUF_API_PREFIX}/{}/{TUF_API_SUFFIX}/{}",
                self.gun,
                role.filename()
            ),
        )
    }
}

/// The distribution mirror where target content lives.
#[derive(Debug, Clone)]
pub(crate) struct Mirror {
    url: Url,
    gun: String,
    transport: Box<dyn Transport>,
}

impl Mirror {
    pub(crate) fn new(base_url: &str, gun: &str, transport: Box<dyn Transport>) -> Result<Self> {
        let url = parse_https_url(base_url)?;
        ensure!(!gun.is_empty(), error::MissingGunSnafu);
        Ok(Self {
            url,
            gun: gun.to_string(),
            transport,
        })
    }

    /// Streams a target from the mirror into `dest`, reading no more than
    /// the declared length and verifying every declared digest. The mirror
    /// is asked not to let intermediaries cache the content.
    pub(crate) fn download<W: Write>(
        &self,
        name: &str,
        integrity: &FileIntegrity,
        dest: W,
    ) -> Result<u64> {
        let url = join_url(&self.url, &format!("{}/{name}", self.gun))?;
        debug!("downloading target '{name}' from '{url}'");
        let reader = self
            .transport
            .fetch_no_store(url.clone())
            .context(error::TransportSnafu {
                url: url.to_string(),
            })?;
        integrity
            .verify_copy(reader, dest)
            .context(error::FileIntegrityCheckFailedSnafu { name })
    }
}

fn parse_https_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).context(error::InvalidUrlSnafu { url: raw })?;
    ensure!(url.scheme() == "https", error::NotHttpsSnafu { url: raw });
    Ok(url)
}

fn join_url(base: &Url, path: &str) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|()| {
            error::UrlSegmentsSnafu {
                url: base.to_string(),
            }
            .build()
        })?;
        segments.pop_if_empty();
        for segment in path.split('/') {
            segments.push(segment);
        }
    }
    Ok(url)
}

fn read_bounded(reader: Box<dyn Read + Send>, max: u64, url: &Url) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut limited = reader.take(max + 1);
    limited
        .read_to_end(&mut buffer)
        .context(error::StreamIoSnafu)?;
    ensure!(
        buffer.len() as u64 <= max,
        error::MaxSizeExceededSnafu {
            max,
            url: url.to_string(),
        }
    );
    Ok(buffer)
}
