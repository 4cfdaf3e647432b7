//! Preorder traversal of the targets delegation graph.
//!
//! The tree walk implements TUF 4.5: a preorder depth-first search for
//! metadata about desired targets, beginning with the top-level targets
//! role. A role that has been visited before is skipped so that cycles in
//! the delegation graph terminate, and the walk aborts once an
//! application-specific maximum number of roles has been visited so that an
//! attacker cannot make the client spend unbounded bandwidth or time.

use crate::error::{self, Error, Result};
use crate::schema::{FileIntegrity, Signed, Targets};
use log::trace;
use std::collections::{HashMap, HashSet};

/// The maximum number of targets roles visited in one traversal, the
/// top-level `targets` role included.
pub(crate) const MAX_DELEGATION_COUNT: usize = 50;

/// Fetches targets metadata by role name. Implemented by the local store
/// (reading the trusted baseline from disk) and by the validating Notary
/// fetcher (downloading, bounding, and signature-checking each role).
pub(crate) trait TargetsFetcher {
    fn fetch(&mut self, role: &str) -> Result<Signed<Targets>>;
}

/// A fully traversed delegation tree.
///
/// `entries` holds every visited role in preorder, which is the precedence
/// order: the first role to declare a target path owns that path, and later
/// declarations of the same path are ignored. The tree is immutable once
/// built; a refresh replaces it wholesale.
#[derive(Debug, Clone)]
pub struct TargetTree {
    entries: Vec<TreeEntry>,
    lookup: HashMap<String, usize>,
    paths: HashMap<String, FileIntegrity>,
}

#[derive(Debug, Clone)]
pub(crate) struct TreeEntry {
    pub(crate) role: String,
    pub(crate) envelope: Signed<Targets>,
}

impl TargetTree {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            lookup: HashMap::new(),
            paths: HashMap::new(),
        }
    }

    /// Every target path in the tree with the integrity metadata declared
    /// by its owning (highest-precedence) role.
    pub fn paths(&self) -> &HashMap<String, FileIntegrity> {
        &self.paths
    }

    /// The metadata for a role in the tree, if it was visited.
    pub(crate) fn role(&self, name: &str) -> Option<&Signed<Targets>> {
        self.lookup.get(name).map(|&i| &self.entries[i].envelope)
    }

    /// Visited roles in precedence (preorder) order. The first entry is the
    /// top-level `targets` role.
    pub(crate) fn entries(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter()
    }

    fn append(&mut self, role: &str, envelope: Signed<Targets>) {
        for (path, integrity) in &envelope.signed.targets {
            // a higher-precedence role may already own this path
            self.paths
                .entry(path.clone())
                .or_insert_with(|| integrity.clone());
        }
        self.lookup.insert(role.to_string(), self.entries.len());
        self.entries.push(TreeEntry {
            role: role.to_string(),
            envelope,
        });
    }
}

/// Builds a [`TargetTree`] by walking the delegation graph through
/// `fetcher`, starting at the top-level `targets` role.
pub(crate) fn build(fetcher: &mut dyn TargetsFetcher) -> Result<TargetTree> {
    let top = fetcher.fetch("targets")?;
    let mut tree = TargetTree::new();
    let mut visited = HashSet::new();
    visited.insert("targets".to_string());

    let children: Vec<String> = delegated_names(&top);
    tree.append("targets", top);
    for child in children {
        match descend(fetcher, &mut tree, &mut visited, &child) {
            Err(Error::TargetAlreadySeen { .. }) => continue,
            result => result?,
        }
    }
    Ok(tree)
}

fn descend(
    fetcher: &mut dyn TargetsFetcher,
    tree: &mut TargetTree,
    visited: &mut HashSet<String>,
    role: &str,
) -> Result<()> {
    if visited.contains(role) {
        return error::TargetAlreadySeenSnafu { role }.fail();
    }
    // refuse before fetching, so the role over the limit costs no I/O
    if visited.len() >= MAX_DELEGATION_COUNT {
        return error::TooManyDelegatesSnafu {
            max: MAX_DELEGATION_COUNT,
        }
        .fail();
    }
    visited.insert(role.to_string());
    trace!("visiting delegated role '{role}'");

    let envelope = fetcher.fetch(role)?;
    let children = delegated_names(&envelope);
    tree.append(role, envelope);
    for child in children {
        match descend(fetcher, tree, visited, &child) {
            // prevent cycles; the parent carries on with its siblings
            Err(Error::TargetAlreadySeen { .. }) => continue,
            result => result?,
        }
    }
    Ok(())
}

fn delegated_names(envelope: &Signed<Targets>) -> Vec<String> {
    envelope
        .signed
        .delegations
        .roles
        .iter()
        .map(|role| role.name.clone())
        .collect()
}
