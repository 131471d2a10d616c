//! Transfer sections
//!
//! A section binds one logical file name to its candidate replicas and the
//! policy that reconciles outcomes across (source, destination) pairs.

use crate::error::{GridXferError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How success across several destinations is reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionPolicy {
    /// One successful pair completes the section
    #[default]
    Any,
    /// Every destination must receive the file
    All,
    /// Like `Any`, but a section whose sources are all missing still succeeds
    Optional,
}

impl SectionPolicy {
    /// Parse a manifest header keyword (case-insensitive)
    pub fn from_keyword(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("any") {
            Some(Self::Any)
        } else if word.eq_ignore_ascii_case("all") {
            Some(Self::All)
        } else if word.eq_ignore_ascii_case("optional") {
            Some(Self::Optional)
        } else {
            None
        }
    }
}

impl fmt::Display for SectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::All => "all",
            Self::Optional => "optional",
        };
        f.write_str(name)
    }
}

/// A candidate source replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Transfer file name (protocol-bearing URI)
    pub uri: String,
    /// Set once the tool reported this source as missing
    pub missing: bool,
}

/// A candidate destination with its runtime flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Transfer file name (protocol-bearing URI)
    pub uri: String,
    /// A transfer to this destination succeeded
    pub done: bool,
    /// The destination server refused connections; never retried
    pub unreachable: bool,
}

impl Destination {
    /// Whether this destination should be attempted under `policy`
    pub fn is_eligible(&self, policy: SectionPolicy) -> bool {
        if self.unreachable {
            return false;
        }
        !(policy == SectionPolicy::All && self.done)
    }
}

/// Candidate sources and destinations for one logical file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSection {
    /// Logical file name
    pub lfn: String,
    /// Reconciliation policy
    pub policy: SectionPolicy,
    sources: Vec<Source>,
    destinations: Vec<Destination>,
}

impl TransferSection {
    /// Create an empty section
    pub fn new(lfn: impl Into<String>, policy: SectionPolicy) -> Self {
        Self {
            lfn: lfn.into(),
            policy,
            sources: Vec::new(),
            destinations: Vec::new(),
        }
    }

    /// Build a single-pair section, as produced by the pair-mode manifest
    pub fn pair(source: impl Into<String>, destination: impl Into<String>) -> Self {
        let destination = destination.into();
        let lfn = basename(&destination).to_string();
        let mut section = Self::new(lfn, SectionPolicy::Any);
        section.add_source(source);
        section.add_destination(destination);
        section
    }

    /// Append a candidate source
    pub fn add_source(&mut self, uri: impl Into<String>) {
        self.sources.push(Source {
            uri: uri.into(),
            missing: false,
        });
    }

    /// Append a candidate destination
    pub fn add_destination(&mut self, uri: impl Into<String>) {
        self.destinations.push(Destination {
            uri: uri.into(),
            done: false,
            unreachable: false,
        });
    }

    /// Candidate sources in manifest order
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Candidate destinations in manifest order
    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub(crate) fn source_mut(&mut self, index: usize) -> &mut Source {
        &mut self.sources[index]
    }

    pub(crate) fn destination_mut(&mut self, index: usize) -> &mut Destination {
        &mut self.destinations[index]
    }

    /// Reject sections that can never transfer anything
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(GridXferError::config(format!(
                "section '{}' has no source",
                self.lfn
            )));
        }
        if self.destinations.is_empty() {
            return Err(GridXferError::config(format!(
                "section '{}' has no destination",
                self.lfn
            )));
        }
        Ok(())
    }

    /// True for one source and one destination under the `Any` policy
    pub fn is_single_pair(&self) -> bool {
        self.policy == SectionPolicy::Any
            && self.sources.len() == 1
            && self.destinations.len() == 1
    }

    /// Number of destinations flagged done
    pub fn done_count(&self) -> usize {
        self.destinations.iter().filter(|d| d.done).count()
    }

    /// True if every destination is flagged done
    pub fn all_done(&self) -> bool {
        self.destinations.iter().all(|d| d.done)
    }

    /// True if every source has been reported missing
    pub fn all_sources_missing(&self) -> bool {
        self.sources.iter().all(|s| s.missing)
    }
}

/// Last path component of a URI, used in log lines
pub fn basename(uri: &str) -> &str {
    match uri.rfind('/') {
        Some(pos) => &uri[pos + 1..],
        None => uri,
    }
}
