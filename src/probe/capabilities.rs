//! Copy tool capability bitmask
//!
//! Each bit stands for one command-line feature the installed tool was
//! seen to advertise in its help text.

use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of confirmed tool features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Capabilities(u32);

impl Capabilities {
    /// `-tcp-bs`: TCP buffer size
    pub const TCP_BS: Self = Self(0x0001);
    /// `-p`: parallel data streams
    pub const PARALLEL: Self = Self(0x0002);
    /// `-vb`: performance reporting
    pub const PERF_DATA: Self = Self(0x0004);
    /// `-dbg`: debug output
    pub const DEBUG: Self = Self(0x0008);
    /// `-c`: continue on error
    pub const CONTINUE: Self = Self(0x0010);
    /// `-fast`: data channel reuse (passive mode)
    pub const FAST: Self = Self(0x0020);
    /// `-f`: read pairs from a file
    pub const FROM_FILE: Self = Self(0x0040);
    /// `-r`: recursive copies
    pub const RECURSIVE: Self = Self(0x0080);
    /// `-rst`: restart failed transfers
    pub const RESTART: Self = Self(0x0100);
    /// `-rst-interval`
    pub const RESTART_INTERVAL: Self = Self(0x0200);
    /// `-rst-timeout`
    pub const RESTART_TIMEOUT: Self = Self(0x0400);
    /// `-stripe`: striped transfers
    pub const STRIPE: Self = Self(0x0800);
    /// `-cd`: create destination directories
    pub const CREATE_DIR: Self = Self(0x1000);
    /// `-nodcau`: no data channel authentication
    pub const NO_DCAU: Self = Self(0x2000);
    /// `-dcpriv`: private data channel
    pub const DATA_PRIVATE: Self = Self(0x4000);

    /// Every option of the 3.2-era tool
    pub const GT32_FEATURES: Self = Self(0x0fff);
    /// Every option of the 4.0-era tool
    pub const GT40_FEATURES: Self = Self(0x7fff);
    /// Restart family
    pub const RESTART_ALL: Self =
        Self(Self::RESTART.0 | Self::RESTART_INTERVAL.0 | Self::RESTART_TIMEOUT.0);

    /// Empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True if no feature was recognized
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Whether from-file batching can be used; older tools also need restart
    pub fn supports_batching(&self) -> bool {
        if self.0 <= Self::GT32_FEATURES.0 {
            self.contains(Self::FROM_FILE) && self.contains(Self::RESTART)
        } else {
            self.contains(Self::FROM_FILE)
        }
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Serialize for Capabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Option names recognized in help output
pub const OPTION_TABLE: &[(&str, Capabilities)] = &[
    ("tcp-bs", Capabilities::TCP_BS),
    ("tcp-buffer-size", Capabilities::TCP_BS),
    ("p", Capabilities::PARALLEL),
    ("parallel", Capabilities::PARALLEL),
    ("vb", Capabilities::PERF_DATA),
    ("dbg", Capabilities::DEBUG),
    ("c", Capabilities::CONTINUE),
    ("continue-on-error", Capabilities::CONTINUE),
    ("fast", Capabilities::FAST),
    ("f", Capabilities::FROM_FILE),
    ("r", Capabilities::RECURSIVE),
    ("rst", Capabilities::RESTART),
    ("restart", Capabilities::RESTART),
    ("rst-interval", Capabilities::RESTART_INTERVAL),
    ("rst-timeout", Capabilities::RESTART_TIMEOUT),
    ("stripe", Capabilities::STRIPE),
    ("cd", Capabilities::CREATE_DIR),
    ("create-dest", Capabilities::CREATE_DIR),
    ("nodcau", Capabilities::NO_DCAU),
    ("dcpriv", Capabilities::DATA_PRIVATE),
];

/// Option names found in help text, without their leading hyphens
pub fn option_tokens(help: &str) -> impl Iterator<Item = &str> {
    help.split(|c: char| c.is_whitespace() || c == '\0')
        .filter(|word| word.starts_with('-'))
        .map(|word| {
            word.trim_start_matches('-')
                .trim_end_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        })
        .filter(|name| !name.is_empty())
}

/// Map help text onto the capability bitmask
pub fn parse_help(help: &str) -> Capabilities {
    let mut caps = Capabilities::empty();
    for token in option_tokens(help) {
        if let Some((_, bit)) = OPTION_TABLE.iter().find(|(name, _)| *name == token) {
            caps.insert(*bit);
        }
    }
    caps
}
