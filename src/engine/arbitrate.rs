//! Classification of copy tool attempts
//!
//! The rule table is tied to the wording of the tool's error messages, so
//! it is data: the built-in table can be replaced by a JSON file with the
//! same shape.

use super::runner::{ExitKind, Outcome};
use crate::error::{GridXferError, IoResultExt, Result, TransferError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result of arbitrating one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Transfer done
    Success,
    /// Try the same pair again after the back-off
    Retry,
    /// Give up on this pair
    HardFail,
    /// The source replica does not exist
    MissingSource,
    /// The destination refuses connections
    ServerDown,
}

impl Verdict {
    /// Whether the attempt loop for this pair ends here
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retry)
    }

    /// Per-pair error for a final non-success verdict
    pub fn into_error(self) -> Option<TransferError> {
        match self {
            Self::Success => None,
            Self::Retry => Some(TransferError::Soft),
            Self::HardFail => Some(TransferError::Hard),
            Self::MissingSource => Some(TransferError::MissingSource),
            Self::ServerDown => Some(TransferError::ServerDown),
        }
    }
}

/// One row of the arbitration table; every present condition must hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Required exit code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Required prefix of the captured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Required substring of the captured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Classification when the rule matches
    pub verdict: Verdict,
}

impl Rule {
    fn new(exit_code: Option<i32>, prefix: Option<&str>, contains: Option<&str>, verdict: Verdict) -> Self {
        Self {
            exit_code,
            prefix: prefix.map(str::to_string),
            contains: contains.map(str::to_string),
            verdict,
        }
    }

    fn matches(&self, code: i32, output: &str) -> bool {
        self.exit_code.map_or(true, |want| want == code)
            && self
                .prefix
                .as_deref()
                .map_or(true, |p| output.trim_start().starts_with(p))
            && self.contains.as_deref().map_or(true, |s| output.contains(s))
    }
}

const SYSCALL_FAILED: &str = "error: a system call failed";
const SERVER_550: &str = "error: the server sent an error response: 550 550";

/// Known messages of the grid copy tool, most specific first
pub fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule::new(Some(1), Some(SYSCALL_FAILED), Some("o such file or directory"), Verdict::MissingSource),
        Rule::new(Some(1), Some(SERVER_550), Some("not a plain file"), Verdict::MissingSource),
        Rule::new(None, None, Some("timed out"), Verdict::Retry),
        Rule::new(
            None,
            Some("error: a system call failed (Connection refused)"),
            None,
            Verdict::ServerDown,
        ),
        Rule::new(None, None, Some("Error with GSI credential"), Verdict::HardFail),
        Rule::new(None, Some("ERROR: too many url strings specified"), None, Verdict::HardFail),
        Rule::new(None, Some(SYSCALL_FAILED), None, Verdict::HardFail),
        Rule::new(None, Some(SERVER_550), None, Verdict::HardFail),
    ]
}

/// Maps an attempt's outcome onto a verdict
#[derive(Debug, Clone)]
pub struct Arbiter {
    rules: Vec<Rule>,
    force_retry: bool,
}

impl Arbiter {
    /// Create an arbiter over an ordered rule table
    pub fn new(rules: Vec<Rule>, force_retry: bool) -> Self {
        Self { rules, force_retry }
    }

    /// Load a replacement rule table from a JSON array
    pub fn from_json_file(path: &Path, force_retry: bool) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let rules: Vec<Rule> = serde_json::from_str(&text)
            .map_err(|e| GridXferError::ArbitrationTable(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(rules, force_retry))
    }

    /// Table in use
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify one attempt
    pub fn judge(&self, outcome: &Outcome) -> Verdict {
        let code = match outcome.status {
            ExitKind::Signaled(_) => return Verdict::HardFail,
            ExitKind::Exited(code) => code,
        };
        match code {
            0 => Verdict::Success,
            126 | 127 => Verdict::HardFail,
            _ if self.force_retry => Verdict::Retry,
            _ => self
                .rules
                .iter()
                .find(|rule| rule.matches(code, &outcome.output))
                .map_or(Verdict::Retry, |rule| rule.verdict),
        }
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(builtin_rules(), false)
    }
}
