//! Grid proxy lifetime check

use super::probe::locate;
use crate::error::{GridXferError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// File name of the proxy inspection program
pub const PROXY_INFO_NAME: &str = "grid-proxy-info";

/// Seconds of lifetime left on the current proxy
pub fn proxy_time_left(program: &Path) -> Result<i64> {
    let failed = |message: String| GridXferError::ProxyInfoFailed {
        path: program.to_path_buf(),
        message,
    };

    let output = Command::new(program)
        .arg("-timeleft")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| failed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!("{} {}", output.status, stderr.trim())));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .split_whitespace()
        .next()
        .and_then(|word| word.parse::<i64>().ok())
        .ok_or_else(|| failed(format!("unexpected output '{}'", stdout.trim())))
}

/// Require more than `min_lifetime` seconds on the proxy
///
/// Returns the remaining lifetime, or `None` when no proxy-info program
/// could be found and the check was skipped.
pub fn check_proxy(program: Option<&Path>, min_lifetime: i64) -> Result<Option<i64>> {
    let program: PathBuf = match program {
        Some(path) => path.to_path_buf(),
        None => match locate(PROXY_INFO_NAME) {
            Some(path) => path,
            None => {
                warn!("unable to find {}, skipping proxy check", PROXY_INFO_NAME);
                return Ok(None);
            }
        },
    };

    let remaining = proxy_time_left(&program)?;
    debug!("{} reports {} s left", program.display(), remaining);
    if remaining <= min_lifetime {
        return Err(GridXferError::CredentialExpired {
            remaining,
            required: min_lifetime,
        });
    }
    Ok(Some(remaining))
}
