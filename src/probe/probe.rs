//! Tool discovery and capability probing
//!
//! The copy tool is asked for `-help`, `-version` and `-versions`. The
//! help text yields the option mask, the version lists feed the
//! work-around table. Results are memoized per tool path for the life
//! of the process.

use super::capabilities::{parse_help, Capabilities};
use super::versions::{apply_workarounds, parse_component_versions, parse_tool_version, ComponentVersions};
use crate::error::{GridXferError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info};

/// File name of the copy tool
pub const TOOL_NAME: &str = "globus-url-copy";

/// Installation root consulted before `PATH`
pub const LOCATION_ENV: &str = "GLOBUS_LOCATION";

/// What the probe learned about one tool binary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolProfile {
    /// Probed binary
    pub path: PathBuf,
    /// Features after work-arounds
    pub capabilities: Capabilities,
    /// Folded tool version, if reported
    pub version: Option<u64>,
    /// Folded component versions
    pub components: ComponentVersions,
}

impl ToolProfile {
    /// A tool is usable if at least one option was recognized
    pub fn is_usable(&self) -> bool {
        !self.capabilities.is_empty()
    }

    /// Whether from-file batching is available
    pub fn supports_batching(&self) -> bool {
        self.capabilities.supports_batching()
    }

    /// More recognized options first, then the newer version
    fn rank(&self) -> (u32, u64) {
        (self.capabilities.bits().count_ones(), self.version.unwrap_or(0))
    }
}

fn cache() -> &'static Mutex<HashMap<PathBuf, ToolProfile>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, ToolProfile>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Probe `path`, reusing an earlier result for the same path
pub fn probe_tool(path: &Path) -> ToolProfile {
    if let Some(hit) = cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(path)
    {
        return hit.clone();
    }

    let profile = probe_uncached(path);
    cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(path.to_path_buf(), profile.clone());
    profile
}

fn probe_uncached(path: &Path) -> ToolProfile {
    let raw = run_capture(path, "-help")
        .map(|help| parse_help(&help))
        .unwrap_or_default();
    let version = run_capture(path, "-version").and_then(|out| parse_tool_version(&out));
    let components = if raw.is_empty() {
        ComponentVersions::new()
    } else {
        run_capture(path, "-versions")
            .map(|out| parse_component_versions(&out))
            .unwrap_or_default()
    };
    let capabilities = apply_workarounds(raw, &components);

    debug!(
        "probed {}: options {} (raw {}), version {:?}",
        path.display(),
        capabilities,
        raw,
        version
    );
    ToolProfile {
        path: path.to_path_buf(),
        capabilities,
        version,
        components,
    }
}

/// Run `tool arg` and return stdout followed by stderr
fn run_capture(tool: &Path, arg: &str) -> Option<String> {
    match Command::new(tool)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
    {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push('\n');
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Some(text)
        }
        Err(e) => {
            debug!("unable to run {} {}: {}", tool.display(), arg, e);
            None
        }
    }
}

/// Regular file with at least one execute bit
pub fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Search a `PATH`-style list for an executable `name`
pub fn find_in_path(name: &str, search: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// `$GLOBUS_LOCATION/bin/<name>`, else the first match on `PATH`
pub fn locate(name: &str) -> Option<PathBuf> {
    if let Some(root) = std::env::var_os(LOCATION_ENV) {
        let candidate = Path::new(&root).join("bin").join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    std::env::var_os("PATH").and_then(|search| find_in_path(name, &search))
}

/// Pick the copy tool for this run
///
/// An explicit path must probe usable. Otherwise the installed tool and
/// a copy next to our own executable are both probed and the richer one
/// wins, ties going to the higher version.
pub fn select_tool(explicit: Option<&Path>) -> Result<ToolProfile> {
    if let Some(path) = explicit {
        let profile = probe_tool(path);
        if !profile.is_usable() {
            return Err(GridXferError::tool(
                path,
                "no recognizable options in help output",
            ));
        }
        return Ok(profile);
    }

    let mut candidates: Vec<PathBuf> = locate(TOOL_NAME).into_iter().collect();
    if let Some(sibling) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(TOOL_NAME)))
    {
        if is_executable(&sibling) && !candidates.contains(&sibling) {
            candidates.push(sibling);
        }
    }

    let best = best_profile(candidates.iter().map(|path| probe_tool(path)))
        .ok_or_else(|| GridXferError::tool(TOOL_NAME, "no usable copy tool found"))?;
    info!(
        "using {} (options {}, version {:?})",
        best.path.display(),
        best.capabilities,
        best.version
    );
    Ok(best)
}

fn best_profile(profiles: impl Iterator<Item = ToolProfile>) -> Option<ToolProfile> {
    profiles
        .filter(ToolProfile::is_usable)
        .fold(None, |best: Option<ToolProfile>, next| match best {
            Some(current) if current.rank() >= next.rank() => Some(current),
            _ => Some(next),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_script;
    use tempfile::TempDir;

    const FAKE_GT40: &str = r#"
case "$1" in
  -help) echo " -vb -dbg -c -f <file> -r -rst -rst-interval -rst-timeout -stripe -cd"
         echo " -tcp-bs <size> -p <n> -fast -nodcau -dcpriv" ;;
  -version) echo "globus-url-copy: 4.14" ;;
  -versions) echo "globus_gass_copy: 3.19"
             echo "globus_ftp_client_restart_plugin: 3.3" ;;
esac
"#;

    #[test]
    fn test_probe_fake_tool() {
        let dir = TempDir::new().unwrap();
        let tool = write_script(dir.path(), "guc", FAKE_GT40);

        let profile = probe_tool(&tool);
        assert_eq!(profile.version, Some(4014));
        assert!(profile.supports_batching());
        assert!(profile.capabilities.contains(Capabilities::RESTART_ALL));
        // old gass copy disables create-dest
        assert!(!profile.capabilities.contains(Capabilities::CREATE_DIR));

        // second call is served from the cache even after the tool is gone
        std::fs::remove_file(&tool).unwrap();
        assert_eq!(probe_tool(&tool), profile);
    }

    #[test]
    fn test_select_explicit_unusable() {
        let dir = TempDir::new().unwrap();
        let tool = write_script(dir.path(), "broken", "echo usage: nothing here\n");
        let err = select_tool(Some(&tool)).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let missing = dir.path().join("absent");
        assert!(select_tool(Some(&missing)).is_err());
    }

    #[test]
    fn test_find_in_path() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "mytool", "exit 0\n");
        std::fs::write(dir.path().join("plain"), "not executable").unwrap();

        let search = std::env::join_paths([Path::new("/nonexistent"), dir.path()]).unwrap();
        assert_eq!(
            find_in_path("mytool", &search),
            Some(dir.path().join("mytool"))
        );
        assert_eq!(find_in_path("plain", &search), None);
    }

    #[test]
    fn test_best_profile_prefers_richer_then_newer() {
        let profile = |bits: u32, version: u64| ToolProfile {
            path: PathBuf::from(format!("/t/{}-{}", bits, version)),
            capabilities: Capabilities::from_bits(bits),
            version: Some(version),
            components: ComponentVersions::new(),
        };
        let best = best_profile(vec![profile(0x0fff, 3021), profile(0x7fff, 4000)].into_iter());
        assert_eq!(best.unwrap().capabilities.bits(), 0x7fff);

        let best = best_profile(vec![profile(0x0fff, 3021), profile(0x0fff, 3019)].into_iter());
        assert_eq!(best.unwrap().version, Some(3021));

        // a single high bit is not richer than the full 3.2 set
        let best = best_profile(vec![profile(0x0fff, 3021), profile(0x1000, 5000)].into_iter());
        assert_eq!(best.unwrap().capabilities.bits(), 0x0fff);

        assert!(best_profile(vec![profile(0, 5000)].into_iter()).is_none());
    }
}
