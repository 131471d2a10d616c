//! Argument vectors for the copy tool

use crate::model::Tunables;
use crate::probe::Capabilities;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Everything constant across invocations of one run
#[derive(Debug, Clone)]
pub struct ToolCommand {
    tool: PathBuf,
    extra: Vec<String>,
    caps: Capabilities,
    passive: bool,
    quiet: i32,
}

impl ToolCommand {
    /// Create a builder for `tool`
    pub fn new(
        tool: impl Into<PathBuf>,
        extra: Vec<String>,
        caps: Capabilities,
        passive: bool,
        quiet: i32,
    ) -> Self {
        Self {
            tool: tool.into(),
            extra,
            caps,
            passive,
            quiet,
        }
    }

    /// Tool binary
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Confirmed tool features
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn base(&self, tunables: &Tunables, attempt: u32) -> Vec<OsString> {
        let mut argv: Vec<OsString> = Vec::with_capacity(self.extra.len() + 12);
        argv.push(self.tool.clone().into_os_string());
        argv.extend(self.extra.iter().map(OsString::from));

        if tunables.tuned_attempt(attempt) {
            if tunables.tcp_buffer_size > 1024 && self.caps.contains(Capabilities::TCP_BS) {
                argv.push("-tcp-bs".into());
                argv.push(tunables.tcp_buffer_size.to_string().into());
            }
            if self.passive
                && tunables.streams > 1
                && tunables.streams < 256
                && self.caps.contains(Capabilities::PARALLEL)
            {
                argv.push("-p".into());
                argv.push(tunables.streams.to_string().into());
            }
        }

        if self.quiet < 0 && self.caps.contains(Capabilities::PERF_DATA) {
            argv.push("-vb".into());
        }
        if self.quiet < -1 && self.caps.contains(Capabilities::DEBUG) {
            argv.push("-dbg".into());
        }
        if self.caps.contains(Capabilities::CREATE_DIR) {
            argv.push("-cd".into());
        }
        argv
    }

    /// Per-pair invocation
    pub fn pair(&self, src: &str, dst: &str, tunables: &Tunables, attempt: u32) -> Vec<OsString> {
        let mut argv = self.base(tunables, attempt);
        argv.push(src.into());
        argv.push(dst.into());
        argv
    }

    /// From-file invocation over a pair list
    pub fn batch(&self, list: &Path, tunables: &Tunables) -> Vec<OsString> {
        let mut argv = self.base(tunables, 1);
        if self.passive && self.caps.contains(Capabilities::FAST) {
            argv.push("-fast".into());
        }
        if self.caps.contains(Capabilities::CONTINUE) {
            argv.push("-c".into());
        }
        if self.caps.contains(Capabilities::RESTART) {
            argv.push("-rst".into());
        }
        argv.push("-f".into());
        argv.push(list.as_os_str().to_os_string());
        argv
    }
}

/// Render an argument vector for the log
pub fn display_argv(argv: &[OsString]) -> String {
    argv.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn strings(argv: &[OsString]) -> Vec<String> {
        argv.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn tunables(bufsize: u32, streams: u32, retries: u32) -> Tunables {
        Tunables::new(bufsize, streams, retries, Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_pair_with_tuning() {
        let cmd = ToolCommand::new(
            "/opt/guc",
            vec!["-nodcau".into()],
            Capabilities::GT40_FEATURES,
            true,
            0,
        );
        let argv = cmd.pair("gsiftp://a/f", "gsiftp://b/f", &tunables(262144, 4, 3), 1);
        assert_eq!(
            strings(&argv),
            vec!["/opt/guc", "-nodcau", "-tcp-bs", "262144", "-p", "4", "-cd", "gsiftp://a/f", "gsiftp://b/f"]
        );

        // last of several attempts drops the tuning
        let argv = cmd.pair("gsiftp://a/f", "gsiftp://b/f", &tunables(262144, 4, 3), 3);
        assert_eq!(strings(&argv), vec!["/opt/guc", "-nodcau", "-cd", "gsiftp://a/f", "gsiftp://b/f"]);

        // a single attempt always keeps it
        let argv = cmd.pair("s", "d", &tunables(262144, 1, 1), 1);
        assert_eq!(strings(&argv), vec!["/opt/guc", "-nodcau", "-tcp-bs", "262144", "-cd", "s", "d"]);
    }

    #[test]
    fn test_gating() {
        let caps = Capabilities::PERF_DATA | Capabilities::DEBUG;
        let quiet = ToolCommand::new("guc", vec![], caps, false, 0);
        let argv = quiet.pair("s", "d", &tunables(1024, 300, 2), 1);
        assert_eq!(strings(&argv), vec!["guc", "s", "d"]);

        let verbose = ToolCommand::new("guc", vec![], caps, false, -1);
        assert_eq!(strings(&verbose.pair("s", "d", &tunables(0, 1, 1), 1)), vec!["guc", "-vb", "s", "d"]);

        let debug = ToolCommand::new("guc", vec![], caps, false, -2);
        assert_eq!(
            strings(&debug.pair("s", "d", &tunables(0, 1, 1), 1)),
            vec!["guc", "-vb", "-dbg", "s", "d"]
        );

        // streams need passive mode
        let active = ToolCommand::new("guc", vec![], Capabilities::PARALLEL, false, 0);
        assert_eq!(strings(&active.pair("s", "d", &tunables(0, 4, 1), 1)), vec!["guc", "s", "d"]);
    }

    #[test]
    fn test_batch() {
        let cmd = ToolCommand::new("guc", vec![], Capabilities::GT40_FEATURES, true, 0);
        let argv = cmd.batch(Path::new("/tmp/list"), &tunables(0, 1, 3));
        assert_eq!(strings(&argv), vec!["guc", "-cd", "-fast", "-c", "-rst", "-f", "/tmp/list"]);

        let no_passive = ToolCommand::new("guc", vec![], Capabilities::FROM_FILE | Capabilities::FAST, false, 0);
        let argv = no_passive.batch(Path::new("/tmp/list"), &tunables(0, 1, 3));
        assert_eq!(strings(&argv), vec!["guc", "-f", "/tmp/list"]);
    }
}
