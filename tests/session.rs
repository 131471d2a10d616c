//! End-to-end runs against a scripted copy tool

use gridxfer::config::TransferConfig;
use gridxfer::engine::{Arbiter, Engine, ToolCommand};
use gridxfer::manifest::{ManifestMode, ManifestReader, UriRewrite};
use gridxfer::probe::{select_tool, Capabilities};
use gridxfer::session::{RunSummary, TransferSession};
use std::fs;
use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A stand-in for the copy tool that logs every transfer invocation
fn fake_tool(dir: &Path) -> (PathBuf, PathBuf) {
    let log = dir.join("calls.log");
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  -help) echo " -tcp-bs <n> -p <n> -vb -dbg -c -f <file> -rst -cd"; exit 0 ;;
  -version) echo "globus-url-copy: 4.14"; exit 0 ;;
  -versions) echo "globus_gass_copy: 3.20"; exit 0 ;;
esac
echo "$*" >> {log}
case "$*" in
  *missing*) echo "error: a system call failed (No such file or directory)"; exit 1 ;;
  *down*) echo "error: a system call failed (Connection refused)"; exit 1 ;;
esac
exit 0
"#,
        log = log.display()
    );
    let tool = dir.join("globus-url-copy");
    fs::write(&tool, script).unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
    (tool, log)
}

fn run(tool: &Path, config: &TransferConfig, manifest: &str, mode: ManifestMode) -> RunSummary {
    let profile = select_tool(Some(tool)).unwrap();
    let command = ToolCommand::new(
        &profile.path,
        config.tool_args.clone(),
        profile.capabilities,
        config.passive,
        config.quiet,
    );
    let engine = Arc::new(Engine::new(command, Arbiter::default()));
    let mut session = TransferSession::new(config, engine);
    let reader = ManifestReader::new(Cursor::new(manifest.to_string()), mode, UriRewrite::default());
    for section in reader {
        session.submit(section.unwrap()).unwrap();
    }
    session.finish().unwrap()
}

fn calls(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_probe_sees_scripted_options() {
    let dir = TempDir::new().unwrap();
    let (tool, _) = fake_tool(dir.path());
    let profile = select_tool(Some(&tool)).unwrap();
    assert!(profile.capabilities.contains(Capabilities::FROM_FILE));
    assert!(profile.capabilities.contains(Capabilities::CREATE_DIR));
    assert_eq!(profile.version, Some(4014));
    assert!(profile.supports_batching());
}

#[test]
fn test_sections_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (tool, log) = fake_tool(dir.path());
    let local = dir.path().join("local.dat");
    fs::write(&local, "data").unwrap();
    let link = dir.path().join("out/linked.dat");

    let manifest = format!(
        "\
a any
 gsiftp://s/a
  gsiftp://d/a
b optional
 gsiftp://missing/b
  gsiftp://d/b
c all
 gsiftp://s1/c
 gsiftp://s2/c
  gsiftp://d/c
  gsiftp://down/c
d
 file://{}
  file://{}
",
        local.display(),
        link.display()
    );
    let config = TransferConfig {
        parallel: 2,
        retries: 2,
        batching: false,
        ..Default::default()
    };

    let summary = run(&tool, &config, &manifest, ManifestMode::Sections);
    assert_eq!(summary.stats.requests, 4);
    assert_eq!(summary.stats.successes, 3);
    assert_eq!(summary.stats.failures, 1);
    assert_eq!(summary.exit_code(), 42);
    assert_eq!(summary.failed_sections.len(), 1);
    assert_eq!(summary.failed_sections[0].lfn, "c");
    assert_eq!(summary.failed_sections[0].destinations_done, 1);

    assert_eq!(fs::read_link(&link).unwrap(), local);
    let calls = calls(&log);
    assert_eq!(calls.iter().filter(|c| c.contains("gsiftp://down/c")).count(), 1);
    assert_eq!(calls.iter().filter(|c| c.contains("gsiftp://d/c")).count(), 1);
    assert!(calls.iter().all(|c| c.contains("-cd")));
}

#[test]
fn test_pairs_are_batched() {
    let dir = TempDir::new().unwrap();
    let (tool, log) = fake_tool(dir.path());
    let mut manifest = String::new();
    for i in 0..6 {
        manifest.push_str(&format!("gsiftp://src.example.org/{}.dat\n", i));
        manifest.push_str(&format!("gsiftp://dst.example.org/{}.dat\n", i));
    }
    let config = TransferConfig {
        parallel: 2,
        ..Default::default()
    };

    let summary = run(&tool, &config, &manifest, ManifestMode::Pairs);
    assert!(summary.all_succeeded());
    assert_eq!(summary.stats.requests, 2);

    let calls = calls(&log);
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.contains("-f ") && c.contains("-rst") && c.contains("-c ")));
}
