//! Version strings and known-bug work-arounds
//!
//! Versions are folded into a single number, `major * 1000 + minor`, so
//! that "3.20" compares above "3.3".

use super::capabilities::Capabilities;
use std::collections::BTreeMap;

/// Component name to folded version
pub type ComponentVersions = BTreeMap<String, u64>;

/// Fold a dotted version into `major * 1000 + minor`
pub fn parse_version(text: &str) -> Option<u64> {
    let text = text.trim();
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let mut parts = text[..end].split('.');
    let major: u64 = parts.next()?.parse().ok()?;
    let minor: u64 = match parts.next() {
        Some(m) if !m.is_empty() => m.parse().ok()?,
        _ => 0,
    };
    Some(major * 1000 + minor)
}

/// Version from `-version` output such as `globus-url-copy: 3.21`
pub fn parse_tool_version(output: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once(':')?;
        parse_version(rest)
    })
}

/// Component versions from `-versions` output, one `name: X.Y` per line
pub fn parse_component_versions(output: &str) -> ComponentVersions {
    output
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return None;
            }
            Some((name.to_string(), parse_version(rest)?))
        })
        .collect()
}

/// A known tool defect and the features to disable around it
#[derive(Debug, Clone, Copy)]
pub struct Workaround {
    /// Short description for the log
    pub name: &'static str,
    /// Applies only when the mask equals this value
    pub exact_mask: Option<Capabilities>,
    /// Applies only when all of these are present
    pub requires: Capabilities,
    /// Applies only when this component reports a version in `(0, below)`
    pub component_below: Option<(&'static str, u64)>,
    /// Features removed when the rule applies
    pub clear: Capabilities,
}

impl Workaround {
    fn applies(&self, caps: Capabilities, components: &ComponentVersions) -> bool {
        if let Some(mask) = self.exact_mask {
            if caps != mask {
                return false;
            }
        }
        if !caps.contains(self.requires) {
            return false;
        }
        match self.component_below {
            Some((component, below)) => components
                .get(component)
                .is_some_and(|&v| v > 0 && v < below),
            None => true,
        }
    }
}

/// Rules evaluated in order against the evolving mask
pub const WORKAROUNDS: &[Workaround] = &[
    Workaround {
        name: "fast mode unreliable on 3.2 tools",
        exact_mask: Some(Capabilities::GT32_FEATURES),
        requires: Capabilities::empty(),
        component_below: None,
        clear: Capabilities::FAST,
    },
    Workaround {
        name: "restart plugin broken before 3.3",
        exact_mask: Some(Capabilities::GT40_FEATURES),
        requires: Capabilities::empty(),
        component_below: Some(("globus_ftp_client_restart_plugin", 3003)),
        clear: Capabilities::RESTART_ALL,
    },
    Workaround {
        name: "create-dest broken before gass-copy 3.20",
        exact_mask: None,
        requires: Capabilities::CREATE_DIR,
        component_below: Some(("globus_gass_copy", 3020)),
        clear: Capabilities::CREATE_DIR,
    },
];

/// Apply every matching work-around; returns the adjusted mask
pub fn apply_workarounds(mut caps: Capabilities, components: &ComponentVersions) -> Capabilities {
    for rule in WORKAROUNDS {
        if rule.applies(caps, components) {
            tracing::debug!("work-around '{}': clearing {}", rule.name, rule.clear);
            caps.remove(rule.clear);
        }
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3.21"), Some(3021));
        assert_eq!(parse_version(" 4.0 (1184787656-1)"), Some(4000));
        assert_eq!(parse_version("7"), Some(7000));
        assert_eq!(parse_version("beta"), None);
    }

    #[test]
    fn test_tool_version() {
        assert_eq!(parse_tool_version("globus-url-copy: 3.21\n"), Some(3021));
        assert_eq!(parse_tool_version("no version here"), None);
    }

    #[test]
    fn test_component_versions() {
        let out = "\
globus_gass_copy: 3.19 (1133455-0)
globus_ftp_client_restart_plugin: 3.2
some banner line: ignore
globus_common: 5.0
";
        let comps = parse_component_versions(out);
        assert_eq!(comps.get("globus_gass_copy"), Some(&3019));
        assert_eq!(comps.get("globus_ftp_client_restart_plugin"), Some(&3002));
        assert_eq!(comps.len(), 3);
    }

    #[test]
    fn test_fast_cleared_on_gt32() {
        let caps = apply_workarounds(Capabilities::GT32_FEATURES, &ComponentVersions::new());
        assert!(!caps.contains(Capabilities::FAST));
        assert_eq!(caps.bits(), 0x0fdf);
    }

    #[test]
    fn test_restart_cleared_on_old_plugin() {
        let mut comps = ComponentVersions::new();
        comps.insert("globus_ftp_client_restart_plugin".into(), 3002);
        let caps = apply_workarounds(Capabilities::GT40_FEATURES, &comps);
        assert!(!caps.contains(Capabilities::RESTART));
        assert!(!caps.contains(Capabilities::RESTART_TIMEOUT));
        assert!(caps.contains(Capabilities::FAST));

        comps.insert("globus_ftp_client_restart_plugin".into(), 3003);
        let caps = apply_workarounds(Capabilities::GT40_FEATURES, &comps);
        assert!(caps.contains(Capabilities::RESTART_ALL));
    }

    #[test]
    fn test_create_dir_needs_recent_gass_copy() {
        let caps = Capabilities::CREATE_DIR | Capabilities::FROM_FILE;
        let mut comps = ComponentVersions::new();
        comps.insert("globus_gass_copy".into(), 3019);
        assert!(!apply_workarounds(caps, &comps).contains(Capabilities::CREATE_DIR));

        // an unknown component version is not a reason to disable
        assert!(apply_workarounds(caps, &ComponentVersions::new()).contains(Capabilities::CREATE_DIR));
    }
}
