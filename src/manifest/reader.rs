//! Line-oriented transfer plan reader
//!
//! Two layouts are understood. Section mode groups candidates under a
//! logical file name:
//!
//! ```text
//! LFN [any|all|optional]
//!  source-uri
//!   destination-uri
//! ```
//!
//! Pair mode is the historical layout of alternating source and
//! destination lines. In both modes `#` starts a comment, and a line
//! starting with the configured base URI is rewritten to the base mount.

use crate::error::{GridXferError, Result};
use crate::model::{SectionPolicy, TransferSection};
use std::io::BufRead;

/// Pair-mode lines shorter than this carry no usable URI
const MIN_PAIR_LINE: usize = 10;

/// Manifest layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestMode {
    /// `LFN` headers followed by indented sources and destinations
    Sections,
    /// Alternating source and destination lines
    Pairs,
}

/// Rewrites the gatekeeper base URI to a local `file:` mount
#[derive(Debug, Clone, Default)]
pub struct UriRewrite {
    base_uri: String,
    base_mount: String,
}

impl UriRewrite {
    /// Create a rewrite rule; an empty base URI disables rewriting
    pub fn new(base_uri: impl Into<String>, base_mount: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            base_mount: base_mount.into(),
        }
    }

    /// Apply the rule to one URI (prefix match is case-insensitive)
    pub fn apply(&self, uri: &str) -> String {
        let n = self.base_uri.len();
        if n > 0
            && uri.len() >= n
            && uri.is_char_boundary(n)
            && uri[..n].eq_ignore_ascii_case(&self.base_uri)
        {
            format!("{}{}", self.base_mount, &uri[n..])
        } else {
            uri.to_string()
        }
    }
}

/// Streaming reader yielding one section at a time
pub struct ManifestReader<R> {
    input: R,
    mode: ManifestMode,
    rewrite: UriRewrite,
    lineno: usize,
    meaningful: usize,
    current: Option<(usize, TransferSection)>,
    pending_source: Option<String>,
    finished: bool,
}

impl<R: BufRead> ManifestReader<R> {
    /// Create a reader over `input`
    pub fn new(input: R, mode: ManifestMode, rewrite: UriRewrite) -> Self {
        Self {
            input,
            mode,
            rewrite,
            lineno: 0,
            meaningful: 0,
            current: None,
            pending_source: None,
            finished: false,
        }
    }

    /// Physical line number of the last line read
    pub fn line_number(&self) -> usize {
        self.lineno
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = self
                .input
                .read_line(&mut buf)
                .map_err(|e| GridXferError::manifest(self.lineno + 1, e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            self.lineno += 1;
            let line = strip_line(&buf);
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }

    fn close_section(&mut self) -> Option<Result<TransferSection>> {
        let (header_line, section) = self.current.take()?;
        Some(
            section
                .validate()
                .map(|_| section)
                .map_err(|e| GridXferError::manifest(header_line, e.to_string())),
        )
    }

    fn next_section(&mut self) -> Option<Result<TransferSection>> {
        loop {
            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.finished = true;
                    return self.close_section();
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            let mut chars = line.chars();
            let first = chars.next().unwrap_or(' ');
            let second = chars.next().unwrap_or(' ');

            if !first.is_whitespace() {
                let mut words = line.split_whitespace();
                let lfn = words.next().unwrap_or_default().to_string();
                let policy = words
                    .filter_map(SectionPolicy::from_keyword)
                    .last()
                    .unwrap_or_default();
                let previous = self.close_section();
                self.current = Some((self.lineno, TransferSection::new(lfn, policy)));
                if previous.is_some() {
                    return previous;
                }
                continue;
            }

            let lineno = self.lineno;
            let Some((_, section)) = self.current.as_mut() else {
                return Some(Err(GridXferError::manifest(
                    lineno,
                    "transfer file name outside of any section",
                )));
            };
            if !second.is_whitespace() {
                section.add_source(self.rewrite.apply(line.trim_start()));
            } else {
                section.add_destination(self.rewrite.apply(line.trim_start()));
            }
        }
    }

    fn next_pair(&mut self) -> Option<Result<TransferSection>> {
        loop {
            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.finished = true;
                    return self.pending_source.take().map(|src| {
                        Err(GridXferError::manifest(
                            self.lineno,
                            format!("source '{}' has no destination", src),
                        ))
                    });
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            if line.len() < MIN_PAIR_LINE {
                continue;
            }
            self.meaningful += 1;
            let uri = self.rewrite.apply(&line);

            if self.meaningful % 2 == 1 {
                self.pending_source = Some(uri);
            } else if let Some(source) = self.pending_source.take() {
                return Some(Ok(TransferSection::pair(source, uri)));
            }
        }
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<TransferSection>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.mode {
            ManifestMode::Sections => self.next_section(),
            ManifestMode::Pairs => self.next_pair(),
        }
    }
}

/// Drop comments and trailing whitespace
fn strip_line(raw: &str) -> &str {
    let line = match raw.find('#') {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    line.trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(text: &str, mode: ManifestMode, rewrite: UriRewrite) -> Vec<Result<TransferSection>> {
        ManifestReader::new(Cursor::new(text.to_string()), mode, rewrite).collect()
    }

    #[test]
    fn test_rewrite() {
        let rewrite = UriRewrite::new("gsiftp://gk.example.org/storage", "file:///storage");
        assert_eq!(
            rewrite.apply("GSIFTP://gk.example.org/storage/run1/f.dat"),
            "file:///storage/run1/f.dat"
        );
        assert_eq!(rewrite.apply("gsiftp://other/x"), "gsiftp://other/x");
        assert_eq!(UriRewrite::default().apply("gsiftp://a/b"), "gsiftp://a/b");
    }

    #[test]
    fn test_sections() {
        let text = "\
# a transfer plan
f.a all
 gsiftp://src1/f.a
 gsiftp://src2/f.a   # mirror
  gsiftp://dst1/f.a
  gsiftp://dst2/f.a

f.b optional
 gsiftp://src1/f.b
  file:///tmp/f.b
f.c
 gsiftp://src1/f.c
  gsiftp://dst1/f.c
";
        let sections: Vec<_> = read(text, ManifestMode::Sections, UriRewrite::default())
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].lfn, "f.a");
        assert_eq!(sections[0].policy, SectionPolicy::All);
        assert_eq!(sections[0].sources().len(), 2);
        assert_eq!(sections[0].sources()[1].uri, "gsiftp://src2/f.a");
        assert_eq!(sections[0].destinations().len(), 2);
        assert_eq!(sections[1].policy, SectionPolicy::Optional);
        assert_eq!(sections[2].policy, SectionPolicy::Any);
    }

    #[test]
    fn test_sections_rewrite_only_uris() {
        let text = "gsiftp://gk/st/lfn\n gsiftp://gk/st/a\n  gsiftp://far/b\n";
        let rewrite = UriRewrite::new("gsiftp://gk/st", "file:///st");
        let sections = read(text, ManifestMode::Sections, rewrite);
        let section = sections[0].as_ref().unwrap();
        assert_eq!(section.lfn, "gsiftp://gk/st/lfn");
        assert_eq!(section.sources()[0].uri, "file:///st/a");
        assert_eq!(section.destinations()[0].uri, "gsiftp://far/b");
    }

    #[test]
    fn test_sections_errors() {
        let orphan = read(" gsiftp://a/x\n", ManifestMode::Sections, UriRewrite::default());
        assert!(matches!(orphan[0], Err(GridXferError::Manifest { line: 1, .. })));

        let no_dst = read("lfn\n gsiftp://a/x\nnext\n gsiftp://a/y\n  gsiftp://b/y\n",
            ManifestMode::Sections, UriRewrite::default());
        assert_eq!(no_dst.len(), 2);
        assert!(matches!(no_dst[0], Err(GridXferError::Manifest { line: 1, .. })));
        assert!(no_dst[1].is_ok());
    }

    #[test]
    fn test_pairs() {
        let text = "\
gsiftp://gk/st/one.dat
gsiftp://remote/one.dat
short
gsiftp://remote/two.dat   # comment
file:///tmp/two.dat
";
        let rewrite = UriRewrite::new("gsiftp://gk/st", "file:///st");
        let sections: Vec<_> = read(text, ManifestMode::Pairs, rewrite)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].sources()[0].uri, "file:///st/one.dat");
        assert_eq!(sections[0].destinations()[0].uri, "gsiftp://remote/one.dat");
        assert_eq!(sections[1].lfn, "two.dat");
        assert!(sections[1].is_single_pair());
    }

    #[test]
    fn test_pairs_dangling_source() {
        let results = read("gsiftp://remote/one.dat\n", ManifestMode::Pairs, UriRewrite::default());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
