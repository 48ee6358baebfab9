// src/version/mod.rs

//! Epoch:version-release parsing and ordering
//!
//! Package versions use the `[epoch:]version[-release]` format. Comparison
//! is epoch first, then version, then release. Versions that happen to be
//! semver-compliant compare through `semver`; everything else falls back to
//! a segment walk (numeric segments compare numerically, alphabetic ones
//! lexically, numbers sort after letters).

use crate::error::{Error, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A parsed epoch:version-release triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evr {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl Evr {
    /// Parse an `[epoch:]version[-release]` string
    ///
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1:2.3.4-5.el8" → epoch=1, version="2.3.4", release=Some("5.el8")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = match s.find(':') {
            Some(pos) => (&s[..pos], &s[pos + 1..]),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str
                .parse::<u64>()
                .map_err(|e| Error::Version(format!("invalid epoch in '{}': {}", s, e)))?
        };

        let (version, release) = match rest.find('-') {
            Some(pos) => (rest[..pos].to_string(), Some(rest[pos + 1..].to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::Version(format!("empty version component in '{}'", s)));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two versions
    pub fn compare(&self, other: &Evr) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match segment_cmp(&self.version, &other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match (&self.release, &other.release) {
            (Some(a), Some(b)) => segment_cmp(a, b),
            // A missing release compares equal to anything: "1.0" both
            // satisfies and is satisfied by "1.0-5".
            _ => Ordering::Equal,
        }
    }
}

/// Compare two version strings segment by segment
///
/// Semver-parseable strings take the fast path. Otherwise the strings are
/// split into maximal runs of digits or letters; digit runs compare as
/// numbers (ignoring leading zeroes), letter runs compare bytewise, and a
/// digit run sorts after a letter run.
fn segment_cmp(a: &str, b: &str) -> Ordering {
    if let (Ok(va), Ok(vb)) = (Version::parse(a), Version::parse(b)) {
        return va.cmp(&vb);
    }

    let mut sa = segments(a);
    let mut sb = segments(b);
    loop {
        match (sa.next(), sb.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.numeric, y.numeric) {
                    (true, true) => {
                        let xs = x.text.trim_start_matches('0');
                        let ys = y.text.trim_start_matches('0');
                        xs.len().cmp(&ys.len()).then_with(|| xs.cmp(ys))
                    }
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => x.text.cmp(y.text),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

struct Segment<'a> {
    text: &'a str,
    numeric: bool,
}

fn segments(s: &str) -> impl Iterator<Item = Segment<'_>> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() && !bytes[pos].is_ascii_alphanumeric() {
            pos += 1;
        }
        if pos >= bytes.len() {
            return None;
        }
        let start = pos;
        let numeric = bytes[pos].is_ascii_digit();
        while pos < bytes.len()
            && (if numeric {
                bytes[pos].is_ascii_digit()
            } else {
                bytes[pos].is_ascii_alphabetic()
            })
        {
            pos += 1;
        }
        Some(Segment {
            text: &s[start..pos],
            numeric,
        })
    })
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
