// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Tasmota OTA.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Version parsing and comparison module
//!
//! Tasmota reports its firmware as e.g. `14.3.0(tasmota)` or, on very old builds,
//! `6.4.1.18(sonoff)`. Only the leading dotted-numeric run is meaningful for
//! ordering; the parenthesised build flavour is dropped.

use crate::error::{Result, UpdateError};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const MAX_COMPONENTS: usize = 4;

/// Comparable firmware version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Fourth component used by old development builds (`6.4.1.18`)
    pub build: u32,
    pub pre: Option<String>,
}

impl SemanticVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: 0,
            pre: None,
        }
    }

    /// Parse a possibly decorated version string (e.g. "14.3.0(tasmota)")
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (run, rest) = split_numeric_run(trimmed);

        if !run.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(UpdateError::InvalidVersion(format!(
                "no numeric version in '{raw}'"
            )));
        }

        let run = run.strip_suffix('.').unwrap_or(run);
        let parts: Vec<&str> = run.split('.').collect();
        if parts.len() > MAX_COMPONENTS {
            return Err(UpdateError::InvalidVersion(format!(
                "too many components in '{raw}'"
            )));
        }

        let mut numbers = [0_u32; MAX_COMPONENTS];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.parse::<u32>().map_err(|_| {
                UpdateError::InvalidVersion(format!("invalid component '{part}' in '{raw}'"))
            })?;
        }

        let pre = rest
            .strip_prefix('-')
            .map(|tail| {
                let end = tail
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
                    .unwrap_or(tail.len());
                tail.split_at(end).0
            })
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned);

        let [major, minor, patch, build] = numbers;
        Ok(Self {
            major,
            minor,
            patch,
            build,
            pre,
        })
    }

    fn numeric(&self) -> (u32, u32, u32, u32) {
        (self.major, self.minor, self.patch, self.build)
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numeric()
            .cmp(&other.numeric())
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => pre_release_key(a)
                    .cmp(&pre_release_key(b))
                    .then_with(|| a.cmp(b)),
            })
    }
}

/// Piece of a pre-release tag; numbers sort before text
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PreReleasePart {
    Number(u64),
    Text(String),
}

impl PreReleasePart {
    fn from_run(run: String, numeric: bool) -> Self {
        match run.parse::<u64>() {
            Ok(number) if numeric => Self::Number(number),
            _ => Self::Text(run),
        }
    }
}

/// Split a tag on dots and digit boundaries so `beta2 < beta10`
fn pre_release_key(tag: &str) -> Vec<PreReleasePart> {
    let mut parts = Vec::new();
    for identifier in tag.split('.') {
        let mut run = String::new();
        let mut numeric = false;
        for c in identifier.chars() {
            if !run.is_empty() && c.is_ascii_digit() != numeric {
                parts.push(PreReleasePart::from_run(std::mem::take(&mut run), numeric));
            }
            numeric = c.is_ascii_digit();
            run.push(c);
        }
        if !run.is_empty() {
            parts.push(PreReleasePart::from_run(run, numeric));
        }
    }
    parts
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.build != 0 {
            write!(f, ".{}", self.build)?;
        }
        if let Some(ref pre) = self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl FromStr for SemanticVersion {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SemanticVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn split_numeric_run(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    s.split_at(end)
}

/// Strip the build flavour from a reported version ("14.3.0(tasmota)" -> "14.3.0").
///
/// Strings without a numeric prefix are returned unchanged.
pub fn normalize_installed(raw: &str) -> String {
    let trimmed = raw.trim();
    let (run, _) = split_numeric_run(trimmed);
    if run.is_empty() {
        trimmed.to_owned()
    } else {
        run.to_owned()
    }
}

/// Extract version from a release tag (strips any leading non-numeric prefix, e.g. "v")
pub fn version_from_tag(tag: &str) -> &str {
    tag.trim().trim_start_matches(|c: char| !c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(
            SemanticVersion::parse("14.3.0").unwrap(),
            SemanticVersion::new(14, 3, 0)
        );
        assert_eq!(
            SemanticVersion::parse("14.3.0(tasmota)").unwrap(),
            SemanticVersion::new(14, 3, 0)
        );
        assert_eq!(
            SemanticVersion::parse(" 8.5.1(sonoff) ").unwrap(),
            SemanticVersion::new(8, 5, 1)
        );
        assert_eq!(
            SemanticVersion::parse("9.1").unwrap(),
            SemanticVersion::new(9, 1, 0)
        );
    }

    #[test]
    fn test_parse_development_build() {
        let version = SemanticVersion::parse("6.4.1.18(sonoff)").unwrap();
        assert_eq!(version.build, 18);
        assert!(version > SemanticVersion::new(6, 4, 1));
        assert!(version < SemanticVersion::new(6, 7, 1));
        assert_eq!(version.to_string(), "6.4.1.18");
    }

    #[test]
    fn test_parse_pre_release() {
        let version = SemanticVersion::parse("14.4.0-beta1(tasmota)").unwrap();
        assert_eq!(version.pre.as_deref(), Some("beta1"));
        assert!(version < SemanticVersion::new(14, 4, 0));
        assert!(version > SemanticVersion::new(14, 3, 0));
        assert_eq!(version.to_string(), "14.4.0-beta1");
    }

    #[test]
    fn test_parse_version_invalid() {
        for raw in ["", "   ", "invalid", "tasmota", "v", ".5", "1..2", "1.2.3.4.5", "a.b.c"] {
            assert!(
                matches!(
                    SemanticVersion::parse(raw),
                    Err(UpdateError::InvalidVersion(_))
                ),
                "expected error for {raw:?}"
            );
        }
    }

    #[test]
    fn test_parse_overflow_is_error() {
        assert!(SemanticVersion::parse("99999999999.0.0").is_err());
    }

    #[test]
    fn test_ordering() {
        let v = |s: &str| SemanticVersion::parse(s).unwrap();
        assert!(v("5.14.0") > v("5.9.9"));
        assert!(v("10.0.0") > v("9.9.9"));
        assert!(v("3.9.0") < v("4.0.0"));
        assert_eq!(v("12.0.0(tasmota)"), v("12.0.0"));
    }

    #[test]
    fn test_normalize_installed() {
        assert_eq!(normalize_installed("14.3.0(tasmota)"), "14.3.0");
        assert_eq!(normalize_installed("12.1.0"), "12.1.0");
        assert_eq!(normalize_installed("unknown"), "unknown");
        assert_eq!(normalize_installed(""), "");
    }

    #[test]
    fn test_version_from_tag_strips_prefix() {
        assert_eq!(version_from_tag("v14.3.0"), "14.3.0");
        assert_eq!(version_from_tag("V14.3.0"), "14.3.0");
        assert_eq!(version_from_tag("release-14.3.0"), "14.3.0");
        assert_eq!(version_from_tag("14.3.0"), "14.3.0");
    }

    #[test]
    fn test_pre_release_ordering() {
        let v = |s: &str| SemanticVersion::parse(s).unwrap();
        assert!(v("14.4.0-beta2") < v("14.4.0-beta10"));
        assert!(v("14.4.0-beta10") < v("14.4.0-rc1"));
        assert!(v("14.4.0-rc1") < v("14.4.0-rc1.1"));
        assert!(v("14.4.0-alpha.1") < v("14.4.0-alpha.beta"));
        assert!(v("14.4.0-rc10") < v("14.4.0"));
        assert_ne!(v("14.4.0-beta01"), v("14.4.0-beta1"));
        assert_ne!(
            v("14.4.0-beta01").cmp(&v("14.4.0-beta1")),
            Ordering::Equal
        );
    }
}
