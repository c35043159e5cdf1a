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

//! Tasmota release information

use crate::error::Result;
use crate::version::{SemanticVersion, version_from_tag};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const SUMMARY_MAX_CHARS: usize = 250;

/// Latest known Tasmota release
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    /// Tag name as published (e.g. "v14.3.0")
    pub tag: String,
    /// Version parsed from the tag
    pub version: SemanticVersion,
    /// Release web page
    pub release_url: String,
    /// Short plain-text summary of the release notes
    pub release_summary: String,
    /// Full release notes (Markdown)
    pub release_notes: String,
    pub last_checked_at: DateTime<Utc>,
}

impl ReleaseInfo {
    /// Build release info from a release tag and its Markdown notes
    pub fn from_tag(
        tag: impl Into<String>,
        release_url: impl Into<String>,
        release_notes: impl Into<String>,
        checked_at: DateTime<Utc>,
    ) -> Result<Self> {
        let tag = tag.into();
        let release_notes = release_notes.into();
        let version = SemanticVersion::parse(version_from_tag(&tag))?;

        Ok(Self {
            release_summary: summarize(&release_notes),
            tag,
            version,
            release_url: release_url.into(),
            release_notes,
            last_checked_at: checked_at,
        })
    }
}

/// First paragraph of the notes, clipped and stripped of Markdown markers
pub fn summarize(notes: &str) -> String {
    let notes = notes.replace("\r\n", "\n");
    let first_paragraph = notes.split("\n\n").next().unwrap_or_default();

    let clipped = if first_paragraph.chars().count() > SUMMARY_MAX_CHARS {
        let mut clipped: String = first_paragraph.chars().take(SUMMARY_MAX_CHARS).collect();
        clipped.push_str("...");
        clipped
    } else {
        first_paragraph.to_owned()
    };

    clipped
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '`'))
        .collect::<String>()
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpdateError;

    #[test]
    fn test_release_from_tag() {
        let release = ReleaseInfo::from_tag(
            "v14.3.0",
            "https://github.com/arendst/Tasmota/releases/tag/v14.3.0",
            "## Release notes\n\nMore text",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(release.tag, "v14.3.0");
        assert_eq!(release.version, SemanticVersion::new(14, 3, 0));
        assert_eq!(release.release_summary, "Release notes");
        assert_eq!(release.release_notes, "## Release notes\n\nMore text");
    }

    #[test]
    fn test_release_from_bad_tag() {
        let result = ReleaseInfo::from_tag("latest", "", "", Utc::now());
        assert!(matches!(result, Err(UpdateError::InvalidVersion(_))));
    }

    #[test]
    fn test_summary_first_paragraph() {
        assert_eq!(
            summarize("**Tasmota** `v14.3.0` Rudolph\r\n\r\n- Added stuff"),
            "Tasmota v14.3.0 Rudolph"
        );
        assert_eq!(summarize(""), "");
    }

    #[test]
    fn test_summary_truncated() {
        let notes = format!("# {}\n\nsecond", "a".repeat(400));
        let summary = summarize(&notes);
        assert!(summary.chars().count() <= SUMMARY_MAX_CHARS + 3);
        assert!(summary.ends_with("..."));
        assert!(!summary.contains('#'));
    }

    #[test]
    fn test_summary_strips_markdown_after_clipping() {
        let notes = "`".repeat(300);
        assert_eq!(summarize(&notes), "...");
    }
}
