//! Challenge-page detection.
//!
//! The detector is a pure function of (body, status): it never touches the
//! network and keeps no state, so every strategy can share one instance.

use crate::scrapers::types::BlockEvidence;
use serde::{Deserialize, Serialize};

/// Signatures of known anti-bot challenge pages
pub const DEFAULT_CHALLENGE_MARKERS: &[&str] = &[
    "validate.perfdrive.com",
    "shieldsquare",
    "bot management",
    "human verification",
    "security check",
    "please wait while we verify",
    "checking your browser",
    "captcha",
    "blocked",
    "access denied",
];

/// Bodies shorter than this with HTTP 200 are treated as suspicious
pub const DEFAULT_MIN_CONTENT_BYTES: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Replaces the built-in signature list
    pub markers: Vec<String>,
    /// Appended to `markers`
    pub extra_markers: Vec<String>,
    pub blocked_statuses: Vec<u16>,
    pub min_content_bytes: usize,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            markers: DEFAULT_CHALLENGE_MARKERS.iter().map(|m| m.to_string()).collect(),
            extra_markers: Vec::new(),
            blocked_statuses: vec![403, 429],
            min_content_bytes: DEFAULT_MIN_CONTENT_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    Blocked(BlockEvidence),
}

#[derive(Debug, Clone)]
pub struct ProtectionDetector {
    markers: Vec<String>,
    blocked_statuses: Vec<u16>,
    min_content_bytes: usize,
}

impl Default for ProtectionDetector {
    fn default() -> Self {
        Self::new(&ProtectionConfig::default())
    }
}

impl ProtectionDetector {
    pub fn new(config: &ProtectionConfig) -> Self {
        let markers = config
            .markers
            .iter()
            .chain(config.extra_markers.iter())
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();

        Self {
            markers,
            blocked_statuses: config.blocked_statuses.clone(),
            min_content_bytes: config.min_content_bytes,
        }
    }

    pub fn detect(&self, body: &str, status: u16) -> Verdict {
        if self.blocked_statuses.contains(&status) {
            return Verdict::Blocked(BlockEvidence::StatusCode { status });
        }

        let lowered = body.to_lowercase();
        if let Some(marker) = self.markers.iter().find(|m| lowered.contains(m.as_str())) {
            return Verdict::Blocked(BlockEvidence::ChallengeMarker {
                marker: marker.clone(),
            });
        }

        let bytes = body.trim().len();
        if status == 200 && bytes < self.min_content_bytes {
            return Verdict::Blocked(BlockEvidence::BodyTooSmall {
                bytes,
                threshold: self.min_content_bytes,
            });
        }

        Verdict::Clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(inner: &str) -> String {
        format!(
            "<html><body>{}<div>{}</div></body></html>",
            inner,
            "דירה להשכרה ".repeat(60)
        )
    }

    #[test]
    fn throttling_and_forbidden_statuses_are_blocked() {
        let detector = ProtectionDetector::default();
        for status in [403, 429] {
            assert_eq!(
                detector.detect(&page(""), status),
                Verdict::Blocked(BlockEvidence::StatusCode { status })
            );
        }
    }

    #[test]
    fn markers_match_case_insensitively() {
        let detector = ProtectionDetector::default();
        let body = page("<script src=\"https://Validate.PerfDrive.com/x.js\"></script>");
        assert_eq!(
            detector.detect(&body, 200),
            Verdict::Blocked(BlockEvidence::ChallengeMarker {
                marker: "validate.perfdrive.com".to_string()
            })
        );
    }

    #[test]
    fn tiny_200_body_is_suspicious() {
        let detector = ProtectionDetector::default();
        assert!(matches!(
            detector.detect("<html></html>", 200),
            Verdict::Blocked(BlockEvidence::BodyTooSmall { .. })
        ));
        assert!(matches!(
            detector.detect("", 200),
            Verdict::Blocked(BlockEvidence::BodyTooSmall { bytes: 0, .. })
        ));
    }

    #[test]
    fn small_non_200_body_is_not_a_size_block() {
        let detector = ProtectionDetector::default();
        assert_eq!(detector.detect("gone", 404), Verdict::Clear);
    }

    #[test]
    fn ordinary_listing_page_is_clear() {
        let detector = ProtectionDetector::default();
        assert_eq!(detector.detect(&page("<h1>results</h1>"), 200), Verdict::Clear);
    }

    #[test]
    fn extra_markers_extend_the_list() {
        let config = ProtectionConfig {
            extra_markers: vec!["Just a moment".to_string()],
            ..ProtectionConfig::default()
        };
        let detector = ProtectionDetector::new(&config);
        assert!(matches!(
            detector.detect(&page("just a moment..."), 200),
            Verdict::Blocked(BlockEvidence::ChallengeMarker { .. })
        ));
    }

    #[test]
    fn detection_is_deterministic() {
        let detector = ProtectionDetector::default();
        let body = page("captcha");
        assert_eq!(detector.detect(&body, 200), detector.detect(&body, 200));
    }
}
