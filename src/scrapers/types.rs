use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of payload a strategy produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Html,
    Json,
}

/// Raw response handed back by a strategy before classification
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub content_type: ContentType,
}

impl RawResponse {
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: ContentType::Html,
        }
    }

    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: ContentType::Json,
        }
    }

    /// Turn the body into typed content according to its declared kind
    pub fn into_content(self) -> Result<Content, FetchError> {
        match self.content_type {
            ContentType::Html => Ok(Content::Html(self.body)),
            ContentType::Json => serde_json::from_str(&self.body)
                .map(Content::Json)
                .map_err(|e| FetchError::Decode(e.to_string())),
        }
    }
}

/// Usable content, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Html(String),
    Json(serde_json::Value),
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::Html(_) => ContentType::Html,
            Content::Json(_) => ContentType::Json,
        }
    }
}

/// Why a response was classified as a challenge page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockEvidence {
    StatusCode { status: u16 },
    ChallengeMarker { marker: String },
    BodyTooSmall { bytes: usize, threshold: usize },
}

impl fmt::Display for BlockEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockEvidence::StatusCode { status } => write!(f, "blocking status {}", status),
            BlockEvidence::ChallengeMarker { marker } => {
                write!(f, "challenge marker '{}'", marker)
            }
            BlockEvidence::BodyTooSmall { bytes, threshold } => {
                write!(f, "body of {} bytes below {} byte minimum", bytes, threshold)
            }
        }
    }
}

/// Outcome of one strategy, or of the whole chain
#[derive(Debug)]
pub enum StrategyResult {
    Success(Content),
    Blocked(BlockEvidence),
    Failed(FetchError),
}

impl StrategyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StrategyResult::Success(_))
    }

    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            StrategyResult::Success(_) => AttemptOutcome::Success,
            StrategyResult::Blocked(_) => AttemptOutcome::Blocked,
            StrategyResult::Failed(_) => AttemptOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Blocked,
    Failed,
}

/// Diagnostic record of one strategy execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchAttempt {
    pub strategy: String,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub protection_detected: bool,
    pub body_bytes: usize,
    pub outcome: AttemptOutcome,
    /// The request never got an answer from the target
    #[serde(default)]
    pub transport_failure: bool,
    /// Block evidence or failure cause
    pub detail: Option<String>,
}

/// What the chain hands back: the final result and every attempt made
#[derive(Debug)]
pub struct ChainReport {
    pub result: StrategyResult,
    pub attempts: Vec<FetchAttempt>,
}

impl ChainReport {
    /// Name of the strategy that produced content, if any
    pub fn winning_strategy(&self) -> Option<&str> {
        if !self.result.is_success() {
            return None;
        }
        self.attempts
            .iter()
            .rev()
            .find(|a| a.outcome == AttemptOutcome::Success)
            .map(|a| a.strategy.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_decodes_into_json_content() {
        let raw = RawResponse::json(200, r#"{"items":[]}"#);
        let content = raw.into_content().unwrap();
        assert_eq!(content.content_type(), ContentType::Json);
    }

    #[test]
    fn garbled_json_is_a_decode_failure() {
        let raw = RawResponse::json(200, "{not json");
        assert!(matches!(raw.into_content(), Err(FetchError::Decode(_))));
    }

    #[test]
    fn evidence_reads_well() {
        let evidence = BlockEvidence::BodyTooSmall {
            bytes: 12,
            threshold: 512,
        };
        assert_eq!(evidence.to_string(), "body of 12 bytes below 512 byte minimum");
    }
}
