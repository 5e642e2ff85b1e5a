//! Segment importance scoring.
//!
//! The structured-generation capability is asked for a typed assessment.
//! Any failure (timeout, cancellation, provider error, a record that does not
//! match the schema) falls back to a keyword heuristic that always yields a
//! well-formed assessment.

use super::segment::ConversationSegment;
use crate::provider::{
    GENERATION_TIMEOUT, GenerationError, StructuredGenerator, StructuredRequest, with_deadline,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SCORING_INSTRUCTION: &str = "\
Assess how important the following conversation segment is for continuing the work later.

- high: errors and their resolutions, credentials or security concerns, deployment or \
  infrastructure changes, decisions the rest of the work depends on
- medium: implementation work, code structure, files created or changed
- low: greetings, acknowledgements, general discussion

Respond with a record matching the schema. Keep the reasoning to one sentence and list \
at most five short topics.";

const ERROR_KEYWORDS: &[&str] = &["error", "exception", "failed", "failure", "crash", "bug"];
const SECURITY_KEYWORDS: &[&str] = &[
    "password",
    "credential",
    "secret",
    "api key",
    "token expired",
    "security",
    "vulnerability",
    "permission denied",
];
const DEPLOYMENT_KEYWORDS: &[&str] = &[
    "deploy",
    "production",
    "infrastructure",
    "database",
    "migration",
    "kubernetes",
    "docker",
    "config",
];
const IMPLEMENTATION_KEYWORDS: &[&str] = &[
    "create",
    "build",
    "fix",
    "implement",
    "function",
    "class",
    "module",
    "refactor",
    "component",
    "interface",
    "struct",
    "method",
];

/// Confidence reported by the keyword heuristic.
const HEURISTIC_CONFIDENCE: f64 = 0.5;
const MAX_HEURISTIC_TOPICS: usize = 5;

/// How much detail a compacted segment keeps when re-assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
}

/// Typed assessment of a segment, from the model or the heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceAssessment {
    pub importance: Importance,
    pub reasoning: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub has_technical_content: bool,
    #[serde(default)]
    pub has_error_or_issue: bool,
    #[serde(default)]
    pub has_configuration_change: bool,
    #[serde(default)]
    pub has_code_or_implementation: bool,
    pub confidence: f64,
}

/// JSON schema handed to the structured-generation capability.
#[must_use]
pub fn assessment_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "importance": { "type": "string", "enum": ["low", "medium", "high"] },
            "reasoning": { "type": "string" },
            "topics": { "type": "array", "items": { "type": "string" } },
            "has_technical_content": { "type": "boolean" },
            "has_error_or_issue": { "type": "boolean" },
            "has_configuration_change": { "type": "boolean" },
            "has_code_or_implementation": { "type": "boolean" },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": [
            "importance",
            "reasoning",
            "topics",
            "has_technical_content",
            "has_error_or_issue",
            "has_configuration_change",
            "has_code_or_implementation",
            "confidence"
        ]
    })
}

/// Validate a structured record into an assessment.
pub fn parse_assessment(value: serde_json::Value) -> Result<ImportanceAssessment, GenerationError> {
    let assessment: ImportanceAssessment = serde_json::from_value(value)?;
    if !(0.0..=1.0).contains(&assessment.confidence) {
        return Err(GenerationError::Malformed(format!(
            "confidence {} outside [0, 1]",
            assessment.confidence
        )));
    }
    Ok(assessment)
}

/// Deterministic keyword assessment of a transcript.
#[must_use]
pub fn heuristic_assessment(transcript: &str) -> ImportanceAssessment {
    let lower = transcript.to_lowercase();
    let hits = |keywords: &'static [&'static str]| -> Vec<&'static str> {
        keywords
            .iter()
            .copied()
            .filter(|k| lower.contains(k))
            .collect()
    };

    let errors = hits(ERROR_KEYWORDS);
    let security = hits(SECURITY_KEYWORDS);
    let deployment = hits(DEPLOYMENT_KEYWORDS);
    let implementation = hits(IMPLEMENTATION_KEYWORDS);

    let high_hits = errors.len() + security.len() + deployment.len();
    let medium_hits = implementation.len();

    let importance = if high_hits >= 2 {
        Importance::High
    } else if high_hits >= 1 || medium_hits >= 3 {
        Importance::Medium
    } else {
        Importance::Low
    };

    let topics = errors
        .iter()
        .chain(&security)
        .chain(&deployment)
        .chain(&implementation)
        .take(MAX_HEURISTIC_TOPICS)
        .map(|k| (*k).to_string())
        .collect();

    ImportanceAssessment {
        importance,
        reasoning: format!(
            "Keyword heuristic: {high_hits} high-importance and {medium_hits} medium-importance terms"
        ),
        topics,
        has_technical_content: high_hits + medium_hits > 0,
        has_error_or_issue: !errors.is_empty(),
        has_configuration_change: !deployment.is_empty(),
        has_code_or_implementation: !implementation.is_empty(),
        confidence: HEURISTIC_CONFIDENCE,
    }
}

/// Assigns importance to segments.
pub struct ImportanceScorer {
    generator: Option<Arc<dyn StructuredGenerator>>,
    model: Option<String>,
    timeout: Duration,
}

impl ImportanceScorer {
    #[must_use]
    pub fn new(generator: Option<Arc<dyn StructuredGenerator>>) -> Self {
        Self {
            generator,
            model: None,
            timeout: GENERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Score a segment. Never fails: degrades to the keyword heuristic.
    pub async fn score(
        &self,
        segment: &ConversationSegment,
        cancel: &CancellationToken,
    ) -> ImportanceAssessment {
        let transcript = segment.transcript();

        match self.assess_with_model(&transcript, cancel).await {
            Ok(assessment) => assessment,
            Err(GenerationError::Unavailable) => heuristic_assessment(&transcript),
            Err(e) => {
                tracing::warn!(
                    segment = %segment.id,
                    "Importance assessment failed, using keyword heuristic: {e}"
                );
                heuristic_assessment(&transcript)
            }
        }
    }

    async fn assess_with_model(
        &self,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportanceAssessment, GenerationError> {
        let generator = self.generator.as_ref().ok_or(GenerationError::Unavailable)?;

        let request = StructuredRequest {
            model: self.model.clone(),
            instruction: SCORING_INSTRUCTION.to_string(),
            transcript: transcript.to_string(),
            schema: assessment_schema(),
        };

        let value = with_deadline(generator.generate_structured(request), self.timeout, cancel).await?;
        parse_assessment(value)
    }
}
