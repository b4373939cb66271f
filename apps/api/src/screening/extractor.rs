//! Extraction Engine — turns normalized document text into a `StructuredProfile`
//! via the model capability.
//!
//! Flow: build per-kind prompt → invoke → validate against the field schema →
//! on validation failure retry once with a corrective reformulation → on a
//! second failure degrade to an all-empty low-confidence profile. Partial
//! output is preferred to aborting a batch; only an unreachable capability
//! surfaces as `ExtractionUnavailable`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::llm_client::{strip_json_fences, Capability};
use crate::screening::document::{DocumentKind, NormalizedText};
use crate::screening::error::ScreenError;
use crate::screening::prompts::{
    CORRECTIVE_RETRY_TEMPLATE, EXTRACTION_SYSTEM, JOB_EXTRACTION_TEMPLATE,
    RESUME_EXTRACTION_TEMPLATE,
};

// ────────────────────────────────────────────────────────────────────────────
// Field schema
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Text,
    Number,
    Items,
}

struct FieldSpec {
    name: &'static str,
    ty: FieldType,
    required: bool,
}

/// Expected fields for a resume. Placeholder field list pending real product
/// requirements — scoring reads `skills`, `years_experience`, `education_level`.
const RESUME_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "skills",
        ty: FieldType::Items,
        required: true,
    },
    FieldSpec {
        name: "years_experience",
        ty: FieldType::Number,
        required: false,
    },
    FieldSpec {
        name: "education_level",
        ty: FieldType::Text,
        required: false,
    },
    FieldSpec {
        name: "summary",
        ty: FieldType::Text,
        required: false,
    },
];

/// Expected fields for a job description.
const JOB_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "required_skills",
        ty: FieldType::Items,
        required: true,
    },
    FieldSpec {
        name: "nice_to_have_skills",
        ty: FieldType::Items,
        required: false,
    },
    FieldSpec {
        name: "min_years_experience",
        ty: FieldType::Number,
        required: false,
    },
    FieldSpec {
        name: "required_education",
        ty: FieldType::Text,
        required: false,
    },
    FieldSpec {
        name: "title",
        ty: FieldType::Text,
        required: false,
    },
];

fn schema_for(kind: DocumentKind) -> &'static [FieldSpec] {
    match kind {
        DocumentKind::Resume => RESUME_SCHEMA,
        DocumentKind::JobDescription => JOB_SCHEMA,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Structured profile
// ────────────────────────────────────────────────────────────────────────────

/// A typed field value extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Items(BTreeSet<String>),
}

/// Output of extraction: named, typed fields plus a confidence flag.
/// Derived by the pipeline, never hand-edited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredProfile {
    pub fields: BTreeMap<String, FieldValue>,
    /// Set when extraction failed schema validation twice and the profile was
    /// degraded to empty rather than failing the run.
    #[serde(default)]
    pub low_confidence: bool,
}

impl StructuredProfile {
    pub fn empty_low_confidence() -> Self {
        Self {
            fields: BTreeMap::new(),
            low_confidence: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn items(&self, name: &str) -> Option<&BTreeSet<String>> {
        match self.fields.get(name) {
            Some(FieldValue::Items(set)) => Some(set),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    // Candidate-side accessors
    pub fn skills(&self) -> Option<&BTreeSet<String>> {
        self.items("skills")
    }

    pub fn years_experience(&self) -> Option<f64> {
        self.number("years_experience")
    }

    pub fn education_level(&self) -> Option<&str> {
        self.text("education_level")
    }

    // Job-side accessors
    pub fn required_skills(&self) -> Option<&BTreeSet<String>> {
        self.items("required_skills")
    }

    pub fn min_years_experience(&self) -> Option<f64> {
        self.number("min_years_experience")
    }

    pub fn required_education(&self) -> Option<&str> {
        self.text("required_education")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Schema validation
// ────────────────────────────────────────────────────────────────────────────

/// Validates a raw model response against the expected field schema for `kind`.
/// Unknown extra fields are ignored; missing required fields, wrong types, and
/// non-JSON payloads are validation errors (the caller retries once).
pub fn validate_response(kind: DocumentKind, raw: &str) -> Result<StructuredProfile, String> {
    let text = strip_json_fences(raw);
    let value: Value =
        serde_json::from_str(text).map_err(|e| format!("response is not valid JSON: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "top level is not a JSON object".to_string())?;

    let mut fields = BTreeMap::new();
    for spec in schema_for(kind) {
        match obj.get(spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(format!("missing required field `{}`", spec.name));
                }
            }
            Some(v) => {
                fields.insert(spec.name.to_string(), coerce_field(spec, v)?);
            }
        }
    }

    Ok(StructuredProfile {
        fields,
        low_confidence: false,
    })
}

fn coerce_field(spec: &FieldSpec, value: &Value) -> Result<FieldValue, String> {
    match spec.ty {
        FieldType::Items => {
            let arr = value
                .as_array()
                .ok_or_else(|| format!("field `{}` must be an array of strings", spec.name))?;
            let mut set = BTreeSet::new();
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or_else(|| format!("field `{}` must contain only strings", spec.name))?;
                let s = s.trim();
                if !s.is_empty() {
                    set.insert(s.to_string());
                }
            }
            Ok(FieldValue::Items(set))
        }
        FieldType::Number => value
            .as_f64()
            .map(FieldValue::Number)
            .ok_or_else(|| format!("field `{}` must be a number", spec.name)),
        FieldType::Text => value
            .as_str()
            .map(|s| FieldValue::Text(s.trim().to_string()))
            .ok_or_else(|| format!("field `{}` must be a string", spec.name)),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Extraction
// ────────────────────────────────────────────────────────────────────────────

/// Extracts a `StructuredProfile` from normalized text.
///
/// Schema-validation failure is retried exactly once with a corrective
/// reformulation; a second failure yields an all-empty profile with
/// `low_confidence = true`. Only an unreachable capability (or a per-call
/// timeout) returns `ExtractionUnavailable`.
pub async fn extract(
    text: &NormalizedText,
    kind: DocumentKind,
    capability: &dyn Capability,
    per_call_timeout: Duration,
) -> Result<StructuredProfile, ScreenError> {
    let template = match kind {
        DocumentKind::Resume => RESUME_EXTRACTION_TEMPLATE,
        DocumentKind::JobDescription => JOB_EXTRACTION_TEMPLATE,
    };
    let prompt = template.replace("{document_text}", &text.text);

    let first = invoke_with_timeout(capability, &prompt, per_call_timeout).await?;
    let first_err = match validate_response(kind, &first) {
        Ok(profile) => return Ok(profile),
        Err(e) => e,
    };
    let mismatch = ScreenError::SchemaMismatch {
        detail: first_err.clone(),
    };
    warn!(
        kind = kind.as_str(),
        "{mismatch} — retrying with corrective prompt"
    );

    let retry_prompt = CORRECTIVE_RETRY_TEMPLATE
        .replace("{validation_error}", &first_err)
        .replace("{previous_response}", &first)
        .replace("{original_prompt}", &prompt);

    let second = invoke_with_timeout(capability, &retry_prompt, per_call_timeout).await?;
    match validate_response(kind, &second) {
        Ok(profile) => Ok(profile),
        Err(e) => {
            let mismatch = ScreenError::SchemaMismatch { detail: e };
            warn!(
                kind = kind.as_str(),
                "{mismatch} twice — degrading to empty low-confidence profile"
            );
            Ok(StructuredProfile::empty_low_confidence())
        }
    }
}

async fn invoke_with_timeout(
    capability: &dyn Capability,
    prompt: &str,
    per_call_timeout: Duration,
) -> Result<String, ScreenError> {
    match tokio::time::timeout(per_call_timeout, capability.invoke(prompt, EXTRACTION_SYSTEM)).await
    {
        Err(_) => Err(ScreenError::ExtractionUnavailable {
            detail: format!("call timed out after {}ms", per_call_timeout.as_millis()),
        }),
        Ok(Err(e)) if e.is_unavailable() => Err(ScreenError::ExtractionUnavailable {
            detail: e.to_string(),
        }),
        // Reachable-but-malformed content (empty or undecodable) flows into
        // the validation path so the corrective retry fires.
        Ok(Err(_)) => Ok(String::new()),
        Ok(Ok(text)) => Ok(text),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    const VALID_RESUME_JSON: &str = r#"{
        "skills": ["python", "sql", "go"],
        "years_experience": 6,
        "education_level": "master",
        "summary": "Data engineer with six years of pipeline work"
    }"#;

    /// Replays a fixed sequence of replies, one per `invoke` call.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, u16>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, u16>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_owned))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl Capability for Scripted {
        async fn invoke(&self, _prompt: &str, _system: &str) -> Result<String, LlmError> {
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(status)) => Err(LlmError::Api {
                    status,
                    message: "capability down".to_string(),
                }),
                None => panic!("script exhausted — extract made more calls than expected"),
            }
        }
    }

    /// Empty content on the first call, valid JSON on the second.
    struct EmptyThenValid {
        called: Mutex<bool>,
    }

    #[async_trait]
    impl Capability for EmptyThenValid {
        async fn invoke(&self, _prompt: &str, _system: &str) -> Result<String, LlmError> {
            let mut called = self.called.lock().unwrap();
            if *called {
                Ok(VALID_RESUME_JSON.to_string())
            } else {
                *called = true;
                Err(LlmError::EmptyContent)
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Capability for Slow {
        async fn invoke(&self, _prompt: &str, _system: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(VALID_RESUME_JSON.to_string())
        }
    }

    fn norm(text: &str) -> NormalizedText {
        NormalizedText {
            text: text.to_string(),
            truncated: false,
        }
    }

    #[tokio::test]
    async fn test_extract_valid_first_response() {
        let capability = Scripted::new(vec![Ok(VALID_RESUME_JSON)]);
        let profile = extract(&norm("resume text"), DocumentKind::Resume, &capability, TIMEOUT)
            .await
            .unwrap();

        assert!(!profile.low_confidence);
        assert!(profile.skills().unwrap().contains("python"));
        assert_eq!(profile.years_experience(), Some(6.0));
        assert_eq!(profile.education_level(), Some("master"));
    }

    #[tokio::test]
    async fn test_extract_accepts_fenced_json() {
        let fenced = format!("```json\n{VALID_RESUME_JSON}\n```");
        let capability = Scripted::new(vec![Ok(fenced.as_str())]);
        let profile = extract(&norm("resume text"), DocumentKind::Resume, &capability, TIMEOUT)
            .await
            .unwrap();
        assert!(profile.skills().is_some());
    }

    #[tokio::test]
    async fn test_extract_retries_once_on_schema_mismatch() {
        let capability = Scripted::new(vec![
            Ok("I think the candidate knows Python."),
            Ok(VALID_RESUME_JSON),
        ]);
        let profile = extract(&norm("resume text"), DocumentKind::Resume, &capability, TIMEOUT)
            .await
            .unwrap();
        assert!(!profile.low_confidence);
        assert_eq!(profile.skills().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_extract_degrades_after_two_schema_failures() {
        let capability = Scripted::new(vec![Ok("not json"), Ok("{\"wrong\": true}")]);
        let profile = extract(&norm("resume text"), DocumentKind::Resume, &capability, TIMEOUT)
            .await
            .unwrap();
        assert!(profile.low_confidence);
        assert!(profile.is_empty());
    }

    #[tokio::test]
    async fn test_extract_empty_content_takes_retry_path_not_outage() {
        let capability = EmptyThenValid {
            called: Mutex::new(false),
        };
        let profile = extract(&norm("resume text"), DocumentKind::Resume, &capability, TIMEOUT)
            .await
            .unwrap();
        assert!(!profile.low_confidence);
        assert!(profile.skills().is_some());
    }

    #[tokio::test]
    async fn test_extract_transport_failure_is_unavailable() {
        let capability = Scripted::new(vec![Err(503)]);
        let err = extract(&norm("resume text"), DocumentKind::Resume, &capability, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "extraction_unavailable");
    }

    #[tokio::test]
    async fn test_extract_timeout_is_unavailable() {
        let err = extract(
            &norm("resume text"),
            DocumentKind::Resume,
            &Slow,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind_str(), "extraction_unavailable");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_validate_missing_required_field() {
        let err = validate_response(DocumentKind::Resume, r#"{"years_experience": 4}"#).unwrap_err();
        assert!(err.contains("skills"));
    }

    #[test]
    fn test_validate_wrong_type_rejected() {
        let err =
            validate_response(DocumentKind::Resume, r#"{"skills": "python, sql"}"#).unwrap_err();
        assert!(err.contains("array"));
    }

    #[test]
    fn test_validate_ignores_extra_fields() {
        let profile = validate_response(
            DocumentKind::JobDescription,
            r#"{"required_skills": ["rust"], "company_vibe": "intense"}"#,
        )
        .unwrap();
        assert!(profile.fields.get("company_vibe").is_none());
        assert!(profile.required_skills().unwrap().contains("rust"));
    }

    #[test]
    fn test_validate_null_optional_field_ok() {
        let profile = validate_response(
            DocumentKind::Resume,
            r#"{"skills": ["rust"], "years_experience": null}"#,
        )
        .unwrap();
        assert_eq!(profile.years_experience(), None);
    }

    #[test]
    fn test_validate_blank_items_dropped() {
        let profile = validate_response(
            DocumentKind::Resume,
            r#"{"skills": ["rust", "  ", ""]}"#,
        )
        .unwrap();
        assert_eq!(profile.skills().unwrap().len(), 1);
    }

    #[test]
    fn test_field_value_untagged_roundtrip() {
        let v: FieldValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(v, FieldValue::Number(3.5));
        let v: FieldValue = serde_json::from_str(r#""bachelor""#).unwrap();
        assert_eq!(v, FieldValue::Text("bachelor".to_string()));
        let v: FieldValue = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert!(matches!(v, FieldValue::Items(ref s) if s.len() == 2));
    }
}
