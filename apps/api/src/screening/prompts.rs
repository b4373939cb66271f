// All LLM prompt constants for the screening module.
// Templates use {placeholder} markers filled with `str::replace` before sending.

/// System prompt for profile extraction — enforces JSON-only output.
pub const EXTRACTION_SYSTEM: &str =
    "You are an expert HR document analyst. \
    Extract structured information from a candidate resume or a job description. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Resume extraction prompt template. Replace `{document_text}` before sending.
pub const RESUME_EXTRACTION_TEMPLATE: &str = r#"Extract structured information from the following resume.

Return a JSON object with this EXACT schema (no extra fields):
{
  "skills": ["python", "sql", "kubernetes"],
  "years_experience": 6,
  "education_level": "master",
  "summary": "Data engineer with six years building batch and streaming pipelines"
}

Rules:
- "skills" is REQUIRED: every technical skill, tool, language, or framework the candidate demonstrably has, lowercase.
- "years_experience": total professional years as a number. Omit if the resume does not support an estimate.
- "education_level": highest completed, one of "none", "high school", "associate", "bachelor", "master", "doctorate". Omit if not stated.
- "summary": one factual sentence. No praise, no speculation.
- Use ONLY facts present in the resume — never invent.

RESUME:
{document_text}"#;

/// Job description extraction prompt template. Replace `{document_text}` before sending.
pub const JOB_EXTRACTION_TEMPLATE: &str = r#"Extract structured requirements from the following job description.

Return a JSON object with this EXACT schema (no extra fields):
{
  "required_skills": ["python", "sql"],
  "nice_to_have_skills": ["airflow"],
  "min_years_experience": 3,
  "required_education": "bachelor",
  "title": "Data Engineer"
}

Rules:
- "required_skills" is REQUIRED: explicit must-haves — phrases like "required", "must have", "you will need". Lowercase.
- "nice_to_have_skills": phrases like "preferred", "bonus", "a plus". Omit if none.
- "min_years_experience": the stated minimum as a number. Omit if not stated.
- "required_education": one of "none", "high school", "associate", "bachelor", "master", "doctorate". Omit if not stated.
- "title": the role title. Omit if not stated.

JOB DESCRIPTION:
{document_text}"#;

/// Corrective reformulation sent after a schema-validation failure.
/// Replace `{validation_error}`, `{previous_response}`, and `{original_prompt}`.
pub const CORRECTIVE_RETRY_TEMPLATE: &str = r#"Your previous response failed schema validation.

Validation error: {validation_error}

Your previous response was:
{previous_response}

Respond again to the original request below. Return ONLY the JSON object, with the exact field names and types requested. No code fences, no commentary.

{original_prompt}"#;

/// System prompt for match rationale generation.
pub const RATIONALE_SYSTEM: &str =
    "You are an expert technical recruiter explaining a computed candidate-job fit score. \
    Be factual and concise. Base every statement on the structured profiles provided. \
    Respond with a single short paragraph of plain text — no JSON, no markdown.";

/// Rationale prompt template.
/// Replace `{candidate_json}`, `{job_json}`, `{score}`.
pub const RATIONALE_TEMPLATE: &str = r#"A deterministic scorer compared a candidate profile against a job profile and produced a fit score of {score} (scale 0.0 to 1.0).

CANDIDATE PROFILE:
{candidate_json}

JOB PROFILE:
{job_json}

In two or three sentences, explain what drives this score: which requirements the candidate covers, which are missing, and anything notable about experience or education. Do not restate the number."#;
