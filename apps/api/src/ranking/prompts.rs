// Prompt constants for the four ranking stages.
// Templates are filled with `.replace("{placeholder}", value)` before sending.

/// Role for stage 1.
pub const EXTRACTION_ROLE: &str = "You are an expert technical recruiter who reads job \
    descriptions and extracts what the employer is actually looking for.";

/// Extraction prompt. Replace: {job_title}, {job_description}, {max_attributes}
pub const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract the attributes this employer wants in a candidate, ranked by importance to the employer (1 = most important).

Return a JSON array with at most {max_attributes} entries, each with this EXACT schema:
[
  {"rank": 1, "label": "SQL", "taxonomy_category": "Skill", "rationale": "Listed first under requirements."}
]

Rules:
- "rank" values are unique integers starting at 1 with no gaps.
- "label" is a short noun phrase naming ONE attribute.
- "taxonomy_category" is exactly one of: "Skill", "Tool", "Experience", "Trait", "Qualification", "Knowledge Area".
- "rationale" is one sentence citing the job description.
- Do not repeat an attribute under a different wording.

JOB TITLE:
{job_title}

JOB DESCRIPTION:
{job_description}"#;

/// Role for stage 2.
pub const CATEGORIZATION_ROLE: &str = "You are an expert talent analyst who sorts job \
    attributes into the three fit pillars: Industry, Process and Technical.";

/// Categorization prompt. Replace: {attributes_json}
pub const CATEGORIZATION_PROMPT_TEMPLATE: &str = r#"Assign exactly one fit pillar to each attribute below. Keep every "rank" and "label" exactly as given.

PILLARS:
- "Industry": domain knowledge, sector experience, market or regulatory familiarity.
- "Process": ways of working, methodologies, collaboration, leadership, soft skills.
- "Technical": languages, tools, platforms, engineering or analytical techniques.

Return a JSON array with one entry per input attribute:
[
  {"rank": 1, "label": "SQL", "fit_pillar": "Technical", "rationale": "A query language."}
]

ATTRIBUTES:
{attributes_json}"#;

/// Role for stage 3.
pub const REFINEMENT_ROLE: &str = "You are an expert resume editor who rewrites job \
    attributes as short, specific labels grounded in the job description.";

/// Refinement prompt. Replace: {max_words}, {job_title}, {job_description}, {attributes_json}
pub const REFINEMENT_PROMPT_TEMPLATE: &str = r#"Rewrite each attribute label below so it is specific to this job and at most {max_words} words long. Keep every "rank" and "fit_pillar" exactly as given.

Return a JSON array with one entry per input attribute:
[
  {"rank": 1, "original_label": "SQL", "refined_label": "Analytical SQL", "fit_pillar": "Technical", "rationale": "Queries feed reporting."}
]

JOB TITLE:
{job_title}

JOB DESCRIPTION:
{job_description}

ATTRIBUTES:
{attributes_json}"#;

/// Role for stage 4.
pub const RELEVANCE_ROLE: &str = "You are a hiring manager judging which attributes matter \
    most for a role based on its title alone.";

/// Role-relevance prompt. Replace: {job_title}, {labels_json}, {max_attributes}
pub const RELEVANCE_PROMPT_TEMPLATE: &str = r#"Rank the attributes below by how essential they are for someone holding the job title "{job_title}". Ignore the order in which they are listed.

Return a JSON array with one entry per attribute:
[
  {"independent_rank": 1, "refined_label": "Analytical SQL", "relevance_score": 9, "rationale": "A {job_title} lives in SQL every day."}
]

Rules:
- "independent_rank" values are unique integers from 1 to at most {max_attributes}.
- "refined_label" is copied exactly from the list.
- "relevance_score" is an integer from 1 (marginal) to 10 (essential).
- "rationale" is one sentence that references the job title.

ATTRIBUTES:
{labels_json}"#;
