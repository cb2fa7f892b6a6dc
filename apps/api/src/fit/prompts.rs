// Prompt constants for fit summarization and the direct fit-score estimate.

pub const SUMMARY_ROLE: &str = "You are a senior recruiter writing a concise, evidence-based \
    assessment of how well a candidate fits a job.";

/// Summary prompt. Replace: {job_title}, {job_description}, {narrative}, {attributes_json}
pub const SUMMARY_PROMPT_TEMPLATE: &str = r#"Summarize the job and assess the candidate against each ranked attribute.

Return a JSON object with this EXACT schema:
{
  "jd_summary": "Two or three sentences on what the role needs.",
  "fit_summary": "Two or three sentences on where the candidate fits and where they fall short.",
  "attributes": [
    {"attribute_name": "Analytical SQL", "color": "green", "evidence": "Built finance dashboards in SQL."}
  ]
}

COLORS:
- "green": the candidate narrative shows direct evidence of this attribute.
- "yellow": partial or adjacent evidence.
- "grey": no evidence.

Copy every "attribute_name" exactly from the list. Judge ONLY from the narrative; do not assume.

JOB TITLE:
{job_title}

JOB DESCRIPTION:
{job_description}

CANDIDATE NARRATIVE:
{narrative}

RANKED ATTRIBUTES:
{attributes_json}"#;

pub const ESTIMATE_SYSTEM: &str = "You are a recruiter estimating candidate fit. \
    Reply with a single number between 0 and 100 and nothing else.";

/// Direct estimate prompt. Replace: {job_summary}, {candidate_summary}
pub const ESTIMATE_PROMPT_TEMPLATE: &str = r#"On a scale of 0 to 100, how well does this candidate fit this job?

JOB:
{job_summary}

CANDIDATE:
{candidate_summary}"#;
