// Shared prompt fragments. Each stage defines its own prompts next to it
// (see ranking::prompts, fit::prompts); this file holds the cross-cutting pieces.

/// Appended to every stage system prompt so replies stay machine-readable.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON value. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Builds a stage system prompt from a role description and the JSON-only rule.
pub fn system_prompt(role: &str) -> String {
    format!("{role} {JSON_ONLY_SYSTEM}")
}
