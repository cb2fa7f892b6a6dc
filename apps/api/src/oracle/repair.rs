//! Permissive JSON recovery for oracle replies.
//!
//! Order of attempts: strict parse of the fence-stripped text, strict parse of the
//! outermost JSON block, then a repair pass over that block. Anything still unparseable
//! is reported as an error string and the caller treats the stage as failed.

use serde_json::Value;

/// Parses `raw` into JSON, repairing common model mistakes along the way.
pub fn parse_lenient(raw: &str) -> Result<Value, String> {
    let text = strip_json_fences(raw);
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }

    let block = extract_json_block(text).ok_or_else(|| "No JSON block found".to_string())?;
    if let Ok(v) = serde_json::from_str::<Value>(block) {
        return Ok(v);
    }

    let repaired = repair_json(block);
    serde_json::from_str::<Value>(&repaired).map_err(|e| format!("unrepairable JSON: {e}"))
}

/// Strips ```json ... ``` or ``` ... ``` code fences, including prose before the fence.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

/// Returns the slice from the first `[` or `{` to the last matching closer.
/// An unterminated block (truncated output) runs to the end of the text.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let closer = if text[start..].starts_with('[') { ']' } else { '}' };
    match text.rfind(closer) {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

/// Repairs near-valid JSON: trailing commas, smart quotes, raw newlines inside strings,
/// Python literals, and unclosed strings/brackets from truncated output.
pub fn repair_json(input: &str) -> String {
    let normalized: String = input
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            _ => c,
        })
        .collect();

    let chars: Vec<char> = normalized.chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
            } else if c == '\\' {
                escaped = true;
                out.push(c);
            } else if c == '"' {
                in_string = false;
                out.push(c);
            } else if c == '\n' {
                out.push_str("\\n");
            } else if c == '\r' || c == '\t' {
                out.push(' ');
            } else {
                out.push(c);
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                    trim_trailing_comma(&mut out);
                    out.push(c);
                }
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']') | None) {
                    out.push(c);
                }
            }
            c if c.is_ascii_alphabetic() => {
                let word: String = chars[i..]
                    .iter()
                    .take_while(|ch| ch.is_ascii_alphanumeric() || **ch == '_')
                    .collect();
                let replacement = match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                };
                out.push_str(replacement);
                i += word.chars().count();
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    trim_dangling(&mut out);
    while let Some(closer) = stack.pop() {
        trim_trailing_comma(&mut out);
        out.push(closer);
    }
    out
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

/// Drops a dangling `"key":` or `,` left behind by truncation.
fn trim_dangling(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(':') {
        out.pop();
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.ends_with('"') {
            out.pop();
            if let Some(open) = out.rfind('"') {
                out.truncate(open);
            }
        }
    }
    trim_trailing_comma(out);
}
