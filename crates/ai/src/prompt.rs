//! Detection prompt construction.
//!
//! The prompt enumerates the closed taxonomy verbatim so the model can only
//! answer with types [`piiscan_core::PiiType`] will accept, and numbers the
//! logs so multi-line batches stay unambiguous.

use std::fmt::Write as _;

use piiscan_core::PiiType;

const PREAMBLE: &str = "You are a GDPR compliance assistant. Analyse the application logs below and report every piece of personal data (PII) they contain.";

const INSTRUCTIONS: &str = r#"### Detection rules

- Examine every log entry completely: keys, values, nested objects and arrays. Field names can be indirect or misleading (`usr_email`, `srcIp`, `device_uuid`, `user_metadata`).
- Be exhaustive. One entry can contain several findings of several types; report each one.
- Some entries embed JSON as an escaped string, possibly several layers deep. Decode it recursively and analyse the decoded structure, never the escaped text.
- Use formats, regular patterns and field-name heuristics: e-mail and IP patterns, card and IBAN formats, street/postal formats, device and session identifiers, user-agent and referrer headers.
- Treat fields such as `name`, `owner`, `author`, `created_by` or `submitted_by` holding a capitalised first and last name as `full-name`.
- Special categories (health, biometric, genetic, religious, political, sexual orientation, trade union) count even when the key is vague (`vitals`, `bio`, `face_id`).
- Only use a `type` from the allowed list, exactly and case-sensitively. Skip values that match none."#;

const OUTPUT_FORMAT: &str = r#"### Output

Return a JSON array and nothing else. Each element is an object with:

- `field`: the detected value, verbatim
- `type`: one value from the allowed list
- `source`: one of "log-message", "header", "body", "query-param", "unknown"
- `log_entry`: the complete original log entry the value came from

Always return an array, even for a single result, and `[]` when nothing is found. No markdown fences, no commentary, no stringified output. The answer starts with `[` and ends with `]`.

Example:
[
  {"field": "john@example.com", "type": "email", "source": "log-message"},
  {"field": "10.0.0.2", "type": "ip-address", "source": "log-message"}
]"#;

/// Builds the PII detection prompt for a batch of logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionPrompt;

impl DetectionPrompt {
    pub fn build<S: AsRef<str>>(logs: &[S]) -> String {
        let mut prompt = String::with_capacity(4096 + logs.iter().map(|l| l.as_ref().len() + 8).sum::<usize>());

        prompt.push_str(PREAMBLE);
        prompt.push_str("\n\n### Allowed PII types\n\ntype PIIType =\n");
        prompt.push_str(&Self::taxonomy_union());
        prompt.push_str("\n\n");
        prompt.push_str(INSTRUCTIONS);
        prompt.push_str("\n\n");
        prompt.push_str(OUTPUT_FORMAT);
        prompt.push_str("\n\n### Logs to analyse\n");
        prompt.push_str(&Self::numbered(logs));
        prompt
    }

    /// `  | "full-name"` lines, one per canonical type.
    pub fn taxonomy_union() -> String {
        let mut out = String::new();
        for (i, ty) in PiiType::ALL.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = write!(out, "  | \"{}\"", ty.as_str());
        }
        out.push(';');
        out
    }

    /// `1. first\n2. second`
    pub fn numbered<S: AsRef<str>>(logs: &[S]) -> String {
        let mut out = String::new();
        for (i, log) in logs.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = write!(out, "{}. {}", i + 1, log.as_ref());
        }
        out
    }
}
