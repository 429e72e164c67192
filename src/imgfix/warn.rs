use crate::error::ErrorCode;

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if !ch.is_control() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WarnEvent<'a> {
    pub code: ErrorCode,
    pub stage: &'a str,
    pub action: &'a str,
    pub document: &'a str,
    pub reference: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

/// One structured warning per recoverable failure.
pub fn emit(event: WarnEvent<'_>) {
    tracing::warn!(
        code = event.code.as_str(),
        stage = %sanitize_value(event.stage),
        action = %sanitize_value(event.action),
        document = %sanitize_value(event.document),
        reference = %sanitize_value(event.reference),
        reason = %sanitize_value(event.reason),
        err = %sanitize_value(event.err),
        "recoverable failure"
    );
}
