use bus_debounce::BatchedMessage;
use bus_memory::AmbientRecallBundle;

/// Assembles the text handed to [`bus_invoker::Invoker::invoke`] from an
/// ambient-recall bundle plus the batch of messages being answered.
/// Prompt assembly proper (identity, journal) is out of scope (§1); this
/// is the minimal "context + turn" framing the invoker needs.
pub fn build_prompt(bundle: &AmbientRecallBundle, batch: &[BatchedMessage]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# context\nclock: {}\nunsummarized_count: {}\nmemory_health: {}\n",
        bundle.clock.display, bundle.unsummarized_count, bundle.memory_health
    ));
    if !bundle.summaries.is_empty() {
        out.push_str("\n# recent summaries\n");
        for summary in &bundle.summaries {
            out.push_str(&format!("- {}\n", summary.text));
        }
    }
    if !bundle.results.is_empty() {
        out.push_str("\n# recall\n");
        for result in &bundle.results {
            out.push_str(&format!("- [{}] {}\n", result.source, result.content));
        }
    }

    out.push_str("\n# turn\n");
    for message in batch {
        out.push_str(&format!("{}: {}\n", message.author, message.content));
    }
    out
}

/// Strips the fenced-code and label framing LLM workers sometimes wrap a
/// whole reply in (a leading `Assistant:`/`Reply:` label, or the reply
/// being entirely enclosed in a single fenced code block).
pub fn strip_framing(text: &str) -> String {
    let mut s = text.trim();
    for label in ["assistant:", "reply:"] {
        if let Some(rest) = s.to_lowercase().strip_prefix(label) {
            s = s[s.len() - rest.len()..].trim_start();
        }
    }
    if s.starts_with("```") && s.ends_with("```") && s.len() >= 6 {
        let inner = &s[3..s.len() - 3];
        let inner = inner.strip_prefix('\n').unwrap_or(inner);
        return inner.trim().to_string();
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_framing_removes_label_prefix() {
        assert_eq!(strip_framing("Assistant: hello there"), "hello there");
    }

    #[test]
    fn strip_framing_removes_enclosing_fence() {
        assert_eq!(strip_framing("```\nhello there\n```"), "hello there");
    }

    #[test]
    fn strip_framing_leaves_plain_text_untouched() {
        assert_eq!(strip_framing("hello there"), "hello there");
    }
}
