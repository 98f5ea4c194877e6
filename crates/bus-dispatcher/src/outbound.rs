use async_trait::async_trait;

use crate::error::Result;

/// Abstracts over wherever a reply actually gets delivered (chat fabric
/// broadcast, terminal echo, …) so the dispatcher stays transport-agnostic,
/// mirroring the `WorkerBackend`/`GraphBackend` trait-at-the-seam pattern
/// used throughout this workspace.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send_reply(&self, channel: &str, chunks: &[String]) -> Result<()>;
}

/// Splits `text` into sequential chunks no longer than `limit` chars,
/// breaking at or before `split_at` within each chunk so a reply doesn't
/// get cut mid-word where avoidable (§4.7 chunking).
pub fn chunk_reply(text: &str, limit: usize, split_at: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining: &str = text;
    while remaining.chars().count() > limit {
        let boundary = find_boundary(remaining, split_at);
        let (head, tail) = remaining.split_at(boundary);
        chunks.push(head.trim_end().to_string());
        remaining = tail.trim_start();
    }
    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

/// Byte offset of the last whitespace at or before `split_at` chars into
/// `s`, falling back to exactly `split_at` chars if none is found.
fn find_boundary(s: &str, split_at: usize) -> usize {
    let char_boundary = s.char_indices().nth(split_at).map(|(i, _)| i).unwrap_or(s.len());
    match s[..char_boundary].rfind(char::is_whitespace) {
        Some(i) if i > 0 => i,
        _ => char_boundary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reply_is_a_single_chunk() {
        assert_eq!(chunk_reply("hello", 2000, 1900), vec!["hello".to_string()]);
    }

    #[test]
    fn oversized_reply_splits_on_whitespace() {
        let text = format!("{} {}", "a".repeat(1900), "b".repeat(200));
        let chunks = chunk_reply(&text, 2000, 1900);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 2000));
        assert_eq!(chunks.concat().replace(' ', ""), text.replace(' ', ""));
    }
}
