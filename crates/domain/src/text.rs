//! Text helpers for platform length limits

/// Platform post length limit, in characters
pub const MAX_POST_CHARS: usize = 280;

/// Split content into thread-sized chunks on line boundaries
///
/// Lines are packed greedily in order, each counted with its trailing newline.
/// A single line is never split: a line longer than `max_chars` becomes its own
/// chunk and is left to the poster's truncation.
pub fn chunk_content(content: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for line in content.split('\n') {
        let line_len = line.chars().count() + 1;

        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(current.join("\n"));
            current.clear();
            current_len = 0;
        }
        current.push(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }

    chunks.retain(|chunk| !chunk.trim().is_empty());
    chunks
}

/// Truncate to at most `max_chars` characters, ending in an ellipsis when cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_content_is_single_chunk() {
        assert_eq!(chunk_content("hello\nworld", 280), vec!["hello\nworld"]);
    }

    #[test]
    fn test_chunks_pack_lines_in_order() {
        let lines: Vec<String> = (0..10).map(|i| format!("{i}{}", "x".repeat(59))).collect();
        let content = lines.join("\n");

        let chunks = chunk_content(&content, 280);

        // 61 chars per line including newline, four fit in 280
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], lines[..4].join("\n"));
        assert_eq!(chunks[1], lines[4..8].join("\n"));
        assert_eq!(chunks[2], lines[8..].join("\n"));
        assert!(chunks.iter().all(|c| c.chars().count() <= 280));
    }

    #[test]
    fn test_long_line_is_never_split() {
        let long = "y".repeat(400);
        let content = format!("intro\n{long}\noutro");

        let chunks = chunk_content(&content, 280);

        assert_eq!(chunks, vec!["intro".to_string(), long, "outro".to_string()]);
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        assert!(chunk_content("", 280).is_empty());
        assert!(chunk_content("\n\n", 280).is_empty());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let text = "é".repeat(300);
        let truncated = truncate_chars(&text, 280);
        assert_eq!(truncated.chars().count(), 280);
        assert!(truncated.ends_with('…'));
        assert_eq!(truncate_chars("short", 280), "short");
    }
}
