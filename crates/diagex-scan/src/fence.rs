//! Fenced code block extraction for Markdown containers.
//!
//! Fences follow `CommonMark`: three or more backticks or tildes open a block;
//! the closing fence uses the same character, is at least as long as the
//! opener and carries nothing but whitespace after it. Body lines are kept
//! verbatim, including their indentation.

/// A fenced block found in a document.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FencedBlock {
    /// First word of the info string (`mermaid` in ` ```mermaid title="x" `).
    pub language: String,
    /// Lines between the fences, joined with `\n`.
    pub body: String,
    /// 1-based line number of the first body line.
    pub start_line: usize,
    /// 1-based line number of the last body line.
    pub end_line: usize,
}

struct OpenFence {
    fence_char: char,
    fence_len: usize,
    language: String,
    start_line: usize,
    lines: Vec<String>,
}

impl OpenFence {
    fn finish(self, end_line: usize) -> FencedBlock {
        FencedBlock {
            language: self.language,
            body: self.lines.join("\n"),
            start_line: self.start_line,
            end_line,
        }
    }
}

/// Collect every fenced block in `content`.
///
/// An unterminated fence runs to the end of the document.
pub(crate) fn fenced_blocks(content: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;
    let mut line_count = 0;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        line_count = line_no;
        let trimmed = line.trim_start();

        match open.take() {
            Some(fence) => {
                if is_closing_fence(trimmed, fence.fence_char, fence.fence_len) {
                    blocks.push(fence.finish(line_no - 1));
                } else {
                    let mut fence = fence;
                    fence.lines.push(line.to_owned());
                    open = Some(fence);
                }
            }
            None => {
                if let Some((fence_char, fence_len)) = detect_fence(trimmed) {
                    let info = trimmed[fence_len..].trim();
                    open = Some(OpenFence {
                        fence_char,
                        fence_len,
                        language: info.split_whitespace().next().unwrap_or_default().to_owned(),
                        start_line: line_no + 1,
                        lines: Vec::new(),
                    });
                }
            }
        }
    }

    if let Some(fence) = open {
        blocks.push(fence.finish(line_count));
    }

    blocks
}

/// Detect an opening fence, returning its character and length.
fn detect_fence(trimmed: &str) -> Option<(char, usize)> {
    let first = trimmed.chars().next()?;
    if first != '`' && first != '~' {
        return None;
    }

    let count = trimmed.chars().take_while(|&c| c == first).count();
    // Backtick info strings may not contain backticks.
    if count < 3 || (first == '`' && trimmed[count..].contains('`')) {
        return None;
    }
    Some((first, count))
}

fn is_closing_fence(trimmed: &str, fence_char: char, min_len: usize) -> bool {
    let count = trimmed.chars().take_while(|&c| c == fence_char).count();
    count >= min_len && trimmed[count..].chars().all(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_block_with_line_span() {
        let doc = "# Title\n\n```mermaid\ngraph TD\n  A --> B\n```\n";
        let blocks = fenced_blocks(doc);

        assert_eq!(
            blocks,
            vec![FencedBlock {
                language: "mermaid".to_owned(),
                body: "graph TD\n  A --> B".to_owned(),
                start_line: 4,
                end_line: 5,
            }]
        );
    }

    #[test]
    fn test_indentation_preserved() {
        let doc = "```mermaid\nflowchart LR\n    subgraph s\n\tA --> B\n    end\n```";
        let blocks = fenced_blocks(doc);
        assert_eq!(blocks[0].body, "flowchart LR\n    subgraph s\n\tA --> B\n    end");
    }

    #[test]
    fn test_tilde_and_longer_fences() {
        let doc = "~~~mermaid\npie\n~~~\n````mermaid\n```\nstill inside\n````";
        let blocks = fenced_blocks(doc);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].body, "pie");
        assert_eq!(blocks[1].body, "```\nstill inside");
    }

    #[test]
    fn test_mixed_fence_chars_do_not_close() {
        let doc = "```mermaid\ngraph TD\n~~~\n```";
        let blocks = fenced_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].body, "graph TD\n~~~");
    }

    #[test]
    fn test_info_string_first_word() {
        let doc = "```mermaid title=\"x\"\npie\n```\n```rust\nfn main() {}\n```\n```\nplain\n```";
        let languages: Vec<_> = fenced_blocks(doc).into_iter().map(|b| b.language).collect();
        assert_eq!(languages, vec!["mermaid", "rust", ""]);
    }

    #[test]
    fn test_unterminated_fence_runs_to_end() {
        let doc = "intro\n```mermaid\ngraph TD\n  A --> B";
        let blocks = fenced_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].body, "graph TD\n  A --> B");
        assert_eq!((blocks[0].start_line, blocks[0].end_line), (3, 4));
    }

    #[test]
    fn test_closing_fence_with_trailing_text_is_body() {
        let doc = "```mermaid\ngraph TD\n``` not a close\n```";
        let blocks = fenced_blocks(doc);
        assert_eq!(blocks[0].body, "graph TD\n``` not a close");
    }
}
