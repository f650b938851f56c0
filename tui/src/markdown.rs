//! Splits a message into prose and fenced code regions.
//!
//! Code regions are rendered verbatim with a language header and can be copied
//! to the clipboard; prose goes through the markdown renderer. A fence that
//! has not been closed yet (the reply is still streaming) runs to the end of
//! the message.

use localchat_core::protocol::Message;
use localchat_core::protocol::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Prose(String),
    Code {
        language: Option<String>,
        code: String,
    },
}

struct Fence {
    marker: char,
    len: usize,
}

fn parse_fence(line: &str) -> Option<(Fence, &str)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    Some((Fence { marker, len }, trimmed[len..].trim()))
}

fn closes(fence: &Fence, line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= fence.len && trimmed.chars().all(|c| c == fence.marker)
}

pub(crate) fn split_segments(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut prose = String::new();
    let mut open: Option<(Fence, Option<String>, String)> = None;

    for line in content.split_inclusive('\n') {
        match open.as_mut() {
            Some((fence, _, code)) => {
                if closes(fence, line) {
                    if let Some((_, language, code)) = open.take() {
                        segments.push(code_segment(language, code));
                    }
                } else {
                    code.push_str(line);
                }
            }
            None => match parse_fence(line) {
                Some((fence, info)) => {
                    push_prose(&mut segments, std::mem::take(&mut prose));
                    let language = info
                        .split_whitespace()
                        .next()
                        .map(str::to_string);
                    open = Some((fence, language, String::new()));
                }
                None => prose.push_str(line),
            },
        }
    }

    if let Some((_, language, code)) = open {
        segments.push(code_segment(language, code));
    }
    push_prose(&mut segments, prose);
    segments
}

fn code_segment(language: Option<String>, mut code: String) -> Segment {
    if code.ends_with('\n') {
        code.pop();
    }
    Segment::Code { language, code }
}

fn push_prose(segments: &mut Vec<Segment>, prose: String) {
    if !prose.trim().is_empty() {
        segments.push(Segment::Prose(prose));
    }
}

/// The most recent code block in any assistant reply.
pub(crate) fn last_code_block(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| {
            split_segments(&m.content)
                .into_iter()
                .rev()
                .find_map(|segment| match segment {
                    Segment::Code { code, .. } => Some(code),
                    Segment::Prose(_) => None,
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_prose_and_code() {
        let content = "Here you go:\n```rust\nfn main() {}\n```\nDone.";
        assert_eq!(
            split_segments(content),
            vec![
                Segment::Prose("Here you go:\n".to_string()),
                Segment::Code {
                    language: Some("rust".to_string()),
                    code: "fn main() {}".to_string(),
                },
                Segment::Prose("Done.".to_string()),
            ]
        );
    }

    #[test]
    fn fence_without_language() {
        assert_eq!(
            split_segments("```\nls -la\n```"),
            vec![Segment::Code {
                language: None,
                code: "ls -la".to_string(),
            }]
        );
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        assert_eq!(
            split_segments("Try:\n```python\nprint(1)\nprint("),
            vec![
                Segment::Prose("Try:\n".to_string()),
                Segment::Code {
                    language: Some("python".to_string()),
                    code: "print(1)\nprint(".to_string(),
                },
            ]
        );
    }

    #[test]
    fn shorter_fence_does_not_close_longer_one() {
        let content = "````md\n```js\nx\n```\n````";
        assert_eq!(
            split_segments(content),
            vec![Segment::Code {
                language: Some("md".to_string()),
                code: "```js\nx\n```".to_string(),
            }]
        );
    }

    #[test]
    fn last_code_block_skips_user_messages() {
        let messages = vec![
            Message::user("```\nmine\n```"),
            Message::assistant("a\n```\nfirst\n```\nb\n```sh\nsecond\n```"),
            Message::user("thanks"),
        ];
        assert_eq!(last_code_block(&messages), Some("second".to_string()));
        assert_eq!(last_code_block(&[Message::assistant("no code")]), None);
    }
}
