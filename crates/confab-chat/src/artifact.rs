//! Incremental extraction of artifact blocks from streamed assistant text.
//!
//! An artifact block looks like:
//!
//! ```text
//! <artifact identifier="fib" type="application/code" title="Fibonacci" language="python">
//! def fib(n): ...
//! </artifact>
//! ```
//!
//! The parser is fed the cumulative assistant text after every delta. It
//! keeps a cursor into that text and holds back any suffix that could still
//! turn into a start or end marker, so partial markup never reaches
//! artifact content and content only ever grows.

use confab_core::types::{Artifact, ArtifactType};

const OPEN_TAG: &str = "<artifact";
const CLOSE_TAG: &str = "</artifact>";

/// One piece of a finished message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text(String),
    Artifact(Artifact),
}

#[derive(Debug)]
struct OpenBlock {
    artifact: Artifact,
    content_start: usize,
    /// Tail of the body held back as a possible end marker.
    held: String,
}

/// Streaming artifact parser for a single assistant message.
///
/// Create one per turn; the text passed to [`ArtifactParser::update`] must
/// extend the text passed on the previous call.
#[derive(Debug, Default)]
pub struct ArtifactParser {
    cursor: usize,
    opened: usize,
    open: Option<OpenBlock>,
    current: Option<Artifact>,
}

impl ArtifactParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently opened artifact of this message, if any.
    pub fn current(&self) -> Option<&Artifact> {
        self.current.as_ref()
    }

    /// Whether a block is open and still receiving content.
    pub fn is_generating(&self) -> bool {
        self.open.is_some()
    }

    /// Consume the cumulative text. Returns the current artifact when it
    /// changed during this call.
    pub fn update(&mut self, text: &str) -> Option<Artifact> {
        let mut changed = false;

        loop {
            if let Some(mut open) = self.open.take() {
                let body = &text[open.content_start..];
                match body.find(CLOSE_TAG) {
                    Some(end) => {
                        open.artifact.content = block_content(&body[..end]).to_string();
                        open.artifact.generating = false;
                        self.cursor = open.content_start + end + CLOSE_TAG.len();
                        self.current = Some(open.artifact);
                        changed = true;
                        continue;
                    }
                    None => {
                        let safe = body.len() - partial_suffix_len(body, CLOSE_TAG);
                        let content = block_content(&body[..safe]);
                        if content != open.artifact.content {
                            open.artifact.content = content.to_string();
                            self.current = Some(open.artifact.clone());
                            changed = true;
                        }
                        open.held = body[safe..].to_string();
                        self.open = Some(open);
                        break;
                    }
                }
            }

            match find_start_tag(text, self.cursor) {
                TagScan::Found { end, attrs, .. } => {
                    self.opened += 1;
                    let artifact = artifact_from_attrs(&attrs, self.opened);
                    tracing::debug!(id = %artifact.id, kind = ?artifact.kind, "Artifact opened");
                    self.current = Some(artifact.clone());
                    self.open = Some(OpenBlock {
                        artifact,
                        content_start: end,
                        held: String::new(),
                    });
                    changed = true;
                }
                TagScan::Partial(start) => {
                    self.cursor = start;
                    break;
                }
                TagScan::Absent => {
                    let rest = &text[self.cursor..];
                    self.cursor = text.len() - partial_suffix_len(rest, OPEN_TAG);
                    break;
                }
            }
        }

        if changed {
            self.current.clone()
        } else {
            None
        }
    }

    /// Close an unterminated block at end of stream. The text held back as a
    /// possible end marker never completed one, so it becomes content; the
    /// result matches [`extract_all`] on the same text.
    pub fn finish(&mut self) -> Option<Artifact> {
        let open = self.open.take()?;
        let mut artifact = open.artifact;
        // `held` is a prefix of the end marker and never holds the newline
        // that `block_content` strips, so appending it is exact.
        artifact.content.push_str(&open.held);
        artifact.generating = false;
        self.current = Some(artifact.clone());
        Some(artifact)
    }
}

/// Split a finished message into ordered text and artifact parts.
pub fn split_parts(text: &str) -> Vec<MessagePart> {
    let mut parts = Vec::new();
    let mut cursor = 0;
    let mut opened = 0;

    loop {
        match find_start_tag(text, cursor) {
            TagScan::Found { start, end, attrs } => {
                push_text(&mut parts, &text[cursor..start]);
                opened += 1;

                let mut artifact = artifact_from_attrs(&attrs, opened);
                let body = &text[end..];
                let (content, next) = match body.find(CLOSE_TAG) {
                    Some(i) => (&body[..i], end + i + CLOSE_TAG.len()),
                    None => (body, text.len()),
                };
                artifact.content = block_content(content).to_string();
                artifact.generating = false;
                parts.push(MessagePart::Artifact(artifact));
                cursor = next;
            }
            TagScan::Partial(_) | TagScan::Absent => {
                push_text(&mut parts, &text[cursor..]);
                return parts;
            }
        }
    }
}

/// All artifacts of a finished message, in order.
pub fn extract_all(text: &str) -> Vec<Artifact> {
    split_parts(text)
        .into_iter()
        .filter_map(|part| match part {
            MessagePart::Artifact(artifact) => Some(artifact),
            MessagePart::Text(_) => None,
        })
        .collect()
}

// =============================================================================
// Scanning helpers
// =============================================================================

enum TagScan {
    /// A complete start tag; `end` is the byte just past its `>`.
    Found {
        start: usize,
        end: usize,
        attrs: Vec<(String, String)>,
    },
    /// A start tag begins at this offset but is not complete yet.
    Partial(usize),
    Absent,
}

fn find_start_tag(text: &str, from: usize) -> TagScan {
    let mut search = from;
    while let Some(rel) = text[search..].find(OPEN_TAG) {
        let start = search + rel;
        let after = start + OPEN_TAG.len();
        match text[after..].chars().next() {
            None => return TagScan::Partial(start),
            Some(c) if c == '>' || c.is_whitespace() => {
                return match find_tag_end(text, after) {
                    Some(gt) => TagScan::Found {
                        start,
                        end: gt + 1,
                        attrs: parse_attributes(&text[after..gt]),
                    },
                    None => TagScan::Partial(start),
                };
            }
            // `<artifacts`, `<artifact-list` and the like are prose.
            Some(_) => search = after,
        }
    }
    TagScan::Absent
}

/// Index of the `>` closing a start tag, skipping quoted attribute values.
///
/// A quote opens a value only where `parse_attributes` would read one: after
/// `=` and optional whitespace.
fn find_tag_end(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut after_eq = false;
    for (i, c) in text[from..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && after_eq => quote = Some(c),
            None if c == '>' => return Some(from + i),
            None => {}
        }
        if c == '=' && quote.is_none() {
            after_eq = true;
        } else if !c.is_whitespace() {
            after_eq = false;
        }
    }
    None
}

fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = raw.trim_start();

    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            if !name.is_empty() {
                attrs.push((name, String::new()));
            }
            continue;
        };

        let after_eq = after_eq.trim_start();
        let (value, remaining) = match after_eq.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let quoted = &after_eq[1..];
                match quoted.find(q) {
                    Some(i) => (&quoted[..i], &quoted[i + 1..]),
                    None => (quoted, ""),
                }
            }
            _ => {
                let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };

        attrs.push((name, value.to_string()));
        rest = remaining.trim_start();
    }

    attrs
}

fn artifact_from_attrs(attrs: &[(String, String)], ordinal: usize) -> Artifact {
    let get = |names: &[&str]| {
        attrs
            .iter()
            .find(|(name, value)| names.contains(&name.as_str()) && !value.is_empty())
            .map(|(_, value)| value.clone())
    };

    let language = get(&["language", "lang"]);
    let kind = match get(&["type"]) {
        Some(raw) => ArtifactType::parse(&raw),
        None if language.is_some() => ArtifactType::Code,
        None => ArtifactType::Other,
    };

    Artifact {
        id: get(&["identifier", "id"]).unwrap_or_else(|| format!("artifact-{}", ordinal)),
        kind,
        title: get(&["title"]).unwrap_or_default(),
        language,
        content: String::new(),
        generating: true,
    }
}

/// A single newline right after the start tag belongs to the markup.
fn block_content(body: &str) -> &str {
    body.strip_prefix('\n').unwrap_or(body)
}

/// Length of the longest proper prefix of `marker` that `text` ends with.
///
/// `marker` is ASCII, so the returned split point is always a char boundary.
fn partial_suffix_len(text: &str, marker: &str) -> usize {
    let max = (marker.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|&k| text.as_bytes().ends_with(&marker.as_bytes()[..k]))
        .unwrap_or(0)
}

fn push_text(parts: &mut Vec<MessagePart>, text: &str) {
    if !text.is_empty() {
        parts.push(MessagePart::Text(text.to_string()));
    }
}
