//! Token normalizer: raw agent output units in, clean visible text out.
//!
//! Per turn it strips hidden-reasoning spans (`<think>...</think>`, which may
//! straddle units), drops the tool echo that follows a tool call, drops noise
//! units and repeated units, and trims the visible text. Whitespace between
//! two visible fragments is carried to the front of the later fragment, so the
//! concatenated output never gains or loses interior spacing.

use everbrowser_ai::{RawUnit, RawUnitStream, Result};
use futures::{Stream, StreamExt};

pub const REASONING_OPEN: &str = "<think>";
pub const REASONING_CLOSE: &str = "</think>";

/// One normalized output item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Visible text for the client
    Text(String),
    /// A tool call was seen; its echo will be suppressed
    ToolSuppressed { tool: String },
}

/// Stateful filter for one agent turn. Create a fresh one per attempt.
#[derive(Debug, Default)]
pub struct TokenNormalizer {
    in_reasoning: bool,
    suppress_next: bool,
    previous: Option<String>,
    emitted_any: bool,
    /// Whitespace waiting to be placed in front of the next visible text
    pending_space: String,
}

impl TokenNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one raw unit; returns what, if anything, reaches the client.
    pub fn push(&mut self, unit: &RawUnit) -> Option<Fragment> {
        match unit {
            RawUnit::ToolCallDelta { text, call } => {
                self.suppress_next = true;
                self.previous = Some(text.clone());
                Some(Fragment::ToolSuppressed {
                    tool: call.name.clone(),
                })
            }
            RawUnit::TextDelta { text } => {
                if std::mem::take(&mut self.suppress_next) {
                    tracing::trace!(len = text.len(), "Suppressed tool echo");
                    self.previous = Some(text.clone());
                    return None;
                }
                if self.previous.as_deref() == Some(text.as_str()) {
                    return None;
                }
                self.previous = Some(text.clone());

                let visible = split_reasoning(text, &mut self.in_reasoning);
                self.visible_fragment(&visible).map(Fragment::Text)
            }
        }
    }

    fn visible_fragment(&mut self, visible: &str) -> Option<String> {
        let core = visible.trim();
        if core.is_empty() {
            if self.emitted_any {
                self.pending_space.push_str(visible);
            }
            return None;
        }
        if is_noise(core) {
            return None;
        }

        let mut fragment = String::new();
        if self.emitted_any {
            fragment.push_str(&self.pending_space);
            fragment.push_str(leading_whitespace(visible));
        }
        fragment.push_str(core);

        self.pending_space = trailing_whitespace(visible).to_string();
        self.emitted_any = true;
        Some(fragment)
    }

    /// Adapt a raw unit stream into a fragment stream.
    pub fn normalize(mut units: RawUnitStream) -> impl Stream<Item = Result<Fragment>> + Send {
        async_stream::stream! {
            let mut normalizer = TokenNormalizer::new();
            while let Some(unit) = units.next().await {
                match unit {
                    Ok(unit) => {
                        if let Some(fragment) = normalizer.push(&unit) {
                            yield Ok(fragment);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    }
}

/// Remove hidden-reasoning spans from a complete text.
///
/// Text before a lone closing marker and after a lone opening marker is
/// treated as reasoning.
pub fn strip_reasoning(text: &str) -> String {
    let mut in_reasoning = false;
    split_reasoning(text, &mut in_reasoning)
}

fn split_reasoning(text: &str, in_reasoning: &mut bool) -> String {
    let mut visible = String::new();
    let mut rest = text;

    loop {
        if *in_reasoning {
            match rest.find(REASONING_CLOSE) {
                Some(idx) => {
                    *in_reasoning = false;
                    rest = &rest[idx + REASONING_CLOSE.len()..];
                }
                None => break,
            }
            continue;
        }

        let open = rest.find(REASONING_OPEN);
        let close = rest.find(REASONING_CLOSE);
        match (open, close) {
            (Some(o), c) if c.is_none_or(|c| o < c) => {
                visible.push_str(&rest[..o]);
                *in_reasoning = true;
                rest = &rest[o + REASONING_OPEN.len()..];
            }
            (_, Some(c)) => {
                // Lone closing marker: the opener came before this turn's output
                rest = &rest[c + REASONING_CLOSE.len()..];
            }
            _ => {
                visible.push_str(rest);
                break;
            }
        }
    }

    visible
}

/// Malformed model output that must not reach the client
fn is_noise(trimmed: &str) -> bool {
    trimmed.starts_with("```") || trimmed.starts_with("</")
}

fn leading_whitespace(s: &str) -> &str {
    &s[..s.len() - s.trim_start().len()]
}

fn trailing_whitespace(s: &str) -> &str {
    &s[s.trim_end().len()..]
}
