//! Extraction of a delimited reasoning section from streamed text
//!
//! Engines such as DeepSeek R1 wrap their chain of thought in a marker pair
//! (`<think>` ... `</think>`). The extractor keeps that section out of the
//! visible text and hands it back once, as a single payload, after the close
//! marker arrives. Markers may be split across fragments in any way; text that
//! could still turn out to be part of a marker is buffered rather than emitted.

use crate::stop::partial_suffix_len;

/// Where the extractor is relative to the reasoning section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningState {
    /// Looking for the open marker; text is visible
    Idle,
    /// Between the markers; nothing is visible
    Inside,
    /// Section closed; everything passes through
    Done,
}

/// What one call to the extractor produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningOutput {
    pub visible: String,
    pub reasoning: Option<String>,
}

impl ReasoningOutput {
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty() && self.reasoning.is_none()
    }

    pub(crate) fn absorb(&mut self, other: ReasoningOutput) {
        self.visible.push_str(&other.visible);
        if other.reasoning.is_some() {
            self.reasoning = other.reasoning;
        }
    }
}

/// Per-request reasoning scanner. Never shared between requests.
#[derive(Debug, Clone)]
pub struct ReasoningExtractor {
    open: String,
    close: String,
    state: ReasoningState,
    buffer: String,
    // Inside: byte offset in `buffer` before which the close marker cannot start
    search_from: usize,
    // Done: still dropping whitespace that directly follows the close marker
    trim_leading: bool,
}

impl ReasoningExtractor {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
            state: ReasoningState::Idle,
            buffer: String::new(),
            search_from: 0,
            trim_leading: false,
        }
    }

    pub fn state(&self) -> ReasoningState {
        self.state
    }

    /// Feed the next piece of text
    pub fn feed(&mut self, text: &str) -> ReasoningOutput {
        let mut out = ReasoningOutput::default();
        if text.is_empty() {
            return out;
        }

        match self.state {
            ReasoningState::Done => {
                out.visible = self.pass_through(text);
                return out;
            }
            ReasoningState::Idle | ReasoningState::Inside => self.buffer.push_str(text),
        }

        loop {
            match self.state {
                ReasoningState::Idle => match self.buffer.find(self.open.as_str()) {
                    Some(pos) => {
                        out.visible.push_str(&self.buffer[..pos]);
                        self.buffer.replace_range(..pos + self.open.len(), "");
                        self.search_from = 0;
                        self.state = ReasoningState::Inside;
                    }
                    None => {
                        let keep = partial_suffix_len(&self.buffer, &self.open);
                        let emit = self.buffer.len() - keep;
                        out.visible.extend(self.buffer.drain(..emit));
                        return out;
                    }
                },
                ReasoningState::Inside => {
                    let found = self.buffer[self.search_from..]
                        .find(self.close.as_str())
                        .map(|pos| pos + self.search_from);
                    match found {
                        Some(pos) => {
                            let rest = self.buffer.split_off(pos + self.close.len());
                            self.buffer.truncate(pos);
                            out.reasoning = take_payload(&mut self.buffer);
                            self.state = ReasoningState::Done;
                            self.trim_leading = true;
                            out.visible.push_str(&self.pass_through(&rest));
                            return out;
                        }
                        None => {
                            let floor = self.buffer.len().saturating_sub(self.close.len().saturating_sub(1));
                            self.search_from = floor_char_boundary(&self.buffer, floor);
                            return out;
                        }
                    }
                }
                ReasoningState::Done => return out,
            }
        }
    }

    /// Flush at end of generation.
    ///
    /// A withheld partial open marker becomes visible text. An unterminated
    /// reasoning section is delivered as the payload.
    pub fn finish(&mut self) -> ReasoningOutput {
        let mut out = ReasoningOutput::default();
        match self.state {
            ReasoningState::Idle => out.visible = std::mem::take(&mut self.buffer),
            ReasoningState::Inside => out.reasoning = take_payload(&mut self.buffer),
            ReasoningState::Done => {}
        }
        self.state = ReasoningState::Done;
        out
    }

    /// Run a complete text through the extractor in one pass
    pub fn extract_all(&mut self, text: &str) -> ReasoningOutput {
        let mut out = self.feed(text);
        out.absorb(self.finish());
        out
    }

    fn pass_through(&mut self, text: &str) -> String {
        if !self.trim_leading {
            return text.to_string();
        }
        let trimmed = text.trim_start();
        if !trimmed.is_empty() {
            self.trim_leading = false;
        }
        trimmed.to_string()
    }
}

fn take_payload(buffer: &mut String) -> Option<String> {
    let payload = std::mem::take(buffer);
    let payload = payload.trim();
    (!payload.is_empty()).then(|| payload.to_string())
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn think() -> ReasoningExtractor {
        ReasoningExtractor::new("<think>", "</think>")
    }

    fn feed_all(extractor: &mut ReasoningExtractor, pieces: &[&str]) -> ReasoningOutput {
        let mut out = ReasoningOutput::default();
        for piece in pieces {
            out.absorb(extractor.feed(piece));
        }
        out.absorb(extractor.finish());
        out
    }

    #[test]
    fn test_split_markers() {
        let mut extractor = think();
        let out = feed_all(&mut extractor, &["<thi", "nk>reason", "ing</th", "ink>answer"]);
        assert_eq!(out.reasoning.as_deref(), Some("reasoning"));
        assert_eq!(out.visible, "answer");
    }

    #[test]
    fn test_nothing_leaks_while_inside() {
        let mut extractor = think();
        assert!(extractor.feed("<think>").is_empty());
        assert_eq!(extractor.state(), ReasoningState::Inside);
        assert!(extractor.feed("step one </thi").is_empty());
        let out = extractor.feed("nk>\n\nfinal");
        assert_eq!(out.reasoning.as_deref(), Some("step one"));
        assert_eq!(out.visible, "final");
        assert_eq!(extractor.state(), ReasoningState::Done);
    }

    #[test]
    fn test_text_before_open_marker_is_visible() {
        let mut extractor = think();
        let out = extractor.feed("intro <think>hidden</think> outro");
        assert_eq!(out.visible, "intro outro");
        assert_eq!(out.reasoning.as_deref(), Some("hidden"));
    }

    #[test]
    fn test_partial_open_marker_is_withheld_then_released() {
        let mut extractor = think();
        assert_eq!(extractor.feed("a <th").visible, "a ");
        assert_eq!(extractor.feed("e end").visible, "<the end");
        assert!(extractor.finish().is_empty());
    }

    #[test]
    fn test_done_is_passthrough() {
        let mut extractor = think();
        extractor.feed("<think>x</think>");
        assert_eq!(extractor.feed("  <think>again").visible, "<think>again");
        assert_eq!(extractor.feed(" more").visible, " more");
    }

    #[test]
    fn test_whitespace_after_close_dropped_across_fragments() {
        let mut extractor = think();
        let out = feed_all(&mut extractor, &["<think>r</think>", "\n", "\n", "answer text"]);
        assert_eq!(out.visible, "answer text");
    }

    #[test]
    fn test_unterminated_section_becomes_reasoning() {
        let mut extractor = think();
        let out = feed_all(&mut extractor, &["<think>still going"]);
        assert_eq!(out.reasoning.as_deref(), Some("still going"));
        assert_eq!(out.visible, "");
    }

    #[test]
    fn test_empty_section_yields_no_payload() {
        let mut extractor = think();
        let out = extractor.extract_all("<think>  </think>hi");
        assert_eq!(out.reasoning, None);
        assert_eq!(out.visible, "hi");
    }

    #[test]
    fn test_no_markers() {
        let mut extractor = think();
        let out = extractor.extract_all("plain answer");
        assert_eq!(out.visible, "plain answer");
        assert!(out.reasoning.is_none());
    }

    #[test]
    fn test_multibyte_content_inside() {
        let mut extractor = think();
        let out = feed_all(&mut extractor, &["<think>思考", "中</", "think>答案"]);
        assert_eq!(out.reasoning.as_deref(), Some("思考中"));
        assert_eq!(out.visible, "答案");
    }
}
