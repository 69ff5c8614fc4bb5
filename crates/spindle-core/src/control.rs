//! Removal of engine control tokens from generated text

use crate::stop::partial_suffix_len;

/// Strips a literal control token (e.g. `<|im_end|>`) out of a fragment
/// stream, including occurrences split across fragments.
#[derive(Debug, Clone)]
pub struct ControlTokenFilter {
    token: Option<String>,
    pending: String,
}

impl ControlTokenFilter {
    /// An empty token disables the filter
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.is_empty()).then_some(token),
            pending: String::new(),
        }
    }

    /// Feed one fragment, returning the text that is safe to pass on
    pub fn feed(&mut self, fragment: &str) -> String {
        let Some(token) = self.token.as_deref() else {
            return fragment.to_string();
        };

        self.pending.push_str(fragment);
        while self.pending.contains(token) {
            self.pending = self.pending.replace(token, "");
        }

        let keep = partial_suffix_len(&self.pending, token);
        let split = self.pending.len() - keep;
        let tail = self.pending.split_off(split);
        std::mem::replace(&mut self.pending, tail)
    }

    /// Release whatever tail was held back; it can no longer complete a token
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Remove every occurrence of the token from a complete text
    pub fn strip_all(&self, text: &str) -> String {
        let mut text = text.to_string();
        if let Some(token) = self.token.as_deref() {
            while text.contains(token) {
                text = text.replace(token, "");
            }
        }
        text
    }
}
