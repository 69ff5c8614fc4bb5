//! Stop-sequence matching over accumulated output

/// A stop sequence found in the scanned text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMatch {
    /// Byte offset where the sequence starts
    pub offset: usize,
    /// Index of the matching sequence in declaration order
    pub index: usize,
}

/// Literal stop sequences supplied by the caller.
///
/// When several sequences start at the same earliest offset the one declared
/// first wins.
#[derive(Debug, Clone, Default)]
pub struct StopSequences {
    sequences: Vec<String>,
}

impl StopSequences {
    /// Empty strings are dropped; they would match everywhere.
    pub fn new<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sequences: sequences
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.sequences
    }

    /// Earliest occurrence of any sequence in `text`
    pub fn find_earliest(&self, text: &str) -> Option<StopMatch> {
        self.sequences
            .iter()
            .enumerate()
            .filter_map(|(index, seq)| text.find(seq.as_str()).map(|offset| StopMatch { offset, index }))
            .min_by_key(|m| (m.offset, m.index))
    }

    /// Length of the longest tail of `text` that could still grow into a
    /// stop sequence. That tail must not be delivered yet.
    pub fn holdback_len(&self, text: &str) -> usize {
        self.sequences
            .iter()
            .map(|seq| partial_suffix_len(text, seq))
            .max()
            .unwrap_or(0)
    }

    /// Cut `text` at the earliest stop sequence, returning the match if any
    pub fn truncate(&self, text: &mut String) -> Option<StopMatch> {
        let found = self.find_earliest(text)?;
        text.truncate(found.offset);
        Some(found)
    }
}

/// Longest proper prefix of `needle` that `haystack` ends with.
///
/// Only char-boundary splits of `haystack` are considered, so the returned
/// length can always be used to slice it.
pub(crate) fn partial_suffix_len(haystack: &str, needle: &str) -> usize {
    let longest = needle.len().saturating_sub(1).min(haystack.len());
    (1..=longest)
        .rev()
        .find(|&k| {
            let start = haystack.len() - k;
            haystack.is_char_boundary(start) && needle.starts_with(&haystack[start..])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_sequences_never_match() {
        let stops = StopSequences::default();
        assert!(stops.find_earliest("anything at all").is_none());
        assert_eq!(stops.holdback_len("anything"), 0);
    }

    #[test]
    fn test_earliest_offset_wins() {
        let stops = StopSequences::new(["world", "lo"]);
        let found = stops.find_earliest("hello world").unwrap();
        assert_eq!(found, StopMatch { offset: 3, index: 1 });
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        let stops = StopSequences::new(["abc", "ab"]);
        let found = stops.find_earliest("xxabc").unwrap();
        assert_eq!(found, StopMatch { offset: 2, index: 0 });
    }

    #[test]
    fn test_truncate_drops_sequence_and_rest() {
        let stops = StopSequences::new(["STOP"]);
        let mut text = "abSTOP cd STOP".to_string();
        assert!(stops.truncate(&mut text).is_some());
        assert_eq!(text, "ab");
    }

    #[test]
    fn test_empty_sequences_are_ignored() {
        let stops = StopSequences::new(["", "x"]);
        assert_eq!(stops.as_slice(), &["x".to_string()]);
    }

    #[test]
    fn test_holdback_covers_partial_sequence() {
        let stops = StopSequences::new(["STOP", "\n\n"]);
        assert_eq!(stops.holdback_len("abST"), 2);
        assert_eq!(stops.holdback_len("ab\n"), 1);
        assert_eq!(stops.holdback_len("abSX"), 0);
    }

    #[test]
    fn test_partial_suffix_respects_char_boundaries() {
        assert_eq!(partial_suffix_len("héllo <th", "<think>"), 3);
        assert_eq!(partial_suffix_len("é", "éa"), 2);
        assert_eq!(partial_suffix_len("", "<think>"), 0);
    }
}
