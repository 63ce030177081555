//! Transcript assembly from streaming provider fragments.

/// Accumulates finalized transcript segments and tracks the latest
/// not-yet-final fragment.
///
/// Streaming providers do not guarantee a final result before a manually
/// requested close, so stop-time assembly falls back to the last interim
/// fragment rather than dropping dictated text. The raw transcript may
/// therefore end in a truncated word; that is the intended trade-off.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    finalized: Vec<String>,
    latest: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound fragment. `latest` is overwritten on every event;
    /// finalized segments are append-only and preserve arrival order.
    pub fn push(&mut self, text: &str, is_final: bool) {
        self.latest = text.to_string();
        if is_final {
            self.finalized.push(text.to_string());
        }
    }

    /// True when nothing usable has been captured.
    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.latest.trim().is_empty()
    }

    pub fn finalized_segments(&self) -> &[String] {
        &self.finalized
    }

    pub fn latest_segment(&self) -> &str {
        &self.latest
    }

    pub fn reset(&mut self) {
        self.finalized.clear();
        self.latest.clear();
    }

    /// Best-effort raw transcript at stop time.
    ///
    /// Joins finalized segments with single spaces; when the latest interim
    /// fragment carries words the join does not already contain, they are
    /// merged onto the tail (overlapping words are not repeated). Returns
    /// `None` when no speech was captured at all.
    pub fn assemble(&self) -> Option<String> {
        let joined = self
            .finalized
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let raw = merge_tail(&joined, self.latest.trim());
        if raw.is_empty() {
            None
        } else {
            Some(raw)
        }
    }
}

/// Merge the latest interim fragment onto the joined finals.
///
/// If the fragment is already a substring of the join it is dropped;
/// otherwise only the words past the longest join-suffix/fragment-prefix
/// overlap are appended, so a fragment restating the last final does not
/// duplicate it.
fn merge_tail(joined: &str, latest: &str) -> String {
    if latest.is_empty() {
        return joined.to_string();
    }
    if joined.is_empty() {
        return latest.to_string();
    }
    if joined.contains(latest) {
        return joined.to_string();
    }

    let joined_words: Vec<&str> = joined.split_whitespace().collect();
    let latest_words: Vec<&str> = latest.split_whitespace().collect();
    let max_overlap = joined_words.len().min(latest_words.len());

    let mut overlap = 0;
    for k in (1..=max_overlap).rev() {
        if joined_words[joined_words.len() - k..] == latest_words[..k] {
            overlap = k;
            break;
        }
    }

    let mut out = joined.to_string();
    for word in &latest_words[overlap..] {
        out.push(' ');
        out.push_str(word);
    }
    out
}
