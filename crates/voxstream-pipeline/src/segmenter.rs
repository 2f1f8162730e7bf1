//! Incremental sentence segmenter.
//!
//! Consumes raw LLM fragments as they stream in and emits [`Utterance`]s
//! once a speakable boundary is known. The segmenter owns the only mutable
//! residual buffer in the pipeline and is driven from a single task
//! (the controller's `&mut self`), so it needs no locking.
//!
//! Boundary rules:
//! - Terminators are `. ! ? ;` and their full-width forms; a run of them
//!   ("?!", "...") is one boundary.
//! - A `.` between digits is a decimal point, not a boundary. A `.` that
//!   ends the buffer right after a digit waits for the next fragment.
//! - Candidates shorter than `min_chars` merge with the following sentence.
//! - Only terminators within the first `max_chars` characters count; past
//!   that the buffer is force-cut at exactly `max_chars` characters.
//!
//! All lengths are in `char`s.

use crate::normalize::clean_fragment;
use crate::types::Utterance;

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ';' | '。' | '！' | '？' | '；')
}

/// Stateful, incremental text segmenter.
#[derive(Debug)]
pub struct Segmenter {
    buffer: String,
    min_chars: usize,
    max_chars: usize,
    next_sequence: u64,
}

impl Segmenter {
    /// Create a segmenter. `max_chars` is clamped to at least 1.
    #[must_use]
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            min_chars,
            max_chars: max_chars.max(1),
            next_sequence: 0,
        }
    }

    /// Update the length bounds (used when the controller restarts with a
    /// new configuration). The residual buffer is left untouched.
    pub fn set_bounds(&mut self, min_chars: usize, max_chars: usize) {
        self.min_chars = min_chars;
        self.max_chars = max_chars.max(1);
    }

    /// Clean `fragment`, append it, and return every utterance that is now
    /// complete, in order.
    pub fn feed(&mut self, fragment: &str) -> Vec<Utterance> {
        let cleaned = clean_fragment(fragment);
        self.append(&cleaned);

        let mut utterances = Vec::new();
        while let Some(text) = self.next_cut() {
            utterances.push(self.emit(text));
        }
        utterances
    }

    /// Emit whatever is left as a final utterance.
    ///
    /// Returns `None` when the buffer is blank, so a second `flush()` with
    /// no `feed()` in between always returns `None`.
    pub fn flush(&mut self) -> Option<Utterance> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            return None;
        }
        Some(self.emit(text))
    }

    /// Drop the residual buffer without emitting it.
    ///
    /// The sequence counter keeps counting so ids are never reused.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Characters currently waiting for a boundary.
    #[must_use]
    pub fn pending_chars(&self) -> usize {
        self.buffer.chars().count()
    }

    /// The id the next utterance will receive.
    #[must_use]
    pub const fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    fn append(&mut self, cleaned: &str) {
        let cleaned = if self.buffer.is_empty() || self.buffer.ends_with(' ') {
            cleaned.trim_start()
        } else {
            cleaned
        };
        self.buffer.push_str(cleaned);
    }

    fn emit(&mut self, text: String) -> Utterance {
        let utterance = Utterance::new(self.next_sequence, text);
        self.next_sequence += 1;
        utterance
    }

    /// Remove the first `byte_end` bytes; the remainder never starts with
    /// whitespace.
    fn consume(&mut self, byte_end: usize) {
        self.buffer = self.buffer[byte_end..].trim_start().to_string();
    }

    /// Find and remove the next complete utterance, if any.
    fn next_cut(&mut self) -> Option<String> {
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        let byte_at = |idx: usize| chars.get(idx).map_or(self.buffer.len(), |&(b, _)| b);
        let window = chars.len().min(self.max_chars);

        let mut i = 0;
        while i < window {
            let c = chars[i].1;
            if !is_terminator(c) {
                i += 1;
                continue;
            }

            if c == '.' && i > 0 && chars[i - 1].1.is_ascii_digit() {
                match chars.get(i + 1) {
                    Some(&(_, next)) if next.is_ascii_digit() => {
                        i += 1;
                        continue;
                    }
                    // "3." at the end of the buffer may become "3.5".
                    None => break,
                    Some(_) => {}
                }
            }

            let mut end = i + 1;
            while end < window && is_terminator(chars[end].1) {
                end += 1;
            }

            let byte_end = byte_at(end);
            let candidate = self.buffer[..byte_end].trim();
            if candidate.chars().count() >= self.min_chars {
                let text = candidate.to_string();
                self.consume(byte_end);
                return Some(text);
            }

            // Too short: merge with whatever sentence follows.
            i = end;
        }

        if chars.len() >= self.max_chars {
            let byte_end = byte_at(self.max_chars);
            let text = self.buffer[..byte_end].trim_end().to_string();
            self.consume(byte_end);
            tracing::debug!(chars = self.max_chars, "Force-cut utterance without boundary");
            return Some(text);
        }

        None
    }
}
