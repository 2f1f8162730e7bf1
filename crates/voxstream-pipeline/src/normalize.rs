//! Text cleanup for TTS.
//!
//! Turns a raw LLM fragment (usually markdown) into plain speakable text.
//! Cleaning runs on each fragment on its own, before the fragment reaches
//! the segmenter buffer, so no rule here may depend on earlier fragments.
//!
//! Handles:
//! - Fenced code blocks (```…```) → "code omitted"
//! - Inline code (`…`) → contents
//! - Images !\[alt\](url) and links \[text\](url) → text only
//! - Headings, blockquotes, bullet / numbered list markers → removed
//! - Horizontal rules → removed
//! - Bold / italic / strikethrough markers → removed
//! - Three or more newlines → one blank line, then all whitespace runs → one space
//! - A fixed table of abbreviations → speakable words

use std::sync::LazyLock;

use regex::Regex;

/// Spoken placeholder for a fenced code block.
///
/// Must not contain sentence terminators or it would split utterances.
const CODE_PLACEHOLDER: &str = " code omitted ";

/// Abbreviations expanded into speakable words.
///
/// Matched only when not glued to another ASCII letter, so `AI` in
/// `AI助手` or `(AI)` matches but `MAIL` does not.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("vs.", "versus"),
    ("Dr.", "Doctor"),
    ("Mr.", "Mister"),
    ("Mrs.", "Missus"),
    ("JSON", "jason"),
    ("WiFi", "Wi-Fi"),
    ("HTTPS", "H T T P S"),
    ("HTTP", "H T T P"),
    ("API", "A P I"),
    ("CPU", "C P U"),
    ("GPU", "G P U"),
    ("LLM", "large language model"),
    ("NLP", "natural language processing"),
    ("RAM", "memory"),
    ("TTS", "text to speech"),
    ("URL", "U R L"),
    ("AI", "A I"),
    ("ML", "machine learning"),
];

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("markdown cleanup patterns are valid"),
        replacement,
    }
}

/// Ordered markdown rules. Order matters: fences before inline code,
/// images before links, rules before list markers.
static MARKDOWN_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"(?s)```.*?```", CODE_PLACEHOLDER),
        // Unterminated fence inside this fragment: drop the marker and language tag.
        rule(r"```[A-Za-z0-9_+-]*", ""),
        rule(r"`([^`\n]+)`", "$1"),
        rule(r"`", ""),
        rule(r"!\[([^\]\n]*)\]\([^)\n]*\)", "$1"),
        rule(r"\[([^\]\n]+)\]\([^)\n]*\)", "$1"),
        rule(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$", ""),
        rule(r"(?m)^[ \t]*#{1,6}[ \t]+", ""),
        rule(r"(?m)^[ \t]*>+[ \t]?", ""),
        rule(r"(?m)^[ \t]*[-*+•][ \t]+", ""),
        rule(r"(?m)^[ \t]*\d+[.)][ \t]+", ""),
        rule(r"\*\*([^*\n]+)\*\*", "$1"),
        rule(r"__([^_\n]+)__", "$1"),
        rule(r"~~([^~\n]+)~~", "$1"),
        rule(r"\b_([^_\n]+)_\b", "$1"),
        // Whatever emphasis markers are left span fragment edges. Only a
        // run hugging a word on one side is a marker; `2 * 3` stays.
        rule(r"(?m)(^|[\s(\[])\*+([^\s*])", "${1}${2}"),
        rule(r"(?m)([^\s*])\*+($|[\s.,;:!?)\]])", "${1}${2}"),
        rule(r"^\*+$", ""),
        rule(r"~~", ""),
        rule(r"\n{3,}", "\n\n"),
    ]
});

/// Clean a single fragment for speech.
///
/// Whitespace runs collapse to one space but are not trimmed at the edges:
/// `"Hello "` followed by `"world."` must still read "Hello world.".
#[must_use]
pub fn clean_fragment(fragment: &str) -> String {
    if fragment.is_empty() {
        return String::new();
    }

    let mut text = fragment.to_string();
    for rule in MARKDOWN_RULES.iter() {
        if rule.pattern.is_match(&text) {
            text = rule
                .pattern
                .replace_all(&text, rule.replacement)
                .into_owned();
        }
    }

    let text = expand_abbreviations(&text);
    collapse_whitespace(&text)
}

/// Expand every table abbreviation that stands on its own.
#[must_use]
pub fn expand_abbreviations(text: &str) -> String {
    let mut current = text.to_string();
    for (abbr, spoken) in ABBREVIATIONS {
        if current.contains(abbr) {
            current = replace_standalone(&current, abbr, spoken);
        }
    }
    current
}

fn replace_standalone(text: &str, needle: &str, replacement: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;

    for (start, _) in text.match_indices(needle) {
        if start < cursor {
            continue;
        }
        let end = start + needle.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        let glued = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphabetic());

        if glued(before) || glued(after) {
            continue;
        }

        result.push_str(&text[cursor..start]);
        result.push_str(replacement);
        cursor = end;
    }

    result.push_str(&text[cursor..]);
    result
}

/// Collapse whitespace runs (including newlines) into a single space.
fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(c);
            prev_space = false;
        }
    }

    result
}
