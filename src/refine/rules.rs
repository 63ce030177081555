//! Rule-based text passes around the LLM refinement call: spoken-symbol
//! replacement before it, output validation after it.

/// Spoken phrase → glyph substitutions applied before refinement.
/// Matching is case-insensitive and word-boundary aware.
const SPOKEN_SYMBOLS: &[(&str, &str)] = &[
    // line breaks
    ("new paragraph", "\n\n"),
    ("paragraph break", "\n\n"),
    ("new line", "\n"),
    ("newline", "\n"),
    ("line break", "\n"),
    // dashes
    ("em dash", "\u{2014}"),
    ("en dash", "\u{2013}"),
    // punctuation spoken out loud
    ("full stop", "."),
    ("period", "."),
    ("comma", ","),
    ("colon", ":"),
    ("semicolon", ";"),
    ("question mark", "?"),
    ("exclamation mark", "!"),
    ("exclamation point", "!"),
    ("ellipsis", "..."),
    // quotes and brackets
    ("open quote", "\""),
    ("close quote", "\""),
    ("open paren", "("),
    ("close paren", ")"),
    ("open bracket", "["),
    ("close bracket", "]"),
    ("open brace", "{"),
    ("close brace", "}"),
    // math and programming symbols
    ("plus sign", "+"),
    ("equals sign", "="),
    ("asterisk", "*"),
    ("forward slash", "/"),
    ("backslash", "\\"),
    ("percent sign", "%"),
    ("ampersand", "&"),
    ("at sign", "@"),
    ("hashtag", "#"),
    ("dollar sign", "$"),
    ("underscore", "_"),
    ("vertical bar", "|"),
    ("tilde", "~"),
    ("backtick", "`"),
    ("less than", "<"),
    ("greater than", ">"),
    // arrows and misc
    ("right arrow", "\u{2192}"),
    ("left arrow", "\u{2190}"),
    ("bullet point", "\u{2022}"),
    ("degree sign", "\u{00b0}"),
];

/// Replace spoken symbol names with the symbols themselves.
///
/// Longer phrases win over their sub-phrases ("em dash" before any plain
/// "dash" mapping). STT engines tend to pad spoken symbols with commas
/// ("Dear John, New line, New line, I wanted..."), so commas and spaces
/// around a substitution are trimmed.
pub fn replace_symbols(text: &str) -> String {
    let mut mappings: Vec<&(&str, &str)> = SPOKEN_SYMBOLS.iter().collect();
    mappings.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = text.to_string();
    for (spoken, glyph) in mappings {
        result = replace_phrase(&result, spoken, glyph);
    }
    result
}

fn replace_phrase(text: &str, spoken: &str, glyph: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = find_spoken(rest, spoken) {
        let end = pos + spoken.len();
        out.push_str(rest[..pos].trim_end_matches([' ', ',']));
        out.push_str(glyph);
        let after = &rest[end..];
        rest = if glyph.contains('\n') {
            // Line breaks swallow surrounding commas, periods and spaces.
            after.trim_start_matches([' ', ',', '.'])
        } else {
            after.trim_start_matches(',')
        };
    }
    out.push_str(rest);
    out
}

/// Case-insensitive word-boundary search for a spoken phrase.
fn find_spoken(text: &str, spoken: &str) -> Option<usize> {
    let n = spoken.len();
    let mut i = 0;
    while i + n <= text.len() {
        if !text.is_char_boundary(i) || !text.is_char_boundary(i + n) {
            i += 1;
            continue;
        }
        if text[i..i + n].eq_ignore_ascii_case(spoken) {
            let boundary_before = i == 0
                || !text[..i]
                    .chars()
                    .next_back()
                    .map(char::is_alphanumeric)
                    .unwrap_or(false);
            let boundary_after = i + n == text.len()
                || !text[i + n..]
                    .chars()
                    .next()
                    .map(char::is_alphanumeric)
                    .unwrap_or(false);
            if boundary_before && boundary_after {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Validate LLM output against the input it was supposed to refine.
///
/// The refinement collaborator sometimes treats dictated text as a message
/// addressed to it. Output that looks like a refusal or conversation, that
/// balloons past twice the input length, or that comes back empty is
/// rejected in favor of the rule-cleaned input.
pub fn validate_output(refined: &str, input: &str) -> String {
    let cleaned = sanitize_output(&strip_think_blocks(refined));

    if cleaned.trim().is_empty() || looks_like_refusal(&cleaned) {
        return punctuation_cleanup(input);
    }

    let input_words = input.split_whitespace().count();
    let output_words = cleaned.split_whitespace().count();
    if input_words > 3 && output_words > input_words * 2 {
        return punctuation_cleanup(input);
    }

    cleaned
}

/// Phrases that mark the output as a conversational response rather than
/// refined dictation.
const REFUSAL_MARKERS: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "i apologize",
    "i cannot",
    "i can't",
    "i'm unable",
    "i am unable",
    "as an ai",
    "as a language model",
    "as an assistant",
    "how can i help",
    "how may i assist",
    "i'd be happy to",
    "i'm here to help",
    "here's the refined",
    "here is the refined",
    "refined version",
    "corrected version",
    "please note",
    "unfortunately,",
    "my apologies",
];

fn looks_like_refusal(text: &str) -> bool {
    let lower = text.to_lowercase();
    if REFUSAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }

    // A response opening like an assistant and structured with a colon is
    // almost always commentary, not dictation.
    let trimmed = lower.trim_start();
    let assistant_opening = ["sure", "certainly", "of course", "absolutely", "thank you"]
        .iter()
        .any(|p| trimmed.starts_with(p));
    assistant_opening && text.contains(':')
}

fn strip_think_blocks(text: &str) -> String {
    let mut s = text.to_string();
    while let Some(start) = s.find("<think>") {
        match s[start..].find("</think>") {
            Some(rel) => {
                let end = start + rel + "</think>".len();
                s.replace_range(start..end, "");
            }
            None => break,
        }
    }
    s.trim().to_string()
}

/// Strip prefixes and wrapping quotes the collaborator sometimes adds.
fn sanitize_output(text: &str) -> String {
    const PREFIXES: &[&str] = &[
        "here's the refined text:",
        "here is the refined text:",
        "refined text:",
        "refined:",
        "corrected text:",
        "output:",
        "result:",
    ];

    let mut result = text.trim().to_string();
    for prefix in PREFIXES {
        if result.len() >= prefix.len() && result[..prefix.len()].eq_ignore_ascii_case(prefix) {
            result = result[prefix.len()..].trim().to_string();
        }
    }

    let trimmed = result.trim();
    if trimmed.len() > 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        result = trimmed[1..trimmed.len() - 1].to_string();
    }

    result.trim().to_string()
}

/// Rule-based fallback cleanup used when the LLM output is rejected:
/// capitalize the first letter and close with a period.
pub fn punctuation_cleanup(text: &str) -> String {
    let mut result = text.trim().to_string();
    if result.is_empty() {
        return result;
    }

    if let Some(first) = result.chars().next() {
        if first.is_ascii_lowercase() {
            result.replace_range(..1, &first.to_ascii_uppercase().to_string());
        }
    }

    if let Some(last) = result.chars().last() {
        if !matches!(last, '.' | '!' | '?' | ',' | ';' | ':' | '\n') {
            result.push('.');
        }
    }
    result
}
