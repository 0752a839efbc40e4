//! Post-processing: deterministic cleanup of converter Markdown before the
//! image references are rewritten.
//!
//! Text pulled from a PDF text layer carries its own artefacts: `\r\n`
//! endings, zero-width characters and soft hyphens, words split across
//! lines with a hyphen, and runs of empty lines where the layout had
//! whitespace. Each rule is a pure `&str → String` pass.
//!
//! Image placeholders (`![](…)`) are never modified; the orchestrator
//! finds them by exact string match afterwards.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all rules, in order:
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Re-join words hyphenated across a line break
/// 5. Collapse 2+ consecutive blank lines down to 1
/// 6. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = join_hyphenated_words(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// Lowercase on both sides so "Jean-\nPierre" and list dashes survive.
static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{Ll})-\n(\p{Ll})").unwrap());

fn join_hyphenated_words(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").into_owned()
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}
