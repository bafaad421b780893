// src/render.rs
//
// Message rendering: placeholder substitution plus per-channel body
// normalization. SMS bodies may be authored as HTML in the template editor,
// so they are flattened to plain text before hitting the gateway.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Non-nested tags only; template bodies are simple editor output.
    static ref TAG_RE: Regex = Regex::new(r"<[^<>]+>").unwrap();
    static ref EXCESS_NEWLINES_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Replace the literal `{first_name}` / `{last_name}` tokens.
/// Unknown tokens pass through unchanged.
pub fn render_placeholders(text: &str, first_name: &str, last_name: &str) -> String {
    text.replace("{first_name}", first_name)
        .replace("{last_name}", last_name)
}

/// Flatten an HTML-authored body to plain text suitable for SMS:
/// block-level closers become newlines, remaining tags are stripped,
/// entities are unescaped, and runs of 3+ newlines collapse to 2.
pub fn sms_plain_text(body: &str) -> String {
    let with_breaks = body
        .replace("</p>", "\n\n")
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</div>", "\n");

    let stripped = TAG_RE.replace_all(&with_breaks, "");
    let unescaped = unescape_entities(&stripped);
    let collapsed = EXCESS_NEWLINES_RE.replace_all(&unescaped, "\n\n");
    collapsed.trim().to_string()
}

/// Prepare a body for HTML email. Plain-text bodies get `\n` converted to
/// `<br>`; HTML bodies keep their structure with default paragraph margins
/// zeroed so clients render them consistently.
pub fn email_html_body(body: &str) -> String {
    if body.contains("<p>") || body.contains("<br>") {
        body.replace("<p>", r#"<p style="margin:0;padding:0;">"#)
    } else {
        body.replace('\n', "<br>")
    }
}

/// Split a comma-separated recipient string, trimming and dropping blanks.
pub fn split_recipients(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unescape_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
