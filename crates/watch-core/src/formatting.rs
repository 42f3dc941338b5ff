//! Text helpers for the bot and CLI: Markdown → Telegram HTML, risk badges,
//! news summaries and message chunking.

use std::sync::OnceLock;

use regex::Regex;

use crate::schemas::EventType;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

/// Convert the Markdown subset the model and our templates emit into Telegram HTML.
///
/// Every tag opens and closes on the same line, so the result can be split on
/// newlines without breaking markup.
pub fn markdown_to_html(input: &str) -> String {
    static BOLD: OnceLock<Regex> = OnceLock::new();
    static BOLD_UNDERSCORE: OnceLock<Regex> = OnceLock::new();
    static ITALIC: OnceLock<Regex> = OnceLock::new();
    static CODE: OnceLock<Regex> = OnceLock::new();

    let bold = regex(&BOLD, r"\*\*([^*\n]+?)\*\*");
    let bold_us = regex(&BOLD_UNDERSCORE, r"__([^_\n]+?)__");
    let italic = regex(&ITALIC, r"\*([^*\n]+?)\*");
    let code = regex(&CODE, r"`([^`\n]+)`");

    let mut lines = Vec::new();
    for raw in input.split('\n') {
        let mut line = escape_html(raw);

        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        if let Some(rest) = trimmed
            .strip_prefix("* ")
            .or_else(|| trimmed.strip_prefix("- "))
        {
            line = format!("{indent}• {rest}");
        } else if trimmed.starts_with('#') {
            let header = trimmed.trim_start_matches('#').trim();
            if !header.is_empty() {
                line = format!("**{header}**");
            }
        }

        let line = code.replace_all(&line, "<code>$1</code>");
        let line = bold.replace_all(&line, "<b>$1</b>");
        let line = bold_us.replace_all(&line, "<i>$1</i>");
        let line = italic.replace_all(&line, "<i>$1</i>");
        lines.push(whole_line_italic(&line));
    }

    let mut out = lines.join("\n");
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_string()
}

fn whole_line_italic(line: &str) -> String {
    let t = line.trim();
    if t.len() > 2 && t.starts_with('_') && t.ends_with('_') && !t[1..t.len() - 1].contains('_') {
        format!("<i>{}</i>", &t[1..t.len() - 1])
    } else {
        line.to_string()
    }
}

/// Strip pictographs and symbols from an incident summary.
pub fn remove_emojis(text: &str) -> String {
    static EMOJI: OnceLock<Regex> = OnceLock::new();
    let re = regex(
        &EMOJI,
        r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}\x{2702}-\x{27B0}\x{24C2}-\x{1F251}]+",
    );
    re.replace_all(text, "").trim().to_string()
}

/// Drop a dangling partial sentence when the last full stop sits in the second half.
pub fn trim_partial_sentence(text: &str) -> String {
    let text = text.trim_end();
    let Some(last) = text.chars().last() else {
        return String::new();
    };
    if matches!(last, '.' | '!' | '?' | ':' | ';') {
        return text.to_string();
    }
    let total = text.chars().count();
    let last_period = text
        .chars()
        .enumerate()
        .filter(|(_, c)| *c == '.')
        .map(|(i, _)| i)
        .last();
    match last_period {
        Some(idx) if idx as f64 > total as f64 * 0.5 => text.chars().take(idx + 1).collect(),
        _ => text.to_string(),
    }
}

/// Summary as shown in news lists.
pub fn clean_summary(text: &str) -> String {
    trim_partial_sentence(&remove_emojis(text))
}

/// Emoji plus upper-case level label for a risk score.
pub fn risk_badge(score: f64) -> &'static str {
    if score >= 9.0 {
        "🔴 CRITICAL"
    } else if score >= 7.0 {
        "🟠 HIGH"
    } else if score >= 5.0 {
        "🟡 MODERATE"
    } else if score >= 3.0 {
        "🟢 LOW"
    } else {
        "✅ MINIMAL"
    }
}

pub fn event_emoji(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Shooting => "🔫",
        EventType::Stabbing => "🔪",
        EventType::Explosion => "💥",
        EventType::Arson => "🔥",
        EventType::Brawl => "👊",
        EventType::PoliceActivity => "🚔",
        EventType::Roadblock => "🚧",
        EventType::Accident => "🚗",
        _ => "❓",
    }
}

/// Truncate to `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Split HTML into chunks of at most `limit` bytes, preferring line breaks.
pub fn split_message(html: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(16);
    if html.len() <= limit {
        return vec![html.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in html.split('\n') {
        let needed = if chunk.is_empty() { line.len() } else { line.len() + 1 };
        if chunk.len() + needed <= limit {
            if !chunk.is_empty() {
                chunk.push('\n');
            }
            chunk.push_str(line);
            continue;
        }
        if !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
        }
        let mut rest = line;
        while rest.len() > limit {
            let (head, tail) = split_outside_tag(rest, limit);
            out.push(head.to_string());
            rest = tail;
        }
        chunk.push_str(rest);
    }
    if !chunk.trim().is_empty() {
        out.push(chunk);
    }
    out
}

/// Cut at a char boundary `<= max_bytes`, backing off so no tag is split.
fn split_outside_tag(s: &str, max_bytes: usize) -> (&str, &str) {
    let mut cut = max_bytes.min(s.len());
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    if let Some(open) = s[..cut].rfind('<') {
        if !s[open..cut].contains('>') && open > 0 {
            cut = open;
        }
    }
    if cut == 0 {
        // A single char wider than the limit.
        cut = s.chars().next().map(char::len_utf8).unwrap_or(s.len());
    }
    s.split_at(cut)
}
