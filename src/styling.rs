//! Minimal terminal styling shared by error and diagnostic messages.

use anstyle::{AnsiColor, Style};

pub const ERROR: Style = AnsiColor::Red.on_default();
pub const ERROR_BOLD: Style = AnsiColor::Red.on_default().bold();
pub const HINT: Style = AnsiColor::BrightBlack.on_default();

pub const ERROR_EMOJI: &str = "\u{274c}";
pub const HINT_EMOJI: &str = "\u{1f4a1}";

/// Indent `content` with a left gutter, optionally wrapping each source line
/// to `max_width` columns. `prefix` is prepended to the gutter on every line
/// (e.g. a branch name when interleaving output from several worktrees).
pub fn format_with_gutter(content: &str, prefix: &str, max_width: Option<usize>) -> String {
    let gutter = if prefix.is_empty() {
        "  │ ".to_string()
    } else {
        format!("  {prefix}│ ")
    };

    content
        .lines()
        .flat_map(|line| wrap_line(line, max_width))
        .map(|line| format!("{gutter}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap_line(line: &str, max_width: Option<usize>) -> Vec<String> {
    let Some(max_width) = max_width else {
        return vec![line.to_string()];
    };
    if max_width == 0 || unicode_width::UnicodeWidthStr::width(line) <= max_width {
        return vec![line.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut width = 0;
    for ch in line.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width > max_width && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            width = 0;
        }
        current.push(ch);
        width += ch_width;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
