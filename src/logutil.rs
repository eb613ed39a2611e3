//! Text helpers for anything player-supplied that ends up in a log line or a
//! world command.

/// Escape a string so it stays on one log line:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - other control characters => `\xNN`
///
/// Output is capped at 300 characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Clean one inbound line before it becomes a command: drops control
/// characters (telnet negotiation leftovers, backspaces), trims, and cuts to
/// `max_chars` on a char boundary.
pub fn sanitize_line(raw: &str, max_chars: usize) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .map(|c| if c == '\t' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .chars()
        .take(max_chars)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_truncates() {
        let s = "Line1\nLine2\r\tEnd";
        assert_eq!(escape_log(s), "Line1\\nLine2\\r\\tEnd");
        let long = "x".repeat(400);
        assert!(escape_log(&long).ends_with('…'));
    }

    #[test]
    fn sanitize_strips_controls_and_caps_length() {
        assert_eq!(sanitize_line("  say hi\u{7}\r", 80), "say hi");
        assert_eq!(sanitize_line("a\tb", 80), "a b");
        assert_eq!(sanitize_line("héllo wörld", 5), "héllo");
    }
}
