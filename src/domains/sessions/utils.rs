/// Reduces free-form command text to letters, digits, `_ - . , /` and single
/// spaces. Returns `None` when nothing usable is left.
pub fn sanitize_command_text(raw: &str) -> Option<String> {
    let filtered: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ',' | '/' | ' '))
        .collect();
    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// A single command token: letters, digits, `_ - .` only.
pub fn sanitize_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect()
}

/// Builds `label arg…` from sanitized tokens, dropping empty ones.
pub fn command_line(label: &str, args: &[&str]) -> Option<String> {
    let label = sanitize_token(label);
    if label.is_empty() {
        return None;
    }
    let mut parts = vec![label];
    parts.extend(
        args.iter()
            .map(|arg| sanitize_token(arg))
            .filter(|arg| !arg.is_empty()),
    );
    Some(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_shell_and_chat_syntax() {
        assert_eq!(
            sanitize_command_text("visit  Paris; rm -rf /"),
            Some("visit Paris rm -rf /".to_string())
        );
        assert_eq!(
            sanitize_command_text("visit 48.85,2.35\n@a"),
            Some("visit 48.85,2.35 a".to_string())
        );
    }

    #[test]
    fn blank_input_is_rejected() {
        assert_eq!(sanitize_command_text("  ;;  "), None);
        assert_eq!(sanitize_command_text(""), None);
    }

    #[test]
    fn command_line_sanitizes_each_token() {
        assert_eq!(
            command_line("visitradius", &["300"]),
            Some("visitradius 300".to_string())
        );
        assert_eq!(
            command_line("moveload", &["tog;gle", ""]),
            Some("moveload toggle".to_string())
        );
        assert_eq!(command_line("$$", &["1"]), None);
    }
}
