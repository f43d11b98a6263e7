//! Shell quoting for command strings handed to `sh -c` and tmux.

/// Escape single quotes within a string for use inside a single-quoted shell argument.
///
/// Each quote closes the single-quoted run, emits a double-quoted `'`, and reopens.
/// The caller is responsible for wrapping the result in single quotes.
pub fn shell_escape(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ':' | '=' | '-')
}

/// Quote a string for safe use as a shell argument.
///
/// Tokens made only of `[A-Za-z0-9_./:=-]` pass through unchanged. Anything
/// else is wrapped in single quotes. Empty strings return `''`.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(is_safe_char) {
        s.to_string()
    } else {
        format!("'{}'", shell_escape(s))
    }
}

/// Quote every token and join with single spaces.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_single_quotes() {
        assert_eq!(shell_escape("it's"), "it'\"'\"'s");
    }

    #[test]
    fn test_shell_escape_preserves_special_chars() {
        assert_eq!(shell_escape("$HOME"), "$HOME");
        assert_eq!(shell_escape("a & b"), "a & b");
    }

    #[test]
    fn test_shell_quote_safe_passthrough() {
        assert_eq!(shell_quote("claude"), "claude");
        assert_eq!(shell_quote("/env/bin/claude"), "/env/bin/claude");
        assert_eq!(shell_quote("--model=google/gemini-2.5-pro"), "--model=google/gemini-2.5-pro");
        assert_eq!(shell_quote("http://127.0.0.1:8317"), "http://127.0.0.1:8317");
        assert_eq!(shell_quote("my_file-v2.txt"), "my_file-v2.txt");
    }

    #[test]
    fn test_shell_quote_wraps_unsafe() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
        assert_eq!(shell_quote("a;b"), "'a;b'");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn test_shell_quote_empty_string() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_join() {
        assert_eq!(shell_join(&["claude", "-p", "fix it"]), "claude -p 'fix it'");
        let empty: [&str; 0] = [];
        assert_eq!(shell_join(&empty), "");
    }
}
