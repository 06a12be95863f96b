//! POSIX shell quoting and shell selection.

/// The program and flag that interpret a command string.
///
/// `configured` comes from settings; otherwise `sh -c` (`cmd /C` on Windows).
pub fn shell_invocation(configured: Option<&str>) -> (String, &'static str) {
    match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(shell) if is_cmd(shell) => (shell.to_string(), "/C"),
        Some(shell) => (shell.to_string(), "-c"),
        None if cfg!(windows) => ("cmd".to_string(), "/C"),
        None => ("sh".to_string(), "-c"),
    }
}

fn is_cmd(shell: &str) -> bool {
    let lower = shell.to_ascii_lowercase();
    lower == "cmd" || lower.ends_with("cmd.exe")
}

/// Join argv into one command string that a POSIX shell splits back into
/// the same words.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "@%_+=:,./-".contains(ch))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain", "plain")]
    #[case("", "''")]
    #[case("two words", "'two words'")]
    #[case("it's", "'it'\"'\"'s'")]
    #[case("$HOME", "'$HOME'")]
    #[case("--flag=a,b", "--flag=a,b")]
    fn quote(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(shell_quote(input), expected);
    }

    #[test]
    fn join_quotes_each_word() {
        let argv = ["cargo", "test", "--", "a b"];
        assert_eq!(shell_join(&argv), "cargo test -- 'a b'");
    }

    #[test]
    fn configured_shell_wins() {
        assert_eq!(shell_invocation(Some("bash")), ("bash".to_string(), "-c"));
        assert_eq!(shell_invocation(Some("cmd.exe")), ("cmd.exe".to_string(), "/C"));
    }

    #[cfg(unix)]
    #[test]
    fn blank_shell_falls_back_to_sh() {
        assert_eq!(shell_invocation(Some("  ")), ("sh".to_string(), "-c"));
        assert_eq!(shell_invocation(None), ("sh".to_string(), "-c"));
    }
}
