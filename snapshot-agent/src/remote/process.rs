//! Subprocess helpers shared by the channel implementations.

use crate::utils::errors::Result;
use std::process::Stdio;
use tokio::process::Command;

/// Exit status and combined stdout/stderr of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; -1 when the process was terminated by a signal
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Locale pinned on every child so diagnostics stay in English
pub const LOCALE_ENV: (&str, &str) = ("LC_ALL", "C");

/// Run a program with an explicit argument list and wait for it.
pub async fn output(program: &str, args: &[String]) -> Result<CommandOutput> {
    let out = Command::new(program)
        .args(args)
        .env(LOCALE_ENV.0, LOCALE_ENV.1)
        .env_remove("LANGUAGE")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }

    Ok(CommandOutput {
        status: out.status.code().unwrap_or(-1),
        output: combined.trim_end().to_string(),
    })
}

/// Characters that never need quoting for a POSIX shell
fn is_shell_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}

pub fn is_shell_safe(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_shell_safe_char)
}

/// Quote one argument so a remote POSIX shell sees it verbatim.
pub fn shell_quote(arg: &str) -> String {
    if is_shell_safe(arg) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Join an argument list into a single shell line, each argument quoted.
pub fn shell_line(argv: &[&str]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/zdata/backups/laptop"), "/zdata/backups/laptop");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_line() {
        assert_eq!(
            shell_line(&["rm", "-rf", "/b/host/Saved Games"]),
            "rm -rf '/b/host/Saved Games'"
        );
    }

    #[tokio::test]
    async fn test_output_combines_streams() {
        let args = vec!["-c".to_string(), "echo out; echo err 1>&2; exit 3".to_string()];
        let out = output("sh", &args).await.unwrap();

        assert_eq!(out.status, 3);
        assert!(!out.success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn test_output_pins_locale() {
        let args = vec!["-c".to_string(), "echo \"$LC_ALL|$LANGUAGE\"".to_string()];
        let out = output("sh", &args).await.unwrap();

        assert_eq!(out.output, "C|");
    }
}
