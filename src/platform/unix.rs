use super::Platform;

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn default_shell() -> &'static str {
        "sh"
    }

    fn shell_inline(command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }

    fn run_as_user(user: &str, command_line: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("su");
        cmd.arg("-").arg(user).arg("-c").arg(command_line);
        cmd
    }

    fn shell_quote(word: &str) -> String {
        format!("'{}'", word.replace('\'', r"'\''"))
    }

    fn executable_suffixes() -> &'static [&'static str] {
        &[""]
    }
}
