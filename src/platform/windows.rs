use super::Platform;

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn default_shell() -> &'static str {
        "cmd"
    }

    fn shell_inline(command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }

    fn run_as_user(user: &str, command_line: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("runas");
        cmd.arg(format!("/user:{}", user)).arg(command_line);
        cmd
    }

    fn shell_quote(word: &str) -> String {
        format!("\"{}\"", word.replace('"', "\\\""))
    }

    fn executable_suffixes() -> &'static [&'static str] {
        &[".exe", ".cmd", ".bat", ""]
    }
}
