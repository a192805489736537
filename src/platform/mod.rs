use std::path::PathBuf;

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Shell used for inline command strings (`"sh"` / `"cmd"`).
    fn default_shell() -> &'static str;

    /// Build a **tokio** `Command` that runs an inline shell string.
    fn shell_inline(command: &str) -> tokio::process::Command;

    /// Build a **tokio** `Command` that runs `command_line` as another OS user
    /// through a login shell.
    fn run_as_user(user: &str, command_line: &str) -> tokio::process::Command;

    /// Quote one word so the platform shell passes it through verbatim.
    fn shell_quote(word: &str) -> String;

    /// Filename suffixes tried when looking an executable up on `PATH`.
    fn executable_suffixes() -> &'static [&'static str];
}

/// `which`-style lookup. Names containing a path separator are checked as-is.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then_some(candidate);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        NativePlatform::executable_suffixes()
            .iter()
            .map(|suffix| dir.join(format!("{}{}", name, suffix)))
            .find(|p| p.is_file())
    })
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
