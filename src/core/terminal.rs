use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    println!();
    println!(
        "{}{}",
        style("site").bold().color256(111),
        style("pilot").bold().cyan()
    );
    println!(
        "{}\n",
        style("Browser automation, a CLI execution server and a Telegram relay.").dim()
    );
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Info(String),
    Warn(String),
    Text(String),
    Blank,
}

/// Titled block of aligned lines for help screens and status summaries.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn info(mut self, msg: &str) -> Self {
        self.lines.push(GuideLine::Info(msg.to_string()));
        self
    }

    pub fn warn(mut self, msg: &str) -> Self {
        self.lines.push(GuideLine::Warn(msg.to_string()));
        self
    }

    pub fn text(mut self, msg: &str) -> Self {
        self.lines.push(GuideLine::Text(msg.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn render(&self) -> String {
        let width = self
            .lines
            .iter()
            .filter_map(|line| match line {
                GuideLine::Command(name, _) => Some(name.chars().count()),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        let mut out = format!(" {}\n", style(&self.title).bold().underlined());
        for line in &self.lines {
            let rendered = match line {
                GuideLine::Command(name, desc) => {
                    let padded = format!("{:<width$}", name, width = width);
                    format!("   {}  {}", style(padded).green(), desc)
                }
                GuideLine::Status(label, value) => {
                    format!("   {} {}: {}", GEAR, style(label).bold().cyan(), value)
                }
                GuideLine::Info(msg) => format!("   {} {}", INFO_ICON, style(msg).blue()),
                GuideLine::Warn(msg) => format!("   {} {}", WARN_ICON, style(msg).yellow()),
                GuideLine::Text(msg) => format!("   {}", msg),
                GuideLine::Blank => String::new(),
            };
            out.push_str(&rendered);
            out.push('\n');
        }
        out
    }

    pub fn print(self) {
        println!("{}", self.render());
    }
}
