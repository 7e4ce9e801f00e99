//! Terminal output helpers shared by the commands.

use owo_colors::OwoColorize;

/// Consistent, colored terminal output.
#[derive(Debug, Clone, Default)]
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    /// Plain line.
    pub fn print(&self, message: &str) {
        println!("{}", message);
    }

    /// Something is about to happen.
    pub fn status(&self, message: &str) {
        println!("{} {}", "→".bright_blue(), message);
    }

    pub fn info(&self, message: &str) {
        println!("  {}", message.dimmed());
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", "✓".bright_green(), message);
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", "!".bright_yellow(), message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".bright_red(), message.red());
    }

    /// Section heading.
    pub fn section(&self, title: &str) {
        println!();
        println!("{}", title.bold().underline());
    }

    /// Aligned key/value pair.
    pub fn kv(&self, key: &str, value: &str) {
        println!("  {:<18} {}", format!("{}:", key).bright_cyan(), value);
    }

    pub fn list_item(&self, item: &str) {
        println!("  • {}", item);
    }
}
