//! Terminal output helpers.
//!
//! Uses `colored` for user-facing lines; diagnostics go through `tracing`.

use colored::Colorize;

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<12} {}", format!("{label}:").dimmed(), value);
}

/// A line received from a peer: "peer> text".
pub fn incoming(peer: &str, text: &str) {
    println!("  {} {}", format!("{peer}>").bright_cyan(), text);
}
