//! Extraction progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.
//! Human mode prints one line per finished source; JSON mode prints one
//! object per line.

use std::io::Write;

use distill_core::extract::{ExtractionProgress, NoProgress};
use distill_core::models::Source;

/// Human-friendly progress on stderr: "extract 3 / 10  Rust lifetimes".
pub struct StderrProgress;

impl ExtractionProgress for StderrProgress {
    fn on_progress(&self, completed: usize, total: usize, title: &str) {
        let line = format!(
            "extract {} / {}  {}\n",
            format_number(completed as u64),
            format_number(total as u64),
            title
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }

    fn on_error(&self, source: &Source, error: &anyhow::Error) {
        let line = format!("extract {}  failed: {:#}\n", source, error);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ExtractionProgress for JsonProgress {
    fn on_progress(&self, completed: usize, total: usize, title: &str) {
        emit(serde_json::json!({
            "event": "progress",
            "n": completed,
            "total": total,
            "title": title
        }));
    }

    fn on_error(&self, source: &Source, error: &anyhow::Error) {
        emit(serde_json::json!({
            "event": "error",
            "source": source.to_string(),
            "error": format!("{:#}", error)
        }));
    }
}

fn emit(obj: serde_json::Value) {
    if let Ok(line) = serde_json::to_string(&obj) {
        let _ = writeln!(std::io::stderr().lock(), "{}", line);
        let _ = std::io::stderr().lock().flush();
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ExtractionProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
