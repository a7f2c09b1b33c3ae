//! Output mode flags and printing helpers shared by the subcommands.
//!
//! `main` records the global `--json` / `--quiet` flags in environment
//! variables so every module can check them without threading them through.

use serde::Serialize;

pub fn is_json() -> bool {
    std::env::var_os("JOBSCOUT_JSON").is_some()
}

pub fn is_quiet() -> bool {
    std::env::var_os("JOBSCOUT_QUIET").is_some()
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("  Error: could not serialize output: {e}"),
    }
}

/// Print a human-readable line unless `--quiet` or `--json` is set.
pub fn say(line: impl AsRef<str>) {
    if !is_quiet() && !is_json() {
        println!("{}", line.as_ref());
    }
}

/// Shorten to `max` characters, marking the cut.
pub fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ellipsize() {
        assert_eq!(ellipsize("short", 10), "short");
        assert_eq!(ellipsize("abcdefghij", 5), "abcd…");
    }
}
