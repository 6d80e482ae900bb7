//! # Log Classifier
//!
//! Pure functions over raw `tofu` output:
//!
//! - [`classify_error`] - one lower-cased line summarising a failure
//! - [`classify_plan_result`] - whether a plan reports nothing to do
//! - [`parse_apply_outputs`] - non-sensitive outputs printed by a successful apply

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Returned when the log carries no text at all
pub const UNKNOWN_ERROR: &str = "unknown error";

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)Error: (.+)$").expect("Failed to compile ERROR_LINE regex - this should never happen")
});

static PLAN_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Plan: \d+ to ")
        .expect("Failed to compile PLAN_SUMMARY regex - this should never happen")
});

static OUTPUT_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*) = (.*)$")
        .expect("Failed to compile OUTPUT_ENTRY regex - this should never happen")
});

/// Extract a single-line, lower-cased error summary from CLI output
///
/// Prefers the first `Error: <summary>` line, falls back to the first non-empty line,
/// and returns [`UNKNOWN_ERROR`] for empty output.
#[must_use]
pub fn classify_error(text: &str) -> String {
    if let Some(summary) = ERROR_LINE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|s| !s.is_empty())
    {
        return summary.to_lowercase();
    }

    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(|| UNKNOWN_ERROR.to_string(), str::to_lowercase)
}

/// Whether a `tofu plan -no-color` log reports that infrastructure matches the configuration
///
/// `No changes.` alone is not enough: output-only changes print a `Changes to Outputs:`
/// block and resource changes print a `Plan: N to add, ...` summary. Either means drift.
#[must_use]
pub fn classify_plan_result(text: &str) -> bool {
    text.contains("No changes.")
        && !PLAN_SUMMARY.is_match(text)
        && !text.contains("Changes to Outputs:")
}

/// Collect the `Outputs:` block of a `tofu apply -no-color` log
///
/// Sensitive outputs are skipped. Quoted strings are unquoted, every other value
/// (numbers, lists, maps, heredocs) is kept as printed.
#[must_use]
pub fn parse_apply_outputs(text: &str) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();

    let Some(start) = text.rfind("\nOutputs:\n").map(|i| i + 1).or_else(|| {
        text.starts_with("Outputs:\n").then_some(0)
    }) else {
        return outputs;
    };

    let mut current: Option<(String, String)> = None;
    for line in text[start..].lines().skip(1) {
        if let Some(caps) = OUTPUT_ENTRY.captures(line) {
            flush_output(&mut outputs, current.take());
            current = Some((caps[1].to_string(), caps[2].to_string()));
        } else if line.trim().is_empty() {
            if current.is_some() {
                flush_output(&mut outputs, current.take());
            }
        } else if let Some((_, value)) = current.as_mut() {
            value.push('\n');
            value.push_str(line);
        } else {
            break;
        }
    }
    flush_output(&mut outputs, current);

    outputs
}

fn flush_output(outputs: &mut BTreeMap<String, String>, entry: Option<(String, String)>) {
    let Some((name, raw)) = entry else {
        return;
    };
    let raw = raw.trim_end();
    if raw == "<sensitive>" || raw == "(sensitive value)" {
        return;
    }
    let value = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') && !raw.contains('\n')
    {
        serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw[1..raw.len() - 1].to_string())
    } else {
        raw.to_string()
    };
    outputs.insert(name, value);
}
