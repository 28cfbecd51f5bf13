//! Output comparison for exact and token checks.

/// Canonical form for exact comparison: LF line endings, no trailing
/// whitespace on any line, no trailing blank lines.
pub fn normalize_exact(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

pub fn exact_match(actual: &str, expected: &str) -> bool {
    normalize_exact(actual) == normalize_exact(expected)
}

/// Token-wise comparison. Tokens match when they are equal strings, or
/// both parse as finite numbers within `epsilon` absolute or relative to
/// the expected value.
pub fn tokens_match(actual: &str, expected: &str, epsilon: f64) -> bool {
    let actual: Vec<&str> = actual.split_whitespace().collect();
    let expected: Vec<&str> = expected.split_whitespace().collect();
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(&expected)
            .all(|(a, e)| token_eq(a, e, epsilon))
}

fn token_eq(actual: &str, expected: &str, epsilon: f64) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(e)) if a.is_finite() && e.is_finite() => {
            let diff = (a - e).abs();
            diff <= epsilon || diff <= epsilon * e.abs()
        }
        _ => false,
    }
}
