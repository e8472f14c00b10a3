//! Pulling sandbox code out of a model response.

use once_cell::sync::Lazy;
use regex::Regex;

/// First fenced block. An unclosed fence runs to the end of the text.
static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)(?:```|\z)").expect("valid fence regex"));

/// Extract the code to run from a model response.
///
/// The first fenced block wins, whatever its info string. Without a fence,
/// a response that is itself an s-expression is taken whole. Returns `None`
/// when there is nothing to run.
pub fn extract_code(response: &str) -> Option<String> {
    if let Some(captures) = FENCE.captures(response) {
        let code = captures.get(1).map_or("", |m| m.as_str()).trim();
        return (!code.is_empty()).then(|| code.to_string());
    }
    let trimmed = response.trim();
    trimmed.starts_with('(').then(|| trimmed.to_string())
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_fenced_code_is_recovered(code in "\\([a-z+ 0-9]{0,40}\\)") {
            let response = format!("Some prose.\n```clojure\n{}\n```\nMore prose.", code);
            prop_assert_eq!(extract_code(&response), Some(code.trim().to_string()));
        }

        #[test]
        fn prop_never_panics(text in "\\PC{0,200}") {
            let _ = extract_code(&text);
        }
    }
}
