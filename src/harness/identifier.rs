//! Identifier safety checks for names spliced into generated code

/// Longest identifier accepted
pub const MAX_IDENTIFIER_LEN: usize = 128;

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Check that `name` is a plain ASCII Python identifier
///
/// Returns a human-readable reason when it is not.
pub fn check_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("identifier is empty".to_string());
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "identifier is longer than {} characters",
            MAX_IDENTIFIER_LEN
        ));
    }

    let mut chars = name.chars();
    let first = chars.next().unwrap_or('0');
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(format!("identifier {:?} must start with a letter or '_'", name));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!("identifier {:?} contains {:?}", name, bad));
    }
    if PYTHON_KEYWORDS.contains(&name) {
        return Err(format!("identifier {:?} is a Python keyword", name));
    }
    Ok(())
}
