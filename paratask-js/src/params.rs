//! Declared-parameter scanning for task logic
//!
//! The calling convention of a task is inferred from the names in its
//! parameter list: the first binds the success callback, the second the
//! failure callback.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Most callbacks a logic unit may declare
pub const MAX_PARAMETERS: usize = 2;

static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").unwrap());

static FUNCTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:async\s+)?function\s*\*?\s*(?:[A-Za-z_$][\w$]*)?\s*\(([^)]*)\)").unwrap()
});

static ARROW_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:async\s*)?\(([^)]*)\)\s*=>").unwrap());

static BARE_ARROW_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:async\s+)?([A-Za-z_$][\w$]*)\s*=>").unwrap());

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_$][\w$]*$").unwrap());

const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("task logic is not a function")]
    NotInvocable,

    #[error("task logic declares {count} parameters ({names}); at most 2 are supported")]
    TooManyParameters { count: usize, names: String },
}

impl ScanError {
    /// Name used when the error is reported as a task failure
    pub fn name(&self) -> &'static str {
        match self {
            ScanError::NotInvocable => "TypeError",
            ScanError::TooManyParameters { .. } => "TooManyParameters",
        }
    }
}

/// Parameter names declared by a logic unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterList {
    pub names: Vec<String>,
}

impl ParameterList {
    /// Number of callbacks to bind
    pub fn arity(&self) -> usize {
        self.names.len()
    }

    pub fn success_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    pub fn failure_name(&self) -> Option<&str> {
        self.names.get(1).map(String::as_str)
    }
}

/// Read the declared parameter names from logic source text
pub fn scan_parameters(source: &str) -> Result<ParameterList, ScanError> {
    let stripped = COMMENTS.replace_all(source, "");
    let header = unwrap_parens(stripped.trim_start());

    let raw = FUNCTION_HEADER
        .captures(header)
        .or_else(|| ARROW_HEADER.captures(header))
        .or_else(|| BARE_ARROW_HEADER.captures(header))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or(ScanError::NotInvocable)?;

    let names: Vec<String> = raw
        .split(',')
        .map(|param| param.split('=').next().unwrap_or_default().trim())
        .map(strip_underscore_wrapping)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if names.len() > MAX_PARAMETERS {
        return Err(ScanError::TooManyParameters {
            count: names.len(),
            names: names.join(", "),
        });
    }

    Ok(ParameterList { names })
}

/// Whether the source has a recognisable function header
pub fn is_invocable(source: &str) -> bool {
    !matches!(scan_parameters(source), Err(ScanError::NotInvocable))
}

/// Whether `name` can be bound as a variable in task logic
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name) && !RESERVED_WORDS.contains(&name)
}

// `(function (a) {...})` is accepted; `(a, b) => ...` keeps its parens.
fn unwrap_parens(mut text: &str) -> &str {
    while let Some(rest) = text.strip_prefix('(') {
        let rest = rest.trim_start();
        if rest.starts_with("function") || rest.starts_with("async") {
            text = rest;
        } else {
            break;
        }
    }
    text
}

fn strip_underscore_wrapping(name: &str) -> &str {
    if name.len() > 2 && name.starts_with('_') && name.ends_with('_') {
        &name[1..name.len() - 1]
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_forms() {
        let list = scan_parameters("function (resolve, reject) { resolve(1); }").unwrap();
        assert_eq!(list.names, vec!["resolve", "reject"]);
        assert_eq!(list.success_name(), Some("resolve"));
        assert_eq!(list.failure_name(), Some("reject"));

        let named = scan_parameters("function work(done) {}").unwrap();
        assert_eq!(named.arity(), 1);

        let asynchronous = scan_parameters("async function (ok, fail) {}").unwrap();
        assert_eq!(asynchronous.arity(), 2);

        let none = scan_parameters("function () {}").unwrap();
        assert_eq!(none.arity(), 0);
    }

    #[test]
    fn test_arrow_forms() {
        assert_eq!(scan_parameters("(a, b) => a(1)").unwrap().arity(), 2);
        assert_eq!(scan_parameters("async (a) => a(1)").unwrap().arity(), 1);
        assert_eq!(scan_parameters("done => done(2)").unwrap().names, vec!["done"]);
        assert_eq!(scan_parameters("() => 3").unwrap().arity(), 0);
    }

    #[test]
    fn test_comments_and_wrapping() {
        let source = "/* header */ function (/* ok */ _resolve_, // fail\n reject) {}";
        let list = scan_parameters(source).unwrap();
        assert_eq!(list.names, vec!["resolve", "reject"]);

        let wrapped = scan_parameters("(function (resolve) {})").unwrap();
        assert_eq!(wrapped.names, vec!["resolve"]);

        let trailing = scan_parameters("function (resolve, reject,) {}").unwrap();
        assert_eq!(trailing.arity(), 2);

        let defaults = scan_parameters("function (resolve, reject = null) {}").unwrap();
        assert_eq!(defaults.failure_name(), Some("reject"));
    }

    #[test]
    fn test_too_many_parameters() {
        let err = scan_parameters("function (resolve, reject, extra) {}").unwrap_err();
        assert_eq!(
            err,
            ScanError::TooManyParameters {
                count: 3,
                names: "resolve, reject, extra".to_string()
            }
        );
        assert_eq!(err.name(), "TooManyParameters");
    }

    #[test]
    fn test_not_invocable() {
        assert_eq!(scan_parameters("42").unwrap_err(), ScanError::NotInvocable);
        assert_eq!(scan_parameters("").unwrap_err(), ScanError::NotInvocable);
        assert!(!is_invocable("var x = 1;"));
        assert!(is_invocable("function (a, b, c) {}"));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("count"));
        assert!(is_valid_identifier("$el"));
        assert!(is_valid_identifier("_private"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("with-dash"));
        assert!(!is_valid_identifier("class"));
        assert!(!is_valid_identifier(""));
    }
}
