// fusillade-engine: Response value extraction
//
// Extractors run after a response body is available and write into the
// worker's variable scope. A missing match stores the empty string and
// warns; it never fails the attempt.

use crate::error::{EngineError, EngineResult};
use crate::vars::VariableScope;
use fusillade_config::{ExtractorConfig, ExtractorKind};
use serde_json_path::JsonPath;
use tracing::warn;

/// Largest response body the extractors will look at
pub const BODY_CAP: usize = 1024 * 1024;

/// A compiled extractor, built once at startup
#[derive(Debug, Clone)]
pub struct Extractor {
    name: String,
    matcher: Matcher,
    on_error: bool,
}

#[derive(Debug, Clone)]
enum Matcher {
    JsonPath(JsonPath),
    Regex(regex::Regex),
}

impl Extractor {
    /// Compile an extractor; bad expressions are fatal before the run
    pub fn compile(config: &ExtractorConfig) -> EngineResult<Self> {
        let matcher = match config.kind {
            ExtractorKind::Jsonpath => {
                let normalized = normalize_path(&config.expr);
                let path = JsonPath::parse(&normalized).map_err(|e| {
                    EngineError::ConfigInvalid(format!(
                        "extractor {}: bad jsonpath {:?}: {}",
                        config.name, config.expr, e
                    ))
                })?;
                Matcher::JsonPath(path)
            }
            ExtractorKind::Regex => {
                let re = regex::Regex::new(&config.expr).map_err(|e| {
                    EngineError::ConfigInvalid(format!(
                        "extractor {}: bad regex {:?}: {}",
                        config.name, config.expr, e
                    ))
                })?;
                Matcher::Regex(re)
            }
        };

        Ok(Self {
            name: config.name.clone(),
            matcher,
            on_error: config.on_error,
        })
    }

    /// Whether this extractor runs on responses with error status
    pub fn runs_on_error(&self) -> bool {
        self.on_error
    }

    /// Run against a response body and store the result in the scope
    pub fn apply(&self, body: &[u8], scope: &VariableScope) {
        let value = self.extract(body);
        match value {
            Some(value) => scope.set(self.name.clone(), value),
            None => {
                warn!(extractor = %self.name, "extraction missed, storing empty value");
                scope.set(self.name.clone(), String::new());
            }
        }
    }

    fn extract(&self, body: &[u8]) -> Option<String> {
        let body = &body[..body.len().min(BODY_CAP)];
        match &self.matcher {
            Matcher::JsonPath(path) => {
                let value: serde_json::Value = serde_json::from_slice(body).ok()?;
                let node = path.query(&value).first()?.clone();
                Some(stringify(&node))
            }
            Matcher::Regex(re) => {
                let text = std::str::from_utf8(body).ok()?;
                let captures = re.captures(text)?;
                let matched = captures.get(1).or_else(|| captures.get(0))?;
                Some(matched.as_str().to_string())
            }
        }
    }
}

/// Run every extractor configured for an endpoint
pub fn run_extractors(
    extractors: &[Extractor],
    body: &[u8],
    error_status: bool,
    scope: &VariableScope,
) {
    for extractor in extractors {
        if error_status && !extractor.runs_on_error() {
            continue;
        }
        extractor.apply(body, scope);
    }
}

/// Stringify the terminal value of a JSONPath query
fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize a dotted path (`a.b.0.c`) to RFC 9535 (`$.a.b[0].c`)
fn normalize_path(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.starts_with('$') {
        return trimmed.to_string();
    }

    let mut out = String::from("$");
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            continue;
        }
        if segment.chars().all(|c| c.is_ascii_digit()) {
            out.push('[');
            out.push_str(segment);
            out.push(']');
        } else {
            out.push('.');
            out.push_str(segment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jsonpath(name: &str, expr: &str) -> Extractor {
        Extractor::compile(&ExtractorConfig {
            name: name.to_string(),
            kind: ExtractorKind::Jsonpath,
            expr: expr.to_string(),
            on_error: false,
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_dotted_path() {
        assert_eq!(normalize_path("a.b.0.c"), "$.a.b[0].c");
        assert_eq!(normalize_path("$.a.b[0].c"), "$.a.b[0].c");
        assert_eq!(normalize_path("token"), "$.token");
    }

    #[test]
    fn test_jsonpath_extraction() {
        let scope = VariableScope::new();
        let body = br#"{"a": {"b": [{"c": "hit"}]}}"#;
        jsonpath("val", "a.b.0.c").apply(body, &scope);
        assert_eq!(scope.get("val").as_deref(), Some("hit"));
    }

    #[test]
    fn test_jsonpath_number_stringified() {
        let scope = VariableScope::new();
        jsonpath("id", "$.user.id").apply(br#"{"user": {"id": 42}}"#, &scope);
        assert_eq!(scope.get("id").as_deref(), Some("42"));
    }

    #[test]
    fn test_regex_first_capture_group() {
        let scope = VariableScope::new();
        let extractor = Extractor::compile(&ExtractorConfig {
            name: "csrf".to_string(),
            kind: ExtractorKind::Regex,
            expr: r#"csrf=(\w+)"#.to_string(),
            on_error: false,
        })
        .unwrap();
        extractor.apply(b"session; csrf=abc123; path=/", &scope);
        assert_eq!(scope.get("csrf").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_regex_full_match_without_group() {
        let scope = VariableScope::new();
        let extractor = Extractor::compile(&ExtractorConfig {
            name: "word".to_string(),
            kind: ExtractorKind::Regex,
            expr: r"\d+".to_string(),
            on_error: false,
        })
        .unwrap();
        extractor.apply(b"order 789 accepted", &scope);
        assert_eq!(scope.get("word").as_deref(), Some("789"));
    }

    #[test]
    fn test_miss_stores_empty() {
        let scope = VariableScope::new();
        jsonpath("gone", "$.missing").apply(br#"{"present": 1}"#, &scope);
        assert_eq!(scope.get("gone").as_deref(), Some(""));
    }

    #[test]
    fn test_on_error_gate() {
        let scope = VariableScope::new();
        let skipped = jsonpath("skipped", "$.token");
        let extractors = vec![skipped];
        run_extractors(&extractors, br#"{"token": "x"}"#, true, &scope);
        assert!(scope.get("skipped").is_none());

        run_extractors(&extractors, br#"{"token": "x"}"#, false, &scope);
        assert_eq!(scope.get("skipped").as_deref(), Some("x"));
    }

    #[test]
    fn test_bad_expression_is_fatal() {
        let err = Extractor::compile(&ExtractorConfig {
            name: "bad".to_string(),
            kind: ExtractorKind::Regex,
            expr: "(unclosed".to_string(),
            on_error: false,
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid(_)));
    }
}
