// fusillade-engine: Placeholder substitution
//
// Syntax: {{name}} or {{name|default}}. Resolution order: variable scope,
// then feeder record, then the default. Unresolvable tokens stay verbatim.

use crate::vars::VariableScope;
use std::collections::HashMap;

/// Substitute all placeholders in a template string
pub fn render(
    template: &str,
    scope: Option<&VariableScope>,
    record: Option<&HashMap<String, String>>,
) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let token = &after_open[..close];
                match resolve(token, scope, record) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("{{");
                        out.push_str(token);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated token, keep the tail as-is
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve(
    token: &str,
    scope: Option<&VariableScope>,
    record: Option<&HashMap<String, String>>,
) -> Option<String> {
    let (name, default) = match token.split_once('|') {
        Some((name, default)) => (name.trim(), Some(default)),
        None => (token.trim(), None),
    };

    if let Some(scope) = scope {
        if let Some(value) = scope.get(name) {
            return Some(value);
        }
    }
    if let Some(record) = record {
        if let Some(value) = record.get(name) {
            return Some(value.clone());
        }
    }
    default.map(|d| d.to_string())
}
