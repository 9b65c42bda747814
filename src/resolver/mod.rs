//! Placeholder / UUID resolver (C2, spec §4.2).
//!
//! Materialises `<placeholder>` tokens in DSL text from a context map, and
//! offers a best-effort `extract_context` used only to seed routing.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::ResolverError;

/// A flat context map: string keys to JSON-ish values, matching the shape
/// carried on `Session::Context` and `RoutingRequest::Context`.
pub type Context = HashMap<String, JsonValue>;

/// Registered fallback values for placeholders with no context entry.
#[derive(Debug, Clone, Default)]
pub struct Defaults(HashMap<String, JsonValue>);

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }
}

fn placeholder_regex() -> Regex {
    Regex::new(r"<([a-z][a-z0-9_]*)>").expect("static placeholder regex is valid")
}

/// Name-variant keys tried, in order, for a placeholder `foo_bar`:
/// `foo_bar`, `fooBar`, `foo-bar`, `FooBar`, `FOO_BAR`.
fn key_variants(snake: &str) -> Vec<String> {
    let camel = snake_to_camel(snake, false);
    let pascal = snake_to_camel(snake, true);
    let kebab = snake.replace('_', "-");
    let upper = snake.to_uppercase();
    vec![snake.to_string(), camel, kebab, pascal, upper]
}

fn snake_to_camel(snake: &str, pascal: bool) -> String {
    let mut out = String::with_capacity(snake.len());
    for (i, part) in snake.split('_').enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 && !pascal {
            out.push_str(part);
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn lookup<'a>(
    context: &'a Context,
    defaults: &'a Defaults,
    snake_name: &str,
) -> Option<&'a JsonValue> {
    for variant in key_variants(snake_name) {
        if let Some(v) = context.get(&variant) {
            return Some(v);
        }
    }
    defaults.0.get(snake_name)
}

/// Substitutes every `<name>` placeholder in `dsl` from `context` (or
/// `defaults` when the key is absent). Runs up to three passes: values
/// that themselves contain `<...>` get a second substitution pass; any
/// placeholder still present after that is an error.
pub fn resolve(dsl: &str, context: &Context, defaults: &Defaults) -> Result<String, ResolverError> {
    let re = placeholder_regex();
    let mut text = dsl.to_string();

    for _pass in 0..2 {
        if !re.is_match(&text) {
            return Ok(text);
        }
        let mut missing: Option<String> = None;
        let substituted = re.replace_all(&text, |caps: &regex::Captures| {
            let name = &caps[1];
            match lookup(context, defaults, name) {
                Some(v) => stringify(v),
                None => {
                    if missing.is_none() {
                        missing = Some(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });
        if let Some(name) = missing {
            return Err(ResolverError::MissingKey(name));
        }
        text = substituted.into_owned();
    }

    if let Some(caps) = re.captures(&text) {
        return Err(ResolverError::StillUnresolved(caps[1].to_string()));
    }
    Ok(text)
}

/// `ExtractContext`: best-effort scan for well-known argument shapes that
/// look like entity-id bindings, used only to seed routing (spec §4.2).
///
/// Recognises `:key "value"` keyword-argument pairs and single-string-arg
/// expressions named like an id field (`(cbu.id "CBU-1234")`).
pub fn extract_context(dsl: &str) -> Context {
    let mut out = Context::new();

    let keyword_re =
        Regex::new(r#":([a-z][a-z0-9_-]*)\s+"([^"]*)""#).expect("static regex is valid");
    for caps in keyword_re.captures_iter(dsl) {
        let key = caps[1].replace('-', "_");
        out.entry(key)
            .or_insert_with(|| JsonValue::String(caps[2].to_string()));
    }

    let expr_re = Regex::new(r#"\(([a-z][a-z0-9-]*\.(?:id|[a-z0-9-]*_id))\s+"([^"]*)"\)"#)
        .expect("static regex is valid");
    for caps in expr_re.captures_iter(dsl) {
        let verb = &caps[1];
        let key = verb.replace(['.', '-'], "_");
        out.entry(key)
            .or_insert_with(|| JsonValue::String(caps[2].to_string()));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, JsonValue)]) -> Context {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn resolves_exact_snake_case_key() {
        let context = ctx(&[("legal_name", json!("Acme Corp"))]);
        let out = resolve("(case.create :name <legal_name>)", &context, &Defaults::new()).unwrap();
        assert_eq!(out, "(case.create :name Acme Corp)");
    }

    #[test]
    fn resolves_via_camel_case_variant() {
        let context = ctx(&[("legalName", json!("Acme Corp"))]);
        let out = resolve("(case.create :name <legal_name>)", &context, &Defaults::new()).unwrap();
        assert_eq!(out, "(case.create :name Acme Corp)");
    }

    #[test]
    fn missing_key_without_default_is_error() {
        let err = resolve("(case.create :name <legal_name>)", &Context::new(), &Defaults::new())
            .unwrap_err();
        assert!(matches!(err, ResolverError::MissingKey(k) if k == "legal_name"));
    }

    #[test]
    fn default_is_used_when_context_lacks_key() {
        let defaults = Defaults::new().with("tier", json!("STANDARD"));
        let out = resolve("(kyc.begin :tier <tier>)", &Context::new(), &defaults).unwrap();
        assert_eq!(out, "(kyc.begin :tier STANDARD)");
    }

    #[test]
    fn resolve_is_idempotent_once_it_succeeds() {
        let context = ctx(&[("legal_name", json!("Acme"))]);
        let once = resolve("(case.create :name <legal_name>)", &context, &Defaults::new()).unwrap();
        let twice = resolve(&once, &context, &Defaults::new()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn nested_placeholder_resolved_in_second_pass() {
        let context = ctx(&[
            ("outer", json!("<inner>")),
            ("inner", json!("value")),
        ]);
        let out = resolve("(x.y :z <outer>)", &context, &Defaults::new()).unwrap();
        assert_eq!(out, "(x.y :z value)");
    }

    #[test]
    fn extract_context_finds_keyword_and_expression_ids() {
        let dsl = r#"(kyc.begin :investor "u-1" :tier "STANDARD") (cbu.id "CBU-1234")"#;
        let context = extract_context(dsl);
        assert_eq!(context.get("investor").unwrap(), &json!("u-1"));
        assert_eq!(context.get("cbu_id").unwrap(), &json!("CBU-1234"));
    }
}
