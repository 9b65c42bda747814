//! Macro Engine (C9, spec §4.9): deterministic expansion of declarative
//! macros into Plan-IR + S-expression, with slot-filling questions for
//! whatever the caller hasn't supplied yet.
//!
//! Grounded in the teacher's `ob-templates::expander::TemplateExpander`
//! (`$param` substitution with a precedence order, `MissingParam` /
//! "prompt the user for what's missing" shape) and
//! `ob-templates::definition::TemplateDefinition` (named placeholders with
//! `required`/`prompt`/`example`, a plain-text `body`). This module
//! generalises that pattern to the spec's stricter contract: typed slots
//! with catalog-backed suggestions, an explicit step list (rather than one
//! free-text body) with optional `repeat` fan-out, and parameter values
//! that distinguish a literal from a `${VAR}` substitution from an
//! `{"$attr":"..."}` passthrough — because unlike the teacher's templates,
//! this engine's output is handed straight to [`crate::session`]'s
//! `accumulate_dsl`, never executed or further rewritten.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::external::SharedDictionary;

/// One named, typed slot a macro needs filled before it can expand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placeholder {
    pub name: String,
    pub required: bool,
    pub prompt: String,
    /// Populated lazily from the `DictionaryService` catalogue, not stored
    /// on the definition itself (SPEC_FULL §4 "catalog-backed slot
    /// suggestions").
    #[serde(skip)]
    pub suggestions: Option<Vec<String>>,
}

impl Placeholder {
    pub fn required(name: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            prompt: prompt.to_string(),
            suggestions: None,
        }
    }

    pub fn optional(name: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            prompt: prompt.to_string(),
            suggestions: None,
        }
    }
}

/// One parameter value in a macro step. Distinguished up front (rather than
/// inferred from string shape at substitution time) so expansion is total
/// and deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ParamValue {
    Literal(JsonValue),
    /// `${VAR}` — substituted from the user-supplied values map, or from
    /// `${ITEM}` when the step is under a `repeat`.
    Var(String),
    /// `{"$attr":"..."}` passthrough — an attribute-id reference preserved
    /// verbatim rather than substituted (spec §4.9).
    AttrRef(String),
}

impl ParamValue {
    /// The `"@x.y"` shorthand for `{"$attr":"x.y"}` (spec §4.9).
    pub fn parse_shorthand(raw: &str) -> Self {
        if let Some(attr) = raw.strip_prefix('@') {
            ParamValue::AttrRef(attr.to_string())
        } else if raw.starts_with("${") && raw.ends_with('}') {
            ParamValue::Var(raw[2..raw.len() - 1].to_string())
        } else {
            ParamValue::Literal(JsonValue::String(raw.to_string()))
        }
    }
}

/// Fan-out directive: repeat this step once per element of the array bound
/// to `over` in the values map, substituting `${ITEM}` with each element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatSpec {
    pub over: String,
}

/// One step in a macro's declared step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroStep {
    pub verb: String,
    /// Ordered on the definition for readability; rendering always emits
    /// parameters sorted by key regardless (spec §4.9 "deterministic").
    pub parameters: Vec<(String, ParamValue)>,
    pub repeat: Option<RepeatSpec>,
}

/// A declarative macro definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub name: String,
    pub placeholders: Vec<Placeholder>,
    pub steps: Vec<MacroStep>,
}

impl MacroDefinition {
    /// Startup-time check (spec §9 "Dynamic configuration"): every verb a
    /// macro step names must exist in some registered domain's vocabulary.
    /// Unresolved references are startup failures, not runtime ones — this
    /// returns the offending verb names rather than panicking so the
    /// caller can report all of them at once.
    pub fn unresolved_verbs<'a>(&'a self, known_verbs: &std::collections::HashSet<String>) -> Vec<&'a str> {
        self.steps
            .iter()
            .map(|s| s.verb.as_str())
            .filter(|v| !known_verbs.contains(*v))
            .collect()
    }
}

/// An outstanding slot-fill question returned when a macro can't yet expand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub placeholder: String,
    pub prompt: String,
    pub suggestions: Vec<String>,
}

/// One step in the expanded Plan-IR: a verb plus its fully-resolved
/// parameters (still carrying `{"$attr":...}` passthroughs verbatim).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub verb: String,
    pub parameters: BTreeMap<String, ResolvedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ResolvedValue {
    Literal(JsonValue),
    AttrRef(String),
}

/// Intermediate representation produced by macro expansion, 1:1
/// convertible to S-expression via [`render_sexpr`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanIr {
    pub steps: Vec<PlanStep>,
}

/// Either outcome of [`expand`]: outstanding questions, or a ready plan.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpansionOutcome {
    Questions(Vec<Question>),
    Plan(PlanIr),
}

/// Expands `macro_def` against `values` (a flat name→value map the caller
/// has collected so far). Returns every unanswered *required* placeholder
/// as a slot-fill question if any remain, otherwise the fully-substituted
/// Plan-IR (spec §4.9).
pub async fn expand(
    macro_def: &MacroDefinition,
    values: &BTreeMap<String, JsonValue>,
    dictionary: Option<&SharedDictionary>,
) -> ExpansionOutcome {
    let mut questions = Vec::new();
    for placeholder in &macro_def.placeholders {
        if placeholder.required && !values.contains_key(&placeholder.name) {
            let suggestions = match dictionary {
                Some(dict) => dict.suggestions_for(&placeholder.name).await,
                None => Vec::new(),
            };
            questions.push(Question {
                placeholder: placeholder.name.clone(),
                prompt: placeholder.prompt.clone(),
                suggestions,
            });
        }
    }
    if !questions.is_empty() {
        return ExpansionOutcome::Questions(questions);
    }

    let mut steps = Vec::new();
    for step in &macro_def.steps {
        match &step.repeat {
            None => steps.push(expand_step(step, values, None)),
            Some(repeat) => {
                let items = values
                    .get(&repeat.over)
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                for item in items {
                    steps.push(expand_step(step, values, Some(&item)));
                }
            }
        }
    }
    ExpansionOutcome::Plan(PlanIr { steps })
}

fn expand_step(
    step: &MacroStep,
    values: &BTreeMap<String, JsonValue>,
    item: Option<&JsonValue>,
) -> PlanStep {
    let mut parameters = BTreeMap::new();
    for (key, param) in &step.parameters {
        let resolved = match param {
            ParamValue::Literal(v) => ResolvedValue::Literal(v.clone()),
            ParamValue::AttrRef(attr) => ResolvedValue::AttrRef(attr.clone()),
            ParamValue::Var(name) if name == "ITEM" => {
                ResolvedValue::Literal(item.cloned().unwrap_or(JsonValue::Null))
            }
            ParamValue::Var(name) => {
                ResolvedValue::Literal(values.get(name).cloned().unwrap_or(JsonValue::Null))
            }
        };
        parameters.insert(key.clone(), resolved);
    }
    PlanStep {
        verb: step.verb.clone(),
        parameters,
    }
}

fn kebab(key: &str) -> String {
    key.replace('_', "-")
}

fn render_value(value: &ResolvedValue) -> String {
    match value {
        ResolvedValue::AttrRef(attr) => format!(r#"(attr-id "{attr}")"#),
        ResolvedValue::Literal(JsonValue::String(s)) => format!("\"{s}\""),
        ResolvedValue::Literal(JsonValue::Bool(b)) => b.to_string(),
        ResolvedValue::Literal(JsonValue::Number(n)) => n.to_string(),
        ResolvedValue::Literal(JsonValue::Null) => "\"\"".to_string(),
        ResolvedValue::Literal(other) => other.to_string(),
    }
}

/// Renders a [`PlanIr`] to S-expression text, one top-level expression per
/// step, parameters emitted sorted by key as `:kebab-key value` (spec
/// §4.9 "deterministic... sorted by key"). The result is handed to
/// [`crate::session::SessionManager::accumulate_dsl`] like any other DSL
/// fragment — the macro engine never bypasses the session manager.
pub fn render_sexpr(plan: &PlanIr) -> String {
    plan.steps
        .iter()
        .map(|step| {
            if step.parameters.is_empty() {
                format!("({})", step.verb)
            } else {
                let parts: Vec<String> = step
                    .parameters
                    .iter()
                    .map(|(k, v)| format!(":{} {}", kebab(k), render_value(v)))
                    .collect();
                format!("({} {})", step.verb, parts.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryDictionary;
    use serde_json::json;
    use std::sync::Arc;

    fn sample_macro() -> MacroDefinition {
        MacroDefinition {
            name: "onboard-with-products".to_string(),
            placeholders: vec![
                Placeholder::required("id", "CBU identifier"),
                Placeholder::optional("owner", "Case owner"),
            ],
            steps: vec![
                MacroStep {
                    verb: "case.create".to_string(),
                    parameters: vec![("id".to_string(), ParamValue::Var("id".to_string()))],
                    repeat: None,
                },
                MacroStep {
                    verb: "products.add".to_string(),
                    parameters: vec![("product".to_string(), ParamValue::Var("ITEM".to_string()))],
                    repeat: Some(RepeatSpec {
                        over: "products".to_string(),
                    }),
                },
            ],
        }
    }

    #[tokio::test]
    async fn missing_required_placeholder_yields_a_question() {
        let macro_def = sample_macro();
        let values = BTreeMap::new();
        let outcome = expand(&macro_def, &values, None).await;
        match outcome {
            ExpansionOutcome::Questions(qs) => {
                assert_eq!(qs.len(), 1);
                assert_eq!(qs[0].placeholder, "id");
            }
            ExpansionOutcome::Plan(_) => panic!("expected questions"),
        }
    }

    #[tokio::test]
    async fn question_carries_catalog_suggestions() {
        let macro_def = sample_macro();
        let dict: SharedDictionary =
            Arc::new(InMemoryDictionary::new().with_suggestions("id", &["CBU-1", "CBU-2"]));
        let values = BTreeMap::new();
        let outcome = expand(&macro_def, &values, Some(&dict)).await;
        match outcome {
            ExpansionOutcome::Questions(qs) => {
                assert_eq!(qs[0].suggestions, vec!["CBU-1", "CBU-2"]);
            }
            ExpansionOutcome::Plan(_) => panic!("expected questions"),
        }
    }

    #[tokio::test]
    async fn full_values_expand_to_plan_with_repeat_fanout() {
        let macro_def = sample_macro();
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), json!("CBU-1234"));
        values.insert("products".to_string(), json!(["CUSTODY", "FUND_ACCOUNTING"]));

        let outcome = expand(&macro_def, &values, None).await;
        let plan = match outcome {
            ExpansionOutcome::Plan(p) => p,
            ExpansionOutcome::Questions(qs) => panic!("expected a plan, got questions: {qs:?}"),
        };
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].verb, "case.create");
        assert_eq!(plan.steps[1].verb, "products.add");
        assert_eq!(plan.steps[2].verb, "products.add");
    }

    #[test]
    fn render_sexpr_sorts_parameters_by_key_and_is_deterministic() {
        let plan = PlanIr {
            steps: vec![PlanStep {
                verb: "kyc.begin".to_string(),
                parameters: BTreeMap::from([
                    ("tier".to_string(), ResolvedValue::Literal(json!("STANDARD"))),
                    ("investor".to_string(), ResolvedValue::Literal(json!("u-1"))),
                ]),
            }],
        };
        let rendered = render_sexpr(&plan);
        assert_eq!(rendered, r#"(kyc.begin :investor "u-1" :tier "STANDARD")"#);
    }

    #[test]
    fn render_sexpr_preserves_attr_ref_passthrough() {
        let plan = PlanIr {
            steps: vec![PlanStep {
                verb: "attr.bind".to_string(),
                parameters: BTreeMap::from([(
                    "attribute-id".to_string(),
                    ResolvedValue::AttrRef("entity.legal_name".to_string()),
                )]),
            }],
        };
        let rendered = render_sexpr(&plan);
        assert_eq!(
            rendered,
            r#"(attr.bind :attribute-id (attr-id "entity.legal_name"))"#
        );
    }

    /// The `$attr`/`@x.y` passthrough (spec §4.9) is only useful if the DSL
    /// it renders actually parses — `accumulate_dsl` parses every fragment
    /// before admitting it, and `attr-id` has no dot, so it relies on the
    /// parser accepting a non-dotted expression head.
    #[test]
    fn rendered_attr_ref_passthrough_parses_back() {
        let plan = PlanIr {
            steps: vec![PlanStep {
                verb: "attr.bind".to_string(),
                parameters: BTreeMap::from([(
                    "attribute-id".to_string(),
                    ResolvedValue::AttrRef("entity.legal_name".to_string()),
                )]),
            }],
        };
        let rendered = render_sexpr(&plan);
        let ast = crate::parser::parse(&rendered).expect("rendered DSL should parse");
        assert_eq!(ast.extract_verbs(), vec!["attr.bind".to_string()]);
        assert!(ast.extract_attribute_ids().contains("entity.legal_name"));
    }

    #[test]
    fn parses_at_shorthand_into_attr_ref() {
        assert_eq!(
            ParamValue::parse_shorthand("@entity.legal_name"),
            ParamValue::AttrRef("entity.legal_name".to_string())
        );
        assert_eq!(
            ParamValue::parse_shorthand("${cbu_id}"),
            ParamValue::Var("cbu_id".to_string())
        );
        assert_eq!(
            ParamValue::parse_shorthand("plain"),
            ParamValue::Literal(json!("plain"))
        );
    }

    #[test]
    fn unresolved_verbs_are_reported_for_startup_validation() {
        let macro_def = sample_macro();
        let known: std::collections::HashSet<String> =
            ["case.create".to_string()].into_iter().collect();
        assert_eq!(macro_def.unresolved_verbs(&known), vec!["products.add"]);
    }
}
