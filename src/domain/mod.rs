//! Domain Contract: the abstract interface and shared value types every
//! business domain implements uniformly.
//!
//! Shaped after an async-trait handler registered behind `Arc<dyn Domain>`,
//! generalised to carry the richer `Vocabulary`/`ArgumentSpec` typing a
//! structurally validated, multi-domain DSL needs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ast::Ast;
use crate::error::{EngineError, GenerationError, ValidationError, ValidationErrorKind};
use crate::resolver::Context;

/// Argument types a `VerbDefinition` can require.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgType {
    Uuid,
    String,
    Decimal,
    Integer,
    Boolean,
    Enum,
    Date,
    Array,
    Object,
}

/// Type-specific constraints for one argument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub arg_type: ArgType,
    pub required: bool,
    pub description: String,
    pub enum_values: Option<Vec<String>>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub pattern: Option<String>,
}

impl Default for ArgType {
    fn default() -> Self {
        ArgType::String
    }
}

impl ArgumentSpec {
    pub fn required(arg_type: ArgType, description: &str) -> Self {
        Self {
            arg_type,
            required: true,
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn optional(arg_type: ArgType, description: &str) -> Self {
        Self {
            arg_type,
            required: false,
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }
}

/// A domain-declared state transition: `{from_states, to_state}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_states: Vec<String>,
    pub to_state: String,
}

/// Definition of one DSL verb owned by a domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbDefinition {
    pub name: String,
    pub category: String,
    pub description: String,
    /// Ordered so generator templates can present arguments deterministically.
    pub arguments: Vec<(String, ArgumentSpec)>,
    pub examples: Vec<String>,
    pub state_transition: Option<StateTransition>,
    pub idempotent: bool,
}

impl VerbDefinition {
    pub fn arg(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }
}

/// Every verb name across every domain must match
/// `[a-z][a-z0-9-]*\.[a-z][a-z0-9-]*` — a category and a name joined by a dot.
pub fn verb_name_pattern() -> Regex {
    Regex::new(r"^[a-z][a-z0-9-]*\.[a-z][a-z0-9-]*$").expect("static pattern is valid")
}

/// Immutable per-domain vocabulary, frozen after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    pub domain_name: String,
    pub version: String,
    pub verbs: HashMap<String, VerbDefinition>,
}

impl Vocabulary {
    pub fn new(domain_name: &str, version: &str, verbs: Vec<VerbDefinition>) -> Self {
        let pattern = verb_name_pattern();
        for v in &verbs {
            debug_assert!(
                pattern.is_match(&v.name),
                "verb name `{}` does not match the required naming pattern",
                v.name
            );
        }
        Self {
            domain_name: domain_name.to_string(),
            version: version.to_string(),
            verbs: verbs.into_iter().map(|v| (v.name.clone(), v)).collect(),
        }
    }

    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self
            .verbs
            .values()
            .map(|v| v.category.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        cats.sort();
        cats
    }

    pub fn verbs_by_category(&self, category: &str) -> Vec<&VerbDefinition> {
        self.verbs
            .values()
            .filter(|v| v.category == category)
            .collect()
    }
}

/// A request to generate a DSL fragment from a natural-language (or
/// structured) instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub instruction: String,
    pub context: Context,
    /// Accumulated buffer, for prompt grounding only — never mutated here.
    pub existing_dsl: String,
    pub target_verb: Option<String>,
}

/// The result of a successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub dsl: String,
    pub context_delta: Context,
    pub explanation: String,
    pub confidence: f64,
}

/// Domain health, as reported by a periodic probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Domain invocation metrics, accumulated across calls to `generate_dsl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainMetrics {
    pub invocation_count: u64,
    pub error_count: u64,
    pub avg_latency: Duration,
}

/// The uniform capability set every business domain implements: identity,
/// vocabulary, validation, DSL generation, state machine, and health/metrics
/// reporting.
#[async_trait]
pub trait Domain: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;

    fn vocabulary(&self) -> &Vocabulary;

    /// Keywords this domain declares for the router's keyword-match
    /// strategy. Default: none.
    fn keywords(&self) -> &[&str] {
        &[]
    }

    /// Context keys this domain treats as a strong routing indicator, for
    /// the router's context-inference strategy, e.g. a hedge-fund domain
    /// declares `investor_id`/`fund_id`/`class_id`. Default: none.
    fn context_indicators(&self) -> &[&str] {
        &[]
    }

    /// All state names this domain's machine can be in, in declared order.
    fn states(&self) -> &[&str];

    /// `ValidateVerbs`: parses `dsl`, then checks every extracted verb
    /// against the vocabulary. Never short-circuits — every problem found
    /// is reported.
    fn validate_verbs(&self, dsl: &str) -> Vec<ValidationError> {
        validate_verbs_against(self.vocabulary(), dsl)
    }

    async fn generate_dsl(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError>;

    /// Derives the domain's current state from its tracked context (the
    /// domain decides which context keys carry state).
    fn current_state(&self, context: &Context) -> Option<String>;

    /// Strict state-machine check: no skipping, no rewind unless the
    /// domain's transition list explicitly allows it.
    fn validate_transition(&self, from: &str, to: &str) -> Result<(), EngineError>;

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn metrics(&self) -> DomainMetrics {
        DomainMetrics::default()
    }
}

/// Shared implementation of verb validation, usable by any `Domain` so
/// concrete domains only need to supply their vocabulary.
pub fn validate_verbs_against(vocabulary: &Vocabulary, dsl: &str) -> Vec<ValidationError> {
    let ast = match crate::parser::parse(dsl) {
        Ok(ast) => ast,
        Err(e) => {
            return vec![ValidationError::new(
                ValidationErrorKind::SyntaxError,
                e.message,
                e.position,
            )]
        }
    };

    let mut errors = Vec::new();
    for expr in ast.top_level() {
        validate_expression(vocabulary, expr, &mut errors);
    }
    errors
}

fn validate_expression(vocabulary: &Vocabulary, expr: &crate::ast::Node, errors: &mut Vec<ValidationError>) {
    let Some(verb_name) = expr.verb_name() else {
        return;
    };
    let position = expr.position();

    let Some(def) = vocabulary.verbs.get(verb_name) else {
        errors.push(
            ValidationError::new(
                ValidationErrorKind::UnknownVerb,
                format!("verb `{verb_name}` is not defined in this domain's vocabulary"),
                position,
            )
            .with_verb(verb_name),
        );
        return;
    };

    let provided = collect_keyword_args(expr);

    for (arg_name, spec) in &def.arguments {
        if spec.required && !provided.contains_key(arg_name) {
            errors.push(
                ValidationError::new(
                    ValidationErrorKind::MissingRequiredArgument,
                    format!("missing required argument `{arg_name}` for verb `{verb_name}`"),
                    position,
                )
                .with_verb(verb_name)
                .with_argument(arg_name),
            );
        }
    }

    for (arg_name, node) in &provided {
        let Some(spec) = def.arguments.iter().find(|(n, _)| n == arg_name).map(|(_, s)| s) else {
            continue;
        };
        check_argument_value(verb_name, arg_name, spec, node, errors);
    }
}

/// Pulls out `:key value` keyword-argument pairs from an expression's
/// arguments. Expression-typed arguments are opaque: the parser already
/// established their structural validity.
fn collect_keyword_args<'a>(expr: &'a crate::ast::Node) -> HashMap<String, &'a crate::ast::Node> {
    let mut out = HashMap::new();
    let args = expr.arguments();
    let mut i = 0;
    while i < args.len() {
        if let crate::ast::Node::Identifier { name, .. } = &args[i] {
            if let Some(key) = name.strip_prefix(':') {
                if let Some(value) = args.get(i + 1) {
                    out.insert(key.to_string(), value);
                    i += 2;
                    continue;
                }
            }
        }
        i += 1;
    }
    out
}

fn check_argument_value(
    verb_name: &str,
    arg_name: &str,
    spec: &ArgumentSpec,
    node: &crate::ast::Node,
    errors: &mut Vec<ValidationError>,
) {
    use crate::ast::Node;
    let position = node.position();

    // Opaque: an expression passed as an argument value has already had
    // its structural validity checked by the parser.
    if matches!(node, Node::Expression { .. }) {
        return;
    }

    match spec.arg_type {
        ArgType::Integer | ArgType::Decimal => {
            let Node::Number { text, .. } = node else {
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::TypeMismatch,
                        format!("argument `{arg_name}` of `{verb_name}` expects a number"),
                        position,
                    )
                    .with_verb(verb_name)
                    .with_argument(arg_name),
                );
                return;
            };
            if spec.arg_type == ArgType::Integer && text.contains('.') {
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::TypeMismatch,
                        format!("argument `{arg_name}` of `{verb_name}` expects an integer"),
                        position,
                    )
                    .with_verb(verb_name)
                    .with_argument(arg_name),
                );
                return;
            }
            if let Ok(n) = text.parse::<f64>() {
                if let Some(min) = spec.min_value {
                    if n < min {
                        errors.push(
                            ValidationError::new(
                                ValidationErrorKind::RangeViolation,
                                format!("argument `{arg_name}` of `{verb_name}` is below minimum {min}"),
                                position,
                            )
                            .with_verb(verb_name)
                            .with_argument(arg_name),
                        );
                    }
                }
                if let Some(max) = spec.max_value {
                    if n > max {
                        errors.push(
                            ValidationError::new(
                                ValidationErrorKind::RangeViolation,
                                format!("argument `{arg_name}` of `{verb_name}` is above maximum {max}"),
                                position,
                            )
                            .with_verb(verb_name)
                            .with_argument(arg_name),
                        );
                    }
                }
            }
        }
        ArgType::Boolean => {
            if !matches!(node, Node::Boolean { .. }) {
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::TypeMismatch,
                        format!("argument `{arg_name}` of `{verb_name}` expects a boolean"),
                        position,
                    )
                    .with_verb(verb_name)
                    .with_argument(arg_name),
                );
            }
        }
        ArgType::Enum => {
            let value = match node {
                Node::String { value, .. } => Some(value.clone()),
                Node::Identifier { name, .. } => Some(name.clone()),
                _ => None,
            };
            match (&spec.enum_values, value) {
                (Some(allowed), Some(v)) if !allowed.contains(&v) => {
                    errors.push(
                        ValidationError::new(
                            ValidationErrorKind::EnumViolation,
                            format!(
                                "argument `{arg_name}` of `{verb_name}` must be one of {allowed:?}, got `{v}`"
                            ),
                            position,
                        )
                        .with_verb(verb_name)
                        .with_argument(arg_name),
                    );
                }
                (_, None) => {
                    errors.push(
                        ValidationError::new(
                            ValidationErrorKind::TypeMismatch,
                            format!("argument `{arg_name}` of `{verb_name}` expects an enum-compatible value"),
                            position,
                        )
                        .with_verb(verb_name)
                        .with_argument(arg_name),
                    );
                }
                _ => {}
            }
        }
        ArgType::Uuid | ArgType::String | ArgType::Date => {
            let Node::String { value, .. } = node else {
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::TypeMismatch,
                        format!("argument `{arg_name}` of `{verb_name}` expects a string"),
                        position,
                    )
                    .with_verb(verb_name)
                    .with_argument(arg_name),
                );
                return;
            };
            if let Some(pattern) = &spec.pattern {
                if let Ok(re) = Regex::new(pattern) {
                    if !re.is_match(value) {
                        errors.push(
                            ValidationError::new(
                                ValidationErrorKind::PatternViolation,
                                format!(
                                    "argument `{arg_name}` of `{verb_name}` does not match pattern `{pattern}`"
                                ),
                                position,
                            )
                            .with_verb(verb_name)
                            .with_argument(arg_name),
                        );
                    }
                }
            }
        }
        ArgType::Array | ArgType::Object => {
            // Structural validity already established by the parser;
            // shape-level (element type, required keys) checks are a
            // domain-specific concern left to individual verb handlers.
        }
    }
}

/// `ExtractVerbs`/`ExtractAttributeIDs` as a convenience over a raw AST,
/// exposed here because domains need both during validation and
/// generation grounding.
pub fn ast_or_empty(dsl: &str) -> Option<Ast> {
    crate::parser::parse(dsl).ok()
}

pub fn json_to_display(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
