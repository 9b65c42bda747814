//! Hedge-fund investor domain (C8, spec §4.8): prospective-investor
//! onboarding through subscription, redemption and offboarding.
//!
//! ~17 verbs across 7 categories; an 11-state machine from `OPPORTUNITY`
//! through `OFFBOARDED`. Same shape as [`crate::domains::onboarding`],
//! grounded in the same teacher pattern (`domains/kyc.rs` for the
//! KYC-approval verb shape in particular).

use async_trait::async_trait;

use crate::domain::{
    ArgType, ArgumentSpec, Domain, DomainMetrics, GenerationRequest, GenerationResponse,
    HealthStatus, StateTransition, VerbDefinition, Vocabulary,
};
use crate::error::{EngineError, GenerationError};
use crate::resolver::{self, Context, Defaults};

const STATES: &[&str] = &[
    "OPPORTUNITY",
    "PRECHECKS",
    "KYC_PENDING",
    "KYC_APPROVED",
    "SUB_PENDING_CASH",
    "FUNDED_PENDING_NAV",
    "ISSUED",
    "ACTIVE",
    "REDEEM_PENDING",
    "REDEEMED",
    "OFFBOARDED",
];

struct VerbSeed {
    name: &'static str,
    category: &'static str,
    description: &'static str,
    args: &'static [(&'static str, ArgType, bool)],
    enters_state: Option<&'static str>,
    idempotent: bool,
}

const VERBS: &[VerbSeed] = &[
    // opportunity
    VerbSeed { name: "investor.start-opportunity", category: "opportunity", description: "Opens a prospective-investor opportunity.", args: &[("legal-name", ArgType::String, true), ("type", ArgType::Enum, true)], enters_state: Some("OPPORTUNITY"), idempotent: true },
    VerbSeed { name: "investor.decline-opportunity", category: "opportunity", description: "Declines a prospective-investor opportunity.", args: &[("reason", ArgType::String, true)], enters_state: None, idempotent: false },
    // KYC
    VerbSeed { name: "kyc.begin", category: "kyc", description: "Begins KYC review for the investor.", args: &[("investor", ArgType::String, true), ("tier", ArgType::Enum, true)], enters_state: Some("KYC_PENDING"), idempotent: false },
    VerbSeed { name: "kyc.approve", category: "kyc", description: "Approves investor KYC.", args: &[("investor", ArgType::String, true), ("risk", ArgType::Enum, true), ("refresh-due", ArgType::Date, true), ("approved-by", ArgType::String, true)], enters_state: Some("KYC_APPROVED"), idempotent: false },
    VerbSeed { name: "kyc.reject", category: "kyc", description: "Rejects investor KYC.", args: &[("investor", ArgType::String, true), ("reason", ArgType::String, true)], enters_state: None, idempotent: false },
    VerbSeed { name: "kyc.refresh", category: "kyc", description: "Refreshes a periodic KYC review.", args: &[("investor", ArgType::String, true)], enters_state: None, idempotent: false },
    // monitoring
    VerbSeed { name: "precheck.run", category: "monitoring", description: "Runs sanctions/PEP prechecks.", args: &[("investor", ArgType::String, true)], enters_state: Some("PRECHECKS"), idempotent: false },
    VerbSeed { name: "monitor.flag", category: "monitoring", description: "Flags an ongoing monitoring concern.", args: &[("investor", ArgType::String, true), ("reason", ArgType::String, true)], enters_state: None, idempotent: false },
    // tax / banking
    VerbSeed { name: "tax.record-form", category: "tax-banking", description: "Records a tax form (W-8/W-9 etc.).", args: &[("investor", ArgType::String, true), ("form", ArgType::Enum, true)], enters_state: None, idempotent: false },
    VerbSeed { name: "banking.record-instructions", category: "tax-banking", description: "Records settlement banking instructions.", args: &[("investor", ArgType::String, true), ("iban", ArgType::String, true)], enters_state: None, idempotent: false },
    // subscription
    VerbSeed { name: "subscribe.request", category: "subscription", description: "Requests a subscription into the fund.", args: &[("investor", ArgType::String, true), ("amount", ArgType::Decimal, true), ("currency", ArgType::Enum, true), ("trade-date", ArgType::Date, true)], enters_state: Some("SUB_PENDING_CASH"), idempotent: false },
    VerbSeed { name: "subscribe.confirm-cash", category: "subscription", description: "Confirms subscription cash received.", args: &[("investor", ArgType::String, true)], enters_state: Some("FUNDED_PENDING_NAV"), idempotent: false },
    VerbSeed { name: "subscribe.issue-units", category: "subscription", description: "Issues units at the applicable NAV.", args: &[("investor", ArgType::String, true), ("nav-per-unit", ArgType::Decimal, true)], enters_state: Some("ISSUED"), idempotent: false },
    VerbSeed { name: "subscribe.activate", category: "subscription", description: "Activates the investor's position.", args: &[("investor", ArgType::String, true)], enters_state: Some("ACTIVE"), idempotent: false },
    // redemption
    VerbSeed { name: "redeem.request", category: "redemption", description: "Requests redemption of units.", args: &[("investor", ArgType::String, true), ("units", ArgType::Decimal, true)], enters_state: Some("REDEEM_PENDING"), idempotent: false },
    VerbSeed { name: "redeem.settle", category: "redemption", description: "Settles a redemption payout.", args: &[("investor", ArgType::String, true)], enters_state: Some("REDEEMED"), idempotent: false },
    // offboarding
    VerbSeed { name: "investor.offboard", category: "offboarding", description: "Offboards the investor from the fund.", args: &[("investor", ArgType::String, true), ("reason", ArgType::String, false)], enters_state: Some("OFFBOARDED"), idempotent: false },
];

/// Enum and range constraints for this domain's `ArgType::Enum`/`Decimal`
/// arguments, applied after the bare `VerbSeed` table is built — same
/// pattern as [`crate::domains::onboarding::apply_constraints`].
fn apply_constraints(verb: &str, arg_name: &str, spec: ArgumentSpec) -> ArgumentSpec {
    match (verb, arg_name) {
        ("investor.start-opportunity", "type") => spec.with_enum(&["INDIVIDUAL", "ENTITY"]),
        ("kyc.begin", "tier") => spec.with_enum(&["STANDARD", "ENHANCED"]),
        ("kyc.approve", "risk") => spec.with_enum(&["LOW", "MEDIUM", "HIGH"]),
        ("tax.record-form", "form") => spec.with_enum(&["W-8BEN", "W-8BEN-E", "W-9"]),
        ("subscribe.request", "currency") => spec.with_enum(&["USD", "EUR", "GBP"]),
        ("subscribe.request", "amount") => spec.with_range(Some(0.0), None),
        ("subscribe.issue-units", "nav-per-unit") => spec.with_range(Some(0.0), None),
        ("redeem.request", "units") => spec.with_range(Some(0.0), None),
        _ => spec,
    }
}

fn build_vocabulary() -> Vocabulary {
    let verbs = VERBS
        .iter()
        .map(|seed| VerbDefinition {
            name: seed.name.to_string(),
            category: seed.category.to_string(),
            description: seed.description.to_string(),
            arguments: seed
                .args
                .iter()
                .map(|(name, ty, required)| {
                    let spec = if *required {
                        ArgumentSpec::required(ty.clone(), name)
                    } else {
                        ArgumentSpec::optional(ty.clone(), name)
                    };
                    (name.to_string(), apply_constraints(seed.name, name, spec))
                })
                .collect(),
            examples: Vec::new(),
            state_transition: seed.enters_state.map(|to| StateTransition {
                from_states: Vec::new(),
                to_state: to.to_string(),
            }),
            idempotent: seed.idempotent,
        })
        .collect();
    Vocabulary::new("hedge-fund-investor", "1.0.0", verbs)
}

const PHRASE_TEMPLATES: &[(&str, &str)] = &[
    ("start an opportunity", "investor.start-opportunity"),
    ("new opportunity", "investor.start-opportunity"),
    ("begin kyc", "kyc.begin"),
    ("start kyc", "kyc.begin"),
    ("approve kyc", "kyc.approve"),
    ("reject kyc", "kyc.reject"),
    ("request a subscription", "subscribe.request"),
    ("subscribe", "subscribe.request"),
    ("confirm cash", "subscribe.confirm-cash"),
    ("issue units", "subscribe.issue-units"),
    ("request redemption", "redeem.request"),
    ("offboard", "investor.offboard"),
];

pub struct HedgeFundDomain {
    vocabulary: Vocabulary,
}

impl HedgeFundDomain {
    pub fn new() -> Self {
        Self {
            vocabulary: build_vocabulary(),
        }
    }

    fn resolve_target_verb(&self, request: &GenerationRequest) -> Option<String> {
        if let Some(verb) = &request.target_verb {
            if self.vocabulary.verbs.contains_key(verb) {
                return Some(verb.clone());
            }
        }
        let lowered = request.instruction.to_lowercase();
        PHRASE_TEMPLATES
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase))
            .map(|(_, verb)| verb.to_string())
    }
}

impl Default for HedgeFundDomain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Domain for HedgeFundDomain {
    fn name(&self) -> &str {
        "hedge-fund-investor"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Hedge-fund prospective-investor lifecycle: opportunity, KYC, subscription, redemption and offboarding."
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn keywords(&self) -> &[&str] {
        &["hedge-fund", "subscription", "redemption", "nav", "investor", "fund"]
    }

    fn context_indicators(&self) -> &[&str] {
        &["investor_id", "fund_id", "class_id", "kyc_state"]
    }

    fn states(&self) -> &[&str] {
        STATES
    }

    async fn generate_dsl(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let verb_name = self
            .resolve_target_verb(request)
            .ok_or_else(|| GenerationError::terminal("could not determine a hedge-fund verb from this instruction"))?;

        let def = self
            .vocabulary
            .verbs
            .get(&verb_name)
            .expect("resolve_target_verb only returns known verbs");

        let mut parts = Vec::new();
        for (arg_name, spec) in &def.arguments {
            // The DSL keeps the domain's kebab-case argument name verbatim;
            // the resolver placeholder it resolves against must be the
            // `[a-z][a-z0-9_]*`-shaped snake form (spec §6 "placeholder
            // syntax"), same convention as the onboarding domain.
            let placeholder = arg_name.replace('-', "_");
            let present = request.context.contains_key(&placeholder);
            if !spec.required && !present {
                continue;
            }
            let token = if matches!(
                spec.arg_type,
                crate::domain::ArgType::Integer | crate::domain::ArgType::Decimal | crate::domain::ArgType::Boolean
            ) {
                format!(":{arg_name} <{placeholder}>")
            } else {
                format!(":{arg_name} \"<{placeholder}>\"")
            };
            parts.push(token);
        }

        let template = if parts.is_empty() {
            format!("({})", verb_name)
        } else {
            format!("({} {})", verb_name, parts.join(" "))
        };

        let resolved = resolver::resolve(&template, &request.context, &Defaults::new())
            .map_err(|e| GenerationError::terminal(format!("cannot generate `{verb_name}`: {e}")))?;

        let mut context_delta = Context::new();
        if let Some(state) = VERBS
            .iter()
            .find(|s| s.name == verb_name)
            .and_then(|s| s.enters_state)
        {
            context_delta.insert("kyc_state".to_string(), serde_json::json!(state));
        }

        Ok(GenerationResponse {
            dsl: resolved,
            context_delta,
            explanation: format!("generated `{verb_name}` from the hedge-fund vocabulary"),
            confidence: 0.8,
        })
    }

    fn current_state(&self, context: &Context) -> Option<String> {
        context
            .get("kyc_state")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn validate_transition(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let from_idx = STATES.iter().position(|s| *s == from);
        let to_idx = STATES.iter().position(|s| *s == to);
        match (from_idx, to_idx) {
            (Some(f), Some(t)) if t == f || t == f + 1 => Ok(()),
            _ => Err(EngineError::InvalidStateTransition {
                domain: self.name().to_string(),
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn metrics(&self) -> DomainMetrics {
        DomainMetrics::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vocabulary_has_no_duplicate_verbs() {
        let domain = HedgeFundDomain::new();
        assert_eq!(domain.vocabulary().verbs.len(), VERBS.len());
    }

    #[test]
    fn every_verb_name_matches_the_required_pattern() {
        let pattern = crate::domain::verb_name_pattern();
        for seed in VERBS {
            assert!(pattern.is_match(seed.name), "bad verb name: {}", seed.name);
        }
    }

    #[tokio::test]
    async fn generates_subscribe_request_from_context() {
        let domain = HedgeFundDomain::new();
        let mut context = Context::new();
        context.insert("investor".to_string(), json!("u-1"));
        context.insert("amount".to_string(), json!(1000000.00));
        context.insert("currency".to_string(), json!("USD"));
        context.insert("trade_date".to_string(), json!("2024-01-15"));
        let request = GenerationRequest {
            instruction: "subscribe for the investor".to_string(),
            context,
            existing_dsl: String::new(),
            target_verb: None,
        };
        let response = domain.generate_dsl(&request).await.unwrap();
        assert!(response.dsl.starts_with("(subscribe.request"));
        assert_eq!(
            response.context_delta.get("kyc_state").unwrap(),
            &json!("SUB_PENDING_CASH")
        );
    }

    #[test]
    fn state_machine_is_strictly_linear() {
        let domain = HedgeFundDomain::new();
        assert!(domain.validate_transition("KYC_PENDING", "KYC_APPROVED").is_ok());
        assert!(domain.validate_transition("KYC_PENDING", "ACTIVE").is_err());
        assert!(domain.validate_transition("OPPORTUNITY", "OPPORTUNITY").is_ok());
    }

    #[tokio::test]
    async fn hedge_fund_happy_path_reaches_sub_pending_cash() {
        let domain = HedgeFundDomain::new();
        let dsl = r#"(investor.start-opportunity :legal-name "john smith" :type "INDIVIDUAL")
                     (kyc.begin :investor "u-1" :tier "STANDARD")
                     (kyc.approve :investor "u-1" :risk "MEDIUM" :refresh-due "2025-01-01" :approved-by "system")
                     (subscribe.request :investor "u-1" :amount 1000000.00 :currency "USD" :trade-date "2024-01-15")"#;
        let errors = domain.validate_verbs(dsl);
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    #[test]
    fn currency_outside_declared_enum_is_rejected() {
        let domain = HedgeFundDomain::new();
        let errors = domain.validate_verbs(
            r#"(subscribe.request :investor "u-1" :amount 1000000.00 :currency "ZZZ" :trade-date "2024-01-15")"#,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::error::ValidationErrorKind::EnumViolation);
    }

    #[test]
    fn negative_amount_violates_the_declared_range() {
        let domain = HedgeFundDomain::new();
        let errors = domain.validate_verbs(
            r#"(subscribe.request :investor "u-1" :amount -5.00 :currency "USD" :trade-date "2024-01-15")"#,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::error::ValidationErrorKind::RangeViolation);
    }
}
