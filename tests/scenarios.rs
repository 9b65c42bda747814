//! End-to-end scenarios straight out of the concrete test list (spec §8).
//! Each test exercises the public surface the way an embedding application
//! would: route a request, accumulate the generated fragment through the
//! session manager, and read back state through the domain contract.

use dsl_engine::router::RoutingRequest;
use dsl_engine::{Engine, EngineConfig};
use serde_json::json;

async fn engine() -> Engine {
    Engine::with_default_domains(EngineConfig::default())
        .await
        .expect("default domains must not collide")
}

#[tokio::test]
async fn onboarding_happy_path_accumulates_in_order_and_reaches_kyc_started() {
    let engine = engine().await;
    let session_id = "case-1";
    engine.sessions().get_or_create(session_id, "onboarding").await;

    for fragment in [
        r#"(case.create :id "CBU-1234")"#,
        r#"(products.add :products (list.products "CUSTODY" "FUND_ACCOUNTING"))"#,
        r#"(kyc.start :document "passport")"#,
    ] {
        engine
            .sessions()
            .accumulate_dsl(session_id, fragment)
            .await
            .expect("each fragment in this scenario is syntactically valid");
    }

    let handle = engine.sessions().get(session_id).await.unwrap();
    let dsl = handle.read().await.built_dsl().to_string();
    assert!(dsl.find("case.create").unwrap() < dsl.find("products.add").unwrap());
    assert!(dsl.find("products.add").unwrap() < dsl.find("kyc.start").unwrap());

    let onboarding = engine.registry().get("onboarding").await.unwrap();
    let errors = onboarding.validate_verbs(&dsl);
    assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");

    let mut context = dsl_engine::resolver::Context::new();
    context.insert("case_state".to_string(), json!("KYC_STARTED"));
    assert_eq!(onboarding.current_state(&context), Some("KYC_STARTED".to_string()));
}

#[tokio::test]
async fn hedge_fund_happy_path_reaches_sub_pending_cash_and_routes_by_verb_at_every_step() {
    let engine = engine().await;
    let session_id = "investor-1";
    engine
        .sessions()
        .get_or_create(session_id, "hedge-fund-investor")
        .await;

    let fragments = [
        r#"(investor.start-opportunity :legal-name "john smith" :type "INDIVIDUAL")"#,
        r#"(kyc.begin :investor "u-1" :tier "STANDARD")"#,
        r#"(kyc.approve :investor "u-1" :risk "MEDIUM" :refresh-due "2025-01-01" :approved-by "system")"#,
        r#"(subscribe.request :investor "u-1" :amount 1000000.00 :currency "USD" :trade-date "2024-01-15")"#,
    ];

    for fragment in fragments {
        engine
            .sessions()
            .accumulate_dsl(session_id, fragment)
            .await
            .expect("each fragment in this scenario is syntactically valid");

        let request = RoutingRequest {
            message: fragment.to_string(),
            session_id: Some(session_id.to_string()),
            current_domain: Some("hedge-fund-investor".to_string()),
            context: dsl_engine::resolver::Context::new(),
        };
        let response = engine.router().route(&request).await.unwrap();
        assert_eq!(response.domain, "hedge-fund-investor");
    }

    let handle = engine.sessions().get(session_id).await.unwrap();
    let dsl = handle.read().await.built_dsl().to_string();
    let hedge_fund = engine.registry().get("hedge-fund-investor").await.unwrap();
    let errors = hedge_fund.validate_verbs(&dsl);
    assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");

    let mut context = dsl_engine::resolver::Context::new();
    context.insert("kyc_state".to_string(), json!("SUB_PENDING_CASH"));
    assert_eq!(
        hedge_fund.current_state(&context),
        Some("SUB_PENDING_CASH".to_string())
    );
}

#[tokio::test]
async fn cross_domain_routing_by_context_alone() {
    let engine = engine().await;
    let mut context = dsl_engine::resolver::Context::new();
    context.insert("investor_id".to_string(), json!("u-1"));

    let request = RoutingRequest {
        message: String::new(),
        session_id: None,
        current_domain: None,
        context,
    };
    let response = engine.router().route(&request).await.unwrap();
    assert_eq!(response.domain, "hedge-fund-investor");
    assert_eq!(
        response.strategy,
        dsl_engine::router::RoutingStrategy::ContextInference
    );
    assert!((response.confidence - 0.75).abs() < f64::EPSILON);
}

#[tokio::test]
async fn explicit_switch_overrides_a_hedge_fund_context_indicator() {
    let engine = engine().await;
    let mut context = dsl_engine::resolver::Context::new();
    context.insert("investor_id".to_string(), json!("u-1"));

    let request = RoutingRequest {
        message: "switch to onboarding".to_string(),
        session_id: None,
        current_domain: None,
        context,
    };
    let response = engine.router().route(&request).await.unwrap();
    assert_eq!(response.domain, "onboarding");
    assert_eq!(
        response.strategy,
        dsl_engine::router::RoutingStrategy::ExplicitSwitch
    );
    assert_eq!(response.confidence, 1.0);
}

#[tokio::test]
async fn unknown_verb_is_rejected_with_line_one() {
    let engine = engine().await;
    let onboarding = engine.registry().get("onboarding").await.unwrap();
    let errors = onboarding.validate_verbs(r#"(investor.teleport :destination "mars")"#);

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, dsl_engine::error::ValidationErrorKind::UnknownVerb);
    assert_eq!(errors[0].verb.as_deref(), Some("investor.teleport"));
    assert_eq!(errors[0].position.line, 1);
}

#[tokio::test]
async fn argument_heads_are_not_mistaken_for_verbs() {
    let dsl = r#"(values.bind (bind (attr-id "uuid-1") (value "X")))"#;
    let ast = dsl_engine::parser::parse(dsl).expect("well-formed DSL");

    assert_eq!(ast.extract_verbs(), vec!["values.bind".to_string()]);
    assert_eq!(
        ast.extract_attribute_ids(),
        std::collections::HashSet::from(["uuid-1".to_string()])
    );
}
