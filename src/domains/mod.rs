//! Concrete domain implementations (C7, C8): onboarding and hedge-fund
//! investor servicing. Each submodule owns its vocabulary, state machine,
//! and NL-phrase-to-verb mapping; neither depends on the other.

pub mod hedge_fund;
pub mod onboarding;

pub use hedge_fund::HedgeFundDomain;
pub use onboarding::OnboardingDomain;
