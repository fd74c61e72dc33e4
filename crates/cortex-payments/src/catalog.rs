//! Pricing Catalog
//!
//! Subscription plans, one-time credit packs and overage pricing. The catalog
//! is fixed at compile time; all money is integer US cents.

use cortex_core::PlanTier;
use serde::Serialize;

/// Sentinel for "no limit" in plan limits
pub const UNLIMITED: i64 = -1;

/// Usage limits attached to a plan
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    /// Tokens included per month, `UNLIMITED` for no cap
    pub tokens_per_month: i64,
    pub models_access: &'static [&'static str],
    /// API calls per month, `UNLIMITED` for no cap
    pub api_calls: i64,
    pub support_level: &'static str,
}

/// A subscription plan
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPlan {
    pub id: &'static str,
    #[serde(skip)]
    pub tier: PlanTier,
    pub name: &'static str,
    pub description: &'static str,
    pub monthly_price_cents: i64,
    pub yearly_price_cents: i64,
    pub features: &'static [&'static str],
    pub limits: PlanLimits,
    pub highlighted: bool,
    pub badge: Option<&'static str>,
}

impl PricingPlan {
    pub const fn price_cents(&self, yearly: bool) -> i64 {
        if yearly {
            self.yearly_price_cents
        } else {
            self.monthly_price_cents
        }
    }

    pub const fn is_free(&self) -> bool {
        self.monthly_price_cents == 0 && self.yearly_price_cents == 0
    }
}

/// A one-time token purchase
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPack {
    pub id: &'static str,
    pub name: &'static str,
    pub tokens: i64,
    pub price_cents: i64,
    pub savings: &'static str,
}

/// Usage-based pricing for tokens beyond the plan quota
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOverage {
    pub price_per_million_cents: i64,
    pub minimum_purchase: i64,
}

pub const TOKEN_OVERAGE: TokenOverage = TokenOverage {
    price_per_million_cents: 250,
    minimum_purchase: 100_000,
};

static PLANS: [PricingPlan; 4] = [
    PricingPlan {
        id: "free",
        tier: PlanTier::Free,
        name: "Starter",
        description: "Perfect for exploring OmniCortex capabilities",
        monthly_price_cents: 0,
        yearly_price_cents: 0,
        features: &[
            "Access to OmniCortex-7B base model",
            "10,000 tokens/month",
            "Community support",
            "API access (rate limited)",
            "Basic documentation",
        ],
        limits: PlanLimits {
            tokens_per_month: 10_000,
            models_access: &["omnicortex-7b"],
            api_calls: 100,
            support_level: "community",
        },
        highlighted: false,
        badge: None,
    },
    PricingPlan {
        id: "pro",
        tier: PlanTier::Pro,
        name: "Pro",
        description: "For developers and small teams building AI products",
        monthly_price_cents: 4_900,
        yearly_price_cents: 47_000,
        features: &[
            "All Starter features",
            "500,000 tokens/month",
            "Access to OmniVision-Pro",
            "Priority API access",
            "Email support (24h response)",
            "Fine-tuning capabilities",
            "Webhook integrations",
            "Usage analytics dashboard",
        ],
        limits: PlanLimits {
            tokens_per_month: 500_000,
            models_access: &["omnicortex-7b", "omnivision-pro", "cortex-audio-2"],
            api_calls: 10_000,
            support_level: "email",
        },
        highlighted: true,
        badge: Some("Most Popular"),
    },
    PricingPlan {
        id: "business",
        tier: PlanTier::Business,
        name: "Business",
        description: "For growing companies with production workloads",
        monthly_price_cents: 19_900,
        yearly_price_cents: 191_000,
        features: &[
            "All Pro features",
            "2,000,000 tokens/month",
            "Access to CodeCortex-34B",
            "Dedicated API endpoints",
            "Priority support (4h response)",
            "Custom model fine-tuning",
            "Team management (up to 10 seats)",
            "SLA guarantee (99.9% uptime)",
            "Advanced security features",
        ],
        limits: PlanLimits {
            tokens_per_month: 2_000_000,
            models_access: &[
                "omnicortex-7b",
                "omnivision-pro",
                "cortex-audio-2",
                "codecortex-34b",
            ],
            api_calls: 100_000,
            support_level: "priority",
        },
        highlighted: false,
        badge: None,
    },
    PricingPlan {
        id: "enterprise",
        tier: PlanTier::Enterprise,
        name: "Enterprise",
        description: "For organizations requiring maximum scale and customization",
        monthly_price_cents: 99_900,
        yearly_price_cents: 959_000,
        features: &[
            "All Business features",
            "Unlimited tokens",
            "Access to ALL models including beta",
            "Dedicated infrastructure",
            "24/7 phone & Slack support",
            "Custom model training",
            "Unlimited team seats",
            "SLA guarantee (99.99% uptime)",
            "On-premise deployment option",
            "Dedicated account manager",
            "Custom contracts & invoicing",
        ],
        limits: PlanLimits {
            tokens_per_month: UNLIMITED,
            models_access: &["all"],
            api_calls: UNLIMITED,
            support_level: "dedicated",
        },
        highlighted: false,
        badge: Some("Best Value"),
    },
];

static CREDIT_PACKS: [CreditPack; 3] = [
    CreditPack {
        id: "credits-small",
        name: "Token Pack - Small",
        tokens: 500_000,
        price_cents: 999,
        savings: "0%",
    },
    CreditPack {
        id: "credits-medium",
        name: "Token Pack - Medium",
        tokens: 2_000_000,
        price_cents: 3_499,
        savings: "12%",
    },
    CreditPack {
        id: "credits-large",
        name: "Token Pack - Large",
        tokens: 10_000_000,
        price_cents: 14_999,
        savings: "25%",
    },
];

/// All plans, cheapest first
pub fn plans() -> &'static [PricingPlan] {
    &PLANS
}

/// All credit packs, smallest first
pub fn credit_packs() -> &'static [CreditPack] {
    &CREDIT_PACKS
}

pub fn plan_by_id(id: &str) -> Option<&'static PricingPlan> {
    PLANS.iter().find(|plan| plan.id == id)
}

/// Catalog entry for a stored plan tier
pub fn plan_for_tier(tier: PlanTier) -> &'static PricingPlan {
    PLANS.iter().find(|plan| plan.tier == tier).unwrap_or(&PLANS[0])
}

pub fn credit_pack_by_id(id: &str) -> Option<&'static CreditPack> {
    CREDIT_PACKS.iter().find(|pack| pack.id == id)
}

/// `"Free"` for zero, whole dollars without decimals, otherwise two decimals
pub fn format_price(cents: i64) -> String {
    if cents == 0 {
        return "Free".into();
    }
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let dollars = group_thousands(cents / 100);
    match cents % 100 {
        0 => format!("{sign}${dollars}"),
        rest => format!("{sign}${dollars}.{rest:02}"),
    }
}

/// Charge amount with cents always shown, e.g. `"$49.00"`
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}${}.{:02}", group_thousands(cents / 100), cents % 100)
}

/// `"Unlimited"` for negative quotas, otherwise digits grouped by thousands
pub fn format_token_quota(tokens: i64) -> String {
    if tokens < 0 {
        return "Unlimited".into();
    }
    group_thousands(tokens.unsigned_abs())
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
