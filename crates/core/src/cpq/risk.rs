//! Hard-stop and soft-risk checks over a priced set of lines.
//!
//! Every check runs; none short-circuits. The result is informational and is
//! never persisted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::policy::PricingPolicy;
use crate::domain::quote::{Quote, QuoteItem};
use crate::money::{ratio, round_currency, shortfall_pair};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskFinding {
    NegativeMargin { total_cost: Decimal, final_amount: Decimal, gap: Decimal },
    DiscountBelowFloor { current_rate: Decimal, min_rate: Decimal },
    MarginBelowFloor { margin: Decimal, min_margin: Decimal },
}

impl RiskFinding {
    pub fn is_hard_stop(&self) -> bool {
        matches!(self, Self::NegativeMargin { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            Self::NegativeMargin { total_cost, final_amount, gap } => format!(
                "negative margin: final amount {} is below total cost {} by {}",
                round_currency(*final_amount),
                round_currency(*total_cost),
                round_currency(*gap)
            ),
            Self::DiscountBelowFloor { current_rate, min_rate } => {
                let (shown, floor) = shortfall_pair(*current_rate, *min_rate, Decimal::TEN);
                format!("discount floor breached: {shown}折 is below the minimum {floor}折")
            }
            Self::MarginBelowFloor { margin, min_margin } => {
                let (shown, floor) = shortfall_pair(*margin, *min_margin, Decimal::ONE_HUNDRED);
                format!("margin floor breached: {shown}% is below the minimum {floor}%")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub is_risk: bool,
    pub hard_stop: bool,
    pub reasons: Vec<String>,
    pub findings: Vec<RiskFinding>,
}

impl RiskCheckResult {
    fn push(&mut self, finding: RiskFinding) {
        self.is_risk = true;
        self.hard_stop |= finding.is_hard_stop();
        self.reasons.push(finding.reason());
        self.findings.push(finding);
    }

    pub fn negative_margin(&self) -> Option<&RiskFinding> {
        self.findings.iter().find(|finding| finding.is_hard_stop())
    }
}

pub fn evaluate(
    items: &[QuoteItem],
    final_amount: Decimal,
    original_amount: Decimal,
    policy: &PricingPolicy,
) -> RiskCheckResult {
    let mut result = RiskCheckResult::default();
    let total_cost: Decimal = items.iter().map(QuoteItem::cost_total).sum();

    if final_amount < total_cost {
        result.push(RiskFinding::NegativeMargin {
            total_cost,
            final_amount,
            gap: total_cost - final_amount,
        });
    }

    if original_amount > Decimal::ZERO {
        if let Some(current_rate) = ratio(final_amount, original_amount) {
            if current_rate < policy.min_discount_rate {
                result.push(RiskFinding::DiscountBelowFloor {
                    current_rate,
                    min_rate: policy.min_discount_rate,
                });
            }
        }
    }

    if final_amount > Decimal::ZERO {
        if let Some(margin) = ratio(final_amount - total_cost, final_amount) {
            if margin < policy.min_profit_margin {
                result.push(RiskFinding::MarginBelowFloor {
                    margin,
                    min_margin: policy.min_profit_margin,
                });
            }
        }
    }

    result
}

/// Checks a standalone quote against its own lines and rollup.
pub fn evaluate_quote(quote: &Quote, policy: &PricingPolicy) -> RiskCheckResult {
    evaluate(&quote.items, quote.final_amount, quote.total_amount, policy)
}
