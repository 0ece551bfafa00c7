//! Pure pricing and discount evaluation.
//!
//! Given a base price, a rule set, and the hours remaining until the
//! instance starts, produce the price actually charged. No side effects;
//! the engine resolves which rule set applies (instance rules fully
//! replace template rules) before calling in.

use crate::Credits;
use crate::model::{AppliedDiscount, DiscountCondition, DiscountRule};

/// Result of evaluating the discount rules against a base price.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub original_price: Credits,
    pub final_price: Credits,
    pub applied_discount: Option<AppliedDiscount>,
}

impl Quote {
    /// The amount actually deducted from the base price.
    pub fn discount_amount(&self) -> Credits {
        self.original_price - self.final_price
    }
}

/// Whether a rule's condition holds `hours_until_start` hours before start.
///
/// `hours_until_start` is negative once the instance has started, which
/// disqualifies both hour-based conditions but not `Always`.
fn matches(condition: DiscountCondition, hours_until_start: f64) -> bool {
    match condition {
        DiscountCondition::HoursBeforeMin(threshold) => hours_until_start >= threshold as f64,
        DiscountCondition::HoursBeforeMax(threshold) => {
            hours_until_start >= 0.0 && hours_until_start <= threshold as f64
        }
        DiscountCondition::Always => true,
    }
}

/// Evaluate `rules` against `base_price`.
///
/// Among matching rules the strictly largest discount wins; ties resolve to
/// the first encountered. The final price is floored at zero and the
/// recorded discount is the effective deduction, so a later full refund of
/// `final_price` always nets the ledger to zero.
pub fn evaluate(base_price: Credits, rules: &[DiscountRule], hours_until_start: f64) -> Quote {
    let winner = rules
        .iter()
        .filter(|rule| matches(rule.condition, hours_until_start))
        .fold(None::<&DiscountRule>, |best, rule| match best {
            Some(current) if rule.amount > current.amount => Some(rule),
            Some(current) => Some(current),
            None => Some(rule),
        });

    match winner {
        Some(rule) if rule.amount > Credits::ZERO => {
            let final_price = base_price.saturating_sub(rule.amount);
            Quote {
                original_price: base_price,
                final_price,
                applied_discount: Some(AppliedDiscount {
                    name: rule.name.clone(),
                    amount: base_price - final_price,
                }),
            }
        }
        _ => Quote {
            original_price: base_price,
            final_price: base_price,
            applied_discount: None,
        },
    }
}
