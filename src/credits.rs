use std::fmt;

use serde::{Deserialize, Serialize};

/// A signed quantity of prepaid credits, in minor currency units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub fn from_minor(value: i64) -> Self {
        Credits(value)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    /// Subtraction floored at zero; discounts never drive a price negative.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Credits((self.0 - rhs.0).max(0))
    }

    /// `percent`% of this amount, rounded down. Used for partial refunds.
    pub fn percent(self, percent: u8) -> Self {
        Credits(self.0 * i64::from(percent) / 100)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Credits {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Credits(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Credits {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Credits(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Credits {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Credits {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Neg for Credits {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Credits(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_minor_preserves_value() {
        assert_eq!(Credits::from_minor(1500).minor(), 1500);
        assert_eq!(Credits::from_minor(-250).minor(), -250);
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(Credits::default(), Credits::ZERO);
    }

    #[test]
    fn display_is_plain_minor_units() {
        assert_eq!(Credits::from_minor(1500).to_string(), "1500");
        assert_eq!(Credits::from_minor(-1500).to_string(), "-1500");
        assert_eq!(Credits::ZERO.to_string(), "0");
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        let price = Credits::from_minor(1000);
        assert_eq!(
            price.saturating_sub(Credits::from_minor(300)),
            Credits::from_minor(700)
        );
        assert_eq!(price.saturating_sub(Credits::from_minor(5000)), Credits::ZERO);
    }

    #[test]
    fn percent_rounds_down() {
        assert_eq!(Credits::from_minor(1500).percent(50), Credits::from_minor(750));
        assert_eq!(Credits::from_minor(999).percent(50), Credits::from_minor(499));
        assert_eq!(Credits::from_minor(1500).percent(0), Credits::ZERO);
        assert_eq!(Credits::from_minor(1500).percent(100), Credits::from_minor(1500));
    }

    #[test]
    fn arithmetic() {
        let mut balance = Credits::from_minor(100);
        balance += Credits::from_minor(50);
        assert_eq!(balance, Credits::from_minor(150));
        balance -= Credits::from_minor(200);
        assert_eq!(balance, Credits::from_minor(-50));
        assert!(balance.is_negative());
        assert_eq!(-balance, Credits::from_minor(50));
        assert_eq!(
            Credits::from_minor(30) + Credits::from_minor(12),
            Credits::from_minor(42)
        );
        assert_eq!(
            Credits::from_minor(30) - Credits::from_minor(12),
            Credits::from_minor(18)
        );
    }

    #[test]
    fn ordering() {
        assert!(Credits::from_minor(-1) < Credits::ZERO);
        assert!(Credits::ZERO < Credits::from_minor(1));
    }
}
