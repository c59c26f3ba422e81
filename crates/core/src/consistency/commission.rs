//! Commission derivation for medical acts.

use rust_decimal::Decimal;
use serde::Serialize;

use super::invoice::round_money;
use crate::error::ConsistencyError;

/// Pricing inputs of a medical act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActPricing {
    pub price: Decimal,
    pub internal_rate: Decimal,
    pub external_rate: Decimal,
}

/// Derived commission amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionAmounts {
    pub internal: Decimal,
    pub external: Decimal,
}

/// Derives both commission amounts from price and rates.
///
/// Rates are fractions in `0..=1`; the price must not be negative.
pub fn derive_commission(pricing: ActPricing) -> Result<CommissionAmounts, ConsistencyError> {
    if pricing.price < Decimal::ZERO {
        return Err(invalid("price", pricing.price));
    }
    for (field, rate) in [
        ("internal_rate", pricing.internal_rate),
        ("external_rate", pricing.external_rate),
    ] {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(invalid(field, rate));
        }
    }

    Ok(CommissionAmounts {
        internal: commission(pricing.price, pricing.internal_rate, "internal_amount")?,
        external: commission(pricing.price, pricing.external_rate, "external_amount")?,
    })
}

fn commission(price: Decimal, rate: Decimal, field: &str) -> Result<Decimal, ConsistencyError> {
    price
        .checked_mul(rate)
        .map(round_money)
        .ok_or_else(|| ConsistencyError::AmountOverflow {
            field: field.to_string(),
        })
}

fn invalid(field: &str, value: Decimal) -> ConsistencyError {
    ConsistencyError::InvalidRate {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_derive_commission() {
        let amounts = derive_commission(ActPricing {
            price: dec!(100.00),
            internal_rate: dec!(0.15),
            external_rate: dec!(0.05),
        })
        .unwrap();
        assert_eq!(amounts.internal, dec!(15.00));
        assert_eq!(amounts.external, dec!(5.00));
    }

    #[test]
    fn test_rounding() {
        let amounts = derive_commission(ActPricing {
            price: dec!(33.33),
            internal_rate: dec!(0.125),
            external_rate: dec!(0),
        })
        .unwrap();
        assert_eq!(amounts.internal, dec!(4.17));
        assert_eq!(amounts.external, dec!(0));
    }

    #[test]
    fn test_out_of_range_rates() {
        for (internal, external) in [(dec!(-0.1), dec!(0)), (dec!(0), dec!(1.5))] {
            let err = derive_commission(ActPricing {
                price: dec!(10),
                internal_rate: internal,
                external_rate: external,
            })
            .unwrap_err();
            assert!(matches!(err, ConsistencyError::InvalidRate { .. }));
        }
    }

    #[test]
    fn test_negative_price() {
        assert!(
            derive_commission(ActPricing {
                price: dec!(-1),
                internal_rate: dec!(0.1),
                external_rate: dec!(0.1),
            })
            .is_err()
        );
    }
}
