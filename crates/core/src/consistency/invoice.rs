//! Invoice totals.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{ConsistencyError, CoreError, ValidationError};

/// Rounds an amount to cents, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `quantity * unit_price`, rounded to cents.
///
/// Fails with [`ConsistencyError::AmountOverflow`] when the product does not
/// fit a decimal.
pub fn line_total(quantity: Decimal, unit_price: Decimal) -> Result<Decimal, ConsistencyError> {
    quantity
        .checked_mul(unit_price)
        .map(round_money)
        .ok_or_else(|| ConsistencyError::AmountOverflow {
            field: "line_total".to_string(),
        })
}

/// Sum of the line totals of every surviving line.
pub fn invoice_total<I>(lines: I) -> Result<Decimal, ConsistencyError>
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    lines
        .into_iter()
        .try_fold(Decimal::ZERO, |total, (quantity, unit_price)| {
            total
                .checked_add(line_total(quantity, unit_price)?)
                .ok_or_else(|| ConsistencyError::AmountOverflow {
                    field: "total".to_string(),
                })
        })
}

/// Rejects non-positive quantities and negative prices.
pub fn validate_line(quantity: Decimal, unit_price: Decimal) -> Result<(), CoreError> {
    if quantity <= Decimal::ZERO {
        return Err(ConsistencyError::InvalidQuantity {
            field: "quantity".to_string(),
            value: quantity.to_string(),
        }
        .into());
    }
    if unit_price < Decimal::ZERO {
        return Err(ValidationError::InvalidValue {
            field: "unit_price".to_string(),
            message: format!("must not be negative, got {unit_price}"),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_line_total_rounds_half_away_from_zero() {
        assert_eq!(line_total(dec!(1), dec!(0.005)).unwrap(), dec!(0.01));
        assert_eq!(line_total(dec!(3), dec!(33.333)).unwrap(), dec!(100.00));
        assert_eq!(line_total(dec!(2.5), dec!(10)).unwrap(), dec!(25.00));
    }

    #[test]
    fn test_invoice_total() {
        let total = invoice_total(vec![(dec!(2), dec!(50)), (dec!(1), dec!(25))]).unwrap();
        assert_eq!(total, dec!(125.00));
        assert_eq!(invoice_total(Vec::new()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_line_total_overflow() {
        let err = line_total(dec!(2), Decimal::MAX).unwrap_err();
        assert!(matches!(err, ConsistencyError::AmountOverflow { .. }));
    }

    #[test]
    fn test_invoice_total_overflow() {
        let err = invoice_total(vec![(dec!(1), Decimal::MAX), (dec!(1), Decimal::MAX)]).unwrap_err();
        assert!(matches!(err, ConsistencyError::AmountOverflow { ref field } if field == "total"));
    }

    #[test]
    fn test_validate_line() {
        assert!(validate_line(dec!(1), dec!(0)).is_ok());
        assert!(validate_line(dec!(0), dec!(10)).is_err());
        assert!(validate_line(dec!(-1), dec!(10)).is_err());
        assert!(validate_line(dec!(1), dec!(-0.01)).is_err());
    }
}
