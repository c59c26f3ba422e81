//! Stock levels derived from the movement ledger.

use crate::error::ConsistencyError;
use crate::types::MovementDirection;

/// Applies one movement to the current stock level.
///
/// Outbound movements that would take stock below zero are refused; nothing
/// is recorded in that case.
pub fn apply_movement(
    item_id: &str,
    current: i64,
    direction: MovementDirection,
    quantity: i64,
) -> Result<i64, ConsistencyError> {
    if quantity <= 0 {
        return Err(ConsistencyError::InvalidQuantity {
            field: "quantity".to_string(),
            value: quantity.to_string(),
        });
    }

    let next = current
        .checked_add(direction.signed(quantity))
        .ok_or_else(|| ConsistencyError::InvalidQuantity {
            field: "quantity".to_string(),
            value: quantity.to_string(),
        })?;

    if next < 0 {
        return Err(ConsistencyError::InsufficientStock {
            item_id: item_id.to_string(),
            available: current,
            requested: quantity,
        });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_and_outbound() {
        assert_eq!(apply_movement("i", 0, MovementDirection::Inbound, 10).unwrap(), 10);
        assert_eq!(apply_movement("i", 10, MovementDirection::Outbound, 10).unwrap(), 0);
    }

    #[test]
    fn test_insufficient_stock() {
        let err = apply_movement("i", 10, MovementDirection::Outbound, 15).unwrap_err();
        match err {
            ConsistencyError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 10);
                assert_eq!(requested, 15);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_positive_quantity() {
        assert!(apply_movement("i", 10, MovementDirection::Inbound, 0).is_err());
        assert!(apply_movement("i", 10, MovementDirection::Outbound, -3).is_err());
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert!(apply_movement("i", i64::MAX, MovementDirection::Inbound, 1).is_err());
    }
}
