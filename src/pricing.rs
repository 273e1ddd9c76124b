use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use uuid::Uuid;

/// Line subtotals round half-up to the currency's minor unit (centavos),
/// at the line level, never at the total.
const CURRENCY_SCALE: u32 = 2;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("consultation fee cannot be negative")]
    NegativeFee,
    #[error("quantity must be at least 1 for item {0}")]
    BadQuantity(Uuid),
    #[error("unknown inventory items: {}", format_ids(.0))]
    UnknownItems(Vec<Uuid>),
}

fn format_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct RequestedItem {
    pub inventory_id: Uuid,
    pub quantity: i32,
}

/// Name + unit price of one inventory item as read at invoice time.
#[derive(Debug, Clone)]
pub struct PriceSnapshot {
    pub name: String,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PricedLine {
    pub inventory_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone)]
pub struct PricedBill {
    pub line_items: Vec<PricedLine>,
    pub total: Decimal,
}

/// Price a bill from the current inventory snapshot.
///
/// Deterministic for a given snapshot, no side effects. Ids missing from
/// the snapshot fail the whole bill unless `unknown_items_as_free` is set,
/// which reproduces the reference behavior of pricing them at 0 under the
/// name "Unknown".
pub fn compute_bill(
    consultation_fee: Decimal,
    requested: &[RequestedItem],
    prices: &HashMap<Uuid, PriceSnapshot>,
    unknown_items_as_free: bool,
) -> Result<PricedBill, PricingError> {
    if consultation_fee.is_sign_negative() {
        return Err(PricingError::NegativeFee);
    }

    let mut unknown: Vec<Uuid> = Vec::new();
    let mut line_items: Vec<PricedLine> = Vec::with_capacity(requested.len());

    for item in requested {
        if item.quantity < 1 {
            return Err(PricingError::BadQuantity(item.inventory_id));
        }

        match prices.get(&item.inventory_id) {
            Some(snapshot) => {
                let subtotal = (snapshot.unit_price * Decimal::from(item.quantity))
                    .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
                line_items.push(PricedLine {
                    inventory_id: Some(item.inventory_id),
                    name: snapshot.name.clone(),
                    quantity: item.quantity,
                    unit_price: snapshot.unit_price,
                    subtotal,
                });
            }
            None if unknown_items_as_free => {
                line_items.push(PricedLine {
                    inventory_id: Some(item.inventory_id),
                    name: "Unknown".to_string(),
                    quantity: item.quantity,
                    unit_price: Decimal::ZERO,
                    subtotal: Decimal::ZERO,
                });
            }
            None => unknown.push(item.inventory_id),
        }
    }

    if !unknown.is_empty() {
        return Err(PricingError::UnknownItems(unknown));
    }

    let total = consultation_fee
        + line_items
            .iter()
            .map(|l| l.subtotal)
            .sum::<Decimal>();

    Ok(PricedBill { line_items, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn snapshot(entries: &[(Uuid, &str, &str)]) -> HashMap<Uuid, PriceSnapshot> {
        entries
            .iter()
            .map(|(id, name, price)| {
                (
                    *id,
                    PriceSnapshot {
                        name: name.to_string(),
                        unit_price: price.parse().unwrap(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn total_is_fee_plus_line_subtotals() {
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let prices = snapshot(&[(id_a, "Rabies vaccine", "150.00"), (id_b, "Dewormer", "85.50")]);

        let bill = compute_bill(
            dec("500.00"),
            &[
                RequestedItem { inventory_id: id_a, quantity: 3 },
                RequestedItem { inventory_id: id_b, quantity: 2 },
            ],
            &prices,
            false,
        )
        .unwrap();

        assert_eq!(bill.line_items.len(), 2);
        assert_eq!(bill.line_items[0].subtotal, dec("450.00"));
        assert_eq!(bill.line_items[1].subtotal, dec("171.00"));
        assert_eq!(bill.total, dec("1121.00"));
    }

    #[test]
    fn zero_items_means_total_equals_fee() {
        let bill = compute_bill(dec("350.00"), &[], &HashMap::new(), false).unwrap();
        assert!(bill.line_items.is_empty());
        assert_eq!(bill.total, dec("350.00"));
    }

    #[test]
    fn lines_round_half_up_before_summing() {
        let id = Uuid::new_v4();
        // 33.335 * 1 rounds to 33.34 at the line, not after the total
        let prices = snapshot(&[(id, "Syrup", "33.335")]);

        let bill = compute_bill(
            dec("0.00"),
            &[RequestedItem { inventory_id: id, quantity: 1 }],
            &prices,
            false,
        )
        .unwrap();

        assert_eq!(bill.line_items[0].subtotal, dec("33.34"));
        assert_eq!(bill.total, dec("33.34"));
    }

    #[test]
    fn unknown_items_fail_the_bill() {
        let known = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let prices = snapshot(&[(known, "Antibiotic", "99.00")]);

        let err = compute_bill(
            dec("100.00"),
            &[
                RequestedItem { inventory_id: known, quantity: 1 },
                RequestedItem { inventory_id: missing, quantity: 1 },
            ],
            &prices,
            false,
        )
        .unwrap_err();

        match err {
            PricingError::UnknownItems(ids) => assert_eq!(ids, vec![missing]),
            other => panic!("expected UnknownItems, got {other:?}"),
        }
    }

    #[test]
    fn legacy_flag_prices_unknown_items_at_zero() {
        let missing = Uuid::new_v4();

        let bill = compute_bill(
            dec("200.00"),
            &[RequestedItem { inventory_id: missing, quantity: 4 }],
            &HashMap::new(),
            true,
        )
        .unwrap();

        assert_eq!(bill.line_items[0].name, "Unknown");
        assert_eq!(bill.line_items[0].subtotal, Decimal::ZERO);
        assert_eq!(bill.total, dec("200.00"));
    }

    #[test]
    fn negative_fee_is_rejected() {
        let err = compute_bill(dec("-1.00"), &[], &HashMap::new(), false).unwrap_err();
        assert!(matches!(err, PricingError::NegativeFee));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let id = Uuid::new_v4();
        let prices = snapshot(&[(id, "Vitamins", "10.00")]);

        let err = compute_bill(
            dec("0.00"),
            &[RequestedItem { inventory_id: id, quantity: 0 }],
            &prices,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, PricingError::BadQuantity(_)));
    }

    #[test]
    fn reference_scenario_500_plus_three_at_150() {
        let id = Uuid::new_v4();
        let prices = snapshot(&[(id, "Vaccine", "150.00")]);

        let bill = compute_bill(
            dec("500.00"),
            &[RequestedItem { inventory_id: id, quantity: 3 }],
            &prices,
            false,
        )
        .unwrap();

        assert_eq!(bill.total, dec("950.00"));
    }
}
