use payline_shared::round_money;
use rust_decimal::Decimal;

use crate::models::{Item, Tax};
use crate::payment::{Payment, PaymentState};

/// Result of one totals pass; `tax_totals` lines up with the taxes given.
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    pub total_without_taxes: Decimal,
    pub tax_totals: Vec<Decimal>,
    pub total_with_taxes: Decimal,
    pub total_refunded: Decimal,
}

/// Pure totals computation over an order's children.
///
/// Each tax applies to the rounded subtotal, never to another tax.
pub fn compute_totals(items: &[Item], taxes: &[Tax], payments: &[Payment]) -> Totals {
    let total_without_taxes = round_money(items.iter().map(Item::total_price).sum());

    let tax_totals: Vec<Decimal> = taxes
        .iter()
        .map(|tax| round_money(total_without_taxes * tax.rate))
        .collect();

    let total_with_taxes = round_money(total_without_taxes + tax_totals.iter().copied().sum::<Decimal>());

    let total_refunded = round_money(
        payments
            .iter()
            .filter(|p| p.is_refund() && p.state() == PaymentState::Success)
            .map(Payment::amount)
            .sum(),
    );

    Totals {
        total_without_taxes,
        tax_totals,
        total_with_taxes,
        total_refunded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_taxes_are_not_compounded() {
        let order_id = Uuid::new_v4();
        let items = vec![Item::new(order_id, "A", 1, Decimal::new(10000, 2)).unwrap()];
        let taxes: Vec<Tax> = [("GST", 5), ("PST", 7)]
            .iter()
            .map(|(name, pct)| Tax {
                order_id,
                tax_name: name.to_string(),
                tax_number: String::new(),
                rate: Decimal::new(*pct, 2),
                total: Decimal::ZERO,
            })
            .collect();

        let totals = compute_totals(&items, &taxes, &[]);
        assert_eq!(totals.tax_totals, vec![Decimal::new(500, 2), Decimal::new(700, 2)]);
        assert_eq!(totals.total_with_taxes, Decimal::new(11200, 2));
    }

    #[test]
    fn test_line_totals_rounded_before_summing() {
        let order_id = Uuid::new_v4();
        let items = vec![
            Item::new(order_id, "A", 1, Decimal::new(1005, 3)).unwrap(),
            Item::new(order_id, "B", 1, Decimal::new(1005, 3)).unwrap(),
        ];

        let totals = compute_totals(&items, &[], &[]);
        assert_eq!(totals.total_without_taxes, Decimal::new(202, 2));
    }
}
