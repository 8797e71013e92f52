//! Desired-vs-venue order diff.
//!
//! The resting orders in [`ExecutionState`](crate::state::ExecutionState)
//! are the desired book; [`plan_actions`] compares them with what the venue
//! reports and returns the minimal cancel/place set to converge.
//!
//! Matching runs in three passes so a correct order is never churned:
//!
//! | Pass | Key |
//! |------|-----|
//! | 1 | venue order id already recorded on the desired order |
//! | 2 | client order id echoed by the venue |
//! | 3 | `(side, price, quantity)` within tolerance |
//!
//! A pass only pairs orders whose price and quantity are within tolerance;
//! an id match with a moved price (soft adjust) becomes cancel + place.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::RestingOrder;
use crate::exchange::LiveOrder;

/// Matching tolerances and the per-tick action cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileParams {
    /// Price tolerance in ticks.
    pub price_tolerance_ticks: u32,
    /// Quantity tolerance as a fraction of the desired remaining quantity.
    pub qty_tolerance_frac: Decimal,
    /// Cancels plus places issued per tick.
    pub max_actions_per_tick: usize,
    /// Tick size; without one prices must match exactly.
    pub tick_size: Option<Decimal>,
}

/// Actions for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// `(desired index, venue order id)` pairs already correct.
    pub matched: Vec<(usize, String)>,
    /// Venue order ids to cancel.
    pub cancels: Vec<String>,
    /// Desired indices to place.
    pub places: Vec<usize>,
    /// Diffs pushed to a later tick by the cap.
    pub deferred: usize,
}

impl ReconcilePlan {
    /// Whether the venue already matches.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.cancels.is_empty() && self.places.is_empty() && self.deferred == 0
    }
}

fn within_tolerance(desired: &RestingOrder, live: &LiveOrder, params: &ReconcileParams) -> bool {
    if desired.side != live.side {
        return false;
    }
    let price_slack = params
        .tick_size
        .map_or(Decimal::ZERO, |t| t * Decimal::from(params.price_tolerance_ticks));
    let qty = desired.remaining();
    (desired.price - live.price).abs() <= price_slack
        && (qty - live.quantity).abs() <= qty * params.qty_tolerance_frac
}

struct Pairing<'a> {
    desired: &'a [RestingOrder],
    live: &'a [LiveOrder],
    params: &'a ReconcileParams,
    desired_taken: Vec<bool>,
    live_taken: Vec<bool>,
    matched: Vec<(usize, String)>,
}

impl Pairing<'_> {
    fn pass(&mut self, key: impl Fn(&RestingOrder, &LiveOrder) -> bool) {
        for (di, d) in self.desired.iter().enumerate() {
            if self.desired_taken[di] || !d.status.is_live() {
                continue;
            }
            let found = self.live.iter().enumerate().find(|(li, l)| {
                !self.live_taken[*li] && key(d, l) && within_tolerance(d, l, self.params)
            });
            if let Some((li, l)) = found {
                self.desired_taken[di] = true;
                self.live_taken[li] = true;
                self.matched.push((di, l.exchange_order_id.clone()));
            }
        }
    }
}

/// Diff desired orders against venue orders.
///
/// `eligible(i)` filters which unmatched desired orders may be placed this
/// tick (cooldown); ineligible ones are neither placed nor counted as
/// deferred. Cancels take priority over places under the cap.
#[must_use]
pub fn plan_actions(
    desired: &[RestingOrder],
    live: &[LiveOrder],
    params: &ReconcileParams,
    eligible: impl Fn(usize) -> bool,
) -> ReconcilePlan {
    let mut pairing = Pairing {
        desired,
        live,
        params,
        desired_taken: vec![false; desired.len()],
        live_taken: vec![false; live.len()],
        matched: Vec::new(),
    };
    pairing.pass(|d, l| d.exchange_order_id.as_deref() == Some(l.exchange_order_id.as_str()));
    pairing.pass(|d, l| l.client_order_id.as_deref() == Some(d.client_id.as_str()));
    pairing.pass(|d, _| d.exchange_order_id.is_none());

    let cancels: Vec<String> = live
        .iter()
        .zip(&pairing.live_taken)
        .filter(|(_, taken)| !**taken)
        .map(|(l, _)| l.exchange_order_id.clone())
        .collect();
    let places: Vec<usize> = desired
        .iter()
        .enumerate()
        .filter(|(i, d)| !pairing.desired_taken[*i] && d.status.is_live() && eligible(*i))
        .map(|(i, _)| i)
        .collect();

    let mut budget = params.max_actions_per_tick;
    let cancel_take = cancels.len().min(budget);
    budget -= cancel_take;
    let place_take = places.len().min(budget);
    ReconcilePlan {
        matched: pairing.matched,
        deferred: (cancels.len() - cancel_take) + (places.len() - place_take),
        cancels: cancels.into_iter().take(cancel_take).collect(),
        places: places.into_iter().take(place_take).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::Side;
    use rust_decimal_macros::dec;

    fn params(cap: usize) -> ReconcileParams {
        ReconcileParams {
            price_tolerance_ticks: 1,
            qty_tolerance_frac: dec!(0.01),
            max_actions_per_tick: cap,
            tick_size: Some(dec!(0.01)),
        }
    }

    fn live(id: &str, side: Side, price: Decimal, qty: Decimal) -> LiveOrder {
        LiveOrder {
            exchange_order_id: id.to_string(),
            client_order_id: None,
            side,
            price,
            quantity: qty,
        }
    }

    #[test]
    fn test_orders_within_noise_are_kept() {
        let mut d = RestingOrder::new("c-1", Side::Buy, dec!(100), dec!(5), 0, 0);
        d.exchange_order_id = Some("x-1".to_string());
        let desired = vec![
            d,
            RestingOrder::new("c-2", Side::Buy, dec!(102.5), dec!(4.878), 1, 0),
        ];
        let venue = vec![
            live("x-1", Side::Buy, dec!(100), dec!(5)),
            live("x-9", Side::Buy, dec!(102.51), dec!(4.88)),
        ];
        let plan = plan_actions(&desired, &venue, &params(10), |_| true);
        assert!(plan.is_converged());
        assert_eq!(plan.matched, vec![(0, "x-1".to_string()), (1, "x-9".to_string())]);
    }

    #[test]
    fn test_moved_price_becomes_cancel_and_place() {
        let mut d = RestingOrder::new("c-1", Side::Sell, dec!(106), dec!(1), 3, 0);
        d.exchange_order_id = Some("x-1".to_string());
        let venue = vec![live("x-1", Side::Sell, dec!(105), dec!(1))];
        let plan = plan_actions(&[d], &venue, &params(10), |_| true);
        assert_eq!(plan.cancels, vec!["x-1".to_string()]);
        assert_eq!(plan.places, vec![0]);
    }

    #[test]
    fn test_client_id_echo_adopts_orphan() {
        let desired = vec![RestingOrder::new("c-7", Side::Buy, dec!(99), dec!(2), 0, 0)];
        let mut venue = live("x-3", Side::Buy, dec!(99), dec!(2));
        venue.client_order_id = Some("c-7".to_string());
        let plan = plan_actions(&desired, &[venue], &params(10), |_| true);
        assert_eq!(plan.matched, vec![(0, "x-3".to_string())]);
        assert!(plan.is_converged());
    }

    #[test]
    fn test_cap_defers_places_after_cancels() {
        let desired: Vec<RestingOrder> = (0..3)
            .map(|i| RestingOrder::new(format!("c-{i}"), Side::Buy, dec!(90) + Decimal::from(i), dec!(1), i, 0))
            .collect();
        let venue = vec![
            live("x-a", Side::Sell, dec!(120), dec!(1)),
            live("x-b", Side::Sell, dec!(121), dec!(1)),
        ];
        let plan = plan_actions(&desired, &venue, &params(3), |_| true);
        assert_eq!(plan.cancels.len(), 2);
        assert_eq!(plan.places, vec![0]);
        assert_eq!(plan.deferred, 2);
    }

    #[test]
    fn test_ineligible_orders_wait_without_deferral() {
        let desired = vec![
            RestingOrder::new("c-0", Side::Buy, dec!(90), dec!(1), 0, 0),
            RestingOrder::new("c-1", Side::Buy, dec!(91), dec!(1), 1, 0),
        ];
        let plan = plan_actions(&desired, &[], &params(10), |i| i == 1);
        assert_eq!(plan.places, vec![1]);
        assert_eq!(plan.deferred, 0);
    }
}
