//! Ladder construction.
//!
//! Turns a plan's range, grid and weights into the desired resting orders
//! around a reference price, and reprices an existing ladder in place for
//! soft adjusts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderStatus, RestingOrder, Side};
use super::plan::Plan;

/// Venue and sizing constraints applied while building a ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderParams {
    /// Cap on orders per side; the rungs nearest the price are kept.
    pub max_orders_per_side: usize,
    /// Price tick; rungs are snapped to it when set.
    pub tick_size: Option<Decimal>,
    /// Quantity increment; quantities are rounded down to it.
    pub qty_step: Decimal,
    /// Minimum order notional in quote.
    pub min_notional: Decimal,
    /// Lower clamp for a raw weight.
    pub weight_min: Decimal,
    /// Upper clamp for a raw weight.
    pub weight_max: Decimal,
}

/// One order the ladder wants resting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredOrder {
    /// Side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Quantity.
    pub quantity: Decimal,
    /// Rung index.
    pub level_index: usize,
}

impl DesiredOrder {
    /// Quote notional.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Inputs for [`build_ladder`].
#[derive(Debug, Clone, Copy)]
pub struct LadderInput<'a> {
    /// Rung prices, ascending, index = level.
    pub rungs: &'a [Decimal],
    /// Optional raw weights, one per rung.
    pub weights: Option<&'a [Decimal]>,
    /// Price splitting buys from sells.
    pub reference_price: Decimal,
    /// Quote the buy side may commit.
    pub quote_budget: Decimal,
    /// Free base inventory the sell side may offer.
    pub base_available: Decimal,
}

/// Snap a price to the nearest tick.
#[must_use]
pub fn snap_to_tick(price: Decimal, tick_size: Option<Decimal>) -> Decimal {
    match tick_size {
        Some(tick) if tick > Decimal::ZERO => ((price / tick).round() * tick).normalize(),
        _ => price,
    }
}

/// Round a quantity down to the step.
#[must_use]
pub fn floor_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return qty;
    }
    ((qty / step).floor() * step).normalize()
}

/// Rung prices for a plan: `low + i * step` for `i` in `0..=levels`.
#[must_use]
pub fn rungs(plan: &Plan, tick_size: Option<Decimal>) -> Vec<Decimal> {
    let step = plan.resolved_step();
    (0..=plan.grid.levels)
        .map(|i| snap_to_tick(plan.range.low + step * Decimal::from(i), tick_size))
        .collect()
}

/// Build the desired orders for both sides.
///
/// Buys take rungs at or below the reference price, sells take rungs above
/// it and only when base inventory is available. Orders come back ordered by
/// side, then level.
#[must_use]
pub fn build_ladder(input: &LadderInput<'_>, params: &LadderParams) -> Vec<DesiredOrder> {
    let mut buy_levels: Vec<usize> = (0..input.rungs.len())
        .filter(|&i| input.rungs[i] <= input.reference_price)
        .collect();
    // nearest price first
    buy_levels.reverse();
    buy_levels.truncate(params.max_orders_per_side);

    let mut sell_levels: Vec<usize> = if input.base_available > Decimal::ZERO {
        (0..input.rungs.len())
            .filter(|&i| input.rungs[i] > input.reference_price)
            .collect()
    } else {
        Vec::new()
    };
    sell_levels.truncate(params.max_orders_per_side);

    let mut orders = Vec::with_capacity(buy_levels.len() + sell_levels.len());
    let (buy_weights, buy_total) = side_weights(&buy_levels, input.weights, params);
    for (level, weight) in buy_weights {
        let price = input.rungs[level];
        if price <= Decimal::ZERO {
            continue;
        }
        let notional = input.quote_budget * weight / buy_total;
        let quantity = floor_to_step(notional / price, params.qty_step);
        push_if_viable(&mut orders, Side::Buy, price, quantity, level, params);
    }
    let (sell_weights, sell_total) = side_weights(&sell_levels, input.weights, params);
    for (level, weight) in sell_weights {
        let price = input.rungs[level];
        let quantity = floor_to_step(input.base_available * weight / sell_total, params.qty_step);
        push_if_viable(&mut orders, Side::Sell, price, quantity, level, params);
    }
    orders.sort_by_key(|o| (o.side, o.level_index));
    orders
}

fn push_if_viable(
    orders: &mut Vec<DesiredOrder>,
    side: Side,
    price: Decimal,
    quantity: Decimal,
    level_index: usize,
    params: &LadderParams,
) {
    let order = DesiredOrder {
        side,
        price,
        quantity,
        level_index,
    };
    if price > Decimal::ZERO && quantity > Decimal::ZERO && order.notional() >= params.min_notional {
        orders.push(order);
    }
}

/// Clamped weight of a rung.
#[must_use]
pub fn clamped_weight(raw: Decimal, params: &LadderParams) -> Decimal {
    raw.max(params.weight_min).min(params.weight_max)
}

/// Clamped weight per level of one side and their sum. Empty when the sum
/// is zero.
fn side_weights(
    levels: &[usize],
    weights: Option<&[Decimal]>,
    params: &LadderParams,
) -> (Vec<(usize, Decimal)>, Decimal) {
    let raw: Vec<(usize, Decimal)> = levels
        .iter()
        .map(|&level| {
            let w = weights
                .and_then(|ws| ws.get(level).copied())
                .map_or(Decimal::ONE, |w| clamped_weight(w, params));
            (level, w)
        })
        .collect();
    let total: Decimal = raw.iter().map(|(_, w)| *w).sum();
    if total <= Decimal::ZERO {
        return (Vec::new(), Decimal::ONE);
    }
    (raw, total)
}

/// What a soft adjust changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftAdjustOutcome {
    /// Orders moved to a new rung price.
    pub repriced: usize,
    /// Buys dropped instead of moved.
    pub canceled: usize,
}

/// Reprice live orders to the rung with the same level index.
///
/// Sells keep their quantity. Buys keep their remaining notional, so their
/// quantity is re-sized to the new price; a buy that lands above
/// `reference_price` or under the minimum notional is canceled. Finally the
/// buys farthest from the price are canceled until the remaining buy
/// notional fits in `quote_limit`.
pub fn soft_adjust(
    orders: &mut [RestingOrder],
    new_rungs: &[Decimal],
    reference_price: Decimal,
    quote_limit: Decimal,
    params: &LadderParams,
) -> SoftAdjustOutcome {
    let mut outcome = SoftAdjustOutcome::default();
    for order in orders.iter_mut().filter(|o| o.status.is_live()) {
        let Some(&price) = new_rungs.get(order.level_index) else {
            continue;
        };
        if price == order.price {
            continue;
        }
        if order.side == Side::Buy {
            let remaining = floor_to_step(order.remaining_notional() / price, params.qty_step);
            if price > reference_price || remaining * price < params.min_notional {
                order.status = OrderStatus::Canceled;
                outcome.canceled += 1;
                continue;
            }
            order.quantity = order.filled_quantity + remaining;
        }
        order.price = price;
        outcome.repriced += 1;
    }

    let mut buys: Vec<usize> = (0..orders.len())
        .filter(|&i| orders[i].side == Side::Buy && orders[i].status.is_live())
        .collect();
    buys.sort_by_key(|&i| orders[i].price);
    let mut committed: Decimal = buys.iter().map(|&i| orders[i].remaining_notional()).sum();
    for i in buys {
        if committed <= quote_limit {
            break;
        }
        committed -= orders[i].remaining_notional();
        orders[i].status = OrderStatus::Canceled;
        outcome.canceled += 1;
    }
    outcome
}
