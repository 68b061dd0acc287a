// ============================================================================
// Stop Order Watch List
// Stops wait here until the last trade price reaches their trigger
// ============================================================================

use crate::domain::{Order, OrderId, Side};
use crate::numeric::Price;
use std::collections::{BTreeMap, HashMap};

/// Key ordering stops by trigger price, then arrival
type StopKey = (Price, u64);

#[derive(Debug, Default, Clone)]
pub struct StopBook {
    /// Buy stops trigger when last >= stop; lowest stop triggers first
    buys: BTreeMap<StopKey, Order>,
    /// Sell stops trigger when last <= stop; highest stop triggers first
    sells: BTreeMap<StopKey, Order>,
    index: HashMap<OrderId, (Side, StopKey)>,
}

impl StopBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Would a stop on `side` at `stop_price` fire at `last_price`?
    pub fn is_triggered(side: Side, stop_price: Price, last_price: Price) -> bool {
        match side {
            Side::Buy => last_price >= stop_price,
            Side::Sell => last_price <= stop_price,
        }
    }

    /// Park a stop order. Orders without a stop price are ignored.
    pub fn insert(&mut self, order: Order) -> bool {
        let Some(stop_price) = order.stop_price() else {
            return false;
        };
        let key = (stop_price, order.sequence());
        self.index.insert(order.id, (order.side, key));
        match order.side {
            Side::Buy => self.buys.insert(key, order),
            Side::Sell => self.sells.insert(key, order),
        };
        true
    }

    pub fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let (side, key) = self.index.remove(order_id)?;
        match side {
            Side::Buy => self.buys.remove(&key),
            Side::Sell => self.sells.remove(&key),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        let (side, key) = self.index.get(order_id)?;
        match side {
            Side::Buy => self.buys.get(key),
            Side::Sell => self.sells.get(key),
        }
    }

    /// Remove and return every stop triggered by `last_price`, in arrival order
    pub fn take_triggered(&mut self, last_price: Price) -> Vec<Order> {
        let buy_keys: Vec<StopKey> = self
            .buys
            .keys()
            .take_while(|(stop, _)| *stop <= last_price)
            .copied()
            .collect();
        let sell_keys: Vec<StopKey> = self
            .sells
            .keys()
            .rev()
            .take_while(|(stop, _)| *stop >= last_price)
            .copied()
            .collect();

        let mut triggered = Vec::with_capacity(buy_keys.len() + sell_keys.len());
        for key in buy_keys {
            if let Some(order) = self.buys.remove(&key) {
                triggered.push(order);
            }
        }
        for key in sell_keys {
            if let Some(order) = self.sells.remove(&key) {
                triggered.push(order);
            }
        }
        for order in &triggered {
            self.index.remove(&order.id);
        }

        triggered.sort_by_key(|order| order.sequence());
        triggered
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.buys.values().chain(self.sells.values())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, NewOrder};
    use rust_decimal::Decimal;

    fn stop(side: Side, stop_price: i64, sequence: u64) -> Order {
        let mut order = Order::new(
            OrderId::new(),
            NewOrder::stop(
                AccountId::new(1),
                "BTC-USD",
                side,
                Decimal::from(stop_price),
                None,
                Decimal::ONE,
            ),
        );
        order.set_sequence(sequence);
        order
    }

    #[test]
    fn test_trigger_direction() {
        let mut stops = StopBook::new();
        stops.insert(stop(Side::Buy, 105, 1));
        stops.insert(stop(Side::Sell, 95, 2));

        assert!(stops.take_triggered(Decimal::from(100)).is_empty());

        let fired = stops.take_triggered(Decimal::from(105));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].side, Side::Buy);

        let fired = stops.take_triggered(Decimal::from(90));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].side, Side::Sell);
        assert!(stops.is_empty());
    }

    #[test]
    fn test_triggered_in_arrival_order() {
        let mut stops = StopBook::new();
        stops.insert(stop(Side::Sell, 90, 7));
        stops.insert(stop(Side::Sell, 95, 3));
        stops.insert(stop(Side::Sell, 99, 5));

        let fired = stops.take_triggered(Decimal::from(80));
        let sequences: Vec<u64> = fired.iter().map(|o| o.sequence()).collect();
        assert_eq!(sequences, vec![3, 5, 7]);
    }

    #[test]
    fn test_remove() {
        let mut stops = StopBook::new();
        let order = stop(Side::Buy, 105, 1);
        let id = order.id;
        stops.insert(order);

        assert!(stops.get(&id).is_some());
        assert!(stops.remove(&id).is_some());
        assert!(stops.remove(&id).is_none());
        assert!(stops.take_triggered(Decimal::from(200)).is_empty());
    }
}
