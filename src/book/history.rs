// ============================================================================
// Terminal Order History
// Recent terminal orders in full, older ones by id only
// ============================================================================

use crate::domain::{Order, OrderId};
use std::collections::{HashMap, HashSet, VecDeque};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100_000;

/// Filled, cancelled and rejected orders.
///
/// The newest `capacity` orders are kept whole for status lookups. Older ones
/// shrink to their id, which is all a repeated cancel needs to answer
/// `AlreadyTerminal`.
#[derive(Debug, Clone)]
pub struct OrderHistory {
    recent: HashMap<OrderId, Order>,
    arrival: VecDeque<OrderId>,
    compacted: HashSet<OrderId>,
    capacity: usize,
}

impl Default for OrderHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl OrderHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            recent: HashMap::new(),
            arrival: VecDeque::new(),
            compacted: HashSet::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, order: Order) {
        let id = order.id;
        if self.recent.insert(id, order).is_none() {
            self.compacted.remove(&id);
            self.arrival.push_back(id);
        }
        while self.arrival.len() > self.capacity {
            let Some(oldest) = self.arrival.pop_front() else {
                break;
            };
            self.recent.remove(&oldest);
            self.compacted.insert(oldest);
        }
    }

    /// Full record, if still within the recent window
    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.recent.get(order_id)
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.recent.contains_key(order_id) || self.compacted.contains(order_id)
    }

    /// Orders kept in full
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty() && self.compacted.is_empty()
    }
}
