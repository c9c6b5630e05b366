//! Local order store
//!
//! This module is the sole writer to its own domain records; other modules
//! only ever see the ids and denormalized fields carried on events.

use crate::models::{CreateOrderRequest, Order};
use chrono::Utc;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct OrderStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    orders: Vec<Order>,
    next_id: i64,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a new order locally and return it.
    pub fn insert(&self, request: &CreateOrderRequest) -> Order {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_id += 1;
        let order = Order {
            order_id: state.next_id,
            user_id: request.user_id,
            user_email: request.user_email.clone(),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            item_count: request.item_count,
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        state.orders.push(order.clone());
        order
    }

    pub fn get(&self, order_id: i64) -> Option<Order> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.orders.iter().find(|o| o.order_id == order_id).cloned()
    }

    pub fn count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.orders.len()
    }
}
