//! Local payment store, sole writer: this module.

use crate::models::Payment;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct PaymentStore {
    payments: Mutex<Vec<Payment>>,
}

impl PaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, payment: Payment) {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        payments.push(payment);
    }

    pub fn get_by_order(&self, order_id: i64) -> Option<Payment> {
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        payments.iter().find(|p| p.order_id == order_id).cloned()
    }

    pub fn count(&self) -> usize {
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        payments.len()
    }
}
