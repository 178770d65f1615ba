//! Priority-ordered admission queue.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use super::Priority;

/// A request waiting for a slot. Sending on `tx` hands it the slot.
#[derive(Debug)]
pub struct Waiter {
    pub id: u64,
    pub tx: oneshot::Sender<()>,
}

/// Three FIFO tiers, drained highest first.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    high: VecDeque<Waiter>,
    medium: VecDeque<Waiter>,
    low: VecDeque<Waiter>,
    next_id: u64,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<Waiter> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    /// Enqueue a waiter and return its id.
    pub fn push(&mut self, priority: Priority, tx: oneshot::Sender<()>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.tier_mut(priority).push_back(Waiter { id, tx });
        id
    }

    /// Highest-priority, earliest-queued waiter.
    pub fn pop_next(&mut self) -> Option<Waiter> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    /// Remove a waiter that gave up. Returns false if it was already popped.
    pub fn remove(&mut self, id: u64) -> bool {
        for tier in [&mut self.high, &mut self.medium, &mut self.low] {
            if let Some(pos) = tier.iter().position(|w| w.id == id) {
                tier.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every waiter out, in admission order.
    pub fn drain(&mut self) -> Vec<Waiter> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(waiter) = self.pop_next() {
            drained.push(waiter);
        }
        drained
    }
}
