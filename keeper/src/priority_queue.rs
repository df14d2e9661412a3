//! Priority queue for tracking position health (min-heap by ICR)

use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use trove_model::PositionId;

use crate::health::PositionHealth;

/// Health-based priority queue (min-heap: lowest ratio first)
pub struct HealthQueue {
    /// Priority queue (using Reverse for min-heap)
    queue: PriorityQueue<PositionId, Reverse<u128>>,
    /// Map for O(1) lookups
    map: HashMap<PositionId, PositionHealth>,
}

impl HealthQueue {
    /// Create new empty queue
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            map: HashMap::new(),
        }
    }

    /// Push or update position health
    pub fn push(&mut self, health: PositionHealth) {
        let id = health.id;
        let icr = health.icr;

        self.map.insert(id, health);
        self.queue.push(id, Reverse(icr));
    }

    /// Peek at position with lowest ratio without removing
    pub fn peek(&self) -> Option<&PositionHealth> {
        let (id, _priority) = self.queue.peek()?;
        self.map.get(id)
    }

    /// Remove position from queue
    pub fn remove(&mut self, id: &PositionId) -> Option<PositionHealth> {
        self.queue.remove(id);
        self.map.remove(id)
    }

    pub fn get(&self, id: &PositionId) -> Option<&PositionHealth> {
        self.map.get(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Replace the whole queue with a fresh scan
    pub fn refresh(&mut self, scan: Vec<PositionHealth>) {
        self.clear();
        for health in scan {
            self.push(health);
        }
    }

    /// Positions below the threshold, worst first
    pub fn get_liquidatable(&self, threshold: u128) -> Vec<PositionHealth> {
        let mut out: Vec<PositionHealth> = self
            .map
            .values()
            .filter(|h| h.needs_liquidation(threshold))
            .cloned()
            .collect();
        out.sort_by_key(|h| (h.icr, h.id));
        out
    }

    /// Positions close to the threshold
    pub fn get_at_risk(&self, threshold: u128, buffer: u128) -> Vec<PositionHealth> {
        self.map
            .values()
            .filter(|h| h.in_warning_zone(threshold, buffer))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.map.clear();
    }
}

impl Default for HealthQueue {
    fn default() -> Self {
        Self::new()
    }
}
