//! Emergency override and the queue of hall calls it holds back.

use std::collections::VecDeque;

use super::request::FloorRequest;

/// Manual (operator) and automatic (occupancy sensor) emergency inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmergencyOverride {
    /// Set from the presentation layer
    pub manual: bool,
    /// Set from the occupancy sensor
    pub auto: bool,
}

impl EmergencyOverride {
    /// `manual || auto`
    pub fn active(&self) -> bool {
        self.manual || self.auto
    }
}

/// Hall calls accepted while the override is active, released FIFO when it clears.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    queue: VecDeque<FloorRequest>,
}

impl PendingQueue {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `request` unless the same `(floor, origin)` is already held.
    pub fn push(&mut self, request: FloorRequest) -> bool {
        if self.queue.iter().any(|r| r.key() == request.key()) {
            return false;
        }
        self.queue.push_back(request);
        true
    }

    /// Empties the queue, oldest first.
    pub fn drain(&mut self) -> Vec<FloorRequest> {
        self.queue.drain(..).collect()
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[allow(missing_docs)]
    pub fn iter(&self) -> impl Iterator<Item = &FloorRequest> {
        self.queue.iter()
    }
}
