//! Duplicate delivery policy.
//!
//! The mesh delivers at least once. Under `AtLeastOnce` a repeated message
//! is processed again, producing a second report and possibly a second
//! advance. `DropDuplicates` remembers recently processed message ids and
//! skips repeats.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use serde::Deserialize;

/// Default number of message ids remembered by `DropDuplicates`.
pub const DEFAULT_DEDUPE_CAPACITY: usize = 1024;

/// How the coordinator treats a message it has already processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Process every delivery.
    #[default]
    AtLeastOnce,
    /// Skip message ids seen among the last `capacity` deliveries.
    DropDuplicates { capacity: usize },
}

/// Delivery configuration as read from config files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub dedupe: bool,
    pub dedupe_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            dedupe: false,
            dedupe_capacity: DEFAULT_DEDUPE_CAPACITY,
        }
    }
}

impl DeliveryConfig {
    pub fn policy(&self) -> DeliveryPolicy {
        if self.dedupe {
            DeliveryPolicy::DropDuplicates {
                capacity: self.dedupe_capacity.max(1),
            }
        } else {
            DeliveryPolicy::AtLeastOnce
        }
    }
}

/// Bounded memory of processed message ids.
#[derive(Debug)]
pub(crate) struct DeliveryTracker {
    policy: DeliveryPolicy,
    seen: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl DeliveryTracker {
    pub(crate) fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Record a delivery. Returns false when it should be skipped.
    pub(crate) fn admit(&self, message_id: &str) -> bool {
        let DeliveryPolicy::DropDuplicates { capacity } = self.policy else {
            return true;
        };

        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.ids.contains(message_id) {
            return false;
        }

        seen.ids.insert(message_id.to_string());
        seen.order.push_back(message_id.to_string());
        while seen.order.len() > capacity {
            if let Some(evicted) = seen.order.pop_front() {
                seen.ids.remove(&evicted);
            }
        }
        true
    }
}
