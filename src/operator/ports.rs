use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::{ProvisionError, Result};

pub const DEFAULT_MIN_PORT: u16 = 3000;
pub const DEFAULT_MAX_PORT: u16 = 3999;
pub const DEFAULT_APP_PORT_OFFSET: u16 = 2000;

/// Host port range handed out to student containers. `max` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
    pub app_offset: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_PORT,
            max: DEFAULT_MAX_PORT,
            app_offset: DEFAULT_APP_PORT_OFFSET,
        }
    }
}

impl PortRange {
    pub fn capacity(&self) -> usize {
        usize::from(self.max.saturating_sub(self.min))
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..self.max).contains(&port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub dev: u16,
    pub app: u16,
}

/// Exclusive reservations of development ports. The reserved set is the only
/// authority; ports are never probed on the host.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
    reserved: Arc<Mutex<BTreeSet<u16>>>,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            reserved: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Picks a free development port uniformly at random.
    pub fn reserve(&self) -> Result<PortPair> {
        let mut reserved = self.reserved();

        let free = self.range.capacity() - reserved.len();
        if free == 0 {
            return Err(ProvisionError::PortSpaceExhausted {
                min: self.range.min,
                max: self.range.max,
            });
        }

        let nth = rand::thread_rng().gen_range(0..free);
        let dev = (self.range.min..self.range.max)
            .filter(|port| !reserved.contains(port))
            .nth(nth)
            .ok_or(ProvisionError::PortSpaceExhausted {
                min: self.range.min,
                max: self.range.max,
            })?;

        reserved.insert(dev);
        debug!(port = dev, reserved = reserved.len(), "Reserved port");

        Ok(PortPair {
            dev,
            app: dev + self.range.app_offset,
        })
    }

    /// Returns false when the port was not reserved.
    pub fn release(&self, dev: u16) -> bool {
        let released = self.reserved().remove(&dev);
        if released {
            debug!(port = dev, "Released port");
        }
        released
    }

    pub fn is_reserved(&self, dev: u16) -> bool {
        self.reserved().contains(&dev)
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved().len()
    }

    pub fn capacity(&self) -> usize {
        self.range.capacity()
    }

    fn reserved(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn small(min: u16, max: u16) -> PortAllocator {
        PortAllocator::new(PortRange {
            min,
            max,
            app_offset: DEFAULT_APP_PORT_OFFSET,
        })
    }

    #[test]
    fn reserves_within_range_with_offset() {
        let allocator = PortAllocator::new(PortRange::default());
        for _ in 0..100 {
            let pair = allocator.reserve().unwrap();
            assert!((3000..3999).contains(&pair.dev));
            assert_eq!(pair.app, pair.dev + 2000);
        }
        assert_eq!(allocator.reserved_count(), 100);
    }

    #[test]
    fn exhausted_range_fails_instead_of_looping() {
        let allocator = small(4000, 4003);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            assert!(seen.insert(allocator.reserve().unwrap().dev));
        }

        let err = allocator.reserve().unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::PortSpaceExhausted { min: 4000, max: 4003 }
        ));
    }

    #[test]
    fn release_makes_port_available_again() {
        let allocator = small(4000, 4001);
        let pair = allocator.reserve().unwrap();
        assert_eq!(pair.dev, 4000);
        assert!(allocator.reserve().is_err());

        assert!(allocator.release(pair.dev));
        assert_eq!(allocator.reserve().unwrap().dev, 4000);
    }

    #[test]
    fn release_is_idempotent() {
        let allocator = small(4000, 4010);
        let pair = allocator.reserve().unwrap();

        assert!(allocator.release(pair.dev));
        assert!(!allocator.release(pair.dev));
        assert!(!allocator.release(4005));
        assert_eq!(allocator.reserved_count(), 0);
    }

    #[test]
    fn concurrent_reservations_are_distinct() {
        let allocator = PortAllocator::new(PortRange::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let allocator = allocator.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|_| allocator.reserve().unwrap().dev)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for port in handle.join().unwrap() {
                assert!(all.insert(port), "port {port} handed out twice");
            }
        }
        assert_eq!(all.len(), 800);
        assert_eq!(allocator.reserved_count(), 800);
    }

    #[test]
    fn empty_range_has_no_capacity() {
        let allocator = small(5000, 5000);
        assert_eq!(allocator.capacity(), 0);
        assert!(allocator.reserve().is_err());
    }
}
