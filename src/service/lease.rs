use crate::error::{ReconError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// 行程级互斥：同一行程同一时刻只允许一个写操作
///
/// 非阻塞：已被占用时直接返回 `TripBusy`，不排队等待。
#[derive(Clone, Default)]
pub struct TripLeases {
    active: Arc<DashMap<i64, &'static str>>,
}

impl TripLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, trip_id: i64, operation: &'static str) -> Result<TripLease> {
        match self.active.entry(trip_id) {
            Entry::Occupied(held) => {
                tracing::warn!(
                    "Trip {} busy: {} rejected while {} in flight",
                    trip_id,
                    operation,
                    held.get()
                );
                Err(ReconError::TripBusy(trip_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(operation);
                Ok(TripLease {
                    trip_id,
                    active: Arc::clone(&self.active),
                })
            }
        }
    }

    pub fn is_held(&self, trip_id: i64) -> bool {
        self.active.contains_key(&trip_id)
    }
}

/// drop 时释放
pub struct TripLease {
    trip_id: i64,
    active: Arc<DashMap<i64, &'static str>>,
}

impl Drop for TripLease {
    fn drop(&mut self) {
        self.active.remove(&self.trip_id);
    }
}
