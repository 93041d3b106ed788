//! Fixed-capacity sample ring
//!
//! Observations are appended in strictly increasing timestamp order. Once
//! the ring is full the oldest entry is overwritten.

use crate::types::SamplePoint;
use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Anything that can live in a [`RingBuffer`]
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for SamplePoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Raw energy increments observed alongside a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyMark {
    pub timestamp: DateTime<Utc>,
    /// Increment of the external counter since the previous mark (kWh)
    pub external_kwh: f64,
    /// Integrated power-sensor energy since the previous mark (kWh)
    pub measured_kwh: f64,
}

impl Timestamped for EnergyMark {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Bounded ring ordered by timestamp
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    /// Index of the oldest entry once the ring has wrapped
    head: usize,
    capacity: usize,
}

pub type SampleBuffer = RingBuffer<SamplePoint>;

impl<T: Timestamped> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry. Returns false, leaving the ring untouched, when the
    /// entry is not strictly newer than the newest one.
    pub fn push(&mut self, item: T) -> bool {
        if let Some(last) = self.last() {
            if item.timestamp() <= last.timestamp() {
                return false;
            }
        }
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else {
            self.slots[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
        true
    }

    /// Entry at logical position `index` (0 = oldest)
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.slots.len() {
            return None;
        }
        self.slots.get((self.head + index) % self.slots.len())
    }

    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&T> {
        self.slots.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.slots.len()).filter_map(move |i| self.get(i))
    }

    /// Entries with a timestamp at or after `start`
    pub fn since(&self, start: DateTime<Utc>) -> impl Iterator<Item = &T> + '_ {
        self.iter().filter(move |item| item.timestamp() >= start)
    }

    /// Hours between the oldest and newest entry
    pub fn span_hours(&self) -> f64 {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) if self.slots.len() >= 2 => {
                (last.timestamp() - first.timestamp()).num_milliseconds() as f64 / 3_600_000.0
            }
            _ => 0.0,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}

#[derive(Serialize)]
struct RingStateRef<'a, T> {
    capacity: usize,
    items: Vec<&'a T>,
}

#[derive(Deserialize)]
struct RingState<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T: Timestamped + Serialize> Serialize for RingBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RingStateRef {
            capacity: self.capacity,
            items: self.iter().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de, T: Timestamped + Deserialize<'de>> Deserialize<'de> for RingBuffer<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = RingState::<T>::deserialize(deserializer)?;
        // Stored capacity is untrusted; slots grow with the items actually read
        let mut ring = RingBuffer {
            slots: Vec::new(),
            head: 0,
            capacity: state.capacity.max(1),
        };
        for item in state.items {
            ring.push(item);
        }
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn point(minute: i64) -> SamplePoint {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        SamplePoint::new(base + Duration::minutes(minute), 20.0, 5.0, false)
    }

    #[test]
    fn test_push_and_order() {
        let mut ring = SampleBuffer::new(5);
        for m in 0..3 {
            assert!(ring.push(point(m)));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.first().unwrap().timestamp, point(0).timestamp);
        assert_eq!(ring.last().unwrap().timestamp, point(2).timestamp);
    }

    #[test]
    fn test_eviction_wraps() {
        let mut ring = SampleBuffer::new(3);
        for m in 0..7 {
            ring.push(point(m));
        }
        assert_eq!(ring.len(), 3);
        let minutes: Vec<i64> = ring
            .iter()
            .map(|p| (p.timestamp - point(0).timestamp).num_minutes())
            .collect();
        assert_eq!(minutes, vec![4, 5, 6]);
    }

    #[test]
    fn test_rejects_non_increasing_timestamps() {
        let mut ring = SampleBuffer::new(10);
        assert!(ring.push(point(5)));
        assert!(!ring.push(point(5)));
        assert!(!ring.push(point(3)));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_span_and_since() {
        let mut ring = SampleBuffer::new(2880);
        for m in 0..=720 {
            ring.push(point(m));
        }
        assert!((ring.span_hours() - 12.0).abs() < 1e-9);
        assert_eq!(ring.since(point(700).timestamp).count(), 21);
    }

    #[test]
    fn test_serde_preserves_logical_order() {
        let mut ring = SampleBuffer::new(3);
        for m in 0..5 {
            ring.push(point(m));
        }
        let json = serde_json::to_string(&ring).unwrap();
        let restored: SampleBuffer = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.capacity(), 3);
        let original: Vec<_> = ring.iter().copied().collect();
        let copy: Vec<_> = restored.iter().copied().collect();
        assert_eq!(original, copy);
    }

    #[test]
    fn test_oversized_stored_capacity_does_not_preallocate() {
        let json = format!(
            r#"{{"capacity":{},"items":[]}}"#,
            u64::MAX
        );
        let restored: SampleBuffer = serde_json::from_str(&json).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.capacity(), usize::MAX);
    }

    #[test]
    fn test_clear() {
        let mut ring = SampleBuffer::new(3);
        ring.push(point(0));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.span_hours(), 0.0);
        assert!(ring.push(point(0)));
    }
}
