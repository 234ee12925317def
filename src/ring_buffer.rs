use crate::reading::SensorReading;
use std::collections::VecDeque;
use tracing::trace;

/// Fixed-capacity, time-ordered buffer of readings for one sensor.
///
/// The buffer always holds the most recent `capacity` readings, oldest
/// evicted first. Timestamps are non-decreasing within the buffer: a reading
/// whose timestamp regresses (clock step on the bench host) is clamped to
/// the timestamp of the current tail rather than discarded.
#[derive(Debug)]
pub struct ReadingBuffer {
    readings: VecDeque<SensorReading>,
    capacity: usize,
    evicted: u64,
}

impl ReadingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Reading buffer capacity must be greater than 0");
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append a reading, evicting the oldest if at capacity.
    pub fn push(&mut self, mut reading: SensorReading) {
        if let Some(tail) = self.readings.back() {
            if reading.timestamp < tail.timestamp {
                trace!(
                    sensor_id = %reading.sensor_id,
                    "Clamping regressive reading timestamp {} to {}",
                    reading.timestamp,
                    tail.timestamp
                );
                reading.timestamp = tail.timestamp;
            }
        }

        if self.readings.len() == self.capacity {
            self.readings.pop_front();
            self.evicted += 1;
        }
        self.readings.push_back(reading);
    }

    /// The most recent reading, if any.
    pub fn latest(&self) -> Option<&SensorReading> {
        self.readings.back()
    }

    /// The `limit` most recent readings, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SensorReading> {
        self.readings.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total readings evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
