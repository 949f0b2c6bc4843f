use std::collections::VecDeque;

use gnbwatch_protocol::TelemetryFrame;

/// Fixed-capacity circular buffer for time-series data.
///
/// When the buffer is full, the oldest element is evicted on each push.
/// Iteration order is oldest → newest.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create an empty ring buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a value, evicting the oldest entry when at capacity.
    pub fn push(&mut self, value: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    /// The most recently pushed value, if any.
    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Latest reading of one UE slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotReading {
    pub rnti: Option<String>,
    pub rsrp: Option<f64>,
}

/// RSRP history per UE slot, fed from telemetry frames.
///
/// Slot N holds the Nth UE of each frame, matching the positional
/// alignment used by the CSV export. Frames without UEs advance nothing.
/// A slot absent from a frame records no sample for that frame.
#[derive(Debug, Clone)]
pub struct SlotHistory {
    slots: Vec<RingBuffer<f64>>,
    latest: Vec<SlotReading>,
    capacity: usize,
    frames_seen: usize,
}

impl SlotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            latest: Vec::new(),
            capacity,
            frames_seen: 0,
        }
    }

    /// Ingest one frame.
    pub fn process_frame(&mut self, frame: &TelemetryFrame) {
        self.frames_seen += 1;
        for (slot, ue) in frame.ues.iter().enumerate() {
            if self.slots.len() <= slot {
                self.slots.push(RingBuffer::new(self.capacity));
                self.latest.push(SlotReading {
                    rnti: None,
                    rsrp: None,
                });
            }
            let rsrp = ue.rsrp();
            if let Some(v) = rsrp {
                self.slots[slot].push(v);
            }
            self.latest[slot] = SlotReading {
                rnti: ue.rnti(),
                rsrp,
            };
        }
    }

    /// Number of slots ever observed.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of frames ingested, including frames without UEs.
    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    pub fn history(&self, slot: usize) -> Option<&RingBuffer<f64>> {
        self.slots.get(slot)
    }

    pub fn latest(&self, slot: usize) -> Option<&SlotReading> {
        self.latest.get(slot)
    }
}
