//! Loss accounting on the 4-bit VITA-49 packet counter.
//!
//! Every telemetry packet carries a counter that wraps at 16. A tracker
//! remembers the last value seen and counts each packet that does not
//! carry `(last + 1) % 16`. The first packet after a reset is accepted
//! unconditionally.

/// Counter modulus.
pub const COUNTER_MODULUS: u8 = 16;

/// Loss tracker that always resynchronizes to the latest counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    last: Option<u8>,
    errors: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet counter. Returns `false` if it was out of sequence.
    pub fn observe(&mut self, count: u8) -> bool {
        let count = count % COUNTER_MODULUS;
        let in_sequence = match self.expected() {
            None => true,
            Some(expected) => {
                if count != expected {
                    self.errors += 1;
                    tracing::debug!(expected = expected, got = count, "Packet counter out of sequence");
                    false
                } else {
                    true
                }
            }
        };
        self.last = Some(count);
        in_sequence
    }

    /// Next counter value expected, or `None` before the first packet.
    pub fn expected(&self) -> Option<u8> {
        self.last.map(|last| (last + 1) % COUNTER_MODULUS)
    }

    /// Out-of-sequence packets since the last reset.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Forget the last counter so the next packet is accepted as-is.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Loss tracker that never moves backwards.
///
/// On a mismatch the remembered counter only advances when the new value
/// is numerically greater, so a single late packet does not cause a second
/// error when the stream resumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSequenceTracker {
    last: Option<u8>,
    errors: u64,
}

impl ForwardSequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, count: u8) -> bool {
        let count = count % COUNTER_MODULUS;
        let Some(last) = self.last else {
            self.last = Some(count);
            return true;
        };

        let expected = (last + 1) % COUNTER_MODULUS;
        if count == expected {
            self.last = Some(count);
            return true;
        }

        self.errors += 1;
        tracing::debug!(expected = expected, got = count, "Packet counter out of sequence");
        if count > last {
            self.last = Some(count);
        }
        false
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }
}
