use std::fmt;

/// Bit of the enable/overflow masks controlling the free-running cycle
/// counter.
pub const CYCLE_COUNTER: u32 = 1 << 31;

/// A hardware event counter slot.
///
/// ARMv8 implements at most 31 event counters; bit 31 of every counter mask
/// belongs to the cycle counter and can never be a `Slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    /// Number of slot identifiers the architecture can address.
    pub const LIMIT: u8 = 31;

    /// Construct a slot, panicking (at compile time in `const` contexts) if
    /// `index` is not addressable.
    pub const fn new(index: u8) -> Slot {
        assert!(index < Slot::LIMIT, "slot index out of range");
        Slot(index)
    }

    /// The counter index as written to the selection register.
    pub const fn index(self) -> u8 {
        self.0
    }

    /// The enable/overflow mask bit of this slot.
    pub const fn bit(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hardware-defined event number, as written to the event type register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventCode(pub u16);

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Register-level access to the PMU of the core the caller is executing on.
///
/// Implementations are handed out by a [`Cluster`] only while running on a
/// specific core, and every method acts on that core alone. None of the
/// operations can fail; addressing a slot the core does not implement is a
/// caller bug, which the fixed [`Program`] table rules out.
///
/// [`Cluster`]: trait.Cluster.html
/// [`Program`]: struct.Program.html
pub trait CounterBackend {
    /// Number of event counters implemented by this core.
    fn slot_count(&self) -> u8;

    /// Select `slot`, bind it to `event` and zero its value.
    fn select_and_bind(&mut self, slot: Slot, event: EventCode);

    /// Select `slot` and read its current value.
    fn read_slot(&mut self, slot: Slot) -> u64;

    /// Read the cycle counter.
    fn read_cycles(&mut self) -> u64;

    /// Start every counter set in `mask` in a single register write.
    fn enable_mask(&mut self, mask: u32);

    /// Stop every counter set in `mask` in a single register write.
    fn disable_mask(&mut self, mask: u32);

    /// Clear every pending overflow flag.
    fn clear_overflow(&mut self);

    /// Enable the PMU and zero every event counter and the cycle counter.
    fn reset_all(&mut self);
}
