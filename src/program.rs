use crate::backend::{CounterBackend, EventCode, Slot, CYCLE_COUNTER};
use crate::error::{new_error, Error, ErrorKind};

/// ARMv8 common event numbers used by [`Program::CORTEX_A72`].
#[allow(missing_docs)]
pub mod events {
    use crate::backend::EventCode;

    pub const L1I_CACHE_REFILL: EventCode = EventCode(0x01);
    pub const L1D_CACHE_REFILL: EventCode = EventCode(0x03);
    pub const L1D_CACHE: EventCode = EventCode(0x04);
    pub const INST_RETIRED: EventCode = EventCode(0x08);
    pub const L1I_CACHE: EventCode = EventCode(0x14);
    /// The last level cache on the Cortex-A72 is the shared L2.
    pub const L2D_CACHE_REFILL: EventCode = EventCode(0x17);
}

/// The events counted on every core, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Instructions architecturally executed.
    Instructions,
    /// L1 instruction cache accesses.
    L1iReferences,
    /// L1 instruction cache refills.
    L1iMisses,
    /// L1 data cache accesses.
    L1dReferences,
    /// L1 data cache refills.
    L1dMisses,
    /// Last level cache refills.
    LlcMisses,
}

impl Event {
    /// Every event, in the order they appear in a report.
    pub const ALL: [Event; 6] = [
        Event::Instructions,
        Event::L1iReferences,
        Event::L1iMisses,
        Event::L1dReferences,
        Event::L1dMisses,
        Event::LlcMisses,
    ];

    /// The report key for this event.
    pub fn key(self) -> &'static str {
        match self {
            Event::Instructions => "instructions",
            Event::L1iReferences => "l1i_references",
            Event::L1iMisses => "l1i_misses",
            Event::L1dReferences => "l1d_references",
            Event::L1dMisses => "l1d_misses",
            Event::LlcMisses => "llc_misses",
        }
    }
}

/// The fixed {slot → event} table programmed identically on every core.
///
/// A program is only ever applied as a whole: [`establish`] stops, resets,
/// rebinds and restarts every counter it owns, so each core ends up with the
/// same bindings and counts from zero.
///
/// [`establish`]: #method.establish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bindings: [(Event, Slot, EventCode); 6],
}

impl Program {
    /// Bindings for the Cortex-A72 (Raspberry Pi 4).
    pub const CORTEX_A72: Program = Program {
        bindings: [
            (Event::Instructions, Slot::new(0), events::INST_RETIRED),
            (Event::L1iReferences, Slot::new(1), events::L1I_CACHE),
            (Event::L1iMisses, Slot::new(2), events::L1I_CACHE_REFILL),
            (Event::L1dReferences, Slot::new(3), events::L1D_CACHE),
            (Event::L1dMisses, Slot::new(4), events::L1D_CACHE_REFILL),
            (Event::LlcMisses, Slot::new(5), events::L2D_CACHE_REFILL),
        ],
    };

    /// The `(slot, event code)` pairs in programming order.
    pub fn bindings(&self) -> impl Iterator<Item = (Slot, EventCode)> + '_ {
        self.bindings.iter().map(|&(_, slot, code)| (slot, code))
    }

    /// The slot counting `event`.
    pub fn slot(&self, event: Event) -> Slot {
        self.bindings
            .iter()
            .find(|(e, _, _)| *e == event)
            .map(|&(_, slot, _)| slot)
            // Every Event variant is bound exactly once.
            .unwrap_or_else(|| unreachable!("{:?} has no slot", event))
    }

    /// Enable mask covering every bound slot and the cycle counter.
    pub fn mask(&self) -> u32 {
        self.bindings
            .iter()
            .fold(CYCLE_COUNTER, |mask, &(_, slot, _)| mask | slot.bit())
    }

    /// Number of event counters a core must implement to run this program.
    pub fn required_slots(&self) -> u8 {
        self.bindings
            .iter()
            .map(|&(_, slot, _)| slot.index() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Check this program fits a core implementing `slot_count` counters.
    pub fn validate(&self, slot_count: u8) -> Result<(), Error> {
        if slot_count < self.required_slots() {
            return Err(new_error(ErrorKind::Unsupported));
        }
        Ok(())
    }

    /// (Re)program `pmu` and start counting from zero.
    ///
    /// Counters are disabled before they are reset and bound, and only enabled
    /// once every binding is in place, so no slot ever counts under a stale
    /// event type.
    pub fn establish<B: CounterBackend + ?Sized>(&self, pmu: &mut B) {
        let mask = self.mask();

        pmu.disable_mask(mask);
        pmu.clear_overflow();
        pmu.reset_all();

        for (slot, code) in self.bindings() {
            pmu.select_and_bind(slot, code);
        }

        pmu.enable_mask(mask);
    }

    /// Stop every counter owned by this program, preserving their values.
    pub fn teardown<B: CounterBackend + ?Sized>(&self, pmu: &mut B) {
        pmu.disable_mask(self.mask());
    }
}

impl Default for Program {
    fn default() -> Self {
        Program::CORTEX_A72
    }
}
