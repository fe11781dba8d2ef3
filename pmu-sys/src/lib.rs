//! Raw accessors for the ARMv8 PMU system registers.
//!
//! Every function here touches the registers of the core it executes on and
//! nothing else. Writes are followed by an instruction synchronisation barrier
//! because system register writes are not ordered with respect to subsequent
//! register reads.
//!
//! Access from EL0 requires the kernel to have set `PMUSERENR_EL0.EN`.

#![no_std]
#![cfg(target_arch = "aarch64")]

use core::arch::asm;

/// `PMCR_EL0.E`: enable all counters.
pub const PMCR_E: u64 = 1 << 0;
/// `PMCR_EL0.P`: reset all event counters (write-only).
pub const PMCR_P: u64 = 1 << 1;
/// `PMCR_EL0.C`: reset the cycle counter (write-only).
pub const PMCR_C: u64 = 1 << 2;
/// Shift of `PMCR_EL0.N`, the number of implemented event counters.
pub const PMCR_N_SHIFT: u64 = 11;
/// Mask of `PMCR_EL0.N` once shifted down.
pub const PMCR_N_MASK: u64 = 0x1f;

/// Enable/overflow bit of the cycle counter in `PMCNTEN{SET,CLR}_EL0` and
/// `PMOVSCLR_EL0`.
pub const PMCNTEN_C: u64 = 1 << 31;

macro_rules! sysreg_write {
    ($name:ident, $reg:literal) => {
        #[doc = concat!("Write `", $reg, "` followed by an ISB.")]
        ///
        /// # Safety
        ///
        /// Requires PMU access at the current exception level.
        #[inline(always)]
        pub unsafe fn $name(val: u64) {
            asm!(concat!("msr ", $reg, ", {0}"), "isb", in(reg) val, options(nostack));
        }
    };
}

macro_rules! sysreg_read {
    ($name:ident, $reg:literal) => {
        #[doc = concat!("Read `", $reg, "`.")]
        ///
        /// # Safety
        ///
        /// Requires PMU access at the current exception level.
        #[inline(always)]
        pub unsafe fn $name() -> u64 {
            let val: u64;
            asm!(concat!("mrs {0}, ", $reg), out(reg) val, options(nomem, nostack));
            val
        }
    };
}

sysreg_write!(write_pmselr_el0, "pmselr_el0");
sysreg_write!(write_pmxevtyper_el0, "pmxevtyper_el0");
sysreg_write!(write_pmxevcntr_el0, "pmxevcntr_el0");
sysreg_write!(write_pmcr_el0, "pmcr_el0");
sysreg_write!(write_pmcntenset_el0, "pmcntenset_el0");
sysreg_write!(write_pmcntenclr_el0, "pmcntenclr_el0");
sysreg_write!(write_pmovsclr_el0, "pmovsclr_el0");

sysreg_read!(read_pmxevcntr_el0, "pmxevcntr_el0");
sysreg_read!(read_pmccntr_el0, "pmccntr_el0");
sysreg_read!(read_pmcr_el0, "pmcr_el0");
