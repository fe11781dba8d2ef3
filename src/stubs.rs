#![allow(dead_code)]

pub const PMCR_E: u64 = 1 << 0;
pub const PMCR_P: u64 = 1 << 1;
pub const PMCR_C: u64 = 1 << 2;
pub const PMCR_N_SHIFT: u64 = 11;
pub const PMCR_N_MASK: u64 = 0x1f;
pub const PMCNTEN_C: u64 = 1 << 31;

pub unsafe fn write_pmselr_el0(_val: u64) {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn write_pmxevtyper_el0(_val: u64) {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn write_pmxevcntr_el0(_val: u64) {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn write_pmcr_el0(_val: u64) {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn write_pmcntenset_el0(_val: u64) {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn write_pmcntenclr_el0(_val: u64) {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn write_pmovsclr_el0(_val: u64) {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn read_pmxevcntr_el0() -> u64 {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn read_pmccntr_el0() -> u64 {
    unimplemented!("only implemented on aarch64")
}

pub unsafe fn read_pmcr_el0() -> u64 {
    unimplemented!("only implemented on aarch64")
}
