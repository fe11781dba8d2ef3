use std::fs;
use std::marker::PhantomData;
use std::mem;
use std::sync::{Mutex, PoisonError};

use log::{debug, info};

#[cfg(target_arch = "aarch64")]
use pmu_sys::{
    read_pmccntr_el0, read_pmcr_el0, read_pmxevcntr_el0, write_pmcntenclr_el0,
    write_pmcntenset_el0, write_pmcr_el0, write_pmovsclr_el0, write_pmselr_el0,
    write_pmxevcntr_el0, write_pmxevtyper_el0, PMCR_C, PMCR_E, PMCR_N_MASK, PMCR_N_SHIFT, PMCR_P,
};

#[cfg(not(target_arch = "aarch64"))]
use super::stubs::*;

use crate::backend::{CounterBackend, EventCode, Slot};
use crate::cluster::{Cluster, CpuId};
use crate::error::{new_error, new_os_error, Error, ErrorKind};

const ONLINE_PATH: &str = "/sys/devices/system/cpu/online";

lazy_static! {
    // The PMU registers are shared by everything running on a core, so two
    // monitors in one process would reprogram each other's counters.
    static ref HOST_CLAIMED: Mutex<bool> = Mutex::new(false);
}

/// The cores of the machine this process runs on.
///
/// Actions are executed by a worker thread pinned to the target core with
/// `sched_setaffinity(2)`, so they touch that core's PMU registers directly.
/// This needs an aarch64 Linux kernel that grants EL0 access to the PMU
/// (`PMUSERENR_EL0.EN` set), and nothing else on the system (such as `perf`)
/// using the same counters.
///
/// Only one `HostCluster` can exist at a time; dropping it releases the claim.
#[derive(Debug)]
pub struct HostCluster {
    cpus: usize,
}

impl HostCluster {
    /// Claim the PMU of every core in the system.
    ///
    /// Fails with [`ErrorKind::Unsupported`] on targets without PMU register
    /// access, and [`ErrorKind::Busy`] if another `HostCluster` is alive.
    ///
    /// [`ErrorKind::Unsupported`]: error/enum.ErrorKind.html#variant.Unsupported
    /// [`ErrorKind::Busy`]: error/enum.ErrorKind.html#variant.Busy
    pub fn claim() -> Result<Self, Error> {
        if !cfg!(target_arch = "aarch64") {
            return Err(new_error(ErrorKind::Unsupported));
        }

        let mut claimed = HOST_CLAIMED.lock().unwrap_or_else(PoisonError::into_inner);
        if *claimed {
            return Err(new_error(ErrorKind::Busy));
        }

        let cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        if cpus < 1 {
            return Err(new_os_error(ErrorKind::Unknown));
        }
        let cpus = (cpus as usize).min(libc::CPU_SETSIZE as usize);

        *claimed = true;
        info!("pmu: claimed host PMU on {} cpus", cpus);

        Ok(HostCluster { cpus })
    }
}

impl Drop for HostCluster {
    fn drop(&mut self) {
        *HOST_CLAIMED.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl Cluster for HostCluster {
    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn is_online(&self, cpu: CpuId) -> bool {
        if cpu >= self.cpus {
            return false;
        }

        match fs::read_to_string(ONLINE_PATH) {
            Ok(list) => cpu_list_contains(&list, cpu),
            // Without sysfs, treat every configured cpu as online and let the
            // affinity call in run_on() decide.
            Err(_) => true,
        }
    }

    fn run_on<R, F>(&self, cpu: CpuId, action: &F) -> Option<R>
    where
        F: Fn(CpuId, &mut dyn CounterBackend) -> R + Sync,
    {
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        unsafe { libc::CPU_SET(cpu, &mut set) };

        // Pins the calling worker thread only.
        if unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) } != 0 {
            debug!(
                "pmu: cannot run on cpu{}: {}",
                cpu,
                std::io::Error::last_os_error()
            );
            return None;
        }

        let mut pmu = LocalPmu {
            _pinned: PhantomData,
        };
        Some(action(cpu, &mut pmu))
    }
}

/// Register handle of the core the current thread is pinned to.
///
/// Not `Send`: a handle must never leave the thread that was pinned to create
/// it.
#[derive(Debug)]
pub struct LocalPmu {
    _pinned: PhantomData<*const ()>,
}

impl CounterBackend for LocalPmu {
    fn slot_count(&self) -> u8 {
        let pmcr = unsafe { read_pmcr_el0() };
        ((pmcr >> PMCR_N_SHIFT) & PMCR_N_MASK) as u8
    }

    fn select_and_bind(&mut self, slot: Slot, event: EventCode) {
        unsafe {
            write_pmselr_el0(u64::from(slot.index()));
            write_pmxevtyper_el0(u64::from(event.0));
            write_pmxevcntr_el0(0);
        }
    }

    fn read_slot(&mut self, slot: Slot) -> u64 {
        unsafe {
            write_pmselr_el0(u64::from(slot.index()));
            read_pmxevcntr_el0()
        }
    }

    fn read_cycles(&mut self) -> u64 {
        unsafe { read_pmccntr_el0() }
    }

    fn enable_mask(&mut self, mask: u32) {
        unsafe { write_pmcntenset_el0(u64::from(mask)) }
    }

    fn disable_mask(&mut self, mask: u32) {
        unsafe { write_pmcntenclr_el0(u64::from(mask)) }
    }

    fn clear_overflow(&mut self) {
        unsafe { write_pmovsclr_el0(u64::from(u32::MAX)) }
    }

    fn reset_all(&mut self) {
        unsafe { write_pmcr_el0(PMCR_E | PMCR_P | PMCR_C) }
    }
}

/// Whether `cpu` appears in a kernel cpu list such as `0-3,6,8-9`.
fn cpu_list_contains(list: &str, cpu: CpuId) -> bool {
    list.trim()
        .split(',')
        .filter(|range| !range.is_empty())
        .any(|range| {
            let mut bounds = range.splitn(2, '-').map(|n| n.trim().parse::<CpuId>());
            match (bounds.next(), bounds.next()) {
                (Some(Ok(lo)), None) => cpu == lo,
                (Some(Ok(lo)), Some(Ok(hi))) => lo <= cpu && cpu <= hi,
                _ => false,
            }
        })
}
