//! An in-memory cluster whose cores model the PMU registers in software.
//!
//! `SimCluster` drives the whole crate without hardware access, which makes it
//! useful for tests and for hosts without user PMU access. Workloads are
//! modelled by telling a core which events happened with [`SimCluster::record`]
//! and [`SimCluster::tick`]; only counters that are enabled and bound to the
//! recorded event advance, exactly as the hardware would behave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::{CounterBackend, EventCode, Slot, CYCLE_COUNTER};
use crate::cluster::{Cluster, CpuId};

const SLOTS: usize = Slot::LIMIT as usize;

/// Event counters implemented by each simulated core unless overridden.
pub const DEFAULT_SLOT_COUNT: u8 = 6;

#[derive(Debug, Default)]
struct Registers {
    slot_count: u8,
    pmu_enabled: bool,
    selected: u8,
    types: [Option<EventCode>; SLOTS],
    counters: [u64; SLOTS],
    cycles: u64,
    enabled: u32,
    overflow: u32,
}

impl Registers {
    fn implemented(&self, slot: u8) -> bool {
        slot < self.slot_count
    }

    fn counting(&self, bit: u32) -> bool {
        self.pmu_enabled && self.enabled & bit != 0
    }
}

#[derive(Debug)]
struct Core {
    online: AtomicBool,
    regs: Mutex<Registers>,
}

/// A simulated multi-core system.
#[derive(Debug)]
pub struct SimCluster {
    cores: Vec<Core>,
}

impl SimCluster {
    /// A cluster of `cpus` online cores, each implementing
    /// [`DEFAULT_SLOT_COUNT`] event counters.
    pub fn new(cpus: usize) -> Self {
        let cores = (0..cpus)
            .map(|_| Core {
                online: AtomicBool::new(true),
                regs: Mutex::new(Registers {
                    slot_count: DEFAULT_SLOT_COUNT,
                    ..Registers::default()
                }),
            })
            .collect();

        SimCluster { cores }
    }

    /// Bring `cpu` online or take it offline. Ignored for cpus outside the
    /// cluster.
    pub fn set_online(&self, cpu: CpuId, online: bool) {
        if let Some(core) = self.cores.get(cpu) {
            core.online.store(online, Ordering::SeqCst);
        }
    }

    /// Change the number of event counters `cpu` implements.
    pub fn set_slot_count(&self, cpu: CpuId, slots: u8) {
        if let Some(mut regs) = self.regs(cpu) {
            regs.slot_count = slots.min(Slot::LIMIT);
        }
    }

    /// Record `count` occurrences of `event` on `cpu`.
    ///
    /// Recording on an offline core is a no-op.
    pub fn record(&self, cpu: CpuId, event: EventCode, count: u64) {
        let mut regs = match self.online_regs(cpu) {
            Some(regs) => regs,
            None => return,
        };
        for i in 0..regs.slot_count {
            let bit = 1u32 << i;
            let i = usize::from(i);
            if regs.types[i] == Some(event) && regs.counting(bit) {
                let (value, wrapped) = regs.counters[i].overflowing_add(count);
                regs.counters[i] = value;
                if wrapped {
                    regs.overflow |= bit;
                }
            }
        }
    }

    /// Advance the cycle counter of `cpu` by `cycles`.
    pub fn tick(&self, cpu: CpuId, cycles: u64) {
        let mut regs = match self.online_regs(cpu) {
            Some(regs) => regs,
            None => return,
        };
        if regs.counting(CYCLE_COUNTER) {
            let (value, wrapped) = regs.cycles.overflowing_add(cycles);
            regs.cycles = value;
            if wrapped {
                regs.overflow |= CYCLE_COUNTER;
            }
        }
    }

    /// The `(slot, event)` bindings currently programmed on `cpu`.
    ///
    /// Empty for cpus outside the cluster.
    pub fn bindings(&self, cpu: CpuId) -> Vec<(Slot, EventCode)> {
        let regs = match self.regs(cpu) {
            Some(regs) => regs,
            None => return Vec::new(),
        };
        (0..regs.slot_count)
            .filter_map(|i| regs.types[usize::from(i)].map(|code| (Slot::new(i), code)))
            .collect()
    }

    /// The enabled-counter mask of `cpu`, `0` for cpus outside the cluster.
    pub fn enabled_mask(&self, cpu: CpuId) -> u32 {
        self.regs(cpu).map_or(0, |regs| regs.enabled)
    }

    /// The pending overflow flags of `cpu`, `0` for cpus outside the cluster.
    pub fn overflow_flags(&self, cpu: CpuId) -> u32 {
        self.regs(cpu).map_or(0, |regs| regs.overflow)
    }

    fn regs(&self, cpu: CpuId) -> Option<MutexGuard<'_, Registers>> {
        self.cores
            .get(cpu)
            .map(|core| core.regs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn online_regs(&self, cpu: CpuId) -> Option<MutexGuard<'_, Registers>> {
        if !self.is_online(cpu) {
            return None;
        }
        self.regs(cpu)
    }
}

impl Cluster for SimCluster {
    fn cpu_count(&self) -> usize {
        self.cores.len()
    }

    fn is_online(&self, cpu: CpuId) -> bool {
        self.cores
            .get(cpu)
            .map_or(false, |c| c.online.load(Ordering::SeqCst))
    }

    fn run_on<R, F>(&self, cpu: CpuId, action: &F) -> Option<R>
    where
        F: Fn(CpuId, &mut dyn CounterBackend) -> R + Sync,
    {
        // Holding the register lock for the whole action keeps other contexts
        // from moving the selection register underneath it.
        let mut pmu = SimPmu {
            regs: self.online_regs(cpu)?,
        };
        Some(action(cpu, &mut pmu))
    }
}

/// Register handle of one simulated core, alive only inside
/// [`Cluster::run_on`](../trait.Cluster.html#tymethod.run_on).
#[derive(Debug)]
pub struct SimPmu<'a> {
    regs: MutexGuard<'a, Registers>,
}

impl CounterBackend for SimPmu<'_> {
    fn slot_count(&self) -> u8 {
        self.regs.slot_count
    }

    fn select_and_bind(&mut self, slot: Slot, event: EventCode) {
        let i = slot.index();
        self.regs.selected = i;
        // Unimplemented counters are RAZ/WI.
        if self.regs.implemented(i) {
            self.regs.types[usize::from(i)] = Some(event);
            self.regs.counters[usize::from(i)] = 0;
        }
    }

    fn read_slot(&mut self, slot: Slot) -> u64 {
        self.regs.selected = slot.index();
        let i = self.regs.selected;
        if self.regs.implemented(i) {
            self.regs.counters[usize::from(i)]
        } else {
            0
        }
    }

    fn read_cycles(&mut self) -> u64 {
        self.regs.cycles
    }

    fn enable_mask(&mut self, mask: u32) {
        self.regs.enabled |= mask;
    }

    fn disable_mask(&mut self, mask: u32) {
        self.regs.enabled &= !mask;
    }

    fn clear_overflow(&mut self) {
        self.regs.overflow = 0;
    }

    fn reset_all(&mut self) {
        self.regs.pmu_enabled = true;
        self.regs.counters = [0; SLOTS];
        self.regs.cycles = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::run_on_all;

    const EVT: EventCode = EventCode(0x08);

    fn program_slot0(cluster: &SimCluster) {
        run_on_all(cluster, |_, pmu| {
            pmu.reset_all();
            pmu.select_and_bind(Slot::new(0), EVT);
            pmu.enable_mask(Slot::new(0).bit() | CYCLE_COUNTER);
        })
        .expect("programming failed");
    }

    #[test]
    fn test_only_enabled_bound_slots_count() {
        let cluster = SimCluster::new(1);

        // Nothing is programmed yet.
        cluster.record(0, EVT, 10);
        cluster.tick(0, 10);
        assert!(cluster.bindings(0).is_empty());

        program_slot0(&cluster);
        cluster.record(0, EVT, 3);
        cluster.record(0, EventCode(0x04), 7);
        cluster.tick(0, 100);

        let got = run_on_all(&cluster, |_, pmu| (pmu.read_slot(Slot::new(0)), pmu.read_cycles()))
            .expect("read failed");
        assert_eq!(got, vec![Some((3, 100))]);
    }

    #[test]
    fn test_disabled_counters_hold_their_value() {
        let cluster = SimCluster::new(1);
        program_slot0(&cluster);
        cluster.record(0, EVT, 5);

        run_on_all(&cluster, |_, pmu| pmu.disable_mask(!0)).expect("disable failed");
        cluster.record(0, EVT, 5);

        let got = run_on_all(&cluster, |_, pmu| pmu.read_slot(Slot::new(0))).expect("read failed");
        assert_eq!(got, vec![Some(5)]);
        assert_eq!(cluster.enabled_mask(0), 0);
    }

    #[test]
    fn test_unimplemented_slots_are_ignored() {
        let cluster = SimCluster::new(1);
        cluster.set_slot_count(0, 2);

        run_on_all(&cluster, |_, pmu| {
            pmu.select_and_bind(Slot::new(4), EVT);
        })
        .expect("bind failed");

        assert!(cluster.bindings(0).is_empty());
    }

    #[test]
    fn test_overflow_sets_flag() {
        let cluster = SimCluster::new(1);
        program_slot0(&cluster);

        cluster.record(0, EVT, u64::MAX);
        cluster.record(0, EVT, 2);
        assert_eq!(cluster.overflow_flags(0), Slot::new(0).bit());

        run_on_all(&cluster, |_, pmu| pmu.clear_overflow()).expect("clear failed");
        assert_eq!(cluster.overflow_flags(0), 0);
    }

    #[test]
    fn test_offline_core_ignores_work() {
        let cluster = SimCluster::new(2);
        program_slot0(&cluster);
        cluster.set_online(1, false);
        cluster.record(1, EVT, 9);
        cluster.set_online(1, true);

        let got = run_on_all(&cluster, |_, pmu| pmu.read_slot(Slot::new(0))).expect("read failed");
        assert_eq!(got, vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_cpus_outside_the_cluster() {
        let cluster = SimCluster::new(2);

        cluster.set_online(2, true);
        cluster.set_slot_count(7, 1);
        cluster.record(2, EVT, 1);
        cluster.tick(2, 1);

        assert!(!cluster.is_online(2));
        assert!(cluster.bindings(2).is_empty());
        assert_eq!(cluster.enabled_mask(2), 0);
        assert_eq!(cluster.overflow_flags(9), 0);
        assert_eq!(cluster.run_on(2, &|_, pmu| pmu.slot_count()), None);
    }
}
