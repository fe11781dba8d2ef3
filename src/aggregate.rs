use std::ops::AddAssign;

use log::debug;

use crate::backend::CounterBackend;
use crate::cluster::{run_on_all, Cluster};
use crate::error::Error;
use crate::program::{Event, Program};
use crate::state::{CollectionState, StateMachine};

/// Every counter of one core, read in a single pass on that core.
///
/// Summed into an [`AggregateReport`] the fields hold cluster-wide totals.
#[allow(missing_docs)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub instructions: u64,
    pub l1i_references: u64,
    pub l1i_misses: u64,
    pub l1d_references: u64,
    pub l1d_misses: u64,
    pub llc_misses: u64,
    pub cycles: u64,
}

impl CounterSnapshot {
    /// Read every counter `program` owns from `pmu`.
    ///
    /// The caller must keep execution on `pmu`'s core for the whole read.
    pub fn read<B: CounterBackend + ?Sized>(program: &Program, pmu: &mut B) -> Self {
        let mut snap = CounterSnapshot::default();
        for &event in Event::ALL.iter() {
            *snap.get_mut(event) = pmu.read_slot(program.slot(event));
        }
        snap.cycles = pmu.read_cycles();
        snap
    }

    /// The value of `event`.
    pub fn get(&self, event: Event) -> u64 {
        match event {
            Event::Instructions => self.instructions,
            Event::L1iReferences => self.l1i_references,
            Event::L1iMisses => self.l1i_misses,
            Event::L1dReferences => self.l1d_references,
            Event::L1dMisses => self.l1d_misses,
            Event::LlcMisses => self.llc_misses,
        }
    }

    pub(crate) fn get_mut(&mut self, event: Event) -> &mut u64 {
        match event {
            Event::Instructions => &mut self.instructions,
            Event::L1iReferences => &mut self.l1i_references,
            Event::L1iMisses => &mut self.l1i_misses,
            Event::L1dReferences => &mut self.l1d_references,
            Event::L1dMisses => &mut self.l1d_misses,
            Event::LlcMisses => &mut self.llc_misses,
        }
    }

    /// L1 instruction cache misses per reference.
    pub fn l1i_miss_rate(&self) -> Option<f64> {
        ratio(self.l1i_misses, self.l1i_references)
    }

    /// L1 data cache misses per reference.
    pub fn l1d_miss_rate(&self) -> Option<f64> {
        ratio(self.l1d_misses, self.l1d_references)
    }

    /// Last level cache misses per L1 data cache reference.
    pub fn llc_miss_rate(&self) -> Option<f64> {
        ratio(self.llc_misses, self.l1d_references)
    }

    /// Instructions retired per cycle.
    pub fn ipc(&self) -> Option<f64> {
        ratio(self.instructions, self.cycles)
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}

impl AddAssign for CounterSnapshot {
    fn add_assign(&mut self, rhs: Self) {
        for &event in Event::ALL.iter() {
            let v = self.get_mut(event);
            *v = v.saturating_add(rhs.get(event));
        }
        self.cycles = self.cycles.saturating_add(rhs.cycles);
    }
}

/// Cluster-wide counter totals and the collection state they were read in.
///
/// Built fresh by every [`collect`] call; the `Display` implementation is the
/// text of the read interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateReport {
    /// Sum of every online core's counters.
    pub totals: CounterSnapshot,
    /// The collection state when the report was requested.
    pub state: CollectionState,
}

/// Snapshot every online core of `cluster` and sum the results.
///
/// Cores offline when the pass is dispatched, or gone offline by the time the
/// results are summed, are left out of the totals. The `state` is read before
/// the pass starts and is not captured atomically with the counters: a
/// transition racing this call may be reflected in one but not the other.
///
/// Fails only if the pass cannot be dispatched, in which case neither the
/// hardware nor the collection state has been touched.
pub fn collect<C: Cluster>(
    cluster: &C,
    program: &Program,
    state: &StateMachine,
) -> Result<AggregateReport, Error> {
    let state = state.state();
    let per_cpu = run_on_all(cluster, |_, pmu| CounterSnapshot::read(program, pmu))?;

    Ok(AggregateReport {
        totals: sum_online(cluster, &per_cpu),
        state,
    })
}

pub(crate) fn sum_online<C: Cluster>(
    cluster: &C,
    per_cpu: &[Option<CounterSnapshot>],
) -> CounterSnapshot {
    let mut total = CounterSnapshot::default();
    let mut cpus = 0;

    for (cpu, snap) in per_cpu.iter().enumerate() {
        if let Some(snap) = snap {
            if cluster.is_online(cpu) {
                total += *snap;
                cpus += 1;
            }
        }
    }

    debug!("pmu: collected counters from {} cpus", cpus);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Exhausting;
    use crate::error::ErrorKind;
    use crate::program::events;
    use crate::sim::SimCluster;
    use crate::state::Command;

    fn snap(n: u64) -> CounterSnapshot {
        CounterSnapshot {
            instructions: n,
            l1i_references: n,
            l1i_misses: n,
            l1d_references: n,
            l1d_misses: n,
            llc_misses: n,
            cycles: n,
        }
    }

    #[test]
    fn test_sum_skips_cores_gone_offline() {
        let cluster = SimCluster::new(3);
        let per_cpu = [Some(snap(1)), Some(snap(10)), Some(snap(100))];

        // cpu1 reported, then went offline before summation.
        cluster.set_online(1, false);

        assert_eq!(sum_online(&cluster, &per_cpu), snap(101));
    }

    #[test]
    fn test_sum_skips_unreported_cores() {
        let cluster = SimCluster::new(2);
        assert_eq!(sum_online(&cluster, &[None, Some(snap(7))]), snap(7));
    }

    #[test]
    fn test_collect_sums_each_event_from_its_own_slot() {
        let cluster = SimCluster::new(2);
        let program = Program::CORTEX_A72;
        let sm = StateMachine::new();
        sm.apply(&cluster, &program, Command::Start).unwrap();

        for cpu in 0..2 {
            cluster.record(cpu, events::INST_RETIRED, 100);
            cluster.record(cpu, events::L1I_CACHE, 20);
            cluster.record(cpu, events::L1I_CACHE_REFILL, 2);
            cluster.record(cpu, events::L1D_CACHE, 40);
            cluster.record(cpu, events::L1D_CACHE_REFILL, 4);
            cluster.record(cpu, events::L2D_CACHE_REFILL, 1);
            cluster.tick(cpu, 500);
        }

        let report = collect(&cluster, &program, &sm).unwrap();
        assert_eq!(report.state, CollectionState::Running);
        assert_eq!(
            report.totals,
            CounterSnapshot {
                instructions: 200,
                l1i_references: 40,
                l1i_misses: 4,
                l1d_references: 80,
                l1d_misses: 8,
                llc_misses: 2,
                cycles: 1000,
            }
        );
    }

    #[test]
    fn test_failed_collect_leaves_state_and_counters() {
        let cluster = Exhausting::new(SimCluster::new(2));
        let program = Program::CORTEX_A72;
        let sm = StateMachine::new();
        sm.apply(&cluster, &program, Command::Start).unwrap();
        cluster.inner.record(0, events::INST_RETIRED, 9);

        cluster.fail_next(1);
        let err = collect(&cluster, &program, &sm).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ResourceExhaustion);
        assert_eq!(sm.state(), CollectionState::Running);

        let report = collect(&cluster, &program, &sm).unwrap();
        assert_eq!(report.totals.instructions, 9);
    }

    #[test]
    fn test_rates() {
        let s = CounterSnapshot {
            instructions: 300,
            l1d_references: 100,
            l1d_misses: 5,
            llc_misses: 1,
            cycles: 150,
            ..CounterSnapshot::default()
        };

        assert_eq!(s.l1d_miss_rate(), Some(0.05));
        assert_eq!(s.llc_miss_rate(), Some(0.01));
        assert_eq!(s.ipc(), Some(2.0));
        assert_eq!(s.l1i_miss_rate(), None);
    }

    #[test]
    fn test_add_saturates() {
        let mut s = snap(u64::MAX - 1);
        s += snap(5);
        assert_eq!(s, snap(u64::MAX));
    }
}
