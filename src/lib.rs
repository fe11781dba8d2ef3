#![warn(missing_docs)]

//! `pmu-rs` turns the per-core Performance Monitor Unit counters of an ARMv8
//! system into one cluster-wide, start/stop controllable feed of event counts.
//!
//! A fixed set of events (instructions retired, L1 instruction and data cache
//! accesses and refills, last level cache refills) plus the cycle counter is
//! programmed identically on every core. Starting, stopping and reading are
//! always applied to every online core at once, and reads are summed into a
//! single [`AggregateReport`], so a workload can be measured regardless of
//! which cores it ran on:
//!
//! ```no_run
//! use pmu::*;
//!
//! let monitor = MonitorConfig::default().load(HostCluster::claim()?)?;
//!
//! let data: Vec<u32> = (0..1 << 24).collect();
//! let (_, report) = monitor.measure(|| data.iter().map(|&v| u64::from(v)).sum::<u64>())?;
//!
//! print!("{}", report);
//! println!("l1d miss rate: {:?}", report.totals.l1d_miss_rate());
//! #
//! # Ok::<(), pmu::error::Error>(())
//! ```
//!
//! Per-core registers are only ever touched from code executing on that core:
//! a [`Cluster`] hands each action a [`CounterBackend`] handle that only exists
//! while running there. [`HostCluster`] does this with pinned threads on
//! aarch64 Linux (user PMU access must be enabled by the kernel), and
//! [`SimCluster`] models the registers in memory.
//!
//! The [`Monitor`] also exposes the text surfaces external tools use: a
//! `key: value` report ([`Monitor::read_stats`]) and a control interface
//! accepting `start`/`1`/`reset` and `stop`/`0`/`pause`
//! ([`Monitor::write_control`]).

#[macro_use]
extern crate lazy_static;
extern crate libc;
#[cfg(target_arch = "aarch64")]
extern crate pmu_sys;

pub mod error;

#[cfg(not(target_arch = "aarch64"))]
mod stubs;

mod backend;
pub use self::backend::{CounterBackend, EventCode, Slot, CYCLE_COUNTER};

mod program;
pub use self::program::{events, Event, Program};

mod cluster;
pub use self::cluster::{run_on_all, Cluster, CpuId};

#[cfg(target_os = "linux")]
mod host;
#[cfg(target_os = "linux")]
pub use self::host::{HostCluster, LocalPmu};

pub mod sim;
pub use self::sim::SimCluster;

mod state;
pub use self::state::{CollectionState, Command, StateMachine};

mod aggregate;
pub use self::aggregate::{collect, AggregateReport, CounterSnapshot};

mod report;
pub use self::report::{parse_command, COMMAND_BUFFER};

mod monitor;
pub use self::monitor::{Monitor, MonitorConfig, Phase};
