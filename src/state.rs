use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{info, warn};

use crate::cluster::{run_on_all, Cluster};
use crate::error::{new_error, Error, ErrorKind};
use crate::program::Program;

/// Whether the cluster's counters are currently counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionState {
    /// Counters are disabled on every core; their values can still be read.
    Stopped = 0,
    /// Counters are enabled on every core.
    Running = 1,
}

impl CollectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CollectionState::Running,
            _ => CollectionState::Stopped,
        }
    }
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollectionState::Running => "running",
            CollectionState::Stopped => "stopped",
        })
    }
}

impl FromStr for CollectionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(CollectionState::Running),
            "stopped" => Ok(CollectionState::Stopped),
            _ => Err(new_error(ErrorKind::Parse)),
        }
    }
}

/// A state transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reprogram and zero every core, then count. Also used to reset a running
    /// cluster.
    Start,

    /// Stop counting on every core, keeping the counts readable.
    Stop,
}

impl FromStr for Command {
    type Err = Error;

    /// Parse a single control word.
    ///
    /// ```
    /// use pmu::Command;
    ///
    /// assert_eq!("reset".parse::<Command>()?, Command::Start);
    /// assert_eq!("0".parse::<Command>()?, Command::Stop);
    /// assert!("Start".parse::<Command>().is_err());
    /// #
    /// # Ok::<(), pmu::error::Error>(())
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" | "1" | "reset" => Ok(Command::Start),
            "stop" | "0" | "pause" => Ok(Command::Stop),
            _ => Err(new_error(ErrorKind::InvalidCommand)),
        }
    }
}

/// Serialises start/stop transitions of a cluster and publishes the resulting
/// [`CollectionState`].
///
/// Transitions hold an internal lock from dispatch to state update, so two
/// transitions never interleave. Reading the state never takes the lock.
#[derive(Debug)]
pub struct StateMachine {
    state: AtomicU8,
    transition: Mutex<()>,
}

impl StateMachine {
    /// A state machine in the [`CollectionState::Stopped`] state.
    pub fn new() -> Self {
        StateMachine {
            state: AtomicU8::new(CollectionState::Stopped as u8),
            transition: Mutex::new(()),
        }
    }

    /// The current state.
    ///
    /// May race with a transition in flight, in which case either the old or
    /// the new state is returned.
    pub fn state(&self) -> CollectionState {
        CollectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply `cmd` to every core of `cluster` and record the new state.
    ///
    /// `Start` is valid from either state and always resets the counters.
    /// If the cluster-wide dispatch fails the recorded state is unchanged,
    /// except that a failed `Start` stops every core it can reach so no core
    /// is left counting alone; once that succeeds the state is `Stopped`.
    pub fn apply<C: Cluster>(
        &self,
        cluster: &C,
        program: &Program,
        cmd: Command,
    ) -> Result<CollectionState, Error> {
        let _guard = self
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let next = match cmd {
            Command::Start => {
                info!("pmu: start/reset counters");
                if let Err(e) = run_on_all(cluster, |_, pmu| program.establish(pmu)) {
                    self.abort_start(cluster, program);
                    return Err(e);
                }
                CollectionState::Running
            }
            Command::Stop => {
                info!("pmu: stop counters");
                run_on_all(cluster, |_, pmu| program.teardown(pmu))?;
                CollectionState::Stopped
            }
        };

        self.state.store(next as u8, Ordering::Release);
        Ok(next)
    }

    // Some cores may have been started before the dispatch failed.
    fn abort_start<C: Cluster>(&self, cluster: &C, program: &Program) {
        match run_on_all(cluster, |_, pmu| program.teardown(pmu)) {
            Ok(_) => self
                .state
                .store(CollectionState::Stopped as u8, Ordering::Release),
            Err(e) => warn!("pmu: failed to stop counters after a failed start: {}", e),
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine::new()
    }
}
