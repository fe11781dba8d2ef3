use std::fmt;

use log::{info, warn};

use crate::aggregate::{self, AggregateReport};
use crate::cluster::{run_on_all, Cluster};
use crate::error::{new_error, Error, ErrorKind};
use crate::program::Program;
use crate::report::{parse_command, COMMAND_BUFFER};
use crate::state::{CollectionState, Command, StateMachine};

/// Configure how a [`Monitor`] is loaded.
///
/// Unless specified, the control interface accepts up to 15 bytes of command
/// text and counting starts as soon as the monitor is loaded.
///
/// ```no_run
/// # use pmu::*;
/// let monitor = MonitorConfig::default()
///     .start_on_load(false)
///     .load(HostCluster::claim()?)?;
///
/// monitor.write_control(b"start\n")?;
/// print!("{}", monitor.read_stats()?);
/// #
/// # Ok::<(), pmu::error::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    command_buffer: usize,
    start_on_load: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            command_buffer: COMMAND_BUFFER,
            start_on_load: true,
        }
    }
}

impl MonitorConfig {
    /// Size of the control command buffer in bytes, including room for a
    /// terminator. Longer control writes are truncated to `bytes - 1`.
    ///
    /// Must be at least 2.
    pub fn command_buffer(self, bytes: usize) -> Self {
        Self {
            command_buffer: bytes,
            ..self
        }
    }

    /// Whether the counters are left running once loading completes.
    ///
    /// Loading always programs and zeroes every core. When `false` the
    /// counters are stopped again straight away, so the monitor starts out
    /// [`CollectionState::Stopped`] reading zeros until the first `start`.
    pub fn start_on_load(self, start: bool) -> Self {
        Self {
            start_on_load: start,
            ..self
        }
    }

    /// Validate the counter program against every online core of `cluster`
    /// and bring up a [`Monitor`] driving it.
    ///
    /// If starting the counters fails, every core is stopped again before the
    /// error is returned.
    pub fn load<C: Cluster>(&self, cluster: C) -> Result<Monitor<C>, Error> {
        if self.command_buffer < 2 {
            return Err(new_error(ErrorKind::InvalidConfig));
        }

        let program = Program::default();

        // Every core must hold the whole program, or per-core values would not
        // be comparable.
        let slots = run_on_all(&cluster, |_, pmu| pmu.slot_count())?;
        for (cpu, n) in slots.iter().enumerate() {
            if let Some(n) = *n {
                if let Err(e) = program.validate(n) {
                    warn!(
                        "pmu: cpu{} implements {} event counters, {} needed",
                        cpu,
                        n,
                        program.required_slots()
                    );
                    return Err(e);
                }
            }
        }

        info!("pmu: programming counters on {} cpus", cluster.cpu_count());

        let monitor = Monitor {
            cluster,
            program,
            state: StateMachine::new(),
            command_buffer: self.command_buffer,
        };

        // Dropping the monitor on failure stops every core.
        monitor.start()?;
        if !self.start_on_load {
            monitor.stop()?;
        }

        Ok(monitor)
    }
}

/// Cluster-wide control of the PMU counters and the read/control surfaces
/// over them.
///
/// Created with [`MonitorConfig::load`]. Dropping the monitor stops the
/// counters on every core.
#[derive(Debug)]
pub struct Monitor<C: Cluster> {
    cluster: C,
    program: Program,
    state: StateMachine,
    command_buffer: usize,
}

impl<C: Cluster> Monitor<C> {
    /// The current collection state.
    pub fn state(&self) -> CollectionState {
        self.state.state()
    }

    /// Apply `cmd` to every core.
    pub fn apply(&self, cmd: Command) -> Result<CollectionState, Error> {
        self.state.apply(&self.cluster, &self.program, cmd)
    }

    /// Reset every counter on every core to zero and start counting.
    ///
    /// Calling this while already running discards the counts so far.
    pub fn start(&self) -> Result<(), Error> {
        self.apply(Command::Start).map(|_| ())
    }

    /// Stop counting on every core. Counts remain readable.
    pub fn stop(&self) -> Result<(), Error> {
        self.apply(Command::Stop).map(|_| ())
    }

    /// Read and sum the counters of every online core.
    pub fn collect(&self) -> Result<AggregateReport, Error> {
        aggregate::collect(&self.cluster, &self.program, &self.state)
    }

    /// The read interface: a freshly collected report as text.
    pub fn read_stats(&self) -> Result<String, Error> {
        Ok(self.collect()?.to_string())
    }

    /// The control interface: apply the command written in `input`.
    ///
    /// Returns the number of bytes consumed, which is less than
    /// `input.len()` when the input did not fit the command buffer.
    /// Unrecognised text fails with [`ErrorKind::InvalidCommand`] and leaves
    /// the state unchanged.
    ///
    /// [`ErrorKind::InvalidCommand`]: error/enum.ErrorKind.html#variant.InvalidCommand
    pub fn write_control(&self, input: &[u8]) -> Result<usize, Error> {
        let consumed = input.len().min(self.command_buffer - 1);

        let cmd = parse_command(input, self.command_buffer).map_err(|e| {
            warn!(
                "pmu: unknown control command: {:?}",
                String::from_utf8_lossy(&input[..consumed])
            );
            e
        })?;

        self.apply(cmd)?;
        Ok(consumed)
    }

    /// Start counting a new phase of work.
    ///
    /// The counters stop when the returned [`Phase`] is finished or dropped.
    #[must_use = "counting stops when the phase is dropped"]
    pub fn phase(&self) -> Result<Phase<'_, C>, Error> {
        self.start()?;
        Ok(Phase {
            monitor: self,
            finished: false,
        })
    }

    /// Count the events caused while running `f`.
    ///
    /// ```no_run
    /// # use pmu::*;
    /// let monitor = MonitorConfig::default().load(HostCluster::claim()?)?;
    /// let data: Vec<u64> = (0..1 << 20).collect();
    ///
    /// let (sum, report) = monitor.measure(|| data.iter().sum::<u64>())?;
    /// println!("sum {} took {} cycles", sum, report.totals.cycles);
    /// #
    /// # Ok::<(), pmu::error::Error>(())
    /// ```
    pub fn measure<T, F: FnOnce() -> T>(&self, f: F) -> Result<(T, AggregateReport), Error> {
        let phase = self.phase()?;
        let out = f();
        Ok((out, phase.finish()?))
    }

    /// The cluster this monitor drives.
    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// The counter program established on every core.
    pub fn program(&self) -> &Program {
        &self.program
    }
}

impl<C: Cluster> Drop for Monitor<C> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("pmu: failed to stop counters: {}", e);
        }
        info!("pmu: monitor unloaded");
    }
}

/// A running measurement phase.
///
/// Dropping this handle stops the counters on every core.
pub struct Phase<'a, C: Cluster> {
    monitor: &'a Monitor<C>,
    finished: bool,
}

impl<'a, C: Cluster> Phase<'a, C> {
    /// Read the counts accumulated so far, without stopping.
    pub fn read(&self) -> Result<AggregateReport, Error> {
        self.monitor.collect()
    }

    /// Stop counting and read the final counts of this phase.
    pub fn finish(mut self) -> Result<AggregateReport, Error> {
        self.finished = true;
        self.monitor.stop()?;
        self.monitor.collect()
    }
}

impl<'a, C: Cluster> fmt::Display for Phase<'a, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.read() {
            Ok(report) => write!(f, "{}", report),
            Err(e) => write!(f, "error: {}", e),
        }
    }
}

impl<'a, C: Cluster> Drop for Phase<'a, C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.monitor.stop() {
            warn!("pmu: failed to stop counters: {}", e);
        }
    }
}
