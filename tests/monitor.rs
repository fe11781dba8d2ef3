use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use pmu::error::ErrorKind;
use pmu::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn load(cpus: usize) -> Monitor<SimCluster> {
    init_logging();
    MonitorConfig::default()
        .load(SimCluster::new(cpus))
        .expect("failed to load monitor")
}

fn state_line(monitor: &Monitor<SimCluster>) -> String {
    let stats = monitor.read_stats().expect("failed to read stats");
    stats.lines().last().expect("empty report").to_string()
}

/// Instructions, L1D accesses and cycles for `count` units of work on `cpu`.
fn work(cluster: &SimCluster, cpu: CpuId, count: u64) {
    cluster.record(cpu, events::INST_RETIRED, count);
    cluster.record(cpu, events::L1D_CACHE, count);
    cluster.tick(cpu, count * 2);
}

fn assert_non_decreasing(before: &CounterSnapshot, after: &CounterSnapshot) {
    for &event in Event::ALL.iter() {
        assert!(
            after.get(event) >= before.get(event),
            "{} went backwards: {} -> {}",
            event.key(),
            before.get(event),
            after.get(event)
        );
    }
    assert!(after.cycles >= before.cycles, "cycles went backwards");
}

#[test]
fn test_state_follows_commands() {
    let monitor = load(4);
    assert_eq!(state_line(&monitor), "state: running");

    let sequence = [
        ("stop\n", "state: stopped"),
        ("stop\n", "state: stopped"),
        ("1\n", "state: running"),
        ("reset\n", "state: running"),
        ("pause\n", "state: stopped"),
        ("start\n", "state: running"),
        ("0\n", "state: stopped"),
    ];

    for &(cmd, want) in sequence.iter() {
        monitor
            .write_control(cmd.as_bytes())
            .expect("control write failed");
        assert_eq!(state_line(&monitor), want);
    }
}

#[test]
fn test_invalid_command_keeps_state() {
    let monitor = load(2);
    monitor.stop().expect("failed to stop");

    let before = monitor.collect().expect("collect failed");
    let err = monitor
        .write_control(b"frobnicate\n")
        .expect_err("expected command to be rejected");

    assert_eq!(err.kind(), &ErrorKind::InvalidCommand);
    assert_eq!(monitor.state(), CollectionState::Stopped);
    assert_eq!(state_line(&monitor), "state: stopped");
    assert_eq!(monitor.collect().expect("collect failed"), before);
}

#[test]
fn test_restart_discards_previous_counts() {
    let monitor = load(2);
    let cluster = monitor.cluster();

    work(cluster, 0, 1_000);
    work(cluster, 1, 1_000);

    monitor.write_control(b"start\n").expect("restart failed");
    work(cluster, 1, 7);

    let report = monitor.collect().expect("collect failed");
    assert_eq!(report.totals.instructions, 7);
    assert_eq!(report.totals.l1d_references, 7);
    assert_eq!(report.totals.cycles, 14);
}

#[test]
fn test_counts_never_decrease_without_start() {
    let monitor = load(3);
    let cluster = monitor.cluster();

    let mut last = monitor.collect().expect("collect failed").totals;
    for i in 0..10 {
        work(cluster, i % 3, 100);
        if i == 5 {
            monitor.stop().expect("failed to stop");
        }

        let now = monitor.collect().expect("collect failed").totals;
        assert_non_decreasing(&last, &now);
        last = now;
    }

    // Stopped counters hold their value.
    work(cluster, 0, 100);
    assert_eq!(monitor.collect().expect("collect failed").totals, last);
}

#[test]
fn test_identical_program_on_every_core() {
    let monitor = load(4);

    let want: Vec<(Slot, EventCode)> = monitor.program().bindings().collect();
    assert_eq!(want.len(), Event::ALL.len());

    for cpu in 0..4 {
        assert_eq!(monitor.cluster().bindings(cpu), want, "cpu{} differs", cpu);
        assert_eq!(monitor.cluster().enabled_mask(cpu), monitor.program().mask());
    }
}

#[test]
fn test_offline_core_is_excluded() {
    let monitor = load(4);
    let cluster = monitor.cluster();

    for cpu in 0..4 {
        work(cluster, cpu, 10 * (cpu as u64 + 1));
    }

    cluster.set_online(2, false);
    let report = monitor.collect().expect("collect must not fail for offline cores");

    // cpu0 + cpu1 + cpu3
    assert_eq!(report.totals.instructions, 10 + 20 + 40);
    assert_eq!(report.totals.cycles, 2 * (10 + 20 + 40));
}

#[test]
fn test_core_offline_during_start_is_not_programmed() {
    let monitor = load(2);
    let cluster = monitor.cluster();

    cluster.set_online(1, false);
    monitor.start().expect("start must not fail for offline cores");
    cluster.set_online(1, true);

    // cpu1 still runs the program from load time, untouched by the restart.
    work(cluster, 0, 5);
    work(cluster, 1, 5);
    assert_eq!(monitor.collect().expect("collect failed").totals.instructions, 10);
}

#[test]
fn test_report_text_round_trips() {
    let monitor = load(2);
    work(monitor.cluster(), 0, 321);

    let text = monitor.read_stats().expect("failed to read stats");
    let keys: Vec<&str> = text
        .lines()
        .map(|l| l.split(':').next().expect("no key"))
        .collect();
    assert_eq!(
        keys,
        vec![
            "instructions",
            "l1i_references",
            "l1i_misses",
            "l1d_references",
            "l1d_misses",
            "llc_misses",
            "cycles",
            "state",
        ]
    );

    let parsed: AggregateReport = text.parse().expect("failed to parse report");
    assert_eq!(parsed.totals.instructions, 321);
    assert_eq!(parsed.state, CollectionState::Running);
}

#[test]
fn test_unload_stops_every_core() {
    let cluster = SimCluster::new(3);
    let mask = {
        let monitor = MonitorConfig::default()
            .load(&cluster)
            .expect("failed to load monitor");
        monitor.program().mask()
    };

    for cpu in 0..3 {
        assert_eq!(cluster.enabled_mask(cpu) & mask, 0, "cpu{} still counting", cpu);
    }
}

#[test]
fn test_reads_interleave_with_transitions() {
    let monitor = load(4);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let (monitor, done) = (&monitor, &done);

        s.spawn(move || {
            for i in 0..50 {
                let cmd = if i % 2 == 0 { "stop" } else { "start" };
                monitor
                    .write_control(cmd.as_bytes())
                    .expect("control write failed");
            }
            done.store(true, Ordering::SeqCst);
        });

        s.spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let stats = monitor.read_stats().expect("failed to read stats");
                stats.parse::<AggregateReport>().expect("torn report");
            }
        });
    });

    // 50 commands ending with "start".
    assert_eq!(monitor.state(), CollectionState::Running);
}

/// A direct mapped 32KiB L1 data cache with 64 byte lines, feeding a
/// simulated core the events a load from `addr` causes.
struct L1d<'a> {
    cluster: &'a SimCluster,
    cpu: CpuId,
    tags: Vec<Option<usize>>,
}

impl<'a> L1d<'a> {
    const LINE: usize = 64;
    const LINES: usize = 32 * 1024 / 64;

    fn new(cluster: &'a SimCluster, cpu: CpuId) -> Self {
        L1d {
            cluster,
            cpu,
            tags: vec![None; Self::LINES],
        }
    }

    fn load(&mut self, addr: usize) {
        let line = addr / Self::LINE;
        let set = line % Self::LINES;

        // load + add + loop branch
        self.cluster.record(self.cpu, events::INST_RETIRED, 3);
        self.cluster.record(self.cpu, events::L1D_CACHE, 1);

        if self.tags[set] == Some(line) {
            self.cluster.tick(self.cpu, 1);
        } else {
            self.tags[set] = Some(line);
            self.cluster.record(self.cpu, events::L1D_CACHE_REFILL, 1);
            self.cluster.tick(self.cpu, 20);
        }
    }
}

#[test]
fn test_sequential_scan_misses_less_than_random_scan() {
    const ELEMS: usize = 1 << 20;
    const SIZE: usize = std::mem::size_of::<u32>();

    let monitor = MonitorConfig::default()
        .start_on_load(false)
        .load(SimCluster::new(2))
        .expect("failed to load monitor");
    let cluster = monitor.cluster();

    // Programmed at load, but idle until the first phase.
    assert_eq!(monitor.state(), CollectionState::Stopped);
    assert_eq!(cluster.bindings(1).len(), Event::ALL.len());
    assert_eq!(cluster.enabled_mask(1), 0);

    let (_, seq) = monitor
        .measure(|| {
            let mut cache = L1d::new(cluster, 0);
            for i in 0..ELEMS {
                cache.load(i * SIZE);
            }
        })
        .expect("sequential phase failed");

    let (_, rand) = monitor
        .measure(|| {
            let mut cache = L1d::new(cluster, 1);
            let mut x: u64 = 0x2545_f491_4f6c_dd1d;
            for _ in 0..ELEMS {
                // xorshift64
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                cache.load((x as usize % ELEMS) * SIZE);
            }
        })
        .expect("random phase failed");

    assert_eq!(seq.state, CollectionState::Stopped);
    assert!(seq.totals.instructions >= ELEMS as u64);
    assert!(rand.totals.instructions >= ELEMS as u64);

    let seq_rate = seq.totals.l1d_miss_rate().expect("no l1d references");
    assert!(seq_rate < 0.1, "sequential miss rate {}", seq_rate);
    assert!(
        rand.totals.l1d_misses > 4 * seq.totals.l1d_misses,
        "random {} vs sequential {}",
        rand.totals.l1d_misses,
        seq.totals.l1d_misses
    );
}
