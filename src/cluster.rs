use std::collections::TryReserveError;
use std::panic;
use std::thread;

use log::trace;

use crate::backend::CounterBackend;
use crate::error::{new_error_with_cause, Error, ErrorKind};

/// Logical CPU number.
pub type CpuId = usize;

/// The set of cores a [`Monitor`] drives, and the means to execute code on
/// each of them.
///
/// [`Monitor`]: struct.Monitor.html
///
/// Actions receive the core's [`CounterBackend`] as a borrowed handle that
/// implementations only construct while executing on that core, so register
/// state can never be reached from another core.
///
/// [`CounterBackend`]: trait.CounterBackend.html
pub trait Cluster: Sync {
    /// Number of CPU ids the system may use, online or not.
    fn cpu_count(&self) -> usize;

    /// Whether `cpu` can currently run code.
    fn is_online(&self, cpu: CpuId) -> bool;

    /// Run `action` on `cpu` with migration to other cores prevented for its
    /// whole duration.
    ///
    /// Returns `None` without running the action if the core is offline.
    fn run_on<R, F>(&self, cpu: CpuId, action: &F) -> Option<R>
    where
        F: Fn(CpuId, &mut dyn CounterBackend) -> R + Sync;
}

impl<C: Cluster> Cluster for &C {
    fn cpu_count(&self) -> usize {
        (**self).cpu_count()
    }

    fn is_online(&self, cpu: CpuId) -> bool {
        (**self).is_online(cpu)
    }

    fn run_on<R, F>(&self, cpu: CpuId, action: &F) -> Option<R>
    where
        F: Fn(CpuId, &mut dyn CounterBackend) -> R + Sync,
    {
        (**self).run_on(cpu, action)
    }
}

/// Run `action` once on every online core of `cluster` and wait for all of
/// them to complete.
///
/// The returned vector is indexed by [`CpuId`] and holds `None` for every core
/// that was offline at dispatch time. When this returns, the effects of every
/// invocation are visible to the caller.
///
/// If a worker cannot be spawned, the workers already dispatched are still
/// joined before [`ErrorKind::ResourceExhaustion`] is returned.
pub fn run_on_all<C, R, F>(cluster: &C, action: F) -> Result<Vec<Option<R>>, Error>
where
    C: Cluster,
    R: Send,
    F: Fn(CpuId, &mut dyn CounterBackend) -> R + Sync,
{
    let cpus = cluster.cpu_count();

    let mut results = Vec::new();
    results.try_reserve_exact(cpus).map_err(exhausted)?;

    let action = &action;
    thread::scope(|s| {
        let mut workers = Vec::new();
        workers.try_reserve_exact(cpus).map_err(exhausted)?;

        let mut spawn_err = None;
        for cpu in 0..cpus {
            if !cluster.is_online(cpu) {
                trace!("pmu: cpu{} offline, skipping", cpu);
                workers.push(None);
                continue;
            }

            let spawned = thread::Builder::new()
                .name(format!("pmu-cpu{}", cpu))
                .spawn_scoped(s, move || cluster.run_on(cpu, action));

            match spawned {
                Ok(handle) => workers.push(Some(handle)),
                Err(e) => {
                    spawn_err = Some(e);
                    break;
                }
            }
        }

        for worker in workers {
            let result = match worker {
                Some(handle) => handle
                    .join()
                    .unwrap_or_else(|payload| panic::resume_unwind(payload)),
                None => None,
            };
            results.push(result);
        }

        match spawn_err {
            Some(e) => Err(new_error_with_cause(ErrorKind::ResourceExhaustion, e)),
            None => Ok(()),
        }
    })?;

    Ok(results)
}

fn exhausted(e: TryReserveError) -> Error {
    new_error_with_cause(ErrorKind::ResourceExhaustion, e)
}

/// Wraps a cluster so the next `n` passes over it cannot be dispatched.
#[cfg(test)]
pub(crate) struct Exhausting<C> {
    pub(crate) inner: C,
    failures: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl<C: Cluster> Exhausting<C> {
    pub(crate) fn new(inner: C) -> Self {
        Exhausting {
            inner,
            failures: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_next(&self, n: usize) {
        self.failures.store(n, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl<C: Cluster> Cluster for Exhausting<C> {
    fn cpu_count(&self) -> usize {
        use std::sync::atomic::Ordering;

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            // Too many cpus to allocate a result slot for.
            usize::MAX / 2
        } else {
            self.inner.cpu_count()
        }
    }

    fn is_online(&self, cpu: CpuId) -> bool {
        self.inner.is_online(cpu)
    }

    fn run_on<R, F>(&self, cpu: CpuId, action: &F) -> Option<R>
    where
        F: Fn(CpuId, &mut dyn CounterBackend) -> R + Sync,
    {
        self.inner.run_on(cpu, action)
    }
}
