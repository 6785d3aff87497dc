use std::{
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::process::{self, Signal};
use crate::registry::{Registry, TunnelHandle};

/// How long a terminated tunnel gets before it is force-killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

const POLL_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Processes sent a termination request.
    pub signalled: usize,
    /// Processes still running after the grace period and killed.
    pub forced: usize,
    /// Entries whose process had already exited.
    pub already_exited: usize,
}

/// Terminates every tracked tunnel once and empties the registry.
///
/// Entries are drained under the lock, so a second call (or a concurrent
/// one from the signal path) finds nothing left to signal. A concurrent call
/// blocks until the sweep in flight has killed whatever outlived the grace
/// period.
pub fn shutdown(registry: &Registry, grace: Duration) -> ShutdownReport {
    let _sweep = registry.sweep_lock();
    let mut report = ShutdownReport::default();
    let mut pending = Vec::new();

    for (id, mut handle) in registry.drain() {
        if !handle.is_running() {
            report.already_exited += 1;
            continue;
        }
        match process::send_signal(handle.pid(), Signal::Term) {
            Ok(()) => {
                info!(tunnel = %handle.name(), id, pid = handle.pid(), "terminating tunnel");
                report.signalled += 1;
            }
            Err(e) if process::is_already_gone(&e) => report.already_exited += 1,
            Err(e) => warn!(tunnel = %handle.name(), pid = handle.pid(), error = %e, "failed to terminate tunnel"),
        }
        pending.push(handle);
    }

    report.forced = await_exit(pending, grace);
    if report != ShutdownReport::default() {
        info!(
            signalled = report.signalled,
            forced = report.forced,
            already_exited = report.already_exited,
            "shutdown sweep finished"
        );
    }
    report
}

/// Waits up to `grace` for the handles to exit, then kills the rest.
///
/// Returns how many had to be killed.
fn await_exit(mut pending: Vec<TunnelHandle>, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    loop {
        pending.retain_mut(TunnelHandle::is_running);
        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(POLL_STEP);
    }

    let forced = pending.len();
    for handle in pending {
        warn!(tunnel = %handle.name(), pid = handle.pid(), "tunnel ignored termination, killing");
        let mut child = handle.into_child();
        if let Err(e) = child.kill() {
            debug!(error = %e, "kill failed");
        }
        let _ = child.wait();
    }
    forced
}

/// Finishes an already-signalled handle off the caller's thread.
pub fn retire(handle: TunnelHandle) {
    let spawned = thread::Builder::new()
        .name("tunnel-reaper".into())
        .spawn(move || {
            await_exit(vec![handle], SHUTDOWN_GRACE);
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not spawn reaper thread");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    fn sleeper(name: &str) -> TunnelHandle {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        TunnelHandle::new(name, child, vec![])
    }

    #[test]
    fn second_sweep_signals_nothing() {
        let registry = Registry::new();
        registry.register(0, sleeper("a"));
        registry.register(1, sleeper("b"));

        let first = shutdown(&registry, SHUTDOWN_GRACE);
        assert_eq!(first.signalled, 2);
        assert_eq!(first.forced, 0);
        assert!(registry.is_empty());

        let second = shutdown(&registry, SHUTDOWN_GRACE);
        assert_eq!(second, ShutdownReport::default());
    }

    #[test]
    fn exited_entries_are_not_signalled() {
        let registry = Registry::new();
        let child = Command::new("true").spawn().unwrap();
        registry.register(0, TunnelHandle::new("gone", child, vec![]));
        thread::sleep(Duration::from_millis(200));

        let report = shutdown(&registry, SHUTDOWN_GRACE);
        assert_eq!(report.signalled, 0);
        assert_eq!(report.already_exited, 1);
    }

    #[test]
    fn stubborn_process_is_force_killed() {
        let registry = Registry::new();
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        registry.register(0, TunnelHandle::new("stubborn", child, vec![]));
        // let the shell install its trap
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let report = shutdown(&registry, Duration::from_millis(300));
        assert_eq!(report.signalled, 1);
        assert_eq!(report.forced, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn concurrent_sweep_waits_for_escalation() {
        let registry = Registry::new();
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        let pid = child.id();
        registry.register(0, TunnelHandle::new("stubborn", child, vec![]));
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let first = {
            let registry = registry.clone();
            thread::spawn(move || shutdown(&registry, Duration::from_millis(400)))
        };
        thread::sleep(Duration::from_millis(50));

        let second = shutdown(&registry, Duration::from_millis(400));
        assert_eq!(second, ShutdownReport::default());
        assert!(started.elapsed() >= Duration::from_millis(350));
        // the stubborn process is gone by the time the second sweep returns
        let after = process::send_signal(pid, Signal::Term);
        assert!(after.is_err_and(|e| process::is_already_gone(&e)));

        let first = first.join().unwrap();
        assert_eq!(first.signalled, 1);
        assert_eq!(first.forced, 1);
    }
}
