use colored::Colorize;
use std::{
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    process::Command,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::process::{self, Signal};

/// Upper bound on a reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Tries a TCP connect to `host:port`. Any failure counts as unreachable.
///
/// `timeout` bounds the whole check, however many addresses the host resolves to.
pub fn is_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(host, port, error = %e, "could not resolve probe target");
            return false;
        }
    };

    connect_any(addrs, deadline)
}

/// Connects to each address in turn until one answers or `deadline` passes.
pub fn connect_any<I>(addrs: I, deadline: Instant) -> bool
where
    I: IntoIterator<Item = SocketAddr>,
{
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(%addr, "connect deadline passed");
            return false;
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(_stream) => return true,
            Err(e) => debug!(%addr, error = %e, "probe failed"),
        }
    }
    false
}

/// Pids from `lsof -t` output, one per line.
pub fn parse_lsof_pids(output: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for pid in output.lines().filter_map(|line| line.trim().parse::<u32>().ok()) {
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

fn listening_pids(port: u16) -> anyhow::Result<Vec<u32>> {
    let output = Command::new("lsof")
        .arg("-t")
        .arg(format!("-iTCP:{}", port))
        .arg("-sTCP:LISTEN")
        .output()?;
    // lsof exits 1 when nothing matches
    Ok(parse_lsof_pids(&String::from_utf8_lossy(&output.stdout)))
}

/// Force-kills whatever is listening on each port so tunnels can bind them.
///
/// Returns the number of processes killed.
pub fn free_ports(ports: &[u16]) -> usize {
    let own_pid = std::process::id();
    let mut killed = 0;

    for &port in ports {
        if is_port_available(port) {
            continue;
        }

        let pids = match listening_pids(port) {
            Ok(pids) => pids,
            Err(e) => {
                warn!(port, error = %e, "could not inspect port");
                eprintln!("{}", format!("⚠ Could not inspect port {}: {}", port, e).yellow());
                continue;
            }
        };

        if pids.is_empty() {
            println!("{}", format!("Port {} is busy but no listening process was found", port).dimmed());
            continue;
        }

        for pid in pids.into_iter().filter(|&pid| pid != own_pid) {
            match process::send_signal(pid, Signal::Kill) {
                Ok(()) => {
                    info!(port, pid, "freed port");
                    println!("{}", format!("Port {} freed (killed process {})", port, pid).green());
                    killed += 1;
                }
                Err(e) if process::is_already_gone(&e) => {
                    debug!(port, pid, "port holder already exited");
                }
                Err(e) => {
                    warn!(port, pid, error = %e, "failed to free port");
                    eprintln!("{}", format!("⚠ Failed to kill process {} on port {}: {}", pid, port, e).yellow());
                }
            }
        }
    }

    killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn listening_port_is_reachable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_reachable("127.0.0.1", port, PROBE_TIMEOUT));
    }

    #[test]
    fn closed_port_is_unreachable_within_bound() {
        let port = closed_port();
        let timeout = Duration::from_secs(2);
        let started = Instant::now();
        assert!(!is_reachable("127.0.0.1", port, timeout));
        assert!(started.elapsed() <= timeout + Duration::from_millis(500));
    }

    #[test]
    fn deadline_spans_every_address() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let open = listener.local_addr().unwrap();
        let closed: SocketAddr = ([127, 0, 0, 1], closed_port()).into();

        // each address costs time before it is even tried
        let slow = [closed, closed, open].into_iter().inspect(|_| std::thread::sleep(Duration::from_millis(300)));
        let timeout = Duration::from_millis(500);
        let started = Instant::now();
        assert!(!connect_any(slow, started + timeout));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn expired_deadline_attempts_nothing() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let open = listener.local_addr().unwrap();
        assert!(!connect_any([open], Instant::now()));
        assert!(connect_any([open], Instant::now() + PROBE_TIMEOUT));
    }

    #[test]
    fn unresolvable_host_is_unreachable() {
        assert!(!is_reachable("no-such-host.invalid", 22, Duration::from_secs(1)));
    }

    #[test]
    fn port_availability_tracks_listeners() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(port));
        drop(listener);
        assert!(is_port_available(port));
    }

    #[test]
    fn lsof_output_parsing() {
        assert_eq!(parse_lsof_pids("123\n456\n123\n"), vec![123, 456]);
        assert_eq!(parse_lsof_pids(""), Vec::<u32>::new());
        assert_eq!(parse_lsof_pids("junk\n 77 \n"), vec![77]);
    }

    #[test]
    fn free_ports_skips_available_ports() {
        assert_eq!(free_ports(&[closed_port()]), 0);
    }
}
