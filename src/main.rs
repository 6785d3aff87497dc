use std::{io, path::PathBuf, time::Duration};
use clap_complete::{generate, Shell};
use clap::{Parser, Subcommand, CommandFactory};
use colored::Colorize;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use portdeck::config::{self, Config};
use portdeck::menu::{self, render::DEFAULT_PORTS_PER_LINE, Menu};
use portdeck::registry::Registry;
use portdeck::shutdown::{self, ShutdownReport, SHUTDOWN_GRACE};
use portdeck::{logging, monitor, port};

#[derive(Parser)]
#[command(name = "portdeck")]
#[command(version, about = "Terminal dashboard for SSH tunnels and editor projects")]
struct Cli {
    /// Path to a configuration file (YAML)
    ///
    /// Defaults to the first of:
    ///   <config dir>/portdeck/portdeck.yml
    ///   ~/.portdeck.yml
    ///   ./portdeck.yml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ports listed per line under a connected tunnel
    #[arg(long, default_value_t = DEFAULT_PORTS_PER_LINE)]
    ports_per_line: usize,

    /// Leave processes already listening on configured ports alone
    #[arg(long)]
    keep_ports: bool,

    /// Log file (defaults to <cache dir>/portdeck/portdeck.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// More log detail (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        generate_completions(shell);
        return Ok(());
    }

    if cfg!(not(unix)) {
        anyhow::bail!("portdeck is not supported on this platform. Please use Linux or macOS.");
    }

    if let Err(e) = logging::init(cli.log_file.as_deref(), cli.verbose) {
        eprintln!("{}", format!("⚠ Logging disabled: {:#}", e).yellow());
    }

    let config_path = config::resolve_path(cli.config.as_deref())?;
    let config = Config::load(&config_path)?;
    info!(
        path = %config_path.display(),
        tunnels = config.tunnels().len(),
        projects = config.projects().len(),
        "configuration loaded"
    );

    if !cli.keep_ports {
        port::free_ports(&config.all_local_ports());
    }

    run(config, cli.ports_per_line).await
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(
        shell,
        &mut cmd,
        "portdeck",
        &mut io::stdout()
    );
}

async fn run(config: Config, ports_per_line: usize) -> Result<()> {
    let registry = Registry::new();
    let cancel = CancellationToken::new();
    let monitor = monitor::spawn(registry.clone(), monitor::MONITOR_INTERVAL, cancel.clone());

    let menu = Menu::new(config, registry.clone(), ports_per_line);
    let mut ui = tokio::task::spawn_blocking(move || menu.run());

    tokio::select! {
        joined = &mut ui => {
            cancel.cancel();
            let _ = monitor.await;
            // the menu may have failed before its own sweep ran
            let leftover = shutdown::shutdown(&registry, SHUTDOWN_GRACE);
            let report = joined.context("Dashboard task failed")??;
            print_summary(report, leftover);
            Ok(())
        }
        name = wait_for_signal() => {
            info!(signal = name, "interrupted, shutting down");
            let report = on_interrupt(&registry, SHUTDOWN_GRACE);
            println!(
                "\n{}",
                format!("Interrupted ({}), terminated {} tunnel(s)", name, report.signalled).yellow()
            );
            std::process::exit(130);
        }
    }
}

/// Signal path: terminate every tunnel, then hand the terminal back.
fn on_interrupt(registry: &Registry, grace: Duration) -> ShutdownReport {
    let report = shutdown::shutdown(registry, grace);
    menu::restore_terminal();
    report
}

fn print_summary(report: ShutdownReport, leftover: ShutdownReport) {
    let closed = report.signalled + leftover.signalled;
    if closed > 0 {
        println!("{}", format!("✓ Closed {} tunnel(s)", closed).green());
    }
    let forced = report.forced + leftover.forced;
    if forced > 0 {
        println!("{}", format!("⚠ {} tunnel(s) had to be killed", forced).yellow());
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        _ => {
            warn!("could not install SIGTERM/SIGHUP handlers");
            return match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(_) => std::future::pending().await,
            };
        }
    };

    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "Ctrl+C",
        Err(_) => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use portdeck::registry::TunnelHandle;
    use std::process::Command;

    #[test]
    fn interrupt_terminates_every_tunnel_once() {
        let registry = Registry::new();
        let mut pids = Vec::new();
        for id in 0..3 {
            let child = Command::new("sleep").arg("30").spawn().unwrap();
            pids.push(child.id());
            registry.register(id, TunnelHandle::new(format!("t{id}"), child, vec![]));
        }

        let report = on_interrupt(&registry, SHUTDOWN_GRACE);
        assert_eq!(report.signalled, 3);
        assert_eq!(report.forced, 0);
        assert!(registry.is_empty());
        for pid in pids {
            let gone = portdeck::process::send_signal(pid, portdeck::process::Signal::Term);
            assert!(gone.is_err_and(|e| portdeck::process::is_already_gone(&e)));
        }

        // a repeated signal finds nothing left
        assert_eq!(on_interrupt(&registry, SHUTDOWN_GRACE), ShutdownReport::default());
    }
}
