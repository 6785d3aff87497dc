//! portdeck: a terminal dashboard for SSH port-forward tunnels and editor projects.
//!
//! Tunnels run as `ssh -N` subprocesses tracked in a [`registry::Registry`]
//! that the menu, the health monitor and the shutdown path share.

pub mod config;
pub mod editor;
pub mod error;
pub mod logging;
pub mod menu;
pub mod monitor;
pub mod port;
pub mod process;
pub mod registry;
pub mod shutdown;
pub mod ssh;
