//! `coffee` keeps the host awake and shows a live terminal dashboard of
//! local and secondary time, uptime, battery state, and network interfaces.
//!
//! Probe results come from host utilities (`system_profiler`,
//! `networksetup`, `ifconfig`) and are cached with per-probe TTLs; a failed
//! refresh degrades its section instead of stopping the dashboard.

pub mod app;
pub mod cache;
pub mod collector;
pub mod config;
pub mod errors;
pub mod event;
pub mod keep_awake;
pub mod persist;
pub mod probe;
pub mod refresh;
pub mod shutdown;
pub mod tui;
pub mod types;
pub mod ui;

pub use app::{App, FrameSink};
pub use config::{load_config, Config};
pub use keep_awake::{KeepAwakeController, KeepAwakeStatus};
pub use refresh::RefreshLoop;
pub use shutdown::Shutdown;
