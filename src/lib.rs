//! Plugin dispatch for maintenance jobs against a single network device.

pub mod catalog;
pub mod config;
pub mod context;
pub mod convergence;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod fsm;
pub mod phase;
pub mod plugins;
pub mod session;
pub mod status;
pub mod util;
