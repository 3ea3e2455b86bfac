//! Process lifecycle control.
//!
//! This module owns start/stop/restart of the controlled process and the status belief
//! that the registry and topology client read. Presentation layers subscribe to status
//! changes instead of reading shared globals.

mod controller;
mod status;

pub(crate) use controller::LifecycleController;
pub(crate) use status::{StatusSnapshot, StatusView};
