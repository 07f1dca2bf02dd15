// SPDX-License-Identifier: MIT

pub mod log;

pub use log::{init, LogLevel};
