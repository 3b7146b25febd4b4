#![warn(missing_docs)]
//! # elevatorlink
//!
//! Control software for a single elevator car. The car controller sits at the other end
//! of a line-oriented serial link; this crate keeps that link alive, models the car, and
//! decides where it goes next.
//!
//! ## Overview
//! - **Config**: Compiled-in defaults, runtime settings and print switches.
//! - **Error**: Error kinds shared by the modules.
//! - **Init**: Command line, settings loading and the console front-end.
//! - **Link**: Line protocol, connection handshake, heartbeat and reconnection.
//! - **Elevator Logic**: Car state machine, SCAN scheduling, emergency override and the control loop.
//! - **Sensor**: Occupancy threshold gate driving the automatic emergency override.

/// Global variables and runtime settings
pub mod config;

/// Error kinds
pub mod error;

/// Initialize functions
pub mod init;

/// Print functions with color coding
pub mod print;

/// Serial link to the car controller.
pub mod link;

/// Car model, scheduling and the control loop.
pub mod elevator_logic;

/// Occupancy sensor gate.
pub mod sensor;
