//! ## Error kinds of the core
//!
//! None of these are allowed to terminate the control loop. Link faults degrade to a
//! disconnected state, bad telemetry is logged and skipped, and invalid requests are
//! ignored with a notification to the observers.

use thiserror::Error;

/// Failures on the link to the car controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No candidate endpoint answered the handshake. Retryable.
    #[error("no responsive endpoint: {0}")]
    Unavailable(String),

    /// The session died mid-flight (I/O error, EOF or heartbeat silence).
    #[error("link lost: {0}")]
    Lost(String),

    /// A command was issued while no session is up.
    #[error("link is not connected")]
    NotConnected,

    /// The link is up but the command could not be delivered. The command is dropped.
    #[error("command `{command}` rejected: {reason}")]
    CommandRejected {
        #[allow(missing_docs)]
        command: String,
        #[allow(missing_docs)]
        reason: String,
    },
}

/// An inbound line with a known tag but unusable fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed telemetry `{line}`: {reason}")]
pub struct MalformedTelemetry {
    /// The raw line as received
    pub line: String,
    /// What was wrong with it
    pub reason: String,
}

/// A floor request that is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    /// Car call for the floor the car is standing at.
    #[error("car is already at floor {0}")]
    AlreadyAtFloor(i32),

    /// Floor outside the served range.
    #[error("floor {floor} is outside {lowest}..={highest}")]
    OutOfRange {
        #[allow(missing_docs)]
        floor: i32,
        #[allow(missing_docs)]
        lowest: i32,
        #[allow(missing_docs)]
        highest: i32,
    },
}

/// Why the car state machine refused to start a move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The car is held by the emergency override and the target is a hall call.
    #[error("car is held by the emergency override")]
    Held,

    /// Target equals the current floor.
    #[error("car is already at floor {0}")]
    AlreadyThere(i32),

    /// The move command could not be handed to the link.
    #[error(transparent)]
    Link(#[from] LinkError),
}
