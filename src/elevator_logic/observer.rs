//! Subscription interface for the presentation layer.

use crate::error::{DispatchError, InvalidRequest, LinkError};
use crate::link::{Command, LimitSwitch};

use super::request::Origin;

/// Things worth telling the user about that are not plain state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A request was a no-op.
    RequestIgnored {
        #[allow(missing_docs)]
        floor: i32,
        #[allow(missing_docs)]
        origin: Origin,
        #[allow(missing_docs)]
        reason: InvalidRequest,
    },
    /// A hall call went to the pending queue because the override is active.
    RequestHeld {
        #[allow(missing_docs)]
        floor: i32,
        #[allow(missing_docs)]
        origin: Origin,
    },
    /// Dispatch to `floor` did not happen. The request stays live.
    DispatchDeferred {
        #[allow(missing_docs)]
        floor: i32,
        #[allow(missing_docs)]
        reason: DispatchError,
    },
    /// A command was dropped by the link.
    CommandDropped {
        #[allow(missing_docs)]
        command: Command,
        #[allow(missing_docs)]
        error: LinkError,
    },
    /// The car stopped at `floor`, serving `served` requests.
    Arrived {
        #[allow(missing_docs)]
        floor: i32,
        #[allow(missing_docs)]
        served: usize,
    },
    /// The emergency override turned on or off.
    OverrideChanged {
        #[allow(missing_docs)]
        active: bool,
    },
    /// The link gave up reconnecting. Only a manual reconnect brings it back.
    ReconnectExhausted {
        #[allow(missing_docs)]
        attempts: u32,
    },
    /// A limit switch fired.
    Limit(LimitSwitch),
    /// `ERROR:` line from the car controller.
    HardwareError(String),
    /// Informational line from the car controller.
    ControllerLog(String),
}

/// Callbacks for the presentation layer. Every method defaults to a no-op.
///
/// Called from the control loop, so implementations must return quickly.
pub trait CarObserver: Send {
    /// The car reported a floor.
    fn on_position(&mut self, _floor: i32) {}

    /// The car sent a full status report (values after applying it to the model).
    fn on_status(&mut self, _current: i32, _target: Option<i32>, _moving: bool, _emergency: bool) {}

    /// The link came up or went down.
    fn on_connection_change(&mut self, _connected: bool, _reason: &str) {}

    #[allow(missing_docs)]
    fn on_notice(&mut self, _notice: &Notice) {}
}
