//! # The link to the car controller
//!
//! The link owns the byte stream to the microcontroller that drives the motor. It runs in
//! its own tokio task and talks to the control loop over two channels:
//! - **requests** (control loop → I/O): commands, reconnect and close
//! - **events** (I/O → control loop): parsed [Telemetry], connection changes, failed commands
//!
//! Liveness is kept with a `PING` every [config::PING_INTERVAL]. A session that stays silent
//! for [config::HEARTBEAT_TIMEOUT], or whose stream fails, is torn down and the link makes a
//! bounded number of reconnection attempts before it reports [LinkEvent::ReconnectExhausted].
//!
//! The control loop never blocks on the link. [LinkHandle::send] either queues the command or
//! fails immediately.

pub mod connector;
pub mod protocol;
mod session;

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::config::{self, LinkSettings};
use crate::error::LinkError;
use crate::print;
use connector::Connector;
pub use protocol::{Command, LimitSwitch, StatusReport, Telemetry};

/// Events from the I/O task to the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// One parsed inbound line. `PONG` is consumed by the link itself.
    Telemetry(Telemetry),
    /// A session came up or went down.
    ConnectionChanged {
        #[allow(missing_docs)]
        connected: bool,
        #[allow(missing_docs)]
        reason: String,
    },
    /// A queued command never reached the controller.
    CommandFailed {
        #[allow(missing_docs)]
        command: Command,
        #[allow(missing_docs)]
        error: LinkError,
    },
    /// Every reconnection attempt failed. The link stays down until [CarLink::reconnect].
    ReconnectExhausted {
        #[allow(missing_docs)]
        attempts: u32,
    },
}

/// Requests from the control loop to the I/O task.
#[derive(Debug)]
pub(crate) enum LinkRequest {
    Send(Command),
    Reconnect,
    Close,
}

/// Liveness of the current session, published by the I/O task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSession {
    /// A handshake has succeeded and the stream has not failed since
    pub connected: bool,
    /// Last time any bytes arrived
    pub last_heartbeat: Instant,
    /// Endpoint of the live session
    pub endpoint: Option<String>,
}

impl LinkSession {
    fn down() -> Self {
        LinkSession { connected: false, last_heartbeat: Instant::now(), endpoint: None }
    }
}

/// What the car state machine and the scheduler need from a link.
///
/// Every call returns at once. Delivery failures after queuing come back as
/// [LinkEvent::CommandFailed].
pub trait CarLink {
    /// Queues one command.
    ///
    /// ## Returns
    /// - `Err(LinkError::NotConnected)` when no session is up
    /// - `Err(LinkError::CommandRejected)` when the outgoing queue is full
    fn send(&self, command: Command) -> Result<(), LinkError>;

    /// Tears down the current session (if any) and runs a fresh connection cycle.
    fn reconnect(&self) -> Result<(), LinkError>;

    /// `true` while a session is up.
    fn is_connected(&self) -> bool;
}

/// Cloneable handle to a running link.
#[derive(Clone)]
pub struct LinkHandle {
    requests_tx: mpsc::Sender<LinkRequest>,
    session_rx: watch::Receiver<LinkSession>,
}

impl LinkHandle {
    /// Snapshot of the current session.
    pub fn session(&self) -> LinkSession {
        self.session_rx.borrow().clone()
    }
}

impl CarLink for LinkHandle {
    fn send(&self, command: Command) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.requests_tx.try_send(LinkRequest::Send(command)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::CommandRejected {
                command: command.to_string(),
                reason: "outgoing queue is full".to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => LinkError::NotConnected,
        })
    }

    fn reconnect(&self) -> Result<(), LinkError> {
        self.requests_tx.try_send(LinkRequest::Reconnect).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::CommandRejected {
                command: "reconnect".to_string(),
                reason: "outgoing queue is full".to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => LinkError::NotConnected,
        })
    }

    fn is_connected(&self) -> bool {
        self.session_rx.borrow().connected
    }
}

/// Owner of the I/O task.
pub struct LinkManager {
    handle: LinkHandle,
    task: JoinHandle<()>,
    close_timeout: Duration,
}

impl LinkManager {
    /// Connects before returning.
    ///
    /// ## Parameters
    /// `connector`: Source of candidate endpoints and streams
    /// `settings`: Timeouts and reconnection bounds
    ///
    /// ## Returns
    /// The manager and the event receiver, with `ConnectionChanged(true)` already queued on it.
    /// `Err(LinkError::Unavailable)` if no candidate answered the handshake.
    pub async fn connect<C: Connector>(
        mut connector: C,
        settings: LinkSettings,
    ) -> Result<(LinkManager, mpsc::Receiver<LinkEvent>), LinkError> {
        let conn = session::establish(&mut connector, &settings).await?;
        Ok(Self::spawn_with(connector, settings, Some(conn), false))
    }

    /// Starts the I/O task without waiting for a session.
    ///
    /// ## Behavior
    /// The task immediately runs one connection cycle in the background and reports the
    /// outcome as a [LinkEvent]. Use this when the program should come up even if the car
    /// controller is not there yet.
    pub fn start<C: Connector>(connector: C, settings: LinkSettings) -> (LinkManager, mpsc::Receiver<LinkEvent>) {
        Self::spawn_with(connector, settings, None, true)
    }

    fn spawn_with<C: Connector>(
        connector: C,
        settings: LinkSettings,
        initial: Option<session::Connection>,
        connect_now: bool,
    ) -> (LinkManager, mpsc::Receiver<LinkEvent>) {
        let (requests_tx, requests_rx) = mpsc::channel(config::LINK_CMD_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(config::LINK_EVENT_CAPACITY);
        let (session_tx, session_rx) = watch::channel(LinkSession::down());

        if let Some(conn) = &initial {
            session_tx.send_modify(|s| {
                s.connected = true;
                s.endpoint = Some(conn.endpoint.clone());
            });
            // Kanalen er fersk, så det er alltid plass
            let _ = events_tx.try_send(LinkEvent::ConnectionChanged {
                connected: true,
                reason: format!("connected to {}", conn.endpoint),
            });
        }

        let close_timeout = settings.close_timeout();
        let io = session::IoTask { connector, settings, requests_rx, events_tx, session_tx };
        let task = tokio::spawn(io.run(initial, connect_now));

        let handle = LinkHandle { requests_tx, session_rx };
        (LinkManager { handle, task, close_timeout }, events_rx)
    }

    /// A handle for sending through the link.
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Closes the session and waits for the I/O task, at most [LinkSettings::close_timeout].
    ///
    /// A task that does not finish in time is aborted.
    pub async fn close(mut self) {
        if self.handle.requests_tx.try_send(LinkRequest::Close).is_err() {
            // Full kø: vent litt på plass, ellers avbryt
            let _ = timeout(self.close_timeout, self.handle.requests_tx.send(LinkRequest::Close)).await;
        }
        match timeout(self.close_timeout, &mut self.task).await {
            Ok(_) => print::link("I/O task stopped".to_string()),
            Err(_) => {
                print::warn("I/O task did not stop in time, aborting it".to_string());
                self.task.abort();
            }
        }
    }
}
