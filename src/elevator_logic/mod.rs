//! # Control loop
//!
//! The [Controller] owns the [Scheduler] (and through it the car model). It is driven by
//! [run_controller], a single task that each tick:
//! - drains [LinkEvent]s from the link's I/O task
//! - drains occupancy edges from the sensor thread
//! - drains [ControlInput]s from the presentation layer
//! - runs due dispatches and the periodic `STATUS` poll
//! - publishes a [StatusSnapshot] on a `watch` channel
//!
//! Nothing outside this loop ever touches the car model or the request sets.

pub mod car;
pub mod emergency;
pub mod observer;
pub mod request;
pub mod scheduler;
pub mod timer;

use crossbeam_channel as cbc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::config::{self, DispatchSettings};
use crate::error::{InvalidRequest, LinkError};
use crate::link::{CarLink, LinkEvent, Telemetry};
use crate::print;

use car::Direction;
pub use observer::{CarObserver, Notice};
use request::Origin;
pub use scheduler::{Admission, Scheduler};

/// One request as shown to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct RequestEntry {
    pub floor: i32,
    pub origin: Origin,
}

/// Everything the presentation layer needs to draw the car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct StatusSnapshot {
    pub current_floor: i32,
    pub target_floor: Option<i32>,
    pub direction: Direction,
    pub moving: bool,
    /// Emergency flag of the car itself
    pub emergency: bool,
    pub override_manual: bool,
    pub override_auto: bool,
    pub connected: bool,
    /// Live requests, oldest first
    pub live: Vec<RequestEntry>,
    /// Hall calls held by the override, in release order
    pub held: Vec<RequestEntry>,
}

impl StatusSnapshot {
    /// `manual || auto`
    pub fn override_active(&self) -> bool {
        self.override_manual || self.override_auto
    }

    #[allow(missing_docs)]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Calls from the presentation layer into the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ControlInput {
    AddRequest { floor: i32, origin: Origin },
    SetManualEmergency(bool),
    ToggleManualEmergency,
    Calibrate,
    InitializeToBase,
    Reconnect,
    Stop,
    TestMotor,
    RequestStatus,
    /// Ends [run_controller]
    Shutdown,
}

/// Cloneable front door to a running controller. Every call is fire-and-forget.
#[derive(Clone)]
pub struct ControllerHandle {
    input_tx: mpsc::Sender<ControlInput>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl ControllerHandle {
    /// Queues `input` for the control loop.
    ///
    /// ## Returns
    /// `false` if the loop is gone or its input queue is full. The input is then dropped.
    pub fn submit(&self, input: ControlInput) -> bool {
        match self.input_tx.try_send(input) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(input)) => {
                print::warn(format!("Control loop busy, dropped {:?}", input));
                false
            }
            Err(mpsc::error::TrySendError::Closed(input)) => {
                print::warn(format!("Control loop stopped, dropped {:?}", input));
                false
            }
        }
    }

    #[allow(missing_docs)]
    pub fn add_request(&self, floor: i32, origin: Origin) -> bool {
        self.submit(ControlInput::AddRequest { floor, origin })
    }
    #[allow(missing_docs)]
    pub fn set_manual_emergency(&self, on: bool) -> bool {
        self.submit(ControlInput::SetManualEmergency(on))
    }
    #[allow(missing_docs)]
    pub fn toggle_manual_emergency(&self) -> bool {
        self.submit(ControlInput::ToggleManualEmergency)
    }
    #[allow(missing_docs)]
    pub fn calibrate(&self) -> bool {
        self.submit(ControlInput::Calibrate)
    }
    #[allow(missing_docs)]
    pub fn initialize_to_base(&self) -> bool {
        self.submit(ControlInput::InitializeToBase)
    }
    #[allow(missing_docs)]
    pub fn reconnect(&self) -> bool {
        self.submit(ControlInput::Reconnect)
    }
    #[allow(missing_docs)]
    pub fn stop(&self) -> bool {
        self.submit(ControlInput::Stop)
    }
    #[allow(missing_docs)]
    pub fn test_motor(&self) -> bool {
        self.submit(ControlInput::TestMotor)
    }
    #[allow(missing_docs)]
    pub fn request_status(&self) -> bool {
        self.submit(ControlInput::RequestStatus)
    }
    #[allow(missing_docs)]
    pub fn shutdown(&self) -> bool {
        self.submit(ControlInput::Shutdown)
    }

    /// Latest published snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    /// A receiver that wakes on every published change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }
}

/// State of the control loop.
pub struct Controller<L: CarLink> {
    scheduler: Scheduler<L>,
    observers: Vec<Box<dyn CarObserver>>,
    status_tx: watch::Sender<StatusSnapshot>,
    status_poll: timer::Timer,
    init_on_connect: bool,
}

impl<L: CarLink> Controller<L> {
    /// ## Parameters
    /// `link`: Where commands go
    /// `settings`: Building layout and dispatch timing
    /// `init_on_connect`: Send `INIT` and reset the model on every new session
    pub fn new(link: L, settings: DispatchSettings, init_on_connect: bool) -> Self {
        let status_poll = timer::Timer::new(settings.status_poll());
        let scheduler = Scheduler::new(link, settings);
        let (status_tx, _) = watch::channel(snapshot_of(&scheduler));
        Controller { scheduler, observers: Vec::new(), status_tx, status_poll, init_on_connect }
    }

    /// Adds an observer. Observers are called in the order they were added.
    pub fn subscribe(&mut self, observer: Box<dyn CarObserver>) {
        self.observers.push(observer);
    }

    /// Creates the input channel for [run_controller] and a handle feeding it.
    pub fn control_channel(&self) -> (ControllerHandle, mpsc::Receiver<ControlInput>) {
        let (input_tx, input_rx) = mpsc::channel(config::CONTROL_INPUT_CAPACITY);
        let handle = ControllerHandle { input_tx, status_rx: self.status_tx.subscribe() };
        (handle, input_rx)
    }

    #[allow(missing_docs)]
    pub fn scheduler(&self) -> &Scheduler<L> {
        &self.scheduler
    }

    /// Current state, computed fresh.
    pub fn status(&self) -> StatusSnapshot {
        snapshot_of(&self.scheduler)
    }

    // API mot presentasjonslaget

    #[allow(missing_docs)]
    pub fn add_request(&mut self, floor: i32, origin: Origin) -> Result<Admission, InvalidRequest> {
        let result = self.scheduler.add_request(floor, origin);
        self.flush();
        result
    }

    #[allow(missing_docs)]
    pub fn set_manual_emergency(&mut self, on: bool) {
        self.scheduler.set_manual_emergency(on);
        self.flush();
    }

    /// Occupancy sensor edge.
    pub fn set_auto_emergency(&mut self, on: bool) {
        self.scheduler.set_auto_emergency(on);
        self.flush();
    }

    #[allow(missing_docs)]
    pub fn calibrate(&mut self) -> Result<(), LinkError> {
        let result = self.scheduler.calibrate();
        self.flush();
        result
    }

    #[allow(missing_docs)]
    pub fn initialize_to_base(&mut self) -> Result<(), LinkError> {
        let result = self.scheduler.initialize_to_base();
        self.flush();
        result
    }

    #[allow(missing_docs)]
    pub fn reconnect(&mut self) -> Result<(), LinkError> {
        self.scheduler.reconnect()
    }

    #[allow(missing_docs)]
    pub fn stop(&mut self) -> Result<(), LinkError> {
        let result = self.scheduler.stop();
        self.flush();
        result
    }

    #[allow(missing_docs)]
    pub fn test_motor(&mut self) -> Result<(), LinkError> {
        let result = self.scheduler.test_motor();
        self.flush();
        result
    }

    #[allow(missing_docs)]
    pub fn request_status(&mut self) -> Result<(), LinkError> {
        let result = self.scheduler.request_status();
        self.flush();
        result
    }

    /// Applies one input from a [ControllerHandle].
    ///
    /// ## Returns
    /// `false` for [ControlInput::Shutdown].
    pub fn handle_input(&mut self, input: ControlInput) -> bool {
        // Feil er alt logga og varsla av scheduleren
        match input {
            ControlInput::AddRequest { floor, origin } => {
                let _ = self.add_request(floor, origin);
            }
            ControlInput::SetManualEmergency(on) => self.set_manual_emergency(on),
            ControlInput::ToggleManualEmergency => {
                let on = !self.scheduler.emergency().manual;
                self.set_manual_emergency(on);
            }
            ControlInput::Calibrate => {
                let _ = self.calibrate();
            }
            ControlInput::InitializeToBase => {
                let _ = self.initialize_to_base();
            }
            ControlInput::Reconnect => {
                let _ = self.reconnect();
            }
            ControlInput::Stop => {
                let _ = self.stop();
            }
            ControlInput::TestMotor => {
                let _ = self.test_motor();
            }
            ControlInput::RequestStatus => {
                let _ = self.request_status();
            }
            ControlInput::Shutdown => return false,
        }
        true
    }

    /// Applies one event from the link.
    pub fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Telemetry(telemetry) => self.handle_telemetry(telemetry),
            LinkEvent::ConnectionChanged { connected, reason } => {
                if connected {
                    print::ok(format!("Link up: {}", reason));
                } else {
                    print::err(format!("Link down: {}", reason));
                }
                for o in self.observers.iter_mut() {
                    o.on_connection_change(connected, &reason);
                }
                if connected {
                    self.scheduler.on_connected(self.init_on_connect);
                    self.status_poll.timer_start();
                } else {
                    self.status_poll.timer_stop();
                }
            }
            LinkEvent::CommandFailed { command, error } => self.scheduler.on_command_failed(command, error),
            LinkEvent::ReconnectExhausted { attempts } => {
                print::err(format!("Car controller unreachable after {} attempts, use reconnect", attempts));
                self.notify(Notice::ReconnectExhausted { attempts });
            }
        }
        self.flush();
    }

    fn handle_telemetry(&mut self, telemetry: Telemetry) {
        match telemetry {
            Telemetry::Pong => {}
            Telemetry::Position(floor) => {
                self.scheduler.on_position(floor);
                for o in self.observers.iter_mut() {
                    o.on_position(floor);
                }
            }
            Telemetry::MoveStarted(floor) => print::info(format!("Car started towards floor {}", floor)),
            Telemetry::MoveCompleted(floor) => {
                self.scheduler.on_move_complete(floor);
                for o in self.observers.iter_mut() {
                    o.on_position(floor);
                }
            }
            Telemetry::Progress(p) => print::info(format!("Travel {}%", p)),
            Telemetry::Status(report) => {
                self.scheduler.on_status(&report);
                let s = *self.scheduler.car().state();
                for o in self.observers.iter_mut() {
                    o.on_status(s.current_floor(), s.target_floor(), s.moving(), s.emergency());
                }
            }
            Telemetry::Limit(switch) => {
                print::warn(format!("Limit switch {:?} reached", switch));
                self.notify(Notice::Limit(switch));
            }
            Telemetry::Error(text) => {
                print::err(format!("Car controller: {}", text));
                self.notify(Notice::HardwareError(text));
            }
            Telemetry::Info(text) => {
                print::info(format!("Car controller: {}", text));
                self.notify(Notice::ControllerLog(text));
            }
        }
    }

    /// Runs due work: dispatch after the settle delay and the periodic `STATUS` poll.
    pub fn tick(&mut self) {
        self.scheduler.tick();
        if self.status_poll.timer_timeouted() {
            if self.scheduler.link().is_connected() {
                let _ = self.scheduler.request_status();
            }
            self.status_poll.timer_start();
        }
        self.flush();
    }

    fn notify(&mut self, notice: Notice) {
        for o in self.observers.iter_mut() {
            o.on_notice(&notice);
        }
    }

    /// Forwards collected notices and publishes the snapshot if it changed.
    fn flush(&mut self) {
        for notice in self.scheduler.take_notices() {
            self.notify(notice);
        }
        let snapshot = snapshot_of(&self.scheduler);
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot.clone();
            true
        });
        if changed {
            print::status(&snapshot);
        }
    }
}

fn snapshot_of<L: CarLink>(scheduler: &Scheduler<L>) -> StatusSnapshot {
    let s = scheduler.car().state();
    let o = scheduler.emergency();
    let entry = |r: &request::FloorRequest| RequestEntry { floor: r.floor, origin: r.origin };
    StatusSnapshot {
        current_floor: s.current_floor(),
        target_floor: s.target_floor(),
        direction: s.direction(),
        moving: s.moving(),
        emergency: s.emergency(),
        override_manual: o.manual,
        override_auto: o.auto,
        connected: scheduler.link().is_connected(),
        live: scheduler.live().iter().map(entry).collect(),
        held: scheduler.pending().iter().map(entry).collect(),
    }
}

/// The control loop. Returns the controller on [ControlInput::Shutdown] or when every
/// [ControllerHandle] is dropped.
///
/// ## Parameters
/// `link_rx`: Events from the link's I/O task
/// `occupancy_rx`: Asserted/cleared edges from the occupancy sensor thread
/// `input_rx`: Inputs from [ControllerHandle]s, see [Controller::control_channel]
pub async fn run_controller<L: CarLink>(
    mut controller: Controller<L>,
    mut link_rx: mpsc::Receiver<LinkEvent>,
    occupancy_rx: cbc::Receiver<bool>,
    mut input_rx: mpsc::Receiver<ControlInput>,
) -> Controller<L> {
    print::info("Control loop started".to_string());
    loop {
        while let Ok(event) = link_rx.try_recv() {
            controller.handle_link_event(event);
        }

        while let Ok(asserted) = occupancy_rx.try_recv() {
            controller.set_auto_emergency(asserted);
        }

        loop {
            match input_rx.try_recv() {
                Ok(input) => {
                    if !controller.handle_input(input) {
                        print::info("Control loop stopping".to_string());
                        return controller;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return controller,
            }
        }

        controller.tick();
        sleep(config::TICK_PERIOD).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevator_logic::car::tests::RecordingLink;
    use crate::link::{Command, StatusReport};
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl CarObserver for Log {
        fn on_position(&mut self, floor: i32) {
            self.0.lock().unwrap().push(format!("pos {}", floor));
        }
        fn on_status(&mut self, current: i32, target: Option<i32>, moving: bool, emergency: bool) {
            self.0.lock().unwrap().push(format!("status {} {:?} {} {}", current, target, moving, emergency));
        }
        fn on_connection_change(&mut self, connected: bool, _reason: &str) {
            self.0.lock().unwrap().push(format!("link {}", connected));
        }
        fn on_notice(&mut self, notice: &Notice) {
            if let Notice::RequestIgnored { floor, .. } = notice {
                self.0.lock().unwrap().push(format!("ignored {}", floor));
            }
        }
    }

    fn controller() -> Controller<RecordingLink> {
        let settings = DispatchSettings { settle_delay_ms: 0, ..DispatchSettings::default() };
        Controller::new(RecordingLink::default(), settings, true)
    }

    #[test]
    fn telemetry_reaches_observers_and_model() {
        let mut c = controller();
        let log = Log::default();
        c.subscribe(Box::new(log.clone()));

        c.add_request(1, Origin::Internal).unwrap_err();
        c.add_request(3, Origin::Internal).unwrap();
        c.handle_link_event(LinkEvent::Telemetry(Telemetry::Position(2)));
        c.handle_link_event(LinkEvent::Telemetry(Telemetry::Status(StatusReport {
            current: 3,
            target: 3,
            moving: false,
            emergency: false,
        })));

        assert!(c.status().live.is_empty());
        assert_eq!(
            *log.0.lock().unwrap(),
            vec!["ignored 1".to_string(), "pos 2".to_string(), "status 3 Some(3) false false".to_string()]
        );
    }

    #[test]
    fn connection_runs_init_sequence() {
        let mut c = controller();
        c.handle_link_event(LinkEvent::ConnectionChanged { connected: true, reason: "test".into() });
        assert_eq!(*c.scheduler().link().sent.borrow(), vec![Command::Init, Command::Status]);
    }

    #[test]
    fn handle_publishes_snapshots() {
        let mut c = controller();
        let (handle, _rx) = c.control_channel();
        assert!(handle.status().live.is_empty());

        c.set_manual_emergency(true);
        c.add_request(2, Origin::ExternalUp).unwrap();
        let snap = handle.status();
        assert!(snap.override_active());
        assert_eq!(snap.held, vec![RequestEntry { floor: 2, origin: Origin::ExternalUp }]);
        assert!(snap.to_json().unwrap().contains("\"held\""));
    }

    #[tokio::test]
    async fn loop_applies_inputs_and_stops_on_shutdown() {
        let c = controller();
        let (handle, input_rx) = c.control_channel();
        let (_link_tx, link_rx) = mpsc::channel(8);
        let (occ_tx, occ_rx) = cbc::unbounded();

        handle.add_request(3, Origin::ExternalDown);
        occ_tx.send(true).unwrap();
        handle.toggle_manual_emergency();
        handle.shutdown();

        let c = run_controller(c, link_rx, occ_rx, input_rx).await;
        // Sensoren blir lest før inputane, så kallet blir halde tilbake
        let o = c.scheduler().emergency();
        assert!(o.manual && o.auto);
        assert_eq!(*c.scheduler().link().sent.borrow(), vec![Command::Emergency(true)]);
        assert_eq!(c.scheduler().pending().len(), 1);
    }
}
