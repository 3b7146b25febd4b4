//! # Scheduler
//!
//! Owns the live requests, the pending queue, the emergency override and the car. Decides
//! when and where the car moves.
//!
//! - New requests are dispatched at once if the car is idle, or squeezed into the current
//!   trip if they lie on the way ([admissible]).
//! - After an arrival the next dispatch waits for the settle delay (door-open time).
//! - While the override is active, hall calls wait in the [PendingQueue]. Car calls keep
//!   working so riders inside keep control.
//!
//! All methods run on the control loop. Nothing here blocks; link failures turn into
//! [Notice]s and the affected request simply stays live.

use crate::config::DispatchSettings;
use crate::error::{DispatchError, InvalidRequest, LinkError, MalformedTelemetry};
use crate::link::{CarLink, Command, StatusReport};
use crate::print;

use super::car::{Car, Direction, DispatchKind};
use super::emergency::{EmergencyOverride, PendingQueue};
use super::observer::Notice;
use super::request::{admissible, dispatch_order, FloorRequest, Origin, RequestSet};
use super::timer::Timer;

/// What [Scheduler::add_request] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Live, waiting for a later dispatch
    Queued,
    /// Same `(floor, origin)` already live
    Duplicate,
    /// Parked in the pending queue by the override
    Held,
    /// The idle car was sent towards it
    Dispatched(Direction),
    /// The moving car will stop there first
    Retargeted,
    /// The car already stands there, served without moving
    ServedInPlace,
    /// Live, but the move could not be commanded right now
    Deferred,
}

/// Dispatch policy over one car.
pub struct Scheduler<L: CarLink> {
    link: L,
    car: Car,
    live: RequestSet,
    pending: PendingQueue,
    emergency: EmergencyOverride,
    sweep: Direction,
    settle: Timer,
    dispatch_due: bool,
    /// Set by [Scheduler::stop]. Blocks automatic re-dispatch until the next request.
    stopped: bool,
    settings: DispatchSettings,
    notices: Vec<Notice>,
}

impl<L: CarLink> Scheduler<L> {
    /// A scheduler with the car idle at the base floor.
    pub fn new(link: L, settings: DispatchSettings) -> Self {
        Scheduler {
            link,
            car: Car::new(settings.base_floor),
            live: RequestSet::new(),
            pending: PendingQueue::new(),
            emergency: EmergencyOverride::default(),
            sweep: Direction::Idle,
            settle: Timer::new(settings.settle_delay()),
            dispatch_due: false,
            stopped: false,
            settings,
            notices: Vec::new(),
        }
    }

    #[allow(missing_docs)]
    pub fn car(&self) -> &Car {
        &self.car
    }
    #[allow(missing_docs)]
    pub fn live(&self) -> &RequestSet {
        &self.live
    }
    #[allow(missing_docs)]
    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }
    #[allow(missing_docs)]
    pub fn emergency(&self) -> EmergencyOverride {
        self.emergency
    }
    /// Direction of the current sweep, kept across arrivals until the live set empties.
    pub fn sweep(&self) -> Direction {
        self.sweep
    }
    #[allow(missing_docs)]
    pub fn link(&self) -> &L {
        &self.link
    }
    #[allow(missing_docs)]
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Hands out the notices collected since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Accepts a floor request.
    ///
    /// ## Behavior
    /// - Car call for the current floor, or a floor outside the building: no-op, `Err`
    /// - Hall call under override: parked in the pending queue
    /// - Otherwise live. An idle car is dispatched right away (unless the settle delay runs),
    ///   a moving car is retargeted if the floor is on its way and the override is off.
    pub fn add_request(&mut self, floor: i32, origin: Origin) -> Result<Admission, InvalidRequest> {
        self.admit(FloorRequest::new(floor, origin))
    }

    fn admit(&mut self, request: FloorRequest) -> Result<Admission, InvalidRequest> {
        let FloorRequest { floor, origin, .. } = request;
        let state = *self.car.state();

        let (lowest, highest) = (self.settings.lowest_floor, self.settings.highest_floor);
        if floor < lowest || floor > highest {
            return Err(self.ignore(floor, origin, InvalidRequest::OutOfRange { floor, lowest, highest }));
        }
        if origin == Origin::Internal && floor == state.current_floor() {
            return Err(self.ignore(floor, origin, InvalidRequest::AlreadyAtFloor(floor)));
        }

        if self.emergency.active() && origin.is_external() {
            if self.pending.push(request) {
                print::warn(format!("Override active, holding {} call for floor {}", origin, floor));
                self.notices.push(Notice::RequestHeld { floor, origin });
            }
            return Ok(Admission::Held);
        }

        if !self.live.insert(request) {
            // Same knapp igjen etter STOP: køyr vidare
            if self.stopped && !state.moving() {
                self.stopped = false;
                return Ok(self.dispatch());
            }
            return Ok(Admission::Duplicate);
        }
        self.stopped = false;
        print::dispatch(format!("New {} request for floor {}", origin, floor));

        if !state.moving() {
            if self.dispatch_due {
                return Ok(Admission::Queued);
            }
            return Ok(self.dispatch());
        }

        match state.target_floor() {
            Some(target)
                if !self.emergency.active()
                    && floor != target
                    && admissible(floor, state.current_floor(), target, state.direction()) =>
            {
                Ok(self.retarget(floor, target))
            }
            _ => Ok(Admission::Queued),
        }
    }

    fn ignore(&mut self, floor: i32, origin: Origin, reason: InvalidRequest) -> InvalidRequest {
        print::warn(format!("Ignoring {} request: {}", origin, reason));
        self.notices.push(Notice::RequestIgnored { floor, origin, reason: reason.clone() });
        reason
    }

    fn kind_for(&self, floor: i32) -> DispatchKind {
        if self.live.has_internal_at(floor) {
            DispatchKind::CarCall
        } else {
            DispatchKind::HallCall
        }
    }

    fn defer(&mut self, floor: i32, reason: DispatchError) {
        print::warn(format!("Dispatch to floor {} deferred: {}", floor, reason));
        self.notices.push(Notice::DispatchDeferred { floor, reason });
    }

    fn retarget(&mut self, floor: i32, old_target: i32) -> Admission {
        let kind = self.kind_for(floor);
        match self.car.begin_move(floor, kind, &self.link) {
            Ok(_) => {
                print::dispatch(format!("Stopping at floor {} on the way to {}", floor, old_target));
                Admission::Retargeted
            }
            Err(e) => {
                self.defer(floor, e);
                Admission::Deferred
            }
        }
    }

    /// Sends the idle car to the head of the SCAN order.
    ///
    /// A hall call refused because the car is held is skipped in favour of the next floor.
    fn dispatch(&mut self) -> Admission {
        let state = *self.car.state();
        if state.moving() {
            return Admission::Queued;
        }
        let current = state.current_floor();
        let order = dispatch_order(&self.live.floors(), current, self.sweep);
        if order.is_empty() {
            self.sweep = Direction::Idle;
            return Admission::Queued;
        }
        if order[0] == current {
            self.on_arrival(current);
            return Admission::ServedInPlace;
        }

        let mut refused = None;
        for &target in &order {
            let kind = self.kind_for(target);
            match self.car.begin_move(target, kind, &self.link) {
                Ok(direction) => {
                    self.sweep = direction;
                    print::dispatch(format!("Dispatching car {} -> {} ({:?})", current, target, direction));
                    return Admission::Dispatched(direction);
                }
                Err(DispatchError::Held) => {
                    refused.get_or_insert(target);
                }
                Err(e) => {
                    self.defer(target, e);
                    return Admission::Deferred;
                }
            }
        }
        if let Some(target) = refused {
            self.defer(target, DispatchError::Held);
        }
        Admission::Deferred
    }

    /// Reconciles an arrival at `floor`.
    ///
    /// ## Returns
    /// How many requests the stop served.
    pub fn on_arrival(&mut self, floor: i32) -> usize {
        let served = self.live.remove_served(floor, self.emergency.active()).len();
        print::ok(format!("Car at floor {}, served {} request(s)", floor, served));
        self.notices.push(Notice::Arrived { floor, served });

        if self.live.is_empty() {
            self.sweep = Direction::Idle;
            self.dispatch_due = false;
            self.settle.timer_stop();
        } else {
            self.dispatch_due = true;
            self.settle.timer_start();
        }
        served
    }

    /// Runs a dispatch that has come due. Called once per control-loop tick.
    pub fn tick(&mut self) {
        if self.dispatch_due && (!self.settle.is_active() || self.settle.timer_timeouted()) {
            self.dispatch_due = false;
            self.settle.timer_stop();
            self.dispatch();
        }
    }

    /// Asks for a dispatch on the next tick if anything is waiting.
    ///
    /// Does nothing after [Scheduler::stop] until a new request comes in.
    pub fn retry_dispatch(&mut self) {
        if !self.stopped && !self.car.state().moving() && !self.live.is_empty() {
            self.dispatch_due = true;
        }
    }

    // Telemetri

    /// Checks a reported floor against the building.
    ///
    /// ## Returns
    /// `Err(MalformedTelemetry)` for a floor outside `[lowest_floor, highest_floor]`. The
    /// caller must then leave the model untouched.
    pub fn check_reported_floor(&self, line: &str, floor: i32) -> Result<(), MalformedTelemetry> {
        let (lowest, highest) = (self.settings.lowest_floor, self.settings.highest_floor);
        if floor < lowest || floor > highest {
            return Err(MalformedTelemetry {
                line: line.to_string(),
                reason: format!("floor {} is outside {}..={}", floor, lowest, highest),
            });
        }
        Ok(())
    }

    fn reported_floor_ok(&self, line: &str, floor: i32) -> bool {
        match self.check_reported_floor(line, floor) {
            Ok(()) => true,
            Err(e) => {
                print::warn(format!("Skipping telemetry: {}", e));
                false
            }
        }
    }

    /// `POS:<floor>`. A floor outside the building is skipped.
    pub fn on_position(&mut self, floor: i32) {
        if !self.reported_floor_ok(&format!("POS:{}", floor), floor) {
            return;
        }
        if self.car.on_position(floor) {
            self.on_arrival(floor);
        }
    }

    /// `MOVE_COMPLETE:<floor>`. A floor outside the building is skipped.
    pub fn on_move_complete(&mut self, floor: i32) {
        if !self.reported_floor_ok(&format!("MOVE_COMPLETE:{}", floor), floor) {
            return;
        }
        if self.car.on_move_complete(floor) {
            self.on_arrival(floor);
        }
    }

    /// `STATUS:...`. Also re-sends the emergency state if the car disagrees with the override.
    ///
    /// A report with either floor outside the building is skipped. An idle report after
    /// [Scheduler::stop] does not bring the abandoned move back.
    pub fn on_status(&mut self, report: &StatusReport) {
        let line = format!("STATUS:{}:{}", report.current, report.target);
        if !self.reported_floor_ok(&line, report.current) || !self.reported_floor_ok(&line, report.target) {
            return;
        }
        if self.car.on_status(report) {
            self.on_arrival(report.current);
        } else {
            // En rapport kan stoppe modellen midt i ein tur
            self.retry_dispatch();
        }
        let active = self.emergency.active();
        if report.emergency != active {
            print::warn(format!("Car reports emergency={}, override is {}. Resending", report.emergency, active));
            self.propagate_emergency(active);
        }
    }

    // Nødstopp

    /// Operator toggle.
    pub fn set_manual_emergency(&mut self, on: bool) {
        let next = EmergencyOverride { manual: on, ..self.emergency };
        self.apply_override(next);
    }

    /// Occupancy sensor edge.
    pub fn set_auto_emergency(&mut self, on: bool) {
        let next = EmergencyOverride { auto: on, ..self.emergency };
        self.apply_override(next);
    }

    fn apply_override(&mut self, next: EmergencyOverride) {
        let was = self.emergency.active();
        self.emergency = next;
        let now = next.active();
        if was == now {
            return;
        }
        self.notices.push(Notice::OverrideChanged { active: now });

        if now {
            let held = self.live.take_external();
            print::warn(format!("Emergency override ON, holding {} hall call(s)", held.len()));
            for request in held {
                self.pending.push(request);
            }
            if self.live.is_empty() {
                self.dispatch_due = false;
                self.settle.timer_stop();
            }
            self.propagate_emergency(true);
        } else {
            self.propagate_emergency(false);
            let released = self.pending.drain();
            print::ok(format!("Emergency override OFF, releasing {} hall call(s)", released.len()));
            for request in released {
                self.live.insert(request);
            }
            self.readmit();
        }
    }

    /// After a release: retarget a moving car to the nearest live floor on its way, or
    /// have an idle car dispatched on the next tick.
    ///
    /// Car calls queued while the override blocked mid-trip admission count too.
    fn readmit(&mut self) {
        let state = *self.car.state();
        if !state.moving() {
            self.retry_dispatch();
            return;
        }
        let (current, direction) = (state.current_floor(), state.direction());
        if let Some(target) = state.target_floor() {
            let nearest = self
                .live
                .floors()
                .into_iter()
                .filter(|&f| f != target && admissible(f, current, target, direction))
                .min_by_key(|&f| f.abs_diff(current));
            if let Some(floor) = nearest {
                self.retarget(floor, target);
            }
        }
    }

    fn propagate_emergency(&mut self, on: bool) {
        self.car.set_emergency(on);
        let _ = self.send_command(Command::Emergency(on));
    }

    // Link

    /// Sends `command`, turning a failure into a [Notice::CommandDropped].
    pub fn send_command(&mut self, command: Command) -> Result<(), LinkError> {
        self.link.send(command).map_err(|error| {
            print::warn(format!("Dropped {}: {}", command, error));
            self.notices.push(Notice::CommandDropped { command, error: error.clone() });
            error
        })
    }

    /// A fresh session is up.
    ///
    /// ## Behavior
    /// With `init`, sends `INIT` and resets the car model to the base floor. Re-asserts an
    /// active override, asks for `STATUS`, and retries dispatch of what is still live.
    pub fn on_connected(&mut self, init: bool) {
        if init && self.send_command(Command::Init).is_ok() {
            self.car.reset_to_base(self.settings.base_floor);
        }
        if self.emergency.active() {
            self.propagate_emergency(true);
        }
        let _ = self.send_command(Command::Status);
        self.retry_dispatch();
    }

    /// The link dropped a queued command.
    ///
    /// A lost `MOVE` for the current target puts the car back to idle. The request stays
    /// live and is dispatched again after reconnection.
    pub fn on_command_failed(&mut self, command: Command, error: LinkError) {
        print::warn(format!("{} never reached the car: {}", command, error));
        if let Command::Move(floor) = command {
            let state = self.car.state();
            if state.moving() && state.target_floor() == Some(floor) {
                self.car.abort_move();
            }
        }
        self.notices.push(Notice::CommandDropped { command, error });
    }

    /// `CALIBRATE`
    pub fn calibrate(&mut self) -> Result<(), LinkError> {
        self.send_command(Command::Calibrate)
    }

    /// `INIT`, and the model follows to the base floor.
    pub fn initialize_to_base(&mut self) -> Result<(), LinkError> {
        self.send_command(Command::Init)?;
        self.car.reset_to_base(self.settings.base_floor);
        Ok(())
    }

    /// `STOP`. The move is abandoned, live requests wait for the next dispatch.
    pub fn stop(&mut self) -> Result<(), LinkError> {
        self.send_command(Command::Stop)?;
        self.car.abort_move();
        self.stopped = true;
        self.dispatch_due = false;
        self.settle.timer_stop();
        Ok(())
    }

    /// `TEST`
    pub fn test_motor(&mut self) -> Result<(), LinkError> {
        self.send_command(Command::Test)
    }

    /// `STATUS`
    pub fn request_status(&mut self) -> Result<(), LinkError> {
        self.send_command(Command::Status)
    }

    /// Asks the link for a fresh connection cycle.
    pub fn reconnect(&mut self) -> Result<(), LinkError> {
        self.link.reconnect().map_err(|error| {
            print::warn(format!("Reconnect request failed: {}", error));
            error
        })
    }

    /// `true` if `floor` is requested by `origin`, live or held.
    pub fn is_requested(&self, floor: i32, origin: Origin) -> bool {
        self.live.contains(floor, origin) || self.pending.iter().any(|r| r.key() == (floor, origin))
    }
}
