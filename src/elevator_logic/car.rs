//! # Car state machine
//!
//! [Car] is the only owner of [CarState]. Scheduler and telemetry handling go through its
//! transition functions; nothing writes the fields directly.
//!
//! ```text
//!   Idle ──begin_move──▶ Moving(dir) ──arrival at target──▶ Idle
//!    ▲                                                        │
//!    └──────── set_emergency(false) ◀── EmergencyHeld ◀───────┘ set_emergency(true) (from any state)
//! ```
//!
//! Invariant: `moving ⇒ direction != Idle ⇒ target_floor.is_some()`.
//! `target_floor`, when set, is the floor last commanded with `MOVE`.

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::link::{CarLink, Command, StatusReport};

/// Direction of travel, or of the scheduler's sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Direction {
    Up,
    Down,
    Idle,
}

impl Direction {
    /// Direction from `from` towards `to`, `Idle` if they are equal.
    pub fn towards(from: i32, to: i32) -> Direction {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Direction::Up,
            std::cmp::Ordering::Less => Direction::Down,
            std::cmp::Ordering::Equal => Direction::Idle,
        }
    }
}

/// What the car is doing, as far as dispatch is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CarMode {
    Idle,
    Moving(Direction),
    /// Emergency asserted. Hall-call dispatch is refused, a physical motion already
    /// under way is left to finish.
    EmergencyHeld,
}

/// Why the car is being sent somewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// At least one rider inside asked for the floor
    CarCall,
    /// Only hall calls wait at the floor
    HallCall,
}

/// Model of the physical car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CarState {
    current_floor: i32,
    target_floor: Option<i32>,
    direction: Direction,
    moving: bool,
    emergency: bool,
}

impl CarState {
    #[allow(missing_docs)]
    pub fn current_floor(&self) -> i32 {
        self.current_floor
    }
    #[allow(missing_docs)]
    pub fn target_floor(&self) -> Option<i32> {
        self.target_floor
    }
    #[allow(missing_docs)]
    pub fn direction(&self) -> Direction {
        self.direction
    }
    #[allow(missing_docs)]
    pub fn moving(&self) -> bool {
        self.moving
    }
    #[allow(missing_docs)]
    pub fn emergency(&self) -> bool {
        self.emergency
    }
}

/// The car state machine.
#[derive(Debug, Clone)]
pub struct Car {
    state: CarState,
}

impl Car {
    /// An idle car standing at `floor`.
    pub fn new(floor: i32) -> Self {
        Car {
            state: CarState {
                current_floor: floor,
                target_floor: None,
                direction: Direction::Idle,
                moving: false,
                emergency: false,
            },
        }
    }

    #[allow(missing_docs)]
    pub fn state(&self) -> &CarState {
        &self.state
    }

    #[allow(missing_docs)]
    pub fn mode(&self) -> CarMode {
        if self.state.emergency {
            CarMode::EmergencyHeld
        } else if self.state.moving {
            CarMode::Moving(self.state.direction)
        } else {
            CarMode::Idle
        }
    }

    /// Commands the car to `target`. Also used to retarget a moving car.
    ///
    /// ## Returns
    /// The new direction of travel. On error the state is untouched and nothing is queued:
    /// - [DispatchError::Held]: a hall call while the emergency is asserted
    /// - [DispatchError::AlreadyThere]: `target` is the current floor
    /// - [DispatchError::Link]: the `MOVE` could not be handed to the link
    pub fn begin_move(&mut self, target: i32, kind: DispatchKind, link: &impl CarLink) -> Result<Direction, DispatchError> {
        if self.state.emergency && kind == DispatchKind::HallCall {
            return Err(DispatchError::Held);
        }
        let direction = Direction::towards(self.state.current_floor, target);
        if direction == Direction::Idle {
            return Err(DispatchError::AlreadyThere(target));
        }

        link.send(Command::Move(target))?;

        self.state.target_floor = Some(target);
        self.state.direction = direction;
        self.state.moving = true;
        Ok(direction)
    }

    /// `POS:<floor>`.
    ///
    /// ## Returns
    /// `true` if this confirmed arrival at the target.
    pub fn on_position(&mut self, floor: i32) -> bool {
        self.state.current_floor = floor;
        if self.state.moving && self.state.target_floor == Some(floor) {
            self.arrive();
            return true;
        }
        false
    }

    /// `MOVE_COMPLETE:<floor>`. The motor has stopped, so the car is idle wherever it is.
    ///
    /// ## Returns
    /// `true` if the car was moving.
    pub fn on_move_complete(&mut self, floor: i32) -> bool {
        self.state.current_floor = floor;
        if self.state.moving {
            self.arrive();
            return true;
        }
        false
    }

    /// `STATUS:...`. The report overrides the model.
    ///
    /// ## Returns
    /// `true` if the car was moving and the report has it idle at the old target.
    pub fn on_status(&mut self, report: &StatusReport) -> bool {
        let previous_target = self.state.target_floor;
        let was_moving = self.state.moving;

        self.state.current_floor = report.current;
        self.state.emergency = report.emergency;

        let direction = Direction::towards(report.current, report.target);
        if report.moving && direction != Direction::Idle {
            self.state.target_floor = Some(report.target);
            self.state.direction = direction;
            self.state.moving = true;
            return false;
        }

        self.state.moving = false;
        self.state.direction = Direction::Idle;
        self.state.target_floor = Some(report.target);
        was_moving && previous_target == Some(report.current)
    }

    /// Records the emergency flag. Motion is not touched.
    pub fn set_emergency(&mut self, on: bool) {
        self.state.emergency = on;
    }

    /// After `INIT`: idle at `base`, no target.
    pub fn reset_to_base(&mut self, base: i32) {
        self.state.current_floor = base;
        self.state.target_floor = None;
        self.state.direction = Direction::Idle;
        self.state.moving = false;
    }

    /// Gives up the current move (stop, or a `MOVE` that never reached the car).
    pub fn abort_move(&mut self) {
        self.state.target_floor = None;
        self.state.direction = Direction::Idle;
        self.state.moving = false;
    }

    fn arrive(&mut self) {
        self.state.moving = false;
        self.state.direction = Direction::Idle;
        self.state.target_floor = Some(self.state.current_floor);
    }
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::LinkError;
    use std::cell::{Cell, RefCell};

    /// Link that records what it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingLink {
        pub sent: RefCell<Vec<Command>>,
        pub down: Cell<bool>,
    }

    impl CarLink for RecordingLink {
        fn send(&self, command: Command) -> Result<(), LinkError> {
            if self.down.get() {
                return Err(LinkError::NotConnected);
            }
            self.sent.borrow_mut().push(command);
            Ok(())
        }
        fn reconnect(&self) -> Result<(), LinkError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            !self.down.get()
        }
    }

    #[test]
    fn move_then_arrive() {
        let link = RecordingLink::default();
        let mut car = Car::new(1);

        assert_eq!(car.begin_move(3, DispatchKind::CarCall, &link), Ok(Direction::Up));
        assert_eq!(car.mode(), CarMode::Moving(Direction::Up));
        assert_eq!(*link.sent.borrow(), vec![Command::Move(3)]);

        assert!(!car.on_position(2));
        assert!(car.state().moving());
        assert!(car.on_position(3));
        assert_eq!(car.mode(), CarMode::Idle);
        assert_eq!(car.state().target_floor(), Some(3));
    }

    #[test]
    fn failed_send_leaves_state_alone() {
        let link = RecordingLink::default();
        link.down.set(true);
        let mut car = Car::new(1);

        let before = *car.state();
        assert_eq!(
            car.begin_move(2, DispatchKind::HallCall, &link),
            Err(DispatchError::Link(LinkError::NotConnected))
        );
        assert_eq!(*car.state(), before);
    }

    #[test]
    fn held_car_refuses_hall_calls_only() {
        let link = RecordingLink::default();
        let mut car = Car::new(2);
        car.set_emergency(true);

        assert_eq!(car.mode(), CarMode::EmergencyHeld);
        assert_eq!(car.begin_move(3, DispatchKind::HallCall, &link), Err(DispatchError::Held));
        assert_eq!(car.begin_move(1, DispatchKind::CarCall, &link), Ok(Direction::Down));
        car.set_emergency(false);
        assert_eq!(car.mode(), CarMode::Moving(Direction::Down));
    }

    #[test]
    fn same_floor_is_not_a_move() {
        let link = RecordingLink::default();
        let mut car = Car::new(2);
        assert_eq!(car.begin_move(2, DispatchKind::CarCall, &link), Err(DispatchError::AlreadyThere(2)));
        assert!(link.sent.borrow().is_empty());
    }

    #[test]
    fn status_report_is_authoritative() {
        let mut car = Car::new(1);
        let report = StatusReport { current: 2, target: 3, moving: true, emergency: false };
        assert!(!car.on_status(&report));

        let s = car.state();
        assert_eq!((s.current_floor(), s.target_floor(), s.moving(), s.emergency()), (2, Some(3), true, false));
        assert_eq!(s.direction(), Direction::Up);

        let idle_at_target = StatusReport { current: 3, target: 3, moving: false, emergency: true };
        assert!(car.on_status(&idle_at_target));
        assert_eq!(car.mode(), CarMode::EmergencyHeld);
        assert!(!car.state().moving());
    }

    #[test]
    fn move_complete_stops_the_car_where_it_is() {
        let link = RecordingLink::default();
        let mut car = Car::new(1);
        car.begin_move(3, DispatchKind::CarCall, &link).unwrap();

        assert!(car.on_move_complete(2));
        assert_eq!(car.state().current_floor(), 2);
        assert_eq!(car.mode(), CarMode::Idle);
        assert!(!car.on_move_complete(2));
    }
}
