//! Floor requests and the SCAN ordering over them.
//!
//! This module holds the request bookkeeping used by the scheduler, and the pure
//! functions deciding which floor the car should go to next.
//!
//! # Overview
//! - [`RequestSet`]: the live requests, at most one per `(floor, origin)`.
//! - [`dispatch_order`]: SCAN ordering of the requested floors.
//! - [`admissible`]: whether a new floor can be served on the way to the current target.
//!
//! # Behaviour
//! The ordering logic is stateless and purely functional. It only looks at the set of
//! requested floors, the current floor and the sweep direction, so it can be tested
//! without a car or a link.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::car::Direction;

/// Where a floor request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Car call, from the panel inside the car
    Internal,
    /// Hall call, up button
    ExternalUp,
    /// Hall call, down button
    ExternalDown,
}

impl Origin {
    /// `true` for hall calls.
    pub fn is_external(&self) -> bool {
        !matches!(self, Origin::Internal)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Internal => write!(f, "car"),
            Origin::ExternalUp => write!(f, "hall up"),
            Origin::ExternalDown => write!(f, "hall down"),
        }
    }
}

/// One outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorRequest {
    /// Requested floor
    pub floor: i32,
    /// Who asked
    pub origin: Origin,
    /// When the request was first made
    pub created_at: Instant,
}

impl FloorRequest {
    #[allow(missing_docs)]
    pub fn new(floor: i32, origin: Origin) -> Self {
        Self { floor, origin, created_at: Instant::now() }
    }

    /// Dedup key. Internal and hall calls for the same floor coexist, and so do the
    /// two hall directions.
    pub fn key(&self) -> (i32, Origin) {
        (self.floor, self.origin)
    }
}

/// The live requests, in the order they were made.
#[derive(Debug, Clone, Default)]
pub struct RequestSet {
    requests: Vec<FloorRequest>,
}

impl RequestSet {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `request` unless an entry with the same `(floor, origin)` exists.
    ///
    /// # Returns
    /// `true` if the set grew.
    pub fn insert(&mut self, request: FloorRequest) -> bool {
        if self.contains(request.floor, request.origin) {
            return false;
        }
        self.requests.push(request);
        true
    }

    #[allow(missing_docs)]
    pub fn contains(&self, floor: i32, origin: Origin) -> bool {
        self.requests.iter().any(|r| r.key() == (floor, origin))
    }

    /// `true` if a car call is waiting at `floor`.
    pub fn has_internal_at(&self, floor: i32) -> bool {
        self.contains(floor, Origin::Internal)
    }

    /// Every requested floor, ascending, without duplicates.
    pub fn floors(&self) -> Vec<i32> {
        let mut floors: Vec<i32> = self.requests.iter().map(|r| r.floor).collect();
        floors.sort_unstable();
        floors.dedup();
        floors
    }

    /// Removes what an arrival at `floor` serves.
    ///
    /// Car calls at `floor` are always served. Hall calls at `floor` are kept while the
    /// emergency override is active.
    pub fn remove_served(&mut self, floor: i32, override_active: bool) -> Vec<FloorRequest> {
        let (served, kept): (Vec<_>, Vec<_>) = self
            .requests
            .drain(..)
            .partition(|r| r.floor == floor && (!r.origin.is_external() || !override_active));
        self.requests = kept;
        served
    }

    /// Moves every hall call out of the set, oldest first.
    pub fn take_external(&mut self) -> Vec<FloorRequest> {
        let (external, internal): (Vec<_>, Vec<_>) = self.requests.drain(..).partition(|r| r.origin.is_external());
        self.requests = internal;
        external
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[allow(missing_docs)]
    pub fn iter(&self) -> impl Iterator<Item = &FloorRequest> {
        self.requests.iter()
    }
}

/// SCAN ordering of `floors` as seen from `current`.
///
/// - `Up`: floors above ascending, then floors below descending
/// - `Down`: floors below descending, then floors above ascending
/// - `Idle`: nearest first, ties to the lower floor
///
/// A request at `current` always comes first.
///
/// # Parameters
/// - `floors`: Requested floors, any order, duplicates allowed
/// - `current`: Floor the car is at
/// - `direction`: Sweep direction
pub fn dispatch_order(floors: &[i32], current: i32, direction: Direction) -> Vec<i32> {
    let mut floors = floors.to_vec();
    floors.sort_unstable();
    floors.dedup();

    let here: Vec<i32> = floors.iter().copied().filter(|&f| f == current).collect();
    let mut above: Vec<i32> = floors.iter().copied().filter(|&f| f > current).collect();
    let mut below: Vec<i32> = floors.iter().copied().filter(|&f| f < current).collect();
    below.reverse();

    match direction {
        Direction::Up => here.into_iter().chain(above).chain(below).collect(),
        Direction::Down => here.into_iter().chain(below).chain(above).collect(),
        Direction::Idle => {
            above.append(&mut below);
            let mut rest = above;
            rest.sort_by_key(|&f| (f.abs_diff(current), f));
            here.into_iter().chain(rest).collect()
        }
    }
}

/// Whether a car heading from `current` to `target` can stop at `floor` without
/// reversing or overshooting.
///
/// `current < floor <= target` going up, `target <= floor < current` going down. Never
/// admissible for an idle car.
pub fn admissible(floor: i32, current: i32, target: i32, direction: Direction) -> bool {
    match direction {
        Direction::Up => current < floor && floor <= target,
        Direction::Down => target <= floor && floor < current,
        Direction::Idle => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_order_is_nearest_first_with_low_tiebreak() {
        assert_eq!(dispatch_order(&[3, 2], 1, Direction::Idle), vec![2, 3]);
        assert_eq!(dispatch_order(&[1, 3], 2, Direction::Idle), vec![1, 3]);
        assert_eq!(dispatch_order(&[5, 1, 4], 3, Direction::Idle), vec![4, 1, 5]);
    }

    #[test]
    fn ordering_survives_extreme_floors() {
        assert_eq!(dispatch_order(&[i32::MAX, 0], i32::MIN, Direction::Idle), vec![0, i32::MAX]);
    }

    #[test]
    fn up_sweep_continues_before_reversing() {
        assert_eq!(dispatch_order(&[2, 3], 1, Direction::Up), vec![2, 3]);
        assert_eq!(dispatch_order(&[1, 5, 4, 2], 3, Direction::Up), vec![4, 5, 2, 1]);
    }

    #[test]
    fn down_sweep_is_symmetric() {
        assert_eq!(dispatch_order(&[1, 5, 4, 2], 3, Direction::Down), vec![2, 1, 4, 5]);
    }

    #[test]
    fn current_floor_comes_first() {
        assert_eq!(dispatch_order(&[3, 2, 2], 2, Direction::Down), vec![2, 3]);
        assert_eq!(dispatch_order(&[1, 2], 2, Direction::Up), vec![2, 1]);
    }

    #[test]
    fn admission_only_between_current_and_target() {
        assert!(admissible(2, 1, 3, Direction::Up));
        assert!(admissible(3, 1, 3, Direction::Up));
        assert!(!admissible(1, 1, 3, Direction::Up));
        assert!(!admissible(4, 1, 3, Direction::Up));
        assert!(admissible(2, 3, 1, Direction::Down));
        assert!(!admissible(3, 3, 1, Direction::Down));
        assert!(!admissible(2, 1, 3, Direction::Idle));
    }

    #[test]
    fn same_direction_hall_calls_merge_opposite_ones_persist() {
        let mut set = RequestSet::new();
        assert!(set.insert(FloorRequest::new(2, Origin::ExternalUp)));
        assert!(!set.insert(FloorRequest::new(2, Origin::ExternalUp)));
        assert!(set.insert(FloorRequest::new(2, Origin::ExternalDown)));
        assert!(set.insert(FloorRequest::new(2, Origin::Internal)));
        assert_eq!(set.len(), 3);
        assert_eq!(set.floors(), vec![2]);
    }

    #[test]
    fn arrival_keeps_hall_calls_under_override() {
        let mut set = RequestSet::new();
        set.insert(FloorRequest::new(2, Origin::Internal));
        set.insert(FloorRequest::new(2, Origin::ExternalUp));
        set.insert(FloorRequest::new(3, Origin::Internal));

        let served = set.remove_served(2, true);
        assert_eq!(served.len(), 1);
        assert!(set.contains(2, Origin::ExternalUp));

        let served = set.remove_served(2, false);
        assert_eq!(served[0].origin, Origin::ExternalUp);
        assert_eq!(set.floors(), vec![3]);
    }

    #[test]
    fn take_external_leaves_car_calls() {
        let mut set = RequestSet::new();
        set.insert(FloorRequest::new(3, Origin::ExternalDown));
        set.insert(FloorRequest::new(1, Origin::Internal));
        set.insert(FloorRequest::new(2, Origin::ExternalUp));

        let taken = set.take_external();
        assert_eq!(taken.iter().map(|r| r.floor).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(set.len(), 1);
        assert!(set.has_internal_at(1));
    }
}
