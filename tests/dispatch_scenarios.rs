//! End-to-end runs through the public API.

use std::cell::RefCell;
use std::time::Duration;

use crossbeam_channel as cbc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::time::{sleep, timeout};

use elevatorlink::config::{DispatchSettings, LinkSettings};
use elevatorlink::elevator_logic::request::{dispatch_order, Origin};
use elevatorlink::elevator_logic::car::Direction;
use elevatorlink::elevator_logic::{run_controller, Admission, Controller};
use elevatorlink::error::{InvalidRequest, LinkError};
use elevatorlink::link::connector::QueuedConnector;
use elevatorlink::link::protocol::parse_line;
use elevatorlink::link::{CarLink, Command, LinkEvent, LinkManager, Telemetry};

#[derive(Default)]
struct Recorder {
    sent: RefCell<Vec<Command>>,
}

impl CarLink for Recorder {
    fn send(&self, command: Command) -> Result<(), LinkError> {
        self.sent.borrow_mut().push(command);
        Ok(())
    }
    fn reconnect(&self) -> Result<(), LinkError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
}

fn controller() -> Controller<Recorder> {
    let settings = DispatchSettings { settle_delay_ms: 0, ..DispatchSettings::default() };
    Controller::new(Recorder::default(), settings, true)
}

fn moves(c: &Controller<Recorder>) -> Vec<i32> {
    c.scheduler()
        .link()
        .sent
        .borrow()
        .iter()
        .filter_map(|cmd| match cmd {
            Command::Move(f) => Some(*f),
            _ => None,
        })
        .collect()
}

fn pos(c: &mut Controller<Recorder>, floor: i32) {
    c.handle_link_event(LinkEvent::Telemetry(Telemetry::Position(floor)));
}

#[test]
fn nearest_hall_call_first_then_the_rest() {
    let mut c = controller();

    assert_eq!(c.add_request(3, Origin::ExternalUp), Ok(Admission::Dispatched(Direction::Up)));
    assert_eq!(c.add_request(1, Origin::Internal), Err(InvalidRequest::AlreadyAtFloor(1)));
    assert_eq!(c.status().live.len(), 1);
    assert_eq!(c.add_request(2, Origin::ExternalDown), Ok(Admission::Retargeted));
    assert_eq!(c.status().target_floor, Some(2));

    pos(&mut c, 2);
    c.tick();
    assert_eq!(c.status().target_floor, Some(3));
    pos(&mut c, 3);

    assert_eq!(moves(&c), vec![3, 2, 3]);
    assert!(c.status().live.is_empty());
}

#[test]
fn car_call_is_served_after_a_mid_trip_stop() {
    for (far, near) in [(3, 2), (1, 2)] {
        let settings = DispatchSettings {
            settle_delay_ms: 0,
            base_floor: if far == 3 { 1 } else { 3 },
            ..DispatchSettings::default()
        };
        let mut c = Controller::new(Recorder::default(), settings, false);
        let hall = if far > near { Origin::ExternalUp } else { Origin::ExternalDown };

        c.add_request(far, Origin::Internal).unwrap();
        assert_eq!(c.add_request(near, hall), Ok(Admission::Retargeted));

        pos(&mut c, near);
        c.tick();
        pos(&mut c, far);
        assert_eq!(moves(&c), vec![far, near, far]);
        assert!(c.status().live.is_empty());
    }
}

#[test]
fn same_floor_car_call_never_grows_the_live_set() {
    let mut c = controller();
    c.add_request(3, Origin::ExternalDown).unwrap();
    let before = c.status().live.len();
    for _ in 0..3 {
        let current = c.status().current_floor;
        assert!(c.add_request(current, Origin::Internal).is_err());
    }
    assert_eq!(c.status().live.len(), before);
}

#[test]
fn hall_calls_deduplicate_by_direction() {
    let mut c = controller();
    c.add_request(3, Origin::Internal).unwrap();
    c.add_request(2, Origin::ExternalUp).unwrap();
    assert_eq!(c.add_request(2, Origin::ExternalUp), Ok(Admission::Duplicate));
    c.add_request(2, Origin::ExternalDown).unwrap();

    let at_two: Vec<_> = c.status().live.iter().filter(|r| r.floor == 2).map(|r| r.origin).collect();
    assert_eq!(at_two, vec![Origin::ExternalUp, Origin::ExternalDown]);
}

#[test]
fn release_moves_every_held_call_into_the_live_set() {
    let mut c = controller();
    c.set_auto_emergency(true);
    c.add_request(3, Origin::ExternalDown).unwrap();
    c.add_request(2, Origin::ExternalUp).unwrap();
    c.add_request(3, Origin::ExternalDown).unwrap();
    c.add_request(2, Origin::Internal).unwrap();

    let held = c.status().held;
    assert_eq!(held.len(), 2);

    c.set_auto_emergency(false);
    let snap = c.status();
    assert!(snap.held.is_empty());
    for entry in &held {
        assert_eq!(snap.live.iter().filter(|r| *r == entry).count(), 1);
    }
    assert_eq!(snap.live.len(), 3);
}

#[test]
fn scan_picks_nearest_then_continues_upwards() {
    assert_eq!(dispatch_order(&[3, 2], 1, Direction::Idle)[0], 2);
    assert_eq!(dispatch_order(&[2, 3], 1, Direction::Up), vec![2, 3]);
}

#[test]
fn status_line_updates_the_car() {
    let mut c = controller();
    let telemetry = parse_line("STATUS:2:3:MOVING:NORMAL").unwrap();
    c.handle_link_event(LinkEvent::Telemetry(telemetry));

    let snap = c.status();
    assert_eq!(snap.current_floor, 2);
    assert_eq!(snap.target_floor, Some(3));
    assert!(snap.moving);
    assert!(!snap.emergency);
}

/// Car controller that walks straight to every floor it is sent to.
fn spawn_car(stream: DuplexStream) {
    tokio::spawn(async move {
        let (r, mut w) = tokio::io::split(stream);
        let mut lines = BufReader::new(r).lines();
        let mut floor = 1;
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = match line.as_str() {
                "PING" => "PONG\n".to_string(),
                "INIT" => {
                    floor = 1;
                    String::new()
                }
                "STATUS" => format!("STATUS:{floor}:{floor}:IDLE:NORMAL\n"),
                l if l.starts_with("MOVE:") => {
                    floor = l[5..].parse().unwrap_or(floor);
                    format!("MOVE_START:{floor}\nPOS:{floor}\nMOVE_COMPLETE:{floor}\n")
                }
                _ => String::new(),
            };
            if w.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });
}

#[tokio::test]
async fn control_loop_drives_a_car_over_the_link() {
    let (ours, theirs) = tokio::io::duplex(4096);
    spawn_car(theirs);
    let mut connector = QueuedConnector::new();
    connector.push("car", ours);

    let link_settings = LinkSettings { open_settle_ms: 0, ..LinkSettings::default() };
    let (manager, link_rx) = LinkManager::connect(connector, link_settings).await.unwrap();

    let settings = DispatchSettings { settle_delay_ms: 0, ..DispatchSettings::default() };
    let controller = Controller::new(manager.handle(), settings, true);
    let (handle, input_rx) = controller.control_channel();
    let (_occ_tx, occ_rx) = cbc::unbounded::<bool>();
    let control = tokio::spawn(run_controller(controller, link_rx, occ_rx, input_rx));

    handle.add_request(3, Origin::Internal);
    let arrived = timeout(Duration::from_secs(3), async {
        loop {
            let s = handle.status();
            if s.connected && s.current_floor == 3 && s.live.is_empty() && !s.moving {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(arrived.is_ok(), "car never reached floor 3: {:?}", handle.status());

    handle.shutdown();
    let controller = control.await.unwrap();
    assert_eq!(controller.status().current_floor, 3);
    manager.close().await;
}
