use std::thread;
use std::time::Duration;

use crossbeam_channel as cbc;

use elevatorlink::elevator_logic::{self, Controller};
use elevatorlink::link::{connector::TcpConnector, LinkManager};
use elevatorlink::sensor::{poll, ManualSource, OccupancyGate};
use elevatorlink::{init, print};


#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = init::parse_args()?;
    let settings = init::load_settings(&args)?;

    print::info(format!("Starter heiskontroll mot {:?}", settings.endpoints));

    /* START ----------- Link til bilkontrolleren ---------------------- */
    let connector = TcpConnector::new(settings.endpoints.clone(), &settings.link);
    let (link, link_rx) = LinkManager::start(connector, settings.link.clone());
    /* SLUTT ----------- Link til bilkontrolleren ---------------------- */

    let controller = Controller::new(link.handle(), settings.dispatch.clone(), settings.link.init_on_connect);
    let (handle, input_rx) = controller.control_channel();

    /* START ----------- Belegg-sensor ---------------------- */
    let occupancy = ManualSource::new();
    let (occupancy_tx, occupancy_rx) = cbc::unbounded::<bool>();
    {
        let source = occupancy.clone();
        let gate = OccupancyGate::new(settings.sensor.threshold);
        let period = Duration::from_millis(settings.sensor.poll_ms);
        let _sensor_thread = thread::spawn(move || poll::occupancy(source, gate, occupancy_tx, period));
    }
    /* SLUTT ----------- Belegg-sensor ---------------------- */

    let _console = init::spawn_console(handle, occupancy);

    let controller = elevator_logic::run_controller(controller, link_rx, occupancy_rx, input_rx).await;
    print::info(format!("Stopped at floor {}", controller.status().current_floor));

    link.close().await;
    print::ok("Link closed".to_string());
    Ok(())
}
