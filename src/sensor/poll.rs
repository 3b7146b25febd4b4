use crossbeam_channel as cbc;
use std::thread;
use std::time;

use super::{OccupancyGate, OccupancySource};
use crate::print;

/// Samples `source` every `period` and sends each asserted/cleared edge on `ch`.
///
/// Meant for its own thread. Returns once the receiving side is dropped.
pub fn occupancy<S: OccupancySource>(mut source: S, mut gate: OccupancyGate, ch: cbc::Sender<bool>, period: time::Duration) {
    loop {
        if let Some(ratio) = source.sample() {
            if let Some(asserted) = gate.update(ratio) {
                print::info(format!("Occupancy {:.2} -> {}", ratio, if asserted { "asserted" } else { "cleared" }));
                if ch.send(asserted).is_err() {
                    return;
                }
            }
        }
        thread::sleep(period)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Plays back a script, then flips between empty and full forever.
    struct Scripted(VecDeque<f64>, bool);

    impl OccupancySource for Scripted {
        fn sample(&mut self) -> Option<f64> {
            self.0.pop_front().or_else(|| {
                self.1 = !self.1;
                Some(if self.1 { 0.5 } else { 0.0 })
            })
        }
    }

    #[test]
    fn edges_arrive_in_order_and_thread_ends_with_receiver() {
        let (tx, rx) = cbc::unbounded();
        let source = Scripted(VecDeque::from(vec![0.0, 0.2, 0.3, 0.1, 0.5]), true);
        let worker = thread::spawn(move || occupancy(source, OccupancyGate::new(0.15), tx, time::Duration::from_millis(1)));

        let edges: Vec<bool> = (0..3).map(|_| rx.recv_timeout(time::Duration::from_secs(2)).unwrap()).collect();
        assert_eq!(edges, vec![true, false, true]);

        drop(rx);
        worker.join().unwrap();
    }
}
