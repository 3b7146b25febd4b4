//! The I/O domain of the link.
//!
//! One tokio task owns the stream. It frames and parses inbound lines, writes outbound
//! frames under a bounded timeout, pings the car, and reconnects after a loss. The
//! control loop only ever sees [LinkEvent]s coming out of it.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, sleep_until, timeout, timeout_at, Instant, MissedTickBehavior};

use super::connector::{BoxedStream, Connector};
use super::protocol::{parse_line, Command, LineBuffer, Telemetry};
use super::{LinkEvent, LinkRequest, LinkSession};
use crate::config::{self, LinkSettings};
use crate::error::LinkError;
use crate::print;

/// A stream that has passed the handshake.
pub(super) struct Connection {
    pub endpoint: String,
    pub stream: BoxedStream,
    pub lines: LineBuffer,
    /// Lines that arrived in the same read as the `PONG`
    pub backlog: Vec<String>,
}

/// Why [IoTask::serve] returned.
enum Ended {
    Closed,
    Reconnect,
    Lost(String),
}

/// State owned by the I/O task.
pub(super) struct IoTask<C: Connector> {
    pub connector: C,
    pub settings: LinkSettings,
    pub requests_rx: mpsc::Receiver<LinkRequest>,
    pub events_tx: mpsc::Sender<LinkEvent>,
    pub session_tx: watch::Sender<LinkSession>,
}

/// Writes one newline-terminated frame, bounded by `limit`.
pub(super) async fn write_frame<W>(w: &mut W, command: &Command, limit: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    timeout(limit, async {
        w.write_all(command.to_frame().as_bytes()).await?;
        w.flush().await
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
}

/// Sends `PING` and waits for `PONG`.
///
/// ## Returns
/// The line buffer (holding any partial line) and the complete lines that followed the `PONG`.
async fn handshake<S>(stream: &mut S, settings: &LinkSettings) -> io::Result<(LineBuffer, Vec<String>)>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    if !settings.open_settle().is_zero() {
        sleep(settings.open_settle()).await;
    }
    write_frame(stream, &Command::Ping, settings.write_timeout()).await?;

    let mut lines = LineBuffer::new();
    let mut buf = [0u8; config::READ_BUFFER];
    let deadline = Instant::now() + settings.handshake_timeout();
    loop {
        let n = timeout_at(deadline, stream.read(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no PONG before handshake timeout"))??;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed during handshake"));
        }
        let mut received = lines.push(&buf[..n]).into_iter();
        while let Some(line) = received.next() {
            if line == "PONG" {
                return Ok((lines, received.collect()));
            }
            print::link(format!("<- {} (before handshake)", line));
        }
    }
}

/// Tries every candidate endpoint of `connector` once.
///
/// ## Returns
/// The first connection whose endpoint answered the handshake, or
/// [LinkError::Unavailable] listing why each candidate failed.
pub(super) async fn establish<C: Connector>(connector: &mut C, settings: &LinkSettings) -> Result<Connection, LinkError> {
    let candidates = connector.candidates();
    if candidates.is_empty() {
        return Err(LinkError::Unavailable("no candidate endpoints".to_string()));
    }

    let mut failures: Vec<String> = Vec::new();
    for endpoint in candidates {
        print::link(format!("Trying endpoint {}", endpoint));
        let mut stream = match connector.open(&endpoint).await {
            Ok(s) => s,
            Err(e) => {
                print::warn(format!("Could not open {}: {}", endpoint, e));
                failures.push(format!("{}: {}", endpoint, e));
                continue;
            }
        };
        match handshake(&mut stream, settings).await {
            Ok((lines, backlog)) => {
                print::ok(format!("Car controller answered on {}", endpoint));
                return Ok(Connection { endpoint, stream, lines, backlog });
            }
            Err(e) => {
                print::warn(format!("No handshake on {}: {}", endpoint, e));
                failures.push(format!("{}: {}", endpoint, e));
                let _ = stream.shutdown().await;
            }
        }
    }
    Err(LinkError::Unavailable(failures.join("; ")))
}

impl<C: Connector> IoTask<C> {
    /// Runs until a `Close` request arrives or the control loop drops its handle.
    ///
    /// ## Behavior
    /// - With a connection: serves it. On loss or a `Reconnect` request, reports
    ///   `ConnectionChanged(false, reason)` and enters the reconnection cycle.
    /// - Without one (start-up failure or exhausted reconnection): waits for `Reconnect`.
    ///   Commands arriving meanwhile are answered with `CommandFailed(NotConnected)`.
    pub async fn run(mut self, initial: Option<Connection>, connect_now: bool) {
        let mut conn = initial;
        if conn.is_none() && connect_now {
            match self.reconnect_cycle().await {
                Some(next) => conn = next,
                None => return,
            }
        }

        loop {
            match conn.take() {
                Some(c) => {
                    let reason = match self.serve(c).await {
                        Ended::Closed => {
                            self.mark_disconnected();
                            print::link("Link closed".to_string());
                            return;
                        }
                        Ended::Reconnect => "reconnect requested".to_string(),
                        Ended::Lost(reason) => {
                            print::err(format!("Link to car controller lost: {}", reason));
                            reason
                        }
                    };
                    self.mark_disconnected();
                    self.emit(LinkEvent::ConnectionChanged { connected: false, reason }).await;
                    match self.reconnect_cycle().await {
                        Some(next) => conn = next,
                        None => return,
                    }
                }
                None => match self.requests_rx.recv().await {
                    None | Some(LinkRequest::Close) => return,
                    Some(LinkRequest::Reconnect) => match self.reconnect_cycle().await {
                        Some(next) => conn = next,
                        None => return,
                    },
                    Some(LinkRequest::Send(command)) => {
                        self.emit(LinkEvent::CommandFailed { command, error: LinkError::NotConnected }).await;
                    }
                },
            }
        }
    }

    /// Bounded reconnection.
    ///
    /// ## Returns
    /// - `Some(Some(conn))`: reconnected
    /// - `Some(None)`: every attempt failed, `ReconnectExhausted` has been reported
    /// - `None`: a `Close` request arrived, the task should end
    async fn reconnect_cycle(&mut self) -> Option<Option<Connection>> {
        let attempts = self.settings.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.reject_queued().await {
                return None;
            }
            print::link(format!("Connection attempt {}/{}", attempt, attempts));
            match establish(&mut self.connector, &self.settings).await {
                Ok(conn) => {
                    self.mark_connected(&conn.endpoint);
                    let reason = format!("connected to {}", conn.endpoint);
                    self.emit(LinkEvent::ConnectionChanged { connected: true, reason }).await;
                    return Some(Some(conn));
                }
                Err(e) => print::warn(format!("Attempt {} failed: {}", attempt, e)),
            }
            if attempt < attempts && !self.pause(self.settings.reconnect_delay()).await {
                return None;
            }
        }
        print::err(format!("Giving up on the car controller after {} attempts", attempts));
        self.emit(LinkEvent::ReconnectExhausted { attempts }).await;
        Some(None)
    }

    /// Sleeps between attempts while still answering requests. `false` on `Close`.
    async fn pause(&mut self, delay: Duration) -> bool {
        let wake = sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => return true,
                req = self.requests_rx.recv() => match req {
                    None | Some(LinkRequest::Close) => return false,
                    Some(LinkRequest::Reconnect) => {},
                    Some(LinkRequest::Send(command)) => {
                        self.emit(LinkEvent::CommandFailed { command, error: LinkError::NotConnected }).await;
                    }
                },
            }
        }
    }

    /// Drops every queued command with `NotConnected`. `false` on `Close`.
    async fn reject_queued(&mut self) -> bool {
        loop {
            match self.requests_rx.try_recv() {
                Ok(LinkRequest::Send(command)) => {
                    self.emit(LinkEvent::CommandFailed { command, error: LinkError::NotConnected }).await;
                }
                Ok(LinkRequest::Reconnect) => {}
                Ok(LinkRequest::Close) => return false,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Receive loop of one session.
    async fn serve(&mut self, conn: Connection) -> Ended {
        let Connection { endpoint, stream, mut lines, backlog } = conn;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let write_limit = self.settings.write_timeout();
        let heartbeat = self.settings.heartbeat_timeout();

        for line in backlog {
            self.handle_line(&line).await;
        }

        let period = self.settings.ping_interval();
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; config::READ_BUFFER];
        let mut last_heard = Instant::now();

        loop {
            let silence = sleep_until(last_heard + heartbeat);
            tokio::pin!(silence);

            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return Ended::Lost(format!("{} closed the stream", endpoint)),
                    Ok(n) => {
                        last_heard = Instant::now();
                        self.session_tx.send_modify(|s| s.last_heartbeat = last_heard);
                        for line in lines.push(&buf[..n]) {
                            self.handle_line(&line).await;
                        }
                    }
                    Err(e) => return Ended::Lost(format!("read failed: {}", e)),
                },
                req = self.requests_rx.recv() => match req {
                    None | Some(LinkRequest::Close) => {
                        let _ = writer.shutdown().await;
                        return Ended::Closed;
                    }
                    Some(LinkRequest::Reconnect) => {
                        let _ = writer.shutdown().await;
                        return Ended::Reconnect;
                    }
                    Some(LinkRequest::Send(command)) => {
                        if let Err(e) = write_frame(&mut writer, &command, write_limit).await {
                            let error = LinkError::CommandRejected { command: command.to_string(), reason: e.to_string() };
                            self.emit(LinkEvent::CommandFailed { command, error }).await;
                            return Ended::Lost(format!("write failed: {}", e));
                        }
                        print::link(format!("-> {}", command));
                    }
                },
                _ = ping.tick() => {
                    if let Err(e) = write_frame(&mut writer, &Command::Ping, write_limit).await {
                        return Ended::Lost(format!("ping failed: {}", e));
                    }
                }
                _ = &mut silence => {
                    return Ended::Lost(format!("no data for {:?}", heartbeat));
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        match parse_line(line) {
            Ok(Telemetry::Pong) => {}
            Ok(telemetry) => self.emit(LinkEvent::Telemetry(telemetry)).await,
            Err(malformed) => print::warn(malformed.to_string()),
        }
    }

    async fn emit(&mut self, event: LinkEvent) {
        // Kontroll-løkka er borte om denne feilar, då er det ingen å varsle
        let _ = self.events_tx.send(event).await;
    }

    fn mark_connected(&self, endpoint: &str) {
        let endpoint = endpoint.to_string();
        self.session_tx.send_modify(|s| {
            s.connected = true;
            s.last_heartbeat = Instant::now();
            s.endpoint = Some(endpoint);
        });
    }

    fn mark_disconnected(&self) {
        self.session_tx.send_modify(|s| {
            s.connected = false;
            s.endpoint = None;
        });
    }
}
