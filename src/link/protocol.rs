//! Line protocol spoken with the car controller.
//!
//! Every frame is one ASCII line terminated by `\n`, shaped `TAG:arg1:arg2:...`.
//!
//! # Outbound
//! `PING`, `INIT`, `MOVE:<floor>`, `STOP`, `CALIBRATE`, `EMERGENCY:ON|OFF`, `STATUS`, `TEST`
//!
//! # Inbound
//! `PONG`, `POS:<floor>`, `MOVE_START:<floor>`, `MOVE_COMPLETE:<floor>`, `PROGRESS:<percent>`,
//! `STATUS:<current>:<target>:MOVING|IDLE:EMERGENCY|NORMAL`, `LIMIT:top|bottom`, `ERROR:<text>`.
//! Anything else is an informational log line.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::MalformedTelemetry;

/// Commands sent to the car controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Liveness check, answered by `PONG`
    Ping,
    /// Set the controller's position to the base floor without moving the motor
    Init,
    /// Travel to the given floor
    Move(i32),
    /// Stop the motor
    Stop,
    /// Run the limit-switch calibration
    Calibrate,
    /// Switch the controller's emergency mode
    Emergency(bool),
    /// Ask for a full `STATUS` report
    Status,
    /// Motor self-test
    Test,
}

impl Command {
    /// The command as a frame, including the terminating newline.
    pub fn to_frame(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => write!(f, "PING"),
            Command::Init => write!(f, "INIT"),
            Command::Move(floor) => write!(f, "MOVE:{}", floor),
            Command::Stop => write!(f, "STOP"),
            Command::Calibrate => write!(f, "CALIBRATE"),
            Command::Emergency(on) => write!(f, "EMERGENCY:{}", if *on { "ON" } else { "OFF" }),
            Command::Status => write!(f, "STATUS"),
            Command::Test => write!(f, "TEST"),
        }
    }
}

/// Which end-of-travel switch fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum LimitSwitch {
    Top,
    Bottom,
}

/// Full state report from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct StatusReport {
    pub current: i32,
    pub target: i32,
    pub moving: bool,
    pub emergency: bool,
}

/// One parsed inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Telemetry {
    /// Answer to `PING`
    Pong,
    /// The car passed or reached a floor
    Position(i32),
    /// The controller started travelling towards a floor
    MoveStarted(i32),
    /// The controller finished travelling to a floor
    MoveCompleted(i32),
    /// Travel progress in percent
    Progress(u8),
    /// Full state report
    Status(StatusReport),
    /// A limit switch fired
    Limit(LimitSwitch),
    /// Controller-side error text
    Error(String),
    /// Any line without a known tag
    Info(String),
}

fn malformed(line: &str, reason: impl Into<String>) -> MalformedTelemetry {
    MalformedTelemetry { line: line.to_string(), reason: reason.into() }
}

fn parse_floor(line: &str, field: Option<&str>) -> Result<i32, MalformedTelemetry> {
    let field = field.ok_or_else(|| malformed(line, "missing floor"))?;
    field
        .trim()
        .parse::<i32>()
        .map_err(|e| malformed(line, format!("bad floor `{}`: {}", field, e)))
}

/// Parses one line (without its newline) into [Telemetry].
///
/// ## Returns
/// - `Ok(Telemetry::Info(..))` for lines with an unknown tag
/// - `Err(MalformedTelemetry)` when a known tag carries fields that do not parse
pub fn parse_line(line: &str) -> Result<Telemetry, MalformedTelemetry> {
    let line = line.trim();
    if line == "PONG" {
        return Ok(Telemetry::Pong);
    }

    let (tag, rest) = match line.split_once(':') {
        Some(split) => split,
        None => return Ok(Telemetry::Info(line.to_string())),
    };

    match tag {
        "POS" => parse_floor(line, Some(rest)).map(Telemetry::Position),
        "MOVE_START" => parse_floor(line, Some(rest)).map(Telemetry::MoveStarted),
        "MOVE_COMPLETE" => parse_floor(line, Some(rest)).map(Telemetry::MoveCompleted),
        "PROGRESS" => {
            let raw = rest.trim().trim_end_matches('%');
            match raw.parse::<u8>() {
                Ok(p) if p <= 100 => Ok(Telemetry::Progress(p)),
                Ok(p) => Err(malformed(line, format!("progress {} above 100", p))),
                Err(e) => Err(malformed(line, format!("bad progress `{}`: {}", rest, e))),
            }
        }
        "STATUS" => {
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() < 4 {
                return Err(malformed(line, format!("expected 4 fields, got {}", parts.len())));
            }
            let current = parse_floor(line, Some(parts[0]))?;
            let target = parse_floor(line, Some(parts[1]))?;
            let moving = match parts[2] {
                "MOVING" => true,
                "IDLE" => false,
                other => return Err(malformed(line, format!("bad motion flag `{}`", other))),
            };
            let emergency = match parts[3] {
                "EMERGENCY" => true,
                "NORMAL" => false,
                other => return Err(malformed(line, format!("bad emergency flag `{}`", other))),
            };
            Ok(Telemetry::Status(StatusReport { current, target, moving, emergency }))
        }
        "LIMIT" => match rest.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Telemetry::Limit(LimitSwitch::Top)),
            "bottom" => Ok(Telemetry::Limit(LimitSwitch::Bottom)),
            other => Err(malformed(line, format!("unknown limit switch `{}`", other))),
        },
        "ERROR" => Ok(Telemetry::Error(rest.to_string())),
        _ => Ok(Telemetry::Info(line.to_string())),
    }
}

/// Accumulates raw bytes and hands out complete lines.
///
/// Carriage returns are stripped and empty lines skipped. If a line grows past
/// [config::MAX_LINE_LEN] without a newline, the partial line is thrown away.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if !self.overflowed {
                    let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                self.buf.clear();
                self.overflowed = false;
            } else if self.buf.len() >= config::MAX_LINE_LEN {
                // Dropper resten av lina fram til neste '\n'
                self.overflowed = true;
                self.buf.clear();
            } else if !self.overflowed {
                self.buf.push(b);
            }
        }
        lines
    }

    /// Bytes waiting for their newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_render_as_frames() {
        assert_eq!(Command::Move(3).to_frame(), "MOVE:3\n");
        assert_eq!(Command::Emergency(true).to_string(), "EMERGENCY:ON");
        assert_eq!(Command::Emergency(false).to_string(), "EMERGENCY:OFF");
        assert_eq!(Command::Calibrate.to_string(), "CALIBRATE");
    }

    #[test]
    fn status_line_parses_into_report() {
        let t = parse_line("STATUS:2:3:MOVING:NORMAL").unwrap();
        assert_eq!(
            t,
            Telemetry::Status(StatusReport { current: 2, target: 3, moving: true, emergency: false })
        );
    }

    #[test]
    fn status_with_missing_fields_is_malformed() {
        let err = parse_line("STATUS:2:3:MOVING").unwrap_err();
        assert_eq!(err.line, "STATUS:2:3:MOVING");
        assert!(parse_line("STATUS:2:x:IDLE:NORMAL").is_err());
        assert!(parse_line("STATUS:2:3:RUNNING:NORMAL").is_err());
    }

    #[test]
    fn position_and_move_tags() {
        assert_eq!(parse_line("POS:2").unwrap(), Telemetry::Position(2));
        assert_eq!(parse_line("MOVE_START:3").unwrap(), Telemetry::MoveStarted(3));
        assert_eq!(parse_line("MOVE_COMPLETE:1\r").unwrap(), Telemetry::MoveCompleted(1));
        assert!(parse_line("POS:two").is_err());
    }

    #[test]
    fn progress_accepts_percent_sign() {
        assert_eq!(parse_line("PROGRESS:45%").unwrap(), Telemetry::Progress(45));
        assert_eq!(parse_line("PROGRESS:100").unwrap(), Telemetry::Progress(100));
        assert!(parse_line("PROGRESS:140").is_err());
    }

    #[test]
    fn limit_error_and_unknown_lines() {
        assert_eq!(parse_line("LIMIT:top").unwrap(), Telemetry::Limit(LimitSwitch::Top));
        assert_eq!(parse_line("LIMIT:BOTTOM").unwrap(), Telemetry::Limit(LimitSwitch::Bottom));
        assert!(parse_line("LIMIT:side").is_err());
        assert_eq!(parse_line("ERROR:motor stall: 3").unwrap(), Telemetry::Error("motor stall: 3".into()));
        assert_eq!(parse_line("Calibration done").unwrap(), Telemetry::Info("Calibration done".into()));
        assert_eq!(parse_line("FOO:bar").unwrap(), Telemetry::Info("FOO:bar".into()));
        assert_eq!(parse_line("PONG").unwrap(), Telemetry::Pong);
    }

    #[test]
    fn line_buffer_splits_across_chunks() {
        let mut lb = LineBuffer::new();
        assert!(lb.push(b"PO").is_empty());
        assert_eq!(lb.push(b"S:2\r\nPONG\n\nMOVE_"), vec!["POS:2".to_string(), "PONG".to_string()]);
        assert_eq!(lb.pending(), 5);
        assert_eq!(lb.push(b"COMPLETE:3\n"), vec!["MOVE_COMPLETE:3".to_string()]);
    }

    #[test]
    fn line_buffer_drops_oversized_line() {
        let mut lb = LineBuffer::new();
        let junk = vec![b'x'; config::MAX_LINE_LEN + 10];
        assert!(lb.push(&junk).is_empty());
        assert_eq!(lb.push(b"tail\nPOS:1\n"), vec!["POS:1".to_string()]);
    }
}
