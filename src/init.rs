//! Start-up: command line, settings, and the console front-end.

use std::{env, io::BufRead, path::PathBuf, thread};

use anyhow::{bail, Context};

use crate::config::{self, Settings};
use crate::elevator_logic::request::Origin;
use crate::elevator_logic::ControllerHandle;
use crate::print;
use crate::sensor::ManualSource;

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// `--config <path>`
    pub config: Option<PathBuf>,
    /// `--endpoint <host:port>`, repeatable. Replaces the configured list when given.
    pub endpoints: Vec<String>,
    /// `--quiet` turns off info and status printing
    pub quiet: bool,
}

/// Reads the process arguments. See [parse_args_from].
pub fn parse_args() -> anyhow::Result<Args> {
    parse_args_from(env::args().skip(1))
}

/// Parses arguments (without the program name).
///
/// ## Accepted
/// - `--config <path>`
/// - `--endpoint <host:port>` (any number of times)
/// - `--quiet`
///
/// # Returns
/// `Err` on an unknown flag or a flag missing its value.
pub fn parse_args_from<I>(args: I) -> anyhow::Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--endpoint" => {
                let addr = args.next().context("--endpoint needs an address")?;
                parsed.endpoints.push(addr);
            }
            "--quiet" => parsed.quiet = true,
            other => bail!("unknown argument '{}'", other),
        }
    }
    Ok(parsed)
}

/// Builds the runtime settings from the config file (if any) and the command line.
///
/// ## Behavior
/// - No `--config`: compiled-in defaults from [config].
/// - Endpoints given on the command line replace the ones from the file.
/// - `--quiet` turns off [config::PRINT_INFO_ON] and [config::PRINT_STATUS_ON].
pub fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    if !args.endpoints.is_empty() {
        settings.endpoints = args.endpoints.clone();
    }
    settings.validate()?;

    if args.quiet {
        config::set_print(&config::PRINT_INFO_ON, false);
        config::set_print(&config::PRINT_STATUS_ON, false);
    }
    Ok(settings)
}

/// One console line, parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// `<floor>`: car call
    Car(i32),
    /// `up <floor>`
    HallUp(i32),
    /// `down <floor>`
    HallDown(i32),
    /// `e`: toggle the manual emergency
    ToggleEmergency,
    /// `cal`
    Calibrate,
    /// `init`
    InitializeToBase,
    /// `stop`
    Stop,
    /// `test`
    TestMotor,
    /// `status`: print the snapshot as JSON and ask the car for a fresh one
    Status,
    /// `reconnect`
    Reconnect,
    /// `occ <ratio>`: feed the manual occupancy source
    Occupancy(f64),
    /// `quit`
    Quit,
    /// `help`
    Help,
}

const HELP: &str = "commands: <floor> | up <floor> | down <floor> | e | cal | init | stop | test | status | reconnect | occ <ratio> | quit";

/// Parses a console line. Blank lines give `Ok(None)`.
pub fn parse_console_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let floor = |w: &str| w.parse::<i32>().map_err(|_| format!("'{}' is not a floor", w));

    let cmd = match words.as_slice() {
        [] => return Ok(None),
        ["up", f] => ConsoleCommand::HallUp(floor(f)?),
        ["down", f] => ConsoleCommand::HallDown(floor(f)?),
        ["occ", r] => ConsoleCommand::Occupancy(r.parse().map_err(|_| format!("'{}' is not a ratio", r))?),
        ["e"] => ConsoleCommand::ToggleEmergency,
        ["cal"] => ConsoleCommand::Calibrate,
        ["init"] => ConsoleCommand::InitializeToBase,
        ["stop"] => ConsoleCommand::Stop,
        ["test"] => ConsoleCommand::TestMotor,
        ["status"] => ConsoleCommand::Status,
        ["reconnect"] => ConsoleCommand::Reconnect,
        ["quit"] | ["q"] => ConsoleCommand::Quit,
        ["help"] | ["?"] => ConsoleCommand::Help,
        [f] => ConsoleCommand::Car(floor(f)?),
        _ => return Err(format!("unknown command '{}'", line.trim())),
    };
    Ok(Some(cmd))
}

/// Runs one console command against the control handle.
///
/// # Returns
/// `false` when the console should stop reading.
pub fn apply_console_command(cmd: ConsoleCommand, handle: &ControllerHandle, occupancy: &ManualSource) -> bool {
    match cmd {
        ConsoleCommand::Car(f) => {
            handle.add_request(f, Origin::Internal);
        }
        ConsoleCommand::HallUp(f) => {
            handle.add_request(f, Origin::ExternalUp);
        }
        ConsoleCommand::HallDown(f) => {
            handle.add_request(f, Origin::ExternalDown);
        }
        ConsoleCommand::ToggleEmergency => {
            handle.toggle_manual_emergency();
        }
        ConsoleCommand::Calibrate => {
            handle.calibrate();
        }
        ConsoleCommand::InitializeToBase => {
            handle.initialize_to_base();
        }
        ConsoleCommand::Stop => {
            handle.stop();
        }
        ConsoleCommand::TestMotor => {
            handle.test_motor();
        }
        ConsoleCommand::Reconnect => {
            handle.reconnect();
        }
        ConsoleCommand::Occupancy(r) => occupancy.set(r),
        ConsoleCommand::Status => {
            match handle.status().to_json() {
                Ok(json) => println!("{}", json),
                Err(e) => print::err(format!("could not serialize status: {}", e)),
            }
            handle.request_status();
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {
            handle.shutdown();
            return false;
        }
    }
    true
}

/// Starts the console reader on its own thread.
///
/// Stdin is blocking, so this is a std thread like the hardware pollers. EOF on stdin
/// shuts the controller down.
pub fn spawn_console(handle: ControllerHandle, occupancy: ManualSource) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        print::info(HELP.to_string());
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    print::err(format!("console read failed: {}", e));
                    break;
                }
            };
            match parse_console_line(&line) {
                Ok(Some(cmd)) => {
                    if !apply_console_command(cmd, &handle, &occupancy) {
                        return;
                    }
                }
                Ok(None) => {}
                Err(msg) => print::warn(msg),
            }
        }
        handle.shutdown();
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        parse_args_from(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn flags_are_parsed() {
        let a = args(&["--endpoint", "a:1", "--quiet", "--endpoint", "b:2", "--config", "car.json"]).unwrap();
        assert_eq!(a.endpoints, vec!["a:1".to_string(), "b:2".to_string()]);
        assert!(a.quiet);
        assert_eq!(a.config, Some(PathBuf::from("car.json")));
    }

    #[test]
    fn missing_value_and_unknown_flag_fail() {
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--fast"]).is_err());
    }

    #[test]
    fn command_line_endpoints_replace_defaults() {
        let a = args(&["--endpoint", "10.0.0.2:9000"]).unwrap();
        let settings = load_settings(&a).unwrap();
        assert_eq!(settings.endpoints, vec!["10.0.0.2:9000".to_string()]);
        assert_eq!(settings.dispatch, config::DispatchSettings::default());
    }

    #[test]
    fn console_lines() {
        assert_eq!(parse_console_line("  "), Ok(None));
        assert_eq!(parse_console_line("3"), Ok(Some(ConsoleCommand::Car(3))));
        assert_eq!(parse_console_line("up 2"), Ok(Some(ConsoleCommand::HallUp(2))));
        assert_eq!(parse_console_line("down 3"), Ok(Some(ConsoleCommand::HallDown(3))));
        assert_eq!(parse_console_line("occ 0.4"), Ok(Some(ConsoleCommand::Occupancy(0.4))));
        assert_eq!(parse_console_line("e"), Ok(Some(ConsoleCommand::ToggleEmergency)));
        assert!(parse_console_line("up x").is_err());
        assert!(parse_console_line("fly 2").is_err());
    }
}
