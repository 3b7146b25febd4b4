//! ## Printing Module
//!
//! This module is only here to make logging in the terminal easier to read.
//! It prints in appropriate colors depending on the situation, and provides a
//! print-format for the [StatusSnapshot] of the car.
//!
//! Every level is gated by a switch in [config]. A poisoned switch counts as "on", so
//! printing never panics the control loop.
use crate::config;
use crate::elevator_logic::car::Direction;
use crate::elevator_logic::StatusSnapshot;
use ansi_term::Colour::{self, Cyan, Green, Purple, Red, White, Yellow};

use prettytable::{row, Table};
use unicode_width::UnicodeWidthStr;

/// Prints a message in a specified color to the terminal.
///
/// If `PRINT_ELSE_ON` is `false`, the message will not be printed.
///
/// ## Parameters
/// - `msg`: The message to print.
/// - `color`: The color to use for the text output.
pub fn color(msg: String, color: Colour) {
    if config::print_enabled(&config::PRINT_ELSE_ON) {
        println!("{}{}\n", color.paint("[CUSTOM]:  "), color.paint(msg));
    }
}

/// Prints an error message in red to the terminal.
///
/// If `PRINT_ERR_ON` is `false`, the message will not be printed.
///
/// ## Parameters
/// - `msg`: The error message to print.
///
/// ## Terminal output
/// - "\[ERROR\]:   {}", msg
///
/// ## Example
/// ```
/// use elevatorlink::print;
///
/// print::err("Something went wrong!".to_string());
/// ```
pub fn err(msg: String) {
    if config::print_enabled(&config::PRINT_ERR_ON) {
        println!("{}{}\n", Red.paint("[ERROR]:   "), Red.paint(msg));
    }
}

/// Prints a warning message in yellow to the terminal.
///
/// If `PRINT_WARN_ON` is `false`, the message will not be printed.
///
/// ## Parameters
/// - `msg`: The warning message to print.
///
/// ## Terminal output
/// - "\[WARNING\]: {}", msg
pub fn warn(msg: String) {
    if config::print_enabled(&config::PRINT_WARN_ON) {
        println!("{}{}\n", Yellow.paint("[WARNING]: "), Yellow.paint(msg));
    }
}

/// Prints a success message in green to the terminal.
///
/// If `PRINT_OK_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[OK\]:      {}", msg
pub fn ok(msg: String) {
    if config::print_enabled(&config::PRINT_OK_ON) {
        println!("{}{}\n", Green.paint("[OK]:      "), Green.paint(msg));
    }
}

/// Prints an informational message in light blue to the terminal.
///
/// If `PRINT_INFO_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[INFO\]:    {}", msg
pub fn info(msg: String) {
    let light_blue = Colour::RGB(102, 178, 255);
    if config::print_enabled(&config::PRINT_INFO_ON) {
        println!("{}{}\n", light_blue.paint("[INFO]:    "), light_blue.paint(msg));
    }
}

/// Prints a link trace message in pink (frames sent, connection attempts).
///
/// If `PRINT_ELSE_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[LINK\]:    {}", msg
pub fn link(msg: String) {
    let pink = Colour::RGB(255, 51, 255);
    if config::print_enabled(&config::PRINT_ELSE_ON) {
        println!("{}{}\n", pink.paint("[LINK]:    "), pink.paint(msg));
    }
}

/// Prints a scheduling decision in orange.
///
/// If `PRINT_ELSE_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[DISPATCH\]: {}", msg
pub fn dispatch(msg: String) {
    let orange = Colour::RGB(255, 153, 51);
    if config::print_enabled(&config::PRINT_ELSE_ON) {
        println!("{}{}\n", orange.paint("[DISPATCH]: "), orange.paint(msg));
    }
}

/// Pads the input text to a fixed display width using spaces.
///
/// Accounts for characters that may take more than one column width (e.g. Unicode symbols),
/// ensuring aligned text in terminal-based tables or UI output.
///
/// # Parameters
/// - `text`: The string to pad.
/// - `width`: The total width the text should occupy (including padding).
fn pad_text(text: &str, width: usize) -> String {
    let visible_width = UnicodeWidthStr::width(text);
    let padding = width.saturating_sub(visible_width);
    format!("{}{}", text, " ".repeat(padding))
}

/// Green `on` / red `off`, padded to `width` before coloring.
fn colored_flag(value: bool, width: usize) -> String {
    let raw_text = if value { "on" } else { "off" };
    let padded = pad_text(raw_text, width);
    if value {
        Red.paint(padded).to_string()
    } else {
        Green.paint(padded).to_string()
    }
}

fn motion_label(snapshot: &StatusSnapshot, width: usize) -> String {
    let text = match (snapshot.moving, snapshot.direction) {
        (false, _) => return Green.paint(pad_text("Idle", width)).to_string(),
        (true, Direction::Up) => "Moving up",
        (true, Direction::Down) => "Moving down",
        (true, Direction::Idle) => "Moving ?",
    };
    Yellow.paint(pad_text(text, width)).to_string()
}

/// Logs a [StatusSnapshot] as a status box followed by a table of the requests.
///
/// # Behavior
/// - Returns early if `config::PRINT_STATUS_ON` is false.
/// - The box shows floor, target, motion, the car's emergency flag, both override inputs
///   and the link state.
/// - The table lists live requests first, then the ones held by the override.
pub fn status(snapshot: &StatusSnapshot) {
    if !config::print_enabled(&config::PRINT_STATUS_ON) {
        return;
    }

    const W: usize = 12;
    let target = snapshot.target_floor.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
    let link = if snapshot.connected {
        Green.paint(pad_text("connected", W)).to_string()
    } else {
        Red.paint(pad_text("down", W)).to_string()
    };

    println!("{}", Purple.bold().paint("┌────────────────────────────────┐"));
    println!("{}", Purple.bold().paint("│           CAR STATUS           │"));
    println!("{}", Purple.bold().paint("└────────────────────────────────┘"));
    println!("┌──────────────────┬─────────────┐");
    println!("│ Floor            │ {} │", pad_text(&snapshot.current_floor.to_string(), W - 1));
    println!("│ Target           │ {} │", pad_text(&target, W - 1));
    println!("│ Motion           │ {}│", motion_label(snapshot, W));
    println!("│ Car emergency    │ {}│", colored_flag(snapshot.emergency, W));
    println!("│ Override manual  │ {}│", colored_flag(snapshot.override_manual, W));
    println!("│ Override auto    │ {}│", colored_flag(snapshot.override_auto, W));
    println!("│ Link             │ {}│", link);
    println!("└──────────────────┴─────────────┘");

    if snapshot.live.is_empty() && snapshot.held.is_empty() {
        println!("{}\n", White.dimmed().paint("No outstanding requests"));
        return;
    }

    let mut table = Table::new();
    table.set_titles(row!["Floor", "Origin", "State"]);
    for r in &snapshot.live {
        table.add_row(row![r.floor, r.origin, Cyan.paint("live")]);
    }
    for r in &snapshot.held {
        table.add_row(row![r.floor, r.origin, Yellow.paint("held")]);
    }
    table.printstd();
    println!();
}
