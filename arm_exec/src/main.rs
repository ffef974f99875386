//! # Arm Control Executable
//!
//! Interactive console driving one or two servo arms through the
//! [`arm_ctrl`] stack. Commands are read line-by-line, so the executable
//! doubles as a calibration and bring-up tool.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

// Internal
use arm_ctrl::{Arm, ArmCtrlParams, RobotController};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "arm $ ";

/// Default duration of a commanded move when none is given.
///
/// Units: seconds
const DEFAULT_MOVE_DURATION_S: f64 = 2.0;

const HELP: &str = "\
Commands:
  connect                          open the serial link and start sending
  disconnect                       stop sending and close the link
  status                           print the controller status
  solve <x> <y> <z> [orient]       solve IK without moving (mm, deg)
  move <x> <y> <z> [dur] [orient]  move to a workspace position (mm, s, deg)
  pulse <ch> <us> [dur]            drive one channel to a raw pulse width
  home                             move every joint to its home pose
  zero                             move every joint to its logical zero
  grip open|close [left|right]     actuate a gripper
  release                          emergency stop, release all channels
  help                             this text
  quit                             release all channels and exit";

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// What the console loop should do after a command.
enum Outcome {
    Continue,
    Quit,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    // Initialise session
    let session = Session::new("arm_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Arm Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: ArmCtrlParams =
        util::params::load("arm_exec.toml").wrap_err("Failed to load parameters")?;

    info!("Parameters loaded, port is {}", params.serial_port);

    // ---- CONTROLLER INITIALISATION ----

    let mut controller =
        RobotController::new(params).wrap_err("Arm configuration failed validation")?;

    info!("Controller initialised");

    // ---- CONSOLE LOOP ----

    println!("{}", HELP);

    let mut rl = DefaultEditor::new().wrap_err("Failed to start the console")?;

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match handle_command(&mut controller, line) {
                    Outcome::Continue => (),
                    Outcome::Quit => break,
                }
            }
            // Ctrl-C or Ctrl-D both leave the console
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                warn!("Console error: {:?}", e);
                break;
            }
        }
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");
    controller.release_all();
    controller.disconnect();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Dispatch one console line against the controller.
fn handle_command(controller: &mut RobotController, line: &str) -> Outcome {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let result = match tokens.as_slice() {
        ["connect"] => cmd_connect(controller),
        ["disconnect"] => {
            controller.disconnect();
            Ok(())
        }
        ["status"] => cmd_status(controller),
        ["solve", rest @ ..] => cmd_solve(controller, rest),
        ["move", rest @ ..] => cmd_move(controller, rest),
        ["pulse", rest @ ..] => cmd_pulse(controller, rest),
        ["home"] => cmd_report_move(controller.go_home()),
        ["zero"] => cmd_report_move(controller.go_zero()),
        ["grip", rest @ ..] => cmd_grip(controller, rest),
        ["release"] => {
            controller.release_all();
            Ok(())
        }
        ["help"] => {
            println!("{}", HELP);
            Ok(())
        }
        ["quit"] | ["exit"] => return Outcome::Quit,
        _ => Err(format!("Unknown command, try 'help': {}", line)),
    };

    if let Err(msg) = result {
        println!("{}", msg);
    }

    Outcome::Continue
}

fn cmd_connect(controller: &mut RobotController) -> Result<(), String> {
    controller
        .connect()
        .map_err(|e| format!("Connect failed: {}", e))
}

fn cmd_status(controller: &RobotController) -> Result<(), String> {
    let status = controller.get_status();
    let json = serde_json::to_string_pretty(&status).map_err(|e| format!("{}", e))?;
    println!("{}", json);
    Ok(())
}

/// `solve <x> <y> <z> [orient]`
fn cmd_solve(controller: &RobotController, args: &[&str]) -> Result<(), String> {
    let (x, y, z, rest) = parse_position(args)?;
    let orientation_deg = parse_optional_f64(rest.first(), "orientation")?;

    let result = controller
        .solve(x, y, z, Arm::Left, orientation_deg)
        .ok_or_else(|| String::from("Arm is not configured"))?;

    println!("reachable: {}", result.is_reachable);
    println!("yaw: {:.2} deg", result.yaw_deg);
    for solution in result.solutions.iter() {
        println!(
            "  {} (valid: {}, cost: {:.2})",
            solution.kind, solution.is_valid, solution.cost
        );
        for &(id, angle_deg) in solution.joint_angles_deg.iter() {
            println!("    {:?}: {:.2} deg", id, angle_deg);
        }
    }

    Ok(())
}

/// `move <x> <y> <z> [dur] [orient]`
fn cmd_move(controller: &mut RobotController, args: &[&str]) -> Result<(), String> {
    let (x, y, z, rest) = parse_position(args)?;
    let duration_s =
        parse_optional_f64(rest.first(), "duration")?.unwrap_or(DEFAULT_MOVE_DURATION_S);
    let orientation_deg = parse_optional_f64(rest.get(1), "orientation")?;

    let result = controller.move_to_position(x, y, z, Arm::Left, duration_s, orientation_deg);

    if !result.valid {
        println!("Target is not exactly reachable, moved best-effort");
    }
    println!(
        "success: {}, yaw: {:.2} deg, {} channel(s)",
        result.success,
        result.yaw_deg,
        result.targets.len()
    );

    Ok(())
}

/// `pulse <ch> <us> [dur]`
fn cmd_pulse(controller: &mut RobotController, args: &[&str]) -> Result<(), String> {
    if args.len() < 2 {
        return Err(String::from("Usage: pulse <channel> <microseconds> [dur]"));
    }

    let channel = args[0]
        .parse::<u8>()
        .map_err(|_| format!("Bad channel: {}", args[0]))?;
    let pulse_us = args[1]
        .parse::<u16>()
        .map_err(|_| format!("Bad pulse width: {}", args[1]))?;
    let duration_s =
        parse_optional_f64(args.get(2), "duration")?.unwrap_or(DEFAULT_MOVE_DURATION_S);

    cmd_report_move(controller.move_to_pulses(&[(channel, pulse_us)], duration_s, true))
}

/// `grip open|close [left|right]`
fn cmd_grip(controller: &mut RobotController, args: &[&str]) -> Result<(), String> {
    let arm = match args.get(1) {
        Some(token) => token.parse::<Arm>()?,
        None => Arm::Left,
    };

    match args.first() {
        Some(&"open") => cmd_report_move(controller.open_gripper(arm)),
        Some(&"close") => cmd_report_move(controller.close_gripper(arm)),
        _ => Err(String::from("Usage: grip open|close [left|right]")),
    }
}

fn cmd_report_move(success: bool) -> Result<(), String> {
    if success {
        println!("done");
        Ok(())
    } else {
        Err(String::from("Move did not complete"))
    }
}

/// Parse the leading `<x> <y> <z>` triple, returning the remaining tokens.
fn parse_position<'a>(args: &'a [&'a str]) -> Result<(f64, f64, f64, &'a [&'a str]), String> {
    if args.len() < 3 {
        return Err(String::from("Expected a position: <x> <y> <z> (mm)"));
    }

    let mut coords = [0.0; 3];
    for (i, token) in args[..3].iter().enumerate() {
        coords[i] = token
            .parse::<f64>()
            .map_err(|_| format!("Bad coordinate: {}", token))?;
    }

    Ok((coords[0], coords[1], coords[2], &args[3..]))
}

fn parse_optional_f64(token: Option<&&str>, name: &str) -> Result<Option<f64>, String> {
    match token {
        Some(t) => t
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("Bad {}: {}", name, t)),
        None => Ok(None),
    }
}
