//! Interactive bench client for the operator protocol.
//!
//! Reads simple commands from a readline prompt, translates them into
//! JSON operator messages, sends them to a running tank executable over
//! the REQ/REP command socket and prints the reply.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use rustyline::error::ReadlineError;
use rustyline::Editor;
use structopt::StructOpt;

use ops_if::cmd::Command;
use ops_if::net::{self, zmq, SocketOptions};
use ops_if::ops::OpsMessage;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const PROMPT: &str = "[tank] $ ";
const HISTORY_PATH: &str = "ops_history.txt";

const HELP: &str = "\
Commands:
  control <forward> <turn>   joystick tick, both axes in [-100, 100]
  estop                      latch the emergency stop
  release                    clear the emergency stop latch
  goto <row> <col>           navigate to a grid cell
  clear                      cancel the active plan
  reset                      reset the pose to the grid centre
  up | left90 | right90      convenience plans
  obstacles [r,c ...]        replace the obstacle set
  timing <f> <l> <r>         step durations in seconds
  pulse <F|B|L|R>            single calibration pulse
  calset <dist|-> <angle|->  write calibration values (- to skip)
  calget                     request current calibration values
  help                       show this text
  exit                       quit";

// ---------------------------------------------------------------------------
// CLI OPTIONS
// ---------------------------------------------------------------------------

#[derive(StructOpt)]
#[structopt(
    name = "command_line_ops",
    about = "Bench operator client for the tank control software"
)]
struct Opt {
    /// Operator command endpoint of the running executable
    #[structopt(long, default_value = "tcp://localhost:5020")]
    endpoint: String,
}

// ---------------------------------------------------------------------------
// MAIN
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    // Connect the command socket
    let ctx = zmq::Context::new();
    let socket = net::open_socket(
        &ctx,
        zmq::REQ,
        &SocketOptions {
            recv_timeout: 2000,
            send_timeout: 1000,
            ..Default::default()
        },
        &opt.endpoint,
    )?;

    println!("Connected to {}. Type 'help' for commands.", opt.endpoint);

    // Rustyline input
    let mut rl = Editor::<()>::new();
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    // Main loop
    loop {
        let readline = rl.readline(PROMPT);

        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str());

                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" {
                    break;
                }
                if line == "help" {
                    println!("{}", HELP);
                    continue;
                }

                let msg = match parse_line(line) {
                    Ok(m) => m,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };

                let json = serde_json::to_string(&msg)?;
                if let Err(e) = socket.send(&json, 0) {
                    println!("Send failed: {}", e);
                    continue;
                }

                match socket.recv_string(0) {
                    Ok(Ok(reply)) => println!("{}", reply),
                    Ok(Err(_)) => println!("Received a non-UTF8 reply"),
                    Err(e) => println!("No reply: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                println!("Unhandled error: {:?}", err);
                break;
            }
        }
    }

    rl.save_history(HISTORY_PATH)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Translate one input line into an operator message.
fn parse_line(line: &str) -> Result<OpsMessage, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens[0] {
        "control" => {
            let (forward, turn) = two_ints(&tokens)?;
            Ok(OpsMessage::Control { forward, turn })
        }
        "estop" => Ok(OpsMessage::EmergencyStop),
        "release" => Ok(OpsMessage::ReleaseEmergency),
        "goto" => {
            let (row, col) = two_ints(&tokens)?;
            if row < 0 || col < 0 {
                return Err("goto expects non-negative cell indices".into());
            }
            Ok(OpsMessage::NavigateTo {
                row: row as u32,
                col: col as u32,
            })
        }
        "clear" => Ok(OpsMessage::ClearTarget),
        "reset" => Ok(OpsMessage::ResetStart),
        "up" => Ok(OpsMessage::GoUp),
        "left90" => Ok(OpsMessage::Turn90Left),
        "right90" => Ok(OpsMessage::Turn90Right),
        "obstacles" => {
            let mut cells = Vec::new();
            for token in &tokens[1..] {
                let parts: Vec<&str> = token.split(',').collect();
                if parts.len() != 2 {
                    return Err(format!("bad cell '{}', expected row,col", token));
                }
                let row = parts[0]
                    .parse::<u32>()
                    .map_err(|_| format!("bad row in '{}'", token))?;
                let col = parts[1]
                    .parse::<u32>()
                    .map_err(|_| format!("bad col in '{}'", token))?;
                cells.push([row, col]);
            }
            Ok(OpsMessage::UpdateObstacles { cells })
        }
        "timing" => {
            if tokens.len() != 4 {
                return Err("timing expects three durations".into());
            }
            let mut values = [0f64; 3];
            for (i, token) in tokens[1..].iter().enumerate() {
                values[i] = token
                    .parse()
                    .map_err(|_| format!("bad duration '{}'", token))?;
            }
            Ok(OpsMessage::UpdateTiming {
                forward_delay: values[0],
                turn_left_delay: values[1],
                turn_right_delay: values[2],
            })
        }
        "pulse" => {
            if tokens.len() != 2 {
                return Err("pulse expects one of F, B, L, R".into());
            }
            match Command::from_letter(tokens[1]) {
                Some(Command::Stop) | None => Err("pulse expects one of F, B, L, R".into()),
                Some(command) => Ok(OpsMessage::CalibrateCommand { command }),
            }
        }
        "calset" => {
            if tokens.len() != 3 {
                return Err("calset expects <distance|-> <angle|->".into());
            }
            let distance = optional_value(tokens[1])?;
            let angle = optional_value(tokens[2])?;
            Ok(OpsMessage::ApplyCalibration { distance, angle })
        }
        "calget" => Ok(OpsMessage::RequestCalibrationValues),
        other => Err(format!("Unknown command '{}', try 'help'", other)),
    }
}

fn two_ints(tokens: &[&str]) -> Result<(i32, i32), String> {
    if tokens.len() != 3 {
        return Err(format!("{} expects two values", tokens[0]));
    }

    let a = tokens[1]
        .parse()
        .map_err(|_| format!("bad value '{}'", tokens[1]))?;
    let b = tokens[2]
        .parse()
        .map_err(|_| format!("bad value '{}'", tokens[2]))?;

    Ok((a, b))
}

fn optional_value(token: &str) -> Result<Option<f64>, String> {
    if token == "-" {
        return Ok(None);
    }
    token
        .parse()
        .map(Some)
        .map_err(|_| format!("bad value '{}'", token))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
