mod config;
mod controller;
mod runloop;
mod ticks;

use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_channel::Receiver;

use controller::Controller;
use ticks::{Tick, TickBus};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const COMMANDS: &str = "Commands: start [secs], stop, status, help, quit";

/// What the command loop should do after dispatching one line.
enum ShellAction {
    Reply(String),
    Quit,
}

/// Parses a positive interval in seconds (fractions allowed). Values
/// too large for a `Duration` are rejected rather than panicking.
fn parse_interval(arg: &str) -> Result<Duration, String> {
    match arg.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Duration::try_from_secs_f64(secs)
            .map_err(|_| format!("interval {} is out of range", secs)),
        Ok(secs) => Err(format!("interval must be positive, got {}", secs)),
        Err(_) => Err(format!("invalid interval '{}'", arg)),
    }
}

/// Parses and dispatches a single command line, returning a response.
fn handle_command(
    command: &str,
    controller: &Controller,
    default_interval: Duration,
) -> ShellAction {
    let trimmed = command.trim();
    let parts: Vec<&str> = trimmed.splitn(2, ' ').collect();
    let verb = parts.first().copied().unwrap_or("");

    match verb {
        "start" => {
            let interval = match parts.get(1).map(|s| s.trim()).filter(|s| !s.is_empty()) {
                Some(arg) => match parse_interval(arg) {
                    Ok(interval) => interval,
                    Err(e) => return ShellAction::Reply(format!("ERR: {}", e)),
                },
                None => default_interval,
            };
            match controller.start_periodic(interval) {
                Ok(()) => ShellAction::Reply(format!("OK: updating every {:?}", interval)),
                Err(e) => ShellAction::Reply(format!("ERR: {}", e)),
            }
        }
        "stop" => {
            controller.stop_periodic();
            ShellAction::Reply("OK: periodic updates stopped".to_string())
        }
        "status" => {
            let state = if controller.is_running() { "running" } else { "idle" };
            ShellAction::Reply(state.to_string())
        }
        "help" => ShellAction::Reply(COMMANDS.to_string()),
        "quit" | "exit" => ShellAction::Quit,
        other => ShellAction::Reply(format!("ERR: unknown command '{}'", other)),
    }
}

/// Consumes ticks off the bus and renders them. This is the caller-owned
/// execution context: the worker thread never prints or mutates display
/// state itself.
fn spawn_printer(
    rx: Receiver<Tick>,
    controller: Arc<Controller>,
    time_format: String,
    max_ticks: Option<u64>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut count: u64 = 0;
        while let Ok(tick) = rx.recv_blocking() {
            println!("{}", tick.at.format(&time_format));
            count += 1;
            if max_ticks.map(|max| count >= max).unwrap_or(false) {
                log::info!("Reached max_ticks ({}), stopping periodic updates", count);
                controller.stop_periodic();
            }
        }
    })
}

fn print_help() {
    println!(
        "metronome {}
A cooperative run loop demo: periodic timestamps off a worker thread

USAGE:
    metronome [OPTIONS]

OPTIONS:
    -h, --help       Print this help message
    -v, --version    Print version information

ENVIRONMENT:
    RUST_LOG         Set log level (error, warn, info, debug, trace)

CONFIG:
    ~/.config/metronome/config.toml

EXAMPLES:
    metronome                    Run with default config
    RUST_LOG=debug metronome     Run with debug logging

For more information, see: https://github.com/dungle-scrubs/metronome",
        VERSION
    );
}

fn main() {
    // Handle CLI arguments
    let args: Vec<String> = std::env::args().skip(1).collect();

    if !args.is_empty() {
        // Only the first argument is processed (flags don't combine)
        match args[0].as_str() {
            "-h" | "--help" => {
                print_help();
                return;
            }
            "-v" | "--version" => {
                println!("metronome {}", VERSION);
                return;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[0]);
                eprintln!("Try 'metronome --help' for more information.");
                std::process::exit(1);
            }
        }
    }

    // Initialize logging (flush each line for interactive debugging).
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    logger
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {:>5} {}] {}",
                chrono::Utc::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )?;
            buf.flush()
        })
        .init();

    log::info!("Starting metronome v{}", VERSION);

    let config = config::load_config();

    let bus = TickBus::new();
    let controller = match Controller::new(bus.sender()) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            log::error!("Failed to spawn worker thread: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = ctrlc::set_handler(|| {
        log::info!("Interrupted, exiting");
        std::process::exit(0);
    }) {
        log::warn!("Failed to install signal handler: {}", e);
    }

    let printer = spawn_printer(
        bus.subscribe(),
        Arc::clone(&controller),
        config.time_format.clone(),
        config.max_ticks,
    );

    println!("{}", COMMANDS);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match handle_command(&line, &controller, config.interval()) {
            ShellAction::Reply(reply) => println!("{}", reply),
            ShellAction::Quit => break,
        }
    }

    controller.stop_periodic();
    bus.close();
    if printer.join().is_err() {
        log::error!("Printer thread panicked");
    }
    drop(controller); // last handle; Drop joins the worker
    log::info!("Shutdown complete");
}
