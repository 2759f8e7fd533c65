//! PTY Relay
//!
//! Runs a program on a pseudoterminal and relays the real stdin/stdout to
//! it. Useful for checking the library by hand.

use std::io;
use std::process::ExitCode;

use pty_relay::{Input, Pty, PtyCommand, PtyConfig, WindowSize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = PtyConfig::default();
    let mut rows: Option<u16> = None;
    let mut cols: Option<u16> = None;
    let mut program: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i < args.len() {
                    config = match PtyConfig::load(&args[i]) {
                        Ok(c) => c,
                        Err(e) => {
                            eprintln!("Failed to load config {}: {}", args[i], e);
                            return ExitCode::FAILURE;
                        },
                    };
                }
            },
            "-r" | "--rows" => {
                i += 1;
                rows = args.get(i).and_then(|v| v.parse().ok());
            },
            "-c" | "--cols" => {
                i += 1;
                cols = args.get(i).and_then(|v| v.parse().ok());
            },
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            },
            _ => {
                program.extend_from_slice(&args[i..]);
                break;
            },
        }
        i += 1;
    }

    if rows.is_some() || cols.is_some() {
        let fallback = config.initial_size.unwrap_or(config.default_size);
        config.initial_size = Some(WindowSize::new(
            rows.unwrap_or(fallback.rows),
            cols.unwrap_or(fallback.cols),
        ));
    }

    if program.is_empty() {
        program.push(std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()));
    }

    tracing::info!("Running {:?} on a pty", program);

    let command = PtyCommand::new(&program[0])
        .args(&program[1..])
        .stdin(Input::Stdin)
        .stdout(io::stdout());

    let pty = match Pty::spawn_with(command, config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to spawn PTY: {}", e);
            return ExitCode::FAILURE;
        },
    };
    tracing::info!("PTY spawned on {}, child PID: {}", pty.slave_path().display(), pty.pid());

    let result = pty.wait().recv();
    match result {
        Ok(Ok(status)) => {
            tracing::info!("Child exited: {}", status);
            match status.code() {
                Some(0) => ExitCode::SUCCESS,
                Some(code) => ExitCode::from(code as u8),
                None => ExitCode::FAILURE,
            }
        },
        Ok(Err(e)) => {
            tracing::error!("Wait error: {}", e);
            ExitCode::FAILURE
        },
        Err(_) => {
            tracing::error!("Wait thread exited without a result");
            ExitCode::FAILURE
        },
    }
}

fn print_help() {
    println!("PTY Relay - run a program on a pseudoterminal");
    println!();
    println!("Usage: pty-relay [OPTIONS] [PROGRAM [ARGS...]]");
    println!();
    println!("Options:");
    println!("  --config <FILE>    Load a JSON session config");
    println!("  -r, --rows <N>     Set terminal height (default: current terminal or 24)");
    println!("  -c, --cols <N>     Set terminal width (default: current terminal or 80)");
    println!("  -h, --help         Show this help message");
    println!();
    println!("PROGRAM defaults to $SHELL, or /bin/sh when unset. The real stdin is put");
    println!("into raw mode while the program runs and restored when it exits.");
}
