mod config;
mod db;
mod detect;
mod logging;
mod notify;
mod scanner;

use std::path::PathBuf;
use tracing::{debug, error, info};

use config::Config;
use db::Database;
use detect::model::YoloDetector;
use logging::LogBuffer;
use notify::Mailer;
use scanner::Scanner;

/// Files listed by --summary.
const SUMMARY_LIMIT: usize = 10;
/// Log lines attached to the failure email.
const EMAIL_LOG_TAIL: usize = 500;

const EXIT_OK: i32 = 0;
const EXIT_MODEL_INIT: i32 = 2;
const EXIT_SCAN_FAILED: i32 = 3;

struct CliArgs {
    diff: bool,
    summary: bool,
    debug: bool,
    config_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = CliArgs {
        diff: false,
        summary: false,
        debug: false,
        config_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--diff" => {
                parsed.diff = true;
            }
            "--summary" => {
                parsed.summary = true;
            }
            "--debug" => {
                parsed.debug = true;
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("sentryscan {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"sentryscan - incremental object-detection scanner for media shares

USAGE:
    sentryscan [OPTIONS]

OPTIONS:
    --diff              Show media files not yet tracked
    --summary           Print detection summary after scanning
    --debug             Enable debug logging
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SENTRYSCAN_LOG      Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/sentryscan/config.toml

Designed to run from cron, e.g. weekly:
    30 2 * * 0 /usr/local/bin/sentryscan >> /var/log/sentryscan.log 2>&1"#
    );
}

fn main() {
    let args = parse_args();

    let log_buffer = LogBuffer::default();
    if let Err(e) = logging::init(args.debug, log_buffer.clone(), None) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let config = match &args.config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            std::process::exit(EXIT_SCAN_FAILED);
        }
    };

    let mut failures: Vec<String> = Vec::new();
    let exit_code = run(&args, &config, &mut failures);

    if exit_code != EXIT_OK || !failures.is_empty() {
        let subject = format!(
            "sentryscan failure (exit={} errors={})",
            exit_code,
            failures.len()
        );
        let body = report_body(&config, exit_code, &failures, &log_buffer);
        match Mailer::from_config(&config.email) {
            Some(mailer) => mailer.send_failure_report(&subject, &body),
            None => debug!("Email not configured; skipping failure report"),
        }
    }

    std::process::exit(exit_code);
}

fn run(args: &CliArgs, config: &Config, failures: &mut Vec<String>) -> i32 {
    let db = match Database::open(&config.db_path).and_then(|db| {
        db.initialize()?;
        Ok(db)
    }) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {:#}", e);
            failures.push(format!("database: {:#}", e));
            return EXIT_SCAN_FAILED;
        }
    };

    let detector = match YoloDetector::load(&config.detector) {
        Ok(d) => d,
        Err(e) => {
            error!("Model load failed: {:#}", e);
            failures.push(format!("model init: {:#}", e));
            return EXIT_MODEL_INIT;
        }
    };

    let mut scanner = Scanner::new(config);

    if args.diff {
        match scanner.diff(&db) {
            Ok(missing) if missing.is_empty() => println!("No untracked media files."),
            Ok(missing) => {
                println!("Untracked media files:");
                for path in missing {
                    println!("{}", path.display());
                }
            }
            Err(e) => {
                error!("Diff audit failed: {:#}", e);
                failures.push(format!("diff: {:#}", e));
                return EXIT_SCAN_FAILED;
            }
        }
    }

    match scanner.scan(&db, &detector) {
        Ok(report) => {
            for failure in &report.failures {
                failures.push(format!("{}: {}", failure.path.display(), failure.error));
            }
        }
        Err(e) => {
            error!("Unhandled exception during scan: {:#}", e);
            failures.push(format!("scan: {:#}", e));
            return EXIT_SCAN_FAILED;
        }
    }

    if args.summary {
        match db.top_files_by_detections(SUMMARY_LIMIT) {
            Ok(rows) => {
                info!("Summary (top {} files by detection count):", SUMMARY_LIMIT);
                for (path, count) in rows {
                    println!("{count}\t{path}");
                }
            }
            Err(e) => {
                error!("Summary query failed: {:#}", e);
                failures.push(format!("summary: {:#}", e));
            }
        }
    }

    EXIT_OK
}

fn report_body(
    config: &Config,
    exit_code: i32,
    failures: &[String],
    log_buffer: &LogBuffer,
) -> String {
    let mut sections = vec![
        format!("Exit Code: {exit_code}"),
        format!("Root Path: {}", config.scanner.root_path.display()),
        format!("Total Errors: {}", failures.len()),
        format!("\n-- Recent Log (up to {EMAIL_LOG_TAIL} lines) --"),
    ];
    sections.extend(log_buffer.tail(EMAIL_LOG_TAIL));
    if !failures.is_empty() {
        sections.push("\n-- Error Details --".to_string());
        sections.extend(failures.iter().cloned());
    }
    sections.join("\n")
}
