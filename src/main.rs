//! PlanRunner CLI Entry Point
//!
//! Runs a plan file to completion on a local engine.
//!
//! # Usage
//!
//! ```bash
//! # Execute a plan
//! planrunner plan.yaml
//!
//! # Pass setup values referenced as ${setup.<key>}
//! planrunner plan.yaml --set region=eu-west-1 --set env=staging
//!
//! # Keep engine state on disk and recover unfinished runs first
//! planrunner plan.yaml --state-dir .planrunner
//!
//! # Use a configuration file and more workers
//! planrunner plan.yaml --config engine.yaml --workers 8
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use log::{error, info, warn};

use planrunner::model::TriggerInfo;
use planrunner::{load_plan, EngineConfig, OrchestrationService, APP_NAME, VERSION};

/// Default plan file used when none is specified.
const DEFAULT_PLAN: &str = "plan.yaml";

/// Default time to wait for the plan to finish: one day.
const DEFAULT_WAIT_SECS: u64 = 86_400;

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    plan_path: String,
    config_path: Option<PathBuf>,
    workers: Option<usize>,
    state_dir: Option<PathBuf>,
    wait_secs: u64,
    setup: BTreeMap<String, String>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plan_path: DEFAULT_PLAN.to_string(),
            config_path: None,
            workers: None,
            state_dir: None,
            wait_secs: DEFAULT_WAIT_SECS,
            setup: BTreeMap::new(),
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Durable Plan Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: planrunner [OPTIONS] <PLAN_FILE>");
    println!();
    println!("Arguments:");
    println!("  <PLAN_FILE>         Path to plan YAML file");
    println!();
    println!("Options:");
    println!("  --config PATH       Engine configuration YAML file");
    println!("  --workers N         Number of concurrent transitions");
    println!("  --state-dir PATH    Persist engine state and recover unfinished runs");
    println!("  --timeout SECS      Give up waiting after SECS (default: {})", DEFAULT_WAIT_SECS);
    println!("  --set KEY=VALUE     Setup value, may be repeated");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  planrunner pipeline.yaml");
    println!("  planrunner pipeline.yaml --set region=eu-west-1");
    println!("  planrunner pipeline.yaml --state-dir .planrunner --workers 8");
}

/// Takes the value following an option.
fn option_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut plan_given = false;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--config" => {
                config.config_path = Some(PathBuf::from(option_value(args, &mut i, "--config")?));
            }
            "--state-dir" => {
                config.state_dir = Some(PathBuf::from(option_value(args, &mut i, "--state-dir")?));
            }
            "--workers" => {
                let value = option_value(args, &mut i, "--workers")?;
                config.workers = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid workers value: {}", value))?,
                );
            }
            "--timeout" => {
                let value = option_value(args, &mut i, "--timeout")?;
                config.wait_secs = value
                    .parse()
                    .map_err(|_| format!("Invalid timeout value: {}", value))?;
            }
            "--set" => {
                let value = option_value(args, &mut i, "--set")?;
                let (key, val) = value
                    .split_once('=')
                    .ok_or_else(|| format!("--set expects KEY=VALUE, got: {}", value))?;
                if key.trim().is_empty() {
                    return Err(format!("--set has an empty key: {}", value));
                }
                config.setup.insert(key.trim().to_string(), val.to_string());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if plan_given {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.plan_path = arg.clone();
                plan_given = true;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Loads the engine configuration and applies command-line overrides.
fn engine_config(config: &Config) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut engine_config = match &config.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = config.workers {
        engine_config.worker_threads = workers;
    }
    if let Some(dir) = &config.state_dir {
        engine_config.state_dir = Some(dir.clone());
    }
    engine_config.validate()?;
    Ok(engine_config)
}

fn current_user() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "cli".to_string())
}

/// Main application entry point.
async fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let engine_config = engine_config(&config)?;
    info!("Workers: {}", engine_config.worker_threads);

    // Load plan
    info!("Loading plan: {}", config.plan_path);
    let plan = load_plan(&config.plan_path).map_err(|e| {
        error!("Failed to load plan: {}", e);
        format!("Could not load plan from '{}': {}", config.plan_path, e)
    })?;

    let service = OrchestrationService::new(engine_config)?;
    if config.state_dir.is_some() {
        let report = service.recover()?;
        if report.nodes_redispatched > 0 {
            warn!(
                "Resumed {} nodes left by an earlier run",
                report.nodes_redispatched
            );
        }
    }

    let handle = service.start_execution(plan, config.setup, TriggerInfo::manual(current_user()))?;
    info!("Plan execution: {}", handle.plan_execution_id);

    let finished = service
        .wait_for_completion(&handle.plan_execution_id, Duration::from_secs(config.wait_secs))
        .await?;

    println!("{}", service.timeline().gantt_chart());
    match &finished.failure_info {
        Some(failure) if !finished.status.is_positive() => {
            error!("Plan finished with {}: {}", finished.status, failure.message)
        }
        _ => info!("Plan finished with {}", finished.status),
    }

    service.shutdown();
    Ok(finished.status.is_positive())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("planrunner")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse_arguments(&args(&[])).unwrap();
        assert_eq!(config.plan_path, DEFAULT_PLAN);
        assert!(config.setup.is_empty());
        assert_eq!(config.wait_secs, DEFAULT_WAIT_SECS);
    }

    #[test]
    fn test_parse_options() {
        let config = parse_arguments(&args(&[
            "deploy.yaml",
            "--workers",
            "3",
            "--set",
            "region=eu-west-1",
            "--set",
            "query=a=b",
            "--state-dir",
            "/tmp/state",
        ]))
        .unwrap();
        assert_eq!(config.plan_path, "deploy.yaml");
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.setup.get("region").map(String::as_str), Some("eu-west-1"));
        assert_eq!(config.setup.get("query").map(String::as_str), Some("a=b"));
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/state")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--workers"])).is_err());
        assert!(parse_arguments(&args(&["--workers", "many"])).is_err());
        assert!(parse_arguments(&args(&["--set", "novalue"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "b.yaml"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn test_workers_override() {
        let mut config = parse_arguments(&args(&["--workers", "5"])).unwrap();
        assert_eq!(engine_config(&config).unwrap().worker_threads, 5);
        config.workers = Some(0);
        assert!(engine_config(&config).is_err());
    }
}
