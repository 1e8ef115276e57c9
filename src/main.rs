//! Fleetseal CLI - per-robot secret resolution.

use clap::Parser;
use fleetseal::cli::{Cli, Commands};
use fleetseal::commands::{self, CommandResult, Context, SealInput};
use fleetseal::config::ConfigOverrides;
use fleetseal::diagnostics;
use fleetseal::providers::EnvSnapshot;
use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use zeroize::Zeroizing;

/// Environment variable holding the log filter (e.g. `fleetseal=debug`).
const LOG_ENV: &str = "FLEETSEAL_LOG";

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let human = cli.human_readable;

    if let Err(e) = run(cli, human) {
        eprintln!("{}", diagnostics::render(&e));
        process::exit(1);
    }
}

/// Diagnostics go to stderr so stdout stays machine-readable.
fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Use -C/--dir literally when given, otherwise the current directory.
fn resolve_project_dir(explicit: Option<PathBuf>) -> Result<PathBuf, fleetseal::Error> {
    match explicit {
        Some(path) if !path.is_dir() => Err(fleetseal::Error::InvalidInput(format!(
            "project directory does not exist: {}",
            path.display()
        ))),
        Some(path) => Ok(path),
        None => Ok(env::current_dir()?),
    }
}

fn run(cli: Cli, human: bool) -> Result<(), fleetseal::Error> {
    let project_dir = resolve_project_dir(cli.project_dir)?;

    let mut overrides = ConfigOverrides {
        config_path: cli.config,
        secrets_dir: cli.secrets_dir,
        keys_dir: cli.keys_dir,
        runtime_dir: None,
        audit_log: cli.audit_log,
    };
    if let Commands::Install {
        runtime_dir: Some(dir),
        ..
    } = &cli.command
    {
        overrides.runtime_dir = Some(dir.clone());
    }

    let ctx = Context::load(&project_dir, &overrides, EnvSnapshot::capture())?;

    match cli.command {
        Commands::Resolve {
            target,
            keys,
            key_file,
            show_values,
        } => {
            let result =
                commands::resolve(&ctx, &target, &keys, key_file.as_deref(), show_values)?;
            output(&result, human);
        }
        Commands::Check {
            targets,
            all,
            keys,
            key_file,
            strict,
        } => {
            let result = commands::check(&ctx, &targets, all, &keys, key_file.as_deref(), strict)?;
            output(&result, human);
            if !result.passed() {
                for error in result.errors() {
                    eprintln!("{}", diagnostics::render(error));
                }
                process::exit(1);
            }
        }
        Commands::Install {
            target,
            keys,
            key_file,
            ..
        } => {
            let result = commands::install(&ctx, &target, &keys, key_file.as_deref())?;
            output(&result, human);
        }
        Commands::Seal {
            target,
            input,
            recipients,
            force,
        } => {
            let input = match input {
                Some(path) => SealInput::File(path),
                None => {
                    let mut text = Zeroizing::new(String::new());
                    std::io::stdin().read_to_string(&mut text)?;
                    SealInput::Text(text)
                }
            };
            let result = commands::seal(&ctx, &target, input, &recipients, force)?;
            output(&result, human);
        }
        Commands::Rotate {
            target,
            recipients,
            union,
            key_file,
            verify_key,
        } => {
            let result = commands::rotate(
                &ctx,
                &target,
                &recipients,
                union,
                key_file.as_deref(),
                verify_key.as_deref(),
            )?;
            output(&result, human);
        }
        Commands::Inspect { target, key_file } => {
            let result = commands::inspect(&ctx, &target, key_file.as_deref())?;
            output(&result, human);
        }
        Commands::Keys => output(&commands::show_keys(&ctx), human),
        Commands::Config => output(&commands::show_config(&ctx), human),
    }

    Ok(())
}

/// Print output in JSON or human-readable format, then any warnings.
fn output<T: CommandResult>(result: &T, human: bool) {
    if human {
        let text = result.to_human();
        if !text.is_empty() {
            println!("{}", text);
        }
    } else {
        println!("{}", result.to_json());
    }
    for warning in result.warnings() {
        eprintln!("{}", warning);
    }
}
