//! TimeJet CLI - keeps project plans and field updates in sync.

use clap::Parser;
use serde_json::{Value, json};
use std::fs;
use std::io::Read;
use std::process;
use timejet::cli::{ActivityCommands, Cli, Commands, ConfigCommands, DocCommands};
use timejet::commands::{self, Output, Service};
use timejet::config::{ConfigOverrides, EnvValues, ResolvedConfig, resolve_config};
use timejet::{Error, Result};

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    let overrides = overrides_for(&cli);
    let result = resolve_config(&overrides, &EnvValues::from_env()).and_then(|config| {
        init_tracing(&config);
        run_command(cli.command, &config, human)
    });

    if let Err(e) = result {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// CLI flags that take part in config resolution.
fn overrides_for(cli: &Cli) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(ref path) = cli.config {
        overrides = overrides.with_config_path(path);
    }
    if let Some(ref dir) = cli.data_dir {
        overrides = overrides.with_data_root(dir);
    }
    if let Commands::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = port {
            overrides = overrides.with_port(*port);
        }
    }
    overrides
}

/// Log to stderr so stdout stays machine-readable.
fn init_tracing(config: &ResolvedConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_filter.value)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("timejet=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_command(command: Commands, config: &ResolvedConfig, human: bool) -> Result<()> {
    match command {
        Commands::Import { tenant, user } => {
            let result = Service::from_config(config).import(&tenant, user.as_deref())?;
            output(&result, human);
        }

        Commands::Projects { tenant } => {
            let result = Service::from_config(config).projects(&tenant)?;
            output(&result, human);
        }

        Commands::Dump { tenant } => {
            let result = Service::from_config(config).dump(&tenant)?;
            output(&result, human);
        }

        Commands::Update { tenant, payload } => {
            let payload = read_payload(&payload)?;
            let result = Service::from_config(config).update(&tenant, &payload)?;
            output(&result, human);
        }

        Commands::Report {
            tenant,
            project,
            to,
        } => {
            let result = Service::from_config(config).report(&tenant, &project, to.as_deref())?;
            output(&result, human);
        }

        Commands::Activity { command } => match command {
            ActivityCommands::Record {
                tenant,
                user_id,
                uid,
                project,
                kind,
                start,
                finish,
                task_name,
                step_name,
            } => {
                let event = commands::parse_activity(&json!({
                    "user_id": user_id,
                    "project_uid": uid,
                    "project_name": project,
                    "task_name": task_name,
                    "step_name": step_name,
                    "event_name": kind,
                    "event_start": start,
                    "event_finish": finish,
                }))?;
                let result = Service::from_config(config).record_activity(&tenant, &event)?;
                output(&result, human);
            }
            ActivityCommands::List { tenant, user_id } => {
                let result = Service::from_config(config).list_activity(&tenant, user_id)?;
                output(&result, human);
            }
        },

        Commands::Doc { command } => match command {
            DocCommands::Pack { input, output: path } => {
                let result = commands::doc_pack(&input, &path)?;
                output(&result, human);
            }
            DocCommands::Show { file } => {
                let result = commands::doc_show(&file)?;
                output(&result, human);
            }
        },

        Commands::Serve { .. } => run_server(config)?,

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(config);
                output(&result, human);
            }
        },
    }

    Ok(())
}

/// Read a JSON payload from a file, or stdin for `-`.
fn read_payload(source: &str) -> Result<Value> {
    let content = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(source)?
    };
    serde_json::from_str(&content)
        .map_err(|e| Error::Validation(vec![format!("invalid JSON: {}", e)]))
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

#[cfg(feature = "server")]
fn run_server(config: &ResolvedConfig) -> Result<()> {
    let service = Service::from_config(config);
    let addr = config.bind_addr();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Other(format!("Failed to create runtime: {}", e)))?
        .block_on(timejet::server::start_server(service, &addr))
}

#[cfg(not(feature = "server"))]
fn run_server(_config: &ResolvedConfig) -> Result<()> {
    Err(Error::Other(
        "this build of tj was compiled without the `server` feature".to_string(),
    ))
}
