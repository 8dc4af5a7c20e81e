use chariot::{
    Error, InternalResult, Value,
    agent::{AgentScheduler, RunMode},
    config::RuntimeConfig,
    execution::ExecutionManager,
    runtime::Runtime,
};
use clap::Parser;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "chariot.json")]
    config: PathBuf,

    /// Script to run
    script: PathBuf,

    /// When the script evaluates to a plan, run it once in this mode
    /// (bdi, guard-only, force, force-all, dry-run)
    #[arg(short, long)]
    mode: Option<String>,

    /// Plan instance variables as key=value (value parsed as JSON, else string)
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {}", raw))
}

fn var_value(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(|json| Value::from_json(&json))
        .unwrap_or_else(|_| Value::str(raw))
}

async fn run(cli: &Cli) -> InternalResult<()> {
    let config = if cli.config.exists() {
        RuntimeConfig::from_file(&cli.config)?
    } else {
        RuntimeConfig::default()
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let source = std::fs::read_to_string(&cli.script)
        .map_err(|e| Error::internal(format!("Failed to read script: {}", e)))?;
    let file = cli
        .script
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.execution.default_file.clone());

    let runtime = Arc::new(Runtime::new(config));
    let executions = ExecutionManager::new(runtime.clone());
    let id = executions.create_with_file("cli", &source, &file);
    let context = executions.get(&id)?;

    let mut logs = context.stream_logs();
    loop {
        tokio::select! {
            biased;
            Some(entry) = logs.next() => println!("[{}] {}", entry.level, entry.message),
            _ = context.wait() => {
                for entry in logs.drain_ready() {
                    println!("[{}] {}", entry.level, entry.message);
                }
                break;
            }
        }
    }

    if let Some(error) = context.error() {
        return Err(error.into());
    }
    let value = context.result().unwrap_or(Value::Null);

    match (&cli.mode, &value) {
        (Some(mode), Value::Plan(plan)) => {
            let mode = RunMode::parse_strict(mode)?;
            let scheduler = AgentScheduler::new(runtime.clone());
            scheduler.register_plan(plan.clone());
            let vars: HashMap<String, Value> = cli
                .vars
                .iter()
                .map(|(key, raw)| (key.clone(), var_value(raw)))
                .collect();
            let outcome = scheduler.run_plan_once(&plan.name, vars, None, mode).await?;
            println!("executed: {}", outcome.executed);
            println!("{}", outcome.value);
        }
        (Some(_), other) => {
            return Err(Error::internal(format!(
                "--mode needs a script that evaluates to a plan, got {}",
                other.type_name()
            )));
        }
        (None, _) => println!("{}", value),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
