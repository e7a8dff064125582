use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use tasknet::compiler::core::Compiler;
use tasknet::compiler::exporter::export;
use tasknet::compiler::loader::load_net;
use tasknet::runtime::engine::{Engine, EngineConfig};
use tasknet::runtime::redis_storage::RedisJournal;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration (YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one case of a net to completion
    Run {
        /// Path to the net file (YAML or JSON)
        file: PathBuf,

        /// Initial variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,

        /// Journal to this Redis URL instead of memory
        #[arg(long)]
        redis: Option<String>,
    },

    /// Check a net and print its diagnostics
    Verify {
        /// Path to the net file (YAML or JSON)
        file: PathBuf,
    },

    /// Print the normalized form of a net
    Export {
        /// Path to the net file (YAML or JSON)
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

fn build_engine(config: EngineConfig, redis_url: Option<String>) -> Result<Engine> {
    let mut engine = match redis_url.or_else(|| config.redis_url.clone()) {
        Some(url) => {
            info!("Journaling to Redis: {}", url);
            let client = redis::Client::open(url.as_str()).with_context(|| format!("Invalid Redis URL: {}", url))?;
            Engine::new_with_journal(Arc::new(RedisJournal::new(client)), config)
        }
        None => Engine::with_config(config),
    };
    engine.register_standard_handlers();
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run { file, vars, redis } => {
            let engine = build_engine(config, redis)?;
            let spec = load_net(&file)?;
            let net_id = spec.id.clone();
            engine.register_net(spec)?;

            let initial_vars: BTreeMap<_, _> = vars.into_iter().collect();
            let outcome = engine.launch_case(&net_id, initial_vars).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.completed {
                bail!("Case {} stopped before reaching the output condition", outcome.case_id);
            }
        }

        Commands::Verify { file } => {
            let engine = build_engine(config, None)?;
            let spec = load_net(&file)?;
            let diagnostics = engine.verify(spec)?;
            for diagnostic in &diagnostics {
                println!("{}", diagnostic);
            }
            if !diagnostics.is_empty() {
                bail!("{} problem(s) found in {}", diagnostics.len(), file.display());
            }
            info!("{} verified", file.display());
        }

        Commands::Export { file, format } => {
            let spec = load_net(&file)?;
            let net = Compiler::new().compile(spec)?;
            let exported = export(&net);
            let text = match format {
                Format::Yaml => serde_yaml::to_string(&exported)?,
                Format::Json => serde_json::to_string_pretty(&exported)?,
            };
            print!("{}", text);
        }
    }

    Ok(())
}
