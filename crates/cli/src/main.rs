use clap::{CommandFactory, Parser};
use cligateway_core::config::{self, Config, ResponseFormat};
use std::path::PathBuf;

const LONG_ABOUT: &str = "\
A HTTP gateway to command line apps.

Start a HTTP service, and handle routes:
    GET  /:command/*args[?flag=val]
       will run \"$ command [--flag val] [args]\"
       and respond {\"stdout\": \"\", \"stderr\": \"\"} in JSON or plain output (2>&1).
    POST /
       with data: {command: \"cmd subcmd\", flags: {\"k\": \"v\"},
                   args: [\"arg\"], envs: {\"K\": \"V\"}}
       will run \"$ [K=V] command [--k v] [a]\",
       for K, V in envs, for k, v in flags, for a in args.";

#[derive(Parser)]
#[command(name = "cligateway", version)]
#[command(about = "A HTTP gateway to command line apps", long_about = LONG_ABOUT)]
struct Cli {
    /// Add dashes (-a or --word) to flags if not present
    #[arg(long)]
    add_dashes: bool,

    /// Upper-case environment variable names
    #[arg(long)]
    env_key_to_upper: bool,

    /// Response output: json ({stdout, stderr}) or text (plain output, 2>&1) [default: json]
    #[arg(long, value_name = "text|json")]
    resp: Option<ResponseFormat>,

    /// HTTP service address [default: localhost:8080]
    #[arg(long, value_name = "ADDR")]
    http: Option<String>,

    /// Print verbose logs (argv, env, captured output)
    #[arg(long, short)]
    verbose: bool,

    /// Kill commands running longer than SECS (default: no limit)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Config file path (default: CLIGATEWAY_CONFIG_PATH or ~/.cligateway/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Allowed commands. Make sure they are SAFE to expose.
    #[arg(value_name = "WHITELIST")]
    whitelist: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("cligateway: {:#}", e);
            std::process::exit(1);
        }
    };

    // Verbose output is gated on config.verbose and logged at info, so RUST_LOG cannot hide it
    // unless it filters out info entirely.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if config.whitelist.is_empty() {
        eprintln!("Empty command whitelist: nothing to do.\n");
        let _ = Cli::command().print_help();
        std::process::exit(1);
    }

    if let Err(e) = cligateway_core::gateway::run_gateway(config).await {
        log::error!("gateway failed: {:#}", e);
        std::process::exit(1);
    }
}

/// Config file values, overridden by flags; a positional whitelist replaces the file's.
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let (mut config, _path) = config::load_config(cli.config.clone())?;
    if !cli.whitelist.is_empty() {
        config.whitelist = cligateway_core::exec::Whitelist::new(cli.whitelist.iter().cloned());
    }
    config.add_dashes |= cli.add_dashes;
    config.env_key_to_upper |= cli.env_key_to_upper;
    config.verbose |= cli.verbose;
    if let Some(resp) = cli.resp {
        config.response = resp;
    }
    if let Some(ref http) = cli.http {
        config.http = http.clone();
    }
    if let Some(secs) = cli.timeout {
        config.timeout_secs = Some(secs);
    }
    Ok(config)
}
