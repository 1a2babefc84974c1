use clap::{Parser, ValueEnum};
use config::Config;
use psk_server::{Server, ServerModel};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing for the server based on verbosity level
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace", // 3 or more
    };

    let filter = format!("psk_server={level}");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Clone, Copy, ValueEnum)]
enum Model {
    Nonblocking,
    Threaded,
}

impl From<Model> for ServerModel {
    fn from(model: Model) -> Self {
        match model {
            Model::Nonblocking => ServerModel::NonBlocking,
            Model::Threaded => ServerModel::Threaded,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "TLS-PSK server", long_about = None)]
struct Args {
    /// Address to bind server to
    #[arg(short, long, default_value = "0.0.0.0:11111")]
    bind: String,

    /// Concurrency model (overrides `server_model` from the configuration)
    #[arg(short, long, value_enum)]
    model: Option<Model>,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (TOML format)
    #[arg(long)]
    config: Option<String>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = Args::parse();

    init_tracing(args.verbose);

    // File (if given), then PSK_SERVER_* environment variables on top
    let mut builder = Config::builder();
    if let Some(config_path) = &args.config {
        builder = builder.add_source(config::File::with_name(config_path));
    }
    builder = builder.add_source(config::Environment::with_prefix("PSK_SERVER"));
    let config = match builder.build() {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Fatal error : failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut server = match Server::new(&config) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Fatal error : {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(model) = args.model {
        server = server.with_model(model.into());
    }

    if let Err(err) = server.listen(&args.bind) {
        eprintln!("Fatal error : failed to listen on {}: {err}", args.bind);
        return ExitCode::FAILURE;
    }

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Fatal error : {err}");
            ExitCode::FAILURE
        }
    }
}
