//! nlcmd Control - CLI for validating, running and routing command plans

use anyhow::Result;
use clap::Parser;
use nlcmd_common::{EngineConfig, NormalizedRequest};
use nlcmdctl::cli::{Cli, Commands};
use nlcmdctl::commands::{self, App};
use nlcmdctl::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load_or_default(cli.config.as_deref())?;
    logging::init(&config.log.level);
    let app = App::new(config)?;

    match cli.command {
        Commands::Catalog { json } => commands::catalog(&app, json),
        Commands::Validate { plan } => commands::validate(&app, &plan),
        Commands::Run {
            plan,
            format,
            continue_on_error,
        } => commands::run(&app, &plan, &format, continue_on_error),
        Commands::Ask {
            text,
            intent,
            entities,
            confidence,
            format,
        } => {
            let mut request = NormalizedRequest::new(intent, text, confidence);
            for raw in &entities {
                let (key, value) = commands::parse_entity(raw)?;
                request = request.entity(key, value);
            }
            commands::ask(&app, request, &format).await
        }
        Commands::Batch { file, format } => commands::batch(&app, &file, &format).await,
        Commands::Config => commands::config(&app),
    }
}
