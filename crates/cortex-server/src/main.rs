use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cortex_core::{config, Brain};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match std::env::var_os("CORTEX_CONFIG") {
        Some(path) => config::load_config_from(path.as_ref())?,
        None => config::load_config(),
    };
    config.apply_env_overrides();
    config.validate()?;
    info!(
        "Configuration loaded (model: {}, embeddings: {}, notes: {})",
        config.ollama.model,
        config.ollama.embed_model,
        config
            .notes_root_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not set".to_string())
    );

    let bind_addr = config.bind_addr();
    let brain = Brain::from_config(config)?;
    cortex_server::serve(brain, &bind_addr).await?;
    Ok(())
}
