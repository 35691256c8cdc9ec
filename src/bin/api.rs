use loan_conversation_engine::{
    api::{generate_run_id, start_server, ApiState},
    EngineConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env()?;
    let run_id = generate_run_id();

    info!("🚀 Loan Conversation Engine - Run-id Server");
    info!("📍 Port: {}", config.port);
    info!(run_id = %run_id, "🆔 Run id issued for this process");

    start_server(ApiState::new(run_id), config.port).await?;

    Ok(())
}
