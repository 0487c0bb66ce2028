//! Notiflow server binary.
//!
//! # Environment Variables
//!
//! See [`notiflow_server::Config`]. A `.env` file in the working directory is
//! loaded first when present.
//!
//! # Running
//!
//! ```bash
//! DOWNSTREAM_URL=http://localhost:9000 cargo run --bin notiflow
//! ```

use notiflow_server::{Application, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,notiflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting notiflow");

    let config = Config::from_env()?;
    let app = Application::build(config).await?;
    app.run().await?;

    tracing::info!("Notiflow stopped");
    Ok(())
}
