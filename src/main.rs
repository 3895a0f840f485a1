use anyhow::Context;
use image_describer::{router, Config, DescribePipeline, GeminiClient, ServerOptions};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("image_describer=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let client = GeminiClient::from_config(&config);
    let pipeline = DescribePipeline::from_config(Arc::new(client), &config);
    let app = router(pipeline, &ServerOptions::from_config(&config)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!("Server running on http://{}", config.bind_addr);
    info!("Describing images with {}", config.model);

    axum::serve(listener, app).await?;
    Ok(())
}
