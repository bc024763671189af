use std::sync::Arc;

use anyhow::Context;

use hubcast_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hubcast_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let services = Arc::new(hubcast_api::app::services::build_services(&settings).await?);
    let app = hubcast_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
