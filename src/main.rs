mod config;

use azure_openai_proxy::{
    build_gateway_router, build_metrics_layer_and_handle, build_metrics_router,
    client::create_hyper_client,
};
use clap::Parser as _;
use config::Config;
use std::future::IntoFuture as _;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    info!("Starting Azure OpenAI proxy with config: {:?}", config);
    let mode = config.validate()?;
    info!("Gateway mode: {:?}", mode);

    let mut serves = JoinSet::new();

    let prometheus_layer = if config.metrics {
        let (prometheus_layer, prometheus_handle) =
            build_metrics_layer_and_handle(config.metrics_prefix.clone());
        let metrics_router = build_metrics_router(prometheus_handle);
        let bind_addr = format!("0.0.0.0:{}", config.metrics_port);
        let listener = TcpListener::bind(&bind_addr).await?;
        serves.spawn(axum::serve(listener, metrics_router).into_future());
        info!("Metrics endpoint enabled on {}", bind_addr);
        Some(prometheus_layer)
    } else {
        info!("Metrics endpoint disabled");
        None
    };

    let http_client = create_hyper_client(config.pool_settings());
    let mut router = build_gateway_router(mode, http_client);

    if let Some(prometheus_layer) = prometheus_layer {
        router = router.layer(prometheus_layer);
    }

    let listener = TcpListener::bind(config.address).await?;
    serves.spawn(axum::serve(listener, router).into_future());
    info!("Azure OpenAI proxy listening on {}", config.address);

    if let Some(result) = serves.join_next().await {
        result?.map_err(anyhow::Error::from)
    } else {
        error!("No server tasks were spawned");
        Err(anyhow::anyhow!("No server tasks were spawned"))
    }
}
