// flight-gateway: HTTP front end for the vendor booking pipeline

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use flight_order_pipeline::{
    api::AppState, build_router, init_tracing, serve, AppConfig, VendorFlightService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(&config.logger).context("initializing logging")?;

    let addr = config.server.socket_addr()?;
    let service = VendorFlightService::from_config(&config.vendor)
        .context("building vendor HTTP client")?;
    let router = build_router(AppState::new(Arc::new(service)), &config)
        .context("registering plugins")?;

    info!(
        ratelimit = config.modules.ratelimit.enable,
        auth = config.modules.auth.enable,
        proxy = config.vendor.proxy_url.is_some(),
        "starting flight gateway"
    );
    serve(addr, router).await.context("running HTTP server")
}
