//! `wsroute` binary serving a small demonstration router.
//!
//! Routes `{"key":"ping"}` and `{"key":"log","message":"..."}` messages and
//! logs what it receives.

mod cli;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Parser;
use log::info;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use wsroute::{
    Endpoint,
    HandlerError,
    Json,
    Lifetime,
    MessageContext,
    ProcessingConfig,
    Router,
    server::{ServerConfig, WsRouteServer},
};

struct Ping;

#[async_trait]
impl Endpoint for Ping {
    type Request = ();

    async fn handle(&self, ctx: &MessageContext<'_>, _request: ()) -> Result<(), HandlerError> {
        info!("ping: connection={}", ctx.connection().id());
        Ok(())
    }
}

#[derive(Deserialize)]
struct LogRequest {
    message: String,
}

struct LogMessage;

#[async_trait]
impl Endpoint for LogMessage {
    type Request = Json<LogRequest>;

    async fn handle(
        &self,
        ctx: &MessageContext<'_>,
        request: Json<LogRequest>,
    ) -> Result<(), HandlerError> {
        info!(
            "client log: connection={}, message={}",
            ctx.connection().id(),
            request.message
        );
        Ok(())
    }
}

fn server_config(cli: &cli::Cli) -> ServerConfig {
    ServerConfig {
        bind: cli.bind,
        pool_capacity: cli.pool_capacity,
        token_ttl: Duration::from_secs(cli.token_ttl_secs),
        require_token: cli.require_token,
        processing: ProcessingConfig::default()
            .with_max_parallelism(cli.parallelism)
            .with_max_message_size(cli.max_message_size)
            .with_receive_chunk_size(cli.chunk_size),
        ..ServerConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = cli::Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("metrics exporter listening: addr={addr}");
    }

    let dispatcher = Router::builder()
        .endpoint("ping", Lifetime::Singleton, |_| Ok(Ping))?
        .endpoint("log", Lifetime::Transient, |_| Ok(LogMessage))?
        .build();

    let server = WsRouteServer::bind(server_config(&cli), Arc::new(dispatcher)).await?;
    server.run().await?;
    Ok(())
}
