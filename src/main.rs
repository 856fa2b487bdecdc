//! NFL Player Props Ingestion Service
//!
//! Polls player-prop odds through rotating provider credentials, serves a
//! last-known-good snapshot when every credential is out of quota, and
//! publishes each canonical slate to a Redis stream.

use std::time::Duration;

use anyhow::Result;
use axum::{routing::get, Router};
use tracing::{error, info, warn};

use props_ingestion::config::Config;
use props_ingestion::health::{health_handler, HealthState};
use props_ingestion::publish::SlatePublisher;
use props_ingestion::PropsService;

struct Poller {
    service: PropsService,
    publisher: Option<SlatePublisher>,
    health: HealthState,
    config: Config,
}

impl Poller {
    /// Main polling loop
    async fn run(&self) -> Result<()> {
        info!(
            "Starting props ingestion loop (poll interval: {}s)",
            self.config.poll_interval_seconds
        );

        // Periodic cache cleanup
        let cache = self.service.cache().clone();
        let max_age = Duration::from_secs(self.config.events_ttl_seconds.max(self.config.odds_ttl_seconds) * 4);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                cache.purge_expired(max_age).await;
            }
        });

        loop {
            let start = std::time::Instant::now();

            match self.poll_once().await {
                Ok(count) => {
                    info!("Poll completed: {} props in {:?}", count, start.elapsed());
                }
                Err(e) => {
                    error!("Poll failed: {:?}", e);
                }
            }

            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
        }
    }

    /// Single poll iteration
    async fn poll_once(&self) -> Result<usize> {
        let slate = match self
            .service
            .get_slate(None, &self.config.default_books, &self.config.default_markets)
            .await
        {
            Ok(slate) => slate,
            Err(e) => {
                if e.is_rate_limited() {
                    warn!("Quota exhausted with no snapshot available; retrying next poll");
                }
                self.health.record_error(e.to_string()).await;
                return Err(e.into());
            }
        };

        let count = slate.props.len();
        self.health.record_success(count, slate.provenance.stale).await;

        if let Some(publisher) = &self.publisher {
            publisher.publish(&slate).await?;
        }

        Ok(count)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Local development convenience; deployed containers inject env/secrets.
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("props_ingestion=info".parse()?),
        )
        .init();

    info!("NFL Player Props Ingestion Service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(?config, "Configuration loaded");

    let service = config.build_service()?;
    let publisher = match &config.redis_url {
        Some(url) => Some(SlatePublisher::connect(url, 5).await?),
        None => None,
    };

    let health_state = HealthState::new();
    let poller = Poller {
        service,
        publisher,
        health: health_state.clone(),
        config: config.clone(),
    };

    // Start health check server
    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(health_state);

    let health_addr = format!("0.0.0.0:{}", config.health_port);
    info!("Health endpoint listening on {}", health_addr);

    let listener = tokio::net::TcpListener::bind(&health_addr).await?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health server error: {:?}", e);
        }
    });

    // Check if running in one-shot mode (manual trigger)
    if config.run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        match poller.poll_once().await {
            Ok(count) => {
                info!("One-shot poll completed: {} props", count);
            }
            Err(e) => {
                error!("One-shot poll failed: {:?}", e);
                return Err(e);
            }
        }
        return Ok(());
    }

    // Handle shutdown gracefully (continuous mode)
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        result = poller.run() => {
            if let Err(e) = result {
                error!("Service error: {:?}", e);
            }
        }
        _ = ctrl_c => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
