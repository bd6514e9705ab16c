//! Vertex Agent binary
//!
//! Loads every installed instance and publishes their events until the
//! process is interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vertex_client::KernelClient;
use vertex_core::domain::event::Event;

use vertex_agent::bus::EventBus;
use vertex_agent::config::Config;
use vertex_agent::logger::LoggerRegistry;
use vertex_agent::runner::{DockerRunner, ScriptRunner};
use vertex_agent::service::InstanceService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vertex_agent=info,vertex_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Vertex Agent");

    let config = Config::from_env();
    config.validate()?;
    info!(
        "Loaded configuration: data_dir={}, kernel_url={}",
        config.data_dir.display(),
        config.kernel_url
    );

    let kernel = Arc::new(KernelClient::new(config.kernel_url.clone()));
    let bus = Arc::new(EventBus::with_max_rounds(config.dispatch_rounds));
    let logs = Arc::new(LoggerRegistry::new(config.log_buffer_size));

    let service = InstanceService::new(
        config.instances_dir(),
        Arc::clone(&bus),
        logs,
        Arc::new(DockerRunner::new(kernel)),
        Arc::new(ScriptRunner::new()),
    );

    // Mirror status changes into the agent's own log
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::StatusChange {
                    instance_uuid,
                    name,
                    status,
                    ..
                } => info!("{} ({}) is {}", name, instance_uuid, status),
                Event::InstanceCreated { instance_uuid, service_id } => {
                    info!("Instance {} of {} created", instance_uuid, service_id)
                }
                Event::InstanceDeleted { instance_uuid, service_id } => {
                    info!("Instance {} of {} deleted", instance_uuid, service_id)
                }
                Event::Log { .. } | Event::InstancesChange => {}
            }
        }
    });

    let instances_dir = config.instances_dir();
    let loaded = service
        .load_all()
        .await
        .with_context(|| format!("Failed to load instances from {}", instances_dir.display()))?;

    info!("Agent initialized with {} instance(s)", loaded);
    for instance in service.list() {
        info!("  - {} ({}): {}", instance.name(), instance.uuid, instance.status);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    for instance in service.list() {
        if instance.is_running() {
            if let Err(e) = service.stop(instance.uuid).await {
                warn!("Failed to stop {} ({}): {}", instance.name(), instance.uuid, e);
            }
        }
    }

    Ok(())
}
