use anyhow::Result;
use courier_core::broker::provision_topics;
use courier_core::config::DeliveryMode;
use courier_core::{Config, CourierContext};
use courier_delivery::apns::ApnsProvider;
use courier_delivery::channels::{EmailSender, MailTransport, PushProvider, PushSender, SystemSender};
use courier_delivery::email::{ResendTransport, SmtpTransport};
use courier_delivery::fcm::FcmProvider;
use courier_delivery::providers::PlatformRouter;
use courier_delivery::{BrokerJobs, DeliveryJobs, DeviceRegistry, Dispatcher, InlineJobs};
use courier_notify::{consumer::run as run_consumer, NotificationJobHandler, NotificationService};
use courier_scheduler::{run as run_scheduler, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio;
use tracing;
use tracing_subscriber;

fn mail_transport(config: &Config) -> Result<Arc<dyn MailTransport>> {
    match &config.delivery.resend_api_key {
        Some(api_key) => Ok(Arc::new(ResendTransport::new(
            api_key.clone(),
            config.delivery.resend_from_email.clone(),
        )?)),
        None => Ok(Arc::new(SmtpTransport::new())),
    }
}

fn push_provider(config: &Config) -> Result<Arc<dyn PushProvider>> {
    let fcm: Arc<dyn PushProvider> = Arc::new(FcmProvider::new());
    let apns = ApnsProvider::from_config(&config.delivery)?.map(|p| Arc::new(p) as Arc<dyn PushProvider>);
    Ok(Arc::new(PlatformRouter::new(fcm, apns)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Courier notification engine");

    let config = Config::from_env();
    provision_topics(&config.redpanda).await?;
    let ctx = CourierContext::new(config).await?;

    tracing::info!("Courier context initialized");

    let devices = DeviceRegistry::new(ctx.store.clone());
    let dispatcher = Arc::new(
        Dispatcher::new(
            ctx.store.clone(),
            ctx.settings.clone(),
            Arc::new(ctx.rate_limiter()),
            Duration::from_secs(ctx.config.delivery.channel_timeout_secs),
        )
        .with_sender(Arc::new(EmailSender::new(ctx.settings.clone(), mail_transport(&ctx.config)?)))
        .with_sender(Arc::new(PushSender::new(
            ctx.settings.clone(),
            devices.clone(),
            push_provider(&ctx.config)?,
        )))
        .with_sender(Arc::new(SystemSender::new(ctx.settings.clone()))),
    );

    let jobs: Arc<dyn DeliveryJobs> = match ctx.config.delivery.mode {
        DeliveryMode::Broker => Arc::new(BrokerJobs::new(ctx.publisher.clone())),
        DeliveryMode::Inline => Arc::new(InlineJobs::new(dispatcher.clone())),
    };
    tracing::info!(mode = ?ctx.config.delivery.mode, "Delivery jobs configured");

    let service = Arc::new(NotificationService::new(
        ctx.store.clone(),
        ctx.store.clone(),
        ctx.store.clone(),
        devices,
        jobs,
    ));

    let scheduler = Arc::new(Scheduler::new(
        ctx.store.clone(),
        ctx.store.clone(),
        ctx.settings.clone(),
        dispatcher.clone(),
        ctx.config.scheduler.clone(),
    ));

    tokio::spawn(async move {
        if let Err(e) = run_scheduler(scheduler).await {
            tracing::error!("Scheduler error: {}", e);
        }
    });

    // Queue consumer runs in main task
    let handler = NotificationJobHandler::new(service, dispatcher);
    tokio::select! {
        result = run_consumer(ctx, handler) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
    }

    Ok(())
}
