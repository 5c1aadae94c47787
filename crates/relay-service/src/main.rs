//! Messaging relay entry point.
//!
//! Bootstraps the cursor store, leader election over the raw-callback
//! pipeline, the consumer runtime, and the dev-only admin HTTP surface, then
//! runs until `/stop` is hit or the process receives SIGINT.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_consumer::{ConsumerRuntime, ConsumerRuntimeConfig, ProcessorPoolRouter};
use relay_core::{AppConfig, Readiness};
use relay_cursor::{CursorRuntime, EtcdCursorBackend, ShadowStore};
use relay_dispatch::{DispatchPublisher, KafkaDispatchPublisher};
use relay_election::LeaderElectionConfig;
use relay_processor::{BusinessTransition, NoopTransition, ProcessorPool};
use relay_stress::{generate_key_set, BatchSynthesizer, SequenceChecker, SequenceCheckingTransition};
use relay_vendor::{HttpVendorClient, RawEvent, TenantCredentials};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_service::driver::run_pipeline_body;
use relay_service::http::{router, AdminState};
use relay_service::pipeline::RawCallbackPipeline;

/// How often the internal poll ticker synthesizes a `RawEvent` in place of
/// the out-of-scope vendor webhook (§1, §6 "HTTP façade" is an edge, not
/// the core).
const CALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    init_tracing(&config);
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus metrics recorder")?;

    info!(app_id = %config.app_id, stress_mode = config.stress_mode, "relay-service starting");

    let root_cancel = CancellationToken::new();
    let readiness = Arc::new(Readiness::new());

    let cursor_backend = Arc::new(
        EtcdCursorBackend::connect(&config.etcd_endpoints, config.etcd_key_prefix.clone())
            .await
            .context("connecting to etcd cursor backend")?,
    );

    let dispatch: Arc<dyn DispatchPublisher> = Arc::new(
        KafkaDispatchPublisher::new(
            &config.kafka_brokers,
            &config.client_id,
            config.dispatch_topic.clone(),
            config.dlq_topic.clone(),
            config.dispatch_partitions,
        )
        .context("constructing dispatch publisher")?,
    );

    let dlq_sink: Arc<dyn DispatchPublisher> = Arc::new(
        KafkaDispatchPublisher::new(
            &config.kafka_brokers,
            &config.client_id,
            config.dlq_topic.clone(),
            config.dlq_topic.clone(),
            1,
        )
        .context("constructing dead-letter publisher")?,
    );

    let transition: Arc<dyn BusinessTransition> = if config.stress_mode {
        let checker = SequenceChecker::new();
        Arc::new(SequenceCheckingTransition::new(checker, Arc::new(NoopTransition)))
    } else {
        Arc::new(NoopTransition)
    };

    let pool = ProcessorPool::new(config.mailbox_capacity, config.idle_timeout(), transition);
    let router_handle = Arc::new(ProcessorPoolRouter(Arc::clone(&pool)));

    let consumer = ConsumerRuntime::new(
        ConsumerRuntimeConfig {
            brokers: config.kafka_brokers.clone(),
            group_id: config.consumer_group_id.clone(),
            client_id: config.client_id.clone(),
            topics: vec![config.dispatch_topic.clone()],
            max_inflight_per_partition: config.max_inflight_per_partition,
            max_inflight_global: config.max_inflight_global,
        },
        router_handle,
        Arc::clone(&dlq_sink),
        config.dlq_topic.clone(),
        root_cancel.clone(),
    )
    .context("constructing consumer runtime")?;

    readiness.mark_consumer_initialized();
    let consumer_handle = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    let leader_handle = if config.stress_mode {
        info!("stress mode enabled: the stress harness substitutes for the raw-callback pipeline, leader election is not started");
        None
    } else {
        Some(spawn_leader_election(&config, cursor_backend, Arc::clone(&dispatch), Arc::clone(&readiness), root_cancel.clone()))
    };

    let stress = if config.stress_mode {
        let keys = generate_key_set(config.dispatch_partitions);
        Some(Arc::new(BatchSynthesizer::new(keys, Arc::clone(&dispatch), config.app_id.clone())))
    } else {
        None
    };

    let admin_state = Arc::new(AdminState {
        readiness: Arc::clone(&readiness),
        stress,
        metrics_handle,
        root_cancel: root_cancel.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr)
        .await
        .with_context(|| format!("binding admin HTTP surface to {}", config.http_bind_addr))?;
    info!(addr = %config.http_bind_addr, "admin HTTP surface listening");

    let admin_cancel = root_cancel.clone();
    axum::serve(listener, router(admin_state))
        .with_graceful_shutdown(async move { admin_cancel.cancelled().await })
        .await
        .context("admin HTTP server error")?;

    root_cancel.cancel();
    if let Some(leader_handle) = leader_handle {
        let _ = leader_handle.await;
    }
    let _ = consumer_handle.await;

    info!("relay-service stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        relay_core::config::LogFormat::Json => subscriber.json().init(),
        relay_core::config::LogFormat::Pretty => subscriber.init(),
    }
}

/// Spawn the leader-election-driven raw-callback pipeline (components B/C).
/// Each leadership term reconciles the cursor shadow (§4.3 "On leader
/// (re)start") before the pipeline body starts draining synthesized
/// `RawEvent`s; a background ticker stands in for the out-of-scope vendor
/// webhook edge.
fn spawn_leader_election(
    config: &AppConfig,
    cursor_backend: Arc<EtcdCursorBackend>,
    dispatch: Arc<dyn DispatchPublisher>,
    readiness: Arc<Readiness>,
    root_cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let app_id = config.app_id.clone();
    let holder_id = format!("{}-{}", config.client_id, uuid::Uuid::new_v4());
    let election_config = LeaderElectionConfig::new(app_id.clone(), holder_id, config.leader_lease_ttl());
    let shadow_path = config.shadow_file_path.clone();
    let credentials = TenantCredentials {
        corp_id: config.vendor_corp_id.clone(),
        corp_secret: config.vendor_corp_secret.clone(),
    };
    let vendor = Arc::new(HttpVendorClient::new(config.vendor_base_url.clone()));
    let sync_limit = config.vendor_sync_limit;

    let (events_tx, events_rx) = mpsc::channel::<RawEvent>(256);
    let events_rx = Arc::new(Mutex::new(events_rx));

    let ticker_cancel = root_cancel.clone();
    let ticker_app_id = app_id.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CALLBACK_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker_cancel.cancelled() => return,
                _ = interval.tick() => {
                    let event = RawEvent {
                        tenant_kf_id: ticker_app_id.clone(),
                        token: String::new(),
                        event_kind: "poll".to_string(),
                        msg_type: "event".to_string(),
                        create_time: 0,
                    };
                    if events_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        let backend_dyn: Arc<dyn relay_cursor::CursorBackend> = cursor_backend;
        let result = relay_election::run(backend_dyn.clone(), election_config, root_cancel.clone(), {
            let app_id = app_id.clone();
            let shadow_path = shadow_path.clone();
            let credentials = credentials.clone();
            let vendor = Arc::clone(&vendor);
            let dispatch = Arc::clone(&dispatch);
            let events_rx = Arc::clone(&events_rx);
            let readiness = Arc::clone(&readiness);
            let backend_dyn = backend_dyn.clone();
            move |leader_cancel, lease| {
                let app_id = app_id.clone();
                let shadow_path = shadow_path.clone();
                let credentials = credentials.clone();
                let vendor = Arc::clone(&vendor);
                let dispatch = Arc::clone(&dispatch);
                let events_rx = Arc::clone(&events_rx);
                let readiness = Arc::clone(&readiness);
                let backend_dyn = backend_dyn.clone();
                async move {
                    let shadow = ShadowStore::new(shadow_path);
                    let cursor = CursorRuntime::setup_cursor_state(
                        app_id,
                        lease.epoch,
                        backend_dyn,
                        shadow,
                        relay_core::system_clock(),
                    )
                    .await?;
                    readiness.mark_leader_initialized();

                    let pipeline = RawCallbackPipeline::new(cursor, vendor, dispatch, credentials, sync_limit);
                    run_pipeline_body(pipeline, events_rx, leader_cancel).await
                }
            }
        })
        .await;

        if let Err(err) = result {
            warn!(error = %err, "leader election loop exited with an error");
        }
    })
}
