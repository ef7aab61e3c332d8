//! Main entry point for the IoT Box server.
//!
//! Starts the acquisition poller, the optional OPC-UA value bridge and the
//! dashboard HTTP server, and stops all of them on Ctrl+C or SIGTERM.

use std::sync::Arc;

use iotbox_common::IotBoxError;
use iotbox_console::AppState;
use iotbox_iodd::{HttpArchiveFetcher, IoddCollection, IoddFetcher, UnitDefinitions, collection};
use iotbox_master::{AcquisitionState, Bridge, NodeAccess, OpcUaNodeAccess, Poller, create_client};
use iotbox_persistence::{PersistenceService, SqlitePersistService};
use iotbox_server::{model::Configuration, startup};
use tracing::{error, info, warn};

fn build_bridge(configuration: &Configuration) -> anyhow::Result<Bridge> {
    let target_url = configuration.bridge_target_url().ok_or_else(|| {
        IotBoxError::ConfigError("bridge.target_url is required when the bridge is enabled".to_string())
    })?;
    let mappings = configuration.bridge_mappings()?;
    if mappings.is_empty() {
        warn!("Bridge is enabled without mappings");
    }

    let source: Arc<dyn NodeAccess> =
        Arc::new(OpcUaNodeAccess::new(&configuration.bridge_source_url()));
    let target: Arc<dyn NodeAccess> = Arc::new(OpcUaNodeAccess::new(&target_url));
    Ok(Bridge::new(source, target, mappings)?.with_interval(configuration.bridge_interval()))
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    info!("Starting IoT Box {}", configuration.version());

    // Database
    let port_count = configuration.port_count();
    let reset_readings = configuration.reset_readings_for()?;
    let database_connection = iotbox_persistence::connect(
        &configuration.database_url(),
        &configuration.db_pool_options(),
    )
    .await?;
    let persistence: Arc<dyn PersistenceService> =
        Arc::new(SqlitePersistService::new(database_connection));
    persistence
        .init_schema(
            port_count,
            configuration.reset_connections(),
            &reset_readings,
        )
        .await?;

    // IODD collection
    let units = Arc::new(UnitDefinitions::load_or_builtin(
        &configuration.unit_definitions_path(),
    )?);
    let collection_dir = configuration.collection_dir();
    let stale = collection::verify_index(&collection_dir)?;
    if !stale.is_empty() {
        info!("Removed {} stale IODD index entries", stale.len());
    }
    let collection = IoddCollection::load(&collection_dir, &units)?;
    let acquisition = Arc::new(AcquisitionState::new(port_count, collection));

    let fetcher: Option<Arc<dyn IoddFetcher>> = HttpArchiveFetcher::from_template(
        configuration.fetch_url_template().as_deref(),
        configuration.fetch_timeout(),
    )?
    .map(|fetcher| Arc::new(fetcher) as Arc<dyn IoddFetcher>);

    // Master
    let master_kind = configuration.master_kind()?;
    let master_url = configuration.master_url();
    info!("Using {} master at {}", master_kind, master_url);
    let client = create_client(master_kind, &master_url, configuration.master_timeout())?;

    let bridge = if configuration.bridge_enabled() {
        Some(build_bridge(&configuration)?)
    } else {
        info!("Value bridge is disabled");
        None
    };
    let bridge_mappings = bridge.as_ref().map_or(0, |b| b.mappings().len());

    let app_state = Arc::new(AppState {
        settings: Arc::new(configuration.settings(bridge_mappings)?),
        persistence: persistence.clone(),
        acquisition: acquisition.clone(),
        units: units.clone(),
        fetcher: fetcher.clone(),
    });

    let shutdown_signal = startup::wait_for_shutdown_signal();

    let mut poller = Poller::new(client, persistence, acquisition)
        .with_interval(configuration.poll_interval());
    if configuration.auto_fetch()
        && let Some(fetcher) = &fetcher
    {
        poller = poller.with_fetcher(fetcher.clone(), units.clone());
    }
    let poller_task = tokio::spawn(poller.run(shutdown_signal.subscribe()));
    let bridge_task = bridge.map(|bridge| tokio::spawn(bridge.run(shutdown_signal.subscribe())));

    // Dashboard
    let server_address = configuration.server_address();
    let server_port = configuration.server_port()?;
    let server = startup::dashboard_server(app_state, server_address.clone(), server_port)?;
    let server_handle = server.handle();
    let mut shutdown_rx = shutdown_signal.subscribe();
    info!("Dashboard listening on {}:{}", server_address, server_port);

    let mut server_task = actix_rt::spawn(server);
    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Err(e)) => error!("Dashboard server error: {}", e),
                Err(e) => error!("Dashboard server task failed: {}", e),
                Ok(Ok(())) => {}
            }
            shutdown_signal.shutdown();
        }
        _ = shutdown_rx.recv() => {
            info!("Dashboard server shutting down gracefully");
            server_handle.stop(true).await;
        }
    }

    let shutdown_timeout = configuration.shutdown_timeout();
    if tokio::time::timeout(shutdown_timeout, poller_task)
        .await
        .is_err()
    {
        warn!("Poller did not stop within {:?}", shutdown_timeout);
    }
    if let Some(task) = bridge_task
        && tokio::time::timeout(shutdown_timeout, task).await.is_err()
    {
        warn!("Bridge did not stop within {:?}", shutdown_timeout);
    }

    info!("IoT Box server shutdown complete");

    Ok(())
}
