//! Port polling
//!
//! Every cycle the poller checks which sensors are attached to the master, persists
//! connection changes, matches newly attached sensors to an IODD of the collection
//! and records the decoded process data of every matched port.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use iotbox_common::{IotBoxError, PortId};
use iotbox_iodd::{Iodd, IoddCollection, IoddFetcher, UnitDefinitions, acquire};
use iotbox_persistence::{NewReading, PersistenceService};

use crate::client::{DeviceName, MasterClient};
use crate::metrics::METRICS;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Acquisition state of one port
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortState {
    pub port: PortId,
    pub connected: bool,
    pub sensor: Option<String>,
    #[serde(skip)]
    pub iodd: Option<Iodd>,
}

impl PortState {
    fn new(port: PortId) -> Self {
        Self {
            port,
            connected: false,
            sensor: None,
            iodd: None,
        }
    }

    fn attach(&mut self, sensor: String) {
        self.connected = true;
        self.sensor = Some(sensor);
        self.iodd = None;
    }

    fn detach(&mut self) {
        self.connected = false;
        self.sensor = None;
        self.iodd = None;
    }
}

/// Port states and the IODD collection, shared between the poller and the console
pub struct AcquisitionState {
    ports: RwLock<Vec<PortState>>,
    collection: RwLock<Arc<IoddCollection>>,
    rematch: AtomicBool,
}

impl AcquisitionState {
    pub fn new(port_count: u8, collection: IoddCollection) -> Self {
        Self {
            ports: RwLock::new(PortId::all(port_count).into_iter().map(PortState::new).collect()),
            collection: RwLock::new(Arc::new(collection)),
            rematch: AtomicBool::new(false),
        }
    }

    /// Snapshot of all ports
    pub fn ports(&self) -> Vec<PortState> {
        self.ports.read().clone()
    }

    pub fn port(&self, port: PortId) -> Option<PortState> {
        self.ports.read().iter().find(|p| p.port == port).cloned()
    }

    pub fn port_ids(&self) -> Vec<PortId> {
        self.ports.read().iter().map(|p| p.port).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.ports.read().iter().filter(|p| p.connected).count()
    }

    pub fn collection(&self) -> Arc<IoddCollection> {
        self.collection.read().clone()
    }

    /// Swap in a reloaded collection. Ports are matched against it on the next cycle.
    pub fn replace_collection(&self, collection: IoddCollection) {
        *self.collection.write() = Arc::new(collection);
        self.rematch.store(true, Ordering::Release);
    }

    fn take_rematch(&self) -> bool {
        self.rematch.swap(false, Ordering::AcqRel)
    }

    fn update<R>(&self, port: PortId, f: impl FnOnce(&mut PortState) -> R) -> Option<R> {
        self.ports.write().iter_mut().find(|p| p.port == port).map(f)
    }
}

struct AutoFetch {
    fetcher: Arc<dyn IoddFetcher>,
    units: Arc<UnitDefinitions>,
    /// Sensors already looked up, each sensor is fetched at most once per run
    attempted: Mutex<HashSet<String>>,
}

pub struct Poller {
    client: Arc<dyn MasterClient>,
    persistence: Arc<dyn PersistenceService>,
    state: Arc<AcquisitionState>,
    interval: Duration,
    auto_fetch: Option<AutoFetch>,
}

impl Poller {
    pub fn new(
        client: Arc<dyn MasterClient>,
        persistence: Arc<dyn PersistenceService>,
        state: Arc<AcquisitionState>,
    ) -> Self {
        Self {
            client,
            persistence,
            state,
            interval: DEFAULT_POLL_INTERVAL,
            auto_fetch: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Download IODDs of attached sensors that are missing from the collection.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn IoddFetcher>, units: Arc<UnitDefinitions>) -> Self {
        self.auto_fetch = Some(AutoFetch {
            fetcher,
            units,
            attempted: Mutex::new(HashSet::new()),
        });
        self
    }

    pub fn state(&self) -> &Arc<AcquisitionState> {
        &self.state
    }

    /// Take over the connection state persisted by a previous run.
    pub async fn restore_connections(&self) -> anyhow::Result<()> {
        for connection in self.persistence.connection_find_all().await? {
            let Ok(port) = PortId::new(connection.port) else {
                continue;
            };
            if let (true, Some(sensor)) = (connection.connected, connection.sensor) {
                debug!("Restored sensor {} on port {}", sensor, port);
                self.state.update(port, |p| p.attach(sensor));
            }
        }
        Ok(())
    }

    /// Read the product name of every port and persist attach and detach events.
    ///
    /// Returns whether any port changed.
    pub async fn check_connections(&self) -> anyhow::Result<bool> {
        let mut changed = false;

        for port in self.state.port_ids() {
            let current = self.state.port(port).unwrap_or_else(|| PortState::new(port));

            match self.client.read_product_name(port).await {
                // Some masters report an empty name while a sensor starts up
                Ok(DeviceName::Present(name)) if name.is_empty() => {}
                Ok(DeviceName::Present(name)) => {
                    if current.connected && current.sensor.as_deref() == Some(name.as_str()) {
                        continue;
                    }
                    self.persistence
                        .connection_update(port, true, Some(&name))
                        .await?;
                    info!("Connected sensor {} to port {}", name, port);
                    self.state.update(port, |p| p.attach(name));
                    METRICS.inc_connection_changes();
                    changed = true;
                }
                Ok(DeviceName::NotConnected) | Ok(DeviceName::NoData) => {
                    if !current.connected {
                        continue;
                    }
                    self.persistence.connection_update(port, false, None).await?;
                    info!("Disconnected sensor from port {}", port);
                    self.state.update(port, PortState::detach);
                    METRICS.inc_connection_changes();
                    changed = true;
                }
                Err(e) => {
                    METRICS.inc_master_errors();
                    warn!("Reading product name of port {} failed: {}", port, e);
                }
            }
        }

        Ok(changed)
    }

    /// Assign the IODD of the collection to every connected port.
    ///
    /// Returns the sensors without an IODD. Their ports stay connected but record nothing.
    pub fn match_ports_to_iodds(&self) -> Vec<String> {
        let collection = self.state.collection();
        let mut missing = Vec::new();

        for port in self.state.ports.write().iter_mut() {
            let Some(sensor) = port.sensor.as_deref() else {
                port.iodd = None;
                continue;
            };
            match collection.require_for_sensor(sensor) {
                Ok(iodd) => {
                    if port.iodd.as_ref().map(|i| &i.file) != Some(&iodd.file) {
                        info!("Matched sensor {} on port {} to {}", sensor, port.port, iodd.file_name());
                    }
                    port.iodd = Some(iodd.clone());
                }
                Err(e) => {
                    warn!("{}", e);
                    METRICS.inc_iodd_missing();
                    port.iodd = None;
                    missing.push(sensor.to_string());
                }
            }
        }

        missing
    }

    /// Decode and store the process data of every port with a matched IODD.
    ///
    /// All readings of one cycle share the same timestamp.
    pub async fn record_readings(&self) -> anyhow::Result<u64> {
        let time = Local::now().naive_local();
        let mut readings = Vec::new();

        for port in self.state.ports() {
            let (true, Some(sensor), Some(iodd)) = (port.connected, port.sensor, port.iodd) else {
                continue;
            };
            match self.client.read_process_data(port.port).await {
                Ok(bytes) => readings.push(NewReading {
                    port: port.port,
                    time,
                    sensor,
                    ips: iodd.point_names(),
                    readings: iodd.decode(&bytes),
                    lower_limits: iodd.lower_limits(),
                    upper_limits: iodd.upper_limits(),
                    units: iodd.units(),
                }),
                Err(e) => {
                    METRICS.inc_master_errors();
                    warn!("Reading process data of port {} failed: {}", port.port, e);
                }
            }
        }

        let recorded = self.persistence.reading_insert_many(readings).await?;
        METRICS.add_readings_recorded(recorded);
        Ok(recorded)
    }

    async fn fetch_missing(&self, missing: Vec<String>) -> anyhow::Result<()> {
        let Some(auto_fetch) = self.auto_fetch.as_ref() else {
            return Ok(());
        };
        let sensors: Vec<String> = {
            let mut attempted = auto_fetch.attempted.lock();
            missing
                .into_iter()
                .filter(|sensor| attempted.insert(sensor.clone()))
                .collect()
        };
        if sensors.is_empty() {
            return Ok(());
        }

        let dir: PathBuf = self.state.collection().dir().to_path_buf();
        let report = acquire(&dir, auto_fetch.fetcher.as_ref(), &sensors, false).await?;
        for sensor in &report.missing {
            warn!("No IODD available for sensor {}", sensor);
        }
        if report.fetched.is_empty() && report.reused.is_empty() {
            return Ok(());
        }

        METRICS.add_iodd_fetched(report.fetched.len() as u64);
        let units = auto_fetch.units.clone();
        let collection =
            tokio::task::spawn_blocking(move || IoddCollection::load(&dir, &units)).await??;
        self.state.replace_collection(collection);
        Ok(())
    }

    /// One acquisition cycle
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let changed = self.check_connections().await?;

        if changed || self.state.take_rematch() {
            let missing = self.match_ports_to_iodds();
            if !missing.is_empty()
                && let Err(e) = self.fetch_missing(missing).await
            {
                warn!("Fetching missing IODDs failed: {}", e);
            }
        }

        self.record_readings().await?;

        METRICS.inc_poll_cycles();
        METRICS.set_connected_ports(self.state.connected_count() as u64);
        Ok(())
    }

    /// Poll until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Polling {} master {} every {:?}",
            self.client.kind(),
            self.client.endpoint(),
            self.interval
        );
        if let Err(e) = self.restore_connections().await {
            warn!("Restoring port connections failed: {}", e);
        }
        if self.state.connected_count() > 0 {
            self.state.rematch.store(true, Ordering::Release);
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        match e.downcast_ref::<IotBoxError>() {
                            Some(err) => error!("Poll cycle failed: {}", err),
                            None => error!("Poll cycle failed: {:#}", e),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Cursor, Write};

    use async_trait::async_trait;
    use iotbox_persistence::{
        ConnectionPersistence, DbPoolOptions, ReadingPersistence, SqlitePersistService, connect,
    };

    use super::*;
    use crate::client::testing::FakeMaster;

    const O5D100: &str =
        include_str!("../../iotbox-iodd/tests/fixtures/ifm-O5D100-20190314-IODD1.1.xml");
    const O5D100_FILE: &str = "ifm-O5D100-20190314-IODD1.1.xml";

    async fn persistence() -> Arc<SqlitePersistService> {
        let db = connect("sqlite::memory:", &DbPoolOptions::default())
            .await
            .unwrap();
        let service = SqlitePersistService::new(db);
        service.init_schema(8, true, &[]).await.unwrap();
        Arc::new(service)
    }

    fn collection(dir: &tempfile::TempDir, with_o5d: bool) -> IoddCollection {
        if with_o5d {
            std::fs::write(dir.path().join(O5D100_FILE), O5D100).unwrap();
        }
        IoddCollection::load(dir.path(), &UnitDefinitions::builtin()).unwrap()
    }

    fn port(n: u8) -> PortId {
        PortId::new(n).unwrap()
    }

    struct Fixture {
        master: Arc<FakeMaster>,
        store: Arc<SqlitePersistService>,
        poller: Poller,
        _dir: tempfile::TempDir,
    }

    async fn fixture(with_o5d: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let master = Arc::new(FakeMaster::default());
        let store = persistence().await;
        let state = Arc::new(AcquisitionState::new(8, collection(&dir, with_o5d)));
        let poller = Poller::new(master.clone(), store.clone(), state);
        Fixture {
            master,
            store,
            poller,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_check_connections_attach_and_detach() {
        let f = fixture(true).await;
        assert!(!f.poller.check_connections().await.unwrap());

        f.master.attach(2, "O5D100", vec![0x13, 0x49]);
        assert!(f.poller.check_connections().await.unwrap());
        let state = f.poller.state().port(port(2)).unwrap();
        assert!(state.connected);
        assert_eq!(state.sensor.as_deref(), Some("O5D100"));
        let stored = f.store.connection_find(port(2)).await.unwrap().unwrap();
        assert!(stored.connected);
        assert_eq!(stored.sensor.as_deref(), Some("O5D100"));

        // unchanged on the next cycle
        assert!(!f.poller.check_connections().await.unwrap());

        f.master.detach(2);
        assert!(f.poller.check_connections().await.unwrap());
        assert!(!f.poller.state().port(port(2)).unwrap().connected);
        let stored = f.store.connection_find(port(2)).await.unwrap().unwrap();
        assert!(!stored.connected);
        assert!(stored.sensor.is_none());
    }

    #[tokio::test]
    async fn test_check_connections_ignores_empty_name() {
        let f = fixture(true).await;
        f.master.set_name(4, DeviceName::Present(String::new()));
        assert!(!f.poller.check_connections().await.unwrap());
        assert!(!f.poller.state().port(port(4)).unwrap().connected);
    }

    #[tokio::test]
    async fn test_check_connections_master_error() {
        let f = fixture(true).await;
        *f.master.fail.lock() = true;
        assert!(!f.poller.check_connections().await.unwrap());
        assert_eq!(f.poller.state().connected_count(), 0);
    }

    #[tokio::test]
    async fn test_match_and_record() {
        let f = fixture(true).await;
        f.master.attach(1, "O5D100", vec![0x13, 0x49]);
        f.master.attach(3, "KG5065", vec![0x00]);
        f.poller.check_connections().await.unwrap();

        let missing = f.poller.match_ports_to_iodds();
        assert_eq!(missing, vec!["KG5065".to_string()]);
        assert!(f.poller.state().port(port(1)).unwrap().iodd.is_some());
        // port without IODD stays connected
        let unmatched = f.poller.state().port(port(3)).unwrap();
        assert!(unmatched.connected);
        assert!(unmatched.iodd.is_none());

        assert_eq!(f.poller.record_readings().await.unwrap(), 1);
        let reading = f.store.reading_find_latest(port(1)).await.unwrap().unwrap();
        assert_eq!(reading.sensor, "O5D100");
        assert_eq!(reading.ips, vec!["Distance", "OUT2", "OUT1"]);
        assert_eq!(reading.readings, vec![1.234, 0.0, 1.0]);
        assert_eq!(reading.units[0], "m");
        assert_eq!(reading.lower_limits[0], 0.03);
        assert_eq!(reading.upper_limits[0], 2.0);
        assert!(f.store.reading_find_latest(port(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_once() {
        let f = fixture(true).await;
        f.master.attach(5, "O5D100", vec![0x13, 0x49]);

        f.poller.poll_once().await.unwrap();
        f.poller.poll_once().await.unwrap();
        assert_eq!(f.store.reading_count(port(5)).await.unwrap(), 2);

        f.master.detach(5);
        f.poller.poll_once().await.unwrap();
        assert_eq!(f.store.reading_count(port(5)).await.unwrap(), 2);
        assert!(f.poller.state().port(port(5)).unwrap().iodd.is_none());
    }

    #[tokio::test]
    async fn test_restore_connections() {
        let f = fixture(true).await;
        f.store
            .connection_update(port(6), true, Some("O5D100"))
            .await
            .unwrap();
        f.poller.restore_connections().await.unwrap();
        assert_eq!(
            f.poller.state().port(port(6)).unwrap().sensor.as_deref(),
            Some("O5D100")
        );

        // the sensor was removed while the box was down
        assert!(f.poller.check_connections().await.unwrap());
        assert!(!f.store.connection_find(port(6)).await.unwrap().unwrap().connected);
    }

    struct ArchiveFetcher {
        archives: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IoddFetcher for ArchiveFetcher {
        async fn fetch_archive(&self, product: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.requests.lock().push(product.to_string());
            Ok(self.archives.get(product).cloned())
        }
    }

    fn o5d_archive() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(O5D100_FILE, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(O5D100.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_auto_fetch_missing_iodd() {
        let dir = tempfile::tempdir().unwrap();
        let master = Arc::new(FakeMaster::default());
        let store = persistence().await;
        let state = Arc::new(AcquisitionState::new(8, collection(&dir, false)));
        let fetcher = Arc::new(ArchiveFetcher {
            archives: HashMap::from([("O5D100".to_string(), o5d_archive())]),
            requests: Mutex::new(Vec::new()),
        });
        let poller = Poller::new(master.clone(), store.clone(), state.clone())
            .with_fetcher(fetcher.clone(), Arc::new(UnitDefinitions::builtin()));

        master.attach(1, "O5D100", vec![0x13, 0x49]);
        master.attach(2, "UNKNOWN1", vec![0x00]);

        // first cycle fetches, second cycle rematches and records
        poller.poll_once().await.unwrap();
        assert_eq!(state.collection().len(), 1);
        poller.poll_once().await.unwrap();
        assert!(state.port(port(1)).unwrap().iodd.is_some());
        assert_eq!(store.reading_count(port(1)).await.unwrap(), 1);

        // unknown sensors are only requested once
        poller.poll_once().await.unwrap();
        let requests = fetcher.requests.lock().clone();
        assert_eq!(requests.iter().filter(|r| *r == "UNKNOWN1").count(), 1);
    }

    #[tokio::test]
    async fn test_run_matches_restored_ports() {
        let f = fixture(true).await;
        // connected before the restart, the master still reports the same sensor
        f.store
            .connection_update(port(6), true, Some("O5D100"))
            .await
            .unwrap();
        f.master.attach(6, "O5D100", vec![0x13, 0x49]);

        let state = f.poller.state().clone();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(f.poller.with_interval(Duration::from_millis(10)).run(rx));

        let mut recorded = 0;
        for _ in 0..100 {
            recorded = f.store.reading_count(port(6)).await.unwrap();
            if recorded > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(recorded > 0);
        let restored = state.port(port(6)).unwrap();
        assert!(restored.connected);
        assert_eq!(
            restored.iodd.as_ref().map(Iodd::file_name).as_deref(),
            Some(O5D100_FILE)
        );
        let reading = f.store.reading_find_latest(port(6)).await.unwrap().unwrap();
        assert_eq!(reading.readings, vec![1.234, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(true).await;
        let (tx, rx) = broadcast::channel(1);
        let poller = f.poller.with_interval(Duration::from_millis(10));
        let handle = tokio::spawn(poller.run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
