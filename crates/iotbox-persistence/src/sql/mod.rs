//! SQL persistence backend (SQLite via SeaORM)

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use sea_orm::{
    prelude::Expr,
    sea_query::{Asterisk, OnConflict},
    *,
};
use tracing::{debug, info, warn};

use iotbox_common::PortId;

use crate::entity::{port_connection, reading};
use crate::list_codec::{FloatList, StringList};
use crate::model::*;
use crate::traits::*;

/// Connection pool settings
#[derive(Clone, Debug)]
pub struct DbPoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub sqlx_logging: bool,
}

impl Default for DbPoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(8),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            sqlx_logging: false,
        }
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Open a database connection pool.
///
/// In-memory SQLite databases live in a single connection, so the pool is pinned
/// to exactly one connection for them.
pub async fn connect(url: &str, pool: &DbPoolOptions) -> anyhow::Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(url.to_string());

    if is_in_memory(url) {
        warn!("Using in-memory database, readings are lost on shutdown");
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .idle_timeout(pool.idle_timeout)
            .max_lifetime(pool.max_lifetime);
    }
    opt.connect_timeout(pool.connect_timeout)
        .acquire_timeout(pool.acquire_timeout)
        .sqlx_logging(pool.sqlx_logging);

    info!(
        max_connections = pool.max_connections,
        min_connections = pool.min_connections,
        sqlx_logging = pool.sqlx_logging,
        "Database connection pool configured"
    );

    Ok(Database::connect(opt).await?)
}

/// SQLite persistence service
///
/// Wraps a SeaORM `DatabaseConnection` and implements all persistence traits.
pub struct SqlitePersistService {
    db: DatabaseConnection,
}

impl SqlitePersistService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn create_tables(&self) -> anyhow::Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let mut connections = schema.create_table_from_entity(port_connection::Entity);
        connections.if_not_exists();
        self.db.execute(backend.build(&connections)).await?;

        let mut readings = schema.create_table_from_entity(reading::Entity);
        readings.if_not_exists();
        self.db.execute(backend.build(&readings)).await?;

        for mut index in schema.create_index_from_entity(reading::Entity) {
            index.if_not_exists();
            self.db.execute(backend.build(&index)).await?;
        }
        Ok(())
    }

    async fn seed_connections(&self, port_count: u8) -> anyhow::Result<()> {
        let now = Local::now().naive_local();
        let rows = PortId::all(port_count)
            .into_iter()
            .map(|port| port_connection::ActiveModel {
                id: Set(port.get() as i32),
                connected: Set(false),
                sensor: Set(None),
                updated_at: Set(now),
            });

        port_connection::Entity::insert_many(rows)
            .on_conflict(
                OnConflict::column(port_connection::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}

// ============================================================================
// PersistenceService implementation
// ============================================================================

#[async_trait]
impl PersistenceService for SqlitePersistService {
    async fn init_schema(
        &self,
        port_count: u8,
        reset_connections: bool,
        reset_readings_for: &[PortId],
    ) -> anyhow::Result<()> {
        self.create_tables().await?;

        if reset_connections {
            let removed = port_connection::Entity::delete_many()
                .exec(&self.db)
                .await?
                .rows_affected;
            debug!("Reset {} port connection rows", removed);
        }
        self.seed_connections(port_count).await?;

        for port in reset_readings_for {
            let removed = self.reading_delete_by_port(*port).await?;
            if removed > 0 {
                info!("Removed {} readings of port {}", removed, port);
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        // Execute a simple query to verify connectivity
        port_connection::Entity::find()
            .select_only()
            .column_as(Expr::cust("1"), "health")
            .into_tuple::<i32>()
            .one(&self.db)
            .await?;
        Ok(())
    }
}

// ============================================================================
// ConnectionPersistence implementation
// ============================================================================

#[async_trait]
impl ConnectionPersistence for SqlitePersistService {
    async fn connection_find_all(&self) -> anyhow::Result<Vec<PortConnection>> {
        let connections = port_connection::Entity::find()
            .order_by_asc(port_connection::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(PortConnection::from)
            .collect();
        Ok(connections)
    }

    async fn connection_find(&self, port: PortId) -> anyhow::Result<Option<PortConnection>> {
        let connection = port_connection::Entity::find_by_id(port.get() as i32)
            .one(&self.db)
            .await?
            .map(PortConnection::from);
        Ok(connection)
    }

    async fn connection_update(
        &self,
        port: PortId,
        connected: bool,
        sensor: Option<&str>,
    ) -> anyhow::Result<()> {
        let model = port_connection::ActiveModel {
            id: Set(port.get() as i32),
            connected: Set(connected),
            sensor: Set(sensor.map(str::to_string)),
            updated_at: Set(Local::now().naive_local()),
        };

        port_connection::Entity::insert(model)
            .on_conflict(
                OnConflict::column(port_connection::Column::Id)
                    .update_columns([
                        port_connection::Column::Connected,
                        port_connection::Column::Sensor,
                        port_connection::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}

// ============================================================================
// ReadingPersistence implementation
// ============================================================================

fn reading_to_active_model(reading: NewReading) -> reading::ActiveModel {
    reading::ActiveModel {
        id: NotSet,
        port: Set(reading.port.get() as i32),
        time: Set(reading.time),
        sensor: Set(reading.sensor),
        ips: Set(StringList(reading.ips).encode()),
        readings: Set(FloatList::from_options(&reading.readings).encode()),
        lower_limits: Set(FloatList::from_options(&reading.lower_limits).encode()),
        upper_limits: Set(FloatList::from_options(&reading.upper_limits).encode()),
        units: Set(StringList(reading.units).encode()),
    }
}

#[async_trait]
impl ReadingPersistence for SqlitePersistService {
    async fn reading_insert(&self, reading: NewReading) -> anyhow::Result<i32> {
        let model = reading_to_active_model(reading).insert(&self.db).await?;
        Ok(model.id)
    }

    async fn reading_insert_many(&self, readings: Vec<NewReading>) -> anyhow::Result<u64> {
        if readings.is_empty() {
            return Ok(0);
        }
        let inserted = reading::Entity::insert_many(readings.into_iter().map(reading_to_active_model))
            .exec_without_returning(&self.db)
            .await?;
        Ok(inserted)
    }

    async fn reading_find_page(
        &self,
        port: PortId,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<Reading>> {
        let page_no = page_no.max(1);
        let page_size = page_size.max(1);
        let select = reading::Entity::find().filter(reading::Column::Port.eq(port.get() as i32));

        let count = select
            .clone()
            .select_only()
            .column_as(Expr::col(Asterisk).count(), "count")
            .into_tuple::<i64>()
            .one(&self.db)
            .await?
            .unwrap_or_default() as u64;

        if count == 0 {
            return Ok(Page::empty());
        }

        // pages past the end are empty
        let Some(offset) = (page_no - 1)
            .checked_mul(page_size)
            .filter(|offset| *offset < count)
        else {
            return Ok(Page::new(count, page_no, page_size, Vec::new()));
        };
        let items = select
            .order_by_desc(reading::Column::Id)
            .offset(offset)
            .limit(page_size.min(count - offset))
            .all(&self.db)
            .await?
            .into_iter()
            .map(Reading::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Page::new(count, page_no, page_size, items))
    }

    async fn reading_find_latest(&self, port: PortId) -> anyhow::Result<Option<Reading>> {
        reading::Entity::find()
            .filter(reading::Column::Port.eq(port.get() as i32))
            .order_by_desc(reading::Column::Id)
            .one(&self.db)
            .await?
            .map(Reading::try_from)
            .transpose()
    }

    async fn reading_count(&self, port: PortId) -> anyhow::Result<u64> {
        let count = reading::Entity::find()
            .select_only()
            .column_as(Expr::col(Asterisk).count(), "count")
            .filter(reading::Column::Port.eq(port.get() as i32))
            .into_tuple::<i64>()
            .one(&self.db)
            .await?
            .unwrap_or_default() as u64;

        Ok(count)
    }

    async fn reading_delete_by_port(&self, port: PortId) -> anyhow::Result<u64> {
        let result = reading::Entity::delete_many()
            .filter(reading::Column::Port.eq(port.get() as i32))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    async fn service() -> SqlitePersistService {
        let db = connect("sqlite::memory:", &DbPoolOptions::default())
            .await
            .unwrap();
        let service = SqlitePersistService::new(db);
        service.init_schema(8, true, &[]).await.unwrap();
        service
    }

    fn port(n: u8) -> PortId {
        PortId::new(n).unwrap()
    }

    fn new_reading(port_no: u8, second: u32, distance: Option<f64>) -> NewReading {
        let time = NaiveDateTime::parse_from_str(
            &format!("2022-06-29 12:00:{:02}.000000", second),
            TIME_FORMAT,
        )
        .unwrap();
        NewReading {
            port: port(port_no),
            time,
            sensor: "O5D100".to_string(),
            ips: vec!["Distance".to_string(), "OUT1".to_string()],
            readings: vec![distance, Some(1.0)],
            lower_limits: vec![Some(0.03), None],
            upper_limits: vec![Some(2.0), None],
            units: vec!["m".to_string(), "N/A".to_string()],
        }
    }

    #[tokio::test]
    async fn test_init_schema_seeds_connections() {
        let service = service().await;
        let connections = service.connection_find_all().await.unwrap();
        assert_eq!(connections.len(), 8);
        assert!(connections.iter().all(|c| !c.connected && c.sensor.is_none()));
        assert_eq!(connections[0].port, 1);
        assert_eq!(connections[7].port, 8);

        // running it again keeps a single row per port
        service.init_schema(8, false, &[]).await.unwrap();
        assert_eq!(service.connection_find_all().await.unwrap().len(), 8);
        service.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_update() {
        let service = service().await;
        service
            .connection_update(port(3), true, Some("O5D100"))
            .await
            .unwrap();

        let connection = service.connection_find(port(3)).await.unwrap().unwrap();
        assert!(connection.connected);
        assert_eq!(connection.sensor.as_deref(), Some("O5D100"));

        service.connection_update(port(3), false, None).await.unwrap();
        let connection = service.connection_find(port(3)).await.unwrap().unwrap();
        assert!(!connection.connected);
        assert!(connection.sensor.is_none());

        // a restart without reset keeps the state
        service
            .connection_update(port(5), true, Some("KG5065"))
            .await
            .unwrap();
        service.init_schema(8, false, &[]).await.unwrap();
        assert!(service.connection_find(port(5)).await.unwrap().unwrap().connected);

        service.init_schema(8, true, &[]).await.unwrap();
        assert!(!service.connection_find(port(5)).await.unwrap().unwrap().connected);
    }

    #[tokio::test]
    async fn test_reading_insert_and_latest() {
        let service = service().await;
        service.reading_insert(new_reading(1, 0, Some(1.0))).await.unwrap();
        service.reading_insert(new_reading(1, 1, None)).await.unwrap();
        service.reading_insert(new_reading(2, 1, Some(0.5))).await.unwrap();

        let latest = service.reading_find_latest(port(1)).await.unwrap().unwrap();
        assert_eq!(latest.readings, vec![-1.0, 1.0]);
        assert_eq!(latest.lower_limits, vec![0.03, -1.0]);
        assert_eq!(latest.ips, vec!["Distance", "OUT1"]);
        assert_eq!(latest.units, vec!["m", "N/A"]);

        assert!(service.reading_find_latest(port(4)).await.unwrap().is_none());
        assert_eq!(service.reading_count(port(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reading_page() {
        let service = service().await;
        let readings = (0..25)
            .map(|i| new_reading(6, i, Some(i as f64)))
            .collect::<Vec<_>>();
        assert_eq!(service.reading_insert_many(readings).await.unwrap(), 25);
        assert_eq!(service.reading_insert_many(Vec::new()).await.unwrap(), 0);

        let page = service.reading_find_page(port(6), 1, 10).await.unwrap();
        assert_eq!(page.total_count, 25);
        assert_eq!(page.pages_available, 3);
        assert_eq!(page.page_items.len(), 10);
        assert_eq!(page.page_items[0].readings[0], 24.0);

        let page = service.reading_find_page(port(6), 3, 10).await.unwrap();
        assert_eq!(page.page_items.len(), 5);
        assert_eq!(page.page_items[4].readings[0], 0.0);

        let page = service.reading_find_page(port(7), 1, 10).await.unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_reading_page_out_of_range() {
        let service = service().await;
        let readings = (0..5)
            .map(|i| new_reading(2, i, Some(i as f64)))
            .collect::<Vec<_>>();
        service.reading_insert_many(readings).await.unwrap();

        let page = service.reading_find_page(port(2), 2, 5).await.unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.page_number, 2);
        assert!(page.page_items.is_empty());

        let page = service
            .reading_find_page(port(2), u64::MAX, 500)
            .await
            .unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.page_number, u64::MAX);
        assert_eq!(page.pages_available, 1);
        assert!(page.page_items.is_empty());

        let page = service
            .reading_find_page(port(2), 1, u64::MAX)
            .await
            .unwrap();
        assert_eq!(page.page_items.len(), 5);
    }

    #[tokio::test]
    async fn test_reset_readings() {
        let service = service().await;
        service.reading_insert(new_reading(1, 0, Some(1.0))).await.unwrap();
        service.reading_insert(new_reading(2, 0, Some(1.0))).await.unwrap();

        service.init_schema(8, false, &[port(1)]).await.unwrap();
        assert_eq!(service.reading_count(port(1)).await.unwrap(), 0);
        assert_eq!(service.reading_count(port(2)).await.unwrap(), 1);
    }
}
