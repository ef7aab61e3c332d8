//! Reading persistence trait

use async_trait::async_trait;

use iotbox_common::PortId;

use crate::model::{NewReading, Page, Reading};

#[async_trait]
pub trait ReadingPersistence: Send + Sync {
    /// Insert a reading, returning its id
    async fn reading_insert(&self, reading: NewReading) -> anyhow::Result<i32>;

    /// Insert the readings of one poll cycle
    async fn reading_insert_many(&self, readings: Vec<NewReading>) -> anyhow::Result<u64>;

    /// Readings of a port, newest first
    async fn reading_find_page(
        &self,
        port: PortId,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<Reading>>;

    async fn reading_find_latest(&self, port: PortId) -> anyhow::Result<Option<Reading>>;

    async fn reading_count(&self, port: PortId) -> anyhow::Result<u64>;

    async fn reading_delete_by_port(&self, port: PortId) -> anyhow::Result<u64>;
}
