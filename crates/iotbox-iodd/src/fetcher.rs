//! Growing the IODD collection from a remote archive source

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::collection::{ensure_dir, extract_archive, read_index, update_index};

/// Placeholder replaced by the product name in fetch URL templates
pub const PRODUCT_PLACEHOLDER: &str = "{product}";

/// Source of zipped IODD packages for a product name
#[async_trait]
pub trait IoddFetcher: Send + Sync {
    /// Returns `None` when the source has no IODD for the product.
    async fn fetch_archive(&self, product: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Downloads IODD archives over HTTP from a URL template such as
/// `https://iodd.example.com/download?productName={product}`.
///
/// The placeholder must appear in a query parameter value.
#[derive(Clone, Debug)]
pub struct HttpArchiveFetcher {
    client: reqwest::Client,
    url_template: Url,
}

impl HttpArchiveFetcher {
    pub fn new(url_template: &str, timeout: Duration) -> anyhow::Result<Self> {
        let template = Url::parse(url_template)?;
        if !template
            .query_pairs()
            .any(|(_, value)| value.contains(PRODUCT_PLACEHOLDER))
        {
            anyhow::bail!(
                "IODD fetch url template must contain {} in a query parameter: {}",
                PRODUCT_PLACEHOLDER,
                url_template
            );
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: template,
        })
    }

    /// A fetcher for a configured template, `None` when fetching is disabled.
    pub fn from_template(
        url_template: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Option<Self>> {
        match url_template.map(str::trim) {
            Some(template) if !template.is_empty() => Self::new(template, timeout).map(Some),
            _ => Ok(None),
        }
    }

    pub fn url_for(&self, product: &str) -> Url {
        let pairs: Vec<(String, String)> = self
            .url_template
            .query_pairs()
            .map(|(key, value)| {
                (
                    key.into_owned(),
                    value.replace(PRODUCT_PLACEHOLDER, product),
                )
            })
            .collect();

        let mut url = self.url_template.clone();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url
    }
}

#[async_trait]
impl IoddFetcher for HttpArchiveFetcher {
    async fn fetch_archive(&self, product: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let url = self.url_for(product);
        debug!("Fetching IODD archive for {} from {}", product, url);

        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }
}

/// Result of acquiring IODDs for a set of sensors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireReport {
    /// Sensors already covered by the collection
    pub reused: Vec<String>,
    /// Sensors whose IODD was downloaded
    pub fetched: Vec<String>,
    /// Sensors the source had no IODD for
    pub missing: Vec<String>,
    pub files: Vec<PathBuf>,
}

/// Make sure the collection holds an IODD for every sensor.
///
/// Sensors already indexed with an existing file are reused unless `replace` is set.
pub async fn acquire(
    dir: &Path,
    fetcher: &dyn IoddFetcher,
    sensors: &[String],
    replace: bool,
) -> anyhow::Result<AcquireReport> {
    ensure_dir(dir)?;
    let mut index = read_index(dir)?;
    let mut report = AcquireReport::default();
    let mut fetched_now = Vec::new();

    let unique: BTreeSet<&str> = sensors.iter().map(String::as_str).collect();
    for sensor in unique {
        let covered_by = |files: &[PathBuf]| {
            index.iter().any(|entry| {
                entry.family.iter().any(|p| p == sensor)
                    && entry.file.exists()
                    && (!replace || files.contains(&entry.file))
            })
        };
        if covered_by(&fetched_now) {
            info!("IODD for {} already exists in IODD collection.", sensor);
            report.reused.push(sensor.to_string());
            continue;
        }

        info!(
            "IODD for {} missing from IODD collection or to be replaced. Fetching.",
            sensor
        );
        let Some(bytes) = fetcher.fetch_archive(sensor).await? else {
            warn!("{}: Couldn't find sensor at IODD source.", sensor);
            report.missing.push(sensor.to_string());
            continue;
        };

        let extracted = extract_archive(dir, &bytes)?;
        if extracted.is_empty() {
            warn!("{}: Couldn't find IODD file in zip archive.", sensor);
            report.missing.push(sensor.to_string());
            continue;
        }
        report.fetched.push(sensor.to_string());
        fetched_now.extend(extracted.iter().cloned());
        report.files.extend(extracted);
        index = update_index(dir)?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use std::sync::Mutex;

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::collection::{read_index, update_index};

    const O5D100: &str = include_str!("../tests/fixtures/ifm-O5D100-20190314-IODD1.1.xml");

    struct FakeFetcher {
        archives: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(archives: HashMap<String, Vec<u8>>) -> Self {
            Self {
                archives,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IoddFetcher for FakeFetcher {
        async fn fetch_archive(&self, product: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.requests.lock().unwrap().push(product.to_string());
            Ok(self.archives.get(product).cloned())
        }
    }

    fn o5d_archive() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("ifm-O5D100-20190314-IODD1.1.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(O5D100.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_url_template() {
        let fetcher = HttpArchiveFetcher::new(
            "http://localhost/iodd?productName={product}",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            fetcher.url_for("O5D100").as_str(),
            "http://localhost/iodd?productName=O5D100"
        );
        assert_eq!(
            fetcher.url_for("TN 2531").as_str(),
            "http://localhost/iodd?productName=TN+2531"
        );
        assert_eq!(
            fetcher.url_for("A&B=C").as_str(),
            "http://localhost/iodd?productName=A%26B%3DC"
        );

        let fetcher = HttpArchiveFetcher::new(
            "http://localhost/iodd?vendor=ifm&productName={product}",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            fetcher.url_for("O5D100").as_str(),
            "http://localhost/iodd?vendor=ifm&productName=O5D100"
        );

        assert!(HttpArchiveFetcher::new("http://localhost/iodd", Duration::from_secs(5)).is_err());
        assert!(
            HttpArchiveFetcher::new("http://localhost/{product}.zip", Duration::from_secs(5))
                .is_err()
        );
        assert!(HttpArchiveFetcher::new("not a url {product}", Duration::from_secs(5)).is_err());
        assert!(
            HttpArchiveFetcher::from_template(Some("  "), Duration::from_secs(5))
                .unwrap()
                .is_none()
        );
        assert!(
            HttpArchiveFetcher::from_template(None, Duration::from_secs(5))
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_acquire_fetches_missing_iodds() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(HashMap::from([("O5D100".to_string(), o5d_archive())]));

        let sensors = vec![
            "O5D100".to_string(),
            "O5D150".to_string(),
            "KG5065".to_string(),
            "O5D100".to_string(),
        ];
        let report = acquire(dir.path(), &fetcher, &sensors, false).await.unwrap();

        assert_eq!(report.fetched, vec!["O5D100"]);
        // O5D150 belongs to the family fetched for O5D100
        assert_eq!(report.reused, vec!["O5D150"]);
        assert_eq!(report.missing, vec!["KG5065"]);
        assert_eq!(fetcher.requests(), vec!["KG5065", "O5D100"]);
        assert_eq!(read_index(dir.path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_reuses_local_collection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ifm-O5D100-20190314-IODD1.1.xml"), O5D100).unwrap();
        update_index(dir.path()).unwrap();

        let fetcher = FakeFetcher::new(HashMap::from([("O5D100".to_string(), o5d_archive())]));
        let sensors = vec!["O5D100".to_string()];

        let report = acquire(dir.path(), &fetcher, &sensors, false).await.unwrap();
        assert_eq!(report.reused, vec!["O5D100"]);
        assert!(fetcher.requests().is_empty());

        let report = acquire(dir.path(), &fetcher, &sensors, true).await.unwrap();
        assert_eq!(report.fetched, vec!["O5D100"]);
        assert_eq!(fetcher.requests(), vec!["O5D100"]);
    }
}
