//! IODD collection view: browse, refresh, import and fetch IODD files

use std::path::PathBuf;

use actix_web::{HttpResponse, Scope, get, post, web};
use serde::{Deserialize, Serialize};
use tracing::info;

use iotbox_common::IotBoxError;
use iotbox_iodd::collection::{import_archive, update_index};
use iotbox_iodd::{AcquireReport, Iodd, IoddCollection, acquire};

use crate::error::{
    AppError, FETCHER_DISABLED, IMPORT_FILE_INVALID, PARAMETER_MISSING, RESOURCE_NOT_FOUND,
};
use crate::model::{ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointSummary {
    pub name: String,
    pub bit_offset: u32,
    pub bit_length: u32,
    pub units: String,
    pub lower_limit: Option<f64>,
    pub upper_limit: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IoddSummary {
    pub file: String,
    pub family: Vec<String>,
    pub vendor_name: Option<String>,
    pub device_id: Option<String>,
    pub total_bit_length: u32,
    pub information_points: Vec<PointSummary>,
}

impl From<&Iodd> for IoddSummary {
    fn from(iodd: &Iodd) -> Self {
        Self {
            file: iodd.file_name(),
            family: iodd.family.clone(),
            vendor_name: iodd.vendor_name.clone(),
            device_id: iodd.device_id.clone(),
            total_bit_length: iodd.total_bit_length,
            information_points: iodd
                .information_points
                .iter()
                .map(|ip| PointSummary {
                    name: ip.name.clone(),
                    bit_offset: ip.bit_offset,
                    bit_length: ip.bit_length,
                    units: ip.units.clone(),
                    lower_limit: ip.lower_limit(),
                    upper_limit: ip.upper_limit(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub files: Vec<String>,
    pub collection_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParam {
    pub product_name: String,
    #[serde(default)]
    pub replace: bool,
}

fn collection_dir(data: &AppState) -> PathBuf {
    data.acquisition.collection().dir().to_path_buf()
}

/// Parse the collection again and hand it to the poller.
async fn reload(data: &AppState) -> Result<usize, AppError> {
    let dir = collection_dir(data);
    let units = data.units.clone();
    let collection =
        tokio::task::spawn_blocking(move || IoddCollection::load(&dir, &units)).await??;
    let size = collection.len();
    data.acquisition.replace_collection(collection);
    Ok(size)
}

fn file_names(files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .filter_map(|f| f.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect()
}

#[get("")]
async fn list(data: web::Data<AppState>) -> HttpResponse {
    let collection = data.acquisition.collection();
    let summaries = collection
        .iodds()
        .iter()
        .map(IoddSummary::from)
        .collect::<Vec<_>>();
    ApiResult::<Vec<IoddSummary>>::http_success(summaries)
}

/// Raw XML of an IODD in the collection
#[get("/files/{file}")]
async fn file(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let name = path.into_inner();
    let collection = data.acquisition.collection();
    let Some(iodd) = collection.find_by_file_name(&name) else {
        return Err(IotBoxError::ApiError(
            404,
            RESOURCE_NOT_FOUND.code,
            format!("IODD file {} is not part of the collection", name),
            String::new(),
        )
        .into());
    };

    let content = tokio::fs::read_to_string(&iodd.file)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(HttpResponse::Ok()
        .content_type("application/xml; charset=utf-8")
        .body(content))
}

/// Rebuild the index from the collection directory
#[post("/refresh")]
async fn refresh(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let dir = collection_dir(&data);
    let entries = tokio::task::spawn_blocking(move || update_index(&dir)).await??;
    let size = reload(&data).await?;
    info!(
        "Refreshed IODD collection: {} indexed, {} loaded",
        entries.len(),
        size
    );
    Ok(ApiResult::<usize>::http_success(size))
}

/// Import a zip archive sent as request body
#[post("/import")]
async fn import(data: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, AppError> {
    if body.is_empty() {
        return Err(IotBoxError::ApiError(
            400,
            PARAMETER_MISSING.code,
            "IODD archive body is empty".to_string(),
            String::new(),
        )
        .into());
    }

    let dir = collection_dir(&data);
    let files = tokio::task::spawn_blocking(move || import_archive(&dir, &body)).await??;
    if files.is_empty() {
        return Err(IotBoxError::ApiError(
            400,
            IMPORT_FILE_INVALID.code,
            "archive contains no IODD1.1.xml file".to_string(),
            String::new(),
        )
        .into());
    }

    let collection_size = reload(&data).await?;
    info!("Imported {} IODD file(s)", files.len());
    Ok(ApiResult::<ImportResult>::http_success(ImportResult {
        files: file_names(&files),
        collection_size,
    }))
}

/// Fetch the IODD of a product from the configured source
#[post("/fetch")]
async fn fetch(
    data: web::Data<AppState>,
    params: web::Query<FetchParam>,
) -> Result<HttpResponse, AppError> {
    let Some(fetcher) = data.fetcher.clone() else {
        return Err(IotBoxError::ApiError(
            400,
            FETCHER_DISABLED.code,
            "no IODD fetch url template configured".to_string(),
            String::new(),
        )
        .into());
    };
    let product = params.product_name.trim();
    if product.is_empty() {
        return Err(IotBoxError::ApiError(
            400,
            PARAMETER_MISSING.code,
            "Required parameter 'productName' is not present".to_string(),
            String::new(),
        )
        .into());
    }

    let dir = collection_dir(&data);
    let report = acquire(&dir, fetcher.as_ref(), &[product.to_string()], params.replace).await?;
    if !report.fetched.is_empty() {
        reload(&data).await?;
    }
    Ok(ApiResult::<AcquireReport>::http_success(report))
}

pub fn routes() -> Scope {
    web::scope("/collection")
        .service(list)
        .service(file)
        .service(refresh)
        .service(import)
        .service(fetch)
}
