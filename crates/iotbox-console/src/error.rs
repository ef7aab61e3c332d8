// Error to HTTP response mapping for the dashboard API

use std::fmt::{Display, Formatter};

use actix_web::HttpResponse;

pub use iotbox_common::error::{
    DATA_ACCESS_ERROR, ErrorCode, FETCHER_DISABLED, IMPORT_FILE_INVALID, IODD_INVALID,
    IODD_NOT_FOUND, MASTER_UNAVAILABLE, PARAMETER_MISSING, PARAMETER_VALIDATE_ERROR,
    RESOURCE_NOT_FOUND, SERVER_ERROR, SUCCESS,
};
pub use iotbox_common::IotBoxError;

use crate::model::ApiResult;

// Local wrapper for application errors to implement actix-web error handling
// (Cannot impl foreign trait for foreign type due to orphan rules)
#[derive(Debug)]
pub struct AppError {
    inner: anyhow::Error,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError { inner: value }
    }
}

impl From<IotBoxError> for AppError {
    fn from(value: IotBoxError) -> Self {
        AppError {
            inner: anyhow::Error::new(value),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        AppError {
            inner: anyhow::Error::new(value),
        }
    }
}

impl AppError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

fn error_response(status: u16, code: &ErrorCode<'_>, message: String) -> HttpResponse {
    ApiResult::<String>::http_response(status, code.code, message, String::new())
}

impl actix_web::error::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let Some(e) = self.downcast_ref::<IotBoxError>() else {
            return error_response(500, &SERVER_ERROR, self.inner.to_string());
        };
        let message = e.to_string();
        match e {
            IotBoxError::IllegalArgument(_) | IotBoxError::ConfigError(_) => {
                error_response(400, &PARAMETER_VALIDATE_ERROR, message)
            }
            IotBoxError::IoddNotFound { .. } => error_response(404, &IODD_NOT_FOUND, message),
            IotBoxError::IoddParse { .. } => error_response(400, &IODD_INVALID, message),
            IotBoxError::PortNotConnected(_) => error_response(404, &RESOURCE_NOT_FOUND, message),
            IotBoxError::MasterError(_) => error_response(503, &MASTER_UNAVAILABLE, message),
            IotBoxError::DatabaseError(_) => error_response(500, &DATA_ACCESS_ERROR, message),
            IotBoxError::UnitDefinitionsMissing(_) | IotBoxError::InternalError(_) => {
                error_response(500, &SERVER_ERROR, message)
            }
            IotBoxError::ApiError(status, code, message, data) => {
                ApiResult::<String>::http_response(
                    *status as u16,
                    *code,
                    message.to_string(),
                    data.to_string(),
                )
            }
        }
    }
}
