use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures talking to the Log Analytics, Resource Graph or token endpoints.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid backend response: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid resource id \"{0}\"")]
    InvalidResourceId(String),
}

/// Everything that can go wrong while serving one probe request.
///
/// `Query` is the only per-target variant: it travels on the fan-in channel as a
/// tagged result and never aborts the request. All other variants are fatal and
/// surface at the handler boundary.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    ClientInput(String),

    #[error("no workspaces found")]
    NoTargets,

    #[error("{0}")]
    Configuration(String),

    #[error("service discovery failed: {0}")]
    Discovery(#[source] BackendError),

    #[error("{0}")]
    Query(String),

    #[error("unable to render metrics: {0}")]
    Exposition(#[from] prometheus::Error),
}

impl ProbeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProbeError::ClientInput(_)
            | ProbeError::NoTargets
            | ProbeError::Configuration(_)
            | ProbeError::Discovery(_)
            | ProbeError::Query(_) => StatusCode::BAD_REQUEST,
            ProbeError::Exposition(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BackendError> for ProbeError {
    fn from(err: BackendError) -> Self {
        ProbeError::Query(err.to_string())
    }
}

impl IntoResponse for ProbeError {
    fn into_response(self) -> Response {
        (self.status_code(), format!("ERROR: {self}")).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_bad_request() {
        assert_eq!(ProbeError::NoTargets.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProbeError::Configuration("timespan missing".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProbeError::Exposition(prometheus::Error::Msg("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_backend_error_becomes_query_error() {
        let err: ProbeError = BackendError::Status {
            status: 403,
            body: "forbidden".into(),
        }
        .into();
        assert!(matches!(err, ProbeError::Query(_)));
        assert_eq!(err.to_string(), "backend returned 403: forbidden");
    }
}
