use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SheetsConfig;
use crate::credentials::AccessToken;
use crate::error::{TrackerError, TrackerResult};
use crate::sample::SampleRow;
use crate::sink::{AppendReceipt, RemoteSink};

const VALUE_INPUT_OPTION: &str = "RAW";
const INSERT_DATA_OPTION: &str = "INSERT_ROWS";

/// HTTP client for the Google Sheets values API.
#[derive(Clone)]
pub struct SheetsClient {
    config: Arc<SheetsConfig>,
    client: Client,
}

/// Body of a `values:append` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest<'a> {
    pub major_dimension: &'static str,
    pub values: &'a [SampleRow],
}

/// Response from the `values:append` endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponse {
    pub spreadsheet_id: Option<String>,
    pub table_range: Option<String>,
    pub updates: Option<UpdateSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub updated_range: Option<String>,
    pub updated_rows: Option<u64>,
    pub updated_cells: Option<u64>,
}

/// Subset of spreadsheet metadata returned by the access check.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetMetadata {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub properties: Option<SpreadsheetProperties>,
}

#[derive(Debug, Deserialize)]
pub struct SpreadsheetProperties {
    pub title: Option<String>,
}

impl AppendResponse {
    /// Rows reported written; a missing update block counts as zero.
    pub fn accepted_count(&self) -> u64 {
        self.updates
            .as_ref()
            .and_then(|u| u.updated_rows)
            .unwrap_or(0)
    }
}

impl SheetsClient {
    /// Create a new client with the given configuration.
    pub fn new(config: SheetsConfig) -> TrackerResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TrackerError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    /// Serialize the append body exactly as it is sent on the wire.
    pub fn append_body(rows: &[SampleRow]) -> TrackerResult<Vec<u8>> {
        let request = AppendRequest {
            major_dimension: "ROWS",
            values: rows,
        };
        serde_json::to_vec(&request).map_err(|e| TrackerError::Malformed {
            message: format!("Failed to encode rows: {e}"),
        })
    }

    /// Append rows after the configured range.
    pub async fn append_rows(
        &self,
        destination_id: &str,
        credential: &AccessToken,
        rows: &[SampleRow],
    ) -> TrackerResult<AppendResponse> {
        let url = self.append_url(destination_id)?;
        let body = Self::append_body(rows)?;

        let response = self
            .client
            .post(url)
            .query(&[
                ("valueInputOption", VALUE_INPUT_OPTION),
                ("insertDataOption", INSERT_DATA_OPTION),
            ])
            .bearer_auth(credential.expose())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        self.handle_response(response).await
    }

    /// Fetch spreadsheet metadata; fails if it is missing or not readable.
    pub async fn get_metadata(
        &self,
        destination_id: &str,
        credential: &AccessToken,
    ) -> TrackerResult<SpreadsheetMetadata> {
        let url = self.api_url(&["v4", "spreadsheets", destination_id], destination_id)?;

        let response = self
            .client
            .get(url)
            .query(&[("fields", "spreadsheetId,properties.title")])
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(transport_error)?;

        self.handle_response(response).await
    }

    /// `{endpoint}/v4/spreadsheets/{id}/values/{range}:append`, with the range
    /// percent-encoded as a single path segment.
    pub fn append_url(&self, destination_id: &str) -> TrackerResult<Url> {
        let range = format!("{}:append", self.config.range());
        self.api_url(
            &["v4", "spreadsheets", destination_id, "values", &range],
            destination_id,
        )
    }

    fn api_url(&self, segments: &[&str], destination_id: &str) -> TrackerResult<Url> {
        validate_destination(destination_id)?;
        let invalid = |reason: String| TrackerError::Configuration {
            message: format!("Invalid endpoint {}: {reason}", self.config.endpoint()),
        };

        let mut url = Url::parse(self.config.endpoint()).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Handle a successful or error response.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> TrackerResult<T> {
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await.map_err(transport_error)?;
            serde_json::from_slice::<T>(&bytes).map_err(|e| TrackerError::Malformed {
                message: format!("Unexpected response body: {e}"),
            })
        } else {
            self.handle_error_response(response).await
        }
    }

    /// Convert an error response to a TrackerError.
    async fn handle_error_response<T>(&self, response: reqwest::Response) -> TrackerResult<T> {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {status}: {}", body.trim());

        match status {
            401 | 403 => Err(TrackerError::Unauthorized { message }),
            404 => Err(TrackerError::DestinationNotFound { message }),
            408 | 429 => Err(TrackerError::Transport { message }),
            status if status >= 500 => Err(TrackerError::Transport { message }),
            _ => Err(TrackerError::Malformed { message }),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SheetsConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteSink for SheetsClient {
    async fn append(
        &self,
        destination_id: &str,
        credential: &AccessToken,
        rows: &[SampleRow],
    ) -> TrackerResult<AppendReceipt> {
        let response = self.append_rows(destination_id, credential, rows).await?;
        debug!(
            updated_range = response
                .updates
                .as_ref()
                .and_then(|u| u.updated_range.as_deref())
                .unwrap_or(""),
            accepted = response.accepted_count(),
            "Append acknowledged"
        );
        Ok(AppendReceipt {
            accepted_count: response.accepted_count(),
        })
    }

    async fn check_access(&self, destination_id: &str, credential: &AccessToken) -> bool {
        match self.get_metadata(destination_id, credential).await {
            Ok(meta) => {
                debug!(
                    spreadsheet = %meta.spreadsheet_id,
                    title = %meta.properties.and_then(|p| p.title).unwrap_or_default(),
                    "Destination is accessible"
                );
                true
            }
            Err(e) => {
                warn!("Error accessing destination: {}", e);
                false
            }
        }
    }
}

fn transport_error(e: reqwest::Error) -> TrackerError {
    if e.is_timeout() {
        TrackerError::transport(format!("Request timed out: {e}"))
    } else {
        TrackerError::transport(e.to_string())
    }
}

/// Spreadsheet ids go into the URL path, so only the id alphabet is allowed.
fn validate_destination(destination_id: &str) -> TrackerResult<()> {
    static DESTINATION_REGEX: Lazy<Regex> = Lazy::new(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("Hard-coded regex pattern should be valid")
    });

    if DESTINATION_REGEX.is_match(destination_id) {
        Ok(())
    } else {
        Err(TrackerError::DestinationNotFound {
            message: format!("Invalid destination id: {destination_id:?}"),
        })
    }
}
