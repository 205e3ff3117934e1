//! Blocking HTTP transport for the BatchMRef service.

use std::time::Duration;

use getmref_core::{LookupError, LookupService};

pub const AMS_URL: &str = "https://mathscinet.ams.org/batchmref";

const USER_AGENT: &str = concat!("getmref/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct BatchMrefClient {
    http: reqwest::blocking::Client,
    url: String,
}

impl BatchMrefClient {
    pub fn new(url: impl Into<String>) -> Result<Self, LookupError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| LookupError::Unreachable(err.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl LookupService for BatchMrefClient {
    /// POST the envelope as the `qdata` form field, the way the service
    /// expects it.
    fn execute(&self, request: &str) -> Result<String, LookupError> {
        tracing::debug!(url = %self.url, bytes = request.len(), "posting batch request");
        let response = self
            .http
            .post(&self.url)
            .form(&[("qdata", request)])
            .send()
            .map_err(|err| LookupError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        response
            .text()
            .map_err(|err| LookupError::Unreachable(err.to_string()))
    }
}
