use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::UploadError;
use crate::record::SessionRecord;

const UPLOAD_PATH: &str = "pepperoni/";
const LOGGED_BODY_LIMIT: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Form body posted to the collector for one session.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SessionUploadForm {
    #[serde(rename = "mod")]
    module: String,
    cnt: i64,
    prd: u32,
    time: i64,
    readings: String,
}

impl SessionUploadForm {
    /// Builds the form for `record`, reported under `device_name`.
    ///
    /// ```
    /// use pepperoni::{SessionRecord, SessionUploadForm};
    ///
    /// let record = SessionRecord::parse("id:7 t:1000 p:60 10 11 12")?;
    /// let form = SessionUploadForm::new("peppe", &record);
    /// assert_eq!("10,11,12", form.readings());
    /// # Ok::<(), pepperoni::RecordParseError>(())
    /// ```
    #[must_use]
    pub fn new(device_name: &str, record: &SessionRecord) -> Self {
        Self {
            module: device_name.to_string(),
            cnt: record.id(),
            prd: record.period(),
            time: record.time(),
            readings: record.readings_csv().to_string(),
        }
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    #[must_use]
    pub fn cnt(&self) -> i64 {
        self.cnt
    }

    #[must_use]
    pub fn prd(&self) -> u32 {
        self.prd
    }

    #[must_use]
    pub fn time(&self) -> i64 {
        self.time
    }

    #[must_use]
    pub fn readings(&self) -> &str {
        &self.readings
    }
}

/// HTTP collaborator that posts form bodies.
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// Posts `form` to `url` and returns the response body.
    async fn post_form(&self, url: &str, form: &SessionUploadForm) -> Result<String, UploadError>;
}

/// [`UploadClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestUploadClient {
    client: reqwest::Client,
}

impl ReqwestUploadClient {
    /// Builds a client with connect and request timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error when the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UploadClient for ReqwestUploadClient {
    async fn post_form(&self, url: &str, form: &SessionUploadForm) -> Result<String, UploadError> {
        let body = self
            .client
            .post(url)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

/// Forwards confirmed session lines to the remote collector.
///
/// Failures are logged and swallowed; the caller has already committed the
/// line locally and never retries it.
pub struct UploadForwarder {
    client: Box<dyn UploadClient>,
    url: String,
    device_name: String,
}

impl std::fmt::Debug for UploadForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadForwarder")
            .field("url", &self.url)
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

impl UploadForwarder {
    /// Creates a forwarder posting to `{server}/pepperoni/`.
    #[must_use]
    pub fn new(client: Box<dyn UploadClient>, server: &str, device_name: &str) -> Self {
        Self {
            client,
            url: upload_url(server),
            device_name: device_name.to_string(),
        }
    }

    /// Endpoint the forms are posted to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Uploads one verbatim session line.
    ///
    /// # Errors
    ///
    /// Returns an error when the line cannot be parsed or the request fails.
    /// [`UploadForwarder::forward`] wraps this and only logs the error.
    #[instrument(skip(self), level = "debug")]
    pub async fn upload(&self, line: &str) -> Result<String, UploadError> {
        let record = SessionRecord::parse(line)?;
        let form = SessionUploadForm::new(&self.device_name, &record);
        let body = self.client.post_form(&self.url, &form).await?;
        info!(
            session_time = record.time(),
            response = %truncate_body(&body),
            "uploaded session"
        );
        Ok(body)
    }

    /// Uploads one line, logging instead of returning any failure.
    pub async fn forward(&self, line: &str) -> bool {
        match self.upload(line).await {
            Ok(_body) => true,
            Err(error) => {
                warn!(%error, line, "session upload failed; it will not be retried");
                false
            }
        }
    }
}

fn upload_url(server: &str) -> String {
    format!("{}/{UPLOAD_PATH}", server.trim_end_matches('/'))
}

fn truncate_body(body: &str) -> &str {
    if body.len() <= LOGGED_BODY_LIMIT {
        return body;
    }
    let mut end = LOGGED_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
