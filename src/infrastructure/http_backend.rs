// Production backend over HTTP - unit enumeration and historical snapshots
use crate::application::backend::ProductionBackend;
use crate::domain::errors::TransportError;
use crate::domain::window::WindowRequest;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn units_url(&self) -> String {
        format!("{}/units", self.base_url)
    }

    fn historical_url(&self, unit: &str, request: &WindowRequest) -> String {
        format!(
            "{}/historical-data/{}?start_time={}&end_time={}&working_mode={}",
            self.base_url,
            urlencoding::encode(unit),
            urlencoding::encode(&request.start_time),
            urlencoding::encode(&request.end_time),
            urlencoding::encode(&request.working_mode),
        )
    }

    async fn get_text(&self, url: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("{}: {}", status, body)));
        }
        response.text().await.map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[async_trait]
impl ProductionBackend for HttpBackend {
    async fn list_units(&self) -> Result<Vec<String>, TransportError> {
        let text = self.get_text(&self.units_url()).await?;
        serde_json::from_str::<Vec<String>>(&text)
            .map_err(|e| TransportError::Http(format!("unit list is not a string array: {}", e)))
    }

    async fn fetch_historical(&self, unit: &str, request: &WindowRequest) -> Result<String, TransportError> {
        let url = self.historical_url(unit, request);
        tracing::debug!(unit, %url, "fetching historical data");
        self.get_text(&url).await
    }
}
