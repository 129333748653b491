use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::StoreError;
use crate::store::gateway::{ChannelKind, PersistenceGateway, SampleRow, SessionId};

const SESSIONS_TABLE: &str = "sleep_records";
const SAMPLES_TABLE: &str = "raw_sensor_data";

/**
 * Upper bound on a whole request to the store or the metrics service, connect included.
 */
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn http_client(timeout: Duration) -> Result<Client, StoreError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Gateway for a PostgREST-style store (`<base>/rest/v1/<table>`).
#[derive(Debug, Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRow {
    id: SessionId,
}

#[derive(Debug, Deserialize)]
struct SessionRef {
    sleep_record_id: SessionId,
}

impl RestGateway {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        Self::with_timeout(base_url, api_key, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        Ok(RestGateway {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Every stored sample of a session, oldest first.
    pub async fn samples(&self, session_id: SessionId) -> Result<Vec<SampleRow>, StoreError> {
        let request = self.client
            .get(self.table_url(SAMPLES_TABLE))
            .query(&[
                ("select", "sleep_record_id,sensor_type,value,captured_at".to_string()),
                ("sleep_record_id", format!("eq.{}", session_id)),
                ("order", "captured_at.asc".to_string()),
            ]);

        let response = checked(self.authorized(request).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Ids of every session with at least one sample of `kind`, ascending and deduplicated.
    pub async fn sessions_with(&self, kind: ChannelKind) -> Result<Vec<SessionId>, StoreError> {
        let request = self.client
            .get(self.table_url(SAMPLES_TABLE))
            .query(&[
                ("select", "sleep_record_id".to_string()),
                ("sensor_type", format!("eq.{}", kind.as_str())),
            ]);

        let response = checked(self.authorized(request).send().await?).await?;
        let rows: Vec<SessionRef> = response.json().await?;

        let mut ids: Vec<SessionId> = rows.into_iter().map(|row| row.sleep_record_id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

async fn checked(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status { status: status.as_u16(), body })
}

#[async_trait]
impl PersistenceGateway for RestGateway {
    async fn create_session(&self, user_id: i64, started_at: &str) -> Result<SessionId, StoreError> {
        let request = self.client
            .post(self.table_url(SESSIONS_TABLE))
            .header("Prefer", "return=representation")
            .json(&json!({ "user_id": user_id, "started_at": started_at }));

        let response = checked(self.authorized(request).send().await?).await?;
        let rows: Vec<CreatedRow> = response.json().await?;
        let row = rows.into_iter().next().ok_or(StoreError::EmptyResponse)?;

        debug!("Created session record {} for user {}", row.id, user_id);
        Ok(row.id)
    }

    async fn append_sample(
        &self,
        session_id: SessionId,
        kind: ChannelKind,
        payload: &serde_json::Value,
        captured_at: &str,
    ) -> Result<(), StoreError> {
        let row = SampleRow {
            sleep_record_id: session_id,
            sensor_type: kind,
            value: serde_json::to_string(payload)?,
            captured_at: captured_at.to_string(),
        };

        let request = self.client
            .post(self.table_url(SAMPLES_TABLE))
            .header("Prefer", "return=minimal")
            .json(&row);

        checked(self.authorized(request).send().await?).await?;
        Ok(())
    }

    async fn close_session(&self, session_id: SessionId, ended_at: &str) -> Result<(), StoreError> {
        let request = self.client
            .patch(self.table_url(SESSIONS_TABLE))
            .query(&[("id", format!("eq.{}", session_id))])
            .json(&json!({ "ended_at": ended_at }));

        checked(self.authorized(request).send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_urls_ignore_trailing_slash() {
        let gateway = RestGateway::new("https://store.example/", "key").unwrap();
        assert_eq!(gateway.table_url(SAMPLES_TABLE), "https://store.example/rest/v1/raw_sensor_data");
    }

    #[test]
    fn sample_rows_round_trip_the_store_schema() {
        let json = r#"{"sleep_record_id":12,"sensor_type":"heart_rate","value":"{\"heartRate\":60}","captured_at":"2026-10-19T01:00:00.000Z"}"#;
        let row: SampleRow = serde_json::from_str(json).unwrap();

        assert_eq!(row.sleep_record_id, 12);
        assert_eq!(row.sensor_type, ChannelKind::HeartRate);
        assert_eq!(row.value, r#"{"heartRate":60}"#);
    }

    #[tokio::test]
    async fn unresponsive_store_times_out() {
        // accepts connections into the backlog but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let gateway = RestGateway::with_timeout(&base_url, "key", Duration::from_millis(200)).unwrap();

        let result = gateway.create_session(7, "2026-10-19T01:00:00.000Z").await;

        match result {
            Err(StoreError::Http { source }) => assert!(source.is_timeout(), "unexpected error: {}", source),
            other => panic!("expected a timeout, got {:?}", other),
        }
        drop(listener);
    }
}
