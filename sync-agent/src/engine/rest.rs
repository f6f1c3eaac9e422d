//! Engine client over the local REST API.
//!
//! The engine exposes a long-poll event endpoint (`/rest/events?since=N`)
//! and a file database lookup (`/rest/db/file`). This client pumps the
//! event endpoint into a bounded channel and answers file-info queries.

use crate::engine::{EngineError, EngineQuery, EngineSubscription, EventStream, EventType, RawEvent};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const EVENT_CHANNEL_CAPACITY: usize = 4096;
const LONG_POLL_TIMEOUT_SECS: u64 = 60;

pub struct RestEngineClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
}

impl RestEngineClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http: reqwest::Client::new(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

async fn poll_events(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    since: i64,
) -> Result<Vec<RawEvent>, EngineError> {
    let url = format!(
        "{}/rest/events?since={}&timeout={}",
        base_url, since, LONG_POLL_TIMEOUT_SECS
    );
    let resp = http
        .get(&url)
        .header("X-API-Key", api_key)
        .send()
        .await
        .map_err(|e| EngineError::Transient(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(EngineError::Transient(format!(
            "event poll returned {}",
            resp.status()
        )));
    }

    let raw: Vec<Value> = resp
        .json()
        .await
        .map_err(|e| EngineError::Transient(e.to_string()))?;

    Ok(raw.iter().filter_map(parse_event).collect())
}

/// Parse a single wire event, skipping unknown types and malformed frames.
fn parse_event(value: &Value) -> Option<RawEvent> {
    let id = value.get("id")?.as_i64()?;
    let type_name = value.get("type")?.as_str()?;
    let event_type = EventType::from_wire(type_name)?;
    let time = value
        .get("time")
        .and_then(|t| t.as_str())
        .and_then(|t| t.parse::<DateTime<Utc>>().ok())
        .unwrap_or_else(Utc::now);
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    Some(RawEvent {
        id,
        event_type,
        time,
        data,
    })
}

impl EngineSubscription for RestEngineClient {
    fn subscribe(&self, subscriber_id: &str) -> BoxFuture<'_, Result<EventStream, EngineError>> {
        let subscriber_id = subscriber_id.to_string();
        async move {
            let cancel = CancellationToken::new();
            {
                let mut subs = self.subscriptions.lock().unwrap();
                if let Some(old) = subs.insert(subscriber_id.clone(), cancel.clone()) {
                    old.cancel();
                }
            }

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let base_url = self.base_url.clone();
            let api_key = self.api_key.clone();
            let http = self.http.clone();

            tokio::spawn(async move {
                let mut since: i64 = 0;
                loop {
                    let events = tokio::select! {
                        _ = cancel.cancelled() => break,
                        res = poll_events(&http, &base_url, &api_key, since) => res,
                    };
                    match events {
                        Ok(events) => {
                            for event in events {
                                since = since.max(event.id);
                                if tx.send(event).await.is_err() {
                                    debug!("event stream receiver dropped, stopping pump");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("engine event poll failed: {}", e);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                            }
                        }
                    }
                }
                debug!("engine event pump stopped");
            });

            Ok(rx)
        }
        .boxed()
    }

    fn unsubscribe(&self, subscriber_id: &str) -> BoxFuture<'_, ()> {
        let subscriber_id = subscriber_id.to_string();
        async move {
            if let Some(cancel) = self.subscriptions.lock().unwrap().remove(&subscriber_id) {
                cancel.cancel();
            }
        }
        .boxed()
    }
}

impl EngineQuery for RestEngineClient {
    fn file_info<'a>(
        &'a self,
        folder: &'a str,
        item: &'a str,
    ) -> BoxFuture<'a, Result<u64, EngineError>> {
        async move {
            let url = format!("{}/rest/db/file", self.base_url);
            let resp = self
                .http
                .get(&url)
                .query(&[("folder", folder), ("file", item)])
                .header("X-API-Key", &self.api_key)
                .send()
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(EngineError::NotFound(format!("{}/{}", folder, item)));
            }
            if !resp.status().is_success() {
                return Err(EngineError::Transient(format!(
                    "file lookup returned {}",
                    resp.status()
                )));
            }

            let body: Value = resp
                .json()
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;

            // The size lives under global.size; older engines report it at
            // the top level.
            let size = body
                .get("global")
                .and_then(|g| g.get("size"))
                .or_else(|| body.get("size"))
                .and_then(|s| s.as_u64())
                .ok_or_else(|| EngineError::NotFound(format!("{}/{}", folder, item)))?;

            Ok(size)
        }
        .boxed()
    }
}
