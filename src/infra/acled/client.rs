use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use conflict_synth::dates::parse_event_date;
use conflict_synth::fetch::auth::UrlParam;
use conflict_synth::fetch::{BasicClient, HttpClient, fetch_bytes};
use conflict_synth::stats::EventProvenance;
use conflict_synth::types::ConflictEventRecord;

use crate::services::event_source::{EventBatch, EventQuery, EventSource};

const BASE_URL: &str = "https://api.acleddata.com/acled/read";
const EVENT_TYPE: &str = "Battle";
const SUB_EVENT_TYPES: &str =
    "Armed clash|Attack|Government regains territory|Non-state actor overtakes territory";
const FIELDS: &str =
    "event_id_cnty|event_date|year|event_type|country|admin1|admin2|admin3|location|latitude|longitude|fatalities|timestamp";

pub struct AcledClient<C> {
    http: C,
    base_url: String,
}

impl AcledClient<UrlParam<UrlParam<BasicClient>>> {
    /// Client authenticated with an access key and the account e-mail, both
    /// sent as query parameters.
    pub fn new(api_key: String, api_mail: String) -> Result<Self> {
        let http = UrlParam::new(
            UrlParam::new(BasicClient::new()?, "key", api_key),
            "email",
            api_mail,
        );
        Ok(Self::with_client(http, BASE_URL))
    }

    /// Reads `ACLED_API_KEY` and `ACLED_API_MAIL`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("ACLED_API_KEY").context("ACLED_API_KEY must be set")?;
        let mail = std::env::var("ACLED_API_MAIL").context("ACLED_API_MAIL must be set")?;
        Self::new(key, mail)
    }
}

impl<C: HttpClient> AcledClient<C> {
    pub fn with_client(http: C, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
        }
    }

    fn query_url(&self, query: &EventQuery) -> Result<reqwest::Url> {
        let years = query
            .years()
            .iter()
            .map(|y| y.to_string())
            .collect::<Vec<_>>()
            .join("|");

        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("country", query.country.as_str()),
                ("year", years.as_str()),
                ("event_type", EVENT_TYPE),
                ("sub_event_type", SUB_EVENT_TYPES),
                ("fields", FIELDS),
            ],
        )?;
        Ok(url)
    }
}

/// Decoded body of an ACLED `read` response.
#[derive(Debug)]
pub struct AcledResponse {
    pub events: Vec<ConflictEventRecord>,
    pub last_update_hours: Option<f64>,
    pub skipped: usize,
}

fn text(item: &Value, field: &str) -> String {
    match &item[field] {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn number<T: std::str::FromStr>(item: &Value, field: &str) -> Option<T> {
    text(item, field).parse().ok()
}

fn decode_event(item: &Value) -> Option<ConflictEventRecord> {
    Some(ConflictEventRecord {
        event_date: parse_event_date(&text(item, "event_date")).ok()?,
        country: text(item, "country"),
        admin1: text(item, "admin1"),
        admin2: text(item, "admin2"),
        admin3: text(item, "admin3"),
        location: text(item, "location"),
        latitude: number(item, "latitude")?,
        longitude: number(item, "longitude")?,
        fatalities: number(item, "fatalities"),
    })
}

/// Decodes a response body. Events whose date or coordinates cannot be read
/// are counted in `skipped`.
pub fn parse_acled_response(body: &[u8]) -> Result<AcledResponse> {
    let json: Value = serde_json::from_slice(body).context("Failed to parse ACLED response")?;

    if json["success"].as_bool() == Some(false) {
        let message = json["error"]["message"]
            .as_str()
            .or_else(|| json["error"].as_str())
            .unwrap_or("unknown error");
        return Err(anyhow!("ACLED rejected the request: {message}"));
    }

    let data = json["data"]
        .as_array()
        .ok_or_else(|| anyhow!("ACLED response has no data array"))?;

    let mut events = Vec::with_capacity(data.len());
    let mut skipped = 0;
    for item in data {
        match decode_event(item) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }

    Ok(AcledResponse {
        events,
        last_update_hours: json["last_update"].as_f64(),
        skipped,
    })
}

#[async_trait]
impl<C: HttpClient> EventSource for AcledClient<C> {
    #[tracing::instrument(skip(self), fields(country = %query.country))]
    async fn fetch_events(&self, query: &EventQuery) -> Result<EventBatch> {
        let url = self.query_url(query)?;
        debug!(url = %url, "Requesting ACLED events");

        let body = fetch_bytes(&self.http, url.as_str())
            .await
            .context("ACLED request failed")?;
        let response = parse_acled_response(&body)?;
        if response.skipped > 0 {
            warn!(skipped = response.skipped, "ACLED events without usable date or coordinates");
        }

        let received = response.events.len();
        let events: Vec<ConflictEventRecord> = response
            .events
            .into_iter()
            .filter(|e| query.contains(e.event_date))
            .collect();

        let provenance = EventProvenance::from_events(&self.base_url, &events);
        info!(received, kept = events.len(), "ACLED events retrieved");

        Ok(EventBatch {
            events,
            provenance,
            last_update_hours: response.last_update_hours,
        })
    }
}
