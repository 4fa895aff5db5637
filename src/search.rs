use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Deserializer, de};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use urlencoding::encode;

use crate::app_state::{BeatmapSummary, DEFAULT_LIMIT, SearchFilter, UNKNOWN_ARTIST, UNKNOWN_TITLE};

pub const DEFAULT_SEARCH_HOST: &str = "https://catboy.best";
pub const SEARCH_PATH: &str = "/api/v2/search";
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search API answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("search response is not valid JSON ({source}): {body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("unrecognized search response shape")]
    UnrecognizedShape,
}

/// The shapes the search endpoint is known to answer with.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchPayload {
    List(Vec<Value>),
    Results(Vec<Value>),
    Beatmaps(Vec<Value>),
}

impl SearchPayload {
    pub fn decode(value: Value) -> Result<Self, SearchError> {
        match value {
            Value::Array(list) => Ok(Self::List(list)),
            Value::Object(mut map) => {
                if let Some(Value::Array(list)) = map.remove("results") {
                    return Ok(Self::Results(list));
                }
                if let Some(Value::Array(list)) = map.remove("beatmaps") {
                    return Ok(Self::Beatmaps(list));
                }
                Err(SearchError::UnrecognizedShape)
            }
            _ => Err(SearchError::UnrecognizedShape),
        }
    }

    pub fn into_entries(self) -> Vec<Value> {
        match self {
            Self::List(list) | Self::Results(list) | Self::Beatmaps(list) => list,
        }
    }
}

#[derive(Deserialize, Debug)]
struct RawBeatmap {
    #[serde(default, deserialize_with = "deserialize_flexible_id")]
    id: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_flexible_id")]
    beatmapset_id: Option<u64>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl From<RawBeatmap> for BeatmapSummary {
    fn from(raw: RawBeatmap) -> Self {
        Self {
            id: raw.id,
            beatmapset_id: raw.beatmapset_id,
            artist: raw.artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            title: raw.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        }
    }
}

fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlexibleIdVisitor;

    impl<'de> de::Visitor<'de> for FlexibleIdVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or a numeric string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
            Ok(u64::try_from(value).ok())
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E> {
            let integral = value.fract() == 0.0 && value >= 0.0 && value <= u64::MAX as f64;
            Ok(integral.then_some(value as u64))
        }

        fn visit_bool<E>(self, _value: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse().ok())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(FlexibleIdVisitor)
}

/// Converts raw catalog entries; entries that are not beatmap objects are dropped.
pub fn normalize(entries: Vec<Value>) -> Vec<BeatmapSummary> {
    entries
        .into_iter()
        .filter_map(|entry| {
            if !entry.is_object() {
                warn!("Skipping search entry that is not an object: {entry}");
                return None;
            }
            match serde_json::from_value::<RawBeatmap>(entry) {
                Ok(raw) => Some(raw.into()),
                Err(err) => {
                    warn!("Skipping search entry: {err}");
                    None
                }
            }
        })
        .collect()
}

/// Query string for `filter`, leaving out everything still at its default.
pub fn build_query(filter: &SearchFilter) -> String {
    let mut params = Vec::new();
    if let Some(query) = filter.query.as_deref().filter(|q| !q.is_empty()) {
        params.push(format!("query={}", encode(query)));
    }
    if filter.limit != DEFAULT_LIMIT {
        params.push(format!("limit={}", filter.limit));
    }
    if filter.offset > 0 {
        params.push(format!("offset={}", filter.offset));
    }
    if let Some(status) = filter.status.as_ref().filter(|s| !s.is_empty()) {
        params.push(format!("status={}", join_list(status)));
    }
    if let Some(mode) = filter.mode.as_ref().filter(|m| !m.is_empty()) {
        params.push(format!("mode={}", join_list(mode)));
    }
    if let Some(sort) = filter.sort.as_ref().filter(|s| !s.is_empty()) {
        params.push(format!("sort={}", join_list(sort)));
    }
    params.join("&")
}

fn join_list<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| encode(&item.to_string()).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

pub struct SearchClient {
    client: Client,
    base_url: String,
}

impl SearchClient {
    pub fn new() -> Result<Self, SearchError> {
        Self::with_base_url(DEFAULT_SEARCH_HOST)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn search_url(&self, filter: &SearchFilter) -> String {
        let query = build_query(filter);
        if query.is_empty() {
            format!("{}{SEARCH_PATH}", self.base_url)
        } else {
            format!("{}{SEARCH_PATH}?{query}", self.base_url)
        }
    }

    /// One GET against the search endpoint, returning the decoded JSON body.
    pub fn search(&self, filter: &SearchFilter) -> Result<Value, SearchError> {
        let url = self.search_url(filter);
        info!("Requesting: {url}");
        let resp = self
            .client
            .get(&url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if status != StatusCode::OK {
            warn!("Search failed with HTTP {}", status.as_u16());
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|source| {
            warn!("Search response could not be decoded: {source}");
            SearchError::Decode { source, body }
        })
    }

    pub fn search_summaries(&self, filter: &SearchFilter) -> Result<Vec<BeatmapSummary>, SearchError> {
        let value = self.search(filter)?;
        let entries = SearchPayload::decode(value)?.into_entries();
        let summaries = normalize(entries);
        info!("Search returned {} beatmaps", summaries.len());
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_json;
    use serde_json::json;

    #[test]
    fn bare_list_is_returned_unchanged() {
        let list = vec![json!({"id": 1}), json!("odd"), json!({"title": "x"})];
        let payload = SearchPayload::decode(Value::Array(list.clone())).unwrap();
        assert!(matches!(payload, SearchPayload::List(_)));
        assert_eq!(payload.into_entries(), list);
    }

    #[test]
    fn wrapped_lists_are_unwrapped() {
        let list = vec![json!({"id": 3, "title": "t"})];
        let results = SearchPayload::decode(json!({"results": list.clone(), "total": 1})).unwrap();
        assert_eq!(results, SearchPayload::Results(list.clone()));
        let beatmaps = SearchPayload::decode(json!({"beatmaps": list.clone()})).unwrap();
        assert_eq!(beatmaps.into_entries(), list);
    }

    #[test]
    fn results_key_wins_over_beatmaps() {
        let payload =
            SearchPayload::decode(json!({"results": [{"id": 1}], "beatmaps": [{"id": 2}]})).unwrap();
        assert_eq!(payload, SearchPayload::Results(vec![json!({"id": 1})]));
    }

    #[test]
    fn other_shapes_are_rejected() {
        for value in [
            json!({"data": []}),
            json!({"results": "nope"}),
            json!(42),
            json!("text"),
            Value::Null,
        ] {
            assert!(matches!(
                SearchPayload::decode(value),
                Err(SearchError::UnrecognizedShape)
            ));
        }
    }

    #[test]
    fn normalize_applies_defaults_and_flexible_ids() {
        let entries = vec![
            json!({"id": 10, "artist": "A", "title": "T"}),
            json!({"id": "11", "beatmapset_id": "99"}),
            json!({"beatmapset_id": null, "id": 12, "artist": null}),
            json!([1, 2]),
        ];
        let summaries = normalize(entries);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].set_id(), Some(10));
        assert_eq!(summaries[0].display_title(), "A - T");
        assert_eq!(summaries[1].id, Some(11));
        assert_eq!(summaries[1].set_id(), Some(99));
        assert_eq!(summaries[1].artist, UNKNOWN_ARTIST);
        assert_eq!(summaries[1].title, UNKNOWN_TITLE);
        assert_eq!(summaries[2].set_id(), Some(12));
    }

    #[test]
    fn float_and_bool_ids_keep_the_entry() {
        let entries = vec![
            json!({"id": 1.0, "beatmapset_id": 7.5, "title": "Float"}),
            json!({"id": true, "title": "Flag"}),
        ];
        let summaries = normalize(entries);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, Some(1));
        assert_eq!(summaries[0].beatmapset_id, None);
        assert_eq!(summaries[0].title, "Float");
        assert_eq!(summaries[1].id, None);
        assert_eq!(summaries[1].title, "Flag");
    }

    #[test]
    fn query_omits_defaults() {
        assert_eq!(build_query(&SearchFilter::default()), "");
        let filter = SearchFilter {
            query: Some("camellia ghost".into()),
            limit: 50,
            offset: 20,
            status: Some(vec![1, 2]),
            mode: Some(vec![3]),
            sort: Some(vec!["ranked_desc".into(), "plays_asc".into()]),
        };
        assert_eq!(
            build_query(&filter),
            "query=camellia%20ghost&limit=50&offset=20&status=1,2&mode=3&sort=ranked_desc,plays_asc"
        );
    }

    #[test]
    fn query_skips_empty_lists() {
        let filter = SearchFilter {
            status: Some(Vec::new()),
            sort: Some(Vec::new()),
            ..SearchFilter::default()
        };
        assert_eq!(build_query(&filter), "");
    }

    #[test]
    fn search_against_mock_server() {
        let (base, seen) = serve_json(200, r#"{"results":[{"id":5,"artist":"X","title":"Y"}]}"#);
        let client = SearchClient::with_base_url(base).unwrap();
        let filter = SearchFilter {
            query: Some("x".into()),
            ..SearchFilter::default()
        };
        let summaries = client.search_summaries(&filter).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].display_title(), "X - Y");
        assert_eq!(seen.lock().unwrap()[0], "/api/v2/search?query=x");
    }

    #[test]
    fn search_reports_status_errors() {
        let (base, _) = serve_json(503, "maintenance");
        let client = SearchClient::with_base_url(base).unwrap();
        match client.search(&SearchFilter::default()) {
            Err(SearchError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn search_reports_decode_errors() {
        let (base, _) = serve_json(200, "<html>");
        let client = SearchClient::with_base_url(base).unwrap();
        assert!(matches!(
            client.search(&SearchFilter::default()),
            Err(SearchError::Decode { .. })
        ));
    }

    #[test]
    fn search_reports_unrecognized_shape() {
        let (base, _) = serve_json(200, r#"{"error": "none"}"#);
        let client = SearchClient::with_base_url(base).unwrap();
        assert!(matches!(
            client.search_summaries(&SearchFilter::default()),
            Err(SearchError::UnrecognizedShape)
        ));
    }
}
