//! Semantic Scholar graph API client.
//!
//! JSON paper search with `Retry-After`-aware handling of HTTP 429 and
//! exponential backoff on transient failures.

use std::time::Duration;

use serde::Deserialize;

use crate::config::ScholarSettings;
use crate::error::ScholarError;
use crate::schema::{Paper, PaperSource};

const SOURCE: &str = "semantic_scholar";

/// Fields requested on every search.
const FIELDS: &str = "paperId,title,authors,abstract,url,year,externalIds,openAccessPdf";

/// Maximum attempts per query, counting the first.
const MAX_ATTEMPTS: u32 = 3;

/// Wait applied when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 3;

/// Run one search per query concurrently and merge the results.
///
/// Per-query failures are logged and contribute nothing; the call fails only
/// when every query fails, so the caller can record a source-level outage.
pub async fn search(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    queries: &[String],
    limit_per_query: usize,
) -> Result<Vec<Paper>, ScholarError> {
    let fetches = queries
        .iter()
        .map(|q| fetch_query(client, settings, q, limit_per_query));
    let results = futures::future::join_all(fetches).await;

    let mut papers: Vec<Paper> = Vec::new();
    let mut seen_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut last_error: Option<ScholarError> = None;
    let mut any_ok = false;

    for result in results {
        match result {
            Ok(batch) => {
                any_ok = true;
                for paper in batch {
                    if !paper.paper_id.is_empty() && seen_ids.insert(paper.paper_id.clone()) {
                        papers.push(paper);
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Semantic Scholar search failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !any_ok && !queries.is_empty() => Err(e),
        _ => Ok(papers),
    }
}

/// One query with retry: 429 waits out `Retry-After` (default 3s) and then
/// backs off exponentially (2s base, 10s cap); network errors back off the
/// same way; other API errors fail immediately.
async fn fetch_query(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    query: &str,
    limit: usize,
) -> Result<Vec<Paper>, ScholarError> {
    let mut attempt = 1;
    loop {
        match fetch_once(client, settings, query, limit).await {
            Ok(papers) => return Ok(papers),
            Err(ScholarError::RateLimited {
                retry_after_secs, ..
            }) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    wait_secs = retry_after_secs,
                    attempt,
                    "Rate limited by Semantic Scholar, waiting"
                );
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                tokio::time::sleep(backoff_duration(attempt)).await;
                attempt += 1;
            }
            Err(ScholarError::Network { error, .. }) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(error = %error, attempt, "Semantic Scholar request failed, retrying");
                tokio::time::sleep(backoff_duration(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Backoff before retry `attempt` (1-based): 2s, 4s, 8s, capped at 10s.
fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt).min(Duration::from_secs(10))
}

async fn fetch_once(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    query: &str,
    limit: usize,
) -> Result<Vec<Paper>, ScholarError> {
    let url = format!("{}/paper/search", settings.semantic_scholar_base);
    let limit_str = limit.to_string();
    let mut request = client
        .get(&url)
        .header("Accept", "application/json")
        .query(&[
            ("query", query),
            ("limit", limit_str.as_str()),
            ("offset", "0"),
            ("fields", FIELDS),
        ]);
    if let Some(key) = &settings.semantic_scholar_api_key {
        request = request.header("x-api-key", key);
    }

    let response = request.send().await.map_err(|e| ScholarError::Network {
        src: SOURCE,
        error: e,
    })?;

    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(ScholarError::RateLimited {
            src: SOURCE,
            retry_after_secs: retry_after,
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ScholarError::Api {
            src: SOURCE,
            status: status.as_u16(),
            message: body,
        });
    }

    let body: SearchResponse = response.json().await.map_err(|e| ScholarError::Decode {
        src: SOURCE,
        message: e.to_string(),
    })?;

    Ok(body.data.into_iter().map(parse_paper).collect())
}

fn parse_paper(raw: RawPaper) -> Paper {
    let authors = raw
        .authors
        .into_iter()
        .map(|a| a.name.unwrap_or_else(|| "Unknown".to_string()))
        .collect();

    Paper {
        paper_id: raw.paper_id.unwrap_or_default(),
        title: raw.title.unwrap_or_default(),
        authors,
        abstract_text: raw.abstract_text.unwrap_or_default(),
        url: raw.url.unwrap_or_default(),
        year: raw.year,
        doi: raw.external_ids.and_then(|ids| ids.doi),
        pdf_url: raw.open_access_pdf.and_then(|p| p.url),
        is_approved: false,
        core_contribution: None,
        structured_contribution: None,
        source: PaperSource::SemanticScholar,
    }
}

// --- Internal Serde types ---

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<RawPaper>,
}

#[derive(Deserialize)]
struct RawPaper {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    authors: Vec<RawAuthor>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    url: Option<String>,
    year: Option<i32>,
    #[serde(rename = "externalIds")]
    external_ids: Option<RawExternalIds>,
    #[serde(rename = "openAccessPdf")]
    open_access_pdf: Option<RawOpenAccessPdf>,
}

#[derive(Deserialize)]
struct RawAuthor {
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

#[derive(Deserialize)]
struct RawOpenAccessPdf {
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> ScholarSettings {
        ScholarSettings {
            semantic_scholar_base: server.uri(),
            ..ScholarSettings::default()
        }
    }

    fn paper_json(id: &str, title: &str) -> serde_json::Value {
        serde_json::json!({
            "paperId": id,
            "title": title,
            "authors": [{"name": "Ada Lovelace"}],
            "abstract": "An abstract.",
            "url": format!("https://example.org/{id}"),
            "year": 2021,
            "externalIds": {"DOI": "10.1000/xyz"},
            "openAccessPdf": {"url": format!("https://example.org/{id}.pdf")}
        })
    }

    #[tokio::test]
    async fn search_parses_papers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(query_param("query", "transformers"))
            .and(query_param("fields", FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [paper_json("s2-1", "Attention Is All You Need")]
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let papers = search(
            &client,
            &settings_for(&server),
            &["transformers".to_string()],
            10,
        )
        .await
        .expect("search");

        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.paper_id, "s2-1");
        assert_eq!(p.source, PaperSource::SemanticScholar);
        assert_eq!(p.doi.as_deref(), Some("10.1000/xyz"));
        assert_eq!(p.pdf_url.as_deref(), Some("https://example.org/s2-1.pdf"));
        assert_eq!(p.year, Some(2021));
    }

    #[tokio::test]
    async fn duplicate_ids_across_queries_are_collapsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [paper_json("s2-1", "Same Paper")]
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let papers = search(
            &client,
            &settings_for(&server),
            &["q1".to_string(), "q2".to_string()],
            10,
        )
        .await
        .expect("search");

        assert_eq!(papers.len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_retries_with_retry_after() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(
                ResponseTemplate::new(429)
                    .append_header("Retry-After", "0")
                    .set_body_string("slow down"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [paper_json("s2-2", "Recovered")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let papers = search(&client, &settings_for(&server), &["q".to_string()], 10)
            .await
            .expect("search");

        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].paper_id, "s2-2");
    }

    #[tokio::test]
    async fn api_error_fails_the_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = search(&client, &settings_for(&server), &["q".to_string()], 10)
            .await
            .unwrap_err();

        match err {
            ScholarError::Api { status, .. } => assert_eq!(status, 500),
            other => panic!("expected Api, got: {other}"),
        }
    }

    #[test]
    fn backoff_is_capped_at_ten_seconds() {
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(4), Duration::from_secs(10));
    }
}
