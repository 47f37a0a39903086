//! PubMed E-utilities client.
//!
//! Two-step search: ESearch returns PMIDs, ESummary returns metadata.
//! DOIs are pulled from `elocationid` or `articleids` when available.
//! An API key from the environment raises the rate limit.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::ScholarSettings;
use crate::error::ScholarError;
use crate::schema::{Paper, PaperSource};

const SOURCE: &str = "pubmed";

/// Maximum attempts per request, counting the first.
const MAX_ATTEMPTS: u32 = 3;

/// Run one ESearch per query concurrently, then one batched ESummary.
pub async fn search(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    queries: &[String],
    limit_per_query: usize,
) -> Result<Vec<Paper>, ScholarError> {
    let fetches = queries
        .iter()
        .map(|q| fetch_ids(client, settings, q, limit_per_query));
    let results = futures::future::join_all(fetches).await;

    let mut pmids: Vec<String> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut last_error: Option<ScholarError> = None;
    let mut any_ok = false;

    for result in results {
        match result {
            Ok(ids) => {
                any_ok = true;
                for id in ids {
                    if seen.insert(id.clone()) {
                        pmids.push(id);
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "PubMed ID search failed");
                last_error = Some(e);
            }
        }
    }

    if let Some(e) = last_error {
        if !any_ok && !queries.is_empty() {
            return Err(e);
        }
    }
    if pmids.is_empty() {
        return Ok(Vec::new());
    }

    let summaries = fetch_summaries(client, settings, &pmids).await?;
    Ok(parse_papers(&summaries, &pmids))
}

/// Backoff before retry `attempt` (1-based): 1s, 2s, 4s, capped at 5s.
fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1)).min(Duration::from_secs(5))
}

async fn fetch_ids(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    query: &str,
    limit: usize,
) -> Result<Vec<String>, ScholarError> {
    let mut attempt = 1;
    loop {
        match fetch_ids_once(client, settings, query, limit).await {
            Ok(ids) => return Ok(ids),
            Err(ScholarError::Network { error, .. }) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(error = %error, attempt, "PubMed ESearch failed, retrying");
                tokio::time::sleep(backoff_duration(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_ids_once(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    query: &str,
    limit: usize,
) -> Result<Vec<String>, ScholarError> {
    let limit_str = limit.to_string();
    let mut params: Vec<(&str, &str)> = vec![
        ("db", "pubmed"),
        ("term", query),
        ("retmax", limit_str.as_str()),
        ("retmode", "json"),
        ("sort", "relevance"),
    ];
    if let Some(key) = &settings.pubmed_api_key {
        params.push(("api_key", key.as_str()));
    }

    let response = client
        .get(&settings.pubmed_esearch_base)
        .query(&params)
        .send()
        .await
        .map_err(|e| ScholarError::Network {
            src: SOURCE,
            error: e,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ScholarError::Api {
            src: SOURCE,
            status: status.as_u16(),
            message: body,
        });
    }

    let body: EsearchResponse = response.json().await.map_err(|e| ScholarError::Decode {
        src: SOURCE,
        message: e.to_string(),
    })?;

    Ok(body.esearchresult.idlist)
}

async fn fetch_summaries(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    pmids: &[String],
) -> Result<Value, ScholarError> {
    let ids = pmids.join(",");
    let mut attempt = 1;
    loop {
        match fetch_summaries_once(client, settings, &ids).await {
            Ok(value) => return Ok(value),
            Err(ScholarError::Network { error, .. }) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(error = %error, attempt, "PubMed ESummary failed, retrying");
                tokio::time::sleep(backoff_duration(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_summaries_once(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    ids: &str,
) -> Result<Value, ScholarError> {
    let mut params: Vec<(&str, &str)> =
        vec![("db", "pubmed"), ("id", ids), ("retmode", "json")];
    if let Some(key) = &settings.pubmed_api_key {
        params.push(("api_key", key.as_str()));
    }

    let response = client
        .get(&settings.pubmed_esummary_base)
        .query(&params)
        .send()
        .await
        .map_err(|e| ScholarError::Network {
            src: SOURCE,
            error: e,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ScholarError::Api {
            src: SOURCE,
            status: status.as_u16(),
            message: body,
        });
    }

    response.json().await.map_err(|e| ScholarError::Decode {
        src: SOURCE,
        message: e.to_string(),
    })
}

/// Parse ESummary output, keeping the PMID request order.
fn parse_papers(summary: &Value, pmids: &[String]) -> Vec<Paper> {
    let Some(result) = summary.get("result").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut papers = Vec::new();
    for pmid in pmids {
        let Some(doc) = result.get(pmid).and_then(Value::as_object) else {
            continue;
        };

        let title = doc
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if title.is_empty() {
            continue;
        }

        let authors: Vec<String> = doc
            .get("authors")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|a| a.get("name").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let year = doc
            .get("pubdate")
            .and_then(Value::as_str)
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse::<i32>().ok());

        // elocationid first; articleids win when both carry a DOI.
        let mut doi = doc
            .get("elocationid")
            .and_then(Value::as_str)
            .and_then(|e| e.strip_prefix("doi:"))
            .map(|d| d.trim().to_string());
        if let Some(article_ids) = doc.get("articleids").and_then(Value::as_array) {
            for aid in article_ids {
                if aid.get("idtype").and_then(Value::as_str) == Some("doi") {
                    if let Some(value) = aid.get("value").and_then(Value::as_str) {
                        doi = Some(value.to_string());
                    }
                    break;
                }
            }
        }

        papers.push(Paper {
            paper_id: format!("pubmed:{pmid}"),
            title,
            authors,
            abstract_text: String::new(),
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
            year,
            doi,
            pdf_url: None,
            is_approved: false,
            core_contribution: None,
            structured_contribution: None,
            source: PaperSource::Pubmed,
        });
    }

    papers
}

// --- Internal Serde types ---

#[derive(Deserialize)]
struct EsearchResponse {
    #[serde(default)]
    esearchresult: EsearchResult,
}

#[derive(Deserialize, Default)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}
