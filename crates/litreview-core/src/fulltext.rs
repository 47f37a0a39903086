//! Full-text PDF resolution via Unpaywall and OpenAlex.
//!
//! Resolution order: Unpaywall by DOI, OpenAlex by DOI, OpenAlex title
//! search (year-filtered when known). Misses are silent; the resolver may
//! also back-fill a missing DOI from an OpenAlex title match.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::ScholarSettings;
use crate::error::FulltextError;
use crate::schema::Paper;

/// Maximum attempts per lookup, counting the first.
const MAX_ATTEMPTS: u32 = 3;

/// Wait after a 429 before the request is retried.
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(2);

/// Normalize a DOI: strip any `https://doi.org/` or `https://dx.doi.org/`
/// prefix and lowercase. Idempotent.
pub fn normalize_doi(doi: &str) -> String {
    let trimmed = doi.trim();
    let lowered = trimmed.to_lowercase();
    let stripped = lowered
        .strip_prefix("https://dx.doi.org/")
        .or_else(|| lowered.strip_prefix("http://dx.doi.org/"))
        .or_else(|| lowered.strip_prefix("https://doi.org/"))
        .or_else(|| lowered.strip_prefix("http://doi.org/"))
        .unwrap_or(&lowered);
    stripped.to_string()
}

/// Resolve a PDF URL and possibly a DOI for one paper.
///
/// Returns `(pdf_url, doi)`; either side may be `None`. Never errors on a
/// miss, only on unrecoverable transport failures.
pub async fn resolve_pdf_url(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    title: &str,
    doi: Option<&str>,
    year: Option<i32>,
) -> Result<(Option<String>, Option<String>), FulltextError> {
    let mut resolved_doi = doi.map(normalize_doi);

    if let Some(doi) = resolved_doi.as_deref() {
        let url = format!("{}/{}", settings.unpaywall_base, doi);
        if let Some(data) =
            fetch_json(client, &url, &[("email", settings.unpaywall_email.as_str())]).await?
        {
            if let Some(pdf) = extract_pdf_from_unpaywall(&data) {
                tracing::debug!(doi, "Found PDF via Unpaywall");
                return Ok((Some(pdf), resolved_doi));
            }
        }

        let url = format!("{}/works/https://doi.org/{}", settings.openalex_base, doi);
        if let Some(work) = fetch_json(client, &url, &[]).await? {
            if let Some(pdf) = extract_pdf_from_openalex(&work) {
                tracing::debug!(doi, "Found PDF via OpenAlex DOI lookup");
                return Ok((Some(pdf), resolved_doi));
            }
        }
    }

    let url = format!("{}/works", settings.openalex_base);
    let year_filter = year.map(|y| format!("publication_year:{y}"));
    let mut params: Vec<(&str, &str)> = vec![("search", title), ("per-page", "5")];
    if let Some(filter) = year_filter.as_deref() {
        params.push(("filter", filter));
    }

    if let Some(data) = fetch_json(client, &url, &params).await? {
        let results = data
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let title_lower = title.to_lowercase();
        for work in &results {
            let work_title = work
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            // Tolerant match: substring containment either direction.
            if work_title.is_empty()
                || !(title_lower.contains(&work_title) || work_title.contains(&title_lower))
            {
                continue;
            }
            let pdf = extract_pdf_from_openalex(work);
            if resolved_doi.is_none() {
                resolved_doi = extract_doi_from_openalex(work);
            }
            if let Some(pdf) = pdf {
                tracing::debug!(title = %truncated(title, 50), "Found PDF via OpenAlex title search");
                return Ok((Some(pdf), resolved_doi));
            }
        }
    }

    Ok((None, resolved_doi))
}

/// Enrich one paper with a PDF URL (and back-filled DOI) when missing.
pub async fn enrich_paper(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    paper: Paper,
) -> Paper {
    if paper.pdf_url.is_some() {
        return paper;
    }

    match resolve_pdf_url(
        client,
        settings,
        &paper.title,
        paper.doi.as_deref(),
        paper.year,
    )
    .await
    {
        Ok((pdf_url, doi)) => {
            let mut updated = paper;
            if pdf_url.is_some() {
                updated.pdf_url = pdf_url;
            }
            if updated.doi.is_none() {
                updated.doi = doi;
            }
            updated
        }
        Err(e) => {
            tracing::warn!(
                title = %truncated(&paper.title, 50),
                error = %e,
                "Failed to enrich paper"
            );
            paper
        }
    }
}

/// Enrich a batch of papers with bounded concurrency, preserving order.
///
/// Enrichment failures are per-paper non-fatal; the paper passes through
/// unchanged.
pub async fn enrich_papers(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    papers: Vec<Paper>,
    concurrency: usize,
) -> Vec<Paper> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let tasks = papers.into_iter().map(|paper| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            enrich_paper(client, settings, paper).await
        }
    });
    futures::future::join_all(tasks).await
}

/// GET a JSON document. 404 maps to `None`; 429 sleeps briefly and retries;
/// other non-success statuses map to `None` (schema violations are treated
/// as empty results for this resolver).
async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
) -> Result<Option<Value>, FulltextError> {
    let mut attempt = 1;
    loop {
        let result = async {
            let response = client.get(url).query(params).send().await?;
            match response.status().as_u16() {
                404 => Ok(None),
                429 => Err(FulltextError::RateLimited),
                s if (200..300).contains(&s) => {
                    let value = response.json::<Value>().await?;
                    Ok(Some(value))
                }
                _ => Ok(None),
            }
        }
        .await;

        match result {
            Ok(value) => return Ok(value),
            Err(FulltextError::RateLimited) if attempt < MAX_ATTEMPTS => {
                tokio::time::sleep(RATE_LIMIT_WAIT).await;
                attempt += 1;
            }
            Err(FulltextError::Network(e)) if attempt < MAX_ATTEMPTS && e.is_timeout() => {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn extract_pdf_from_unpaywall(data: &Value) -> Option<String> {
    if let Some(pdf) = data
        .get("best_oa_location")
        .and_then(|l| l.get("pdf_url"))
        .and_then(Value::as_str)
    {
        return Some(pdf.to_string());
    }

    data.get("oa_locations")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|loc| loc.get("pdf_url").and_then(Value::as_str))
        .map(String::from)
}

fn extract_pdf_from_openalex(work: &Value) -> Option<String> {
    if let Some(oa_url) = work
        .get("open_access")
        .and_then(|oa| oa.get("oa_url"))
        .and_then(Value::as_str)
    {
        if oa_url.to_lowercase().ends_with(".pdf") {
            return Some(oa_url.to_string());
        }
    }

    for key in ["best_oa_location", "primary_location"] {
        if let Some(pdf) = work
            .get(key)
            .and_then(|l| l.get("pdf_url"))
            .and_then(Value::as_str)
        {
            return Some(pdf.to_string());
        }
    }

    work.get("locations")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|loc| loc.get("pdf_url").and_then(Value::as_str))
        .map(String::from)
}

fn extract_doi_from_openalex(work: &Value) -> Option<String> {
    work.get("doi")
        .and_then(Value::as_str)
        .or_else(|| {
            work.get("ids")
                .and_then(|ids| ids.get("doi"))
                .and_then(Value::as_str)
        })
        .map(normalize_doi)
}

fn truncated(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PaperSource;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn paper(title: &str, doi: Option<&str>, pdf: Option<&str>) -> Paper {
        Paper {
            paper_id: "p1".to_string(),
            title: title.to_string(),
            authors: vec![],
            abstract_text: String::new(),
            url: String::new(),
            year: Some(2020),
            doi: doi.map(String::from),
            pdf_url: pdf.map(String::from),
            is_approved: false,
            core_contribution: None,
            structured_contribution: None,
            source: PaperSource::SemanticScholar,
        }
    }

    fn settings_for(server: &MockServer) -> ScholarSettings {
        ScholarSettings {
            unpaywall_base: format!("{}/v2", server.uri()),
            openalex_base: server.uri(),
            unpaywall_email: "test@example.com".to_string(),
            ..ScholarSettings::default()
        }
    }

    #[test]
    fn normalize_doi_strips_scheme_and_lowercases() {
        assert_eq!(
            normalize_doi("https://doi.org/10.1000/ABC"),
            "10.1000/abc"
        );
        assert_eq!(
            normalize_doi("http://dx.doi.org/10.1000/xyz"),
            "10.1000/xyz"
        );
        assert_eq!(normalize_doi(" 10.1000/xyz "), "10.1000/xyz");
    }

    #[test]
    fn normalize_doi_is_idempotent() {
        let once = normalize_doi("https://dx.doi.org/10.1000/ABC");
        assert_eq!(normalize_doi(&once), once);
    }

    #[tokio::test]
    async fn unpaywall_hit_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/10.1000/abc"))
            .and(query_param("email", "test@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "best_oa_location": {"pdf_url": "https://oa.example.org/abc.pdf"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let (pdf, doi) = resolve_pdf_url(
            &client,
            &settings_for(&server),
            "A Paper",
            Some("https://doi.org/10.1000/ABC"),
            None,
        )
        .await
        .expect("resolve");

        assert_eq!(pdf.as_deref(), Some("https://oa.example.org/abc.pdf"));
        assert_eq!(doi.as_deref(), Some("10.1000/abc"));
    }

    #[tokio::test]
    async fn falls_back_to_openalex_doi_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/10.1000/abc"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works/https://doi.org/10.1000/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "best_oa_location": {"pdf_url": "https://oa.example.org/via-openalex.pdf"}
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let (pdf, _) = resolve_pdf_url(
            &client,
            &settings_for(&server),
            "A Paper",
            Some("10.1000/abc"),
            None,
        )
        .await
        .expect("resolve");

        assert_eq!(
            pdf.as_deref(),
            Some("https://oa.example.org/via-openalex.pdf")
        );
    }

    #[tokio::test]
    async fn title_search_backfills_doi() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("search", "Deep Residual Learning"))
            .and(query_param("filter", "publication_year:2020"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "title": "Deep Residual Learning for Image Recognition",
                    "doi": "https://doi.org/10.1109/CVPR.2016.90",
                    "best_oa_location": {"pdf_url": "https://oa.example.org/resnet.pdf"}
                }]
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let (pdf, doi) = resolve_pdf_url(
            &client,
            &settings_for(&server),
            "Deep Residual Learning",
            None,
            Some(2020),
        )
        .await
        .expect("resolve");

        assert_eq!(pdf.as_deref(), Some("https://oa.example.org/resnet.pdf"));
        assert_eq!(doi.as_deref(), Some("10.1109/cvpr.2016.90"));
    }

    #[tokio::test]
    async fn miss_returns_none_silently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": []})),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let (pdf, doi) = resolve_pdf_url(&client, &settings_for(&server), "Unknown", None, None)
            .await
            .expect("resolve");
        assert!(pdf.is_none());
        assert!(doi.is_none());
    }

    #[tokio::test]
    async fn enrich_skips_papers_with_pdf() {
        let server = MockServer::start().await;
        // No mocks mounted: any request would 404 at the mock server level,
        // but a paper that already has a PDF must not make one.
        let client = reqwest::Client::new();
        let enriched = enrich_papers(
            &client,
            &settings_for(&server),
            vec![paper("Has PDF", None, Some("https://x/p.pdf"))],
            3,
        )
        .await;
        assert_eq!(enriched[0].pdf_url.as_deref(), Some("https://x/p.pdf"));
    }

    #[tokio::test]
    async fn enrich_preserves_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": []})),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let papers = vec![
            paper("First", None, None),
            paper("Second", None, None),
            paper("Third", None, None),
        ];
        let enriched = enrich_papers(&client, &settings_for(&server), papers, 3).await;
        let titles: Vec<&str> = enriched.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
    }
}
