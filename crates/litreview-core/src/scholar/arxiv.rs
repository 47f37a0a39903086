//! arXiv Atom API client.
//!
//! Searches `export.arxiv.org` and parses the Atom XML feed. Each entry gets
//! a synthetic DOI of the form `10.48550/arXiv.{id}` and prefers the `pdf`
//! link when present.

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::ScholarSettings;
use crate::error::ScholarError;
use crate::schema::{Paper, PaperSource};

const SOURCE: &str = "arxiv";

/// Maximum attempts per query, counting the first.
const MAX_ATTEMPTS: u32 = 3;

/// Run one search per query concurrently and merge the results.
///
/// Per-query failures are logged; the call fails only when every query fails.
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
            Ok(xml) => match parse_atom_feed(&xml) {
                Ok(batch) => {
                    any_ok = true;
                    for paper in batch {
                        if seen_ids.insert(paper.paper_id.clone()) {
                            papers.push(paper);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "arXiv feed parse failed");
                    last_error = Some(e);
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "arXiv search failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !any_ok && !queries.is_empty() => Err(e),
        _ => Ok(papers),
    }
}

async fn fetch_query(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    query: &str,
    limit: usize,
) -> Result<String, ScholarError> {
    let mut attempt = 1;
    loop {
        match fetch_once(client, settings, query, limit).await {
            Ok(xml) => return Ok(xml),
            Err(ScholarError::Network { error, .. }) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(error = %error, attempt, "arXiv request failed, retrying");
                tokio::time::sleep(backoff_duration(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Backoff before retry `attempt` (1-based): 1s, 2s, 4s, capped at 5s.
fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1)).min(Duration::from_secs(5))
}

async fn fetch_once(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    query: &str,
    limit: usize,
) -> Result<String, ScholarError> {
    let url = format!("{}/query", settings.arxiv_base);
    let limit_str = limit.to_string();
    let search_query = format!("all:{query}");

    let response = client
        .get(&url)
        .query(&[
            ("search_query", search_query.as_str()),
            ("start", "0"),
            ("max_results", limit_str.as_str()),
            ("sortBy", "relevance"),
            ("sortOrder", "descending"),
        ])
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

    response.text().await.map_err(|e| ScholarError::Network {
        src: SOURCE,
        error: e,
    })
}

/// Fields collected while walking one `<entry>` element.
#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    authors: Vec<String>,
    published: String,
    pdf_url: Option<String>,
}

impl EntryBuilder {
    fn into_paper(self) -> Option<Paper> {
        // The Atom id is the abstract URL; the short id follows "/abs/".
        let arxiv_id = self
            .id
            .rsplit_once("/abs/")
            .map_or(self.id.as_str(), |(_, id)| id)
            .to_string();
        let title = normalize_whitespace(&self.title);
        if arxiv_id.is_empty() || title.is_empty() {
            return None;
        }

        let year = self
            .published
            .get(..4)
            .and_then(|y| y.parse::<i32>().ok());

        Some(Paper {
            paper_id: format!("arxiv:{arxiv_id}"),
            title,
            authors: self.authors,
            abstract_text: normalize_whitespace(&self.summary),
            url: self.id,
            year,
            doi: Some(format!("10.48550/arXiv.{arxiv_id}")),
            pdf_url: self.pdf_url,
            is_approved: false,
            core_contribution: None,
            structured_contribution: None,
            source: PaperSource::Arxiv,
        })
    }
}

/// Parse an Atom feed into papers.
///
/// The walk matches on local names so it is insensitive to the feed's
/// namespace prefixes.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>, ScholarError> {
    let mut reader = Reader::from_str(xml);
    let mut papers: Vec<Paper> = Vec::new();

    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    // Element whose text content is currently being collected.
    let mut current_field: Option<&'static str> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => entry = Some(EntryBuilder::default()),
                    b"author" if entry.is_some() => in_author = true,
                    b"id" | b"title" | b"summary" | b"published" if entry.is_some() => {
                        current_field = Some(match name.as_ref() {
                            b"id" => "id",
                            b"title" => "title",
                            b"summary" => "summary",
                            _ => "published",
                        });
                        text.clear();
                    }
                    b"name" if in_author => {
                        current_field = Some("name");
                        text.clear();
                    }
                    // Links are normally self-closing; tolerate the expanded form.
                    b"link" => {
                        if let Some(builder) = entry.as_mut() {
                            apply_link(&e, builder, &reader)?;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"link" => {
                if let Some(builder) = entry.as_mut() {
                    apply_link(&e, builder, &reader)?;
                }
            }
            Ok(Event::Text(t)) => {
                if current_field.is_some() {
                    let chunk = t.unescape().map_err(|e| ScholarError::Decode {
                        src: SOURCE,
                        message: e.to_string(),
                    })?;
                    text.push_str(&chunk);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(builder) = entry.take() {
                            if let Some(paper) = builder.into_paper() {
                                papers.push(paper);
                            }
                        }
                    }
                    b"author" => in_author = false,
                    _ => {
                        if let (Some(field), Some(builder)) = (current_field, entry.as_mut()) {
                            let value = text.trim().to_string();
                            match field {
                                "id" => builder.id = value,
                                "title" => builder.title = value,
                                "summary" => builder.summary = value,
                                "published" => builder.published = value,
                                "name" => {
                                    if !value.is_empty() {
                                        builder.authors.push(value);
                                    }
                                }
                                _ => {}
                            }
                            current_field = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ScholarError::Decode {
                    src: SOURCE,
                    message: e.to_string(),
                })
            }
        }
    }

    Ok(papers)
}

fn apply_link(
    e: &quick_xml::events::BytesStart<'_>,
    builder: &mut EntryBuilder,
    reader: &Reader<&[u8]>,
) -> Result<(), ScholarError> {
    let mut title: Option<String> = None;
    let mut href: Option<String> = None;
    for attr in e.attributes().flatten() {
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| ScholarError::Decode {
                src: SOURCE,
                message: err.to_string(),
            })?
            .into_owned();
        match attr.key.local_name().as_ref() {
            b"title" => title = Some(value),
            b"href" => href = Some(value),
            _ => {}
        }
    }
    if title.as_deref() == Some("pdf") {
        builder.pdf_url = href;
    }
    Ok(())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <title>Attention Is All
 You Need</title>
    <summary>The dominant sequence transduction models are based on
 complex recurrent networks.</summary>
    <published>2017-06-12T17:57:34Z</published>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/1706.03762v7" rel="related" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2005.14165v4</id>
    <title>Language Models are Few-Shot Learners</title>
    <summary>Scaling up language models greatly improves task-agnostic performance.</summary>
    <published>2020-05-28T17:29:03Z</published>
    <author><name>Tom B. Brown</name></author>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_with_synthetic_doi() {
        let papers = parse_atom_feed(SAMPLE_FEED).expect("parse");
        assert_eq!(papers.len(), 2);

        let first = &papers[0];
        assert_eq!(first.paper_id, "arxiv:1706.03762v7");
        assert_eq!(first.title, "Attention Is All You Need");
        assert_eq!(first.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(first.year, Some(2017));
        assert_eq!(first.doi.as_deref(), Some("10.48550/arXiv.1706.03762v7"));
        assert_eq!(
            first.pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/1706.03762v7")
        );
        assert_eq!(first.source, PaperSource::Arxiv);

        let second = &papers[1];
        assert_eq!(second.paper_id, "arxiv:2005.14165v4");
        assert!(second.pdf_url.is_none());
    }

    #[test]
    fn abstract_newlines_are_collapsed() {
        let papers = parse_atom_feed(SAMPLE_FEED).expect("parse");
        assert_eq!(
            papers[0].abstract_text,
            "The dominant sequence transduction models are based on complex recurrent networks."
        );
    }

    #[test]
    fn entries_without_title_are_dropped() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><id>http://arxiv.org/abs/1234.5678</id><title></title></entry>
</feed>"#;
        let papers = parse_atom_feed(feed).expect("parse");
        assert!(papers.is_empty());
    }

    #[tokio::test]
    async fn search_issues_atom_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("search_query", "all:transformers"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(SAMPLE_FEED.to_string()),
            )
            .mount(&server)
            .await;

        let settings = ScholarSettings {
            arxiv_base: server.uri(),
            ..ScholarSettings::default()
        };
        let client = reqwest::Client::new();
        let papers = search(&client, &settings, &["transformers".to_string()], 10)
            .await
            .expect("search");

        assert_eq!(papers.len(), 2);
    }

    #[tokio::test]
    async fn http_error_surfaces_as_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let settings = ScholarSettings {
            arxiv_base: server.uri(),
            ..ScholarSettings::default()
        };
        let client = reqwest::Client::new();
        let err = search(&client, &settings, &["q".to_string()], 10)
            .await
            .unwrap_err();

        match err {
            ScholarError::Api { status, .. } => assert_eq!(status, 503),
            other => panic!("expected Api, got: {other}"),
        }
    }
}
