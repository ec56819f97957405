use anyhow::{anyhow, Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::models::RawPosting;

const FINN_BASE: &str = "https://www.finn.no";

pub const DEFAULT_TITLE: &str = "Unknown Title";
pub const DEFAULT_EMPLOYER: &str = "Unknown";
pub const DEFAULT_DEADLINE: &str = "Se annonse";
pub const DEFAULT_LOCATION: &str = "Unknown";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Where postings come from. The pipeline only sees locators and raw
/// field bundles, so a different board (or a test double) can stand in.
pub trait PostingSource {
    /// Locators of the postings a query currently lists.
    fn search(&self, query: &str) -> Result<Vec<String>>;
    fn fetch(&self, locator: &str) -> Result<RawPosting>;
}

/// Scrapes finn.no search results and job ad pages.
pub struct FinnSource {
    client: reqwest::blocking::Client,
}

impl FinnSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    fn get_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("GET {url} returned {status}"));
        }
        response.text().with_context(|| format!("reading body of {url}"))
    }
}

impl PostingSource for FinnSource {
    fn search(&self, query: &str) -> Result<Vec<String>> {
        let url = search_url(query);
        debug!(%url, "searching");
        let html = self.get_html(&url)?;
        Ok(parse_search_results(&html))
    }

    fn fetch(&self, locator: &str) -> Result<RawPosting> {
        let html = self.get_html(locator)?;
        Ok(parse_detail(locator, &html))
    }
}

pub fn search_url(query: &str) -> String {
    let q: Vec<&str> = query.split_whitespace().collect();
    format!("{FINN_BASE}/job/search?q={}", q.join("+"))
}

fn selector(css: &str) -> Selector {
    // Selectors below are literals; a parse failure is a programming error.
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css}: {e}"))
}

/// Text content with runs of whitespace collapsed to one space.
fn element_text(element: ElementRef) -> String {
    let raw = element.text().collect::<Vec<_>>().join(" ");
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

/// Strips a leading `Label:` (or a bare `Label`) from an info line.
fn strip_label(text: &str, labels: &[&str]) -> String {
    let mut rest = text;
    for label in labels {
        if let Some(idx) = rest.find(label) {
            rest = &rest[idx + label.len()..];
            break;
        }
    }
    rest.trim().trim_start_matches(':').trim().to_string()
}

/// Posting links on a search results page, absolute, first occurrence kept.
pub fn parse_search_results(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let links = selector("article a.job-card-link[href]");

    let mut locators: Vec<String> = Vec::new();
    for element in document.select(&links) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let locator = if href.starts_with('/') {
            format!("{FINN_BASE}{href}")
        } else {
            href.to_string()
        };
        if !locators.contains(&locator) {
            locators.push(locator);
        }
    }
    locators
}

/// Pulls the posting fields out of an ad page. Missing elements fall back to
/// placeholder values rather than failing the posting.
pub fn parse_detail(locator: &str, html: &str) -> RawPosting {
    let document = Html::parse_document(html);

    let title = document
        .select(&selector("h1.t2"))
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let employer = document
        .select(&selector("section.mt-16 p.mb-24"))
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_EMPLOYER.to_string());

    let bold = selector("span.font-bold");
    let deadline = document
        .select(&selector("li.flex.flex-col"))
        .filter(|li| element_text(*li).contains("Frist"))
        .find_map(|li| li.select(&bold).next().map(element_text))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_DEADLINE.to_string());

    let mut location = None;
    let mut contact = String::new();
    let mut phone = String::new();
    let item = selector("li");
    for list in document.select(&selector("ul.space-y-6")) {
        let mut list_contact = String::new();
        let mut list_phone = String::new();
        let mut is_contact_list = false;

        for li in list.select(&item) {
            let text = element_text(li);
            if text.contains("Sted") && location.is_none() {
                location = Some(strip_label(&text, &["Sted"])).filter(|l| !l.is_empty());
            }
            if text.contains("Kontaktperson") {
                list_contact = strip_label(&text, &["Kontaktperson"]);
                is_contact_list = true;
            }
            if text.contains("Mobil") || text.contains("Telefon") {
                list_phone = strip_label(&text, &["Mobil", "Telefon"]);
            }
        }

        // Phone numbers outside a contact block belong to the switchboard.
        if is_contact_list {
            if contact.is_empty() {
                contact = list_contact;
            }
            if phone.is_empty() {
                phone = list_phone;
            }
        }
    }

    let description = document
        .select(&selector("div.import-decoration"))
        .next()
        .map(|div| {
            div.text()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    RawPosting {
        locator: locator.to_string(),
        title,
        employer,
        deadline,
        location: location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        contact,
        phone,
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
        <html><body>
          <article><h2><a class="job-card-link sf-search-ad-link" href="/job/ad/401234567">Dataingeniør</a></h2></article>
          <article><a class="job-card-link" href="https://www.finn.no/job/ad/401234568">Backend</a></article>
          <article><a class="job-card-link" href="/job/ad/401234567">Dataingeniør (dup)</a></article>
          <article><a class="other-link" href="/job/ad/999">Not a card</a></article>
          <a class="job-card-link" href="/job/ad/888">Outside article</a>
        </body></html>
    "#;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <section class="mt-16">
            <h1 class="t2">  Junior   Data Engineer </h1>
            <p class="mb-24">Acme AS</p>
          </section>
          <ul>
            <li class="flex flex-col">Ansettelsesform <span class="font-bold">Fast</span></li>
            <li class="flex flex-col">Frist <span class="font-bold">15.03.2026</span></li>
          </ul>
          <ul class="space-y-6">
            <li>Sted: Oslo</li>
            <li>Sektor: Privat</li>
          </ul>
          <ul class="space-y-6">
            <li>Telefon: 22 00 00 00</li>
          </ul>
          <ul class="space-y-6">
            <li><span>Kontaktperson:</span> Kari Nordmann</li>
            <li><span>Mobil:</span> 900 00 000</li>
          </ul>
          <div class="import-decoration">
            <p>We use Python and SQL.</p>
            <ul><li>dbt</li><li>Snowflake</li></ul>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_search_url_joins_words_with_plus() {
        assert_eq!(
            search_url("Data  Engineer"),
            "https://www.finn.no/job/search?q=Data+Engineer"
        );
    }

    #[test]
    fn test_parse_search_results_dedupes_in_order() {
        let links = parse_search_results(SEARCH_PAGE);
        assert_eq!(
            links,
            vec![
                "https://www.finn.no/job/ad/401234567".to_string(),
                "https://www.finn.no/job/ad/401234568".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_detail_extracts_fields() {
        let raw = parse_detail("https://www.finn.no/job/ad/401234567", DETAIL_PAGE);
        assert_eq!(raw.title, "Junior Data Engineer");
        assert_eq!(raw.employer, "Acme AS");
        assert_eq!(raw.deadline, "15.03.2026");
        assert_eq!(raw.location, "Oslo");
        assert_eq!(raw.contact, "Kari Nordmann");
        assert_eq!(raw.phone, "900 00 000");
        assert_eq!(raw.description, "We use Python and SQL.\ndbt\nSnowflake");
        assert_eq!(raw.locator, "https://www.finn.no/job/ad/401234567");
    }

    #[test]
    fn test_parse_detail_defaults_on_empty_page() {
        let raw = parse_detail("https://www.finn.no/job/ad/1", "<html><body></body></html>");
        assert_eq!(raw.title, DEFAULT_TITLE);
        assert_eq!(raw.employer, DEFAULT_EMPLOYER);
        assert_eq!(raw.deadline, DEFAULT_DEADLINE);
        assert_eq!(raw.location, DEFAULT_LOCATION);
        assert!(raw.contact.is_empty());
        assert!(raw.phone.is_empty());
        assert!(raw.description.is_empty());
    }

    #[test]
    fn test_strip_label() {
        assert_eq!(strip_label("Sted: Bergen", &["Sted"]), "Bergen");
        assert_eq!(strip_label("Telefon:12345678", &["Mobil", "Telefon"]), "12345678");
        assert_eq!(strip_label("Kontaktperson : Ola", &["Kontaktperson"]), "Ola");
    }
}
