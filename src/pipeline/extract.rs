//! Turning a listing page into candidate proxies

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::models::{Decoder, ExtractionRule, Proxy};

/// Extract every acceptable proxy from `html` according to `rule`.
///
/// Malformed nodes are logged and skipped; they never abort the page.
pub fn extract(rule: &ExtractionRule, html: &str, source: &str) -> Vec<Proxy> {
    let document = Html::parse_document(html);
    let mut proxies = Vec::new();

    for node in document.select(rule.nodes()) {
        let parsed = match rule {
            ExtractionRule::Single { .. } => from_text(node),
            ExtractionRule::Cells {
                cells,
                host_index,
                port_index,
                ..
            } => from_cells(node, cells, *host_index, *port_index),
            ExtractionRule::Labeled {
                host,
                port,
                anonymity,
                decoder,
                ..
            } => from_labeled(node, host, port, anonymity, *decoder),
        };

        match parsed {
            Ok(Some(proxy)) => {
                if !proxies.contains(&proxy) {
                    proxies.push(proxy);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(source = %source, error = %e, "Error when parsing node"),
        }
    }

    if proxies.is_empty() {
        debug!(source = %source, "No proxies extracted");
    }

    proxies
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(node: ElementRef<'_>, selector: &Selector, what: &str) -> Result<String> {
    node.select(selector)
        .next()
        .map(text_of)
        .ok_or_else(|| PoolError::Extraction(format!("no {} element", what)))
}

fn from_text(node: ElementRef<'_>) -> Result<Option<Proxy>> {
    let text = text_of(node);
    if text.is_empty() {
        return Ok(None);
    }
    text.parse().map(Some)
}

fn from_cells(
    node: ElementRef<'_>,
    cells: &Selector,
    host_index: usize,
    port_index: usize,
) -> Result<Option<Proxy>> {
    let cells: Vec<ElementRef<'_>> = node.select(cells).collect();

    let host = cells
        .get(host_index)
        .map(|cell| text_of(*cell))
        .ok_or_else(|| PoolError::Extraction(format!("no cell at index {}", host_index)))?;
    if host.is_empty() {
        return Ok(None);
    }

    let port = cells
        .get(port_index)
        .map(|cell| text_of(*cell))
        .unwrap_or_default();

    Proxy::from_parts(&host, &port).map(Some)
}

fn from_labeled(
    node: ElementRef<'_>,
    host: &Selector,
    port: &Selector,
    anonymity: &Selector,
    decoder: Decoder,
) -> Result<Option<Proxy>> {
    let host = first_text(node, host, "host")?;
    let port = first_text(node, port, "port")?;
    let label = first_text(node, anonymity, "anonymity")?;

    if host.is_empty() || label != decoder.high_anonymity_label() {
        return Ok(None);
    }

    Proxy::from_parts(&host, &port).map(Some)
}
