//! Crawl sources and their extraction rules

use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

use super::proxy::Proxy;
use crate::error::{PoolError, Result};

/// Compile a CSS selector, mapping failures into a config error
pub fn compile_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| PoolError::InvalidSelector {
        selector: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Markup dialect of a listing that tags rows with an anonymity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decoder {
    #[serde(rename = "proxy360")]
    Proxy360,
    #[serde(rename = "cn-proxy")]
    CnProxy,
}

impl Decoder {
    /// Exact label the dialect uses for high-anonymity proxies
    pub fn high_anonymity_label(&self) -> &'static str {
        match self {
            Decoder::Proxy360 => "高匿",
            Decoder::CnProxy => "高度匿名",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decoder::Proxy360 => "proxy360",
            Decoder::CnProxy => "cn-proxy",
        }
    }
}

/// Extraction rule as written in the catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Each node's text is `host:port`
    Single { nodes: String },
    /// Positional child cells hold host and port
    Cells {
        nodes: String,
        cells: String,
        #[serde(default = "default_host_index")]
        host_index: usize,
        #[serde(default = "default_port_index")]
        port_index: usize,
    },
    /// Host, port and anonymity label are separate sub-selectors
    Labeled {
        nodes: String,
        host: String,
        port: String,
        anonymity: String,
        decoder: Decoder,
    },
}

fn default_host_index() -> usize {
    1
}

fn default_port_index() -> usize {
    2
}

impl RuleSpec {
    pub fn compile(&self) -> Result<ExtractionRule> {
        Ok(match self {
            RuleSpec::Single { nodes } => ExtractionRule::Single {
                nodes: compile_selector(nodes)?,
            },
            RuleSpec::Cells {
                nodes,
                cells,
                host_index,
                port_index,
            } => {
                if host_index == port_index {
                    return Err(PoolError::InvalidConfig(format!(
                        "cells rule `{}` reads host and port from the same cell",
                        nodes
                    )));
                }
                ExtractionRule::Cells {
                    nodes: compile_selector(nodes)?,
                    cells: compile_selector(cells)?,
                    host_index: *host_index,
                    port_index: *port_index,
                }
            }
            RuleSpec::Labeled {
                nodes,
                host,
                port,
                anonymity,
                decoder,
            } => ExtractionRule::Labeled {
                nodes: compile_selector(nodes)?,
                host: compile_selector(host)?,
                port: compile_selector(port)?,
                anonymity: compile_selector(anonymity)?,
                decoder: *decoder,
            },
        })
    }
}

/// Compiled extraction rule, one variant per listing shape
#[derive(Debug, Clone)]
pub enum ExtractionRule {
    Single {
        nodes: Selector,
    },
    Cells {
        nodes: Selector,
        cells: Selector,
        host_index: usize,
        port_index: usize,
    },
    Labeled {
        nodes: Selector,
        host: Selector,
        port: Selector,
        anonymity: Selector,
        decoder: Decoder,
    },
}

impl ExtractionRule {
    /// Selector yielding the candidate nodes
    pub fn nodes(&self) -> &Selector {
        match self {
            ExtractionRule::Single { nodes }
            | ExtractionRule::Cells { nodes, .. }
            | ExtractionRule::Labeled { nodes, .. } => nodes,
        }
    }
}

/// Crawl source as written in the catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub bootstrap_proxy: Option<String>,
    pub rule: RuleSpec,
}

impl SourceSpec {
    pub fn compile(self) -> Result<CrawlSource> {
        let url = Url::parse(self.url.trim()).map_err(|e| {
            PoolError::InvalidConfig(format!("source {} has an invalid url: {}", self.name, e))
        })?;

        let bootstrap_proxy = match self.bootstrap_proxy.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<Proxy>().map_err(|e| {
                PoolError::InvalidConfig(format!(
                    "source {} has an invalid bootstrap proxy: {}",
                    self.name, e
                ))
            })?),
        };

        let rule = self.rule.compile()?;

        Ok(CrawlSource {
            name: self.name,
            url,
            bootstrap_proxy,
            rule,
        })
    }
}

/// A compiled proxy-listing page
#[derive(Debug, Clone)]
pub struct CrawlSource {
    pub name: String,
    pub url: Url,
    /// Proxy the listing page itself is fetched through
    pub bootstrap_proxy: Option<Proxy>,
    pub rule: ExtractionRule,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_spec_from_json() {
        let single: RuleSpec =
            serde_json::from_str(r#"{"kind": "single", "nodes": "td.addr"}"#).unwrap();
        assert!(matches!(single, RuleSpec::Single { .. }));

        let cells: RuleSpec =
            serde_json::from_str(r#"{"kind": "cells", "nodes": "tr", "cells": "td"}"#).unwrap();
        match cells {
            RuleSpec::Cells {
                host_index,
                port_index,
                ..
            } => {
                assert_eq!(host_index, 1);
                assert_eq!(port_index, 2);
            }
            other => panic!("unexpected rule {:?}", other),
        }

        let labeled: RuleSpec = serde_json::from_str(
            r#"{"kind": "labeled", "nodes": "tr", "host": "td.ip", "port": "td.port",
                "anonymity": "td.level", "decoder": "cn-proxy"}"#,
        )
        .unwrap();
        assert!(matches!(
            labeled,
            RuleSpec::Labeled {
                decoder: Decoder::CnProxy,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_decoder_is_rejected() {
        let result: std::result::Result<RuleSpec, _> = serde_json::from_str(
            r#"{"kind": "labeled", "nodes": "tr", "host": "a", "port": "b",
                "anonymity": "c", "decoder": "mystery"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rule_compile_errors() {
        let bad = RuleSpec::Single {
            nodes: "[[".to_string(),
        };
        assert!(matches!(
            bad.compile(),
            Err(PoolError::InvalidSelector { .. })
        ));

        let same_cell = RuleSpec::Cells {
            nodes: "tr".to_string(),
            cells: "td".to_string(),
            host_index: 1,
            port_index: 1,
        };
        assert!(matches!(
            same_cell.compile(),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_source_compile_with_bootstrap() {
        let source = SourceSpec {
            name: "list".to_string(),
            url: "http://lists.example/page".to_string(),
            bootstrap_proxy: Some("http://10.1.1.1:3128".to_string()),
            rule: RuleSpec::Single {
                nodes: "li".to_string(),
            },
        }
        .compile()
        .unwrap();

        assert_eq!(
            source.bootstrap_proxy.map(|p| p.url()),
            Some("http://10.1.1.1:3128".to_string())
        );
    }

    #[test]
    fn test_source_compile_rejects_socks_bootstrap() {
        let result = SourceSpec {
            name: "list".to_string(),
            url: "http://lists.example/page".to_string(),
            bootstrap_proxy: Some("socks5://10.1.1.1:1080".to_string()),
            rule: RuleSpec::Single {
                nodes: "li".to_string(),
            },
        }
        .compile();
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_decoder_labels() {
        assert_eq!(Decoder::Proxy360.high_anonymity_label(), "高匿");
        assert_eq!(Decoder::CnProxy.high_anonymity_label(), "高度匿名");
        assert_eq!(Decoder::CnProxy.as_str(), "cn-proxy");
    }
}
