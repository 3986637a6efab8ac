use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PoolError;

/// Scheme every pooled proxy is addressed with
pub const PROXY_SCHEME: &str = "http";

/// Port assumed when a listing leaves the port column blank
pub const DEFAULT_PORT: u16 = 80;

/// An HTTP proxy endpoint, normalized to `http://host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Proxy {
    host: String,
    port: u16,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, PoolError> {
        let host = host.into();
        let host = host.trim();
        let bracketed = host.starts_with('[') && host.ends_with(']');
        if host.is_empty()
            || host.contains(|c: char| c.is_whitespace() || c == '/' || c == '@')
            || (!bracketed && host.contains(':'))
        {
            return Err(PoolError::InvalidProxyAddress(host.to_string()));
        }
        if port == 0 {
            return Err(PoolError::InvalidProxyAddress(format!("{}:0", host)));
        }

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Build from separately scraped host and port cells
    pub fn from_parts(host: &str, port: &str) -> Result<Self, PoolError> {
        let port = port.trim();
        let port = if port.is_empty() {
            DEFAULT_PORT
        } else {
            port.parse::<u16>()
                .map_err(|_| PoolError::InvalidProxyAddress(format!("{}:{}", host.trim(), port)))?
        };
        Self::new(host, port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `scheme://host:port` identity used as the store key
    pub fn url(&self) -> String {
        format!("{}://{}:{}", PROXY_SCHEME, self.host, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", PROXY_SCHEME, self.host, self.port)
    }
}

impl FromStr for Proxy {
    type Err = PoolError;

    /// Accepts `host:port` or `http://host:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let rest = match raw.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(PROXY_SCHEME) => rest,
            Some(_) => return Err(PoolError::InvalidProxyAddress(raw.to_string())),
            None => raw,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| PoolError::InvalidProxyAddress(raw.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| PoolError::InvalidProxyAddress(raw.to_string()))?;

        Self::new(host, port)
    }
}

impl TryFrom<String> for Proxy {
    type Error = PoolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Proxy> for String {
    fn from(proxy: Proxy) -> Self {
        proxy.url()
    }
}

/// Outcome of timing one proxy against one target
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    /// Wall-clock seconds of a successful validation
    Latency(f64),
    /// Validation failed; scored with the configured exception penalty
    Penalty,
}

impl Score {
    /// The number stored in the target bucket; lower is better
    pub fn value(&self, penalty: f64) -> f64 {
        match self {
            Score::Latency(secs) => secs.max(0.0),
            Score::Penalty => penalty,
        }
    }

    pub fn is_penalty(&self) -> bool {
        matches!(self, Score::Penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_normalization() {
        let a: Proxy = "1.2.3.4:8080".parse().unwrap();
        let b: Proxy = "HTTP://1.2.3.4:8080/".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.url(), "http://1.2.3.4:8080");
        assert_eq!(a.to_string(), a.url());
    }

    #[test]
    fn test_proxy_rejects_other_schemes() {
        assert!("socks5://1.2.3.4:1080".parse::<Proxy>().is_err());
        assert!("https://1.2.3.4:443".parse::<Proxy>().is_err());
    }

    #[test]
    fn test_proxy_rejects_garbage() {
        assert!("".parse::<Proxy>().is_err());
        assert!("1.2.3.4".parse::<Proxy>().is_err());
        assert!("1.2.3.4:http".parse::<Proxy>().is_err());
        assert!("1.2.3.4:0".parse::<Proxy>().is_err());
        assert!("1.2.3.4:70000".parse::<Proxy>().is_err());
        assert!("user@1.2.3.4:80".parse::<Proxy>().is_err());
        assert!("1.2.3.4:80:8080".parse::<Proxy>().is_err());
        assert!(Proxy::from_parts("1.2.3.4:80", "8080").is_err());
    }

    #[test]
    fn test_proxy_accepts_bracketed_ipv6() {
        let proxy: Proxy = "[2001:db8::1]:3128".parse().unwrap();
        assert_eq!(proxy.url(), "http://[2001:db8::1]:3128");
    }

    #[test]
    fn test_from_parts_defaults_port() {
        let proxy = Proxy::from_parts(" 10.0.0.1 ", "").unwrap();
        assert_eq!(proxy.url(), "http://10.0.0.1:80");

        let proxy = Proxy::from_parts("10.0.0.1", " 3128 ").unwrap();
        assert_eq!(proxy.port(), 3128);

        assert!(Proxy::from_parts("10.0.0.1", "abc").is_err());
        assert!(Proxy::from_parts("  ", "80").is_err());
    }

    #[test]
    fn test_proxy_serde_as_string() {
        let proxy: Proxy = "10.0.0.1:3128".parse().unwrap();
        let json = serde_json::to_string(&proxy).unwrap();
        assert_eq!(json, "\"http://10.0.0.1:3128\"");

        let back: Proxy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proxy);
    }

    #[test]
    fn test_score_value() {
        assert_eq!(Score::Latency(0.4).value(30.0), 0.4);
        assert_eq!(Score::Penalty.value(30.0), 30.0);
        assert!(Score::Penalty.is_penalty());
        assert!(!Score::Latency(1.0).is_penalty());
    }
}
