//! Target sites proxies are validated against
//!
//! Every target owns one score bucket in the store plus the key holding that
//! bucket's last-refresh time. Names are uppercase; lookups of unknown names
//! fall back to the aggregate `ALL` target.

use std::collections::HashMap;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

use super::source::compile_selector;
use crate::error::{PoolError, Result};

/// Name of the aggregate target every deployment carries
pub const ALL_TARGET: &str = "ALL";

/// Page shape a successful validation must produce unless a target overrides it
pub const DEFAULT_EXPECT: &str = "head > title";

const DEFAULT_ALL_URL: &str = "http://www.example.com/";

/// Uppercase, trimmed form every target name is compared in
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Where a target's scores and refresh time live in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoreIndex {
    pub bucket: String,
    pub mtime_key: String,
}

impl ScoreIndex {
    pub fn new(bucket: impl Into<String>, mtime_key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            mtime_key: mtime_key.into(),
        }
    }

    /// `proxy:<name>` / `mtime:<name>` in lowercase
    pub fn for_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        Self::new(format!("proxy:{}", lower), format!("mtime:{}", lower))
    }
}

/// Target definition as written in the catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub mtime_key: Option<String>,
    /// CSS selector the response page must match
    #[serde(default)]
    pub expect: Option<String>,
}

impl TargetSpec {
    /// Validate and compile into a [`Target`]
    pub fn compile(self) -> Result<Target> {
        let name = normalize_name(&self.name);
        if name.is_empty() {
            return Err(PoolError::InvalidConfig("target name must not be empty".into()));
        }

        let url = Url::parse(self.url.trim()).map_err(|e| {
            PoolError::InvalidConfig(format!("target {} has an invalid url: {}", name, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PoolError::InvalidConfig(format!(
                "target {} url must be http(s)",
                name
            )));
        }

        let defaults = ScoreIndex::for_name(&name);
        let index = ScoreIndex::new(
            self.bucket
                .filter(|b| !b.trim().is_empty())
                .unwrap_or(defaults.bucket),
            self.mtime_key
                .filter(|k| !k.trim().is_empty())
                .unwrap_or(defaults.mtime_key),
        );

        let expect_raw = self.expect.unwrap_or_else(|| DEFAULT_EXPECT.to_string());
        let expect = compile_selector(&expect_raw)?;

        Ok(Target {
            name,
            url,
            index,
            expect,
            expect_raw,
        })
    }
}

/// A compiled target
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub url: Url,
    pub index: ScoreIndex,
    pub expect: Selector,
    expect_raw: String,
}

impl Target {
    pub fn expect_selector(&self) -> &str {
        &self.expect_raw
    }

    /// The built-in aggregate target
    pub fn default_all() -> Self {
        TargetSpec {
            name: ALL_TARGET.to_string(),
            url: DEFAULT_ALL_URL.to_string(),
            bucket: None,
            mtime_key: None,
            expect: None,
        }
        .compile()
        .unwrap_or_else(|e| unreachable!("built-in ALL target is valid: {}", e))
    }
}

/// Result of looking a target up by name
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    pub target: &'a Target,
    /// false when the name was unknown and `ALL` was substituted
    pub exact: bool,
}

/// All configured targets, keyed by uppercase name
#[derive(Debug, Clone)]
pub struct TargetCatalog {
    targets: Vec<Target>,
    by_name: HashMap<String, usize>,
}

impl TargetCatalog {
    /// Build a catalog; an `ALL` target is added if none is configured
    pub fn new(targets: Vec<Target>) -> Result<Self> {
        let mut catalog = Self {
            targets: Vec::with_capacity(targets.len() + 1),
            by_name: HashMap::new(),
        };

        for target in targets {
            if catalog.by_name.contains_key(&target.name) {
                return Err(PoolError::InvalidConfig(format!(
                    "target {} is defined twice",
                    target.name
                )));
            }
            catalog
                .by_name
                .insert(target.name.clone(), catalog.targets.len());
            catalog.targets.push(target);
        }

        if !catalog.by_name.contains_key(ALL_TARGET) {
            catalog
                .by_name
                .insert(ALL_TARGET.to_string(), catalog.targets.len());
            catalog.targets.push(Target::default_all());
        }

        Ok(catalog)
    }

    /// Look up a target, falling back to `ALL` for unknown names
    pub fn resolve(&self, name: &str) -> Resolved<'_> {
        let name = normalize_name(name);
        match self.by_name.get(&name) {
            Some(&i) => Resolved {
                target: &self.targets[i],
                exact: true,
            },
            None => Resolved {
                target: self.all(),
                exact: false,
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<&Target> {
        self.by_name
            .get(&normalize_name(name))
            .map(|&i| &self.targets[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&normalize_name(name))
    }

    pub fn all(&self) -> &Target {
        // `new` guarantees the entry
        &self.targets[self.by_name[ALL_TARGET]]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Default for TargetCatalog {
    fn default() -> Self {
        Self {
            targets: vec![Target::default_all()],
            by_name: HashMap::from([(ALL_TARGET.to_string(), 0)]),
        }
    }
}
