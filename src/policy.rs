use std::fmt;

use http::Uri;
use serde::{Deserialize, Serialize};

/// Caching bucket a request falls into. Computed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Data-backend traffic; passed straight through, never cached.
    Bypass,
    /// Media assets; cache-first with opportunistic refresh.
    Media,
    /// The trusted external asset host; stale-while-revalidate.
    External,
    /// Everything else; stale-while-revalidate.
    Default,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Bypass => "bypass",
            RequestClass::Media => "media",
            RequestClass::External => "external",
            RequestClass::Default => "default",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String-matching rules that route requests to a caching strategy.
///
/// Rules are evaluated in a fixed order and the first match wins:
/// bypass, then media, then external, then default. Matching is plain
/// substring (bypass, hero), prefix (media) or equality (external host).
///
/// Policies are cheap to clone and immutable; the `with_*` helpers return
/// updated copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePolicy {
    bypass_domains: Vec<String>,
    media_prefix: String,
    external_host: Option<String>,
    hero_pattern: Option<String>,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            bypass_domains: vec!["supabase.co".to_owned(), "supabase.io".to_owned()],
            media_prefix: "/media/".to_owned(),
            external_host: Some("raw.githubusercontent.com".to_owned()),
            hero_pattern: Some("hero.jpg".to_owned()),
        }
    }
}

impl RoutePolicy {
    /// A policy that matches nothing: every request is `Default`.
    pub fn empty() -> Self {
        Self {
            bypass_domains: Vec::new(),
            media_prefix: String::new(),
            external_host: None,
            hero_pattern: None,
        }
    }

    /// Replaces the bypass domain list.
    pub fn with_bypass_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the media path prefix. An empty prefix disables the media class.
    pub fn with_media_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.media_prefix = prefix.into();
        self
    }

    pub fn with_external_host(mut self, host: Option<String>) -> Self {
        self.external_host = host;
        self
    }

    pub fn with_hero_pattern(mut self, pattern: Option<String>) -> Self {
        self.hero_pattern = pattern;
        self
    }

    pub fn bypass_domains(&self) -> &[String] {
        &self.bypass_domains
    }

    pub fn media_prefix(&self) -> &str {
        &self.media_prefix
    }

    pub fn external_host(&self) -> Option<&str> {
        self.external_host.as_deref()
    }

    pub fn hero_pattern(&self) -> Option<&str> {
        self.hero_pattern.as_deref()
    }

    /// Assigns `target` to exactly one [`RequestClass`].
    pub fn classify(&self, target: &Uri) -> RequestClass {
        let host = target.host().unwrap_or_default();
        let path = target.path();

        if self
            .bypass_domains
            .iter()
            .any(|domain| !domain.is_empty() && host.contains(domain.as_str()))
        {
            return RequestClass::Bypass;
        }

        if !self.media_prefix.is_empty() && path.starts_with(&self.media_prefix) {
            return RequestClass::Media;
        }

        if self
            .external_host
            .as_deref()
            .is_some_and(|external| !host.is_empty() && host == external)
        {
            return RequestClass::External;
        }

        RequestClass::Default
    }

    /// Whether a cached media hit for `target` also triggers a background
    /// refresh.
    pub fn is_hero(&self, target: &Uri) -> bool {
        self.hero_pattern
            .as_deref()
            .is_some_and(|pattern| !pattern.is_empty() && target.path().contains(pattern))
    }
}
