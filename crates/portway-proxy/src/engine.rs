//! Upstream forwarding with response rewriting and conditional caching.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use portway_cache::CacheProvider;
use portway_config::{EndpointDefinition, Environment, ProxyEndpoint};
use tracing::{debug, warn};

use crate::cache_policy::{
    CacheEntry, cache_duration, cache_key, endpoint_prefix, is_cacheable_content_type,
};
use crate::error::{ProxyError, ProxyResult};
use crate::rewrite::{rewrite_urls, should_rewrite};
use crate::translate::{AppendHeaders, HeaderConflictPolicy, TranslationMap};

/// Custom property declaring a verb translation map.
pub const TRANSLATION_PROPERTY: &str = "HttpMethodTranslation";

/// Custom property declaring appended companion headers.
pub const APPEND_HEADERS_PROPERTY: &str = "HttpMethodAppendHeaders";

/// Custom property overriding the cache duration, seconds.
pub const CACHE_SECONDS_PROPERTY: &str = "CacheDurationSeconds";

/// Request headers forwarded to the upstream.
const FORWARDED_HEADERS: &[&str] = &["accept", "accept-language", "content-type", "prefer"];

/// Hop-by-hop headers never forwarded nor returned.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// One request as seen by the proxy engine.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Inbound HTTP verb.
    pub method: String,
    /// Path segments after the endpoint name.
    pub path_suffix: Vec<String>,
    /// Raw query string, when present.
    pub query: Option<String>,
    /// Inbound headers, lowercase names.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Bytes,
    /// Public base for URL rewriting: `{scheme}://{host}/api/{env}/{endpoint}`.
    pub public_base: String,
    /// Short hash of the authorization context, part of the cache key.
    pub auth_context_hash: String,
}

/// Response returned to the dispatcher.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    /// Upstream (or cached) status code.
    pub status: u16,
    /// Response headers with hop-by-hop entries removed.
    pub headers: BTreeMap<String, String>,
    /// Response body, possibly rewritten.
    pub body: Bytes,
    /// Whether the response came from the cache.
    pub cache_hit: bool,
}

/// Forwards requests to configured upstreams.
pub struct ProxyEngine {
    client: reqwest::Client,
    cache: Arc<dyn CacheProvider>,
    default_cache_seconds: u64,
    conflict_policy: HeaderConflictPolicy,
}

impl ProxyEngine {
    /// Build the engine and its shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::UpstreamUnavailable`] when the client cannot be
    /// constructed.
    pub fn new(
        cache: Arc<dyn CacheProvider>,
        upstream_timeout: Duration,
        default_cache_seconds: u64,
        overwrite_appended_headers: bool,
    ) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .build()
            .map_err(|err| ProxyError::UpstreamUnavailable {
                detail: err.to_string(),
            })?;
        Ok(Self {
            client,
            cache,
            default_cache_seconds,
            conflict_policy: if overwrite_appended_headers {
                HeaderConflictPolicy::Overwrite
            } else {
                HeaderConflictPolicy::Skip
            },
        })
    }

    /// Forward a request through an endpoint's upstream.
    ///
    /// GETs with cacheable responses are cached; modifying verbs invalidate
    /// the endpoint's cached GETs. Upstream 4xx/5xx pass through verbatim.
    ///
    /// # Errors
    ///
    /// Returns transport-level failures only; upstream error statuses are
    /// successful results.
    pub async fn execute(
        &self,
        definition: &EndpointDefinition,
        proxy: &ProxyEndpoint,
        environment: &Environment,
        request: ProxyRequest,
    ) -> ProxyResult<ProxiedResponse> {
        let translation = match definition.property_str(TRANSLATION_PROPERTY) {
            Some(raw) => TranslationMap::parse(raw)?,
            None => TranslationMap::default(),
        };
        let appended = match definition.property_str(APPEND_HEADERS_PROPERTY) {
            Some(raw) => AppendHeaders::parse(raw)?,
            None => AppendHeaders::default(),
        };
        let cache_override = definition
            .custom_properties
            .get(CACHE_SECONDS_PROPERTY)
            .and_then(serde_json::Value::as_u64);

        let translated = translation.translate(&request.method);
        let url = build_url(&proxy.upstream_url, &request.path_suffix, request.query.as_deref())?;

        let accept_language = request
            .headers
            .get("accept-language")
            .cloned()
            .unwrap_or_default();
        let key = cache_key(
            &translated,
            &url,
            &environment.name,
            &definition.name,
            &accept_language,
            &request.auth_context_hash,
        );

        if translated == "GET" {
            match self.cache.get(&key).await {
                Ok(Some(raw)) => {
                    if let Some(entry) = CacheEntry::from_bytes(&raw) {
                        debug!(endpoint = %definition.name, "proxy cache hit");
                        return Ok(ProxiedResponse {
                            status: entry.status_code,
                            headers: entry.headers,
                            body: entry.content,
                            cache_hit: true,
                        });
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "proxy cache read failed; forwarding");
                }
            }
        }

        let response = self
            .forward(&translated, &url, &request, &appended, environment)
            .await?;

        let rewritten = if proxy.rewrite_response_urls
            && response
                .headers
                .get("content-type")
                .is_some_and(|content_type| should_rewrite(content_type))
        {
            let text = String::from_utf8_lossy(&response.body);
            Bytes::from(rewrite_urls(&text, &proxy.upstream_url, &request.public_base))
        } else {
            response.body.clone()
        };
        let response = ProxiedResponse {
            body: rewritten,
            ..response
        };

        if translated == "GET" {
            self.maybe_store(&key, &response, cache_override).await;
        } else if is_modifying(&translated) {
            let prefix = endpoint_prefix(&environment.name, &definition.name);
            if let Err(err) = self.cache.remove_by_prefix(&prefix).await {
                warn!(error = %err, "proxy cache invalidation failed");
            }
        }

        Ok(response)
    }

    async fn forward(
        &self,
        method: &str,
        url: &str,
        request: &ProxyRequest,
        appended: &AppendHeaders,
        environment: &Environment,
    ) -> ProxyResult<ProxiedResponse> {
        let verb = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_err| {
            ProxyError::TranslationInvalid {
                detail: format!("untransmittable verb '{method}'"),
            }
        })?;

        let mut outbound = self.client.request(verb, url);
        let mut sent: BTreeMap<String, String> = BTreeMap::new();

        for name in FORWARDED_HEADERS {
            if let Some(value) = request.headers.get(*name) {
                sent.insert((*name).to_string(), value.clone());
            }
        }
        for (name, value) in &environment.headers {
            sent.insert(name.to_ascii_lowercase(), value.clone());
        }
        for (name, value) in appended.resolve(&request.method, method) {
            let lowered = name.to_ascii_lowercase();
            match self.conflict_policy {
                HeaderConflictPolicy::Overwrite => {
                    sent.insert(lowered, value);
                }
                HeaderConflictPolicy::Skip => {
                    sent.entry(lowered).or_insert(value);
                }
            }
        }
        for (name, value) in &sent {
            outbound = outbound.header(name, value);
        }
        if !request.body.is_empty() {
            outbound = outbound.body(request.body.clone());
        }

        let upstream = outbound.send().await.map_err(|err| {
            if err.is_timeout() {
                ProxyError::UpstreamTimeout
            } else {
                ProxyError::UpstreamUnavailable {
                    detail: err.to_string(),
                }
            }
        })?;

        let status = upstream.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in upstream.headers() {
            let lowered = name.as_str().to_ascii_lowercase();
            if HOP_BY_HOP.contains(&lowered.as_str()) {
                continue;
            }
            if let Ok(text) = value.to_str() {
                headers.insert(lowered, text.to_string());
            }
        }
        let body = upstream
            .bytes()
            .await
            .map_err(|err| ProxyError::UpstreamUnavailable {
                detail: err.to_string(),
            })?;

        Ok(ProxiedResponse {
            status,
            headers,
            body,
            cache_hit: false,
        })
    }

    async fn maybe_store(
        &self,
        key: &str,
        response: &ProxiedResponse,
        cache_override: Option<u64>,
    ) {
        if !(200..300).contains(&response.status) {
            return;
        }
        let cacheable = response
            .headers
            .get("content-type")
            .is_some_and(|content_type| is_cacheable_content_type(content_type));
        if !cacheable {
            return;
        }

        let ttl = cache_duration(
            response.headers.get("cache-control").map(String::as_str),
            cache_override,
            self.default_cache_seconds,
        );
        let entry = CacheEntry {
            content: response.body.clone(),
            headers: response.headers.clone(),
            status_code: response.status,
            created_at: Utc::now(),
        };

        // Writes for a key serialize through the acquire-or-skip lock;
        // a concurrent writer holding it means this response can be dropped.
        let lock = self
            .cache
            .acquire_lock(
                &format!("{key}:write"),
                Duration::from_secs(5),
                Duration::from_millis(250),
                Duration::from_millis(50),
            )
            .await;
        let held = match lock {
            Ok(Some(handle)) => Some(handle),
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "cache lock unavailable; writing without it");
                None
            }
        };

        match entry.to_bytes() {
            Ok(encoded) => {
                if let Err(err) = self.cache.set(key, encoded, ttl).await {
                    warn!(error = %err, "proxy cache write failed");
                }
            }
            Err(err) => {
                warn!(error = %err, "proxy cache entry failed to encode");
            }
        }
        if let Some(handle) = held {
            handle.release();
        }
    }
}

fn is_modifying(method: &str) -> bool {
    matches!(method, "POST" | "PUT" | "PATCH" | "DELETE" | "MERGE")
}

fn build_url(upstream: &str, suffix: &[String], query: Option<&str>) -> ProxyResult<String> {
    if upstream.trim().is_empty() {
        return Err(ProxyError::InvalidUpstreamUrl {
            url: upstream.to_string(),
        });
    }
    let mut url = upstream.trim_end_matches('/').to_string();
    for segment in suffix {
        url.push('/');
        url.push_str(segment);
    }
    if let Some(query) = query
        && !query.is_empty()
    {
        url.push('?');
        url.push_str(query);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portway_cache::MemoryCacheProvider;
    use portway_config::{EndpointPayload, SecretString};
    use portway_events::EndpointKind;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn definition(name: &str, upstream: &str) -> (EndpointDefinition, ProxyEndpoint) {
        let proxy = ProxyEndpoint {
            upstream_url: upstream.to_string(),
            rewrite_response_urls: true,
        };
        let definition = EndpointDefinition {
            name: name.to_string(),
            namespace: None,
            kind: EndpointKind::Proxy,
            allowed_environments: Vec::new(),
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            is_private: false,
            custom_properties: BTreeMap::new(),
            source_dir: std::path::PathBuf::new(),
            payload: EndpointPayload::Proxy(proxy.clone()),
        };
        (definition, proxy)
    }

    fn environment() -> Environment {
        Environment {
            name: "prod".to_string(),
            server_name: "sql01".to_string(),
            connection_string: SecretString::new("Server=db".to_string()),
            headers: BTreeMap::from([
                ("DatabaseName".to_string(), "prod".to_string()),
                ("ServerName".to_string(), "sql01".to_string()),
            ]),
        }
    }

    /// Serve a canned JSON response for every connection; `{base}` in the
    /// template becomes the server's own URL. Returns the base URL and a
    /// counter of requests handled.
    async fn spawn_upstream(template: &str) -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let base = format!("http://{addr}");
        let body = template.replace("{base}", &base);
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut buffer = [0u8; 4096];
                let _ = socket.read(&mut buffer).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncache-control: max-age=60\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (base, hits)
    }

    fn request(method: &str) -> ProxyRequest {
        ProxyRequest {
            method: method.to_string(),
            path_suffix: Vec::new(),
            query: None,
            headers: BTreeMap::new(),
            body: Bytes::new(),
            public_base: "https://host/api/prod/Accounts".to_string(),
            auth_context_hash: "h".to_string(),
        }
    }

    fn engine(cache: Arc<dyn CacheProvider>) -> ProxyEngine {
        ProxyEngine::new(cache, Duration::from_secs(5), 300, false).expect("engine")
    }

    #[tokio::test]
    async fn forwards_rewrites_and_caches_gets() {
        let (upstream, hits) =
            spawn_upstream(r#"{"d":{"url":"{base}/Account(guid'X')"}}"#).await;
        let (definition, proxy) = definition("Accounts", &upstream);
        let cache = Arc::new(MemoryCacheProvider::new(64));
        let engine = engine(cache.clone());

        let first = engine
            .execute(&definition, &proxy, &environment(), request("GET"))
            .await
            .expect("first");
        assert_eq!(first.status, 200);
        assert!(!first.cache_hit);
        let text = String::from_utf8_lossy(&first.body);
        assert!(
            text.contains("https://host/api/prod/Accounts/Account(guid'X')"),
            "upstream link must be rewritten, got {text}"
        );
        assert!(!text.contains(&upstream));

        let second = engine
            .execute(&definition, &proxy, &environment(), request("GET"))
            .await
            .expect("second");
        assert!(second.cache_hit);
        assert_eq!(second.body, first.body);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn modifying_methods_invalidate_cached_gets() {
        let (upstream, hits) = spawn_upstream(r#"{"ok":true}"#).await;
        let (definition, proxy) = definition("Accounts", &upstream);
        let cache = Arc::new(MemoryCacheProvider::new(64));
        let engine = engine(cache);

        let env = environment();
        engine
            .execute(&definition, &proxy, &env, request("GET"))
            .await
            .expect("prime");
        engine
            .execute(&definition, &proxy, &env, request("POST"))
            .await
            .expect("mutate");
        let after = engine
            .execute(&definition, &proxy, &env, request("GET"))
            .await
            .expect("refetch");
        assert!(!after.cache_hit);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let (definition, proxy) = definition("Accounts", "http://127.0.0.1:9");
        let cache = Arc::new(MemoryCacheProvider::new(4));
        let engine = engine(cache);
        let err = engine
            .execute(&definition, &proxy, &environment(), request("GET"))
            .await
            .expect_err("unreachable");
        assert!(matches!(err, ProxyError::UpstreamUnavailable { .. }));
    }

    #[test]
    fn url_building_preserves_suffix_and_query() {
        let url = build_url(
            "http://internal/srv/Account/",
            &["detail".to_string(), "7".to_string()],
            Some("expand=lines"),
        )
        .expect("url");
        assert_eq!(url, "http://internal/srv/Account/detail/7?expand=lines");
    }
}
