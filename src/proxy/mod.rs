//! Request router - the per-request pipeline
//!
//! Every request carries its own configuration in the path:
//!
//! ```text
//! /<config-token>$<upstream-url>
//! ```
//!
//! where the token is URL-encoded JSON or `!ENV_VAR`. The dispatch sequence
//! per request: decode the config, read the body once, detect the client
//! dialect, moderate the extracted text, render the body in the upstream
//! dialect, forward, and gate or translate the response. Pre-flight
//! failures (decode, detection, moderation) short-circuit without touching
//! the upstream.
//!
//! Streaming policy: until the stream validator commits, upstream bytes are
//! buffered and errors surface as JSON; after commitment bytes flow
//! verbatim and errors become a terminal `event: error` frame.

pub mod server;
pub mod sse;
pub mod stream_check;
pub mod upstream;

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, Response},
};
use bytes::Bytes;
use futures::future;
use futures::StreamExt;
use serde_json::{json, Map, Value};

use crate::config::request::{decode_config_token, RequestConfig};
use crate::error::GatewayError;
use crate::memory_guard::{MemoryGuard, TrackedCache};
use crate::moderation::basic::FilterCache;
use crate::moderation::smart::bow::ModelCache;
use crate::moderation::{moderate, Decision};
use crate::transform::{adapter_by_name, detect, neutral::ChatRequest, FormatAdapter};
use self::stream_check::StreamChecker;
use self::upstream::{split_base_url, UpstreamPool};

/// Shared state for the gateway server
#[derive(Clone)]
pub struct GatewayState {
    /// Long-lived upstream clients, keyed by base URL
    pub upstream: Arc<UpstreamPool>,
    /// Keyword filter cache
    pub filters: Arc<FilterCache>,
    /// Classifier model cache
    pub models: Arc<ModelCache>,
    /// Base directory of moderation profiles
    pub profiles_dir: PathBuf,
}

impl GatewayState {
    pub fn new(profiles_dir: PathBuf) -> Self {
        Self {
            upstream: Arc::new(UpstreamPool::new()),
            filters: Arc::new(FilterCache::new()),
            models: Arc::new(ModelCache::new()),
            profiles_dir,
        }
    }

    /// Register the evictable caches with the memory guard
    pub fn register_caches(&self, guard: &MemoryGuard) {
        let filters_dyn: Arc<dyn TrackedCache> = self.filters.clone();
        let models_dyn: Arc<dyn TrackedCache> = self.models.clone();
        let filters: std::sync::Weak<dyn TrackedCache> = Arc::downgrade(&filters_dyn);
        let models: std::sync::Weak<dyn TrackedCache> = Arc::downgrade(&models_dyn);
        guard.track(filters);
        guard.track(models);
    }

    /// Release process-wide resources on shutdown
    pub fn shutdown(&self) {
        self.upstream.shutdown();
        crate::moderation::smart::storage::shutdown_pools();
    }
}

/// Parse the gateway path grammar into (config, absolute upstream URL).
pub(crate) fn parse_gateway_path(
    path: &str,
    query: Option<&str>,
) -> Result<(RequestConfig, String), GatewayError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let Some((token, upstream)) = trimmed.split_once('$') else {
        return Err(GatewayError::path_grammar(path));
    };

    if token.is_empty() {
        return Err(GatewayError::config_decode("empty config token"));
    }

    let config =
        decode_config_token(token).map_err(|e| GatewayError::config_decode(format!("{:#}", e)))?;

    // The upstream segment is a complete absolute URL, reconstructed
    // verbatim; clients that percent-encoded it get one decode pass
    let upstream = if upstream.starts_with("http://") || upstream.starts_with("https://") {
        upstream.to_string()
    } else {
        let decoded = urlencoding::decode(upstream)
            .map_err(|_| GatewayError::config_decode("upstream URL is not valid UTF-8"))?
            .into_owned();
        if !(decoded.starts_with("http://") || decoded.starts_with("https://")) {
            return Err(GatewayError::config_decode(format!(
                "upstream segment is not an absolute URL: {}",
                upstream
            )));
        }
        decoded
    };

    let url = match query {
        Some(query) if !query.is_empty() => format!("{}?{}", upstream, query),
        _ => upstream,
    };

    Ok((config, url))
}

/// Fallback for paths outside the grammar
pub(crate) async fn not_found(req: Request<Body>) -> GatewayError {
    GatewayError::path_grammar(req.uri().path())
}

/// Main gateway handler - any method, any matching path
pub(crate) async fn gateway_handler(
    State(state): State<GatewayState>,
    req: Request<Body>,
) -> Result<Response<Body>, GatewayError> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();

    let (config, upstream_url) = parse_gateway_path(uri.path(), uri.query())?;

    tracing::debug!("Gateway request {} {} -> {}", method, uri.path(), upstream_url);

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::internal(format!("Failed to read request body: {}", e)))?;

    // The body is read exactly once; non-JSON bodies bypass moderation and
    // translation and are forwarded opaquely
    let body_obj = serde_json::from_slice::<Value>(&body_bytes)
        .ok()
        .and_then(|v| v.as_object().cloned());

    let Some(body_obj) = body_obj else {
        let response = forward_upstream(&state, &method, &upstream_url, &headers, body_bytes).await?;
        return mirror_buffered(response).await;
    };

    let ft = &config.format_transform;

    // Tools are rejected up front when disabled, regardless of dialect
    if ft.enabled && ft.disable_tools && raw_body_has_tools(&body_obj) {
        return Err(GatewayError::tools_disabled(
            "Tool use is disabled for this gateway configuration",
        ));
    }

    // Validate the target dialect before spending work on the request
    let target_override: Option<&'static dyn FormatAdapter> = match (&ft.enabled, &ft.to) {
        (true, Some(to)) => Some(adapter_by_name(to).ok_or_else(|| {
            GatewayError::config_decode(format!("unknown target dialect: {}", to))
        })?),
        _ => None,
    };

    // Detection runs when translation is on, and also when only moderation
    // is on (the neutral model is what moderation reads its text from)
    let needs_neutral = ft.enabled || config.moderation_enabled();
    if !needs_neutral {
        let response = forward_upstream(&state, &method, &upstream_url, &headers, body_bytes).await?;
        return relay_response(response, raw_stream_flag(&body_obj)).await;
    }

    let upstream_path = split_base_url(&upstream_url)
        .map(|(_, path)| path)
        .unwrap_or("/");

    let candidates = ft.from.candidates(ft.enabled && ft.disable_tools);
    let Some(detected) = detect(&candidates, upstream_path, &headers, &body_obj) else {
        if ft.enabled && ft.strict_parse {
            return Err(GatewayError::format_detect());
        }
        tracing::debug!("No dialect detected; passing request through unmodified");
        let response = forward_upstream(&state, &method, &upstream_url, &headers, body_bytes).await?;
        return relay_response(response, raw_stream_flag(&body_obj)).await;
    };

    let neutral = detected
        .request_to_neutral(&body_obj)
        .map_err(|e| GatewayError::internal(format!("Failed to parse {} request: {:#}", detected.name(), e)))?;

    tracing::debug!("Detected dialect {} ({} message(s))", detected.name(), neutral.messages.len());

    if ft.enabled && ft.disable_tools && neutral.has_tool_content() {
        return Err(GatewayError::tools_disabled(
            "Tool use is disabled for this gateway configuration",
        ));
    }

    // Moderation precedes any upstream side effect
    if config.moderation_enabled() {
        let text = neutral.moderation_text();
        if !text.is_empty() {
            let decision = run_moderation(&state, &config, text).await?;
            if let Decision::Blocked { code, reason } = decision {
                return Err(GatewayError::moderation_blocked(code, reason));
            }
        }
    }

    // Render the upstream body: re-emit only when the dialect or the stream
    // flag actually changes, otherwise forward the original bytes
    let is_stream = if ft.enabled {
        ft.stream.resolve(neutral.stream)
    } else {
        neutral.stream
    };
    let target = target_override.unwrap_or(detected);
    let translated = ft.enabled && (target.name() != detected.name() || is_stream != neutral.stream);

    let out_bytes = if translated {
        let mut outbound: ChatRequest = neutral.clone();
        outbound.stream = is_stream;
        let rendered = target
            .neutral_to_request(&outbound)
            .map_err(|e| GatewayError::internal(format!("Failed to render {} request: {:#}", target.name(), e)))?;
        Bytes::from(
            serde_json::to_vec(&Value::Object(rendered))
                .map_err(|e| GatewayError::internal(e.to_string()))?,
        )
    } else {
        body_bytes
    };

    let response = forward_upstream(&state, &method, &upstream_url, &headers, out_bytes).await?;

    // Response path: streams are gated, buffered responses are translated
    // back when the dialects differ
    if is_stream && sse::is_sse_content_type(content_type_of(response.headers())) {
        return stream_gated(response).await;
    }

    let dialects_differ = target.name() != detected.name();
    relay_translated(response, ft.enabled && dialects_differ, target, detected).await
}

/// Whether the raw body carries tool fields, before any dialect parsing
fn raw_body_has_tools(body: &Map<String, Value>) -> bool {
    let has_tools = body
        .get("tools")
        .map_or(false, |t| !t.is_null() && t.as_array().map_or(true, |a| !a.is_empty()));
    has_tools || body.contains_key("tool_choice")
}

/// The body's own stream flag, for requests that skip the neutral model
fn raw_stream_flag(body: &Map<String, Value>) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn content_type_of(headers: &reqwest::header::HeaderMap) -> Option<&str> {
    headers.get("content-type").and_then(|v| v.to_str().ok())
}

/// Run both moderation tiers on a blocking context
async fn run_moderation(
    state: &GatewayState,
    config: &RequestConfig,
    text: String,
) -> Result<Decision, GatewayError> {
    let filters = state.filters.clone();
    let models = state.models.clone();
    let profiles_dir = state.profiles_dir.clone();
    let config = config.clone();

    tokio::task::spawn_blocking(move || {
        moderate(&text, &config, &filters, &models, &profiles_dir)
    })
    .await
    .map_err(|e| GatewayError::internal(format!("moderation task failed: {}", e)))?
    .map_err(|e| GatewayError::internal(format!("moderation error: {:#}", e)))
}

/// Headers never forwarded in either direction
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "host" | "connection" | "transfer-encoding" | "content-length"
    )
}

/// Forward the request to the upstream. Network failures surface as 502.
async fn forward_upstream(
    state: &GatewayState,
    method: &axum::http::Method,
    upstream_url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, GatewayError> {
    let (base, _) = split_base_url(upstream_url)
        .ok_or_else(|| GatewayError::config_decode("upstream URL has no authority"))?;
    let client = state
        .upstream
        .client_for(base)
        .map_err(|e| GatewayError::internal(format!("{:#}", e)))?;

    let forward_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| GatewayError::internal(format!("Invalid HTTP method: {}", e)))?;

    let mut forward_req = client.request(forward_method, upstream_url).body(body);

    // Splice in client headers minus hop-by-hop ones; credentials forward
    // verbatim. Accept-Encoding is forced because the stream validator must
    // see plain text (zstd would defeat it).
    for (key, value) in headers.iter() {
        let name = key.as_str();
        if is_hop_by_hop(name) || name == "accept-encoding" {
            continue;
        }
        forward_req = forward_req.header(name, value.as_bytes());
    }
    forward_req = forward_req.header("accept-encoding", "gzip, deflate, identity");

    forward_req
        .send()
        .await
        .map_err(|e| GatewayError::upstream(format!("Upstream request failed: {}", e)))
}

/// Copy upstream response headers minus the ones we recompute
fn copy_response_headers(
    builder: axum::http::response::Builder,
    headers: &reqwest::header::HeaderMap,
) -> axum::http::response::Builder {
    let mut builder = builder;
    for (key, value) in headers.iter() {
        if is_hop_by_hop(key.as_str()) {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_bytes());
    }
    builder
}

/// Buffer the whole upstream response and mirror it to the client
async fn mirror_buffered(response: reqwest::Response) -> Result<Response<Body>, GatewayError> {
    let status = response.status().as_u16();
    let resp_headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::upstream(format!("Failed to read upstream response: {}", e)))?;

    copy_response_headers(Response::builder().status(status), &resp_headers)
        .body(Body::from(body))
        .map_err(|e| GatewayError::internal(format!("Failed to build response: {}", e)))
}

/// Relay a response for an untranslated request: gate SSE streams when the
/// client asked to stream, otherwise mirror.
async fn relay_response(
    response: reqwest::Response,
    is_stream: bool,
) -> Result<Response<Body>, GatewayError> {
    if is_stream && sse::is_sse_content_type(content_type_of(response.headers())) {
        stream_gated(response).await
    } else {
        mirror_buffered(response).await
    }
}

/// Relay a buffered response, translating it back to the client dialect
/// when the request was translated across dialects.
async fn relay_translated(
    response: reqwest::Response,
    translate: bool,
    upstream_dialect: &'static dyn FormatAdapter,
    client_dialect: &'static dyn FormatAdapter,
) -> Result<Response<Body>, GatewayError> {
    let status = response.status();
    let resp_headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::upstream(format!("Failed to read upstream response: {}", e)))?;

    if !translate || !status.is_success() {
        return copy_response_headers(Response::builder().status(status.as_u16()), &resp_headers)
            .body(Body::from(body))
            .map_err(|e| GatewayError::internal(format!("Failed to build response: {}", e)));
    }

    let translated = translate_response_body(&body, upstream_dialect, client_dialect)
        .map_err(|e| GatewayError::response_transform(format!("{:#}", e)))?;

    tracing::debug!(
        "Translated response {} -> {}",
        upstream_dialect.name(),
        client_dialect.name()
    );

    // Re-emitted body, fresh content-type; the rest of the upstream headers
    // pass through
    let mut builder = Response::builder().status(status.as_u16());
    for (key, value) in resp_headers.iter() {
        if is_hop_by_hop(key.as_str()) || key.as_str() == "content-type" {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_bytes());
    }
    builder
        .header("content-type", "application/json")
        .body(Body::from(translated))
        .map_err(|e| GatewayError::internal(format!("Failed to build response: {}", e)))
}

fn translate_response_body(
    body: &[u8],
    upstream_dialect: &dyn FormatAdapter,
    client_dialect: &dyn FormatAdapter,
) -> anyhow::Result<Vec<u8>> {
    let parsed: Value = serde_json::from_slice(body)?;
    let object = parsed
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("upstream response is not a JSON object"))?;
    let neutral = upstream_dialect.response_to_neutral(object)?;
    let rendered = client_dialect.neutral_to_response(&neutral)?;
    Ok(serde_json::to_vec(&Value::Object(rendered))?)
}

/// Gate an SSE response on the stream validator.
///
/// Bytes buffer until commitment; an upstream close before commitment is a
/// 502 with the accumulated text. After commitment the buffer flushes and
/// live frames follow verbatim; a late upstream error becomes a terminal
/// `event: error` frame.
async fn stream_gated(response: reqwest::Response) -> Result<Response<Body>, GatewayError> {
    let status = response.status().as_u16();
    let resp_headers = response.headers().clone();
    let mut byte_stream = Box::pin(response.bytes_stream());

    let mut checker = StreamChecker::new();
    let mut buffered: Vec<Bytes> = Vec::new();

    let committed = loop {
        match byte_stream.next().await {
            Some(Ok(chunk)) => {
                let committed = checker.check_chunk(&chunk);
                buffered.push(chunk);
                if committed {
                    break true;
                }
            }
            Some(Err(e)) => {
                return Err(GatewayError::upstream(format!(
                    "Upstream stream failed before any content: {}",
                    e
                )));
            }
            None => break false,
        }
    };

    if !committed {
        tracing::warn!("Upstream stream closed without content; returning 502");
        return Err(GatewayError::stream_empty(checker.accumulated_text()));
    }

    // Flush the held-back bytes, then pass frames through. After the first
    // live error the stream emits one error frame and terminates.
    let head = futures::stream::iter(buffered.into_iter().map(Ok::<Bytes, Infallible>));
    let tail = byte_stream.scan(false, |errored, item| {
        if *errored {
            return future::ready(None);
        }
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                *errored = true;
                tracing::error!("Upstream stream failed mid-flight: {}", e);
                let frame = json!({
                    "error": {
                        "code": "UPSTREAM_ERROR",
                        "message": format!("Upstream stream failed: {}", e),
                        "type": "upstream_error",
                    }
                });
                Bytes::from(format!("event: error\ndata: {}\n\n", frame))
            }
        };
        future::ready(Some(Ok::<Bytes, Infallible>(chunk)))
    });

    copy_response_headers(Response::builder().status(status), &resp_headers)
        .body(Body::from_stream(head.chain(tail)))
        .map_err(|e| GatewayError::internal(format!("Failed to build response: {}", e)))
}
