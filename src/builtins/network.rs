// src/builtins/network.rs
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{extract, truncate_chars, Step};
use crate::core::context::ExecutionContext;
use crate::core::error::FlowError;
use crate::core::expression::display_string;
use crate::core::graph::FetchConfig;
use crate::core::resolver::{resolve_string, resolve_template};
use crate::services::config::HttpConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Json(Value),
}

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub proxy: Option<String>,
}

impl FetchRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    /// Lower-cased header names; repeated headers are joined with ", ".
    pub headers: Map<String, Value>,
    pub body: String,
    pub url: String,
}

/// Outbound HTTP. Any status code is a response; only transport-level
/// failures are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FlowError>;
}

/// `reqwest` backed transport. A client is built per request because timeout,
/// redirect policy and proxy are per-node settings.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport;

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FlowError> {
        let policy = if request.max_redirects == 0 {
            Policy::none()
        } else {
            Policy::limited(request.max_redirects)
        };

        let mut builder = reqwest::Client::builder()
            .timeout(request.timeout)
            .redirect(policy);

        if let Some(proxy) = &request.proxy {
            match reqwest::Proxy::all(proxy.as_str()) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => warn!("Ignoring invalid proxy '{}': {}", proxy, e),
            }
        }

        let client = builder.build()?;
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            FlowError::Config(format!("Invalid HTTP method '{}'", request.method))
        })?;

        let mut rb = client.request(method, &request.url);
        for (name, value) in &request.headers {
            rb = rb.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            rb = rb.query(&request.params);
        }
        match &request.body {
            Some(RequestBody::Text(text)) => rb = rb.body(text.clone()),
            Some(RequestBody::Json(value)) => rb = rb.json(value),
            None => {}
        }

        let resp = rb.send().await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();

        let mut headers = Map::new();
        for (name, value) in resp.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match headers.get_mut(name.as_str()) {
                Some(Value::String(existing)) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                _ => {
                    headers.insert(name.as_str().to_string(), Value::String(value));
                }
            }
        }

        let body = resp.text().await?;
        debug!("{} {} -> {} ({} bytes)", request.method, url, status, body.len());

        Ok(FetchResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

/// Identity for the next request: node setting, then the last rotated one,
/// then the configured default.
pub fn pick_user_agent(cfg: &FetchConfig, ctx: &ExecutionContext, http: &HttpConfig) -> String {
    if let Some(ua) = cfg.user_agent.as_deref().filter(|s| !s.is_empty()) {
        return ua.to_string();
    }
    if let Some(ua) = ctx.get("__currentUA").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return ua.to_string();
    }
    http.user_agent.clone()
}

/// Resolves a fetch node's configuration into a request. `None` when the URL
/// resolves to nothing.
pub fn build_request(
    cfg: &FetchConfig,
    ctx: &ExecutionContext,
    http: &HttpConfig,
) -> Option<FetchRequest> {
    let vars = &ctx.variables;
    let url = resolve_string(cfg.url.as_deref().unwrap_or(""), vars);
    if url.trim().is_empty() {
        return None;
    }

    let mut headers = vec![
        ("User-Agent".to_string(), pick_user_agent(cfg, ctx, http)),
        ("Accept".to_string(), http.accept.clone()),
        ("Accept-Language".to_string(), http.accept_language.clone()),
    ];
    for (name, value) in cfg.headers.iter().flatten() {
        let Some(value) = config_text(value, vars) else {
            continue;
        };
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value));
    }

    let has_cookie = headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("cookie"));
    if !has_cookie {
        if let Some(cookie) = cookie_header(ctx.get("__cookies")) {
            headers.push(("Cookie".to_string(), cookie));
        }
    }

    let params = cfg
        .params
        .iter()
        .flatten()
        .filter_map(|(name, value)| config_text(value, vars).map(|v| (name.clone(), v)))
        .collect();

    let body = match &cfg.body {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => match resolve_template(raw, vars) {
            Value::Null => None,
            Value::String(text) => Some(RequestBody::Text(text)),
            other => Some(RequestBody::Json(other)),
        },
        Some(other) => Some(RequestBody::Json(other.clone())),
    };

    let proxy = cfg
        .proxy
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Some(FetchRequest {
        method: cfg.method(),
        url,
        headers,
        params,
        body,
        timeout: Duration::from_millis(cfg.timeout_ms(http.timeout_ms)),
        max_redirects: cfg.max_redirects(),
        proxy,
    })
}

/// Runs a fetch node: resolve, send with retries, store `resp`.
pub async fn run_fetch(
    transport: &dyn HttpTransport,
    http: &HttpConfig,
    cfg: &FetchConfig,
    node_id: &str,
    ctx: &mut ExecutionContext,
) -> Step {
    let node = Some(node_id);
    let Some(request) = build_request(cfg, ctx, http) else {
        ctx.error("Fetch node: URL is empty", node);
        return Step::Halt;
    };

    let via = if request.proxy.is_some() { " (via proxy)" } else { "" };
    ctx.info(format!("Fetching: {} {}{}", request.method, request.url, via), node);

    let user_agent = request.header("User-Agent").unwrap_or_default().to_string();
    let retries = cfg.retries();
    let retry_delay = Duration::from_millis(cfg.retry_delay_ms());
    let mut last_error = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            ctx.info(format!("Retry attempt {}/{}...", attempt, retries), node);
            tokio::time::sleep(retry_delay).await;
        }

        match transport.send(&request).await {
            Ok(resp) => {
                let status = resp.status;
                ctx.set("resp", response_record(&request.url, resp));
                ctx.info(
                    format!(
                        "Fetched successfully (status: {}, UA: {}...)",
                        status,
                        truncate_chars(&user_agent, 40)
                    ),
                    node,
                );
                return Step::Continue;
            }
            Err(e) => {
                ctx.warn(format!("Fetch attempt {} failed: {}", attempt + 1, e), node);
                last_error = Some(e);
            }
        }
    }

    let err = last_error.unwrap_or_else(|| FlowError::Transport("no attempt was made".into()));
    ctx.error(
        format!("Fetch failed after {} attempt(s): {}", retries + 1, err),
        node,
    );
    ctx.set_exception(&err);
    Step::Halt
}

/// The `resp` variable. The document itself is re-parsed from `html` on demand.
pub fn response_record(requested_url: &str, resp: FetchResponse) -> Value {
    let parsed = serde_json::from_str::<Value>(&resp.body).unwrap_or(Value::Null);
    let title = extract::document_title(&resp.body);
    json!({
        "html": resp.body,
        "json": parsed,
        "statusCode": resp.status,
        "headers": resp.headers,
        "url": requested_url,
        "finalUrl": resp.url,
        "title": title,
    })
}

fn config_text(value: &Value, vars: &Map<String, Value>) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(raw) => Some(resolve_string(raw, vars)),
        other => Some(display_string(other)),
    }
}

fn cookie_header(cookies: Option<&Value>) -> Option<String> {
    let jar = cookies?.as_object()?;
    if jar.is_empty() {
        return None;
    }
    let pairs: Vec<String> = jar
        .iter()
        .map(|(k, v)| {
            let value = v.as_str().map(str::to_string).unwrap_or_else(|| display_string(v));
            format!("{}={}", k, value)
        })
        .collect();
    Some(pairs.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::NodeKind;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Records every request; fails the first `failures` calls.
    struct ScriptedTransport {
        failures: usize,
        body: String,
        calls: Mutex<Vec<(FetchRequest, Instant)>>,
    }

    impl ScriptedTransport {
        fn new(failures: usize, body: &str) -> Arc<Self> {
            Arc::new(Self {
                failures,
                body: body.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FlowError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((request.clone(), Instant::now()));
            if calls.len() <= self.failures {
                return Err(FlowError::Transport("connection reset".into()));
            }
            Ok(FetchResponse {
                status: 404,
                headers: Map::new(),
                body: self.body.clone(),
                url: request.url.clone(),
            })
        }
    }

    fn fetch_config(data: Value) -> FetchConfig {
        match NodeKind::from_raw("fetch", &data) {
            NodeKind::Fetch(cfg) => cfg,
            other => panic!("expected fetch config, got {:?}", other),
        }
    }

    #[test]
    fn test_user_agent_priority() {
        let http = HttpConfig::default();
        let mut ctx = ExecutionContext::with_seed(1);
        let plain = fetch_config(json!({ "url": "https://a.test" }));
        assert_eq!(pick_user_agent(&plain, &ctx, &http), http.user_agent);

        ctx.set("__currentUA", json!("Rotated/1.0"));
        assert_eq!(pick_user_agent(&plain, &ctx, &http), "Rotated/1.0");

        let explicit = fetch_config(json!(
            { "url": "https://a.test", "userAgent": "Explicit/2.0" }
        ));
        assert_eq!(pick_user_agent(&explicit, &ctx, &http), "Explicit/2.0");
    }

    #[test]
    fn test_build_request_resolves_templates() {
        let http = HttpConfig::default();
        let mut ctx = ExecutionContext::with_seed(1);
        ctx.set("page", json!(3));
        ctx.set("token", json!("abc"));
        ctx.set("__cookies", json!({ "sid": "42", "lang": "en" }));

        let cfg = fetch_config(json!({
            "url": "https://a.test/list?page=${page}",
            "method": "post",
            "headers": { "Authorization": "Bearer ${token}", "accept": "application/json" },
            "params": { "q": "${page + 1}", "skip": null },
            "body": { "raw": true },
            "timeout": 2500,
            "proxy": " http://127.0.0.1:8080 "
        }));
        let request = build_request(&cfg, &ctx, &http).unwrap();

        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "https://a.test/list?page=3");
        assert_eq!(request.header("authorization"), Some("Bearer abc"));
        assert_eq!(request.header("Accept"), Some("application/json"));
        assert_eq!(request.header("Cookie"), Some("lang=en; sid=42"));
        assert_eq!(request.params, vec![("q".to_string(), "4".to_string())]);
        assert_eq!(request.body, Some(RequestBody::Json(json!({ "raw": true }))));
        assert_eq!(request.timeout, Duration::from_millis(2500));
        assert_eq!(request.max_redirects, 5);
        assert_eq!(request.proxy.as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[test]
    fn test_explicit_cookie_header_wins() {
        let http = HttpConfig::default();
        let mut ctx = ExecutionContext::with_seed(1);
        ctx.set("__cookies", json!({ "sid": "42" }));
        let cfg = fetch_config(json!(
            { "url": "https://a.test", "headers": { "Cookie": "mine=1" } }
        ));
        let request = build_request(&cfg, &ctx, &http).unwrap();
        assert_eq!(request.header("cookie"), Some("mine=1"));
        let cookies = request
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .count();
        assert_eq!(cookies, 1);
    }

    #[tokio::test]
    async fn test_empty_url_halts() {
        let transport = ScriptedTransport::new(0, "");
        let mut ctx = ExecutionContext::with_seed(1);
        let cfg = fetch_config(json!({ "url": "${missing}" }));

        let step =
            run_fetch(transport.as_ref(), &HttpConfig::default(), &cfg, "f1", &mut ctx).await;
        assert_eq!(step, Step::Halt);
        assert!(transport.calls.lock().unwrap().is_empty());
        assert_eq!(ctx.logs().last().unwrap().message, "Fetch node: URL is empty");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_spaced_and_exhausted() {
        let transport = ScriptedTransport::new(usize::MAX, "");
        let mut ctx = ExecutionContext::with_seed(1);
        let cfg = fetch_config(json!({ "url": "https://a.test", "retries": 2, "retryDelay": 500 }));

        let step =
            run_fetch(transport.as_ref(), &HttpConfig::default(), &cfg, "f1", &mut ctx).await;
        assert_eq!(step, Step::Halt);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(500));
        assert!(calls[2].1 - calls[1].1 >= Duration::from_millis(500));

        assert_eq!(ctx.get("ex").unwrap()["kind"], "transport");
        assert!(ctx.get("resp").is_none());
        assert_eq!(
            ctx.logs().last().unwrap().message,
            "Fetch failed after 3 attempt(s): connection reset"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_stores_response() {
        let body = r#"<html><head><title> Hello </title></head><body>x</body></html>"#;
        let transport = ScriptedTransport::new(1, body);
        let mut ctx = ExecutionContext::with_seed(1);
        let cfg = fetch_config(json!({ "url": "https://a.test", "retries": 1 }));

        let step =
            run_fetch(transport.as_ref(), &HttpConfig::default(), &cfg, "f1", &mut ctx).await;
        assert_eq!(step, Step::Continue);

        let resp = ctx.get("resp").unwrap();
        assert_eq!(resp["statusCode"], 404);
        assert_eq!(resp["title"], " Hello ");
        assert_eq!(resp["json"], Value::Null);
        assert_eq!(resp["url"], "https://a.test");
        assert_eq!(
            ctx.logs().last().unwrap().message,
            "Fetched successfully (status: 404, UA: Mozilla/5.0 (Windows NT 10.0; Win64; x64...)"
        );
    }
}
