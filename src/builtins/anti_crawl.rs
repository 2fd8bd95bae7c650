// src/builtins/anti_crawl.rs
use rand::seq::IndexedRandom;
use rand::Rng;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{truncate_chars, Step};
use crate::core::context::ExecutionContext;
use crate::core::graph::AntiCrawlConfig;

pub const DEFAULT_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Merges a `k=v; k2=v2` string into `jar`. Pairs without a key are dropped.
pub fn parse_cookies(raw: &str, jar: &mut Map<String, Value>) {
    for pair in raw.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next().unwrap_or_default().trim();
        if key.is_empty() {
            continue;
        }
        let value = parts.next().unwrap_or_default().trim();
        jar.insert(key.to_string(), Value::String(value.to_string()));
    }
}

/// Applies the configured tactic. Never halts the path.
pub async fn run_anti_crawl(
    cfg: &AntiCrawlConfig,
    node_id: &str,
    ctx: &mut ExecutionContext,
) -> Step {
    let node = Some(node_id);
    let strategy = cfg.strategy();

    if matches!(strategy, "delay" | "combined") {
        let (min, max) = cfg.delay_range();
        let delay = ctx.rng().random_range(min..=max);
        ctx.info(
            format!("Anti-crawl: Random delay {}ms ({}-{}ms)", delay, min, max),
            node,
        );
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if matches!(strategy, "rotate_ua" | "combined") {
        let configured: Vec<&str> = cfg
            .user_agents
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|ua| !ua.is_empty())
            .collect();
        let pool: &[&str] = if configured.is_empty() {
            &DEFAULT_USER_AGENTS
        } else {
            &configured
        };
        if let Some(ua) = pool.choose(ctx.rng()).map(|ua| ua.to_string()) {
            ctx.info(
                format!("Anti-crawl: Rotated UA to: {}...", truncate_chars(&ua, 60)),
                node,
            );
            ctx.set("__currentUA", Value::String(ua));
        }
    }

    if strategy == "cookie" {
        match cfg.cookie_str.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let mut jar = match ctx.get("__cookies") {
                    Some(Value::Object(existing)) => existing.clone(),
                    _ => Map::new(),
                };
                parse_cookies(raw, &mut jar);
                let count = jar.len();
                ctx.set("__cookies", Value::Object(jar));
                ctx.info(format!("Anti-crawl: Injected {} cookies", count), node);
            }
            None => debug!("anti_crawl {}: cookie strategy without cookieStr", node_id),
        }
    }

    Step::Continue
}
