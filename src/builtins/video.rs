// src/builtins/video.rs
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use super::extract::parse_selector;
use super::{truncate_chars, Step};
use crate::core::context::ExecutionContext;
use crate::core::error::FlowError;
use crate::core::graph::VideoExtractConfig;

lazy_static! {
    static ref M3U8_RE: Regex = Regex::new(r#"(?i)https?://[^"'\s]+\.m3u8[^"'\s]*"#).unwrap();
    static ref MP4_RE: Regex = Regex::new(r#"(?i)https?://[^"'\s]+\.mp4[^"'\s]*"#).unwrap();
    static ref M3U8_SELECTOR: Selector =
        Selector::parse(r#"source[src*=".m3u8"], video[src*=".m3u8"]"#).unwrap();
    static ref MP4_SELECTOR: Selector =
        Selector::parse(r#"source[src*=".mp4"], video[src*=".mp4"]"#).unwrap();
    static ref IFRAME_SELECTOR: Selector = Selector::parse("iframe[src]").unwrap();
}

const PLAYER_HOSTS: [&str; 4] = ["youtube", "vimeo", "bilibili", "player"];

/// Ordered, de-duplicated link collection.
#[derive(Default)]
struct Links(Vec<String>);

impl Links {
    fn push(&mut self, link: &str) {
        if !link.is_empty() && !self.0.iter().any(|l| l == link) {
            self.0.push(link.to_string());
        }
    }
}

fn scan_media(html: &str, doc: &Html, pattern: &Regex, selector: &Selector, links: &mut Links) {
    for m in pattern.find_iter(html) {
        links.push(m.as_str());
    }
    for el in doc.select(selector) {
        let attrs = el.value();
        if let Some(src) = attrs.attr("src").or_else(|| attrs.attr("data-src")) {
            links.push(src);
        }
    }
}

/// Media URLs found in `html`, in discovery order.
///
/// `extract_type` is `auto`, `m3u8`, `mp4` or `iframe`; custom selectors are
/// always applied and read `src`, then `data-src`, then `href`.
pub fn find_video_links(
    html: &str,
    extract_type: &str,
    custom_selectors: &[String],
) -> Result<Vec<String>, FlowError> {
    let custom = custom_selectors
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_selector(s))
        .collect::<Result<Vec<_>, _>>()?;

    let doc = Html::parse_document(html);
    let mut links = Links::default();
    let auto = extract_type == "auto";

    if auto || extract_type == "m3u8" {
        scan_media(html, &doc, &M3U8_RE, &M3U8_SELECTOR, &mut links);
    }
    if auto || extract_type == "mp4" {
        scan_media(html, &doc, &MP4_RE, &MP4_SELECTOR, &mut links);
    }
    if auto || extract_type == "iframe" {
        for el in doc.select(&IFRAME_SELECTOR) {
            let src = el.value().attr("src").unwrap_or_default();
            if PLAYER_HOSTS.iter().any(|host| src.contains(host)) {
                links.push(src);
            }
        }
    }

    for selector in &custom {
        for el in doc.select(selector) {
            let attrs = el.value();
            let src = attrs
                .attr("src")
                .filter(|s| !s.is_empty())
                .or_else(|| attrs.attr("data-src").filter(|s| !s.is_empty()))
                .or_else(|| attrs.attr("href"))
                .unwrap_or_default();
            links.push(src);
        }
    }

    Ok(links.0)
}

pub fn run_video_extract(
    cfg: &VideoExtractConfig,
    node_id: &str,
    ctx: &mut ExecutionContext,
) -> Step {
    let node = Some(node_id);
    let html = match ctx.get("resp") {
        None | Some(Value::Null) => {
            ctx.error("Video extract node: No response available", node);
            return Step::Halt;
        }
        Some(resp) => resp
            .get("html")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };

    let extract_type = cfg.extract_type();
    ctx.info(format!("Extracting video links (type: {})", extract_type), node);

    match find_video_links(&html, extract_type, &cfg.selectors) {
        Ok(links) => {
            let output_var = cfg.output_var();
            let value = if links.len() == 1 {
                Value::String(links[0].clone())
            } else {
                Value::from(links.clone())
            };
            ctx.set(output_var, value);
            ctx.info(
                format!("Found {} video link(s) in variable \"{}\"", links.len(), output_var),
                node,
            );
            for (i, link) in links.iter().enumerate() {
                ctx.info(format!("  Video {}: {}", i + 1, truncate_chars(link, 80)), node);
            }
            Step::Continue
        }
        Err(e) => {
            ctx.error(format!("Video extract failed: {}", e), node);
            ctx.set_exception(&e);
            Step::Halt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"
        <html><body>
          <script>var src = "https://cdn.test/live/index.M3U8?token=1";</script>
          <video data-src="/local.m3u8" src="https://cdn.test/a.m3u8"></video>
          <source src="https://cdn.test/clip.mp4">
          <p>also https://cdn.test/clip.mp4 in text</p>
          <iframe src="https://www.youtube.com/embed/xyz"></iframe>
          <iframe src="https://ads.test/banner"></iframe>
          <a class="dl" href="https://files.test/movie.mkv">download</a>
        </body></html>"#;

    #[test]
    fn test_auto_collects_everything_once() {
        let links = find_video_links(PAGE, "auto", &[]).unwrap();
        assert_eq!(
            links,
            vec![
                "https://cdn.test/live/index.M3U8?token=1",
                "https://cdn.test/a.m3u8",
                "https://cdn.test/clip.mp4",
                "https://www.youtube.com/embed/xyz",
            ]
        );
    }

    #[test]
    fn test_type_filter_and_custom_selectors() {
        assert_eq!(
            find_video_links(PAGE, "iframe", &[]).unwrap(),
            vec!["https://www.youtube.com/embed/xyz"]
        );
        assert_eq!(
            find_video_links(PAGE, "iframe", &["a.dl".to_string()]).unwrap(),
            vec!["https://www.youtube.com/embed/xyz", "https://files.test/movie.mkv"]
        );
        assert!(find_video_links(PAGE, "m3u8", &["a[[".to_string()]).is_err());
    }

    #[test]
    fn test_single_link_is_stored_as_string() {
        let mut ctx = ExecutionContext::with_seed(1);
        ctx.set("resp", json!({ "html": PAGE }));
        let cfg = VideoExtractConfig {
            extract_type: Some("iframe".into()),
            ..Default::default()
        };
        assert_eq!(run_video_extract(&cfg, "v1", &mut ctx), Step::Continue);
        assert_eq!(ctx.get("videoUrl").unwrap(), &json!("https://www.youtube.com/embed/xyz"));

        let cfg = VideoExtractConfig {
            extract_type: Some("mp4".into()),
            output_var: Some("clips".into()),
            ..Default::default()
        };
        ctx.set("resp", json!({ "html": "<p>nothing</p>" }));
        run_video_extract(&cfg, "v2", &mut ctx);
        assert_eq!(ctx.get("clips").unwrap(), &json!([]));
        assert_eq!(
            ctx.logs().last().unwrap().message,
            "Found 0 video link(s) in variable \"clips\""
        );
    }

    #[test]
    fn test_missing_response_halts() {
        let mut ctx = ExecutionContext::with_seed(1);
        let step = run_video_extract(&VideoExtractConfig::default(), "v1", &mut ctx);
        assert_eq!(step, Step::Halt);
    }
}
