//! Per-request and per-response filtering steps.
//!
//! The interception engine calls [`FilterPipeline::on_request`] once per
//! request and [`FilterPipeline::on_response`] once per upstream response.
//!
//! ## Architecture
//!
//! ```text
//! on_request:  assign id → track_request → decide ─┬─ blocked → 403 (tracked as complete)
//!                                                  └─ allowed → stealth headers → upstream
//!
//! on_response: security headers → HTML? ─┬─ yes → decode → rewrite → track_response
//!                                        │         (undecodable: forward as is)
//!                                        └─ no  → stream, track_response at end of body
//! ```
//!
//! Decisions are made on the decrypted inner requests; `CONNECT` tunnels
//! pass through untouched.

use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Method, Request, Response, StatusCode},
    Body, RequestOrResponse,
};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST};

use shroud_core::RequestInfo;

use crate::error::{ProxyError, Result};
use crate::headers::{apply_security_headers, apply_stealth_headers, header_map, is_html};
use crate::service::FilterService;

/// Body of the response sent for blocked requests.
pub const BLOCK_BODY: &str = "Request blocked by Shroud";

fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

/// State carried from a request to its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    /// Telemetry id.
    pub id: u64,
    /// Full request URL.
    pub url: String,
}

/// Reconstructs the absolute request URL.
///
/// Proxied requests normally carry an absolute URI; origin-form requests
/// are rebuilt from the `Host` header.
pub fn request_url(req: &Request<Body>) -> String {
    let uri = req.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }

    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("http://{}{}", host, path)
}

/// Builds the fixed response returned for blocked requests.
pub fn block_response() -> Response<Body> {
    let mut res = Response::new(bytes_to_body(Bytes::from_static(BLOCK_BODY.as_bytes())));
    *res.status_mut() = StatusCode::FORBIDDEN;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    apply_security_headers(res.headers_mut());
    res
}

fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|enc| !enc.trim().eq_ignore_ascii_case("identity"))
}

/// Filtering pipeline bound to a shared [`FilterService`].
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    service: Arc<FilterService>,
}

impl FilterPipeline {
    /// Creates a pipeline over a shared service.
    pub fn new(service: Arc<FilterService>) -> Self {
        Self { service }
    }

    /// Returns the shared service.
    pub fn service(&self) -> &Arc<FilterService> {
        &self.service
    }

    /// Handles an intercepted request.
    ///
    /// Returns either the (possibly modified) request to forward or a block
    /// response, plus the flow to hand back to [`Self::on_response`]. Blocked
    /// requests get no flow since no upstream response will follow.
    pub fn on_request(&self, mut req: Request<Body>) -> (RequestOrResponse, Option<Flow>) {
        if req.method() == Method::CONNECT {
            return (RequestOrResponse::Request(req), None);
        }

        let id = self.service.next_request_id();
        let url = request_url(&req);
        let method = req.method().as_str().to_string();
        let monitor = self.service.monitor();

        monitor.track_request(id, &url, &method);

        let blocked = self.service.is_filtering_enabled() && {
            let headers = header_map(req.headers());
            let content_type = headers.get("content-type").cloned().unwrap_or_default();
            let info = RequestInfo::new(&url, &method)
                .with_headers(&headers)
                .with_content_type(&content_type);

            let decision = self.service.engine().decide(&info);
            if decision.blocked {
                tracing::info!("Blocked request: {}", url);
                if let Some(rule) = &decision.matched_rule {
                    tracing::debug!("Blocked by rule: {}", rule.label());
                }
            }
            decision.blocked
        };

        self.service.count_request(blocked);

        if blocked {
            monitor.track_response(id, StatusCode::FORBIDDEN.as_u16(), BLOCK_BODY.len() as u64);
            return (RequestOrResponse::Response(block_response()), None);
        }

        if self.service.stealth_mode() {
            apply_stealth_headers(req.headers_mut());
        }

        (RequestOrResponse::Request(req), Some(Flow { id, url }))
    }

    /// Handles an upstream response.
    ///
    /// With no flow (tunnels, or responses the pipeline never saw a request
    /// for) only the security headers are applied. Bodies that are not
    /// rewritten are streamed through and their size is recorded once the
    /// body has been sent.
    pub async fn on_response(&self, flow: Option<Flow>, res: Response<Body>) -> Response<Body> {
        let status = res.status().as_u16();
        let rewrite = flow.is_some() && self.service.rewrites_html() && is_html(res.headers());
        let (mut parts, body) = res.into_parts();
        apply_security_headers(&mut parts.headers);

        let Some(flow) = flow else {
            return Response::from_parts(parts, body);
        };

        if !rewrite {
            let size = ResponseSize {
                service: Arc::clone(&self.service),
                id: flow.id,
                status,
                bytes: 0,
            };
            return Response::from_parts(parts, counted_body(body, size));
        }

        let raw = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!("Failed to read response body from {}: {}", flow.url, e);
                self.service.monitor().track_response(flow.id, status, 0);
                parts.headers.remove(CONTENT_LENGTH);
                return Response::from_parts(parts, Body::empty());
            }
        };

        let bytes = if has_content_encoding(&parts.headers) {
            match decode_body(&parts.headers, raw.clone()).await {
                Ok(decoded) => {
                    parts.headers.remove(CONTENT_ENCODING);
                    parts.headers.remove(CONTENT_LENGTH);
                    decoded
                }
                Err(e) => {
                    tracing::warn!("Forwarding undecoded response from {}: {}", flow.url, e);
                    self.service
                        .monitor()
                        .track_response(flow.id, status, raw.len() as u64);
                    return Response::from_parts(parts, bytes_to_body(raw));
                }
            }
        } else {
            raw
        };

        self.service
            .monitor()
            .track_response(flow.id, status, bytes.len() as u64);

        if bytes.is_empty() {
            return Response::from_parts(parts, bytes_to_body(bytes));
        }

        let rewritten = self.service.rewriter().rewrite_html(&bytes, &flow.url);
        let body = Bytes::from(rewritten.into_owned());
        parts.headers.remove(CONTENT_LENGTH);

        tracing::debug!("Rewrote HTML from {} ({} bytes)", flow.url, body.len());

        Response::from_parts(parts, bytes_to_body(body))
    }
}

/// Telemetry for a streamed response, recorded when the body is dropped.
struct ResponseSize {
    service: Arc<FilterService>,
    id: u64,
    status: u16,
    bytes: u64,
}

impl Drop for ResponseSize {
    fn drop(&mut self) {
        self.service
            .monitor()
            .track_response(self.id, self.status, self.bytes);
    }
}

/// Wraps a body so every data frame passing through adds to `size`.
fn counted_body(body: Body, mut size: ResponseSize) -> Body {
    let counted = body.map_frame(move |frame| {
        if let Some(data) = frame.data_ref() {
            size.bytes += data.len() as u64;
        }
        frame
    });
    Body::from(counted.boxed())
}

/// Decodes a buffered body according to its `Content-Encoding`.
async fn decode_body(headers: &HeaderMap, raw: Bytes) -> Result<Bytes> {
    let mut encoded = Response::new(bytes_to_body(raw));
    *encoded.headers_mut() = headers.clone();

    let decoded =
        hudsucker::decode_response(encoded).map_err(|e| ProxyError::Decode(e.to_string()))?;
    let collected = decoded
        .into_body()
        .collect()
        .await
        .map_err(|e| ProxyError::Decode(e.to_string()))?;
    Ok(collected.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::channel::Channel;
    use hyper::body::Frame;
    use shroud_core::{ContentRewriter, DecisionCache, FilterEngine, FilterRule, RuleStore};
    use std::time::Duration;

    fn service_with(rules: Vec<FilterRule>) -> Arc<FilterService> {
        let mut store = RuleStore::new();
        store.add_rules(rules);
        let engine = FilterEngine::new(store, DecisionCache::new(64, Duration::from_secs(300)));
        Arc::new(FilterService::new(engine).with_rewriter(ContentRewriter::new(
            &[".ad".to_string()],
            &["window.ga = function(){};".to_string()],
        )))
    }

    fn pipeline() -> FilterPipeline {
        FilterPipeline::new(service_with(vec![
            FilterRule::block("").with_domain("ads.example.com")
        ]))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn response(content_type: &str, body: &'static str) -> Response<Body> {
        Response::builder()
            .status(200)
            .header("content-type", content_type)
            .header("content-length", body.len())
            .body(bytes_to_body(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_string(res: Response<Body>) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ==================== Requests ====================

    #[test]
    fn blocked_request_gets_403() {
        let pipeline = pipeline();
        let (outcome, flow) = pipeline.on_request(get("http://ads.example.com/banner.js"));
        assert!(flow.is_none());

        let RequestOrResponse::Response(res) = outcome else {
            panic!("expected block response");
        };
        assert_eq!(res.status(), 403);
        assert_eq!(res.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(tokio_test::block_on(body_string(res)), BLOCK_BODY);

        let stats = pipeline.service().stats();
        assert_eq!(stats.filtering.total_requests, 1);
        assert_eq!(stats.filtering.blocked_requests, 1);
        assert_eq!(stats.network.completed_requests, 1);
        assert_eq!(stats.network.total_bytes_transferred, BLOCK_BODY.len() as u64);
    }

    #[test]
    fn blocked_request_headers_are_not_touched() {
        let pipeline = pipeline();
        let mut req = get("http://ads.example.com/");
        req.headers_mut()
            .insert("via", HeaderValue::from_static("1.1 corp-proxy"));
        let (outcome, _) = pipeline.on_request(req);
        assert!(matches!(outcome, RequestOrResponse::Response(_)));
    }

    #[test]
    fn allowed_request_gets_stealth_headers() {
        let pipeline = pipeline();
        let mut req = get("http://news.example.com/");
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("10.1.1.1"));

        let (outcome, flow) = pipeline.on_request(req);
        let RequestOrResponse::Request(req) = outcome else {
            panic!("expected forwarded request");
        };
        assert!(req.headers().get("x-forwarded-for").is_none());
        assert_eq!(req.headers().get("dnt").unwrap(), "1");

        let flow = flow.unwrap();
        assert_eq!(flow.url, "http://news.example.com/");
        let record = pipeline.service().monitor().record(flow.id).unwrap();
        assert_eq!(record.method, "GET");
    }

    #[test]
    fn stealth_off_leaves_headers() {
        let service = Arc::new(FilterService::new(FilterEngine::new(
            RuleStore::new(),
            DecisionCache::new(8, Duration::from_secs(300)),
        ))
        .with_stealth_mode(false));
        let pipeline = FilterPipeline::new(service);

        let mut req = get("http://news.example.com/");
        req.headers_mut().insert("via", HeaderValue::from_static("1.1 x"));
        let (outcome, _) = pipeline.on_request(req);
        let RequestOrResponse::Request(req) = outcome else {
            panic!("expected forwarded request");
        };
        assert_eq!(req.headers().get("via").unwrap(), "1.1 x");
        assert!(req.headers().get("user-agent").is_none());
    }

    #[test]
    fn filtering_disabled_forwards_everything() {
        let pipeline = pipeline();
        pipeline.service().toggle_filtering(false);

        let (outcome, flow) = pipeline.on_request(get("http://ads.example.com/banner.js"));
        assert!(matches!(outcome, RequestOrResponse::Request(_)));
        assert!(flow.is_some());

        let stats = pipeline.service().stats().filtering;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.blocked_requests, 0);
    }

    #[test]
    fn connect_passes_through() {
        let pipeline = pipeline();
        let req = Request::builder()
            .method("CONNECT")
            .uri("ads.example.com:443")
            .body(Body::empty())
            .unwrap();
        let (outcome, flow) = pipeline.on_request(req);
        assert!(matches!(outcome, RequestOrResponse::Request(_)));
        assert!(flow.is_none());
        assert_eq!(pipeline.service().stats().filtering.total_requests, 0);
    }

    #[test]
    fn origin_form_url_uses_host_header() {
        let req = Request::builder()
            .uri("/path?q=1")
            .header("host", "site.example")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_url(&req), "http://site.example/path?q=1");
    }

    #[test]
    fn header_rule_sees_request_headers() {
        let pipeline = FilterPipeline::new(service_with(vec![
            FilterRule::block("collect").with_header("x-requested-with", "tracker"),
        ]));
        let mut req = get("http://site.example/collect");
        req.headers_mut()
            .insert("X-Requested-With", HeaderValue::from_static("tracker"));
        let (outcome, _) = pipeline.on_request(req);
        assert!(matches!(outcome, RequestOrResponse::Response(_)));
    }

    #[test]
    fn config_rule_header_matches_any_case() {
        let rule: FilterRule = serde_json::from_str(
            r#"{"pattern": "collect", "action": "block", "headers": {"X-Tracker": "1"}}"#,
        )
        .unwrap();
        let pipeline = FilterPipeline::new(service_with(vec![rule]));

        let mut req = get("http://site.example/collect");
        req.headers_mut()
            .insert("X-Tracker", HeaderValue::from_static("1"));
        let (outcome, _) = pipeline.on_request(req);
        assert!(matches!(outcome, RequestOrResponse::Response(_)));
    }

    // ==================== Responses ====================

    #[test]
    fn html_response_is_rewritten() {
        tokio_test::block_on(async {
            let pipeline = pipeline();
            let (_, flow) = pipeline.on_request(get("http://news.example.com/"));
            let flow = flow.unwrap();
            let id = flow.id;

            let res = pipeline
                .on_response(
                    Some(flow),
                    response("text/html; charset=utf-8", "<head></head><body></body>"),
                )
                .await;

            assert!(res.headers().get("content-length").is_none());
            assert_eq!(res.headers().get("x-frame-options").unwrap(), "DENY");

            let html = body_string(res).await;
            assert_eq!(html.matches("<style").count(), 1);
            assert_eq!(html.matches("<script").count(), 1);

            let record = pipeline.service().monitor().record(id).unwrap();
            assert_eq!(record.status_code, Some(200));
            assert_eq!(record.response_size, Some(26));
        });
    }

    #[test]
    fn non_html_response_size_recorded_after_body() {
        tokio_test::block_on(async {
            let pipeline = pipeline();
            let (_, flow) = pipeline.on_request(get("http://news.example.com/data"));
            let id = flow.as_ref().unwrap().id;

            let res = pipeline
                .on_response(flow, response("application/json", "{\"a\":1}"))
                .await;

            assert_eq!(res.headers().get("content-length").unwrap(), "7");
            assert_eq!(res.headers().get("x-content-type-options").unwrap(), "nosniff");
            assert_eq!(body_string(res).await, "{\"a\":1}");

            let record = pipeline.service().monitor().record(id).unwrap();
            assert_eq!(record.response_size, Some(7));
        });
    }

    #[test]
    fn chunked_response_size_is_counted() {
        tokio_test::block_on(async {
            let pipeline = pipeline();
            let (_, flow) = pipeline.on_request(get("http://news.example.com/stream"));
            let id = flow.as_ref().unwrap().id;

            let (mut tx, chunked) = Channel::<Bytes, hudsucker::Error>::new(4);
            tx.try_send(Frame::data(Bytes::from_static(b"abc"))).unwrap();
            tx.try_send(Frame::data(Bytes::from_static(b"defgh"))).unwrap();
            drop(tx);

            let res = Response::builder()
                .header("content-type", "application/octet-stream")
                .body(Body::from(chunked.boxed()))
                .unwrap();

            let res = pipeline.on_response(flow, res).await;
            assert!(pipeline.service().monitor().record(id).unwrap().response_size.is_none());

            assert_eq!(body_string(res).await, "abcdefgh");

            let record = pipeline.service().monitor().record(id).unwrap();
            assert_eq!(record.status_code, Some(200));
            assert_eq!(record.response_size, Some(8));
            assert_eq!(pipeline.service().stats().network.total_bytes_transferred, 8);
        });
    }

    #[test]
    fn undecodable_html_is_forwarded_unchanged() {
        tokio_test::block_on(async {
            let pipeline = pipeline();
            let (_, flow) = pipeline.on_request(get("http://news.example.com/"));
            let id = flow.as_ref().unwrap().id;

            let res = Response::builder()
                .status(200)
                .header("content-type", "text/html")
                .header("content-encoding", "x-custom")
                .header("content-length", 13)
                .body(bytes_to_body(Bytes::from_static(b"<head></head>")))
                .unwrap();

            let res = pipeline.on_response(flow, res).await;

            assert_eq!(res.status(), 200);
            assert_eq!(res.headers().get("content-encoding").unwrap(), "x-custom");
            assert_eq!(res.headers().get("content-length").unwrap(), "13");
            assert_eq!(res.headers().get("x-frame-options").unwrap(), "DENY");
            assert_eq!(body_string(res).await, "<head></head>");

            let record = pipeline.service().monitor().record(id).unwrap();
            assert_eq!(record.response_size, Some(13));
        });
    }

    #[test]
    fn html_untouched_when_filtering_disabled() {
        tokio_test::block_on(async {
            let pipeline = pipeline();
            let (_, flow) = pipeline.on_request(get("http://news.example.com/"));
            pipeline.service().toggle_filtering(false);

            let res = pipeline
                .on_response(flow, response("text/html", "<head></head>"))
                .await;
            assert_eq!(body_string(res).await, "<head></head>");
        });
    }

    #[test]
    fn response_without_flow_only_gets_security_headers() {
        tokio_test::block_on(async {
            let pipeline = pipeline();
            let res = pipeline
                .on_response(None, response("text/html", "<head></head>"))
                .await;
            assert_eq!(res.headers().get("referrer-policy").unwrap(), "strict-origin-when-cross-origin");
            assert_eq!(body_string(res).await, "<head></head>");
            assert_eq!(pipeline.service().stats().network.completed_requests, 0);
        });
    }

    #[test]
    fn non_utf8_html_is_unchanged() {
        tokio_test::block_on(async {
            let pipeline = pipeline();
            let (_, flow) = pipeline.on_request(get("http://news.example.com/"));
            let raw: &'static [u8] = &[0x3c, 0xff, 0xfe, 0x3e];
            let res = Response::builder()
                .header("content-type", "text/html")
                .body(bytes_to_body(Bytes::from_static(raw)))
                .unwrap();

            let res = pipeline.on_response(flow, res).await;
            let bytes = res.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&bytes[..], raw);
        });
    }
}
