//! hudsucker glue for the filtering pipeline.
//!
//! hudsucker clones the handler for every request and calls
//! `handle_request` and `handle_response` on the same clone, so the flow
//! for the in-flight request lives in a plain field.

use std::sync::Arc;

use hudsucker::{
    hyper::{Request, Response},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};

use crate::pipeline::{FilterPipeline, Flow};
use crate::service::FilterService;

/// HTTP handler for the intercepting proxy.
#[derive(Clone, Debug)]
pub struct ProxyHandler {
    pipeline: FilterPipeline,
    flow: Option<Flow>,
}

impl ProxyHandler {
    /// Creates a handler over a shared service.
    pub fn new(service: Arc<FilterService>) -> Self {
        Self {
            pipeline: FilterPipeline::new(service),
            flow: None,
        }
    }

    /// Returns the pipeline this handler drives.
    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }
}

impl HttpHandler for ProxyHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        let (outcome, flow) = self.pipeline.on_request(req);
        self.flow = flow;
        outcome
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.pipeline.on_response(self.flow.take(), res).await
    }
}
