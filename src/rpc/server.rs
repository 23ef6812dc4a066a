//! The thin JSON status/submission surface (SPEC_FULL.md §6): a public,
//! read-only router (`/status`, `/metrics`, `/health`, `/readiness`,
//! `/liveness`) merged with a bearer-token-gated router carrying the two
//! submission routes.
//!
//! Grounded on the donor's `rpc/server.rs` public/protected-router-merge
//! composition, trimmed to the routes this core actually owns — no
//! block/tx explorer routes, no peer or wallet routes, those are
//! non-goals here.

use crate::metrics::endpoints::metrics_router;
use crate::node::Node;
use crate::rpc::{auth, methods};
use axum::{middleware, routing::get, routing::post, Router};
use std::sync::Arc;

pub fn build(node: Arc<Node>) -> Router {
    let metrics_router = metrics_router(node.metrics.clone());

    let protected = Router::new()
        .route("/rpc/submit_tx", post(methods::submit_tx))
        .route("/rpc/submit_block", post(methods::submit_block))
        .with_state(node.clone())
        .layer(middleware::from_fn_with_state(
            Arc::new(node.config.rpc_token.clone()),
            auth::require_bearer_token,
        ));

    let public = Router::new()
        .route("/status", get(methods::status))
        .with_state(node);

    public.merge(protected).merge(metrics_router)
}
