//! Route handlers for the thin JSON status/submission surface
//! (SPEC_FULL.md §6): an `InfoApiRoute`-style `/status` payload plus the
//! two submission routes that feed C3/C5 directly, standing in for the
//! network-ingestion path this spec excludes (peer gossip is a non-goal;
//! the core still needs *some* way to receive modifiers in tests and
//! single-node operation).
//!
//! Grounded on the donor's `rpc/methods.rs::stats`/`submit_block`/
//! `submit_tx` shape, trimmed to the fields and routes this core owns.

use crate::node::Node;
use crate::tx::Transaction;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub best_header_id: Option<String>,
    pub best_header_height: Option<i64>,
    pub best_block_id: Option<String>,
    pub state_version: String,
    pub state_height: i64,
    pub mempool_size: usize,
    pub miner_state: String,
}

pub async fn status(State(node): State<Arc<Node>>) -> Json<StatusResponse> {
    let best_header = node.header_processor.best_header();
    let utxo = node.utxo.lock().await;
    Json(StatusResponse {
        best_header_id: best_header.as_ref().map(|h| h.id.to_hex()),
        best_header_height: best_header.as_ref().map(|h| h.height),
        best_block_id: node.header_processor.best_block_id().map(|id| id.to_hex()),
        state_version: utxo.version.to_hex(),
        state_height: utxo.height,
        mempool_size: node.mempool.len().await,
        miner_state: format!("{:?}", node.miner.run_state()),
    })
}

#[derive(Debug, Deserialize)]
pub struct SubmitTxRequest {
    pub transaction: Transaction,
}

#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub accepted: bool,
    pub error: Option<String>,
}

pub async fn submit_tx(State(node): State<Arc<Node>>, Json(req): Json<SubmitTxRequest>) -> (StatusCode, Json<SubmitResult>) {
    match node.submit_transaction(req.transaction).await {
        Ok(()) => (StatusCode::OK, Json(SubmitResult { accepted: true, error: None })),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, Json(SubmitResult { accepted: false, error: Some(e.to_string()) })),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitBlockRequest {
    pub header: crate::header::Header,
    pub transactions: Vec<Transaction>,
}

pub async fn submit_block(State(node): State<Arc<Node>>, Json(req): Json<SubmitBlockRequest>) -> (StatusCode, Json<SubmitResult>) {
    match node.submit_block(req.header, req.transactions).await {
        Ok(()) => (StatusCode::OK, Json(SubmitResult { accepted: true, error: None })),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, Json(SubmitResult { accepted: false, error: Some(e.to_string()) })),
    }
}
