//! REST API for a ledgerline node
//!
//! Routes:
//! - `POST /transactions/new`: submit a signed, mined transaction
//! - `GET /mine`: mint the mining reward into the node's chain
//! - `GET /chain?pk=`: an account's chain, the node's own when `pk` is absent
//! - `POST /nodes/register`: add reconciliation peers
//! - `GET /nodes/resolve?pk=`: run the longest-valid-chain rule
//! - `GET /health`

use axum::{
    extract::{Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::ledger::TransferReceipt;
use crate::node::{Node, NodeState};
use crate::sync::PeerChain;
use crate::transaction::Transaction;

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Ledger(ChainError),
    InvalidInput(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(e) => {
                let status = match &e {
                    ChainError::MalformedInput(_)
                    | ChainError::CryptoFailure(_)
                    | ChainError::VerificationFailed(_)
                    | ChainError::PeerDataInvalid { .. } => StatusCode::BAD_REQUEST,
                    ChainError::MiningCancelled => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Ledger(err)
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub pk: Option<String>,
}

impl AccountQuery {
    fn key(self) -> Option<Vec<u8>> {
        self.pk
            .map(|pk| pk.trim().to_string())
            .filter(|pk| !pk.is_empty())
            .map(String::into_bytes)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodesRequest {
    pub nodes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterNodesResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub message: String,
    pub replaced: bool,
    pub chain: Vec<Block>,
}

pub const AUTHORITATIVE_MESSAGE: &str = "Our chain is authoritative";
pub const REPLACED_MESSAGE: &str = "Our chain was replaced";

// ============================================================================
// Middleware
// ============================================================================

async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    Router::new()
        .route("/transactions/new", post(submit_transaction))
        .route("/mine", get(mine))
        .route("/chain", get(get_chain))
        .route("/nodes/register", post(register_nodes))
        .route("/nodes/resolve", get(resolve_conflicts))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node)
        .layer(cors)
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let state = node.state().await;
    let status = match state {
        NodeState::Ready => StatusCode::OK,
        NodeState::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    let label = if status == StatusCode::OK {
        "healthy"
    } else {
        "unhealthy"
    };
    (
        status,
        Json(serde_json::json!({
            "status": label,
            "node_state": state,
            "node": String::from_utf8_lossy(node.public_key()),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn submit_transaction(
    State(node): State<Arc<Node>>,
    Json(tx): Json<Transaction>,
) -> Result<(StatusCode, Json<TransferReceipt>), ApiError> {
    let receipt = node.submit_transaction(tx).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn mine(State(node): State<Arc<Node>>) -> Result<Json<Block>, ApiError> {
    Ok(Json(node.mine().await?))
}

async fn get_chain(
    State(node): State<Arc<Node>>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<PeerChain>, ApiError> {
    let chain = node.chain(query.key()).await?;
    Ok(Json(PeerChain::from(&chain)))
}

async fn register_nodes(
    State(node): State<Arc<Node>>,
    Json(request): Json<RegisterNodesRequest>,
) -> Result<(StatusCode, Json<RegisterNodesResponse>), ApiError> {
    if request.nodes.is_empty() {
        return Err(ApiError::InvalidInput(
            "Please supply a valid list of nodes".to_string(),
        ));
    }
    let total_nodes = node.register_peers(&request.nodes).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterNodesResponse {
            message: "New nodes have been added".to_string(),
            total_nodes,
        }),
    ))
}

async fn resolve_conflicts(
    State(node): State<Arc<Node>>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let resolution = node.resolve(query.key()).await?;
    let message = if resolution.replaced {
        REPLACED_MESSAGE
    } else {
        AUTHORITATIVE_MESSAGE
    };
    Ok(Json(ResolveResponse {
        message: message.to_string(),
        replaced: resolution.replaced,
        chain: resolution.chain.blocks,
    }))
}
