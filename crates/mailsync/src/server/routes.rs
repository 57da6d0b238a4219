//! Request routing for the trigger endpoint

use serde::Serialize;
use serde_json::json;

use super::http::{Request, Response};
use crate::error::SyncError;
use crate::sync::SyncEngine;

/// Header carrying the calling organization
pub const ORGANIZATION_HEADER: &str = "X-Organization-Id";

/// Body of a successful `POST /sync/{accountId}`
#[derive(Debug, Serialize)]
struct SyncResponse {
    success: bool,
    synced: usize,
    errors: usize,
    total: usize,
}

/// Body of `GET /sync/{accountId}`
#[derive(Debug, Serialize)]
struct StatusResponse {
    account_id: i64,
    status: String,
    last_synced_at: Option<String>,
    has_history: bool,
    syncing: bool,
}

pub fn handle(engine: &SyncEngine, request: &Request) -> Response {
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => Response::json(200, &json!({ "ok": true })),
        ("POST", ["sync", id]) => with_account(request, id, |account_id, org| {
            trigger_sync(engine, account_id, org)
        }),
        ("GET", ["sync", id]) => with_account(request, id, |account_id, org| {
            sync_status(engine, account_id, org)
        }),
        (_, ["sync", _]) | (_, ["health"]) => Response::error(405, "Method not allowed"),
        _ => Response::error(404, "Not found"),
    }
}

/// Resolve the account ID segment and the caller's organization
fn with_account<F>(request: &Request, raw_id: &str, f: F) -> Response
where
    F: FnOnce(i64, &str) -> Response,
{
    let Some(org) = request.header(ORGANIZATION_HEADER).filter(|v| !v.is_empty()) else {
        return Response::error(401, format!("Missing {} header", ORGANIZATION_HEADER));
    };
    // A non-numeric ID can never name an account
    let Ok(account_id) = raw_id.parse::<i64>() else {
        return Response::error(404, format!("Account {} not found", raw_id));
    };
    f(account_id, org)
}

fn trigger_sync(engine: &SyncEngine, account_id: i64, org: &str) -> Response {
    match engine.sync_account(account_id, Some(org)) {
        Ok(summary) => Response::json(
            200,
            &SyncResponse {
                success: true,
                synced: summary.synced,
                errors: summary.errors,
                total: summary.total,
            },
        ),
        Err(e) => error_response(&e),
    }
}

fn sync_status(engine: &SyncEngine, account_id: i64, org: &str) -> Response {
    match engine.account(account_id, Some(org)) {
        Ok(account) => Response::json(
            200,
            &StatusResponse {
                account_id: account.id,
                status: account.status.to_string(),
                last_synced_at: account.last_synced_at.map(|t| t.to_rfc3339()),
                has_history: account.has_history(),
                syncing: engine.is_syncing(account.id),
            },
        ),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &SyncError) -> Response {
    let status = err.status_code();
    if status >= 500 {
        log::error!("Sync failed: {}", err);
    } else {
        log::info!("Sync rejected ({}): {}", status, err);
    }
    Response::error(status, err.to_string())
}
