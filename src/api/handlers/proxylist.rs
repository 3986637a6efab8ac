//! `/proxylist` endpoint

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::api::server::AppState;
use crate::error::PoolError;
use crate::models::ALL_TARGET;

/// Raw request parameters; validated by hand so bad values get a JSON failure body
#[derive(Debug, Default, Deserialize)]
pub struct ProxyListParams {
    pub target: Option<String>,
    pub num: Option<String>,
    pub delay: Option<String>,
}

impl ProxyListParams {
    /// Fields from an urlencoded form body override the query string
    fn merge_form(&mut self, body: &str) {
        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "target" => self.target = value,
                "num" => self.num = value,
                "delay" => self.delay = value,
                _ => {}
            }
        }
    }

    /// The target as the caller named it; echoed back even when resolution falls back
    fn target(&self) -> String {
        self.target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(ALL_TARGET)
            .to_string()
    }

    fn num(&self, default: usize) -> Result<usize, PoolError> {
        match non_empty(&self.num) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| PoolError::InvalidRequest(format!("num must be a non-negative integer, got {:?}", raw))),
        }
    }

    fn delay(&self, default: f64) -> Result<f64, PoolError> {
        let delay = match non_empty(&self.delay) {
            None => default,
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| PoolError::InvalidRequest(format!("delay must be a number, got {:?}", raw)))?,
        };
        if !delay.is_finite() || delay < 0.0 {
            return Err(PoolError::InvalidRequest(format!(
                "delay must be a non-negative number, got {}",
                delay
            )));
        }
        Ok(delay)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize)]
pub struct ProxyList {
    pub num: usize,
    pub mtime: Option<i64>,
    pub target: String,
    pub proxies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ProxyListResponse {
    pub status: &'static str,
    pub proxylist: ProxyList,
}

/// GET /proxylist?target=&num=&delay=
pub async fn get_proxylist(
    State(state): State<AppState>,
    Query(params): Query<ProxyListParams>,
) -> Response {
    respond(&state, params).await
}

/// POST /proxylist, parameters in the query string and/or an urlencoded body
pub async fn post_proxylist(
    State(state): State<AppState>,
    Query(mut params): Query<ProxyListParams>,
    body: String,
) -> Response {
    params.merge_form(&body);
    respond(&state, params).await
}

async fn respond(state: &AppState, params: ProxyListParams) -> Response {
    let target = params.target();

    let result = async {
        let num = params.num(state.default_num)?;
        let delay = params.delay(state.default_delay)?;
        state.query.lookup(&target, num, delay).await
    }
    .await;

    match result {
        Ok(lookup) => {
            let selection = lookup.selection;
            let body = ProxyListResponse {
                status: selection.status().as_str(),
                proxylist: ProxyList {
                    num: selection.proxies.len(),
                    mtime: lookup.mtime,
                    target,
                    proxies: selection.proxies.iter().map(|p| p.url()).collect(),
                },
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            warn!(target = %target, error = %e, "Proxy list request failed");
            let body = json!({
                "status": "failure",
                "target": target,
                "err": e.to_string(),
            });
            (e.status_code(), Json(body)).into_response()
        }
    }
}
