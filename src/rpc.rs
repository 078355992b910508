// 🌐 Range-Query RPC - paginated walk of a fixed state trie snapshot
// Narrow port (`RangeQuery`) + blocking HTTP JSON-RPC implementation.
//
// Error model:
//   Transport (timeout, connection) → retried with bounded backoff
//   Protocol  (RPC error, malformed result) → fatal, checkpoint preserved

use crate::config::RetryPolicy;
use log::{debug, warn};
use primitive_types::U256;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::thread;

/// Range-query method walking account state at a fixed block
const RANGE_QUERY_METHOD: &str = "debug_accountRange";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Timeout or connection failure; retried up to the policy's cap
    #[error("transport failure talking to node: {0}")]
    Transport(String),

    /// Error response or malformed result from the node; never retried
    #[error("protocol error from node: {0}")]
    Protocol(String),
}

// ============================================================================
// PAGE TYPES
// ============================================================================

/// One page of the state-trie walk
#[derive(Debug, Clone)]
pub struct AccountPage {
    /// (lowercase address, balance in wei) pairs
    pub accounts: Vec<(String, U256)>,
    /// Cursor for the next page; `None` once the trie is exhausted
    pub next: Option<String>,
}

/// Port for paginated state-range queries against one immutable snapshot
pub trait RangeQuery {
    fn fetch_page(&self, cursor: &str, page_size: usize) -> Result<AccountPage, RpcError>;
}

// ============================================================================
// JSON-RPC WIRE TYPES
// ============================================================================

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'static str,
    params: (&'a str, &'a str, usize, bool, bool),
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<RangeResult>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RangeResult {
    #[serde(default)]
    accounts: BTreeMap<String, AccountEntry>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct AccountEntry {
    balance: serde_json::Value,
}

/// Accept decimal-string, 0x-hex-string, or native-integer balance encodings.
///
/// Native integers are only trusted up to `u64::MAX`: anything larger has
/// already been routed through `f64` by the JSON parser and lost precision,
/// so it is rejected as a protocol error rather than staged with a mangled
/// amount. Nodes encode real wei balances (~10^21 and beyond) as strings.
fn normalize_balance(raw: &serde_json::Value) -> Result<U256, RpcError> {
    match raw {
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16)
                    .map_err(|e| RpcError::Protocol(format!("bad hex balance {:?}: {}", s, e)))
            } else {
                U256::from_dec_str(s)
                    .map_err(|e| RpcError::Protocol(format!("bad decimal balance {:?}: {}", s, e)))
            }
        }
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| RpcError::Protocol(format!("non-integer balance {}", n))),
        other => Err(RpcError::Protocol(format!(
            "unsupported balance encoding: {}",
            other
        ))),
    }
}

/// Empty or "0x" means the walk is done
fn end_of_trie(next: &Option<String>) -> bool {
    match next.as_deref() {
        None | Some("") | Some("0x") => true,
        Some(_) => false,
    }
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

/// Blocking JSON-RPC client with per-request timeout and capped retry
pub struct HttpRpcClient {
    client: Client,
    url: String,
    snapshot_hash: String,
    retry: RetryPolicy,
}

impl HttpRpcClient {
    pub fn new(url: &str, snapshot_hash: &str, retry: RetryPolicy) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(retry.request_timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(HttpRpcClient {
            client,
            url: url.to_string(),
            snapshot_hash: snapshot_hash.to_string(),
            retry,
        })
    }

    /// One POST, no retry. Transport vs protocol classification happens here.
    fn fetch_once(&self, cursor: &str, page_size: usize) -> Result<AccountPage, RpcError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: RANGE_QUERY_METHOD,
            params: (self.snapshot_hash.as_str(), cursor, page_size, true, false),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RpcError::Protocol(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: RpcResponse = response
            .json()
            .map_err(|e| RpcError::Protocol(format!("undecodable RPC response: {}", e)))?;

        if let Some(err) = body.error {
            return Err(RpcError::Protocol(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        let result = body
            .result
            .ok_or_else(|| RpcError::Protocol("response missing result".to_string()))?;

        let mut accounts = Vec::with_capacity(result.accounts.len());
        for (address, entry) in &result.accounts {
            accounts.push((address.trim().to_lowercase(), normalize_balance(&entry.balance)?));
        }

        let next = if end_of_trie(&result.next) {
            None
        } else {
            result.next
        };

        Ok(AccountPage { accounts, next })
    }
}

impl RangeQuery for HttpRpcClient {
    fn fetch_page(&self, cursor: &str, page_size: usize) -> Result<AccountPage, RpcError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(cursor, page_size) {
                Ok(page) => {
                    debug!(
                        "page at cursor {:?}: {} accounts, next={:?}",
                        cursor,
                        page.accounts.len(),
                        page.next
                    );
                    return Ok(page);
                }
                Err(RpcError::Transport(msg)) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(RpcError::Transport(format!(
                            "{} (gave up after {} attempts)",
                            msg, attempt
                        )));
                    }
                    let backoff = self.retry.backoff_for(attempt - 1);
                    warn!(
                        "transport failure ({}), retry {}/{} in {:?}",
                        msg, attempt, self.retry.max_attempts, backoff
                    );
                    thread::sleep(backoff);
                }
                // RPC-level errors abort immediately; the checkpoint still
                // points at the last durable page so the next run resumes.
                Err(fatal) => return Err(fatal),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;
    use std::time::Duration;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            request_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_fetch_page_decodes_accounts_and_cursor() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/")
                .json_body_partial(r#"{"method": "debug_accountRange"}"#);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "accounts": {
                        "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA": {"balance": "100"},
                        "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb": {"balance": "0x1f4"}
                    },
                    "next": "0xcursor1"
                }
            }));
        });

        let client = HttpRpcClient::new(&server.url("/"), "0xsnapshot", quick_retry()).unwrap();
        let page = client.fetch_page("", 2).unwrap();

        mock.assert();
        assert_eq!(page.accounts.len(), 2);
        // addresses come back canonical lowercase
        assert_eq!(
            page.accounts[0].0,
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        assert_eq!(page.accounts[0].1, U256::from(100u64));
        // hex encoding normalized too
        assert_eq!(page.accounts[1].1, U256::from(500u64));
        assert_eq!(page.next.as_deref(), Some("0xcursor1"));
    }

    #[test]
    fn test_end_sentinel_maps_to_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({
                "result": {"accounts": {"0xcc": {"balance": 7}}, "next": "0x"}
            }));
        });

        let client = HttpRpcClient::new(&server.url("/"), "0xsnapshot", quick_retry()).unwrap();
        let page = client.fetch_page("0xprev", 5).unwrap();

        assert!(page.next.is_none());
        assert_eq!(page.accounts[0].1, U256::from(7u64));
    }

    #[test]
    fn test_rpc_error_is_fatal_protocol() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({
                "error": {"code": -32000, "message": "state not available"}
            }));
        });

        let client = HttpRpcClient::new(&server.url("/"), "0xsnapshot", quick_retry()).unwrap();
        let err = client.fetch_page("", 5).unwrap_err();

        // protocol errors must not be retried
        mock.assert_hits(1);
        assert!(matches!(err, RpcError::Protocol(_)));
        assert!(err.to_string().contains("state not available"));
    }

    #[test]
    fn test_http_error_status_is_protocol() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(500);
        });

        let client = HttpRpcClient::new(&server.url("/"), "0xsnapshot", quick_retry()).unwrap();
        let err = client.fetch_page("", 5).unwrap_err();

        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[test]
    fn test_transport_failure_exhausts_retries() {
        // nothing listening on this port
        let client = HttpRpcClient::new(
            "http://127.0.0.1:9/",
            "0xsnapshot",
            quick_retry(),
        )
        .unwrap();

        let err = client.fetch_page("", 5).unwrap_err();
        match err {
            RpcError::Transport(msg) => assert!(msg.contains("gave up after 3 attempts")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_balance_encodings() {
        assert_eq!(
            normalize_balance(&json!("12345")).unwrap(),
            U256::from(12345u64)
        );
        assert_eq!(
            normalize_balance(&json!("0xff")).unwrap(),
            U256::from(255u64)
        );
        assert_eq!(normalize_balance(&json!(42)).unwrap(), U256::from(42u64));
        assert!(normalize_balance(&json!("not-a-number")).is_err());
        assert!(normalize_balance(&json!(-1)).is_err());
        assert!(normalize_balance(&json!({"nested": true})).is_err());
    }

    #[test]
    fn test_native_integer_above_u64_is_rejected() {
        // a 10^21 wei balance as a bare JSON integer lands in f64 territory
        let value: serde_json::Value =
            serde_json::from_str("1000000000000000000000").unwrap();
        let err = normalize_balance(&value).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));

        // the same amount as a decimal string is fine
        assert_eq!(
            normalize_balance(&json!("1000000000000000000000")).unwrap(),
            U256::from_dec_str("1000000000000000000000").unwrap()
        );
    }
}
