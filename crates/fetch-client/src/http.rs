//! Reference HTTP client for a cursor-paginated JSON API
//!
//! Cursor encoding differs per endpoint family:
//! - id lists (`friends/ids`, `followers/ids`) use the server's `next_cursor`,
//!   where `0` marks the end
//! - post lists (`favorites`, `user_timeline`) page backwards with `max_id`;
//!   the next cursor is one below the smallest id seen, and an empty page ends
//! - lookups are resolved locally in `LOOKUP_CHUNK` slices; the cursor is the
//!   offset of the next slice
//!
//! Quota headers: `x-rate-limit-remaining` and `x-rate-limit-reset` (unix
//! seconds), converted to a relative `reset_after`.

use common::Credential;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::classify::classify_status;
use crate::endpoint::{Endpoint, LOOKUP_CHUNK};
use crate::{Cursor, FetchClient, FetchError, FetchFuture, Page, RateLimit, Result};

const REMAINING_HEADER: &str = "x-rate-limit-remaining";
const RESET_HEADER: &str = "x-rate-limit-reset";

/// Posts requested per timeline/favorites page.
const POST_PAGE_SIZE: u32 = 200;
/// Ids requested per id-list page.
const ID_PAGE_SIZE: u32 = 5000;

/// `FetchClient` over HTTP, bound to one credential.
///
/// Authenticates with the credential's secret as a bearer token. The
/// `reqwest::Client` may be shared between instances; connection pooling is
/// reqwest's concern.
pub struct HttpFetchClient {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl HttpFetchClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, credential: Credential) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            credential,
        }
    }

    async fn fetch_page(&self, endpoint: &Endpoint, cursor: Option<&Cursor>) -> Result<Page> {
        let Some(query) = build_query(endpoint, cursor)? else {
            return Ok(Page::new(Vec::new(), None));
        };
        let url = format!("{}{}", self.base_url, endpoint.path());

        debug!(endpoint = %endpoint, cursor = ?cursor.map(Cursor::as_str), "issuing fetch");
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.credential.secret().expose())
            .query(&query)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let rate_limit = parse_rate_limit(response.headers(), unix_now());
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("reading response body: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body, rate_limit.as_ref()));
        }

        let body: Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::Transient(format!("response is not JSON: {e}")))?;
        let (items, next) = parse_page(endpoint, cursor, body)?;
        let mut page = Page::new(items, next);
        page.rate_limit = rate_limit;
        Ok(page)
    }
}

impl FetchClient for HttpFetchClient {
    fn fetch<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        cursor: Option<&'a Cursor>,
    ) -> FetchFuture<'a> {
        Box::pin(self.fetch_page(endpoint, cursor))
    }
}

/// Query parameters for one call, or `None` when there is nothing to request
/// (an empty lookup).
pub fn build_query(
    endpoint: &Endpoint,
    cursor: Option<&Cursor>,
) -> Result<Option<Vec<(&'static str, String)>>> {
    let mut query = Vec::new();
    match endpoint {
        Endpoint::FriendIds { user } | Endpoint::FollowerIds { user } => {
            query.push(user.query_pair());
            query.push(("stringify_ids", "true".into()));
            query.push(("count", ID_PAGE_SIZE.to_string()));
            let cursor = cursor.map(|c| c.as_str().to_string());
            query.push(("cursor", cursor.unwrap_or_else(|| "-1".into())));
        }
        Endpoint::Favorites { user } => {
            query.push(user.query_pair());
            query.push(("count", POST_PAGE_SIZE.to_string()));
            query.push(("include_entities", "false".into()));
            if let Some(max_id) = cursor {
                query.push(("max_id", max_id.as_str().to_string()));
            }
        }
        Endpoint::UserTimeline {
            user,
            include_retweets,
            exclude_replies,
        } => {
            query.push(user.query_pair());
            query.push(("count", POST_PAGE_SIZE.to_string()));
            query.push(("include_rts", include_retweets.to_string()));
            query.push(("exclude_replies", exclude_replies.to_string()));
            if let Some(max_id) = cursor {
                query.push(("max_id", max_id.as_str().to_string()));
            }
        }
        Endpoint::UsersLookup { ids } | Endpoint::StatusesLookup { ids } => {
            let offset = lookup_offset(cursor)?;
            if offset >= ids.len() {
                return Ok(None);
            }
            let end = (offset + LOOKUP_CHUNK).min(ids.len());
            let joined = ids[offset..end]
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let param = match endpoint {
                Endpoint::UsersLookup { .. } => "user_id",
                _ => "id",
            };
            query.push((param, joined));
        }
    }
    Ok(Some(query))
}

/// Split a successful response body into items and the next cursor.
pub fn parse_page(
    endpoint: &Endpoint,
    cursor: Option<&Cursor>,
    body: Value,
) -> Result<(Vec<Value>, Option<Cursor>)> {
    match endpoint {
        Endpoint::FriendIds { .. } | Endpoint::FollowerIds { .. } => {
            let next = body["next_cursor_str"]
                .as_str()
                .map(str::to_string)
                .or_else(|| body["next_cursor"].as_i64().map(|n| n.to_string()))
                .filter(|c| c != "0")
                .map(Cursor::new);
            let items = match body.get("ids") {
                Some(Value::Array(ids)) => ids.clone(),
                _ => return Err(FetchError::Transient("id page without `ids` array".into())),
            };
            Ok((items, next))
        }
        Endpoint::Favorites { .. } | Endpoint::UserTimeline { .. } => {
            let Value::Array(items) = body else {
                return Err(FetchError::Transient("post page is not an array".into()));
            };
            let next = items
                .iter()
                .filter_map(item_id)
                .min()
                .and_then(|min| min.checked_sub(1))
                .map(|max_id| Cursor::new(max_id.to_string()));
            Ok((items, next))
        }
        Endpoint::UsersLookup { ids } | Endpoint::StatusesLookup { ids } => {
            let Value::Array(items) = body else {
                return Err(FetchError::Transient("lookup page is not an array".into()));
            };
            let next_offset = lookup_offset(cursor)? + LOOKUP_CHUNK;
            let next = (next_offset < ids.len()).then(|| Cursor::new(next_offset.to_string()));
            Ok((items, next))
        }
    }
}

/// Read quota headers. `now_unix` is the current unix time in seconds.
pub fn parse_rate_limit(headers: &HeaderMap, now_unix: u64) -> Option<RateLimit> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    let remaining = header_u64(REMAINING_HEADER).map(|n| n.min(u32::MAX as u64) as u32);
    let reset_after =
        header_u64(RESET_HEADER).map(|reset| Duration::from_secs(reset.saturating_sub(now_unix)));

    if remaining.is_none() && reset_after.is_none() {
        None
    } else {
        Some(RateLimit {
            remaining,
            reset_after,
        })
    }
}

fn lookup_offset(cursor: Option<&Cursor>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .as_str()
            .parse()
            .map_err(|_| FetchError::Malformed(format!("invalid lookup cursor `{c}`"))),
    }
}

fn item_id(item: &Value) -> Option<u64> {
    item["id"]
        .as_u64()
        .or_else(|| item["id_str"].as_str().and_then(|s| s.parse().ok()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserRef;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn query_value<'a>(query: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        query
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn id_list_first_page_uses_minus_one_cursor() {
        let endpoint = Endpoint::FriendIds {
            user: UserRef::ScreenName("jack".into()),
        };
        let query = build_query(&endpoint, None).unwrap().unwrap();
        assert_eq!(query_value(&query, "cursor"), Some("-1"));
        assert_eq!(query_value(&query, "screen_name"), Some("jack"));
    }

    #[test]
    fn id_list_zero_cursor_ends_pagination() {
        let endpoint = Endpoint::FollowerIds {
            user: UserRef::Id(1),
        };
        let body = json!({"ids": ["1", "2"], "next_cursor_str": "0"});
        let (items, next) = parse_page(&endpoint, None, body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(next, None);

        let body = json!({"ids": [], "next_cursor": 1455});
        let (items, next) = parse_page(&endpoint, None, body).unwrap();
        assert!(items.is_empty());
        assert_eq!(next, Some(Cursor::new("1455")));
    }

    #[test]
    fn post_list_pages_below_smallest_id() {
        let endpoint = Endpoint::Favorites {
            user: UserRef::Id(1),
        };
        let body = json!([{"id": 50}, {"id_str": "42"}, {"id": 47}]);
        let (items, next) = parse_page(&endpoint, None, body).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(next, Some(Cursor::new("41")));

        let (items, next) = parse_page(&endpoint, next.as_ref(), json!([])).unwrap();
        assert!(items.is_empty());
        assert_eq!(next, None);
    }

    #[test]
    fn timeline_passes_max_id_cursor() {
        let endpoint = Endpoint::timeline(UserRef::Id(9));
        let cursor = Cursor::new("1000");
        let query = build_query(&endpoint, Some(&cursor)).unwrap().unwrap();
        assert_eq!(query_value(&query, "max_id"), Some("1000"));
        assert_eq!(query_value(&query, "include_rts"), Some("true"));
    }

    #[test]
    fn lookup_is_chunked_by_offset() {
        let ids: Vec<u64> = (0..250).collect();
        let endpoint = Endpoint::UsersLookup { ids };

        let query = build_query(&endpoint, None).unwrap().unwrap();
        let first = query_value(&query, "user_id").unwrap();
        assert_eq!(first.split(',').count(), LOOKUP_CHUNK);

        let (_, next) = parse_page(&endpoint, None, json!([])).unwrap();
        assert_eq!(next, Some(Cursor::new("100")));

        let cursor = Cursor::new("200");
        let query = build_query(&endpoint, Some(&cursor)).unwrap().unwrap();
        assert_eq!(query_value(&query, "user_id").unwrap().split(',').count(), 50);
        let (_, next) = parse_page(&endpoint, Some(&cursor), json!([])).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn empty_lookup_needs_no_request() {
        let endpoint = Endpoint::StatusesLookup { ids: vec![] };
        assert!(build_query(&endpoint, None).unwrap().is_none());
    }

    #[test]
    fn bad_lookup_cursor_is_malformed() {
        let endpoint = Endpoint::StatusesLookup { ids: vec![1] };
        let cursor = Cursor::new("abc");
        assert!(matches!(
            build_query(&endpoint, Some(&cursor)),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn rate_limit_headers_become_relative_reset() {
        let mut headers = HeaderMap::new();
        headers.insert(REMAINING_HEADER, HeaderValue::from_static("14"));
        headers.insert(RESET_HEADER, HeaderValue::from_static("1000900"));
        let rl = parse_rate_limit(&headers, 1_000_000).unwrap();
        assert_eq!(rl.remaining, Some(14));
        assert_eq!(rl.reset_after, Some(Duration::from_secs(900)));
    }

    #[test]
    fn past_reset_saturates_to_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(RESET_HEADER, HeaderValue::from_static("10"));
        let rl = parse_rate_limit(&headers, 1_000).unwrap();
        assert_eq!(rl.remaining, None);
        assert_eq!(rl.reset_after, Some(Duration::ZERO));
    }

    #[test]
    fn missing_headers_yield_none() {
        assert_eq!(parse_rate_limit(&HeaderMap::new(), 0), None);
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        let client = HttpFetchClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/",
            Credential::new("k", "s"),
        );
        let endpoint = Endpoint::Favorites {
            user: UserRef::Id(1),
        };
        let err = client.fetch(&endpoint, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)), "got {err:?}");
    }

    /// What the mock upstream saw: path, query string, authorization header.
    type Seen = Arc<Mutex<Vec<(String, String, String)>>>;

    /// Start a mock upstream that answers every request with `status`,
    /// `headers` and `body`, recording each request it receives.
    async fn start_upstream(
        status: StatusCode,
        headers: Vec<(&'static str, String)>,
        body: &'static str,
    ) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let seen: Seen = Arc::default();

        let log = Arc::clone(&seen);
        let app = axum::Router::new().fallback(move |request: Request| {
            let headers = headers.clone();
            let log = Arc::clone(&log);
            async move {
                let auth = request
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                log.lock().unwrap().push((
                    request.uri().path().to_string(),
                    request.uri().query().unwrap_or("").to_string(),
                    auth,
                ));
                let mut response = (status, body).into_response();
                for (name, value) in headers {
                    response
                        .headers_mut()
                        .insert(name, axum::http::HeaderValue::from_str(&value).unwrap());
                }
                response
            }
        });
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        (url, seen)
    }

    fn client_for(url: &str) -> HttpFetchClient {
        HttpFetchClient::new(reqwest::Client::new(), url, Credential::new("ck", "cs"))
    }

    fn favorites() -> Endpoint {
        Endpoint::Favorites {
            user: UserRef::Id(5),
        }
    }

    #[tokio::test]
    async fn success_carries_items_cursor_and_quota() {
        let reset = (unix_now() + 900).to_string();
        let (url, seen) = start_upstream(
            StatusCode::OK,
            vec![(REMAINING_HEADER, "14".into()), (RESET_HEADER, reset)],
            r#"{"ids":["1","2"],"next_cursor_str":"77"}"#,
        )
        .await;
        let endpoint = Endpoint::FriendIds {
            user: UserRef::Id(5),
        };

        let page = client_for(&url).fetch(&endpoint, None).await.unwrap();

        assert_eq!(page.items, vec![json!("1"), json!("2")]);
        assert_eq!(page.next, Some(Cursor::new("77")));
        let rl = page.rate_limit.unwrap();
        assert_eq!(rl.remaining, Some(14));
        let reset_after = rl.reset_after.unwrap();
        assert!(reset_after <= Duration::from_secs(900));
        assert!(reset_after >= Duration::from_secs(890), "got {reset_after:?}");

        let seen = seen.lock().unwrap();
        let (path, query, auth) = &seen[0];
        assert_eq!(path, "/friends/ids.json");
        assert!(query.contains("user_id=5"), "got {query}");
        assert!(query.contains("cursor=-1"), "got {query}");
        assert_eq!(auth, "Bearer cs");
    }

    #[tokio::test]
    async fn too_many_requests_reports_reset() {
        let reset = (unix_now() + 300).to_string();
        let (url, _) = start_upstream(
            StatusCode::TOO_MANY_REQUESTS,
            vec![(REMAINING_HEADER, "0".into()), (RESET_HEADER, reset)],
            r#"{"errors":[{"code":88,"message":"Rate limit exceeded"}]}"#,
        )
        .await;

        let err = client_for(&url).fetch(&favorites(), None).await.unwrap_err();

        let FetchError::RateLimited {
            reset_after: Some(after),
        } = &err
        else {
            panic!("expected RateLimited with a reset, got {err:?}");
        };
        let after = *after;
        assert!(after <= Duration::from_secs(300));
        assert!(after >= Duration::from_secs(290), "got {after:?}");
    }

    #[tokio::test]
    async fn private_target_is_unavailable_not_unauthorized() {
        let (url, _) = start_upstream(
            StatusCode::UNAUTHORIZED,
            Vec::new(),
            r#"{"request":"/favorites/list.json","error":"Not authorized."}"#,
        )
        .await;

        let err = client_for(&url).fetch(&favorites(), None).await.unwrap_err();
        assert!(matches!(err, FetchError::TargetUnavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let (url, _) = start_upstream(
            StatusCode::UNAUTHORIZED,
            Vec::new(),
            r#"{"errors":[{"code":89,"message":"Invalid or expired token."}]}"#,
        )
        .await;

        let err = client_for(&url).fetch(&favorites(), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Unauthorized(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn service_unavailable_is_transient() {
        let (url, _) = start_upstream(StatusCode::SERVICE_UNAVAILABLE, Vec::new(), "over capacity")
            .await;

        let err = client_for(&url).fetch(&favorites(), None).await.unwrap_err();
        let FetchError::Transient(msg) = &err else {
            panic!("expected Transient, got {err:?}");
        };
        assert!(msg.contains("503"), "got {msg}");
    }

    #[tokio::test]
    async fn non_json_success_body_is_transient() {
        let (url, _) = start_upstream(StatusCode::OK, Vec::new(), "<html>maintenance</html>").await;

        let err = client_for(&url).fetch(&favorites(), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn post_page_cursor_goes_out_as_max_id() {
        let (url, seen) = start_upstream(StatusCode::OK, Vec::new(), r#"[{"id":30},{"id":21}]"#).await;

        let cursor = Cursor::new("40");
        let page = client_for(&url)
            .fetch(&favorites(), Some(&cursor))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next, Some(Cursor::new("20")));
        assert_eq!(page.rate_limit, None);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "/favorites/list.json");
        assert!(seen[0].1.contains("max_id=40"), "got {}", seen[0].1);
    }
}
