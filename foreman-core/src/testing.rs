//! Scripted in-memory transport for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

/// Endpoint a request was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Create,
    GetSession,
    ListActivities,
    ApprovePlan,
    SendMessage,
    Update,
    Delete,
}

impl Route {
    fn of(request: &ApiRequest) -> Option<(Route, Option<String>)> {
        let path = request.path.as_str();
        if request.method == Method::Post && path == "sessions" {
            return Some((Route::Create, None));
        }
        let rest = path.strip_prefix("sessions/")?;
        if let Some(id) = rest.strip_suffix(":approvePlan") {
            return Some((Route::ApprovePlan, Some(id.to_string())));
        }
        if let Some(id) = rest.strip_suffix("/activities") {
            let route = match request.method {
                Method::Get => Route::ListActivities,
                _ => Route::SendMessage,
            };
            return Some((route, Some(id.to_string())));
        }
        let route = match request.method {
            Method::Get => Route::GetSession,
            Method::Patch => Route::Update,
            Method::Delete => Route::Delete,
            Method::Post => return None,
        };
        Some((route, Some(rest.to_string())))
    }
}

#[derive(Debug, Default)]
struct RemoteSide {
    created: usize,
    states: HashMap<String, String>,
    titles: HashMap<String, String>,
    activities: HashMap<String, Vec<Value>>,
    errors: HashMap<Route, VecDeque<TransportError>>,
    requests: Vec<ApiRequest>,
    page_size: Option<usize>,
}

/// Fake remote service holding session state and activity lists in memory
///
/// Created sessions get ids `first_id`, `first_id-2`, `first_id-3`, ...
/// Queued errors for a route are returned before any normal response.
#[derive(Debug)]
pub struct FakeTransport {
    first_id: String,
    remote: Mutex<RemoteSide>,
}

impl FakeTransport {
    pub fn new(first_id: impl Into<String>) -> Self {
        Self {
            first_id: first_id.into(),
            remote: Mutex::new(RemoteSide::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut RemoteSide) -> R) -> R {
        f(&mut self.remote.lock().unwrap())
    }

    pub fn push_error(&self, route: Route, error: TransportError) {
        self.with(|r| r.errors.entry(route).or_default().push_back(error));
    }

    /// Append an activity to the default session
    pub fn push_activity(&self, activity: Value) {
        let id = self.first_id.clone();
        self.push_activity_for(&id, activity);
    }

    pub fn push_activity_for(&self, session_id: &str, activity: Value) {
        self.with(|r| {
            r.activities
                .entry(session_id.to_string())
                .or_default()
                .push(activity)
        });
    }

    /// Set the remote state of the default session
    pub fn set_state(&self, state: &str) {
        let id = self.first_id.clone();
        self.set_state_for(&id, state);
    }

    pub fn set_state_for(&self, session_id: &str, state: &str) {
        self.with(|r| {
            r.states.insert(session_id.to_string(), state.to_string());
        });
    }

    pub fn set_page_size(&self, size: usize) {
        self.with(|r| r.page_size = Some(size));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.with(|r| r.requests.clone())
    }

    pub fn count(&self, route: Route) -> usize {
        self.with(|r| {
            r.requests
                .iter()
                .filter(|req| Route::of(req).map(|(rt, _)| rt) == Some(route))
                .count()
        })
    }

    fn session_body(remote: &RemoteSide, id: &str) -> Value {
        json!({
            "name": format!("sessions/{}", id),
            "id": id,
            "state": remote.states.get(id).cloned().unwrap_or_else(|| "QUEUED".to_string()),
            "title": remote.titles.get(id).cloned().unwrap_or_default(),
        })
    }

    fn respond(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let (route, id) = Route::of(request).ok_or_else(|| TransportError::Api {
            status: 404,
            reason: format!("No route for {} {}", request.method, request.path),
        })?;
        let mut remote = self.remote.lock().unwrap();
        remote.requests.push(request.clone());

        if let Some(error) = remote.errors.get_mut(&route).and_then(VecDeque::pop_front) {
            return Err(error);
        }

        let id = id.unwrap_or_default();
        match route {
            Route::Create => {
                remote.created += 1;
                let id = if remote.created == 1 {
                    self.first_id.clone()
                } else {
                    format!("{}-{}", self.first_id, remote.created)
                };
                let title = request
                    .body
                    .as_ref()
                    .and_then(|b| b["title"].as_str())
                    .unwrap_or_default()
                    .to_string();
                remote.titles.insert(id.clone(), title);
                remote.states.entry(id.clone()).or_insert_with(|| "QUEUED".to_string());
                Ok(Self::session_body(&remote, &id))
            }
            Route::GetSession => Ok(Self::session_body(&remote, &id)),
            Route::ListActivities => {
                let all = remote.activities.get(&id).cloned().unwrap_or_default();
                let start: usize = request
                    .query
                    .iter()
                    .find(|(k, _)| k == "pageToken")
                    .and_then(|(_, v)| v.parse().ok())
                    .unwrap_or(0);
                let size = remote.page_size.unwrap_or(50);
                let end = (start + size).min(all.len());
                let page: Vec<Value> = all.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
                let mut body = json!({ "activities": page });
                if end < all.len() {
                    body["nextPageToken"] = json!(end.to_string());
                }
                Ok(body)
            }
            Route::ApprovePlan | Route::SendMessage => Ok(json!({})),
            Route::Update => {
                if let Some(title) = request.body.as_ref().and_then(|b| b["title"].as_str()) {
                    remote.titles.insert(id.clone(), title.to_string());
                }
                Ok(Self::session_body(&remote, &id))
            }
            Route::Delete => {
                remote.states.insert(id, "CANCELLED".to_string());
                Ok(Value::Null)
            }
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let body = self.respond(&request)?;
        let bytes_received = if body.is_null() {
            0
        } else {
            serde_json::to_vec(&body).map_or(0, |b| b.len())
        };
        Ok(ApiResponse {
            status: 200,
            body,
            bytes_received,
        })
    }
}
