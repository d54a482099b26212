//! In-memory transport for unit tests

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use reqwest::Method;

use super::transport::{ApiError, ApiRequest, ApiResponse, Transport};

/// Transport that answers from a table of canned responses
///
/// Responses registered for the same method and URL are returned in order; the
/// last one is repeated once the queue is down to a single entry.
#[derive(Debug, Default)]
pub struct FakeTransport {
    routes: RefCell<HashMap<(Method, String), VecDeque<ApiResponse>>>,
    requests: RefCell<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, method: Method, url: &str, status: u16, body: serde_json::Value) -> Self {
        self.respond_with(
            method,
            url,
            ApiResponse {
                status,
                location: None,
                body: body.to_string().into_bytes(),
            },
        )
    }

    pub fn respond_raw(self, method: Method, url: &str, status: u16, body: &str) -> Self {
        self.respond_with(
            method,
            url,
            ApiResponse {
                status,
                location: None,
                body: body.as_bytes().to_vec(),
            },
        )
    }

    pub fn respond_with(self, method: Method, url: &str, response: ApiResponse) -> Self {
        self.routes
            .borrow_mut()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    /// URLs requested so far, in order
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|r| r.url.clone()).collect()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }
}

impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.borrow_mut().push(request.clone());
        let mut routes = self.routes.borrow_mut();
        let queue = routes
            .get_mut(&(request.method.clone(), request.url.clone()))
            .ok_or_else(|| ApiError::NotFound(format!("no canned response for {}", request.url)))?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or_else(|| ApiError::NotFound(format!("no canned response for {}", request.url)))
    }
}
