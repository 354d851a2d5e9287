//! In-process Redfish endpoint for tests. Records every request and answers
//! from a table of canned responses keyed by method and path.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::model::{NodeInfo, RedfishType};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Canned {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
    pub delay: Duration,
}

impl Canned {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            content_type: "application/json",
            headers: Vec::new(),
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// Holds the response back, for callers that need a call in flight.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }
}

#[derive(Default)]
pub struct FakeBmc {
    // A route with several responses plays them in order and then repeats the last.
    routes: Mutex<HashMap<(Method, String), Vec<Canned>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl FakeBmc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: Method, path: &str, canned: Canned) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push(canned);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &Method, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| &r.method == method && r.path == path)
            .collect()
    }

    pub async fn serve(self: &Arc<Self>) -> SocketAddr {
        let app = Router::new().fallback(respond).with_state(Arc::clone(self));
        let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
            .serve(app.into_make_service());
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }
}

async fn respond(
    State(bmc): State<Arc<FakeBmc>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, HeaderMap, String) {
    let path = uri.path().to_string();
    bmc.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        headers,
        body,
    });

    let canned = {
        let mut routes = bmc.routes.lock().unwrap();
        match routes.get_mut(&(method, path)) {
            Some(queue) if queue.len() > 1 => Some(queue.remove(0)),
            Some(queue) => queue.first().cloned(),
            None => None,
        }
    };

    let Some(canned) = canned else {
        return (StatusCode::NOT_FOUND, HeaderMap::new(), String::new());
    };
    if !canned.delay.is_zero() {
        tokio::time::sleep(canned.delay).await;
    }

    let mut out = HeaderMap::new();
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static(canned.content_type));
    for (name, value) in canned.headers {
        out.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(&value).unwrap(),
        );
    }
    (canned.status, out, canned.body)
}

/// A compute node whose BMC is the fake at `addr`.
pub fn node_at(addr: SocketAddr, xname: &str) -> NodeInfo {
    NodeInfo {
        xname: xname.to_string(),
        hostname: xname.to_string(),
        nid: 1,
        bmc_fqdn: addr.to_string(),
        bmc_user: "root".to_string(),
        bmc_pass: "initial0".to_string(),
        bmc_type: "NodeBMC".to_string(),
        bmc_path: "/redfish/v1/Systems/Node0".to_string(),
        rf_type: RedfishType::ComputerSystem,
        rf_action_uri: "/redfish/v1/Systems/Node0/Actions/ComputerSystem.Reset".to_string(),
        rf_reset_types: vec![
            "On".to_string(),
            "ForceOff".to_string(),
            "GracefulShutdown".to_string(),
            "GracefulRestart".to_string(),
        ],
        rf_power_url: "/redfish/v1/Chassis/Node0/Power".to_string(),
        ..Default::default()
    }
    .with_detected_capabilities()
}
