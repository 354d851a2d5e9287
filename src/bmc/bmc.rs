use crate::bmc::client::ClientProvider;
use crate::bmc::redfish::{
    DellError, HpeOutletRequest, Manager, Power, PowerStateRequest, PowerStateResource,
    RedfishError, ResetRequest, SessionRequest,
};
use crate::bmc::{base_name, parent_path};
use crate::config::{Config, PUSH_POWER_BUTTON};
use crate::model::{
    BmcCmd, BmcPowerRc, NodeInfo, PduVendor, PowerAction, PowerCapStyle, RedfishType,
    POWER_STATE_ON, SIMULATION_STATE,
};

use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, IF_MATCH};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::fmt::{self, Debug};
use std::sync::Arc;

const SESSION_PATH: &str = "/redfish/v1/SessionService/Sessions";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const CONTROLS_DEEP: &str = "Controls.Deep";

/// A fully read BMC reply with a status below 400.
struct BmcReply {
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Executes one logical command against one BMC over Redfish.
///
/// Every call produces exactly one [`BmcPowerRc`]. Transport failures,
/// rejected requests and decode problems are reported in that value rather
/// than as `Err`, so one bad BMC never disturbs its siblings.
#[derive(Clone)]
pub struct RedfishAdapter {
    clients: Arc<ClientProvider>,
    config: Arc<Config>,
    simulation_only: bool,
    scheme: String,
}

impl RedfishAdapter {
    #[must_use]
    pub fn new(clients: Arc<ClientProvider>, config: Arc<Config>, simulation_only: bool) -> Self {
        Self {
            clients,
            config,
            simulation_only,
            scheme: "https".to_string(),
        }
    }

    /// Talk to BMCs over another URL scheme, `http` for local fakes.
    #[must_use]
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    #[must_use]
    pub fn simulation_only(&self) -> bool {
        self.simulation_only
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn clients(&self) -> &Arc<ClientProvider> {
        &self.clients
    }

    fn url(&self, node: &NodeInfo, path: &str) -> String {
        format!("{}://{}{}", self.scheme, node.bmc_fqdn, path)
    }

    /// Runs `cmd` against `node`. The client read guard is held for the whole
    /// call, including any nested status or etag lookups.
    pub async fn call(&self, cmd: &BmcCmd, node: &Arc<NodeInfo>) -> BmcPowerRc {
        info!(
            "{}: '{}', {}: '{}', Command: '{cmd}'",
            node.component_type, node.hostname, node.bmc_type, node.bmc_fqdn
        );

        if node.bmc_fqdn.is_empty() {
            error!(
                "{} {} no FQDN defined for {}",
                node.component_type, node.hostname, node.bmc_type
            );
            let mut res = BmcPowerRc::new(node);
            res.msg = format!("Unknown {} ({} Controller)", node.bmc_type, node.component_type);
            return res;
        }

        let client = self.clients.read().await;
        match cmd {
            BmcCmd::Status => self.status(&client, node).await,
            BmcCmd::Power(action) => self.power(&client, node, *action).await,
            BmcCmd::GetPowerCap => self.get_power_cap(&client, node).await,
            BmcCmd::SetPowerCap(payload) => match node.capabilities.power_cap_style {
                PowerCapStyle::HpeApollo6500 => {
                    self.post_power_cap(&client, node, payload).await
                }
                PowerCapStyle::PowerControl | PowerCapStyle::Controls => {
                    self.patch_power_cap(&client, node, payload).await
                }
            },
        }
    }

    fn simulated(
        &self,
        node: &Arc<NodeInfo>,
        method: &Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> BmcPowerRc {
        match body {
            Some(body) => info!(
                "SIMULATION_ONLY: {method} {url}, Data: {}",
                String::from_utf8_lossy(body)
            ),
            None => info!("SIMULATION_ONLY: {method} {url}"),
        }
        let mut res = BmcPowerRc::new(node);
        res.rc = 0;
        res.state = SIMULATION_STATE.to_string();
        res
    }

    /// Sends the request with the node's credentials and drains the body.
    /// Anything but a readable sub-400 reply comes back as the failed result.
    async fn execute(
        &self,
        node: &Arc<NodeInfo>,
        request: RequestBuilder,
        method: &Method,
        url: &str,
    ) -> Result<BmcReply, BmcPowerRc> {
        let request = request
            .basic_auth(&node.bmc_user, Some(&node.bmc_pass))
            .header(ACCEPT, "*/*");

        info!("{method} {url}");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("{method} {url} {} Network Error: {e}", node.bmc_type);
                let mut res = BmcPowerRc::new(node);
                res.msg = format!("{} Communication Error", node.bmc_type);
                return Err(res);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(e) => {
                error!("reading response body from {url}: {e}");
                let mut res = BmcPowerRc::new(node);
                res.msg = "Internal Server Error".to_string();
                return Err(res);
            }
        };

        if status.as_u16() >= StatusCode::BAD_REQUEST.as_u16() {
            warn!("HTTP {status} {method} {url}");
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let mut res = BmcPowerRc::new(node);
            res.msg = decode_bmc_response(node, status, content_type, &body);
            res.rc = i32::from(status.as_u16());
            return Err(res);
        }

        info!("HTTP {status} {method} {url}");
        Ok(BmcReply { headers, body })
    }

    async fn status(&self, client: &Client, node: &Arc<NodeInfo>) -> BmcPowerRc {
        let url = self.url(node, &node.bmc_path);
        if self.simulation_only {
            return self.simulated(node, &Method::GET, &url, None);
        }

        let reply = match self.execute(node, client.get(&url), &Method::GET, &url).await {
            Ok(reply) => reply,
            Err(res) => return res,
        };

        let mut res = BmcPowerRc::new(node);
        let decoded = match node.rf_type {
            RedfishType::ComputerSystem | RedfishType::Outlet => {
                serde_json::from_slice::<PowerStateResource>(&reply.body)
                    .map(|r| r.power_state.unwrap_or_default())
            }
            RedfishType::Chassis => serde_json::from_slice::<PowerStateResource>(&reply.body)
                .map(|r| {
                    r.power_state.unwrap_or_else(|| {
                        info!(
                            "no power state for ({}) {} {}; assuming 'On'",
                            node.rf_type, node.component_type, node.hostname
                        );
                        POWER_STATE_ON.to_string()
                    })
                }),
            RedfishType::Manager => serde_json::from_slice::<Manager>(&reply.body).map(|m| {
                debug!("Manager {:?} reachable", m.id);
                POWER_STATE_ON.to_string()
            }),
            RedfishType::Unknown => {
                error!("{}: unknown Redfish Type", node.xname);
                return res;
            }
        };

        match decoded {
            Ok(state) => {
                res.rc = 0;
                res.state = state;
                info!(
                    "{} {} [{} {}] Power State: {}",
                    node.component_type, node.hostname, node.bmc_type, node.bmc_fqdn, res.state
                );
            }
            Err(e) => {
                error!("decoding response body: {e}");
                res.msg = format!("{} Response Decode Error", node.bmc_type);
            }
        }
        res
    }

    async fn power(
        &self,
        client: &Client,
        node: &Arc<NodeInfo>,
        action: PowerAction,
    ) -> BmcPowerRc {
        let mut res = BmcPowerRc::new(node);

        let reset_type = match self.config.reset_type(action, &node.rf_reset_types) {
            Ok(reset_type) => reset_type,
            Err(e) => {
                warn!("failed converting {action} to Redfish ResetType: {e}");
                warn!(
                    "{} {}: AllowableValues: {:?}",
                    node.bmc_type, node.bmc_fqdn, node.rf_reset_types
                );
                res.msg = format!("{} {}: {e}", node.bmc_type, node.bmc_fqdn);
                return res;
            }
        };

        let mut session = None;
        let body = match node.capabilities.pdu {
            Some(PduVendor::Hpe) => {
                let Some(outlet) = outlet_number(&node.hostname) else {
                    error!("Could not get outlet number from {}", node.hostname);
                    res.msg = format!("Could not get outlet number for {}", node.hostname);
                    return res;
                };
                session = Some(SessionRequest {
                    username: &node.bmc_user,
                    password: &node.bmc_pass,
                });
                serde_json::to_vec(&HpeOutletRequest::new(outlet, &reset_type))
            }
            Some(PduVendor::ServerTech) => serde_json::to_vec(&PowerStateRequest {
                power_state: &reset_type,
            }),
            None => serde_json::to_vec(&ResetRequest {
                reset_type: &reset_type,
            }),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                error!("encoding {action} request: {e}");
                res.msg = "Internal Server Error".to_string();
                return res;
            }
        };

        let url = self.url(node, &node.rf_action_uri);
        if self.simulation_only {
            return self.simulated(node, &Method::POST, &url, Some(&body));
        }

        if reset_type == PUSH_POWER_BUTTON {
            let status = self.status(client, node).await;
            if status.is_ok() && status.state == action.as_str() {
                info!("{} already {}, not pushing the power button", node.xname, status.state);
                res.rc = 0;
                res.state = status.state;
                return res;
            }
        }

        let mut request = client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(session) = session {
            let session_url = self.url(node, SESSION_PATH);
            let session_request = client.post(&session_url).json(&session);
            let reply = match self
                .execute(node, session_request, &Method::POST, &session_url)
                .await
            {
                Ok(reply) => reply,
                Err(res) => return res,
            };
            if let Some(token) = reply.headers.get(AUTH_TOKEN_HEADER) {
                request = request.header(AUTH_TOKEN_HEADER, token.clone());
            } else {
                warn!("{}: no {AUTH_TOKEN_HEADER} in session reply", node.bmc_fqdn);
            }
        }

        match self.execute(node, request, &Method::POST, &url).await {
            Ok(_) => {
                res.rc = 0;
                res
            }
            Err(res) => res,
        }
    }

    fn power_path(node: &NodeInfo) -> String {
        if node.rf_power_url.is_empty() {
            war_power_path(&node.bmc_path)
        } else {
            node.rf_power_url.clone()
        }
    }

    async fn get_power_cap(&self, client: &Client, node: &Arc<NodeInfo>) -> BmcPowerRc {
        let url = self.url(node, &Self::power_path(node));
        if self.simulation_only {
            return self.simulated(node, &Method::GET, &url, None);
        }

        match self.execute(node, client.get(&url), &Method::GET, &url).await {
            Ok(reply) => {
                let mut res = BmcPowerRc::new(node);
                res.rc = 0;
                res.msg = String::from_utf8_lossy(&reply.body).into_owned();
                res
            }
            Err(res) => res,
        }
    }

    async fn patch_power_cap(
        &self,
        client: &Client,
        node: &Arc<NodeInfo>,
        payload: &[u8],
    ) -> BmcPowerRc {
        let path = Self::power_path(node);
        let url = self.url(node, &path);
        if self.simulation_only {
            return self.simulated(node, &Method::PATCH, &url, Some(payload));
        }

        let mut request = client
            .patch(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());

        if !path.contains(CONTROLS_DEEP) {
            let current = self.get_power_cap(client, node).await;
            if !current.is_ok() {
                return current;
            }
            match serde_json::from_str::<Power>(&current.msg) {
                Ok(power) => {
                    if let Some(etag) = power.etag {
                        request = request.header(IF_MATCH, etag);
                    }
                }
                Err(e) => {
                    warn!("{}: unable to decode Power resource: {e}", node.xname);
                    let mut res = BmcPowerRc::new(node);
                    res.msg = "SetPowerCap unable to unmarshal status request".to_string();
                    return res;
                }
            }
        }

        match self.execute(node, request, &Method::PATCH, &url).await {
            Ok(reply) => {
                let mut res = BmcPowerRc::new(node);
                res.rc = 0;
                res.msg = String::from_utf8_lossy(&reply.body).into_owned();
                res
            }
            Err(res) => res,
        }
    }

    async fn post_power_cap(
        &self,
        client: &Client,
        node: &Arc<NodeInfo>,
        payload: &[u8],
    ) -> BmcPowerRc {
        let url = self.url(node, &node.rf_power_target);
        if self.simulation_only {
            return self.simulated(node, &Method::POST, &url, Some(payload));
        }

        let request = client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());

        match self.execute(node, request, &Method::POST, &url).await {
            Ok(_) => {
                let mut res = BmcPowerRc::new(node);
                res.rc = 0;
                res
            }
            Err(res) => res,
        }
    }
}

impl Debug for RedfishAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedfishAdapter")
            .field("scheme", &self.scheme)
            .field("simulation_only", &self.simulation_only)
            .finish_non_exhaustive()
    }
}

/// PDU outlets are named like `x3000m0p0v17`; the outlet number follows the `v`.
fn outlet_number(hostname: &str) -> Option<u32> {
    hostname.split('v').nth(1)?.parse().ok()
}

/// Power resource location for BMCs that did not advertise one. Intel boards
/// keep it under `RackMount/Baseboard`.
#[must_use]
pub fn war_power_path(bmc_path: &str) -> String {
    info!("empty Redfish power URL; constructing path from {bmc_path}");
    let mut base = base_name(bmc_path);
    if base.contains("QSBP") {
        info!("Using Intel Redfish Power OID workaround");
        base = "RackMount/Baseboard";
    }
    let root = parent_path(parent_path(bmc_path)).trim_end_matches('/');
    format!("{root}/Chassis/{base}/Power")
}

/// Turns an error reply into the message reported for the target. Tries the
/// standard Redfish error body, then Dell's variant, then gives up and
/// quotes the raw body.
#[must_use]
pub fn decode_bmc_response(
    node: &NodeInfo,
    status: StatusCode,
    content_type: &str,
    body: &[u8],
) -> String {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let decoded = if media_type == "application/json" {
        if let Ok(rf_err) = serde_json::from_slice::<RedfishError>(body) {
            let mut msg = format!("Redfish Error Message: {}", rf_err.error.message);
            if !rf_err.error.extended_info.is_empty() {
                msg.push_str(" ExtendedInfo:");
            }
            for info in &rf_err.error.extended_info {
                msg.push_str(&format!(
                    " Message: {} Resolution: {}",
                    info.message.as_deref().unwrap_or_default(),
                    info.resolution.as_deref().unwrap_or_default()
                ));
            }
            Some(msg)
        } else if let Ok(dell_err) = serde_json::from_slice::<DellError>(body) {
            Some(format!("Redfish Error Message: {}", dell_err.error.message.value))
        } else {
            warn!("unable to decode {media_type} into known error response type");
            None
        }
    } else {
        warn!("unrecognized Redfish response Content-Type: {media_type}");
        None
    };

    let msg = decoded.unwrap_or_else(|| {
        format!(
            "unrecognized Redfish response ({media_type}) format: {}",
            String::from_utf8_lossy(body)
        )
    });

    let msg = format!("{} {} HTTP {status}, {msg}", node.bmc_type, node.bmc_fqdn);
    warn!("{msg}");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::fake_bmc::{node_at, Canned, FakeBmc};
    use crate::bmc::client::DEFAULT_CLIENT_TIMEOUT_SECS;
    use crate::model::{ComponentType, STATE_UNKNOWN};
    use std::time::Duration;

    fn adapter(simulation_only: bool) -> RedfishAdapter {
        let timeout = Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS);
        let clients = ClientProvider::new(timeout, None).unwrap();
        RedfishAdapter::new(Arc::new(clients), Arc::new(Config::default()), simulation_only)
            .with_scheme("http")
    }

    #[tokio::test]
    async fn test_status_computer_system() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::GET,
            "/redfish/v1/Systems/Node0",
            Canned::json(200, r#"{"PowerState":"Off"}"#),
        );
        let node = Arc::new(node_at(bmc.serve().await, "x1000c0s0b0n0"));

        let res = adapter(false).call(&BmcCmd::Status, &node).await;
        assert_eq!(res.rc, 0);
        assert_eq!(res.state, "Off");

        let request = &bmc.requests()[0];
        assert_eq!(request.headers["accept"], "*/*");
        assert!(request.headers["authorization"].to_str().unwrap().starts_with("Basic "));
    }

    #[tokio::test]
    async fn test_status_manager_is_on() {
        let bmc = FakeBmc::new();
        bmc.on(Method::GET, "/redfish/v1/Managers/BMC", Canned::json(200, r#"{"Id":"BMC"}"#));
        let mut node = node_at(bmc.serve().await, "x1000c0s0b0");
        node.rf_type = RedfishType::Manager;
        node.bmc_path = "/redfish/v1/Managers/BMC".to_string();

        let res = adapter(false).call(&BmcCmd::Status, &Arc::new(node)).await;
        assert_eq!(res.rc, 0);
        assert_eq!(res.state, POWER_STATE_ON);
    }

    #[tokio::test]
    async fn test_status_chassis_without_power_state_is_on() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::GET,
            "/redfish/v1/Chassis/Enclosure",
            Canned::json(200, r#"{"Id":"Enclosure"}"#),
        );
        let mut node = node_at(bmc.serve().await, "x1000c0");
        node.rf_type = RedfishType::Chassis;
        node.bmc_path = "/redfish/v1/Chassis/Enclosure".to_string();

        let res = adapter(false).call(&BmcCmd::Status, &Arc::new(node)).await;
        assert_eq!(res.rc, 0);
        assert_eq!(res.state, POWER_STATE_ON);
    }

    #[tokio::test]
    async fn test_status_decode_error() {
        let bmc = FakeBmc::new();
        bmc.on(Method::GET, "/redfish/v1/Systems/Node0", Canned::json(200, "not json"));
        let node = Arc::new(node_at(bmc.serve().await, "x1000c0s0b0n0"));

        let res = adapter(false).call(&BmcCmd::Status, &node).await;
        assert_eq!(res.rc, -1);
        assert_eq!(res.msg, "NodeBMC Response Decode Error");
        assert_eq!(res.state, STATE_UNKNOWN);
    }

    #[tokio::test]
    async fn test_missing_fqdn() {
        let node = Arc::new(NodeInfo {
            xname: "x1000c0s0b0n0".into(),
            bmc_type: "NodeBMC".into(),
            ..Default::default()
        });
        let res = adapter(false).call(&BmcCmd::Status, &node).await;
        assert_eq!(res.rc, -1);
        assert_eq!(res.msg, "Unknown NodeBMC (Node Controller)");
    }

    #[tokio::test]
    async fn test_communication_error() {
        // bind and drop to get a port nothing listens on
        let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let node = Arc::new(node_at(addr, "x1000c0s0b0n0"));
        let res = adapter(false).call(&BmcCmd::Status, &node).await;
        assert_eq!(res.rc, -1);
        assert_eq!(res.msg, "NodeBMC Communication Error");
    }

    #[tokio::test]
    async fn test_power_on_sends_reset_type() {
        let bmc = FakeBmc::new();
        let action = "/redfish/v1/Systems/Node0/Actions/ComputerSystem.Reset";
        bmc.on(Method::POST, action, Canned::json(204, ""));
        let node = Arc::new(node_at(bmc.serve().await, "x1000c0s0b0n0"));

        let res = adapter(false).call(&BmcCmd::Power(PowerAction::Off), &node).await;
        assert_eq!(res.rc, 0);

        let sent = bmc.requests_to(&Method::POST, action);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, r#"{"ResetType":"GracefulShutdown"}"#);
        assert_eq!(sent[0].headers["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_power_unsupported_reset_type_makes_no_call() {
        let bmc = FakeBmc::new();
        let mut node = node_at(bmc.serve().await, "x1000c0s0b0n0");
        node.rf_reset_types = vec!["ForceOff".to_string()];

        let res = adapter(false).call(&BmcCmd::Power(PowerAction::Restart), &Arc::new(node)).await;
        assert_eq!(res.rc, -1);
        assert!(res.msg.contains("no supported ResetType for Restart operation"));
        assert!(bmc.requests().is_empty());
    }

    #[tokio::test]
    async fn test_push_power_button_skipped_when_already_in_state() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::GET,
            "/redfish/v1/Systems/Node0",
            Canned::json(200, r#"{"PowerState":"On"}"#),
        );
        let mut node = node_at(bmc.serve().await, "x1000c0s0b0n0");
        node.rf_reset_types = vec![PUSH_POWER_BUTTON.to_string()];
        let node = Arc::new(node);

        let res = adapter(false).call(&BmcCmd::Power(PowerAction::On), &node).await;
        assert_eq!(res.rc, 0);
        assert!(bmc.requests_to(&Method::POST, &node.rf_action_uri).is_empty());
        assert_eq!(bmc.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_push_power_button_pressed_when_state_differs() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::GET,
            "/redfish/v1/Systems/Node0",
            Canned::json(200, r#"{"PowerState":"Off"}"#),
        );
        bmc.on(
            Method::POST,
            "/redfish/v1/Systems/Node0/Actions/ComputerSystem.Reset",
            Canned::json(200, "{}"),
        );
        let mut node = node_at(bmc.serve().await, "x1000c0s0b0n0");
        node.rf_reset_types = vec![PUSH_POWER_BUTTON.to_string()];
        let node = Arc::new(node);

        let res = adapter(false).call(&BmcCmd::Power(PowerAction::On), &node).await;
        assert_eq!(res.rc, 0);
        let sent = bmc.requests_to(&Method::POST, &node.rf_action_uri);
        assert_eq!(sent[0].body, r#"{"ResetType":"PushPowerButton"}"#);
    }

    #[tokio::test]
    async fn test_hpe_pdu_uses_session_token() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::POST,
            SESSION_PATH,
            Canned::json(201, "{}").with_header("x-auth-token", "abc123"),
        );
        let outlet_uri =
            "/redfish/v1/PowerEquipment/RackPDUs/1/Outlets/17/Actions/Outlet.PowerControl";
        bmc.on(Method::POST, outlet_uri, Canned::json(200, "{}"));

        let addr = bmc.serve().await;
        let node = NodeInfo {
            xname: "x3000m0p0v17".into(),
            hostname: "x3000m0p0v17".into(),
            component_type: ComponentType::CabinetPDUPowerConnector,
            bmc_fqdn: addr.to_string(),
            bmc_user: "admin".into(),
            bmc_pass: "secret".into(),
            bmc_type: "CabinetPDUController".into(),
            rf_type: RedfishType::Outlet,
            rf_action_uri: outlet_uri.into(),
            rf_reset_types: vec!["On".into(), "Off".into()],
            ..Default::default()
        }
        .with_detected_capabilities();

        let res = adapter(false).call(&BmcCmd::Power(PowerAction::Off), &Arc::new(node)).await;
        assert_eq!(res.rc, 0);

        let session = bmc.requests_to(&Method::POST, SESSION_PATH);
        let body: serde_json::Value = serde_json::from_str(&session[0].body).unwrap();
        assert_eq!(body["username"], "admin");

        let control = bmc.requests_to(&Method::POST, outlet_uri);
        assert_eq!(control[0].headers["x-auth-token"], "abc123");
        let body: serde_json::Value = serde_json::from_str(&control[0].body).unwrap();
        assert_eq!(body["OutletNumber"], 17);
        assert_eq!(body["OutletStatus"], "off");
    }

    #[tokio::test]
    async fn test_servertech_pdu_body() {
        let bmc = FakeBmc::new();
        let outlet_uri = "/redfish/v1/PowerEquipment/RackPDUs/1/Outlets/AA1/Outlet.PowerControl";
        bmc.on(Method::POST, outlet_uri, Canned::json(200, "{}"));
        let addr = bmc.serve().await;

        // vendor detection keys off the name, so pin it to the fake
        let fqdn = "x3000m0rts1.test";
        let client = reqwest::Client::builder().resolve(fqdn, addr).build().unwrap();
        let timeout = Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS);
        let clients = ClientProvider::from_client(client, timeout);
        let adapter = RedfishAdapter::new(Arc::new(clients), Arc::new(Config::default()), false)
            .with_scheme("http");

        let node = NodeInfo {
            xname: "x3000m0p0v1".into(),
            hostname: "x3000m0p0v1".into(),
            component_type: ComponentType::CabinetPDUOutlet,
            bmc_fqdn: format!("{fqdn}:{}", addr.port()),
            bmc_type: "CabinetPDUController".into(),
            rf_type: RedfishType::Outlet,
            rf_action_uri: outlet_uri.into(),
            rf_reset_types: vec!["On".into()],
            ..Default::default()
        }
        .with_detected_capabilities();
        assert_eq!(node.capabilities.pdu, Some(PduVendor::ServerTech));

        let res = adapter.call(&BmcCmd::Power(PowerAction::On), &Arc::new(node)).await;
        assert_eq!(res.rc, 0);
        assert!(bmc.requests_to(&Method::POST, SESSION_PATH).is_empty());
        assert_eq!(bmc.requests_to(&Method::POST, outlet_uri)[0].body, r#"{"PowerState":"On"}"#);
    }

    #[tokio::test]
    async fn test_redfish_error_decoded() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::POST,
            "/redfish/v1/Systems/Node0/Actions/ComputerSystem.Reset",
            Canned::json(
                400,
                r#"{"error":{"code":"Base.1.0.GeneralError","message":"A general error has occurred.",
                   "@Message.ExtendedInfo":[{"Message":"The action was not valid.","Resolution":"Retry."}]}}"#,
            ),
        );
        let node = Arc::new(node_at(bmc.serve().await, "x1000c0s0b0n0"));

        let res = adapter(false).call(&BmcCmd::Power(PowerAction::On), &node).await;
        assert_eq!(res.rc, 400);
        assert!(res.msg.starts_with(&format!("NodeBMC {} HTTP 400 Bad Request, ", node.bmc_fqdn)));
        assert!(res.msg.ends_with(
            "Redfish Error Message: A general error has occurred. ExtendedInfo: Message: The action was not valid. Resolution: Retry."
        ));
    }

    #[test]
    fn test_decode_dell_and_raw_errors() {
        let node = NodeInfo {
            bmc_type: "NodeBMC".into(),
            bmc_fqdn: "x3000c0s1b0".into(),
            ..Default::default()
        };
        let dell = br#"{"error":{"code":"500","message":{"lang":"en","value":"iDRAC busy"}}}"#;
        let msg = decode_bmc_response(
            &node,
            StatusCode::SERVICE_UNAVAILABLE,
            "application/json; charset=utf-8",
            dell,
        );
        assert_eq!(
            msg,
            "NodeBMC x3000c0s1b0 HTTP 503 Service Unavailable, Redfish Error Message: iDRAC busy"
        );

        let msg =
            decode_bmc_response(&node, StatusCode::NOT_FOUND, "text/html", b"<html>nope</html>");
        assert_eq!(
            msg,
            "NodeBMC x3000c0s1b0 HTTP 404 Not Found, unrecognized Redfish response (text/html) format: <html>nope</html>"
        );
    }

    #[tokio::test]
    async fn test_get_power_cap_returns_body() {
        let bmc = FakeBmc::new();
        let body =
            r#"{"PowerControl":[{"Name":"Node Power Control","PowerLimit":{"LimitInWatts":500}}]}"#;
        bmc.on(Method::GET, "/redfish/v1/Chassis/Node0/Power", Canned::json(200, body));
        let node = Arc::new(node_at(bmc.serve().await, "x1000c0s0b0n0"));

        let res = adapter(false).call(&BmcCmd::GetPowerCap, &node).await;
        assert_eq!(res.rc, 0);
        assert_eq!(res.msg, body);
    }

    #[tokio::test]
    async fn test_set_power_cap_patch_uses_etag() {
        let bmc = FakeBmc::new();
        let power = "/redfish/v1/Chassis/Node0/Power";
        bmc.on(
            Method::GET,
            power,
            Canned::json(200, r#"{"@odata.etag":"W/\"42\"","PowerControl":[]}"#),
        );
        bmc.on(Method::PATCH, power, Canned::json(200, "{}"));
        let node = Arc::new(node_at(bmc.serve().await, "x1000c0s0b0n0"));

        let payload = br#"{"PowerControl":[{"PowerLimit":{"LimitInWatts":500}}]}"#.to_vec();
        let cmd = BmcCmd::set_power_cap(payload.clone()).unwrap();
        let res = adapter(false).call(&cmd, &node).await;
        assert_eq!(res.rc, 0);

        let patches = bmc.requests_to(&Method::PATCH, power);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].headers["if-match"], "W/\"42\"");
        assert_eq!(patches[0].body.as_bytes(), payload.as_slice());
    }

    #[tokio::test]
    async fn test_set_power_cap_controls_deep_skips_etag() {
        let bmc = FakeBmc::new();
        let deep = "/redfish/v1/Chassis/Node0/Controls.Deep";
        bmc.on(Method::PATCH, deep, Canned::json(200, "{}"));
        let node = node_at(bmc.serve().await, "x1000c0s0b0n0").with_power_url(deep);

        let cmd = BmcCmd::set_power_cap(br#"{"Members":[]}"#.to_vec()).unwrap();
        let res = adapter(false).call(&cmd, &Arc::new(node)).await;
        assert_eq!(res.rc, 0);
        assert_eq!(bmc.requests().len(), 1);
        assert!(bmc.requests()[0].headers.get("if-match").is_none());
    }

    #[tokio::test]
    async fn test_set_power_cap_apollo_posts_to_target() {
        let bmc = FakeBmc::new();
        let target = concat!(
            "/redfish/v1/Chassis/1/Power/AccPowerService/PowerLimit",
            "/Actions/HpeServerAccPowerLimit.ConfigurePowerLimit"
        );
        bmc.on(Method::POST, target, Canned::json(200, "{}"));
        let mut node = node_at(bmc.serve().await, "x3000c0s9b0n0");
        node.rf_power_url = "/redfish/v1/Chassis/1/Power/AccPowerService/PowerLimit".into();
        node.rf_power_target = target.into();
        let node = Arc::new(node.with_detected_capabilities());

        let cmd = BmcCmd::set_power_cap(br#"{"PowerLimits":[]}"#.to_vec()).unwrap();
        let res = adapter(false).call(&cmd, &node).await;
        assert_eq!(res.rc, 0);
        assert_eq!(bmc.requests_to(&Method::POST, target).len(), 1);
    }

    #[tokio::test]
    async fn test_simulation_makes_no_calls() {
        let bmc = FakeBmc::new();
        let node = Arc::new(node_at(bmc.serve().await, "x1000c0s0b0n0"));
        let adapter = adapter(true);

        for cmd in [
            BmcCmd::Status,
            BmcCmd::Power(PowerAction::On),
            BmcCmd::GetPowerCap,
            BmcCmd::set_power_cap(b"{}".to_vec()).unwrap(),
        ] {
            let res = adapter.call(&cmd, &node).await;
            assert_eq!(res.rc, 0);
            assert_eq!(res.state, SIMULATION_STATE);
        }
        assert!(bmc.requests().is_empty());
    }

    #[test]
    fn test_war_power_path() {
        assert_eq!(war_power_path("/redfish/v1/Systems/Node0"), "/redfish/v1/Chassis/Node0/Power");
        assert_eq!(
            war_power_path("/redfish/v1/Systems/QSBP82704055"),
            "/redfish/v1/Chassis/RackMount/Baseboard/Power"
        );
    }

    #[test]
    fn test_outlet_number() {
        assert_eq!(outlet_number("x3000m0p0v17"), Some(17));
        assert_eq!(outlet_number("x3000m0p0"), None);
    }
}
