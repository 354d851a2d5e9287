use crate::error::PowerCapError;

use enum_iterator::Sequence;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const POWER_STATE_ON: &str = "On";
pub const POWER_STATE_OFF: &str = "Off";
pub const STATE_UNKNOWN: &str = "Unknown";
pub const SIMULATION_STATE: &str = "Simulation only - request not sent to hardware";

/// `min`/`max` value meaning "no bound".
pub const UNBOUNDED: i64 = -1;

/// Logical power transitions a caller can request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Sequence, Serialize, Deserialize)]
pub enum PowerAction {
    On,
    Off,
    ForceOn,
    ForceOff,
    Restart,
    ForceRestart,
    #[serde(rename = "NMI")]
    Nmi,
}

impl PowerAction {
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, PowerAction::On | PowerAction::ForceOn)
    }

    #[must_use]
    pub fn is_off(self) -> bool {
        matches!(self, PowerAction::Off | PowerAction::ForceOff)
    }

    #[must_use]
    pub fn is_restart(self) -> bool {
        matches!(self, PowerAction::Restart | PowerAction::ForceRestart)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::On => "On",
            PowerAction::Off => "Off",
            PowerAction::ForceOn => "ForceOn",
            PowerAction::ForceOff => "ForceOff",
            PowerAction::Restart => "Restart",
            PowerAction::ForceRestart => "ForceRestart",
            PowerAction::Nmi => "NMI",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        enum_iterator::all::<PowerAction>()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown power action: {s}"))
    }
}

/// One command issued against one target.
///
/// The set-power-cap payload is the pre-built Redfish body; it only exists on
/// that variant and is never empty.
#[derive(Clone, PartialEq, Eq)]
pub enum BmcCmd {
    Status,
    Power(PowerAction),
    GetPowerCap,
    SetPowerCap(Vec<u8>),
}

impl BmcCmd {
    pub fn set_power_cap(payload: Vec<u8>) -> Result<Self, PowerCapError> {
        if payload.is_empty() {
            return Err(PowerCapError::MissingPowerControl);
        }
        Ok(BmcCmd::SetPowerCap(payload))
    }
}

impl fmt::Display for BmcCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BmcCmd::Status => f.write_str("Status"),
            BmcCmd::Power(action) => write!(f, "{action}"),
            BmcCmd::GetPowerCap => f.write_str("GetPowerCap"),
            BmcCmd::SetPowerCap(_) => f.write_str("SetPowerCap"),
        }
    }
}

impl fmt::Debug for BmcCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BmcCmd::SetPowerCap(payload) => {
                write!(f, "SetPowerCap({})", String::from_utf8_lossy(payload))
            }
            other => write!(f, "{other}"),
        }
    }
}

/// The Redfish resource shape behind a target's base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RedfishType {
    ComputerSystem,
    Chassis,
    Manager,
    Outlet,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RedfishType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RedfishType::ComputerSystem => "ComputerSystem",
            RedfishType::Chassis => "Chassis",
            RedfishType::Manager => "Manager",
            RedfishType::Outlet => "Outlet",
            RedfishType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Hardware component type, as reported by the inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentType {
    #[default]
    Node,
    ComputeModule,
    HSNBoard,
    RouterModule,
    Chassis,
    CabinetPDUOutlet,
    CabinetPDUPowerConnector,
    Other(String),
}

impl ComponentType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ComponentType::Node => "Node",
            ComponentType::ComputeModule => "ComputeModule",
            ComponentType::HSNBoard => "HSNBoard",
            ComponentType::RouterModule => "RouterModule",
            ComponentType::Chassis => "Chassis",
            ComponentType::CabinetPDUOutlet => "CabinetPDUOutlet",
            ComponentType::CabinetPDUPowerConnector => "CabinetPDUPowerConnector",
            ComponentType::Other(name) => name,
        }
    }

    /// `CabinetPDUOutlet` is the deprecated name for `CabinetPDUPowerConnector`.
    #[must_use]
    pub fn is_pdu_outlet(&self) -> bool {
        matches!(
            self,
            ComponentType::CabinetPDUOutlet | ComponentType::CabinetPDUPowerConnector
        )
    }
}

impl From<String> for ComponentType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Node" => ComponentType::Node,
            "ComputeModule" => ComponentType::ComputeModule,
            "HSNBoard" => ComponentType::HSNBoard,
            "RouterModule" => ComponentType::RouterModule,
            "Chassis" => ComponentType::Chassis,
            "CabinetPDUOutlet" => ComponentType::CabinetPDUOutlet,
            "CabinetPDUPowerConnector" => ComponentType::CabinetPDUPowerConnector,
            _ => ComponentType::Other(name),
        }
    }
}

impl From<ComponentType> for String {
    fn from(ctype: ComponentType) -> Self {
        ctype.as_str().to_string()
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the three power capping paradigms a target speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerCapStyle {
    /// Indexed Redfish `Power.PowerControl` array, PATCHed with an etag.
    #[default]
    PowerControl,
    /// HPE Apollo 6500 `AccPowerService` power limits, POSTed.
    HpeApollo6500,
    /// Flat `Controls` members, PATCHed through `Controls.Deep`.
    Controls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PduVendor {
    /// HPE PDUs need a session token before an outlet can be switched.
    Hpe,
    /// ServerTech (`rts` hosted) PDUs take a bare `PowerState` body.
    ServerTech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub power_cap_style: PowerCapStyle,
    pub hpe_server: bool,
    pub pdu: Option<PduVendor>,
}

impl Capabilities {
    /// Derives capability flags from the raw inventory strings. This is the
    /// only place vendor naming heuristics are applied.
    #[must_use]
    pub fn detect(
        component_type: &ComponentType,
        power_url: &str,
        bmc_fqdn: &str,
        controls_count: usize,
    ) -> Self {
        let power_cap_style = if controls_count > 0 {
            PowerCapStyle::Controls
        } else if power_url.contains("AccPowerService/PowerLimit") {
            PowerCapStyle::HpeApollo6500
        } else {
            PowerCapStyle::PowerControl
        };

        let pdu = if component_type.is_pdu_outlet() {
            if bmc_fqdn.contains("rts") {
                Some(PduVendor::ServerTech)
            } else {
                Some(PduVendor::Hpe)
            }
        } else {
            None
        };

        Self {
            power_cap_style,
            hpe_server: power_url.contains("Chassis/1/Power"),
            pdu,
        }
    }
}

/// Maps one named power-cap control onto its Redfish resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerCap {
    /// Redfish name of the control, e.g. "Node Power Control"
    pub name: String,
    /// URI of the Redfish resource
    pub path: String,
    pub min: i64,
    pub max: i64,
    /// Position in the vendor's `PowerControl` array
    pub index: usize,
}

impl Default for PowerCap {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            min: UNBOUNDED,
            max: UNBOUNDED,
            index: 0,
        }
    }
}

/// Everything needed to reach and drive one component's BMC.
///
/// Built once from the inventory lookup and shared read-only between jobs.
/// Overrides are expressed as new values (see [`NodeInfo::with_power_url`]).
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub xname: String,
    pub hostname: String,
    pub nid: i64,
    pub role: String,
    pub component_type: ComponentType,
    pub bmc_fqdn: String,
    pub bmc_user: String,
    pub bmc_pass: String,
    pub bmc_type: String,
    pub bmc_path: String,
    pub rf_type: RedfishType,
    pub rf_action_uri: String,
    pub rf_reset_types: Vec<String>,
    pub rf_power_url: String,
    pub rf_power_target: String,
    pub rf_pwr_ctl_cnt: usize,
    pub rf_controls_cnt: usize,
    pub power_caps: HashMap<String, PowerCap>,
    pub capabilities: Capabilities,
}

impl NodeInfo {
    /// Fills in the capability flags from the raw fields.
    #[must_use]
    pub fn with_detected_capabilities(mut self) -> Self {
        self.capabilities = Capabilities::detect(
            &self.component_type,
            &self.rf_power_url,
            &self.bmc_fqdn,
            self.rf_controls_cnt,
        );
        self
    }

    /// A private copy pointing at a different power resource.
    #[must_use]
    pub fn with_power_url(&self, power_url: &str) -> NodeInfo {
        let mut copy = self.clone();
        copy.rf_power_url = power_url.to_string();
        copy
    }
}

impl fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInfo")
            .field("xname", &self.xname)
            .field("nid", &self.nid)
            .field("component_type", &self.component_type)
            .field("bmc_fqdn", &self.bmc_fqdn)
            .field("bmc_user", &self.bmc_user)
            .field("bmc_pass", &"****")
            .field("bmc_type", &self.bmc_type)
            .field("rf_type", &self.rf_type)
            .field("rf_power_url", &self.rf_power_url)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// A requested or reported power-cap control value. 0 means uncapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerCapControl {
    pub name: String,
    #[serde(rename = "val")]
    pub value: i64,
}

impl PowerCapControl {
    #[must_use]
    pub fn new(name: &str, value: i64) -> Self {
        Self { name: name.to_string(), value }
    }
}

/// The single result every BMC job produces.
///
/// `rc` is 0 on success, -1 for local failures and the HTTP status for
/// anything the BMC rejected.
#[derive(Debug, Clone)]
pub struct BmcPowerRc {
    pub node: Arc<NodeInfo>,
    pub rc: i32,
    pub msg: String,
    pub state: String,
}

impl BmcPowerRc {
    #[must_use]
    pub fn new(node: &Arc<NodeInfo>) -> Self {
        Self {
            node: Arc::clone(node),
            rc: -1,
            msg: String::new(),
            state: STATE_UNKNOWN.to_string(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.rc == 0
    }
}

impl fmt::Display for BmcPowerRc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rc={} state={}", self.node.xname, self.rc, self.state)?;
        if !self.msg.is_empty() {
            write!(f, " msg={}", self.msg)?;
        }
        Ok(())
    }
}
