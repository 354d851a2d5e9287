//! Redfish wire shapes.
//!
//! Only the fields the daemon reads or writes are modelled; everything else
//! in a BMC response is ignored on decode.

use serde::{Deserialize, Serialize};

/// A `Power` resource, or the single `Control` resource behind a
/// `Controls` style power URL.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Power {
    #[serde(rename = "@odata.etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "PowerControl", default, skip_serializing_if = "Vec::is_empty")]
    pub power_control: Vec<PowerControl>,
    /// HPE only. Present when power capping is not licensed.
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(rename = "ActualPowerLimits", default, skip_serializing_if = "Vec::is_empty")]
    pub actual_power_limits: Vec<HpePowerLimit>,
    #[serde(rename = "PowerLimitRanges", default, skip_serializing_if = "Vec::is_empty")]
    pub power_limit_ranges: Vec<serde_json::Value>,
    #[serde(rename = "PowerLimits", default, skip_serializing_if = "Vec::is_empty")]
    pub power_limits: Vec<HpePowerLimit>,
    #[serde(rename = "SetPoint", default, skip_serializing_if = "Option::is_none")]
    pub set_point: Option<i64>,
}

impl Power {
    #[must_use]
    pub fn hpe_limit_count(&self) -> usize {
        self.actual_power_limits.len() + self.power_limit_ranges.len() + self.power_limits.len()
    }
}

/// One element of the legacy indexed `PowerControl` array.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerControl {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "PowerLimit", default, skip_serializing_if = "Option::is_none")]
    pub power_limit: Option<PowerLimit>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLimit {
    /// Always serialized: `null` asks the BMC to leave the slot alone.
    #[serde(rename = "LimitInWatts")]
    pub limit_in_watts: Option<i64>,
}

/// Body of a `PATCH` against a legacy `Power` resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerControlPatch {
    #[serde(rename = "PowerControl")]
    pub power_control: Vec<PowerControl>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpePowerLimit {
    #[serde(rename = "PowerLimitInWatts")]
    pub power_limit_in_watts: Option<i64>,
    #[serde(rename = "ZoneNumber")]
    pub zone_number: Option<i64>,
}

/// Body of the Apollo 6500 `ConfigurePowerLimit` POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpeConfigurePowerLimit {
    #[serde(rename = "PowerLimits")]
    pub power_limits: Vec<HpePowerLimit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    Automatic,
    Disabled,
}

/// One member of a `Controls.Deep` PATCH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfControl {
    #[serde(rename = "@odata.id")]
    pub odata_id: String,
    #[serde(rename = "SetPoint", default, skip_serializing_if = "Option::is_none")]
    pub set_point: Option<i64>,
    #[serde(rename = "ControlMode")]
    pub control_mode: ControlMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlsDeep {
    #[serde(rename = "Members")]
    pub members: Vec<RfControl>,
}

/// Any of the four resources a status call can land on. They all carry an
/// optional `PowerState`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PowerStateResource {
    #[serde(rename = "PowerState", default)]
    pub power_state: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Manager {
    #[serde(rename = "Id", default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetRequest<'a> {
    #[serde(rename = "ResetType")]
    pub reset_type: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerStateRequest<'a> {
    #[serde(rename = "PowerState")]
    pub power_state: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// HPE PDU outlet control body.
#[derive(Debug, Clone, Serialize)]
pub struct HpeOutletRequest {
    #[serde(rename = "OutletNumber")]
    pub outlet_number: u32,
    #[serde(rename = "StartupState")]
    pub startup_state: &'static str,
    #[serde(rename = "Outletname")]
    pub outlet_name: String,
    #[serde(rename = "OnDelay")]
    pub on_delay: u32,
    #[serde(rename = "OffDelay")]
    pub off_delay: u32,
    #[serde(rename = "RebootDelay")]
    pub reboot_delay: u32,
    #[serde(rename = "OutletStatus")]
    pub outlet_status: String,
}

impl HpeOutletRequest {
    #[must_use]
    pub fn new(outlet_number: u32, reset_type: &str) -> Self {
        Self {
            outlet_number,
            startup_state: "on",
            outlet_name: format!("OUTLET{outlet_number}"),
            on_delay: 0,
            off_delay: 0,
            reboot_delay: 5,
            outlet_status: reset_type.to_lowercase(),
        }
    }
}

/// Standard Redfish error body.
#[derive(Debug, Clone, Deserialize)]
pub struct RedfishError {
    pub error: RedfishErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedfishErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(rename = "@Message.ExtendedInfo", default)]
    pub extended_info: Vec<ExtendedInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedInfo {
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "Resolution", default)]
    pub resolution: Option<String>,
}

/// Dell iDRAC error body: `message` is an object rather than a string.
#[derive(Debug, Clone, Deserialize)]
pub struct DellError {
    pub error: DellErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DellErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    pub message: DellMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DellMessage {
    #[serde(default)]
    pub lang: Option<String>,
    pub value: String,
}
