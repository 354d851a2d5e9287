//! Power-cap request validation and payload generation.
//!
//! Three incompatible vendor paradigms sit behind one `{name, value}` API:
//! the indexed Redfish `PowerControl` array, the HPE Apollo 6500 power limit
//! list, and flat `Controls` members patched through `Controls.Deep`. Which
//! one a target gets is decided by its [`PowerCapStyle`], never by the caller.

use crate::bmc::parent_path;
use crate::bmc::redfish::{
    ControlMode, ControlsDeep, HpeConfigurePowerLimit, HpePowerLimit, Power, PowerControl,
    PowerControlPatch, PowerLimit, RfControl,
};
use crate::error::PowerCapError;
use crate::model::{BmcCmd, NodeInfo, PowerCapControl, PowerCapStyle, UNBOUNDED};

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const NODE_POWER_LIMIT: &str = "Node Power Limit";

/// Exactly one payload shape for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerGen {
    PowerControl(Vec<PowerControl>),
    HpePowerLimit(HpeConfigurePowerLimit),
    Controls(ControlsDeep),
}

/// The target to send to and what to send. For `Controls` targets the node
/// is a private copy whose power URL points at `Controls.Deep`.
#[derive(Debug, Clone)]
pub struct GeneratedControls {
    pub node: Arc<NodeInfo>,
    pub gen: PowerGen,
}

fn check_bounds(control: &PowerCapControl, min: i64, max: i64) -> Result<(), PowerCapError> {
    // 0 turns capping off on every vendor, so it ignores the minimum
    if min != UNBOUNDED && control.value < min && control.value != 0 {
        return Err(PowerCapError::BelowMinimum {
            name: control.name.clone(),
            value: control.value,
            min,
        });
    }
    if max != UNBOUNDED && control.value > max {
        return Err(PowerCapError::AboveMaximum {
            name: control.name.clone(),
            value: control.value,
            max,
        });
    }
    Ok(())
}

/// Validates the requested controls against the node's power caps and builds
/// the payload shape the node understands.
///
/// Controls the node does not define are skipped with a notice; duplicates
/// and out-of-bounds values fail the whole request for this node. Returns
/// `Ok(None)` when nothing applicable was requested.
pub fn generate_controls(
    node: &Arc<NodeInfo>,
    controls: &[PowerCapControl],
) -> Result<Option<GeneratedControls>, PowerCapError> {
    let style = node.capabilities.power_cap_style;
    let mut seen = HashSet::new();
    let mut legacy = vec![PowerControl::default(); node.rf_pwr_ctl_cnt];
    let mut members = Vec::new();
    let mut apollo = None;

    for control in controls {
        let Some(cap) = node.power_caps.get(&control.name) else {
            info!("Notice: skipping undefined control for {}: {}", node.xname, control.name);
            continue;
        };

        if !seen.insert(control.name.as_str()) {
            return Err(PowerCapError::Duplicate(control.name.clone()));
        }

        check_bounds(control, cap.min, cap.max)?;

        match style {
            PowerCapStyle::Controls => {
                let member = if control.value > 0 {
                    RfControl {
                        odata_id: cap.path.clone(),
                        set_point: Some(control.value),
                        control_mode: ControlMode::Automatic,
                    }
                } else {
                    RfControl {
                        odata_id: cap.path.clone(),
                        set_point: None,
                        control_mode: ControlMode::Disabled,
                    }
                };
                members.push(member);
            }
            PowerCapStyle::HpeApollo6500 => {
                apollo = Some(HpeConfigurePowerLimit {
                    power_limits: vec![HpePowerLimit {
                        power_limit_in_watts: Some(control.value),
                        zone_number: Some(0),
                    }],
                });
            }
            PowerCapStyle::PowerControl => {
                let len = legacy.len();
                let slot = legacy.get_mut(cap.index).ok_or_else(|| PowerCapError::IndexOutOfRange {
                    name: control.name.clone(),
                    index: cap.index,
                    len,
                })?;
                *slot = PowerControl {
                    name: None,
                    power_limit: Some(PowerLimit {
                        limit_in_watts: Some(control.value),
                    }),
                };
            }
        }
    }

    let generated = match style {
        PowerCapStyle::Controls => {
            let deep = members.first().map(|first| {
                format!("{}/Controls.Deep", parent_path(parent_path(&first.odata_id)))
            });
            deep.map(|deep| GeneratedControls {
                node: Arc::new(node.with_power_url(&deep)),
                gen: PowerGen::Controls(ControlsDeep { members }),
            })
        }
        PowerCapStyle::HpeApollo6500 => apollo.map(|limits| GeneratedControls {
            node: Arc::clone(node),
            gen: PowerGen::HpePowerLimit(limits),
        }),
        PowerCapStyle::PowerControl => {
            if legacy.iter().any(|pc| pc.power_limit.is_some()) {
                Some(GeneratedControls {
                    node: Arc::clone(node),
                    gen: PowerGen::PowerControl(legacy),
                })
            } else {
                None
            }
        }
    };
    Ok(generated)
}

/// Serializes the payload. An empty shape is an internal inconsistency and
/// is refused rather than sent.
pub fn generate_payload(gen: &PowerGen) -> Result<Vec<u8>, PowerCapError> {
    let payload = match gen {
        PowerGen::Controls(deep) => {
            if deep.members.is_empty() {
                return Err(PowerCapError::MissingPowerLimit);
            }
            serde_json::to_vec(deep)?
        }
        PowerGen::HpePowerLimit(limits) => {
            if limits.power_limits.is_empty() {
                return Err(PowerCapError::MissingPowerLimit);
            }
            serde_json::to_vec(limits)?
        }
        PowerGen::PowerControl(power_control) => {
            if power_control.is_empty() {
                return Err(PowerCapError::MissingPowerControl);
            }
            serde_json::to_vec(&PowerControlPatch {
                power_control: power_control.clone(),
            })?
        }
    };
    Ok(payload)
}

/// Validates, generates and wraps the request as a set-power-cap command.
pub fn set_power_cap_command(
    node: &Arc<NodeInfo>,
    controls: &[PowerCapControl],
) -> Result<Option<(Arc<NodeInfo>, BmcCmd)>, PowerCapError> {
    let Some(generated) = generate_controls(node, controls)? else {
        return Ok(None);
    };
    let payload = generate_payload(&generated.gen)?;
    Ok(Some((generated.node, BmcCmd::set_power_cap(payload)?)))
}

/// Turns a get-power-cap reply into `{name, value}` controls. A missing or
/// null limit reads as 0, i.e. uncapped.
pub fn decode_power_caps(
    node: &NodeInfo,
    body: &str,
) -> Result<Vec<PowerCapControl>, PowerCapError> {
    let power: Power = serde_json::from_str(body)?;

    if power.error.is_some() {
        warn!(
            "{} {}: Invalid license for power capping for {} ({})",
            node.bmc_type, node.bmc_fqdn, node.xname, node.hostname
        );
        return Err(PowerCapError::InvalidLicense);
    }

    if power.power_control.is_empty() && power.hpe_limit_count() == 0 && node.rf_controls_cnt == 0 {
        warn!(
            "{} {}: No Redfish power control data for {}",
            node.bmc_type, node.bmc_fqdn, node.xname
        );
        return Err(PowerCapError::NoPowerData);
    }

    let controls: Vec<PowerCapControl> = if node.rf_controls_cnt > 0 {
        vec![PowerCapControl {
            name: power.name.unwrap_or_default(),
            value: power.set_point.unwrap_or(0),
        }]
    } else if power.hpe_limit_count() > 0 {
        power
            .power_limits
            .iter()
            .map(|pl| PowerCapControl::new(NODE_POWER_LIMIT, pl.power_limit_in_watts.unwrap_or(0)))
            .collect()
    } else {
        power
            .power_control
            .iter()
            .map(|pc| {
                let name = if node.capabilities.hpe_server {
                    NODE_POWER_LIMIT.to_string()
                } else {
                    pc.name.clone().unwrap_or_default()
                };
                let value = pc
                    .power_limit
                    .as_ref()
                    .and_then(|pl| pl.limit_in_watts)
                    .unwrap_or(0);
                PowerCapControl { name, value }
            })
            .collect()
    };

    if controls.is_empty() {
        return Err(PowerCapError::NoPowerData);
    }
    Ok(controls)
}

/// `Controls` style targets keep each control behind its own URL. Yields
/// one descriptor per control so each can be read; the node power limit
/// takes the original's place.
#[must_use]
pub fn expand_power_urls(node: &Arc<NodeInfo>) -> Vec<Arc<NodeInfo>> {
    if node.rf_controls_cnt == 0 {
        return vec![Arc::clone(node)];
    }

    let mut caps: Vec<_> = node.power_caps.values().collect();
    caps.sort_by(|a, b| a.name.cmp(&b.name));

    let mut primary = Arc::clone(node);
    let mut extra = Vec::new();
    for cap in caps {
        if cap.name == NODE_POWER_LIMIT {
            primary = Arc::new(node.with_power_url(&cap.path));
        } else {
            extra.push(Arc::new(node.with_power_url(&cap.path)));
        }
    }

    let mut nodes = vec![primary];
    nodes.extend(extra);
    nodes
}

/// Bounds of one named control, as reported by capabilities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ControlCapability {
    pub name: String,
    pub min: i64,
    pub max: i64,
}

/// Targets sharing an identical set of power-cap controls and bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerCapGroup {
    pub name: String,
    pub host_limit_min: i64,
    pub host_limit_max: i64,
    pub xnames: Vec<String>,
    pub nids: Vec<i64>,
    pub controls: Vec<ControlCapability>,
}

/// The control that bounds the whole host: the node power limit when the
/// target has one, otherwise the first entry of its `PowerControl` array.
fn host_limits(node: &NodeInfo) -> (i64, i64) {
    let host = node.power_caps.get(NODE_POWER_LIMIT).or_else(|| {
        node.power_caps
            .values()
            .min_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)))
    });
    host.map_or((UNBOUNDED, UNBOUNDED), |cap| (cap.min, cap.max))
}

/// Groups targets by identical control sets. Controls, xnames and nids are
/// sorted within a group; groups are ordered by their first xname and named
/// `group0`, `group1`, ... in that order. Targets without controls are left
/// out.
#[must_use]
pub fn capabilities(nodes: &[Arc<NodeInfo>]) -> Vec<PowerCapGroup> {
    let mut by_controls: BTreeMap<Vec<ControlCapability>, Vec<&Arc<NodeInfo>>> = BTreeMap::new();
    for node in nodes {
        if node.power_caps.is_empty() {
            debug!("{}: no power-cap controls", node.xname);
            continue;
        }
        let mut controls: Vec<ControlCapability> = node
            .power_caps
            .values()
            .map(|cap| ControlCapability {
                name: cap.name.clone(),
                min: cap.min,
                max: cap.max,
            })
            .collect();
        controls.sort();
        by_controls.entry(controls).or_default().push(node);
    }

    let mut groups: Vec<PowerCapGroup> = by_controls
        .into_iter()
        .map(|(controls, members)| {
            let (host_limit_min, host_limit_max) = host_limits(members[0]);
            let mut xnames: Vec<String> = members.iter().map(|n| n.xname.clone()).collect();
            xnames.sort();
            xnames.dedup();
            let mut nids: Vec<i64> = members.iter().map(|n| n.nid).collect();
            nids.sort_unstable();
            nids.dedup();
            PowerCapGroup {
                name: String::new(),
                host_limit_min,
                host_limit_max,
                xnames,
                nids,
                controls,
            }
        })
        .collect();

    groups.sort_by(|a, b| a.xnames.cmp(&b.xnames));
    for (index, group) in groups.iter_mut().enumerate() {
        group.name = format!("group{index}");
    }
    groups
}
