//! Multi-component power transitions: component-type sequencing, restart
//! emulation and waiting for components to reach Off.

use crate::bmc::monitor_bmc::wait_for_off;
use crate::config::OnUnsupportedAction;
use crate::dispatch::Dispatcher;
use crate::model::{
    BmcCmd, BmcPowerRc, ComponentType, NodeInfo, PowerAction, POWER_STATE_OFF, POWER_STATE_ON,
};
use crate::orderer::{dispatch_rounds, reorder, Inventory};

use log::{error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

type ActionMap = HashMap<PowerAction, HashMap<ComponentType, Vec<Arc<NodeInfo>>>>;

/// Outcome of one sequenced power request.
#[derive(Debug, Default)]
pub struct SequenceReport {
    /// Every per-target outcome, in completion order. A restart emulated as
    /// Off then On contributes one result per step.
    pub results: Vec<BmcPowerRc>,
    pub failures: usize,
    /// Distinct targets that were attempted
    pub total: usize,
    pub err_msg: Option<String>,
}

impl SequenceReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.err_msg.is_none()
    }

    fn fail(&mut self, res: BmcPowerRc) {
        self.failures += 1;
        self.results.push(res);
    }
}

pub struct PowerSequencer {
    dispatcher: Dispatcher,
    inventory: Option<Arc<dyn Inventory>>,
}

impl PowerSequencer {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            inventory: None,
        }
    }

    /// Enables dependent-component ordering for on and off requests.
    #[must_use]
    pub fn with_inventory(mut self, inventory: Arc<dyn Inventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    fn local_result(node: &Arc<NodeInfo>, rc: i32, msg: String) -> BmcPowerRc {
        let mut res = BmcPowerRc::new(node);
        res.rc = rc;
        res.msg = msg;
        res
    }

    /// Files each node under the actions it needs. Nodes that cannot take
    /// part are reported in `report`.
    fn sort_actions(
        &self,
        nodes: &[Arc<NodeInfo>],
        action: PowerAction,
        report: &mut SequenceReport,
    ) -> ActionMap {
        let config = self.dispatcher.adapter().config();
        let mut actions: ActionMap = HashMap::new();

        for node in nodes {
            let sequence = config.comp_seq(action);
            if sequence.is_empty() {
                let msg = format!("no power controls for {action} operation");
                error!("{msg}");
                report.fail(Self::local_result(node, -1, msg));
                continue;
            }
            if !node.role.is_empty() && config.block_roles(action).contains(&node.role) {
                let msg = format!(
                    "Skipping {}: Role, '{}', is blocked for '{action}'",
                    node.xname, node.role
                );
                info!("{msg}");
                report.fail(Self::local_result(node, -1, msg));
                continue;
            }
            if !sequence.contains(&node.component_type) {
                let msg = format!(
                    "Skipping {}: Type, '{}', not defined in power sequence for '{action}'",
                    node.xname, node.component_type
                );
                info!("{msg}");
                report.fail(Self::local_result(node, -1, msg));
                continue;
            }
            report.total += 1;

            let steps = if action.is_restart() {
                match config.reset_type(action, &node.rf_reset_types) {
                    Ok(_) => vec![action],
                    Err(e) => match config.capmc.on_unsupported_action {
                        OnUnsupportedAction::Simulate => emulated_restart(action),
                        OnUnsupportedAction::Error => {
                            let msg = format!("{} {}: {e}", node.bmc_type, node.bmc_fqdn);
                            report.fail(Self::local_result(node, -1, msg));
                            continue;
                        }
                        OnUnsupportedAction::Ignore => {
                            let msg = format!("Ignored: {} {}: {e}", node.bmc_type, node.bmc_fqdn);
                            info!("{}: {msg}", node.xname);
                            report.results.push(Self::local_result(node, 0, msg));
                            continue;
                        }
                    },
                }
            } else {
                vec![action]
            };

            for step in steps {
                actions
                    .entry(step)
                    .or_default()
                    .entry(node.component_type.clone())
                    .or_default()
                    .push(Arc::clone(node));
            }
        }
        actions
    }

    /// Puts `nodes` in dependency order and adds the boards their router
    /// modules power. A board the inventory cannot describe fails the request.
    async fn with_dependents(
        &self,
        nodes: &[Arc<NodeInfo>],
        action: PowerAction,
        inventory: &dyn Inventory,
        report: &mut SequenceReport,
    ) -> Vec<Arc<NodeInfo>> {
        let xnames: Vec<String> = nodes.iter().map(|n| n.xname.clone()).collect();
        let mut by_name: HashMap<&str, &Arc<NodeInfo>> =
            nodes.iter().map(|n| (n.xname.as_str(), n)).collect();

        let mut ordered = Vec::with_capacity(nodes.len());
        for xname in reorder(&xnames, action, inventory).await {
            if let Some(node) = by_name.remove(xname.as_str()) {
                ordered.push(Arc::clone(node));
                continue;
            }
            match inventory.component(&xname).await {
                Some(node) => ordered.push(Arc::new(node.with_detected_capabilities())),
                None => {
                    let msg =
                        format!("Skipping {xname}: dependent component not found in inventory");
                    warn!("{msg}");
                    let missing = Arc::new(NodeInfo {
                        xname,
                        ..Default::default()
                    });
                    report.fail(Self::local_result(&missing, -1, msg));
                }
            }
        }
        ordered
    }

    /// Runs `action` across `nodes`: actions in the configured reinit order,
    /// component types in the configured sequence, one awaited dispatch
    /// round per type. A target that fails is dropped from later actions.
    ///
    /// With an inventory attached, router modules pull in their boards and
    /// a board never shares a dispatch round with its module.
    pub async fn run(&self, nodes: &[Arc<NodeInfo>], action: PowerAction) -> SequenceReport {
        let mut report = SequenceReport::default();
        let nodes = match &self.inventory {
            Some(inventory) => {
                self.with_dependents(nodes, action, inventory.as_ref(), &mut report)
                    .await
            }
            None => nodes.to_vec(),
        };
        let actions = self.sort_actions(&nodes, action, &mut report);

        if report.failures > 0 {
            report.err_msg = Some(format!(
                "Errors encountered with {} components for {action}",
                report.failures
            ));
            return report;
        }

        let config = self.dispatcher.adapter().config();
        let mut failed: HashSet<String> = HashSet::new();

        for step in &config.capmc.reinit_action_seq {
            let Some(by_type) = actions.get(step) else {
                continue;
            };
            for ctype in config.comp_seq(*step) {
                let Some(list) = by_type.get(ctype) else {
                    continue;
                };
                let targets: Vec<Arc<NodeInfo>> = list
                    .iter()
                    .filter(|n| !failed.contains(&n.xname))
                    .cloned()
                    .collect();
                if targets.is_empty() {
                    continue;
                }

                info!("{step}: {} {ctype} target(s)", targets.len());
                let xnames: Vec<String> = targets.iter().map(|n| n.xname.clone()).collect();
                for round in dispatch_rounds(&xnames) {
                    let round: HashSet<String> = round.into_iter().collect();
                    let batch: Vec<Arc<NodeInfo>> = targets
                        .iter()
                        .filter(|n| round.contains(&n.xname))
                        .cloned()
                        .collect();
                    self.run_round(*step, &batch, &mut failed, &mut report).await;
                }
            }
        }

        if report.failures > 0 {
            report.err_msg = Some(format!(
                "Errors encountered with {}/{} Xnames issued {action}",
                report.failures, report.total
            ));
            warn!("{action}: {} of {} targets failed", report.failures, report.total);
        }
        report
    }

    /// Dispatches `step` to `targets` and, for Off steps, waits for each
    /// success to reach Off.
    async fn run_round(
        &self,
        step: PowerAction,
        targets: &[Arc<NodeInfo>],
        failed: &mut HashSet<String>,
        report: &mut SequenceReport,
    ) {
        let adapter = self.dispatcher.adapter();
        let config = adapter.config();
        let results = self.dispatcher.run(&BmcCmd::Power(step), targets).await;

        let mut waiting = JoinSet::new();
        for res in results {
            if !res.is_ok() {
                failed.insert(res.node.xname.clone());
                report.fail(res);
                continue;
            }
            if step.is_off() && !adapter.simulation_only() {
                let adapter = adapter.clone();
                let retries = config.capmc.wait_for_off_retries;
                let sleep = config.capmc.wait_for_off_sleep();
                waiting.spawn(async move {
                    wait_for_off(&adapter, &res.node, retries, sleep).await
                });
            } else {
                report.results.push(res);
            }
        }

        while let Some(joined) = waiting.join_next().await {
            match joined {
                Ok(res) if res.is_ok() => report.results.push(res),
                Ok(res) => {
                    failed.insert(res.node.xname.clone());
                    report.fail(res);
                }
                Err(e) => {
                    error!("wait for off task failed: {e}");
                    report.failures += 1;
                }
            }
        }
    }

    /// Power state of every node.
    pub async fn status(&self, nodes: &[Arc<NodeInfo>]) -> StatusReport {
        status_report(&self.dispatcher.run(&BmcCmd::Status, nodes).await)
    }
}

/// A restart the target cannot do itself, as Off then On.
fn emulated_restart(action: PowerAction) -> Vec<PowerAction> {
    if action == PowerAction::ForceRestart {
        vec![PowerAction::ForceOff, PowerAction::ForceOn]
    } else {
        vec![PowerAction::Off, PowerAction::On]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub xname: String,
    pub rc: i32,
    pub msg: String,
}

/// Status results bucketed by power state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub on: Vec<String>,
    pub off: Vec<String>,
    pub undefined: Vec<String>,
    pub errors: Vec<StatusError>,
}

#[must_use]
pub fn status_report(results: &[BmcPowerRc]) -> StatusReport {
    let mut report = StatusReport::default();
    for res in results {
        let xname = res.node.xname.clone();
        if !res.is_ok() {
            report.errors.push(StatusError {
                xname,
                rc: res.rc,
                msg: res.msg.clone(),
            });
            continue;
        }
        match res.state.as_str() {
            POWER_STATE_ON => report.on.push(xname),
            POWER_STATE_OFF => report.off.push(xname),
            _ => report.undefined.push(xname),
        }
    }
    report.on.sort();
    report.off.sort();
    report.undefined.sort();
    report.errors.sort_by(|a, b| a.xname.cmp(&b.xname));
    report
}
