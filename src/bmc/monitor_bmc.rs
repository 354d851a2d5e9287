use crate::bmc::bmc::RedfishAdapter;
use crate::model::{BmcCmd, BmcPowerRc, NodeInfo, POWER_STATE_OFF};
use log::{info, trace};
use std::sync::Arc;
use std::time::Duration;

/// Polls the BMC until the component reports Off. Makes `retries` polls with
/// `sleep` between them, then one last poll after the final sleep.
pub async fn wait_for_off(
    adapter: &RedfishAdapter,
    node: &Arc<NodeInfo>,
    retries: u32,
    sleep: Duration,
) -> BmcPowerRc {
    info!("\tBMC: waiting for {} to be Off", node.xname);

    for attempt in 0..=retries {
        let status = adapter.call(&BmcCmd::Status, node).await;
        trace!("BMC {} poll {attempt}: rc={} state={}", node.xname, status.rc, status.state);

        if status.is_ok() && status.state == POWER_STATE_OFF {
            let mut res = BmcPowerRc::new(node);
            res.rc = 0;
            res.state = POWER_STATE_OFF.to_string();
            return res;
        }

        if attempt < retries {
            tokio::time::sleep(sleep).await;
        }
    }

    info!("\tBMC: {} never reported Off", node.xname);
    let mut res = BmcPowerRc::new(node);
    res.msg = "exceeded retries waiting for component to be Off".to_string();
    res
}
