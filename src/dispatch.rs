//! Fan-out of one logical command to many BMCs and fan-in of the results.

use crate::bmc::RedfishAdapter;
use crate::jobs::{Job, JobState, JobStatus, JobType, WorkerPool};
use crate::model::{BmcCmd, BmcPowerRc, NodeInfo};

use async_trait::async_trait;
use log::{debug, error, trace};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything one job needs: what to run, against whom, where to report.
pub struct BmcCall {
    pub cmd: BmcCmd,
    pub node: Arc<NodeInfo>,
    pub rsp: mpsc::Sender<BmcPowerRc>,
}

/// Job that performs a single BMC call and reports exactly one result. A job
/// dropped before it ran (cancelled, or discarded by a stopping pool) reports
/// rc -1 from its destructor.
pub struct JobBmcPwr {
    call: BmcCall,
    adapter: RedfishAdapter,
    state: JobState,
    reported: bool,
}

impl JobBmcPwr {
    #[must_use]
    pub fn new(call: BmcCall, adapter: RedfishAdapter) -> Self {
        Self {
            call,
            adapter,
            state: JobState::new(),
            reported: false,
        }
    }
}

impl Drop for JobBmcPwr {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        let mut res = BmcPowerRc::new(&self.call.node);
        res.msg = match self.state.status().0 {
            JobStatus::Cancelled => "job cancelled".to_string(),
            _ => "worker pool stopped".to_string(),
        };
        debug!("{}: {}", self.call.node.xname, res.msg);
        if self.call.rsp.try_send(res).is_err() {
            trace!("{}: no room to report dropped job", self.call.node.xname);
        }
    }
}

#[async_trait]
impl Job for JobBmcPwr {
    fn job_type(&self) -> JobType {
        JobType::BmcPower
    }

    async fn run(&mut self) {
        let res = self.adapter.call(&self.call.cmd, &self.call.node).await;
        trace!("{} {}: {res}", self.call.cmd, self.call.node.xname);
        self.reported = true;
        if self.call.rsp.send(res).await.is_err() {
            error!("{}: result receiver went away", self.call.node.xname);
            self.state.set(JobStatus::Error, Some("result receiver closed".to_string()));
        }
    }

    fn status(&self) -> (JobStatus, Option<String>) {
        let (status, err) = self.state.status();
        (status, err.map(str::to_string))
    }

    fn set_status(&mut self, status: JobStatus, err: Option<String>) -> JobStatus {
        self.state.set(status, err)
    }

    fn cancel(&mut self) -> JobStatus {
        self.state.cancel()
    }
}

/// Turns target lists into pool jobs.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    adapter: RedfishAdapter,
}

impl Dispatcher {
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>, adapter: RedfishAdapter) -> Self {
        Self { pool, adapter }
    }

    #[must_use]
    pub fn adapter(&self) -> &RedfishAdapter {
        &self.adapter
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    async fn submit(
        &self,
        cmd: BmcCmd,
        node: &Arc<NodeInfo>,
        rsp: &mpsc::Sender<BmcPowerRc>,
    ) -> bool {
        let call = BmcCall {
            cmd,
            node: Arc::clone(node),
            rsp: rsp.clone(),
        };
        let job = Box::new(JobBmcPwr::new(call, self.adapter.clone()));
        match self.pool.submit(job).await {
            Ok(()) => true,
            Err(e) => {
                error!("{}: unable to queue BMC call: {e}", node.xname);
                false
            }
        }
    }

    /// One job per node, all running the same command. Returns the number of
    /// results to expect and the channel they arrive on.
    pub async fn dispatch(
        &self,
        cmd: &BmcCmd,
        nodes: &[Arc<NodeInfo>],
    ) -> (usize, mpsc::Receiver<BmcPowerRc>) {
        let (tx, rx) = mpsc::channel(nodes.len().max(1));
        let mut submitted = 0;
        for node in nodes {
            if self.submit(cmd.clone(), node, &tx).await {
                submitted += 1;
            }
        }
        (submitted, rx)
    }

    /// One job per node, each running the command mapped to its xname. Nodes
    /// without a command are skipped and not counted.
    pub async fn dispatch_map(
        &self,
        cmds: &HashMap<String, BmcCmd>,
        nodes: &[Arc<NodeInfo>],
    ) -> (usize, mpsc::Receiver<BmcPowerRc>) {
        let (tx, rx) = mpsc::channel(nodes.len().max(1));
        let mut submitted = 0;
        for node in nodes {
            let Some(cmd) = cmds.get(&node.xname) else {
                error!("no BMC command for {}", node.hostname);
                continue;
            };
            if self.submit(cmd.clone(), node, &tx).await {
                submitted += 1;
            }
        }
        (submitted, rx)
    }

    /// Dispatches and waits for every result.
    pub async fn run(&self, cmd: &BmcCmd, nodes: &[Arc<NodeInfo>]) -> Vec<BmcPowerRc> {
        let (count, rx) = self.dispatch(cmd, nodes).await;
        collect(count, rx).await
    }
}

/// Reads `count` results. Every submitted job answers exactly once, so this
/// only stops early if a result could not be delivered.
pub async fn collect(count: usize, mut rx: mpsc::Receiver<BmcPowerRc>) -> Vec<BmcPowerRc> {
    let mut results = Vec::with_capacity(count);
    while results.len() < count {
        match rx.recv().await {
            Some(res) => results.push(res),
            None => {
                error!("expected {count} BMC results, got {}", results.len());
                break;
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::fake_bmc::{node_at, Canned, FakeBmc};
    use crate::bmc::ClientProvider;
    use crate::config::Config;
    use crate::model::PowerAction;
    use axum::http::Method;
    use std::collections::HashSet;
    use std::time::Duration;

    fn dispatcher(workers: usize, depth: usize) -> Dispatcher {
        let clients = ClientProvider::new(Duration::from_secs(5), None).unwrap();
        let adapter = RedfishAdapter::new(Arc::new(clients), Arc::new(Config::default()), false)
            .with_scheme("http");
        let pool = Arc::new(WorkerPool::new(workers, depth));
        pool.start();
        Dispatcher::new(pool, adapter)
    }

    #[tokio::test]
    async fn test_n_targets_give_n_results() {
        let good = FakeBmc::new();
        good.on(
            Method::GET,
            "/redfish/v1/Systems/Node0",
            Canned::json(200, r#"{"PowerState":"On"}"#),
        );
        let good_addr = good.serve().await;
        let bad = FakeBmc::new();
        bad.on(Method::GET, "/redfish/v1/Systems/Node0", Canned::json(500, "{}"));
        let bad_addr = bad.serve().await;

        let mut nodes: Vec<Arc<NodeInfo>> = (0..4)
            .map(|n| Arc::new(node_at(good_addr, &format!("x1000c0s{n}b0n0"))))
            .collect();
        nodes.push(Arc::new(node_at(bad_addr, "x1000c0s9b0n0")));
        nodes.push(Arc::new(NodeInfo {
            xname: "x1000c0s8b0n0".into(),
            ..Default::default()
        }));

        let results = dispatcher(2, 1).run(&BmcCmd::Status, &nodes).await;
        assert_eq!(results.len(), nodes.len());

        let names: HashSet<_> = results.iter().map(|r| r.node.xname.clone()).collect();
        assert_eq!(names.len(), nodes.len());

        let failed: Vec<_> = results
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| r.node.xname.as_str())
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.contains(&"x1000c0s9b0n0"));
        assert!(failed.contains(&"x1000c0s8b0n0"));
    }

    #[tokio::test]
    async fn test_dispatch_map_skips_nodes_without_command() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::GET,
            "/redfish/v1/Systems/Node0",
            Canned::json(200, r#"{"PowerState":"Off"}"#),
        );
        bmc.on(
            Method::POST,
            "/redfish/v1/Systems/Node0/Actions/ComputerSystem.Reset",
            Canned::json(204, ""),
        );
        let addr = bmc.serve().await;

        let nodes: Vec<Arc<NodeInfo>> = ["x1000c0s0b0n0", "x1000c0s0b0n1", "x1000c0s0b0n2"]
            .iter()
            .map(|x| Arc::new(node_at(addr, x)))
            .collect();
        let mut cmds = HashMap::new();
        cmds.insert("x1000c0s0b0n0".to_string(), BmcCmd::Status);
        cmds.insert("x1000c0s0b0n1".to_string(), BmcCmd::Power(PowerAction::On));

        let dispatcher = dispatcher(4, 4);
        let (count, rx) = dispatcher.dispatch_map(&cmds, &nodes).await;
        assert_eq!(count, 2);
        let results = collect(count, rx).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(BmcPowerRc::is_ok));
    }

    #[tokio::test]
    async fn test_saturated_pool_still_completes() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::GET,
            "/redfish/v1/Systems/Node0",
            Canned::json(200, r#"{"PowerState":"On"}"#),
        );
        let addr = bmc.serve().await;
        let nodes: Vec<Arc<NodeInfo>> = (0..3)
            .map(|n| Arc::new(node_at(addr, &format!("x1000c0s0b0n{n}"))))
            .collect();

        let results = tokio::time::timeout(
            Duration::from_secs(10),
            dispatcher(1, 1).run(&BmcCmd::Status, &nodes),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.state == "On"));
    }

    #[tokio::test]
    async fn test_stop_answers_queued_jobs() {
        let clients = ClientProvider::new(Duration::from_secs(5), None).unwrap();
        let adapter = RedfishAdapter::new(Arc::new(clients), Arc::new(Config::default()), false);
        // never started, so every job is still queued when the pool stops
        let pool = Arc::new(WorkerPool::new(2, 4));
        let dispatcher = Dispatcher::new(Arc::clone(&pool), adapter);
        let nodes: Vec<Arc<NodeInfo>> = (0..3)
            .map(|n| {
                Arc::new(NodeInfo {
                    xname: format!("x1000c0s{n}b0n0"),
                    ..Default::default()
                })
            })
            .collect();

        let (count, rx) = dispatcher.dispatch(&BmcCmd::Status, &nodes).await;
        assert_eq!(count, 3);
        pool.stop();

        let results = tokio::time::timeout(Duration::from_secs(3), collect(count, rx))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.rc == -1 && r.msg == "worker pool stopped"));
    }

    #[tokio::test]
    async fn test_stop_with_running_workers_answers_in_flight_calls() {
        let bmc = FakeBmc::new();
        bmc.on(
            Method::GET,
            "/redfish/v1/Systems/Node0",
            Canned::json(200, r#"{"PowerState":"On"}"#).delayed(Duration::from_secs(30)),
        );
        let addr = bmc.serve().await;
        let nodes: Vec<Arc<NodeInfo>> = (0..3)
            .map(|n| Arc::new(node_at(addr, &format!("x1000c0s{n}b0n0"))))
            .collect();

        let dispatcher = dispatcher(1, 4);
        let (count, rx) = dispatcher.dispatch(&BmcCmd::Status, &nodes).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        dispatcher.pool().stop();

        let results = tokio::time::timeout(Duration::from_secs(5), collect(count, rx))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.rc == -1));
    }
}
