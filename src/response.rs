use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct WorkerPoolHealth {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queued: usize,
    pub running: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub simulation_only: bool,
    pub worker_pool: WorkerPoolHealth,
}
