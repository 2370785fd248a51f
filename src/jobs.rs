use crate::ebay::SyncReport;
use crate::models::ApiError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, future::Future, sync::Arc, time::Instant};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    InventorySync,
}

impl JobKind {
    fn as_str(&self) -> &'static str {
        match self {
            JobKind::InventorySync => "inventory_sync",
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobInfo>>>,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    kind: JobKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: SyncReport },
    Failed { error: String },
}

impl JobState {
    fn is_active(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub kind: JobKind,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    /// Start the single worker. `runner` performs one job of the given kind.
    pub fn spawn<F, Fut>(runner: F) -> (Self, JoinHandle<()>)
    where
        F: Fn(JobKind) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SyncReport, String>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses: Arc<Mutex<HashMap<Uuid, JobInfo>>> = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                set_state(&statuses_bg, job.id, JobState::Running, false).await;
                let started = Instant::now();
                let result = runner(job.kind).await;
                crate::metrics::job_elapsed(job.kind.as_str(), started.elapsed().as_millis());
                let state = match result {
                    Ok(report) => {
                        info!(target = "ops.jobs", id = %job.id, kind = job.kind.as_str(), "job completed");
                        JobState::Completed { result: report }
                    }
                    Err(error) => {
                        warn!(target = "ops.jobs", id = %job.id, kind = job.kind.as_str(), %error, "job failed");
                        JobState::Failed { error }
                    }
                };
                set_state(&statuses_bg, job.id, state, true).await;
            }
        });

        (Self { tx, statuses }, handle)
    }

    /// Queue a job, or hand back the id of an identical job that has not
    /// finished yet.
    pub async fn enqueue(&self, kind: JobKind) -> Result<Uuid, ApiError> {
        let id = {
            let mut guard = self.statuses.lock().await;
            if let Some((existing, _)) = guard
                .iter()
                .find(|(_, info)| info.kind == kind && info.state.is_active())
            {
                return Ok(*existing);
            }
            let id = Uuid::new_v4();
            guard.insert(
                id,
                JobInfo {
                    id: id.to_string(),
                    kind,
                    enqueued_at: Utc::now(),
                    finished_at: None,
                    state: JobState::Queued,
                },
            );
            id
        };
        if self.tx.send(Job { id, kind }).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.statuses.lock().await.get(&id).cloned()
    }
}

async fn set_state(
    statuses: &Mutex<HashMap<Uuid, JobInfo>>,
    id: Uuid,
    state: JobState,
    finished: bool,
) {
    let mut guard = statuses.lock().await;
    if let Some(info) = guard.get_mut(&id) {
        info.state = state;
        if finished {
            info.finished_at = Some(Utc::now());
        }
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn wait_finished(queue: &JobQueue, id: Uuid) -> JobInfo {
        for _ in 0..100 {
            if let Some(info) = queue.get(id).await
                && info.finished_at.is_some()
            {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn completed_job_carries_report() {
        let (queue, _worker) = JobQueue::spawn(|_| async {
            Ok(SyncReport {
                pages: 1,
                fetched: 3,
                upserted: 3,
                skipped: 0,
            })
        });
        let id = queue.enqueue(JobKind::InventorySync).await.unwrap();
        let info = wait_finished(&queue, id).await;
        match info.state {
            JobState::Completed { result } => assert_eq!(result.fetched, 3),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_job_keeps_error() {
        let (queue, _worker) = JobQueue::spawn(|_| async { Err("ebay down".to_string()) });
        let id = queue.enqueue(JobKind::InventorySync).await.unwrap();
        let info = wait_finished(&queue, id).await;
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "ebay down");
        assert_eq!(json["kind"], "inventory_sync");
    }

    #[tokio::test]
    async fn active_job_is_reused() {
        let gate = Arc::new(Notify::new());
        let worker_gate = gate.clone();
        let (queue, _worker) = JobQueue::spawn(move |_| {
            let gate = worker_gate.clone();
            async move {
                gate.notified().await;
                Ok(SyncReport::default())
            }
        });
        let first = queue.enqueue(JobKind::InventorySync).await.unwrap();
        let second = queue.enqueue(JobKind::InventorySync).await.unwrap();
        assert_eq!(first, second);
        gate.notify_one();
        wait_finished(&queue, first).await;

        let third = queue.enqueue(JobKind::InventorySync).await.unwrap();
        assert_ne!(first, third);
        gate.notify_one();
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let (queue, _worker) = JobQueue::spawn(|_| async { Ok(SyncReport::default()) });
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}
