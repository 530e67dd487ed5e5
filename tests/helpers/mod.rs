//! In-memory job store, work queue and scripted engine for pipeline tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use moderation_queue::db::{JobStore, StoreError, UpdateOutcome};
use moderation_queue::models::job::{JobStatus, ModerationJob, WorkItem};
use moderation_queue::models::moderation::{Category, ClassificationResult};
use moderation_queue::services::classifier::{
    Classifier, ModelError, ModerationModel, RetryPolicy,
};
use moderation_queue::services::queue::{Delivery, QueueError, ReceiptHandle, WorkQueue};

// ── Job store ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, ModerationJob>>,
    pub fail_creates: AtomicBool,
    failing_updates: Mutex<HashSet<Uuid>>,
    pub complete_calls: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn job(&self, job_id: Uuid) -> Option<ModerationJob> {
        self.jobs.lock().unwrap().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn insert(&self, job: ModerationJob) {
        self.jobs.lock().unwrap().insert(job.job_id, job);
    }

    /// Make `complete`/`fail` error for this job.
    pub fn fail_updates_for(&self, job_id: Uuid) {
        self.failing_updates.lock().unwrap().insert(job_id);
    }

    fn check_update(&self, job_id: Uuid) -> Result<(), StoreError> {
        if self.failing_updates.lock().unwrap().contains(&job_id) {
            return Err(StoreError::Unavailable(format!("update of {job_id} refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &ModerationJob) -> Result<(), StoreError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::Duplicate(job.job_id));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ModerationJob>, StoreError> {
        Ok(self.job(job_id))
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: &ClassificationResult,
    ) -> Result<UpdateOutcome, StoreError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_update(job_id)?;
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if job.status != JobStatus::Pending {
            return Ok(UpdateOutcome::for_completed(job, result));
        }
        job.status = JobStatus::Completed;
        job.result = Some(result.clone());
        job.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied)
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<UpdateOutcome, StoreError> {
        self.check_update(job_id)?;
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if job.status != JobStatus::Pending {
            return Ok(UpdateOutcome::for_failed(job));
        }
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied)
    }

    async fn mark_enqueued(&self, job_id: Uuid) -> Result<(), StoreError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.enqueued_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn unenqueued_before(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ModerationJob>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut orphans: Vec<_> = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending && j.enqueued_at.is_none() && j.created_at < before
            })
            .cloned()
            .collect();
        orphans.sort_by_key(|j| j.created_at);
        orphans.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orphans)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Work queue ───────────────────────────────────────────────────────

struct Message {
    body: String,
    receive_count: u32,
    in_flight: bool,
}

/// Queue whose visibility timeouts only expire when the test says so.
#[derive(Default)]
pub struct MemoryWorkQueue {
    messages: Mutex<HashMap<String, Message>>,
    ready: Mutex<VecDeque<String>>,
    pub deleted: Mutex<Vec<ReceiptHandle>>,
    pub visibility_changes: Mutex<Vec<(ReceiptHandle, Duration)>>,
    pub fail_sends: AtomicBool,
}

impl MemoryWorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Messages not yet deleted, in flight or not.
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<WorkItem> {
        self.messages
            .lock()
            .unwrap()
            .values()
            .map(|m| serde_json::from_str(&m.body).unwrap())
            .collect()
    }

    /// Push a raw message body, bypassing serialization.
    pub fn push_raw(&self, body: &str) {
        let id = Uuid::new_v4().to_string();
        self.messages.lock().unwrap().insert(
            id.clone(),
            Message {
                body: body.to_string(),
                receive_count: 0,
                in_flight: false,
            },
        );
        self.ready.lock().unwrap().push_back(id);
    }

    /// Let every in-flight message's visibility timeout lapse.
    pub fn expire_visibility(&self) {
        let mut messages = self.messages.lock().unwrap();
        let mut ready = self.ready.lock().unwrap();
        for (id, message) in messages.iter_mut() {
            if message.in_flight {
                message.in_flight = false;
                ready.push_back(id.clone());
            }
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn send(&self, item: &WorkItem) -> Result<(), QueueError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue offline".to_string()));
        }
        self.push_raw(&serde_json::to_string(item)?);
        Ok(())
    }

    async fn receive(
        &self,
        max: usize,
        _visibility: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut messages = self.messages.lock().unwrap();
        let mut ready = self.ready.lock().unwrap();
        let mut out = Vec::new();
        while out.len() < max {
            let Some(id) = ready.pop_front() else { break };
            let Some(message) = messages.get_mut(&id) else { continue };
            message.in_flight = true;
            message.receive_count += 1;
            out.push(Delivery {
                receipt: ReceiptHandle(id),
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
        }
        Ok(out)
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.messages.lock().unwrap().remove(&receipt.0);
        self.ready.lock().unwrap().retain(|id| id != &receipt.0);
        self.deleted.lock().unwrap().push(receipt.clone());
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.visibility_changes
            .lock()
            .unwrap()
            .push((receipt.clone(), timeout));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

// ── Engine ───────────────────────────────────────────────────────────

type Responder = dyn Fn(&str) -> Result<String, ModelError> + Send + Sync;

/// Engine double that answers every prompt with a test-supplied function.
pub struct ScriptedModel {
    respond: Box<Responder>,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(
        respond: impl Fn(&str) -> Result<String, ModelError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModerationModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt)
    }
}

pub fn classifier(model: Arc<ScriptedModel>) -> Arc<Classifier> {
    Arc::new(Classifier::new(
        model,
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
        },
        500,
    ))
}

/// An engine reply scoring every category at `base`, with optional overrides by code.
pub fn engine_reply(decision: &str, base: f64, overrides: &[(&str, f64, &str)]) -> String {
    let categories: Vec<_> = Category::ALL
        .iter()
        .map(|c| {
            let code = c.code();
            let (confidence, matched) = overrides
                .iter()
                .find(|(o, _, _)| *o == code)
                .map(|(_, conf, text)| (*conf, *text))
                .unwrap_or((base, ""));
            serde_json::json!({
                "label": c.label(),
                "code": code,
                "confidence": confidence,
                "matched_text": matched,
            })
        })
        .collect();
    let body = serde_json::json!({ "decision": decision, "categories": categories });
    format!("```json\n{body:#}\n```")
}
