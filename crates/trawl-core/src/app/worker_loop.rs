//! Worker: drains one task type through its stage.
//!
//! # Flow of one run
//! 1. reset stale `processing` tasks of this type
//! 2. claim a batch (nothing claimed: done)
//! 3. stage setup (on failure the batch is released untouched)
//! 4. handle tasks one by one in claim order
//!    - success: complete, reset the failure streak
//!    - transient failure: fail, extend the streak, back off; at
//!      `max_consecutive_failures` release the rest and stop
//!    - permanent failure: fail outright, streak unchanged, no backoff
//! 5. stage teardown, whatever happened in 4
//!
//! Handler errors never escape the loop. Store errors abort the run after
//! teardown.
//!
//! # Circuit breaker
//! 連続失敗数は 1 回の run の中だけで数える。次の run は 0 から始まる。
//! 上限に達したら未処理の task は `pending` に戻し、attempts は消費しない。

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{HandlerError, StoreError, TaskId, TaskRecord, TaskStatus, TaskType, WorkerError};
use crate::queue::{StagePolicy, TaskQueue};
use crate::typed::{DynWorker, Stage, Task};

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub task_type: TaskType,
    pub claimed: usize,
    pub completed: usize,
    /// Failed but still within the attempt budget (back to pending).
    pub retried: usize,
    /// Reached `failed`, by the attempt ceiling or a permanent error.
    pub failed: usize,
    /// Claimed but handed back unprocessed.
    pub released: usize,
    pub reset_stale: usize,
    pub circuit_broken: bool,
    /// Downstream tasks created by this run.
    pub fanned_out: usize,
}

impl RunReport {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            claimed: 0,
            completed: 0,
            retried: 0,
            failed: 0,
            released: 0,
            reset_stale: 0,
            circuit_broken: false,
            fanned_out: 0,
        }
    }

    /// Tasks that went through the handler.
    pub fn attempted(&self) -> usize {
        self.completed + self.retried + self.failed
    }
}

pub struct Worker<T: Task, S: Stage<T>> {
    queue: TaskQueue,
    stage: S,
    _marker: PhantomData<T>,
}

impl<T: Task, S: Stage<T>> Worker<T, S> {
    pub fn new(queue: TaskQueue, stage: S) -> Self {
        Self {
            queue,
            stage,
            _marker: PhantomData,
        }
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub async fn run(&mut self, limit: usize) -> Result<RunReport, WorkerError> {
        let task_type = T::TYPE;
        let policy = self.queue.policy(task_type);
        let mut report = RunReport::new(task_type);

        report.reset_stale = self
            .queue
            .reset_stale(task_type, policy.processing_timeout)
            .await?;
        if report.reset_stale > 0 {
            warn!(%task_type, count = report.reset_stale, "reset stale processing tasks");
        }

        let batch = self.queue.claim_batch(task_type, limit).await?;
        report.claimed = batch.len();
        if batch.is_empty() {
            debug!(%task_type, "no pending tasks");
            return Ok(report);
        }

        if let Err(err) = self.stage.setup().await {
            let ids: Vec<TaskId> = batch.iter().map(|t| t.id).collect();
            report.released = self.queue.release(&ids).await?;
            warn!(%task_type, error = %err, released = report.released, "stage setup failed");
            return Err(WorkerError::Setup(err));
        }

        let drained = self.drain(batch, &policy, &mut report).await;
        self.stage.teardown().await;
        drained?;

        info!(
            %task_type,
            claimed = report.claimed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            released = report.released,
            fanned_out = report.fanned_out,
            circuit_broken = report.circuit_broken,
            "run finished"
        );
        Ok(report)
    }

    async fn drain(
        &mut self,
        batch: Vec<TaskRecord>,
        policy: &StagePolicy,
        report: &mut RunReport,
    ) -> Result<(), StoreError> {
        let mut streak = 0u32;
        let mut remaining = batch.into_iter();

        while let Some(task) = remaining.next() {
            let params: T = match serde_json::from_value(task.params.clone()) {
                Ok(params) => params,
                Err(err) => {
                    let error = format!("bad params: {err}");
                    warn!(task_type = %task.task_type, task_key = %task.task_key, %error, "undecodable task");
                    self.queue.fail_permanently(task.id, &error).await?;
                    report.failed += 1;
                    continue;
                }
            };

            debug!(task_type = %task.task_type, task_key = %task.task_key, attempts = task.attempts, "handling");
            match self.stage.handle(params, &self.queue).await {
                Ok(outcome) => {
                    self.queue.complete(task.id).await?;
                    report.completed += 1;
                    report.fanned_out += outcome.fanned_out;
                    streak = 0;
                }
                Err(HandlerError::Permanent(error)) => {
                    warn!(task_type = %task.task_type, task_key = %task.task_key, %error, "permanent failure");
                    self.queue.fail_permanently(task.id, &error).await?;
                    report.failed += 1;
                }
                Err(HandlerError::Transient(error)) => {
                    let status = self.queue.fail(task.id, &error).await?;
                    if status == TaskStatus::Failed {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                    streak += 1;
                    warn!(
                        task_type = %task.task_type,
                        task_key = %task.task_key,
                        attempts = task.attempts + 1,
                        %status,
                        %error,
                        "task failed"
                    );

                    if streak >= policy.max_consecutive_failures {
                        let rest: Vec<TaskId> = remaining.by_ref().map(|t| t.id).collect();
                        report.released = self.queue.release(&rest).await?;
                        report.circuit_broken = true;
                        warn!(
                            task_type = %task.task_type,
                            streak,
                            released = report.released,
                            "too many consecutive failures, stopping run"
                        );
                        break;
                    }

                    let delay = policy.backoff.delay_for(streak);
                    if !delay.is_zero() && remaining.len() > 0 {
                        debug!(delay_ms = delay.as_millis() as u64, streak, "backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Task, S: Stage<T>> DynWorker for Worker<T, S> {
    fn task_type(&self) -> TaskType {
        T::TYPE
    }

    async fn run(&mut self, limit: usize) -> Result<RunReport, WorkerError> {
        Worker::run(self, limit).await
    }
}
