//! Per-stage fan-out join.
//!
//! A [`StageJoin`] is created by a single stage invocation. Branches run as
//! tokio tasks; their results are drained back into the stage's own task,
//! which is the only place the aggregate is mutated and completions are
//! counted.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::Stage;
use crate::error::PipelineError;

pub struct StageJoin<T> {
    stage: Stage,
    tasks: JoinSet<T>,
    limiter: Arc<Semaphore>,
    target: usize,
    completed: usize,
}

impl<T: Send + 'static> StageJoin<T> {
    /// `target` is the number of completions that makes the stage done.
    pub fn new(stage: Stage, target: usize, max_concurrency: usize) -> Self {
        Self {
            stage,
            tasks: JoinSet::new(),
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            target,
            completed: 0,
        }
    }

    /// Starts one branch. At most `max_concurrency` branches run at a time.
    pub fn spawn<F>(&mut self, branch: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let limiter = self.limiter.clone();
        self.tasks.spawn(
            async move {
                // The semaphore is never closed, so acquisition only waits.
                let _permit = limiter.acquire_owned().await.ok();
                branch.await
            }
            .in_current_span(),
        );
    }

    /// Waits for the next branch to finish and counts it as one completion.
    pub async fn next(&mut self) -> Result<T, PipelineError> {
        match self.tasks.join_next().await {
            Some(Ok(output)) => {
                self.completed += 1;
                Ok(output)
            }
            Some(Err(source)) => Err(PipelineError::Task {
                stage: self.stage,
                source,
            }),
            None => Err(PipelineError::JoinMismatch {
                stage: self.stage,
                expected: self.target,
                completed: self.completed,
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.target
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn target(&self) -> usize {
        self.target
    }
}
