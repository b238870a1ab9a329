use std::sync::Arc;

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use tracing::{info, warn};

use crate::conformity::Checker;
use crate::gitlab::{Client, CommitState};
use crate::queue::{JobError, JobProcessor, WebhookJob};
use crate::storage::{Store, Storing};

/// Binds dequeued jobs to the rule engine and the platform adapter: run
/// the check, post the compliance discussion, set the commit status.
pub struct CheckExecutor {
    checker: Arc<Checker>,
    client: Arc<Client>,
    store: Arc<Store>,
}

impl CheckExecutor {
    pub fn new(checker: Arc<Checker>, client: Arc<Client>, store: Arc<Store>) -> Self {
        Self {
            checker,
            client,
            store,
        }
    }
}

#[async_trait]
impl JobProcessor for CheckExecutor {
    async fn process_job(&self, job: &WebhookJob) -> Result<(), JobError> {
        info!(
            job_id = %job.id,
            webhook_type = %job.webhook_type,
            project_id = %job.project_id,
            mr_iid = job.mr_iid,
            "processing webhook for MR"
        );

        let result = self
            .checker
            .check_merge_request(&job.project_id, job.mr_iid)
            .await
            .change_context(JobError)?;

        self.client
            .create_or_update_discussion(&job.project_id, job.mr_iid, &result.summary, result.passed)
            .await
            .change_context(JobError)?;

        let state = if result.passed {
            CommitState::Success
        } else {
            CommitState::Failed
        };
        match &job.payload.object_attributes.last_commit {
            Some(last_commit) => {
                self.client
                    .set_commit_status(&job.project_id, &last_commit.id, state, &result.status_line)
                    .await
                    .change_context(JobError)?;
            }
            None => {
                warn!(job_id = %job.id, "webhook payload has no last commit; skipping commit status");
            }
        }

        self.store.set(
            &format!("last_check:{}:{}", job.project_id, job.mr_iid),
            result.status_line,
        );

        Ok(())
    }
}
