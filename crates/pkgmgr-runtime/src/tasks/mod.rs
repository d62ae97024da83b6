//! Lifecycle tasks run on the package queues.
//!
//! Each task carries only the collaborators it needs. Failures are wrapped
//! into [`ConditionError`]s naming the internal condition they break;
//! [`Reported`] forwards them to the status service before the queue
//! schedules a retry.

mod disable;
mod fetch;
mod hook;
mod load;
mod run;
mod settings;
mod startup;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ConditionError;
use crate::queue::{Cancelled, Task, is_cancelled};
use crate::status::StatusService;

pub use disable::{Disable, Uninstall};
pub use fetch::{Download, Install};
pub use hook::{HookRun, HookSync};
pub use load::Load;
pub use run::Run;
pub use settings::ApplySettings;
pub use startup::Startup;

/// Capability to ask the scheduler for another `Schedule` of a package.
pub type Reschedule = Arc<dyn Fn(&str) + Send + Sync>;

/// Queue running the lifecycle chain of a package.
pub fn package_queue(id: &str) -> String {
    id.to_string()
}

/// Queue running hook tasks bound to `queue`.
pub fn hook_queue(id: &str, queue: &str) -> String {
    format!("{id}/{queue}")
}

/// Queue running synchronization tasks somebody waits for.
pub fn sync_queue(id: &str, queue: &str) -> String {
    format!("{id}/{queue}/sync")
}

/// Turn a collaborator failure into a condition error, unless the work was
/// cancelled in the meantime.
pub(crate) fn fail(
    ctx: &CancellationToken,
    condition: &str,
    reason: &str,
    err: impl Into<anyhow::Error>,
) -> anyhow::Error {
    let err = err.into();
    if ctx.is_cancelled() || is_cancelled(&err) {
        return Cancelled.into();
    }
    ConditionError::failed(condition, reason, err)
}

/// Reports failures of the wrapped task to the status service.
pub struct Reported {
    id: String,
    inner: Arc<dyn Task>,
    status: Arc<StatusService>,
}

impl Reported {
    pub fn wrap(id: &str, status: &Arc<StatusService>, inner: impl Task + 'static) -> Arc<dyn Task> {
        Arc::new(Self {
            id: id.to_string(),
            inner: Arc::new(inner),
            status: Arc::clone(status),
        })
    }
}

#[async_trait]
impl Task for Reported {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        match self.inner.execute(ctx).await {
            Ok(()) => Ok(()),
            Err(_) if ctx.is_cancelled() => Err(Cancelled.into()),
            Err(err) => {
                self.status.handle_error(&self.id, &err);
                Err(err)
            }
        }
    }
}
