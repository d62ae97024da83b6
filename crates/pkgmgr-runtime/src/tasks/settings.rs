use std::sync::Arc;

use async_trait::async_trait;
use pkgmgr_types::Settings;
use pkgmgr_types::condition::{internal, reason};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fail;
use crate::package::Package;
use crate::queue::Task;
use crate::status::StatusService;

/// Validate the settings captured when the schedule scope was opened and
/// hand them to the package.
pub struct ApplySettings {
    pub package: Arc<Package>,
    pub settings: Settings,
    pub status: Arc<StatusService>,
}

#[async_trait]
impl Task for ApplySettings {
    fn name(&self) -> String {
        format!("ApplySettings({})", self.package.id())
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        let id = self.package.id();
        debug!(package = %id, "applying settings");
        self.package
            .validate_settings(ctx, &self.settings)
            .await
            .map_err(|e| fail(ctx, internal::SETTINGS_VALID, reason::SETTINGS_INVALID, e))?;
        self.package.apply_settings(&self.settings);
        self.status.set_condition_true(id, internal::SETTINGS_VALID);
        Ok(())
    }
}
