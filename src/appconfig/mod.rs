//! App Configuration key-value, feature flag and snapshot commands.
//!
//! Commands take a [`StoreContext`] holding the store client, the prompter
//! and the `[appconfig]` settings. Import and export move key-values between
//! a store, files ([`file_io`]) and App Service ([`appservice`]), diffing
//! with [`diff::KvComparer`] before writing.

use std::time::Duration;

use crate::config::AppConfigSettings;
use crate::error::{map_azure_error, AzCliError};
use crate::prompt::Prompter;

pub mod appservice;
pub mod bulk;
pub mod client;
pub mod diff;
pub mod feature;
pub mod file_io;
pub mod keyvalue;
pub mod models;
pub mod snapshot;
pub mod validation;

pub use client::{ConfigStoreClient, KvQuery, RestConfigStoreClient};
pub use models::KeyValue;

pub struct StoreContext<'a> {
    pub client: &'a dyn ConfigStoreClient,
    pub prompter: &'a dyn Prompter,
    pub settings: AppConfigSettings,
}

impl<'a> StoreContext<'a> {
    pub fn new(
        client: &'a dyn ConfigStoreClient,
        prompter: &'a dyn Prompter,
        settings: AppConfigSettings,
    ) -> Self {
        StoreContext {
            client,
            prompter,
            settings,
        }
    }

    /// List limit: `None` with `all`, else `top` or the configured default.
    pub(crate) fn limit(&self, top: Option<usize>, all: bool) -> Option<usize> {
        if all {
            None
        } else {
            Some(top.unwrap_or(self.settings.default_top))
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.settings.write_retry_attempts.max(1)
    }

    /// Sleep before another attempt after an etag conflict.
    ///
    /// Any other error is mapped and returned.
    pub(crate) async fn back_off_on_conflict(
        &self,
        err: AzCliError,
        attempt: u32,
        operation: &str,
    ) -> crate::Result<()> {
        match err.http() {
            Some(e) if e.is_precondition_failed() => {
                tracing::debug!(
                    attempt,
                    operation,
                    "etag conflict, retrying after {}s",
                    self.settings.write_retry_interval_secs
                );
                tokio::time::sleep(Duration::from_secs(self.settings.write_retry_interval_secs))
                    .await;
                Ok(())
            }
            _ => Err(map_azure_error(err)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::appconfig::client::fake::InMemoryStore;
    use crate::prompt::scripted::ScriptedPrompter;

    pub fn store_context<'a>(store: &'a InMemoryStore, prompter: &'a ScriptedPrompter) -> StoreContext<'a> {
        let settings = AppConfigSettings {
            write_retry_interval_secs: 0,
            ..Default::default()
        };
        StoreContext::new(store, prompter, settings)
    }
}
