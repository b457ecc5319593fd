//! azcli: AKS managed-cluster create/update and App Configuration tooling.
//!
//! The AKS side resolves command flags into a `ManagedCluster` request and
//! sends it through an ARM backend. The App Configuration side manages
//! key-values, feature flags and snapshots of a store, including import and
//! export against files and App Service.

pub mod aks;
pub mod appconfig;
pub mod config;
pub mod error;
pub mod prompt;
pub mod rest;

pub use aks::{aks_create, aks_update, AksBackend, AksContext, ArmAksBackend, ClusterResponse, DecoratorMode, RawParameters};
pub use appconfig::{ConfigStoreClient, KeyValue, KvQuery, RestConfigStoreClient, StoreContext};
pub use config::{parse_env_ref, resolve_env_ref, AksSettings, AppConfigSettings, ArmSettings, AzCliConfig};
pub use error::{AzCliError, HttpError, Result};
pub use prompt::{user_confirmation, ConsolePrompter, Prompter};
pub use rest::RestClient;
