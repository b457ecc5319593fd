//! Managed cluster create and update.
//!
//! A command resolves its flags through [`context::AksContext`], runs the
//! ordered builders of [`create`] or [`update`] against a
//! [`models::ManagedCluster`] and hands the result to an
//! [`backend::AksBackend`].

pub mod backend;
pub mod consts;
pub mod context;
pub mod create;
pub mod models;
pub mod params;
pub mod plan;
pub mod postprocess;
pub mod schema;
pub mod ssh;
pub mod update;

pub use backend::{AksBackend, ArmAksBackend};
pub use context::{AksContext, DecoratorMode};
pub use create::{aks_create, CreateDecorator};
pub use models::ManagedCluster;
pub use params::RawParameters;
pub use postprocess::ClusterResponse;
pub use update::{aks_update, UpdateDecorator};
