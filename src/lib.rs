//! Tracks which files SigilSmith deployed into a game folder so they can be
//! removed again, including by a different instance of the application.

pub mod activation;
pub mod config;
pub mod fsutil;
pub mod logging;
pub mod manifest;
pub mod methods;
pub mod prompt;
pub mod purge;

pub use activation::{
    load_activation, load_activation_with, resolve_activation, save_activation, Activation,
    ActivationError,
};
pub use manifest::{DeployedFile, DeploymentManifest};
pub use methods::{MethodInfo, MethodRegistry, MethodTable};
pub use purge::{PurgeChoice, PurgeConfirm, PurgeReport, PurgeRequest, PurgeSafety};
