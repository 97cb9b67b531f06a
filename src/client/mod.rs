//! Page-side components: the install prompt coordinator and the update
//! notification listener. Both hold only channel ends and injected storage;
//! nothing here touches the controller's state directly.

pub mod install;
pub mod update;

pub use install::{
  DisplayMode, InstallPromptCoordinator, InstallPromptSource, PromptDecision, PromptOutcome,
  PromptPolicy, PromptState,
};
pub use update::UpdateListener;
