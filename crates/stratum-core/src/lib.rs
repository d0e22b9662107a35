//! stratum-core
//!
//! Pure data model shared by every stratum crate: resources, specs, change
//! steps and orders, progress messages, and per-stack state.
//! No async runtime and no backend dependency.

pub mod canonical;
pub mod change;
pub mod error;
pub mod id;
pub mod message;
pub mod resource;
pub mod state;

pub use crate::change::{ActionType, ChangeOrder, ChangeStep};
pub use crate::error::CoreError;
pub use crate::message::{Message, OpResult};
pub use crate::resource::{Resource, ResourceType, Spec};
pub use crate::state::State;
