//! Acquisition pipeline
//!
//! Resolves the current user, pages through their followings and looks up
//! common followings for each followed account, folding everything into a
//! [`SharedGraph`](crate::graph::SharedGraph) as it arrives.
//!
//! ```text
//! idle ─▶ loading_followings ─▶ loading_relations ─▶ done
//!              │                       │
//!              └──────────▶ error ◀────┘
//! ```
//!
//! Runs can be paused, resumed and cancelled through a [`PipelineHandle`].

mod acquisition;
mod control;
mod options;
mod state;

pub use acquisition::AcquisitionPipeline;
pub use control::PipelineHandle;
pub use options::{PipelineOptions, RelationMode};
pub use state::{AcquisitionState, LoadingState, LoadingStatus};
