pub mod command;
pub mod ids;
pub mod report;
pub mod state;
pub mod target;

pub use command::{methods, CommandEnvelope, Frame, FrameKind, AUTO_GOTO_EVENT};
pub use ids::RunId;
pub use report::*;
pub use state::OperationState;
pub use target::{RawTarget, Target, TargetRequest};
