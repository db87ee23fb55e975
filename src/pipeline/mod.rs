pub mod callbacks;
pub mod camera;
pub mod stats;
mod task;

pub use callbacks::{CallbackRegistry, SubscriptionId};
pub use camera::{Camera, CameraState};
pub use stats::{PipelineStats, StatsSnapshot};
