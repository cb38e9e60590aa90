//! Background services.

pub mod sweeper;
pub mod video_task;

pub use sweeper::TaskSweeper;
pub use video_task::{spawn_video_task, VideoTask};
