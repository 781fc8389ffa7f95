mod buffer;
mod controller;
mod loop_worker;
mod source;

pub use controller::{CaptureController, CaptureStatus};
pub use loop_worker::{CaptureConfig, CompletedChunk};
pub use source::{CommandFrameSource, Frame, FrameSource};
