//! Video upscaling and frame interpolation through a streaming
//! decode, process, encode pipeline.

pub mod algorithm;
pub mod args;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod logging;
pub mod pipeline;
pub mod planner;
pub mod signals;
pub mod transform;
pub mod video;
pub mod video2x;
pub mod worker;

pub use error::Error;
pub use frame::Frame;
pub use video2x::{Execution, Video2X};
