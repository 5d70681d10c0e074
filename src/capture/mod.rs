//! Frame Intake Layer
//!
//! Owned frame buffers and the rate gate that decides which frames reach
//! the pipeline. Camera binding itself lives outside this crate; callers
//! hand frames in.

pub mod frame;
pub mod throttle;

pub use frame::Frame;
pub use throttle::FrameThrottle;
