pub mod capture;
pub mod level;

pub use capture::{
    downmix_mono, downsample, AudioCapture, AudioFrame, CaptureConstraints, CpalCapture,
};
pub use level::{peak_level, rms_level};
