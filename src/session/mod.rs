//! Dictation session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - Microphone capture for one session
//! - The streaming provider connection (open, feed, commit, close)
//! - Transcript assembly from finalized and interim fragments
//! - Refinement and delivery of the finished transcript
//! - Lifecycle state and observer notifications

mod config;
mod events;
mod session;
mod transcript;

pub use config::SessionConfig;
pub use events::{SessionEvent, SessionState};
pub use session::{CaptureFactory, ProviderFactory, SessionController};
pub use transcript::TranscriptAssembler;
