pub mod audio;
pub mod config;
pub mod delivery;
pub mod error;
pub mod provider;
pub mod refine;
pub mod session;
pub mod trigger;

pub use audio::{AudioCapture, AudioFrame, CaptureConstraints, CpalCapture};
pub use config::{Config, Credentials};
pub use delivery::{DeliveryOutcome, StdoutDelivery, TextDelivery};
pub use error::SessionError;
pub use provider::{ProviderConfig, ProviderEvent, ProviderKind, SpeechStream};
pub use refine::{Refine, RefineConfig, Refiner};
pub use session::{
    SessionConfig, SessionController, SessionEvent, SessionState, TranscriptAssembler,
};
pub use trigger::CooldownGate;
