//! Delivery collaborator interface.
//!
//! Inserting text into the focused application is a provided capability
//! outside this crate; the session only needs to know whether the text
//! landed in a focused field or merely reached the clipboard.

use anyhow::Result;

/// How the final text left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Inserted into the focused target
    Inserted,
    /// Fallback: only copied to the clipboard
    CopiedToClipboard,
}

#[async_trait::async_trait]
pub trait TextDelivery: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<DeliveryOutcome>;
}

/// Delivery used by the terminal front end: the terminal itself is the
/// focused target, so the text is written to standard output.
pub struct StdoutDelivery;

#[async_trait::async_trait]
impl TextDelivery for StdoutDelivery {
    async fn deliver(&self, text: &str) -> Result<DeliveryOutcome> {
        println!("{}", text);
        Ok(DeliveryOutcome::Inserted)
    }
}
