//! Interrupt question channel
//!
//! The one intentional suspension point inside an otherwise synchronous
//! agent unit: an agent may ask one piece of information from an external
//! responder (a UI prompt, a CLI read) without restarting the task.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ConclaveError;

/// Answer used by callers when no responder is installed
pub const DEFAULT_ANSWER: &str = "no answer available";

/// A responder callback: (question, context) -> answer
pub type Responder = Arc<dyn Fn(&str, Option<&str>) -> String + Send + Sync>;

/// Synchronous gate for mid-execution questions
///
/// One responder is active per channel, mirroring one active UI. Concurrent
/// asks queue behind a single gate rather than interleaving answers.
pub struct InterruptChannel {
    responder: RwLock<Option<Responder>>,
    gate: Mutex<()>,
}

impl InterruptChannel {
    pub fn new() -> Self {
        Self {
            responder: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Install the active responder, replacing any previous one
    pub fn set_responder(&self, responder: Responder) {
        *self.responder.write() = Some(responder);
    }

    /// Remove the active responder
    pub fn clear_responder(&self) {
        *self.responder.write() = None;
    }

    pub fn has_responder(&self) -> bool {
        self.responder.read().is_some()
    }

    /// Ask the responder one question, blocking the calling agent unit
    ///
    /// Fails with `NoResponder` when unset; callers must treat that as
    /// recoverable and proceed with [`DEFAULT_ANSWER`].
    pub async fn ask(
        &self,
        question: &str,
        context: Option<&str>,
    ) -> Result<String, ConclaveError> {
        // Clone the responder out so the lock is not held across the await
        let responder = self
            .responder
            .read()
            .clone()
            .ok_or(ConclaveError::NoResponder)?;

        let _gate = self.gate.lock().await;
        debug!(question = %question, "Asking interrupt question");
        Ok(responder(question, context))
    }
}

impl Default for InterruptChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ask_without_responder_fails() {
        let channel = InterruptChannel::new();
        assert!(!channel.has_responder());

        let err = channel.ask("what color?", None).await;
        assert!(matches!(err, Err(ConclaveError::NoResponder)));
    }

    #[tokio::test]
    async fn test_ask_with_responder() {
        let channel = InterruptChannel::new();
        channel.set_responder(Arc::new(|question, context| {
            format!("q={question} ctx={}", context.unwrap_or("-"))
        }));

        let answer = channel.ask("what color?", Some("walls")).await.unwrap();
        assert_eq!(answer, "q=what color? ctx=walls");

        channel.clear_responder();
        assert!(channel.ask("again?", None).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_asks_both_resolve() {
        let channel = Arc::new(InterruptChannel::new());
        channel.set_responder(Arc::new(|question, _| format!("answer to {question}")));

        let a = {
            let ch = Arc::clone(&channel);
            tokio::spawn(async move { ch.ask("first", None).await })
        };
        let b = {
            let ch = Arc::clone(&channel);
            tokio::spawn(async move { ch.ask("second", None).await })
        };

        assert_eq!(a.await.unwrap().unwrap(), "answer to first");
        assert_eq!(b.await.unwrap().unwrap(), "answer to second");
    }
}
