//! The per-message business transition is an external collaborator (§1
//! "out of scope": business-domain NLP, LLM/real-estate query clients, PDF
//! rendering). The processor owns only the *lifecycle* around it — mailbox,
//! idle eviction, ordering — never its contents.

use async_trait::async_trait;
use relay_core::CoreError;
use relay_vendor::UserMessage;

/// One step of per-user conversation state. Implementors own whatever
/// conversation history they need; the processor holds no business state of
/// its own, only this trait object.
#[async_trait]
pub trait BusinessTransition: Send + Sync + 'static {
    async fn handle(&self, external_user_id: &str, message: &UserMessage) -> Result<(), CoreError>;
}

/// A transition that does nothing but observe. Useful as the default in
/// tests and as the base the stress harness (§4.8) wraps with a
/// `SequenceChecker`.
pub struct NoopTransition;

#[async_trait]
impl BusinessTransition for NoopTransition {
    async fn handle(&self, _external_user_id: &str, _message: &UserMessage) -> Result<(), CoreError> {
        Ok(())
    }
}
