use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::processing::context::MessageProcessContext;
use crate::processing::error::PhaseError;
use crate::processing::phase::{MessageProcessPhase, PhaseKind, PhaseResultNotifier};
use crate::processing::template::MessageProcessTemplate;

/// Discards invalid messages before any routing happens. A discarded message
/// is reported as consumed, so no later phase runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPhase;

#[async_trait]
impl MessageProcessPhase for ValidationPhase {
    fn name(&self) -> &str {
        "validation"
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::Validation
    }

    fn supports_template(&self, template: &MessageProcessTemplate) -> bool {
        template.validation().is_some()
    }

    async fn run_phase(
        &self,
        template: &MessageProcessTemplate,
        context: Arc<MessageProcessContext>,
        notifier: Arc<dyn PhaseResultNotifier>,
    ) {
        let Some(validation) = template.validation() else {
            notifier.phase_successfully().await;
            return;
        };
        if validation.validate_message() {
            notifier.phase_successfully().await;
            return;
        }

        debug!(source = context.source_id(), "discarding invalid message");
        match validation.discard_invalid_message().await {
            Ok(()) => notifier.phase_consumed_message().await,
            Err(err) => notifier.phase_failure(PhaseError::Template(err)).await,
        }
    }
}
