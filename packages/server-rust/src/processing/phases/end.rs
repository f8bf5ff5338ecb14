use std::sync::Arc;

use async_trait::async_trait;

use crate::processing::context::MessageProcessContext;
use crate::processing::phase::{MessageProcessPhase, PhaseResultNotifier};
use crate::processing::template::MessageProcessTemplate;

/// Runs once per message after every other phase, whatever their outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndProcessPhase;

#[async_trait]
impl MessageProcessPhase for EndProcessPhase {
    fn name(&self) -> &str {
        "end"
    }

    fn supports_template(&self, template: &MessageProcessTemplate) -> bool {
        template.end().is_some()
    }

    async fn run_phase(
        &self,
        template: &MessageProcessTemplate,
        _context: Arc<MessageProcessContext>,
        notifier: Arc<dyn PhaseResultNotifier>,
    ) {
        if let Some(end) = template.end() {
            end.message_processing_ended().await;
        }
        notifier.phase_successfully().await;
    }
}
