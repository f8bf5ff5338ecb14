//! Loopback demo: pushes messages through an in-memory request/response
//! source and reports what came back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use conveyor_core::{ConnectorMessageNotification, Event, MessagingException, NotificationListener};
use conveyor_server::execution::{
    ExecutionContext, ExecutionError, ExecutionResult, LocalTransactionFactory, TransactionAction,
    TransactionConfig,
};
use conveyor_server::flow::{
    processor_fn, ContinueErrorHandler, FlowConstruct, FlowRef, FlowRegistry, TransactionalScope,
};
use conveyor_server::logging::{init_tracing, LogFormat};
use conveyor_server::processing::{
    EndPhaseTemplate, FlowProcessingPhaseTemplate, FlowTemplate, MessageProcessContext,
    MessageProcessTemplate, MessageProcessingManager, ProcessingConfig,
    RequestResponseFlowProcessingPhaseTemplate, WorkerPool,
};
use conveyor_server::traits::EventProcessor;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "conveyor-loopback", about = "Run messages through the Conveyor pipeline in memory")]
struct Args {
    /// Number of messages to submit.
    #[arg(long, env = "CONVEYOR_MESSAGES", default_value_t = 10)]
    messages: u64,

    /// Fail every Nth message inside the flow (0 disables failures).
    #[arg(long, env = "CONVEYOR_FAIL_EVERY", default_value_t = 0)]
    fail_every: u64,

    /// Run the flow's processors inside a local transaction.
    #[arg(long, env = "CONVEYOR_TRANSACTIONAL", default_value_t = false)]
    transactional: bool,

    /// Hand messages to a bounded worker pool instead of processing inline.
    #[arg(long, env = "CONVEYOR_WORKER_POOL", default_value_t = false)]
    worker_pool: bool,

    #[arg(long, env = "CONVEYOR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Default filter directive when `RUST_LOG` is unset.
    #[arg(long, env = "CONVEYOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Debug)]
enum Reply {
    Response(String),
    Failure(String),
}

struct LoopbackSource {
    event: Event,
    flow: Arc<FlowConstruct>,
    replies: mpsc::UnboundedSender<Reply>,
}

#[async_trait]
impl FlowProcessingPhaseTemplate for LoopbackSource {
    async fn get_event(&self) -> Result<Event, ExecutionError> {
        Ok(self.event.clone())
    }

    async fn route_event(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
        self.flow.process(event, ctx).await
    }

    fn as_request_response(&self) -> Option<&dyn RequestResponseFlowProcessingPhaseTemplate> {
        Some(self)
    }
}

#[async_trait]
impl RequestResponseFlowProcessingPhaseTemplate for LoopbackSource {
    async fn send_response_to_client(&self, response: Option<&Event>) -> anyhow::Result<()> {
        let payload = response
            .and_then(|e| e.payload().as_str().map(str::to_string))
            .unwrap_or_default();
        self.replies
            .send(Reply::Response(payload))
            .map_err(|_| anyhow::anyhow!("reply channel closed"))
    }

    async fn send_failure_response_to_client(
        &self,
        exception: &MessagingException,
    ) -> anyhow::Result<()> {
        self.replies
            .send(Reply::Failure(exception.message().to_string()))
            .map_err(|_| anyhow::anyhow!("reply channel closed"))
    }
}

struct LoopbackEnd {
    ended: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl EndPhaseTemplate for LoopbackEnd {
    async fn message_processing_ended(&self) {
        let _ = self.ended.send(());
    }
}

/// Counts connector notifications per action.
struct NotificationCounter;

impl NotificationListener for NotificationCounter {
    fn on_notification(&self, notification: &ConnectorMessageNotification) {
        metrics::counter!("conveyor_notifications_total", "action" => notification.action.as_str())
            .increment(1);
    }
}

fn index_of(event: &Event) -> i64 {
    event.variable("index").and_then(|v| v.as_int()).unwrap_or_default()
}

fn build_flows(args: &Args, registry: &Arc<FlowRegistry>) -> anyhow::Result<Arc<FlowConstruct>> {
    let fail_every = i64::try_from(args.fail_every).context("fail-every out of range")?;

    let enrich = processor_fn("enrich", |event: Event| async move {
        let payload = format!("processed-{}", index_of(&event));
        Ok(Some(event.with_payload(payload)))
    });
    let maybe_fail = processor_fn("maybe-fail", move |event: Event| async move {
        let index = index_of(&event);
        if fail_every > 0 && index % fail_every == 0 {
            return Err(ExecutionError::messaging(format!("simulated failure of message {index}"), event));
        }
        Ok(Some(event))
    });

    let mut processors = vec![enrich, maybe_fail];
    if args.transactional {
        let config = TransactionConfig::new(TransactionAction::AlwaysBegin)
            .with_factory(Arc::new(LocalTransactionFactory::new()));
        processors = vec![Arc::new(TransactionalScope::new("transaction", config, processors))
            as Arc<dyn EventProcessor>];
    }

    let recover = processor_fn("recover", |event: Event| async move {
        Ok(Some(event.with_payload("recovered")))
    });
    let main = FlowConstruct::new("main", processors)
        .with_exception_handler(Arc::new(ContinueErrorHandler::new(vec![recover])));
    registry.register(Arc::new(main))?;

    let entry = Arc::new(FlowConstruct::new(
        "entry",
        vec![Arc::new(FlowRef::new("main", Arc::clone(registry))) as Arc<dyn EventProcessor>],
    ));
    registry.register(Arc::clone(&entry))?;
    Ok(entry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, &args.log_level)?;
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let registry = Arc::new(FlowRegistry::new());
    let entry = build_flows(&args, &registry)?;

    let config = ProcessingConfig::default();
    let pool = args.worker_pool.then(|| Arc::new(WorkerPool::start(&config)));
    let manager = MessageProcessingManager::builder()
        .with_config(config)
        .with_notification_listener(Arc::new(NotificationCounter))
        .build();

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let end = Arc::new(LoopbackEnd { ended: ended_tx });

    info!(
        messages = args.messages,
        fail_every = args.fail_every,
        transactional = args.transactional,
        worker_pool = args.worker_pool,
        flows = ?registry.names(),
        "starting loopback run"
    );

    for index in 1..=args.messages {
        let index = i64::try_from(index).context("message index out of range")?;
        let source = Arc::new(LoopbackSource {
            event: Event::new(format!("message-{index}")).with_variable("index", index),
            flow: Arc::clone(&entry),
            replies: reply_tx.clone(),
        });
        let template = MessageProcessTemplate::new()
            .with_flow(FlowTemplate::Flow(source))
            .with_end(end.clone());
        let mut context = MessageProcessContext::new("loopback").with_flow(Arc::clone(&entry));
        if let Some(pool) = &pool {
            context = context.with_executor(pool.clone());
        }
        if let Err(err) = manager.process_message(template, context).await {
            warn!(error = %err, index, "message was not processed");
        }
    }

    for _ in 0..args.messages {
        tokio::time::timeout(Duration::from_secs(30), ended_rx.recv())
            .await
            .context("timed out waiting for messages to finish")?
            .context("end channel closed")?;
    }
    if let Some(pool) = &pool {
        pool.stop().await;
    }

    let (mut responses, mut failures) = (0_u64, 0_u64);
    while let Ok(reply) = reply_rx.try_recv() {
        match reply {
            Reply::Response(payload) => {
                responses += 1;
                tracing::debug!(%payload, "response");
            }
            Reply::Failure(message) => {
                failures += 1;
                warn!(%message, "failure response");
            }
        }
    }

    info!(responses, failures, "loopback run finished");
    info!(metrics = %prometheus.render(), "metrics snapshot");
    Ok(())
}
