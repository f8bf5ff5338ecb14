//! Source policies: cross-cutting stages wrapped around the flow execution
//! of extension and module sources.

use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::Event;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tracing::debug;

use super::template::{ResponseParameters, SourceFlowTemplate};
use crate::execution::{ExecutionError, ExecutionFuture};

/// Executes the flow for one event. Stages call it to continue the chain.
pub type FlowExecution = Arc<dyn Fn(Event) -> ExecutionFuture + Send + Sync>;

/// Computes transport response parameters from the resulting event.
pub trait ResponseParameterProvider: Send + Sync {
    fn success_parameters(&self, event: &Event) -> ResponseParameters;

    fn failure_parameters(&self, event: &Event) -> ResponseParameters;
}

/// Exposes a source template's parameter functions as a
/// [`ResponseParameterProvider`].
pub struct TemplateParameters<T: ?Sized>(pub Arc<T>);

impl<T> ResponseParameterProvider for TemplateParameters<T>
where
    T: SourceFlowTemplate + ?Sized,
{
    fn success_parameters(&self, event: &Event) -> ResponseParameters {
        self.0.success_response_parameters(event)
    }

    fn failure_parameters(&self, event: &Event) -> ResponseParameters {
        self.0.failure_response_parameters(event)
    }
}

#[derive(Debug)]
pub struct SourcePolicySuccess {
    pub event: Event,
    pub response_parameters: ResponseParameters,
}

#[derive(Debug)]
pub struct SourcePolicyFailure {
    pub error: ExecutionError,
    pub error_response_parameters: ResponseParameters,
}

/// The policy chain of one source, ending in the flow execution.
#[async_trait]
pub trait SourcePolicy: Send + Sync {
    /// Runs `event` through the policy chain and the flow.
    ///
    /// A flow that filters the event answers with the inbound event.
    ///
    /// # Errors
    ///
    /// Returns the failure together with the error response parameters.
    async fn process(&self, event: Event) -> Result<SourcePolicySuccess, SourcePolicyFailure>;
}

/// Creates the [`SourcePolicy`] for a source.
pub trait PolicyManager: Send + Sync {
    fn create_source_policy(
        &self,
        source_id: &str,
        flow_name: Option<&str>,
        flow: FlowExecution,
        parameters: Arc<dyn ResponseParameterProvider>,
    ) -> Arc<dyn SourcePolicy>;
}

/// One cross-cutting stage. A stage either calls `next` to continue the chain
/// or answers on its own.
#[async_trait]
pub trait SourcePolicyStage: Send + Sync {
    fn name(&self) -> &str;

    /// Pointcut: whether this stage wraps the given source and flow.
    fn applies_to(&self, _source_id: &str, _flow_name: Option<&str>) -> bool {
        true
    }

    async fn process(&self, event: Event, next: FlowExecution) -> Result<Option<Event>, ExecutionError>;
}

// ---------------------------------------------------------------------------
// CompositeSourcePolicy
// ---------------------------------------------------------------------------

/// Runs the flow execution, wrapped by `stages` with the first stage
/// outermost.
pub struct CompositeSourcePolicy {
    chain: FlowExecution,
    parameters: Arc<dyn ResponseParameterProvider>,
}

impl CompositeSourcePolicy {
    #[must_use]
    pub fn new(
        stages: Vec<Arc<dyn SourcePolicyStage>>,
        flow: FlowExecution,
        parameters: Arc<dyn ResponseParameterProvider>,
    ) -> Self {
        let chain = stages.into_iter().rev().fold(flow, |next, stage| {
            let wrapped: FlowExecution = Arc::new(move |event: Event| -> ExecutionFuture {
                let stage = Arc::clone(&stage);
                let next = Arc::clone(&next);
                Box::pin(async move {
                    debug!(stage = stage.name(), "entering source policy stage");
                    stage.process(event, next).await
                })
            });
            wrapped
        });
        Self { chain, parameters }
    }
}

#[async_trait]
impl SourcePolicy for CompositeSourcePolicy {
    async fn process(&self, event: Event) -> Result<SourcePolicySuccess, SourcePolicyFailure> {
        match (self.chain)(event.clone()).await {
            Ok(result) => {
                let event = result.unwrap_or(event);
                Ok(SourcePolicySuccess {
                    response_parameters: self.parameters.success_parameters(&event),
                    event,
                })
            }
            Err(error) => {
                let failed = error.as_messaging().map_or(event, |e| e.event().clone());
                Err(SourcePolicyFailure {
                    error_response_parameters: self.parameters.failure_parameters(&failed),
                    error,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Policy managers
// ---------------------------------------------------------------------------

/// Applies every registered stage whose pointcut matches, in registration
/// order.
#[derive(Default)]
pub struct DefaultPolicyManager {
    stages: RwLock<Vec<Arc<dyn SourcePolicyStage>>>,
}

impl DefaultPolicyManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&self, stage: Arc<dyn SourcePolicyStage>) {
        self.stages.write().push(stage);
    }
}

impl PolicyManager for DefaultPolicyManager {
    fn create_source_policy(
        &self,
        source_id: &str,
        flow_name: Option<&str>,
        flow: FlowExecution,
        parameters: Arc<dyn ResponseParameterProvider>,
    ) -> Arc<dyn SourcePolicy> {
        let stages: Vec<_> = self
            .stages
            .read()
            .iter()
            .filter(|stage| stage.applies_to(source_id, flow_name))
            .cloned()
            .collect();
        debug!(source = source_id, stages = stages.len(), "created source policy");
        Arc::new(CompositeSourcePolicy::new(stages, flow, parameters))
    }
}

/// Runs the flow directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPolicyManager;

impl PolicyManager for NoPolicyManager {
    fn create_source_policy(
        &self,
        _source_id: &str,
        _flow_name: Option<&str>,
        flow: FlowExecution,
        parameters: Arc<dyn ResponseParameterProvider>,
    ) -> Arc<dyn SourcePolicy> {
        Arc::new(CompositeSourcePolicy::new(Vec::new(), flow, parameters))
    }
}

/// Boxes `f` as a [`FlowExecution`].
pub fn flow_execution<F>(f: F) -> FlowExecution
where
    F: Fn(Event) -> BoxFuture<'static, Result<Option<Event>, ExecutionError>> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conveyor_core::Value;
    use parking_lot::Mutex;

    use super::*;

    struct Fixed;

    impl ResponseParameterProvider for Fixed {
        fn success_parameters(&self, event: &Event) -> ResponseParameters {
            ResponseParameters::from([("status".to_string(), event.payload().clone())])
        }

        fn failure_parameters(&self, _event: &Event) -> ResponseParameters {
            ResponseParameters::from([("status".to_string(), Value::from(500_i64))])
        }
    }

    struct Tracing {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        only_source: Option<&'static str>,
    }

    #[async_trait]
    impl SourcePolicyStage for Tracing {
        fn name(&self) -> &str {
            &self.name
        }

        fn applies_to(&self, source_id: &str, _flow_name: Option<&str>) -> bool {
            self.only_source.map_or(true, |only| only == source_id)
        }

        async fn process(
            &self,
            event: Event,
            next: FlowExecution,
        ) -> Result<Option<Event>, ExecutionError> {
            self.log.lock().push(format!("{}:before", self.name));
            let result = next(event).await;
            self.log.lock().push(format!("{}:after", self.name));
            result
        }
    }

    fn echo_flow(log: Arc<Mutex<Vec<String>>>) -> FlowExecution {
        flow_execution(move |event| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push("flow".to_string());
                Ok(Some(event.with_payload("done")))
            })
        })
    }

    #[tokio::test]
    async fn stages_wrap_flow_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = DefaultPolicyManager::new();
        for (name, only_source) in [("outer", None), ("inner", None), ("other", Some("elsewhere"))] {
            manager.add_stage(Arc::new(Tracing {
                name: name.to_string(),
                log: log.clone(),
                only_source,
            }));
        }

        let policy = manager.create_source_policy("src", Some("main"), echo_flow(log.clone()), Arc::new(Fixed));
        let success = policy.process(Event::new("in")).await.unwrap();

        assert_eq!(success.event.payload().as_str(), Some("done"));
        assert_eq!(success.response_parameters["status"].as_str(), Some("done"));
        assert_eq!(
            *log.lock(),
            vec!["outer:before", "inner:before", "flow", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn failure_carries_error_parameters() {
        let flow = flow_execution(|event| {
            Box::pin(async move { Err(ExecutionError::messaging("boom", event)) })
        });
        let failure = NoPolicyManager
            .create_source_policy("src", None, flow, Arc::new(Fixed))
            .process(Event::new("in"))
            .await
            .unwrap_err();

        assert_eq!(failure.error_response_parameters["status"].as_int(), Some(500));
        assert!(failure.error.as_messaging().is_some());
    }

    #[tokio::test]
    async fn filtered_flow_answers_with_inbound_event() {
        let flow = flow_execution(|_| Box::pin(async { Ok(None) }));
        let success = NoPolicyManager
            .create_source_policy("src", None, flow, Arc::new(Fixed))
            .process(Event::new("in"))
            .await
            .unwrap();
        assert_eq!(success.event.payload().as_str(), Some("in"));
    }
}
