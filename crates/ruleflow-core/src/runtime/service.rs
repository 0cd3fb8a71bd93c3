// ruleflow-core/src/runtime/service.rs
// ============================================================================
// Module: Ruleflow Engine Service
// Description: Async shell serialising ingress and running webhook workers.
// Purpose: Funnel parallel callers through a bounded channel into the core.
// Dependencies: crate::core, crate::interfaces, crate::runtime, reqwest, tokio
// ============================================================================

//! ## Overview
//! The service owns the engine on a dedicated task. All external ingress
//! funnels through a bounded command channel processed one command at a
//! time, which is what makes rule semantics deterministic for a given input
//! ordering. The dispatcher suspends only at external I/O: webhook delivery
//! runs on worker tasks with exponential backoff so the command loop never
//! blocks, and the originating rule firing completes before the delivery
//! result resolves. Timer checks and temporal sweeps tick on their
//! configured cadences.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tracing::warn;

use crate::core::CorrelationId;
use crate::core::EngineError;
use crate::core::Event;
use crate::core::EventId;
use crate::core::Fact;
use crate::core::HttpMethod;
use crate::core::MetricsSnapshot;
use crate::core::Observation;
use crate::core::Rule;
use crate::core::RuleId;
use crate::core::StopMode;
use crate::core::SubscriptionId;
use crate::core::WebhookRetryConfig;
use crate::interfaces::ObservationSink;
use crate::interfaces::StreamSubscriber;
use crate::interfaces::WebhookError;
use crate::interfaces::WebhookRequest;
use crate::interfaces::WebhookResponse;
use crate::interfaces::WebhookTransport;
use crate::runtime::engine::Engine;
use crate::runtime::executor::WebhookJob;
use crate::runtime::executor::backoff_delays;

// ============================================================================
// SECTION: Service Messages
// ============================================================================

/// Boxed operation applied to the engine on its owning task.
type EngineTask = Box<dyn FnOnce(&mut Engine) + Send>;

/// Message accepted by the service loop.
enum ServiceMessage {
    /// Apply an operation to the engine.
    Task(EngineTask),
    /// Stop the service.
    Stop {
        /// Drain or abandon queued commands.
        mode: StopMode,
        /// Completion acknowledgement.
        done: oneshot::Sender<Result<(), EngineError>>,
    },
}

// ============================================================================
// SECTION: Engine Handle
// ============================================================================

/// Cloneable async handle submitting commands to the engine service.
#[derive(Clone)]
pub struct EngineHandle {
    /// Bounded ingress channel.
    tx: mpsc::Sender<ServiceMessage>,
}

impl EngineHandle {
    /// Applies an arbitrary operation on the engine task and awaits it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when the service stopped.
    pub async fn with_engine<T, F>(&self, operation: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Engine) -> T + Send + 'static,
    {
        let (done, received) = oneshot::channel();
        let task: EngineTask = Box::new(move |engine| {
            let _ = done.send(operation(engine));
        });
        self.tx
            .send(ServiceMessage::Task(task))
            .await
            .map_err(|_| unavailable())?;
        received.await.map_err(|_| unavailable())
    }

    /// Emits a root event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] from the underlying engine operation.
    pub async fn emit(&self, topic: String, data: Value) -> Result<Event, EngineError> {
        self.with_engine(move |engine| engine.emit(&topic, data))
            .await?
    }

    /// Emits an event with explicit correlation or causation links.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] from the underlying engine operation.
    pub async fn emit_correlated(
        &self,
        topic: String,
        data: Value,
        correlation_id: Option<CorrelationId>,
        causation_id: Option<EventId>,
    ) -> Result<Event, EngineError> {
        self.with_engine(move |engine| {
            engine.emit_correlated(&topic, data, correlation_id, causation_id)
        })
        .await?
    }

    /// Sets a fact.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] from the underlying engine operation.
    pub async fn set_fact(&self, key: String, value: Value) -> Result<Fact, EngineError> {
        self.with_engine(move |engine| engine.set_fact(&key, value))
            .await?
    }

    /// Deletes a fact.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] from the underlying engine operation.
    pub async fn delete_fact(&self, key: String) -> Result<bool, EngineError> {
        self.with_engine(move |engine| engine.delete_fact(&key))
            .await?
    }

    /// Returns a fact snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when the service stopped.
    pub async fn get_fact(&self, key: String) -> Result<Option<Fact>, EngineError> {
        self.with_engine(move |engine| engine.get_fact(&key)).await
    }

    /// Registers a rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] from the underlying engine operation.
    pub async fn register_rule(&self, rule: Rule) -> Result<Rule, EngineError> {
        self.with_engine(move |engine| engine.register_rule(rule))
            .await?
    }

    /// Returns a rule snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] from the underlying engine operation.
    pub async fn get_rule(&self, rule_id: RuleId) -> Result<Rule, EngineError> {
        self.with_engine(move |engine| engine.get_rule(&rule_id))
            .await?
    }

    /// Registers a stream subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] from the underlying engine operation.
    pub async fn subscribe(
        &self,
        pattern: String,
        subscriber: Arc<dyn StreamSubscriber>,
    ) -> Result<SubscriptionId, EngineError> {
        self.with_engine(move |engine| engine.subscribe(&pattern, subscriber))
            .await?
    }

    /// Records a metric sample into the rolling baselines.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when the service stopped.
    pub async fn record_metric(&self, metric: String, value: f64) -> Result<(), EngineError> {
        self.with_engine(move |engine| engine.record_metric(&metric, value))
            .await
    }

    /// Returns a metrics snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when the service stopped.
    pub async fn metrics_snapshot(&self) -> Result<MetricsSnapshot, EngineError> {
        self.with_engine(|engine| engine.metrics_snapshot()).await
    }

    /// Stops the service, draining or abandoning queued commands.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when final persistence fails.
    pub async fn stop(&self, mode: StopMode) -> Result<(), EngineError> {
        let (done, received) = oneshot::channel();
        self.tx
            .send(ServiceMessage::Stop { mode, done })
            .await
            .map_err(|_| unavailable())?;
        received.await.map_err(|_| unavailable())?
    }
}

/// The error every closed-channel path maps to.
fn unavailable() -> EngineError {
    EngineError::ServiceUnavailable("engine service is not running".to_string())
}

// ============================================================================
// SECTION: Engine Service
// ============================================================================

/// Async service owning the engine and its webhook worker pool.
pub struct EngineService;

impl EngineService {
    /// Spawns the service, returning the handle and the loop's join handle.
    #[must_use]
    pub fn spawn(
        engine: Engine,
        transport: Arc<dyn WebhookTransport>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let capacity = engine.config().dispatch_queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let join = tokio::spawn(run_service(engine, rx, transport));
        (EngineHandle { tx }, join)
    }
}

/// The service loop: commands, ticks, webhook dispatch, shutdown.
async fn run_service(
    mut engine: Engine,
    mut rx: mpsc::Receiver<ServiceMessage>,
    transport: Arc<dyn WebhookTransport>,
) {
    let retry = engine.config().webhook_retry.clone();
    let sink = engine.observation_sink();
    let engine_name = engine.config().name.clone();
    let mut timer_tick = tokio::time::interval(Duration::from_millis(
        engine.config().timer_check_interval_ms.max(1),
    ));
    let mut sweep_tick = tokio::time::interval(Duration::from_millis(
        engine.config().temporal_cleanup_interval_ms.max(1),
    ));
    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    break;
                };
                match message {
                    ServiceMessage::Task(task) => {
                        task(&mut engine);
                        spawn_webhooks(
                            &mut engine,
                            &mut workers,
                            &transport,
                            &retry,
                            &sink,
                            &engine_name,
                        );
                    }
                    ServiceMessage::Stop { mode, done } => {
                        rx.close();
                        if mode == StopMode::DrainThenStop {
                            while let Some(ServiceMessage::Task(task)) = rx.recv().await {
                                task(&mut engine);
                            }
                        }
                        // In-flight webhooks are cancelled in both modes.
                        workers.abort_all();
                        let _ = done.send(engine.stop(mode));
                        return;
                    }
                }
            }
            _ = timer_tick.tick() => {
                if let Err(failure) = engine.tick() {
                    warn!(%failure, "timer tick failed");
                }
                spawn_webhooks(&mut engine, &mut workers, &transport, &retry, &sink, &engine_name);
            }
            _ = sweep_tick.tick() => {
                if let Err(failure) = engine.tick() {
                    warn!(%failure, "temporal sweep failed");
                }
                spawn_webhooks(&mut engine, &mut workers, &transport, &retry, &sink, &engine_name);
            }
        }
    }
}

/// Moves staged webhook jobs onto worker tasks.
fn spawn_webhooks(
    engine: &mut Engine,
    workers: &mut JoinSet<()>,
    transport: &Arc<dyn WebhookTransport>,
    retry: &WebhookRetryConfig,
    sink: &Arc<dyn ObservationSink>,
    engine_name: &str,
) {
    for job in engine.take_webhook_jobs() {
        let transport = Arc::clone(transport);
        let retry = retry.clone();
        let sink = Arc::clone(sink);
        let engine_name = engine_name.to_string();
        workers.spawn(async move {
            deliver_with_retries(&job, &transport, &retry, &sink, &engine_name).await;
        });
    }
}

/// Delivers one webhook with exponential backoff; final failure is non-fatal.
async fn deliver_with_retries(
    job: &WebhookJob,
    transport: &Arc<dyn WebhookTransport>,
    retry: &WebhookRetryConfig,
    sink: &Arc<dyn ObservationSink>,
    engine_name: &str,
) {
    let delays = backoff_delays(retry, &mut rand::thread_rng());
    let attempts = retry.attempts.max(1);

    for attempt in 0 .. attempts {
        match transport.deliver(&job.request).await {
            Ok(_) => return,
            Err(failure) => {
                let last = attempt + 1 == attempts;
                if last {
                    warn!(
                        rule = %job.rule_id,
                        url = %job.request.url,
                        %failure,
                        "webhook delivery failed after {attempts} attempts"
                    );
                    sink.observe(
                        engine_name,
                        &Observation::ActionFailed {
                            rule_id: job.rule_id.clone(),
                            action: "callWebhook".to_string(),
                            message: failure.to_string(),
                        },
                    );
                    return;
                }
                let delay = delays.get(attempt as usize).copied().unwrap_or(retry.base_ms);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

// ============================================================================
// SECTION: Reqwest Transport
// ============================================================================

/// Webhook transport delivering over HTTP with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    /// Shared HTTP client.
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a fresh client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn deliver(&self, request: &WebhookRequest) -> Result<WebhookResponse, WebhookError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(Duration::from_millis(request.timeout_ms));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                WebhookError::Timeout
            } else {
                WebhookError::Transport(error.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            Ok(WebhookResponse { status })
        } else {
            Err(WebhookError::Status(status))
        }
    }
}
