//! Runs one task payload inside a Boa context

use crate::conversion::{read_outcome, scope_declarations, set_global, string_literal};
use crate::natives::register_natives;
use crate::params::scan_parameters;
use crate::prelude::PRELUDE;
use crate::JsExecutionError;
use boa_engine::builtins::promise::OperationType;
use boa_engine::context::HostHooks;
use boa_engine::job::SimpleJobQueue;
use boa_engine::{Context, JsError, JsObject, JsResult, JsValue, Source};
use paratask_ipc::{Payload, WorkerOutcome};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

/// Records promises rejected without a handler so the event loop can
/// report them as task failures.
#[derive(Default)]
struct RejectionTracker {
    pending: RefCell<Vec<JsObject>>,
}

impl RejectionTracker {
    fn take_pending(&self) -> Vec<JsObject> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

impl HostHooks for RejectionTracker {
    fn promise_rejection_tracker(
        &self,
        promise: &JsObject,
        operation: OperationType,
        _context: &mut Context,
    ) {
        let mut pending = self.pending.borrow_mut();
        match operation {
            OperationType::Reject => pending.push(promise.clone()),
            OperationType::Handle => pending.retain(|p| !JsObject::equals(p, promise)),
        }
    }
}

/// A single-use JavaScript context for one task
pub struct TaskExecutor {
    context: Context,
    tracker: &'static RejectionTracker,
    fallback: Option<WorkerOutcome>,
}

impl TaskExecutor {
    /// Build a context with the worker prelude installed.
    /// `require()` resolves relative specifiers against `module_root`.
    ///
    /// The rejection tracker lives for the rest of the process; a worker
    /// builds exactly one context.
    pub fn new(module_root: &Path) -> Result<Self, JsExecutionError> {
        let tracker: &'static RejectionTracker = Box::leak(Box::new(RejectionTracker::default()));
        let mut context = Context::builder()
            .host_hooks(tracker)
            .job_queue(Rc::new(SimpleJobQueue::new()))
            .build()
            .map_err(|e| JsExecutionError::ContextError(e.to_string()))?;

        register_natives(&mut context).map_err(|e| JsExecutionError::ContextError(e.to_string()))?;

        context
            .eval(Source::from_bytes(PRELUDE))
            .map_err(|e| JsExecutionError::ContextError(e.to_string()))?;

        let root = string_literal(&module_root.to_string_lossy());
        context
            .eval(Source::from_bytes(&format!("__paratask.setModuleRoot({});", root)))
            .map_err(|e| JsExecutionError::ContextError(e.to_string()))?;

        Ok(Self {
            context,
            tracker,
            fallback: None,
        })
    }

    /// Run the payload until an outcome is recorded or nothing is left to do.
    ///
    /// Returns `None` when the logic finished without calling back and without
    /// failing; the worker then exits silently.
    pub async fn run(mut self, payload: &Payload) -> Option<WorkerOutcome> {
        let params = match scan_parameters(&payload.logic_source) {
            Ok(params) => params,
            Err(e) => return Some(WorkerOutcome::error(e.name(), &e)),
        };

        let declarations = match scope_declarations(&payload.scope) {
            Ok(declarations) => declarations,
            Err(e) => return Some(WorkerOutcome::error("TypeError", &e)),
        };

        let logic = payload.logic_source.trim_end().trim_end_matches(';');
        let wrapper = format!(
            "__paratask.logic = (function (require) {{\n{}return (\n{}\n);\n}})(__paratask.require);",
            declarations, logic
        );

        debug!(
            arity = params.arity(),
            scope_keys = payload.scope.len(),
            "Invoking task logic"
        );

        if let Err(err) = self.eval(&wrapper) {
            self.report_thrown(err);
        } else if let Err(err) = self.eval(&format!("__paratask.invoke({});", params.arity())) {
            self.report_thrown(err);
        }

        self.event_loop().await
    }

    async fn event_loop(&mut self) -> Option<WorkerOutcome> {
        loop {
            self.context.run_jobs();
            self.adopt_rejections();

            if let Some(outcome) = self.take_outcome() {
                return Some(outcome);
            }

            let delay = match self.next_timer_delay() {
                Ok(Some(delay)) => delay,
                Ok(None) => {
                    debug!("No pending work left and no outcome recorded");
                    return None;
                }
                Err(err) => {
                    self.report_thrown(err);
                    continue;
                }
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }

            if let Err(err) = self.eval("__paratask.fireNextTimer();") {
                self.report_thrown(err);
            }
        }
    }

    fn adopt_rejections(&mut self) {
        loop {
            let pending = self.tracker.take_pending();
            if pending.is_empty() {
                return;
            }

            for promise in pending {
                debug!("Adopting unhandled promise rejection");
                let adopted = set_global(&mut self.context, "__paratask_rejected", promise.into())
                    .and_then(|_| self.eval("__paratask.adoptRejection(__paratask_rejected);"));
                if let Err(err) = adopted {
                    self.report_thrown(err);
                }
            }

            self.context.run_jobs();
        }
    }

    fn take_outcome(&mut self) -> Option<WorkerOutcome> {
        if let Some(outcome) = self.fallback.take() {
            return Some(outcome);
        }

        match self.eval("__paratask.outcomeJson();") {
            Ok(value) => {
                let json = value.as_string().map(|s| s.to_std_string_escaped())?;
                Some(read_outcome(&json).unwrap_or_else(|e| WorkerOutcome::error("Error", e)))
            }
            Err(err) => Some(WorkerOutcome::error("Error", err)),
        }
    }

    fn next_timer_delay(&mut self) -> JsResult<Option<Duration>> {
        let value = self.eval("__paratask.nextTimerDelay();")?;
        Ok(value
            .as_number()
            .filter(|ms| *ms >= 0.0)
            .map(|ms| Duration::from_millis(ms.ceil() as u64)))
    }

    /// Route an uncaught error through the prelude's failure recorder
    fn report_thrown(&mut self, err: JsError) {
        debug!(error = %err, "Task raised an uncaught error");
        let thrown = err.to_opaque(&mut self.context);
        let routed = set_global(&mut self.context, "__paratask_thrown", thrown)
            .and_then(|_| self.eval("__paratask.fail(__paratask_thrown);"));

        if let Err(secondary) = routed {
            warn!(error = %secondary, "Failed to record uncaught error in task runtime");
            if self.fallback.is_none() {
                self.fallback = Some(WorkerOutcome::error("Error", err));
            }
        }
    }

    fn eval(&mut self, code: &str) -> JsResult<JsValue> {
        self.context.eval(Source::from_bytes(code))
    }
}

/// Execute a decoded payload in a fresh context
pub async fn execute_payload(payload: &Payload) -> Option<WorkerOutcome> {
    let module_root = payload
        .module_root
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match TaskExecutor::new(&module_root) {
        Ok(executor) => executor.run(payload).await,
        Err(e) => Some(WorkerOutcome::error("Error", e)),
    }
}
