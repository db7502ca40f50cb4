//! Fan-out cluster invoker.
//!
//! With no merge strategy configured the call goes to a single candidate.
//! With one configured, every candidate is invoked on its own task and the
//! successful results are merged in candidate listing order.
//!
//! Two deliberate reproductions of long-standing behavior, not accidents:
//! a per-candidate timeout or transport failure aborts the whole call even
//! though a candidate that *returns* a fault is merely excluded; and tasks
//! already spawned for later candidates are not cancelled when an earlier
//! failure abandons the wait, so their calls keep running in the
//! background.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::Directory;
use super::merger::{is_default_strategy, merger_name_for};
use crate::error::{Result, RpcError, RpcErrorKind};
use crate::invocation::{Invocation, RpcOutcome};
use crate::protocol::Invoker;
use crate::runtime::RpcRuntime;
use crate::url::Url;

const MERGER_KEY: &str = "merger";
const TIMEOUT_KEY: &str = "timeout";
const DEFAULT_TIMEOUT_MS: u64 = 1000;

pub struct MergeableClusterInvoker {
    directory: Arc<dyn Directory>,
    runtime: Arc<RpcRuntime>,
}

impl MergeableClusterInvoker {
    pub fn new(directory: Arc<dyn Directory>, runtime: Arc<RpcRuntime>) -> Self {
        Self { directory, runtime }
    }

    async fn invoke_single(
        &self,
        invokers: Vec<Arc<dyn Invoker>>,
        invocation: Invocation,
    ) -> Result<RpcOutcome> {
        for invoker in &invokers {
            if invoker.is_available() {
                return invoker.invoke(invocation).await;
            }
        }
        // Best effort: none reported available, try the first anyway.
        match invokers.first() {
            Some(invoker) => invoker.invoke(invocation).await,
            None => Err(RpcError::new(
                RpcErrorKind::Forbidden,
                format!("no provider available for {}", self.directory.url().service_key()),
            )),
        }
    }

    async fn invoke_merging(
        &self,
        invokers: Vec<Arc<dyn Invoker>>,
        invocation: Invocation,
        merger: &str,
    ) -> Result<RpcOutcome> {
        let timeout = Duration::from_millis(self.directory.url().method_u64_parameter(
            invocation.method(),
            TIMEOUT_KEY,
            DEFAULT_TIMEOUT_MS,
        ));

        // One task per candidate, tagged with its service key for fault
        // attribution.
        let handles: Vec<(String, JoinHandle<Result<RpcOutcome>>)> = invokers
            .iter()
            .map(|invoker| {
                let invoker = Arc::clone(invoker);
                let invocation = invocation.clone();
                let service_key = invoker.url().service_key();
                let handle = tokio::spawn(async move { invoker.invoke(invocation).await });
                (service_key, handle)
            })
            .collect();

        // Await sequentially in listing order so merge input stays
        // deterministic regardless of completion order.
        let mut outcomes = Vec::with_capacity(handles.len());
        for (service_key, handle) in handles {
            let outcome = match tokio::time::timeout(timeout, handle).await {
                Err(_) => {
                    return Err(RpcError::timeout(format!(
                        "failed to invoke service {service_key}: no result within {timeout:?}"
                    )));
                }
                Ok(Err(join_err)) => {
                    return Err(RpcError::unknown(format!(
                        "failed to invoke service {service_key}: {join_err}"
                    )));
                }
                Ok(Ok(Err(err))) => {
                    let kind = err.kind();
                    return Err(RpcError::with_source(
                        kind,
                        format!("failed to invoke service {service_key}"),
                        err,
                    ));
                }
                Ok(Ok(Ok(outcome))) => outcome,
            };

            if let Some(fault) = outcome.fault() {
                // A carried fault excludes this candidate but is not fatal.
                error!(%service_key, %fault, "candidate completed with fault, excluded from merge");
            } else {
                outcomes.push(outcome);
            }
        }

        if outcomes.is_empty() {
            return Ok(RpcOutcome::empty());
        }
        if outcomes.len() == 1 {
            return Ok(outcomes.into_iter().next().expect("one outcome"));
        }
        if !invocation.returns_value() {
            return Ok(RpcOutcome::empty());
        }

        let values: Vec<Value> = outcomes
            .into_iter()
            .map(|o| o.into_value().map(|v| v.unwrap_or(Value::Null)))
            .collect::<Result<_>>()?;

        let merged = if let Some(function_name) = merger.strip_prefix('.') {
            // Reduce left-to-right with the registered merge function,
            // starting from the first result.
            let function = self.runtime.merge_functions().get(function_name)?;
            let merge = function.as_ref();
            let mut values = values.into_iter();
            let mut accumulator = values.next().expect("at least two results");
            for value in values {
                accumulator = merge(accumulator, value)?;
            }
            accumulator
        } else {
            let name = if is_default_strategy(merger) {
                merger_name_for(&values[0]).ok_or_else(|| {
                    RpcError::unsupported(format!(
                        "no automatic merger for result of method {}",
                        invocation.method()
                    ))
                })?
            } else {
                merger
            };
            self.runtime.mergers().get(name)?.merge(values)?
        };

        Ok(RpcOutcome::from_value(merged))
    }
}

#[async_trait]
impl Invoker for MergeableClusterInvoker {
    fn url(&self) -> &Url {
        self.directory.url()
    }

    fn is_available(&self) -> bool {
        self.directory.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome> {
        let invokers = self.directory.list(&invocation)?;
        let merger = self
            .directory
            .url()
            .method_parameter(invocation.method(), MERGER_KEY)
            .unwrap_or("")
            .to_string();

        if merger.is_empty() {
            debug!(method = invocation.method(), "no merger configured, single dispatch");
            self.invoke_single(invokers, invocation).await
        } else {
            self.invoke_merging(invokers, invocation, &merger).await
        }
    }

    fn destroy(&self) {
        self.directory.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StaticDirectory;
    use crate::invocation::RemoteFault;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Behavior {
        Value(Value),
        Fault,
        Fail,
        Slow(Duration, Value),
    }

    struct Candidate {
        url: Url,
        available: bool,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl Candidate {
        fn new(group: &str, available: bool, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                url: Url::new("larch", "127.0.0.1", 20880)
                    .with_path("demo.Search")
                    .with_parameter("group", group),
                available,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Invoker for Candidate {
        fn url(&self) -> &Url {
            &self.url
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn invoke(&self, _invocation: Invocation) -> Result<RpcOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Value(value) => Ok(RpcOutcome::from_value(value.clone())),
                Behavior::Fault => Ok(RpcOutcome::from_fault(RemoteFault::new("service", "broken"))),
                Behavior::Fail => Err(RpcError::network("connection refused")),
                Behavior::Slow(delay, value) => {
                    tokio::time::sleep(*delay).await;
                    Ok(RpcOutcome::from_value(value.clone()))
                }
            }
        }

        fn destroy(&self) {}
    }

    fn cluster(invokers: Vec<Arc<Candidate>>, params: &[(&str, &str)]) -> MergeableClusterInvoker {
        let url = Url::new("larch", "127.0.0.1", 20880)
            .with_path("demo.Search")
            .with_parameters(params.iter().map(|(k, v)| (*k, *v)));
        let invokers = invokers
            .into_iter()
            .map(|c| c as Arc<dyn Invoker>)
            .collect();
        MergeableClusterInvoker::new(
            Arc::new(StaticDirectory::new(url, invokers)),
            RpcRuntime::new(),
        )
    }

    #[tokio::test]
    async fn faulted_candidate_is_excluded_from_merge() {
        // a completes last but is listed first: merge order follows the
        // listing, not completion timing.
        let a = Candidate::new(
            "a",
            true,
            Behavior::Slow(Duration::from_millis(30), json!(["a1", "a2"])),
        );
        let b = Candidate::new("b", true, Behavior::Fault);
        let c = Candidate::new("c", true, Behavior::Value(json!(["c1"])));
        let cluster = cluster(
            vec![a.clone(), b.clone(), c.clone()],
            &[("merger", "true")],
        );

        let outcome = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.value(), Some(&json!(["a1", "a2", "c1"])));
    }

    #[tokio::test]
    async fn no_merger_picks_first_available() {
        let a = Candidate::new("a", false, Behavior::Value(json!("from-a")));
        let b = Candidate::new("b", true, Behavior::Value(json!("from-b")));
        let cluster = cluster(vec![a.clone(), b.clone()], &[]);

        let outcome = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.value(), Some(&json!("from-b")));
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_available_candidate_falls_back_to_first() {
        let a = Candidate::new("a", false, Behavior::Value(json!("from-a")));
        let cluster = cluster(vec![a.clone()], &[]);

        let outcome = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.value(), Some(&json!("from-a")));
    }

    #[tokio::test]
    async fn candidate_error_aborts_whole_call() {
        let a = Candidate::new("a", true, Behavior::Value(json!(["a"])));
        let b = Candidate::new("b", true, Behavior::Fail);
        let cluster = cluster(vec![a, b], &[("merger", "true")]);

        let err = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Network);
        assert!(err.message().contains("b/demo.Search"));
    }

    #[tokio::test]
    async fn candidate_timeout_aborts_whole_call() {
        let a = Candidate::new(
            "a",
            true,
            Behavior::Slow(Duration::from_millis(200), json!(["a"])),
        );
        let b = Candidate::new("b", true, Behavior::Value(json!(["b"])));
        let cluster = cluster(vec![a, b], &[("merger", "true"), ("timeout", "20")]);

        let err = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Timeout);
        assert!(err.message().contains("a/demo.Search"));
    }

    #[tokio::test]
    async fn single_success_is_returned_unwrapped() {
        let a = Candidate::new("a", true, Behavior::Fault);
        let b = Candidate::new("b", true, Behavior::Value(json!("solo")));
        let cluster = cluster(vec![a, b], &[("merger", "true")]);

        let outcome = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap();
        // Not merged: a scalar would have no automatic merger.
        assert_eq!(outcome.value(), Some(&json!("solo")));
    }

    #[tokio::test]
    async fn void_method_yields_empty_outcome() {
        let a = Candidate::new("a", true, Behavior::Value(json!(["a"])));
        let b = Candidate::new("b", true, Behavior::Value(json!(["b"])));
        let cluster = cluster(vec![a, b], &[("merger", "true")]);

        let outcome = cluster
            .invoke(Invocation::new("ping", vec![]).returning_nothing())
            .await
            .unwrap();
        assert!(outcome.value().is_none());
    }

    #[tokio::test]
    async fn merge_function_folds_left_to_right() {
        let a = Candidate::new("a", true, Behavior::Value(json!(10)));
        let b = Candidate::new("b", true, Behavior::Value(json!(3)));
        let c = Candidate::new("c", true, Behavior::Value(json!(5)));
        let cluster = cluster(vec![a, b, c], &[("merger", ".subtract")]);
        cluster.runtime.merge_functions().register("subtract", || {
            Arc::new(|acc: Value, next: Value| {
                let (a, b) = (acc.as_i64().unwrap_or(0), next.as_i64().unwrap_or(0));
                Ok(json!(a - b))
            })
        });

        let outcome = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.value(), Some(&json!(2)));
    }

    #[tokio::test]
    async fn named_merger_must_exist() {
        let a = Candidate::new("a", true, Behavior::Value(json!(["a"])));
        let b = Candidate::new("b", true, Behavior::Value(json!(["b"])));
        let cluster = cluster(vec![a, b], &[("merger", "zip")]);

        let err = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn zero_successes_yield_empty_outcome() {
        let a = Candidate::new("a", true, Behavior::Fault);
        let b = Candidate::new("b", true, Behavior::Fault);
        let cluster = cluster(vec![a, b], &[("merger", "true")]);

        let outcome = cluster
            .invoke(Invocation::new("find", vec![]))
            .await
            .unwrap();
        assert!(outcome.value().is_none());
        assert!(!outcome.has_fault());
    }
}
