//! Termination engine: one idempotent contract over every participant style
//!
//! Participants answer termination requests synchronously, with a deferred
//! value, by raising an error, or with a raw protocol response. The engine
//! folds all of these into [`Termination`] answers that the coordinator can
//! poll repeatedly:
//!
//! 1. an operation without a bound callback succeeds immediately;
//! 2. a pending deferred result for the same (participant, action) is
//!    answered with `Accepted` until it resolves, then consumed once;
//! 3. otherwise the callback is invoked with the arity it declared and its
//!    answer normalized.
//!
//! Calls for the same (participant, action) are serialized; everything else
//! runs concurrently. The engine never retries and never waits on a deferred
//! value: it answers `Accepted` and relies on the next poll.

use crate::stats::EngineStats;
use crate::{
    ActionId, Callback, Deferred, DefinitionError, EngineError, EngineStatsSnapshot,
    HandlerError, HandlerOutput, HandlerResult, InvocationKey, KeyedLocks, Operation,
    ParticipantDescriptor, ParticipantRegistry, ParticipantStatus, PendingOutcome, PendingState,
    ProtocolResponse, ReturnKind, Termination,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;

pub struct TerminationEngine {
    registry: Arc<ParticipantRegistry>,
    pending: Mutex<HashMap<InvocationKey, Arc<PendingOutcome>>>,
    locks: KeyedLocks,
    runtime: Handle,
    stats: Arc<EngineStats>,
}

impl TerminationEngine {
    /// Deferred participant results are driven on `runtime`
    pub fn new(registry: Arc<ParticipantRegistry>, runtime: Handle) -> Self {
        Self {
            registry,
            pending: Mutex::new(HashMap::new()),
            locks: KeyedLocks::new(),
            runtime,
            stats: Arc::new(EngineStats::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ParticipantRegistry> {
        &self.registry
    }

    pub fn complete(
        &self,
        owner: &str,
        tx: &ActionId,
        parent: Option<&ActionId>,
    ) -> Result<Termination, EngineError> {
        self.terminate(owner, Operation::Complete, tx, parent)
    }

    pub fn compensate(
        &self,
        owner: &str,
        tx: &ActionId,
        parent: Option<&ActionId>,
    ) -> Result<Termination, EngineError> {
        self.terminate(owner, Operation::Compensate, tx, parent)
    }

    pub fn status(
        &self,
        owner: &str,
        tx: &ActionId,
        parent: Option<&ActionId>,
    ) -> Result<Termination, EngineError> {
        self.terminate(owner, Operation::Status, tx, parent)
    }

    pub fn forget(
        &self,
        owner: &str,
        tx: &ActionId,
        parent: Option<&ActionId>,
    ) -> Result<Termination, EngineError> {
        self.terminate(owner, Operation::Forget, tx, parent)
    }

    /// Run `operation` against the participant registered as `owner`
    pub fn terminate(
        &self,
        owner: &str,
        operation: Operation,
        tx: &ActionId,
        parent: Option<&ActionId>,
    ) -> Result<Termination, EngineError> {
        let descriptor = self.registry.lookup(owner)?;

        let Some(callback) = descriptor.callback(operation) else {
            tracing::debug!(owner = %owner, operation = %operation, lra_id = %tx, "No callback bound, nothing to do");
            EngineStats::bump(&self.stats.noop_calls);
            return Ok(operation.terminal_success());
        };

        let key = InvocationKey::new(owner, tx);
        self.locks.with_lock(&key, || {
            let call = Dispatch {
                descriptor: &descriptor,
                callback,
                operation,
                key: &key,
                tx,
                parent,
            };
            self.dispatch(&call)
        })
    }

    fn dispatch(&self, call: &Dispatch<'_>) -> Result<Termination, EngineError> {
        if let Some(pending) = self.pending_outcome(call.key) {
            let Some(result) = pending.take() else {
                tracing::debug!(key = %call.key, operation = %call.operation, "Deferred result still outstanding");
                EngineStats::bump(&self.stats.accepted);
                return Ok(Termination::Accepted);
            };

            self.remove_pending(call.key);
            EngineStats::bump(&self.stats.pending_consumed);

            if is_in_progress(&result) {
                tracing::warn!(
                    owner = %call.descriptor.owner(),
                    lra_id = %call.tx,
                    "Participant resolved its deferred result to an in-progress value; invoking it again"
                );
                EngineStats::bump(&self.stats.contract_inconsistencies);
            } else {
                return self.normalize_resolved(call, pending.operation(), result);
            }
        }

        self.invoke(call)
    }

    fn invoke(&self, call: &Dispatch<'_>) -> Result<Termination, EngineError> {
        EngineStats::bump(&self.stats.invocations);
        tracing::debug!(
            owner = %call.descriptor.owner(),
            operation = %call.operation,
            lra_id = %call.tx,
            arity = call.callback.signature().arity(),
            "Invoking participant callback"
        );

        match call.callback.invoke(call.tx, call.parent) {
            Ok(output) => {
                let declared = &call.callback.signature().returns;
                check_declared(call.descriptor.owner(), call.operation, declared, &output)?;
                match output {
                    HandlerOutput::Deferred(deferred) => Ok(self.defer(call, deferred)),
                    immediate => Ok(self.normalize(call.operation, immediate)),
                }
            }
            Err(error) => Ok(self.map_failure(call, call.operation, error)),
        }
    }

    /// Normalize the consumed value of a pending outcome created by `origin`
    fn normalize_resolved(
        &self,
        call: &Dispatch<'_>,
        origin: Operation,
        result: HandlerResult,
    ) -> Result<Termination, EngineError> {
        match result {
            Ok(HandlerOutput::Deferred(_)) => Err(DefinitionError::UnexpectedReturn {
                owner: call.descriptor.owner().into(),
                operation: origin,
                expected: "a resolved value".into(),
                found: "deferred".into(),
            }
            .into()),
            Ok(output) => {
                if let Some(callback) = call.descriptor.callback(origin) {
                    let declared = callback.signature().returns.resolved();
                    check_declared(call.descriptor.owner(), origin, declared, &output)?;
                }
                Ok(self.normalize(origin, output))
            }
            Err(error) => Ok(self.map_failure(call, origin, error)),
        }
    }

    fn normalize(&self, operation: Operation, output: HandlerOutput) -> Termination {
        match output {
            HandlerOutput::Unit => operation.terminal_success(),
            HandlerOutput::Status(status) => Termination::Status(status),
            HandlerOutput::Response(response) => {
                EngineStats::bump(&self.stats.protocol_overrides);
                Termination::Response(response)
            }
            HandlerOutput::Deferred(_) => Termination::Accepted,
        }
    }

    fn defer(&self, call: &Dispatch<'_>, deferred: Deferred) -> Termination {
        let pending = Arc::new(PendingOutcome::new(call.operation));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call.key.clone(), pending.clone());
        EngineStats::bump(&self.stats.pending_created);
        EngineStats::bump(&self.stats.accepted);

        let key = call.key.clone();
        self.runtime.spawn(async move {
            let result = deferred.await;
            if pending.resolve(result) {
                tracing::debug!(key = %key, "Deferred participant result resolved");
            } else {
                tracing::warn!(key = %key, "Deferred participant result resolved twice; keeping the first");
            }
        });

        Termination::Accepted
    }

    fn map_failure(&self, call: &Dispatch<'_>, operation: Operation, error: HandlerError) -> Termination {
        match error {
            HandlerError::Protocol(response) => {
                EngineStats::bump(&self.stats.protocol_overrides);
                Termination::Response(response)
            }
            HandlerError::Failed(reason) => {
                EngineStats::bump(&self.stats.participant_failures);
                tracing::debug!(
                    owner = %call.descriptor.owner(),
                    operation = %operation,
                    lra_id = %call.tx,
                    reason = %reason,
                    "Participant callback failed"
                );
                match operation {
                    Operation::Complete => Termination::Status(ParticipantStatus::FailedToComplete),
                    Operation::Compensate => Termination::Status(ParticipantStatus::FailedToCancel),
                    Operation::Status | Operation::Forget => {
                        Termination::Response(ProtocolResponse::server_error())
                    }
                }
            }
        }
    }

    fn pending_outcome(&self, key: &InvocationKey) -> Option<Arc<PendingOutcome>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remove_pending(&self, key: &InvocationKey) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// State of the pending outcome for `owner` and `tx`, if one exists
    pub fn pending_state(&self, owner: &str, tx: &ActionId) -> Option<PendingState> {
        self.pending_outcome(&InvocationKey::new(owner, tx))
            .map(|pending| pending.state())
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }
}

struct Dispatch<'a> {
    descriptor: &'a ParticipantDescriptor,
    callback: &'a Callback,
    operation: Operation,
    key: &'a InvocationKey,
    tx: &'a ActionId,
    parent: Option<&'a ActionId>,
}

/// A resolved value that still says "working on it"
fn is_in_progress(result: &HandlerResult) -> bool {
    match result {
        Ok(HandlerOutput::Status(status)) => status.is_in_progress(),
        Ok(HandlerOutput::Response(response)) => response.is_accepted(),
        _ => false,
    }
}

fn check_declared(
    owner: &str,
    operation: Operation,
    declared: &ReturnKind,
    output: &HandlerOutput,
) -> Result<(), DefinitionError> {
    if declared.accepts(output) {
        return Ok(());
    }
    tracing::error!(owner = %owner, operation = %operation, declared = %declared.name(), returned = output.kind(), "Participant returned an undeclared type");
    Err(DefinitionError::UnexpectedReturn {
        owner: owner.into(),
        operation,
        expected: declared.name().into(),
        found: output.kind().into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CallArgs, Candidate, Compensator, Completer, Completion, Forgetter, Signature,
        StatusProvider,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const OWNER: &str = "Payments";

    /// Participant whose complete answers later through a completion handle
    #[derive(Default)]
    struct Async {
        calls: AtomicUsize,
        completions: Mutex<Vec<Completion>>,
    }

    impl Async {
        fn next_completion(&self) -> Completion {
            self.completions.lock().unwrap().pop().expect("no outstanding completion")
        }
    }

    impl Completer for Async {
        fn complete(&self, _args: CallArgs<'_>) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (deferred, completion) = Deferred::channel();
            self.completions.lock().unwrap().push(completion);
            Ok(deferred.into())
        }
    }

    /// Participant with synchronous, failing callbacks
    struct Failing {
        protocol: Option<ProtocolResponse>,
    }

    impl Completer for Failing {
        fn complete(&self, _args: CallArgs<'_>) -> HandlerResult {
            Err(HandlerError::failed("ledger offline"))
        }
    }

    impl Compensator for Failing {
        fn compensate(&self, _args: CallArgs<'_>) -> HandlerResult {
            match &self.protocol {
                Some(response) => Err(HandlerError::Protocol(response.clone())),
                None => Err(HandlerError::failed("refund rejected")),
            }
        }
    }

    impl StatusProvider for Failing {
        fn status(&self, _args: CallArgs<'_>) -> HandlerResult {
            Err(HandlerError::failed("unknown"))
        }
    }

    impl Forgetter for Failing {
        fn forget(&self, _args: CallArgs<'_>) -> HandlerResult {
            Ok(HandlerOutput::Unit)
        }
    }

    fn engine_with(candidate: crate::ScannedCandidate) -> TerminationEngine {
        let registry = Arc::new(ParticipantRegistry::new());
        registry.discover(vec![candidate]).unwrap();
        TerminationEngine::new(registry, Handle::current())
    }

    async fn wait_resolved(engine: &TerminationEngine, tx: &ActionId) {
        for _ in 0..200 {
            if engine.pending_state(OWNER, tx) == Some(PendingState::Resolved) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("deferred result never resolved");
    }

    fn async_engine() -> (Arc<Async>, TerminationEngine) {
        let participant = Arc::new(Async::default());
        let engine = engine_with(
            Candidate::shared(OWNER, participant.clone())
                .completer(Signature::with_action(ReturnKind::deferred(ReturnKind::Unit)))
                .scan(),
        );
        (participant, engine)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deferred_lifecycle() {
        let (participant, engine) = async_engine();
        let tx = ActionId::new("http://c/lra/1");

        assert_eq!(engine.complete(OWNER, &tx, None).unwrap(), Termination::Accepted);
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.pending_state(OWNER, &tx), Some(PendingState::Unresolved));

        // unresolved: answered without re-invoking
        assert_eq!(engine.complete(OWNER, &tx, None).unwrap(), Termination::Accepted);
        assert_eq!(participant.calls.load(Ordering::SeqCst), 1);

        participant.next_completion().succeed(HandlerOutput::Unit);
        wait_resolved(&engine, &tx).await;

        assert_eq!(
            engine.complete(OWNER, &tx, None).unwrap(),
            Termination::Status(ParticipantStatus::Completed)
        );
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(participant.calls.load(Ordering::SeqCst), 1);

        // nothing pending any more: the handler runs again
        assert_eq!(engine.complete(OWNER, &tx, None).unwrap(), Termination::Accepted);
        assert_eq!(participant.calls.load(Ordering::SeqCst), 2);

        let stats = engine.stats();
        assert_eq!(stats.pending_created, 2);
        assert_eq!(stats.pending_consumed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resolved_in_progress_value_reinvokes() {
        let (participant, engine) = async_engine();
        let tx = ActionId::new("http://c/lra/2");

        engine.complete(OWNER, &tx, None).unwrap();
        participant
            .next_completion()
            .succeed(HandlerOutput::Status(ParticipantStatus::Completing));
        wait_resolved(&engine, &tx).await;

        // Completing was declared as unit, but the in-progress check comes first
        assert_eq!(engine.complete(OWNER, &tx, None).unwrap(), Termination::Accepted);
        assert_eq!(participant.calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stats().contract_inconsistencies, 1);
        assert_eq!(engine.pending_state(OWNER, &tx), Some(PendingState::Unresolved));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deferred_failure_maps_to_failed_status() {
        let (participant, engine) = async_engine();
        let tx = ActionId::new("http://c/lra/3");

        engine.complete(OWNER, &tx, None).unwrap();
        participant
            .next_completion()
            .fail(HandlerError::failed("timeout talking to bank"));
        wait_resolved(&engine, &tx).await;

        assert_eq!(
            engine.complete(OWNER, &tx, None).unwrap(),
            Termination::Status(ParticipantStatus::FailedToComplete)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_nested_deferred_is_definition_error() {
        let (participant, engine) = async_engine();
        let tx = ActionId::new("http://c/lra/4");

        engine.complete(OWNER, &tx, None).unwrap();
        let (inner, _keep) = Deferred::channel();
        participant.next_completion().succeed(HandlerOutput::Deferred(inner));
        wait_resolved(&engine, &tx).await;

        assert!(matches!(
            engine.complete(OWNER, &tx, None),
            Err(EngineError::Definition(DefinitionError::UnexpectedReturn { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_poll_sees_pending_complete() {
        let (participant, engine) = async_engine();
        let tx = ActionId::new("http://c/lra/5");

        engine.complete(OWNER, &tx, None).unwrap();
        // no status callback bound: answered as a no-op
        assert_eq!(engine.status(OWNER, &tx, None).unwrap(), Termination::Done);

        participant.next_completion().succeed(HandlerOutput::Unit);
        wait_resolved(&engine, &tx).await;
        assert_eq!(
            engine.complete(OWNER, &tx, None).unwrap(),
            Termination::Status(ParticipantStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_protocol_response_passes_through_compensate() {
        let teapot = ProtocolResponse::new(418).with_body("cannot undo");
        let engine = engine_with(
            Candidate::shared(OWNER, Arc::new(Failing { protocol: Some(teapot.clone()) }))
                .compensator(Signature::with_parent(ReturnKind::Response))
                .scan(),
        );
        let tx = ActionId::new("tx");
        let parent = ActionId::new("parent");

        assert_eq!(
            engine.compensate(OWNER, &tx, Some(&parent)).unwrap(),
            Termination::Response(teapot)
        );
    }

    #[tokio::test]
    async fn test_failures_map_per_operation() {
        let engine = engine_with(
            Candidate::shared(OWNER, Arc::new(Failing { protocol: None }))
                .completer(Signature::new(ReturnKind::Unit))
                .compensator(Signature::new(ReturnKind::Unit))
                .status_provider(Signature::with_action(ReturnKind::Status))
                .forgetter(Signature::with_action(ReturnKind::Unit))
                .scan(),
        );
        let tx = ActionId::new("tx");

        assert_eq!(
            engine.complete(OWNER, &tx, None).unwrap(),
            Termination::Status(ParticipantStatus::FailedToComplete)
        );
        assert_eq!(
            engine.compensate(OWNER, &tx, None).unwrap(),
            Termination::Status(ParticipantStatus::FailedToCancel)
        );
        assert_eq!(
            engine.status(OWNER, &tx, None).unwrap(),
            Termination::Response(ProtocolResponse::server_error())
        );
        assert_eq!(engine.forget(OWNER, &tx, None).unwrap(), Termination::Done);
        assert_eq!(engine.stats().participant_failures, 3);
    }

    #[tokio::test]
    async fn test_unbound_operations_succeed() {
        let engine = engine_with(
            Candidate::shared(OWNER, Arc::new(Failing { protocol: None }))
                .status_provider(Signature::new(ReturnKind::Status))
                .scan(),
        );
        let tx = ActionId::new("tx");

        assert_eq!(
            engine.complete(OWNER, &tx, None).unwrap(),
            Termination::Status(ParticipantStatus::Completed)
        );
        assert_eq!(
            engine.compensate(OWNER, &tx, None).unwrap(),
            Termination::Status(ParticipantStatus::Compensated)
        );
        assert_eq!(engine.forget(OWNER, &tx, None).unwrap(), Termination::Done);
        assert_eq!(engine.stats().noop_calls, 3);
    }

    #[tokio::test]
    async fn test_unknown_participant() {
        let engine = TerminationEngine::new(Arc::new(ParticipantRegistry::new()), Handle::current());
        let result = engine.complete("Ghost", &ActionId::new("tx"), None);
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_undeclared_return_type() {
        let engine = engine_with(
            Candidate::shared(OWNER, Arc::new(Failing { protocol: None }))
                .bind(
                    Operation::Complete,
                    Signature::new(ReturnKind::Status),
                    |_, _| Ok(HandlerOutput::Unit),
                )
                .scan(),
        );
        let result = engine.complete(OWNER, &ActionId::new("tx"), None);
        assert!(matches!(
            result,
            Err(EngineError::Definition(DefinitionError::UnexpectedReturn { .. }))
        ));
    }

    #[tokio::test]
    async fn test_arguments_follow_declared_arity() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let engine = engine_with(
            Candidate::shared(OWNER, Arc::new(Failing { protocol: None }))
                .bind(
                    Operation::Complete,
                    Signature::with_parent(ReturnKind::Unit),
                    move |_, args| {
                        record.lock().unwrap().push((
                            args.action().cloned(),
                            args.parent().cloned(),
                        ));
                        Ok(HandlerOutput::Unit)
                    },
                )
                .scan(),
        );
        let tx = ActionId::new("child");
        let parent = ActionId::new("parent");

        engine.complete(OWNER, &tx, Some(&parent)).unwrap();
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(Some(tx), Some(parent))]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_calls_are_serialized() {
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let (i, m) = (inside.clone(), max_inside.clone());
        let engine = Arc::new(engine_with(
            Candidate::shared(OWNER, Arc::new(Failing { protocol: None }))
                .bind(
                    Operation::Complete,
                    Signature::new(ReturnKind::Unit),
                    move |_, _| {
                        let now = i.fetch_add(1, Ordering::SeqCst) + 1;
                        m.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(5));
                        i.fetch_sub(1, Ordering::SeqCst);
                        Ok(HandlerOutput::Unit)
                    },
                )
                .scan(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::task::spawn_blocking(move || {
                    engine.complete(OWNER, &ActionId::new("shared"), None)
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(
                handle.await.unwrap().unwrap(),
                Termination::Status(ParticipantStatus::Completed)
            );
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
