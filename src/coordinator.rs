//! In-memory coordinator for tests and single-process deployments

use crate::{
    links, ActionId, CoordinatorClient, CoordinatorError, EnlistmentLinks, LraStatus, Operation,
    ParticipantStatus, Termination, TerminationEngine,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Coordinator's record of one action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LraData {
    pub id: ActionId,
    pub client_id: Box<str>,
    pub status: LraStatus,
    pub parent: Option<ActionId>,
    pub is_top_level: bool,
    pub started_at_millis: u64,
    pub finished_at_millis: Option<u64>,
}

/// One participant enlistment as recorded by [`CoordinatorClient::join`]
#[derive(Clone, Debug)]
pub struct Enlistment {
    pub links: EnlistmentLinks,
    pub recovery_url: Box<str>,
    pub data: Option<Box<str>>,
}

struct Entry {
    data: LraData,
    enlisted: Vec<Enlistment>,
}

/// Current time in milliseconds since UNIX epoch
fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Coordinator that keeps every action in memory.
///
/// When wired to a [`TerminationEngine`] it ends actions by calling the
/// enlisted participants' complete/compensate callbacks directly; otherwise
/// it only tracks status.
pub struct InMemoryCoordinator {
    base_url: Box<str>,
    actions: RwLock<HashMap<ActionId, Entry>>,
    counter: AtomicU64,
    engine: Option<Arc<TerminationEngine>>,
    fail_start: AtomicBool,
    fail_join: AtomicBool,
    starts: AtomicU64,
    joins: AtomicU64,
    closes: AtomicU64,
    cancels: AtomicU64,
}

impl InMemoryCoordinator {
    pub fn new(base_url: impl Into<Box<str>>) -> Self {
        Self {
            base_url: base_url.into(),
            actions: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(1),
            engine: None,
            fail_start: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            starts: AtomicU64::new(0),
            joins: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            cancels: AtomicU64::new(0),
        }
    }

    /// Drive participant callbacks through `engine` on close/cancel
    pub fn with_engine(mut self, engine: Arc<TerminationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Make subsequent `start` calls fail
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `join` calls fail
    pub fn set_fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: &ActionId) -> Option<LraData> {
        self.read().get(id).map(|entry| entry.data.clone())
    }

    pub fn enlisted(&self, id: &ActionId) -> Vec<Enlistment> {
        self.read()
            .get(id)
            .map(|entry| entry.enlisted.clone())
            .unwrap_or_default()
    }

    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn join_count(&self) -> u64 {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> u64 {
        self.cancels.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ActionId, Entry>> {
        self.actions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ActionId, Entry>> {
        self.actions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move an active action into `transient` and hand back what ending it needs
    fn begin_end(
        &self,
        id: &ActionId,
        transient: LraStatus,
    ) -> Result<(Option<ActionId>, Vec<Enlistment>), CoordinatorError> {
        let mut actions = self.write();
        let entry = actions
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))?;
        if entry.data.status != LraStatus::Active {
            return Err(CoordinatorError::Rejected {
                id: id.clone(),
                reason: format!("action is {:?}", entry.data.status).into(),
            });
        }
        entry.data.status = transient;
        Ok((entry.data.parent.clone(), entry.enlisted.clone()))
    }

    async fn end(&self, id: &ActionId, operation: Operation) -> Result<LraStatus, CoordinatorError> {
        let outcomes = EndStatuses::for_operation(operation);
        let (parent, enlisted) = self.begin_end(id, outcomes.transient)?;

        let status = match &self.engine {
            // participant callbacks are synchronous and may block
            Some(engine) => {
                let engine = engine.clone();
                let action = id.clone();
                tokio::task::spawn_blocking(move || {
                    terminate_enlisted(&engine, &action, parent.as_ref(), &enlisted, operation, outcomes)
                })
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(lra_id = %id, error = %e, "Participant termination task failed");
                    outcomes.failed
                })
            }
            None => outcomes.done,
        };

        let mut actions = self.write();
        if let Some(entry) = actions.get_mut(id) {
            entry.data.status = status;
            if status.is_terminal() {
                entry.data.finished_at_millis = Some(now_millis());
            }
        }
        Ok(status)
    }
}

#[derive(Clone, Copy)]
struct EndStatuses {
    transient: LraStatus,
    done: LraStatus,
    failed: LraStatus,
}

impl EndStatuses {
    fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::Complete => Self {
                transient: LraStatus::Closing,
                done: LraStatus::Closed,
                failed: LraStatus::FailedToClose,
            },
            _ => Self {
                transient: LraStatus::Cancelling,
                done: LraStatus::Cancelled,
                failed: LraStatus::FailedToCancel,
            },
        }
    }
}

/// Run `operation` on every enlisted participant and fold the answers
fn terminate_enlisted(
    engine: &TerminationEngine,
    id: &ActionId,
    parent: Option<&ActionId>,
    enlisted: &[Enlistment],
    operation: Operation,
    outcomes: EndStatuses,
) -> LraStatus {
    let mut status = outcomes.done;
    for enlistment in enlisted {
        let Some(url) = enlistment.links.get(operation) else {
            continue;
        };
        let Some((owner, _)) = links::parse_callback_url(url) else {
            tracing::warn!(lra_id = %id, url = %url, operation = %operation, "Termination link does not resolve to a participant");
            status = outcomes.failed;
            continue;
        };
        let outcome = engine.terminate(&owner, operation, id, parent);
        tracing::debug!(lra_id = %id, owner = %owner, operation = %operation, outcome = ?outcome, "Participant answered");
        match outcome {
            Ok(termination) if termination.is_in_progress() => {
                if status == outcomes.done {
                    status = outcomes.transient;
                }
            }
            Ok(termination) if is_failure(&termination) => status = outcomes.failed,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(lra_id = %id, owner = %owner, error = %e, "Participant could not be terminated");
                status = outcomes.failed;
            }
        }
    }
    status
}

fn is_failure(termination: &Termination) -> bool {
    match termination {
        Termination::Status(status) => matches!(
            status,
            ParticipantStatus::FailedToComplete | ParticipantStatus::FailedToCancel
        ),
        Termination::Response(response) => !response.is_success(),
        Termination::Accepted | Termination::Done => false,
    }
}

#[async_trait]
impl CoordinatorClient for InMemoryCoordinator {
    async fn start(
        &self,
        client_id: &str,
        _timeout: Duration,
        parent: Option<&ActionId>,
    ) -> Result<ActionId, CoordinatorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Unavailable("start disabled".into()));
        }

        let mut actions = self.write();
        if let Some(parent) = parent {
            if !actions.contains_key(parent) {
                return Err(CoordinatorError::NotFound(parent.clone()));
            }
        }

        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = ActionId::new(format!("{}/lra-coordinator/{}", self.base_url, seq));
        actions.insert(
            id.clone(),
            Entry {
                data: LraData {
                    id: id.clone(),
                    client_id: client_id.into(),
                    status: LraStatus::Active,
                    parent: parent.cloned(),
                    is_top_level: parent.is_none(),
                    started_at_millis: now_millis(),
                    finished_at_millis: None,
                },
                enlisted: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn close(&self, id: &ActionId) -> Result<LraStatus, CoordinatorError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.end(id, Operation::Complete).await
    }

    async fn cancel(&self, id: &ActionId) -> Result<LraStatus, CoordinatorError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.end(id, Operation::Compensate).await
    }

    async fn join(
        &self,
        id: &ActionId,
        _timeout: Duration,
        link_header: &str,
        recovery_url: Option<&str>,
        data: Option<&str>,
    ) -> Result<Box<str>, CoordinatorError> {
        let seq = self.joins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Unavailable("join disabled".into()));
        }

        let mut actions = self.write();
        let entry = actions
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))?;
        if entry.data.status != LraStatus::Active {
            return Err(CoordinatorError::Rejected {
                id: id.clone(),
                reason: "too late to join".into(),
            });
        }

        let links = links::parse_link_header(link_header);
        if links.is_empty() {
            return Err(CoordinatorError::Rejected {
                id: id.clone(),
                reason: "no termination links".into(),
            });
        }

        let prefix = recovery_url.unwrap_or(&self.base_url);
        let recovery: Box<str> =
            format!("{}/recovery/{}", prefix.trim_end_matches('/'), seq).into();
        entry.enlisted.push(Enlistment {
            links,
            recovery_url: recovery.clone(),
            data: data.map(Into::into),
        });
        Ok(recovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CallArgs, Candidate, Compensator, Completer, HandlerOutput, HandlerResult,
        ParticipantRegistry, ReturnKind, Signature,
    };

    const LINK: &str = "<http://svc/lra-participant/Car/complete>; rel=\"complete\"";

    #[tokio::test]
    async fn test_start_and_close() {
        let coordinator = InMemoryCoordinator::new("http://coord");
        let id = coordinator
            .start("client", Duration::ZERO, None)
            .await
            .unwrap();
        assert!(id.as_str().starts_with("http://coord/lra-coordinator/"));

        coordinator.join(&id, Duration::ZERO, LINK, None, None).await.unwrap();
        assert_eq!(coordinator.close(&id).await.unwrap(), LraStatus::Closed);

        let data = coordinator.get(&id).unwrap();
        assert!(data.is_top_level);
        assert!(data.finished_at_millis.is_some());
        assert!(coordinator.cancel(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_nested_start_requires_parent() {
        let coordinator = InMemoryCoordinator::new("http://coord");
        let missing = ActionId::new("http://coord/lra-coordinator/99");
        assert!(matches!(
            coordinator.start("c", Duration::ZERO, Some(&missing)).await,
            Err(CoordinatorError::NotFound(_))
        ));

        let parent = coordinator.start("c", Duration::ZERO, None).await.unwrap();
        let child = coordinator
            .start("c", Duration::ZERO, Some(&parent))
            .await
            .unwrap();
        let data = coordinator.get(&child).unwrap();
        assert_eq!(data.parent, Some(parent));
        assert!(!data.is_top_level);
    }

    #[tokio::test]
    async fn test_join_rejects_headers_without_links() {
        let coordinator = InMemoryCoordinator::new("http://coord");
        let id = coordinator.start("c", Duration::ZERO, None).await.unwrap();
        assert!(coordinator
            .join(&id, Duration::ZERO, "nonsense", None, None)
            .await
            .is_err());
        let recovery = coordinator
            .join(&id, Duration::ZERO, LINK, Some("http://rc/"), Some("payload"))
            .await
            .unwrap();
        assert_eq!(&*recovery, "http://rc/recovery/2");
        assert_eq!(coordinator.enlisted(&id)[0].data.as_deref(), Some("payload"));
    }

    struct Car;

    impl Completer for Car {
        fn complete(&self, _args: CallArgs<'_>) -> HandlerResult {
            Ok(HandlerOutput::Unit)
        }
    }

    impl Compensator for Car {
        fn compensate(&self, _args: CallArgs<'_>) -> HandlerResult {
            Err(crate::HandlerError::failed("car already returned"))
        }
    }

    #[tokio::test]
    async fn test_engine_drives_participants() {
        crate::testing::init_tracing();
        let registry = Arc::new(ParticipantRegistry::new());
        registry
            .discover(vec![Candidate::shared("Car", Arc::new(Car))
                .completer(Signature::new(ReturnKind::Unit))
                .compensator(Signature::new(ReturnKind::Unit))
                .scan()])
            .unwrap();
        let engine = Arc::new(TerminationEngine::new(
            registry,
            tokio::runtime::Handle::current(),
        ));
        let coordinator = InMemoryCoordinator::new("http://coord").with_engine(engine);
        let header = "<http://svc/lra-participant/Car/complete>; rel=\"complete\",\
                      <http://svc/lra-participant/Car/compensate>; rel=\"compensate\"";

        let closed = coordinator.start("c", Duration::ZERO, None).await.unwrap();
        coordinator.join(&closed, Duration::ZERO, header, None, None).await.unwrap();
        assert_eq!(coordinator.close(&closed).await.unwrap(), LraStatus::Closed);

        let cancelled = coordinator.start("c", Duration::ZERO, None).await.unwrap();
        coordinator.join(&cancelled, Duration::ZERO, header, None, None).await.unwrap();
        assert_eq!(
            coordinator.cancel(&cancelled).await.unwrap(),
            LraStatus::FailedToCancel
        );
    }

    struct Ledger {
        completed: std::sync::atomic::AtomicUsize,
    }

    impl Completer for Ledger {
        fn complete(&self, _args: CallArgs<'_>) -> HandlerResult {
            // callbacks run on the blocking pool, so block_on is allowed
            tokio::runtime::Handle::current().block_on(tokio::task::yield_now());
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerOutput::Unit)
        }
    }

    fn ledger_coordinator(owner: &str) -> (InMemoryCoordinator, Arc<ParticipantRegistry>, Arc<Ledger>) {
        let ledger = Arc::new(Ledger {
            completed: std::sync::atomic::AtomicUsize::new(0),
        });
        let registry = Arc::new(ParticipantRegistry::new());
        registry
            .discover(vec![Candidate::shared(owner, ledger.clone())
                .completer(Signature::new(ReturnKind::Unit))
                .scan()])
            .unwrap();
        let engine = Arc::new(TerminationEngine::new(
            registry.clone(),
            tokio::runtime::Handle::current(),
        ));
        (
            InMemoryCoordinator::new("http://coord").with_engine(engine),
            registry,
            ledger,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_owner_with_path_separator_is_completed() {
        let (coordinator, registry, ledger) = ledger_coordinator("billing/v2");
        let descriptor = registry.lookup("billing/v2").unwrap();
        let header = EnlistmentLinks::for_descriptor(&descriptor, "http://svc").to_header();

        let id = coordinator.start("c", Duration::ZERO, None).await.unwrap();
        coordinator.join(&id, Duration::ZERO, &header, None, None).await.unwrap();

        assert_eq!(coordinator.close(&id).await.unwrap(), LraStatus::Closed);
        assert_eq!(ledger.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unresolvable_link_fails_close() {
        let (coordinator, _registry, ledger) = ledger_coordinator("Ledger");
        let id = coordinator.start("c", Duration::ZERO, None).await.unwrap();
        coordinator
            .join(&id, Duration::ZERO, "<http://elsewhere/hooks/done>; rel=\"complete\"", None, None)
            .await
            .unwrap();

        assert_eq!(coordinator.close(&id).await.unwrap(), LraStatus::FailedToClose);
        assert_eq!(ledger.completed.load(Ordering::SeqCst), 0);
        assert!(coordinator.get(&id).unwrap().finished_at_millis.is_some());
    }

    #[test]
    fn test_lra_data_serde() {
        let data = LraData {
            id: ActionId::new("http://coord/lra-coordinator/1"),
            client_id: "orders".into(),
            status: LraStatus::Closing,
            parent: None,
            is_top_level: true,
            started_at_millis: 10,
            finished_at_millis: None,
        };
        let encoded = serde_json::to_string(&data).unwrap();
        let decoded: LraData = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, data);
    }
}
