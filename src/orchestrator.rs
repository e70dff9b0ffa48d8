//! Drives one unit of work through a long-running action
//!
//! ```text
//! Starting → Enlisting → Running → Closing   → Ended
//!                                → Cancelling → Ended
//! ```

use crate::{
    ActionId, CoordinatorClient, Current, EnlistmentLinks, LraObserver, OrchestratorConfig,
    OrchestratorError, ParticipantRegistry, TracingObserver,
};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

/// Lifecycle position of an [`Orchestrator`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    Starting,
    Enlisting,
    Running,
    Closing,
    Cancelling,
    Ended,
}

/// Runs caller work inside a coordinator-managed action.
///
/// One orchestrator drives exactly one action; once it reaches
/// [`OrchestratorState::Ended`] every further `run` is rejected.
pub struct Orchestrator<C: CoordinatorClient> {
    client: Arc<C>,
    registry: Arc<ParticipantRegistry>,
    config: OrchestratorConfig,
    observer: Arc<dyn LraObserver>,
    state: OrchestratorState,
    action: Option<ActionId>,
}

impl<C: CoordinatorClient> Orchestrator<C> {
    pub fn new(client: Arc<C>, registry: Arc<ParticipantRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            client,
            registry,
            config,
            observer: Arc::new(TracingObserver),
            state: OrchestratorState::Starting,
            action: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LraObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Action started by this orchestrator, once `start` succeeded
    pub fn action(&self) -> Option<&ActionId> {
        self.action.as_ref()
    }

    /// Start an action, enlist `participants`, run `work` and end the action.
    ///
    /// Without an explicit `parent` the innermost action of the caller's chain
    /// (if any) becomes the parent. The new id is on the context stack while
    /// `work` runs and removed before this returns.
    pub async fn run<F, Fut, T, E>(
        &mut self,
        parent: Option<ActionId>,
        participants: &[&str],
        work: F,
    ) -> Result<T, OrchestratorError<E>>
    where
        F: FnOnce(ActionId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        Current::ensure_scope(self.drive(parent, participants, work)).await
    }

    async fn drive<F, Fut, T, E>(
        &mut self,
        parent: Option<ActionId>,
        participants: &[&str],
        work: F,
    ) -> Result<T, OrchestratorError<E>>
    where
        F: FnOnce(ActionId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if self.state != OrchestratorState::Starting {
            return Err(OrchestratorError::Ended);
        }

        let parent = parent.or_else(Current::peek);
        let id = match self
            .client
            .start(&self.config.client_id, self.config.timeout, parent.as_ref())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(client_id = %self.config.client_id, error = %e, "Coordinator refused to start action");
                self.state = OrchestratorState::Ended;
                return Err(OrchestratorError::Start(e));
            }
        };
        self.action = Some(id.clone());
        self.observer.on_started(&id, parent.as_ref());
        if let Err(e) = Current::push(id.clone()) {
            tracing::warn!(lra_id = %id, error = %e, "Action not pushed onto context");
        }

        self.state = OrchestratorState::Enlisting;
        if let Err(e) = self.enlist(&id, participants).await {
            self.state = OrchestratorState::Cancelling;
            match self.client.cancel(&id).await {
                Ok(status) => self.observer.on_cancelled(&id, status),
                Err(ce) => self.observer.on_end_failed(&id, &ce.to_string()),
            }
            self.finish(&id);
            return Err(e);
        }

        self.state = OrchestratorState::Running;
        let result = match work(id.clone()).await {
            Ok(value) => {
                self.state = OrchestratorState::Closing;
                match self.client.close(&id).await {
                    Ok(status) => {
                        self.observer.on_closed(&id, status);
                        Ok(value)
                    }
                    Err(source) => {
                        self.observer.on_end_failed(&id, &source.to_string());
                        Err(OrchestratorError::Close { id: id.clone(), source })
                    }
                }
            }
            Err(e) => {
                self.state = OrchestratorState::Cancelling;
                self.observer.on_work_failed(&id, &e.to_string());
                match self.client.cancel(&id).await {
                    Ok(status) => self.observer.on_cancelled(&id, status),
                    Err(ce) => self.observer.on_end_failed(&id, &ce.to_string()),
                }
                Err(OrchestratorError::Work(e))
            }
        };

        self.finish(&id);
        result
    }

    async fn enlist<E>(&self, id: &ActionId, participants: &[&str]) -> Result<(), OrchestratorError<E>> {
        for owner in participants {
            let descriptor = self.registry.lookup(owner).map_err(|e| OrchestratorError::Enlist {
                owner: (*owner).into(),
                reason: e.to_string().into(),
            })?;
            let header = EnlistmentLinks::for_descriptor(&descriptor, &self.config.base_url).to_header();
            let recovery = self
                .client
                .join(
                    id,
                    self.config.timeout,
                    &header,
                    self.config.recovery_url.as_deref(),
                    None,
                )
                .await
                .map_err(|e| OrchestratorError::Enlist {
                    owner: (*owner).into(),
                    reason: e.to_string().into(),
                })?;
            self.observer.on_enlisted(id, owner, &recovery);
        }
        Ok(())
    }

    fn finish(&mut self, id: &ActionId) {
        Current::pop_id(id);
        self.state = OrchestratorState::Ended;
    }
}
