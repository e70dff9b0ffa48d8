//! Catalog of discovered participants

use crate::{DefinitionError, ParticipantDescriptor, RegistryError, ScannedCandidate};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Validate a batch of scanned candidates.
///
/// Candidates without any callback are dropped silently. The first callback
/// that breaks the contract fails the whole batch.
pub fn discover<I>(candidates: I) -> Result<Vec<ParticipantDescriptor>, DefinitionError>
where
    I: IntoIterator<Item = ScannedCandidate>,
{
    let mut descriptors = Vec::new();
    for candidate in candidates {
        let owner: Box<str> = candidate.owner().into();
        match ParticipantDescriptor::from_candidate(candidate) {
            Ok(Some(descriptor)) => descriptors.push(descriptor),
            Ok(None) => tracing::trace!(owner = %owner, "Skipping candidate without callbacks"),
            Err(e) => {
                tracing::error!(owner = %owner, error = %e, "Invalid participant definition");
                return Err(e);
            }
        }
    }
    Ok(descriptors)
}

/// Thread-safe registry of participant descriptors keyed by owner identity
pub struct ParticipantRegistry {
    participants: RwLock<HashMap<Box<str>, Arc<ParticipantDescriptor>>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self {
            participants: RwLock::new(HashMap::new()),
        }
    }

    /// Run discovery and register the result; returns how many were registered
    pub fn discover<I>(&self, candidates: I) -> Result<usize, DefinitionError>
    where
        I: IntoIterator<Item = ScannedCandidate>,
    {
        let descriptors = discover(candidates)?;
        let count = descriptors.len();
        for descriptor in descriptors {
            self.register(descriptor);
        }
        Ok(count)
    }

    /// Register a descriptor; the last registration for an owner wins
    pub fn register(&self, descriptor: ParticipantDescriptor) -> Option<Arc<ParticipantDescriptor>> {
        let owner: Box<str> = descriptor.owner().into();
        let previous = self
            .participants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner.clone(), Arc::new(descriptor));
        if previous.is_some() {
            tracing::debug!(owner = %owner, "Replaced participant registration");
        } else {
            tracing::debug!(owner = %owner, "Registered participant");
        }
        previous
    }

    pub fn lookup(&self, owner: &str) -> Result<Arc<ParticipantDescriptor>, RegistryError> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(owner.into()))
    }

    pub fn owners(&self) -> Vec<Box<str>> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CallArgs, Candidate, Completer, HandlerOutput, HandlerResult, Operation, ParamKind,
        ReturnKind, Signature,
    };

    struct Shipping;

    impl Completer for Shipping {
        fn complete(&self, _args: CallArgs<'_>) -> HandlerResult {
            Ok(HandlerOutput::Unit)
        }
    }

    fn scan_all() -> Vec<ScannedCandidate> {
        vec![
            Candidate::shared("Shipping", Arc::new(Shipping))
                .completer(Signature::with_action(ReturnKind::Unit))
                .scan(),
            Candidate::shared("Billing", Arc::new(Shipping))
                .completer(Signature::new(ReturnKind::Unit))
                .scan(),
            Candidate::shared("NotAParticipant", Arc::new(Shipping)).scan(),
        ]
    }

    #[test]
    fn test_rediscovery_is_idempotent() {
        let registry = ParticipantRegistry::new();
        assert_eq!(registry.discover(scan_all()).unwrap(), 2);
        assert_eq!(registry.discover(scan_all()).unwrap(), 2);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("Shipping").unwrap().owner(), "Shipping");
        assert!(matches!(
            registry.lookup("NotAParticipant"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_callback_excluded_from_registry() {
        let registry = ParticipantRegistry::new();
        let bad = Candidate::shared("TooManyArgs", Arc::new(Shipping))
            .bind(
                Operation::Complete,
                Signature::with_parent(ReturnKind::Unit).param(ParamKind::ActionId),
                |_, _| Ok(HandlerOutput::Unit),
            )
            .scan();

        let err = registry.discover(vec![bad]).unwrap_err();
        assert!(matches!(err, DefinitionError::Arity { count: 3, .. }));
        assert!(registry.lookup("TooManyArgs").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_last_write_wins() {
        let registry = ParticipantRegistry::new();
        let first = discover(vec![Candidate::shared("Shipping", Arc::new(Shipping))
            .completer(Signature::new(ReturnKind::Unit))
            .scan()])
        .unwrap();
        let second = discover(vec![Candidate::shared("Shipping", Arc::new(Shipping))
            .completer(Signature::with_parent(ReturnKind::Unit))
            .scan()])
        .unwrap();

        for descriptor in first.into_iter().chain(second) {
            registry.register(descriptor);
        }

        let current = registry.lookup("Shipping").unwrap();
        let signature = current.callback(Operation::Complete).unwrap().signature();
        assert_eq!(signature.arity(), 2);
        assert_eq!(registry.owners().len(), 1);
    }
}
