//! Participant descriptors and callback signature validation
//!
//! A scanner (or the application itself) describes each participant type as a
//! [`Candidate`]: an owner identity, how to obtain an instance, and the
//! callbacks bound to the four termination operations together with their
//! declared signatures. Validation turns a candidate into an immutable
//! [`ParticipantDescriptor`].

use crate::{
    ActionId, CallArgs, Compensator, Completer, DefinitionError, Forgetter, HandlerOutput,
    HandlerResult, Operation, StatusProvider,
};
use std::sync::Arc;

/// Declared type of a callback parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// The action being terminated
    ActionId,
    /// The parent of a nested action
    ParentActionId,
    /// Anything else; always rejected
    Other(Box<str>),
}

impl ParamKind {
    fn name(&self) -> &str {
        match self {
            Self::ActionId => "ActionId",
            Self::ParentActionId => "ParentActionId",
            Self::Other(name) => name,
        }
    }
}

/// Declared return type of a callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    Unit,
    Status,
    Response,
    Deferred(Box<ReturnKind>),
    /// Anything else; always rejected
    Other(Box<str>),
}

impl ReturnKind {
    pub fn deferred(inner: ReturnKind) -> Self {
        Self::Deferred(Box::new(inner))
    }

    pub fn name(&self) -> String {
        match self {
            Self::Unit => "unit".to_string(),
            Self::Status => "status".to_string(),
            Self::Response => "response".to_string(),
            Self::Deferred(inner) => format!("deferred<{}>", inner.name()),
            Self::Other(name) => name.to_string(),
        }
    }

    fn is_immediate(&self) -> bool {
        matches!(self, Self::Unit | Self::Status | Self::Response)
    }

    fn is_valid(&self) -> bool {
        match self {
            Self::Deferred(inner) => inner.is_immediate(),
            other => other.is_immediate(),
        }
    }

    /// Whether a produced value conforms to this declaration
    pub(crate) fn accepts(&self, output: &HandlerOutput) -> bool {
        matches!(
            (self, output),
            (Self::Unit, HandlerOutput::Unit)
                | (Self::Status, HandlerOutput::Status(_))
                | (Self::Response, HandlerOutput::Response(_))
                | (Self::Deferred(_), HandlerOutput::Deferred(_))
        )
    }

    /// Declaration the resolved value of a deferred must satisfy
    pub(crate) fn resolved(&self) -> &ReturnKind {
        match self {
            Self::Deferred(inner) => inner,
            other => other,
        }
    }
}

/// Declared shape of a callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ParamKind>,
    pub returns: ReturnKind,
}

impl Signature {
    /// No parameters
    pub fn new(returns: ReturnKind) -> Self {
        Self {
            params: Vec::new(),
            returns,
        }
    }

    /// `(ActionId)`
    pub fn with_action(returns: ReturnKind) -> Self {
        Self::new(returns).param(ParamKind::ActionId)
    }

    /// `(ActionId, ParentActionId)`
    pub fn with_parent(returns: ReturnKind) -> Self {
        Self::with_action(returns).param(ParamKind::ParentActionId)
    }

    pub fn param(mut self, kind: ParamKind) -> Self {
        self.params.push(kind);
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    fn validate(&self, owner: &str, operation: Operation) -> Result<(), DefinitionError> {
        if self.params.len() > 2 {
            return Err(DefinitionError::Arity {
                owner: owner.into(),
                operation,
                count: self.params.len(),
            });
        }
        const POSITIONS: [ParamKind; 2] = [ParamKind::ActionId, ParamKind::ParentActionId];
        for (index, (declared, expected)) in self.params.iter().zip(POSITIONS.iter()).enumerate() {
            if declared != expected {
                return Err(DefinitionError::ParameterType {
                    owner: owner.into(),
                    operation,
                    index,
                    found: declared.name().into(),
                });
            }
        }
        if !self.returns.is_valid() {
            return Err(DefinitionError::ReturnType {
                owner: owner.into(),
                operation,
                found: self.returns.name().into(),
            });
        }
        Ok(())
    }
}

type Invoker = Arc<dyn Fn(CallArgs<'_>) -> HandlerResult + Send + Sync>;
type BoundFn<P> = Arc<dyn Fn(&P, CallArgs<'_>) -> HandlerResult + Send + Sync>;

fn invoker<F>(f: F) -> Invoker
where
    F: Fn(CallArgs<'_>) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How callbacks obtain the participant instance
pub enum Instance<P> {
    /// One instance shared by every call
    Shared(Arc<P>),
    /// A fresh (or container-managed) instance per call
    Factory(Arc<dyn Fn() -> Arc<P> + Send + Sync>),
}

impl<P> Instance<P> {
    fn get(&self) -> Arc<P> {
        match self {
            Self::Shared(instance) => instance.clone(),
            Self::Factory(factory) => factory(),
        }
    }

    fn mode(&self) -> InstanceMode {
        match self {
            Self::Shared(_) => InstanceMode::Shared,
            Self::Factory(_) => InstanceMode::Factory,
        }
    }
}

impl<P> Clone for Instance<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Shared(instance) => Self::Shared(instance.clone()),
            Self::Factory(factory) => Self::Factory(factory.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceMode {
    Shared,
    Factory,
}

struct Binding<P> {
    operation: Operation,
    signature: Signature,
    call: BoundFn<P>,
}

/// A participant type as produced by discovery, before validation
pub struct Candidate<P> {
    owner: Box<str>,
    instance: Instance<P>,
    bindings: Vec<Binding<P>>,
}

impl<P: Send + Sync + 'static> Candidate<P> {
    pub fn shared(owner: impl Into<Box<str>>, instance: Arc<P>) -> Self {
        Self::with_instance(owner, Instance::Shared(instance))
    }

    pub fn factory<F>(owner: impl Into<Box<str>>, factory: F) -> Self
    where
        F: Fn() -> Arc<P> + Send + Sync + 'static,
    {
        Self::with_instance(owner, Instance::Factory(Arc::new(factory)))
    }

    pub fn with_instance(owner: impl Into<Box<str>>, instance: Instance<P>) -> Self {
        Self {
            owner: owner.into(),
            instance,
            bindings: Vec::new(),
        }
    }

    /// Bind an arbitrary callback to `operation`
    pub fn bind<F>(mut self, operation: Operation, signature: Signature, call: F) -> Self
    where
        F: Fn(&P, CallArgs<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.bindings.push(Binding {
            operation,
            signature,
            call: Arc::new(call),
        });
        self
    }

    pub fn completer(self, signature: Signature) -> Self
    where
        P: Completer,
    {
        self.bind(Operation::Complete, signature, |p: &P, args| p.complete(args))
    }

    pub fn compensator(self, signature: Signature) -> Self
    where
        P: Compensator,
    {
        self.bind(Operation::Compensate, signature, |p: &P, args| p.compensate(args))
    }

    pub fn status_provider(self, signature: Signature) -> Self
    where
        P: StatusProvider,
    {
        self.bind(Operation::Status, signature, |p: &P, args| p.status(args))
    }

    pub fn forgetter(self, signature: Signature) -> Self
    where
        P: Forgetter,
    {
        self.bind(Operation::Forget, signature, |p: &P, args| p.forget(args))
    }

    /// Erase the participant type so candidates of different types can be
    /// discovered together
    pub fn scan(self) -> ScannedCandidate {
        let mode = self.instance.mode();
        let callbacks = self
            .bindings
            .into_iter()
            .map(|binding| {
                let instance = self.instance.clone();
                let call = binding.call;
                ScannedCallback {
                    operation: binding.operation,
                    signature: binding.signature,
                    invoker: invoker(move |args| call(&*instance.get(), args)),
                }
            })
            .collect();
        ScannedCandidate {
            owner: self.owner,
            mode,
            callbacks,
        }
    }
}

struct ScannedCallback {
    operation: Operation,
    signature: Signature,
    invoker: Invoker,
}

/// Type-erased candidate ready for validation
pub struct ScannedCandidate {
    owner: Box<str>,
    mode: InstanceMode,
    callbacks: Vec<ScannedCallback>,
}

impl ScannedCandidate {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// A validated callback bound to one operation
#[derive(Clone)]
pub struct Callback {
    signature: Signature,
    invoker: Invoker,
}

impl Callback {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Call with as many positional arguments as the signature declares
    pub fn invoke(&self, tx: &ActionId, parent: Option<&ActionId>) -> HandlerResult {
        (self.invoker)(CallArgs::for_arity(self.signature.arity(), tx, parent))
    }
}

/// Immutable catalog entry for one participant type
#[derive(Clone)]
pub struct ParticipantDescriptor {
    owner: Box<str>,
    mode: InstanceMode,
    complete: Option<Callback>,
    compensate: Option<Callback>,
    status: Option<Callback>,
    forget: Option<Callback>,
}

impl ParticipantDescriptor {
    /// Validate a candidate.
    ///
    /// `Ok(None)` when it advertises no callbacks at all; such candidates are
    /// simply not participants.
    pub fn from_candidate(candidate: ScannedCandidate) -> Result<Option<Self>, DefinitionError> {
        if candidate.callbacks.is_empty() {
            return Ok(None);
        }

        let mut descriptor = Self {
            owner: candidate.owner,
            mode: candidate.mode,
            complete: None,
            compensate: None,
            status: None,
            forget: None,
        };

        for scanned in candidate.callbacks {
            scanned
                .signature
                .validate(&descriptor.owner, scanned.operation)?;
            let slot = descriptor.slot_mut(scanned.operation);
            if slot.is_some() {
                return Err(DefinitionError::DuplicateBinding {
                    owner: descriptor.owner.clone(),
                    operation: scanned.operation,
                });
            }
            *slot = Some(Callback {
                signature: scanned.signature,
                invoker: scanned.invoker,
            });
        }

        Ok(Some(descriptor))
    }

    fn slot_mut(&mut self, operation: Operation) -> &mut Option<Callback> {
        match operation {
            Operation::Complete => &mut self.complete,
            Operation::Compensate => &mut self.compensate,
            Operation::Status => &mut self.status,
            Operation::Forget => &mut self.forget,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn instance_mode(&self) -> InstanceMode {
        self.mode
    }

    pub fn callback(&self, operation: Operation) -> Option<&Callback> {
        match operation {
            Operation::Complete => self.complete.as_ref(),
            Operation::Compensate => self.compensate.as_ref(),
            Operation::Status => self.status.as_ref(),
            Operation::Forget => self.forget.as_ref(),
        }
    }

    /// Operations with a bound callback, in advertisement order
    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        Operation::ALL
            .into_iter()
            .filter(move |op| self.callback(*op).is_some())
    }
}

impl std::fmt::Debug for ParticipantDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantDescriptor")
            .field("owner", &self.owner)
            .field("mode", &self.mode)
            .field("operations", &self.operations().collect::<Vec<_>>())
            .finish()
    }
}
