//! Declarative saga definitions.

use std::collections::HashMap;
use std::sync::Arc;

use messaging::{BoxError, Envelope, ReplyOutcome};

/// Builds the command a step sends, from the saga's data.
pub type ActionFn<T> = Arc<dyn Fn(&T) -> Result<StepCommand, BoxError> + Send + Sync>;

/// Interprets a reply, possibly updating the saga's data.
pub type ReplyHandlerFn<T> =
    Arc<dyn Fn(&mut T, &Envelope) -> Result<StepDecision, BoxError> + Send + Sync>;

/// A command and the subject it is sent to.
#[derive(Debug, Clone)]
pub struct StepCommand {
    pub destination: String,
    pub command: Envelope,
}

impl StepCommand {
    pub fn new(destination: impl Into<String>, command: Envelope) -> Self {
        Self {
            destination: destination.into(),
            command,
        }
    }
}

/// What the orchestrator does after a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    /// Move to the next step in the current direction.
    Advance,
    /// Start compensating from the current step.
    Compensate,
    /// Finish the saga now.
    Complete,
}

impl StepDecision {
    /// Default decision for a reply with no registered handler: a failure
    /// reply compensates, anything else advances.
    pub fn from_reply(reply: &Envelope) -> Self {
        match reply.outcome() {
            Some(ReplyOutcome::Failure) => StepDecision::Compensate,
            _ => StepDecision::Advance,
        }
    }
}

/// One step of a saga.
pub struct SagaStep<T> {
    name: String,
    action: Option<ActionFn<T>>,
    compensation: Option<ActionFn<T>>,
    action_replies: HashMap<String, ReplyHandlerFn<T>>,
    compensation_replies: HashMap<String, ReplyHandlerFn<T>>,
}

impl<T> SagaStep<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
            compensation: None,
            action_replies: HashMap::new(),
            compensation_replies: HashMap::new(),
        }
    }

    /// Sets the forward action.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&T) -> Result<StepCommand, BoxError> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    /// Sets the compensating action.
    pub fn compensation<F>(mut self, compensation: F) -> Self
    where
        F: Fn(&T) -> Result<StepCommand, BoxError> + Send + Sync + 'static,
    {
        self.compensation = Some(Arc::new(compensation));
        self
    }

    /// Handles replies named `reply_name` to the forward action.
    pub fn on_action_reply<F>(mut self, reply_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut T, &Envelope) -> Result<StepDecision, BoxError> + Send + Sync + 'static,
    {
        self.action_replies
            .insert(reply_name.into(), Arc::new(handler));
        self
    }

    /// Handles replies named `reply_name` to the compensating action.
    pub fn on_compensation_reply<F>(mut self, reply_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut T, &Envelope) -> Result<StepDecision, BoxError> + Send + Sync + 'static,
    {
        self.compensation_replies
            .insert(reply_name.into(), Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The action for the given direction, if the step has one.
    pub fn action_for(&self, compensating: bool) -> Option<&ActionFn<T>> {
        if compensating {
            self.compensation.as_ref()
        } else {
            self.action.as_ref()
        }
    }

    /// The reply handler for `reply_name` in the given direction.
    pub fn reply_handler(&self, compensating: bool, reply_name: &str) -> Option<&ReplyHandlerFn<T>> {
        if compensating {
            self.compensation_replies.get(reply_name)
        } else {
            self.action_replies.get(reply_name)
        }
    }
}

/// A named, ordered list of steps. Built once at startup.
pub struct SagaDefinition<T> {
    name: String,
    reply_topic: String,
    steps: Vec<SagaStep<T>>,
}

impl<T> SagaDefinition<T> {
    /// `reply_topic` is the subject participants send replies to.
    pub fn new(name: impl Into<String>, reply_topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply_topic: reply_topic.into(),
            steps: Vec::new(),
        }
    }

    pub fn add_step(mut self, step: SagaStep<T>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    pub fn steps(&self) -> &[SagaStep<T>] {
        &self.steps
    }

    /// The step at `index`, if the cursor points inside the definition.
    pub fn step(&self, index: i64) -> Option<&SagaStep<T>> {
        usize::try_from(index).ok().and_then(|i| self.steps.get(i))
    }
}
