//! Ordered, invertible chains of operations.
//!
//! A [`Pipeline<I, O>`] threads a value of type `I` through its stages to
//! produce an `O`, and threads an `O` back through the stages' inverses in
//! reverse order to recover an `I`.
//!
//! # Type chain
//!
//! Every [`append`](Pipeline::append) checks that the new stage accepts what
//! the current chain produces (or the pipeline's `I` for the first stage) and
//! fails with [`PipelineError::Creation`] otherwise. Whether the chain ends in
//! `O` can only be known once the caller stops appending, so that check runs
//! when the pipeline is executed.
//!
//! # Append discipline
//!
//! `append` never mutates: it returns a new pipeline sharing the existing
//! stages. Clones taken earlier keep their original chain.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{OperationError, PipelineError};
use crate::operation::{erase, AnyOperation, Operation, Payload};
use crate::type_token::TypeToken;

/// Immutable chain of type-checked operations from `I` to `O`.
pub struct Pipeline<I, O> {
    input: TypeToken,
    output: TypeToken,
    stages: Vec<Arc<dyn AnyOperation>>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: Send + 'static, O: Send + 'static> Pipeline<I, O> {
    /// Creates an empty pipeline.
    ///
    /// An empty pipeline is the identity when `I` and `O` are the same type;
    /// otherwise it cannot execute until stages bridge the two types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            input: TypeToken::of::<I>(),
            output: TypeToken::of::<O>(),
            stages: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Returns a new pipeline with `operation` appended.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Creation`] if the operation's input type does
    /// not accept the chain's current output type.
    pub fn append<Op: Operation>(&self, operation: Op) -> Result<Self, PipelineError> {
        self.append_all([erase(operation)])
    }

    /// Returns a new pipeline with all `operations` appended in order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Creation`] at the first operation whose
    /// input type does not accept the output type before it.
    pub fn append_all(
        &self,
        operations: impl IntoIterator<Item = Arc<dyn AnyOperation>>,
    ) -> Result<Self, PipelineError> {
        let mut stages = self.stages.clone();
        for operation in operations {
            let produced = stages
                .last()
                .map_or_else(|| self.input.clone(), |last| last.output_type());
            let accepted = operation.input_type();
            if !accepted.is_assignable_from(&produced) {
                tracing::debug!(
                    operation = operation.name(),
                    %accepted,
                    %produced,
                    "rejected pipeline stage"
                );
                return Err(PipelineError::creation(format!(
                    "stage {} (`{}`) accepts `{accepted}` but the chain produces `{produced}`",
                    stages.len(),
                    operation.name(),
                )));
            }
            stages.push(operation);
        }
        Ok(Self {
            input: self.input.clone(),
            output: self.output.clone(),
            stages,
            _marker: PhantomData,
        })
    }

    /// Declared input type.
    #[must_use]
    pub fn input_type(&self) -> &TypeToken {
        &self.input
    }

    /// Declared output type.
    #[must_use]
    pub fn output_type(&self) -> &TypeToken {
        &self.output
    }

    /// Stages in forward order.
    #[must_use]
    pub fn operations(&self) -> &[Arc<dyn AnyOperation>] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Checks that the chain ends in the declared output type.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Creation`] if the last stage (or the input
    /// type, for an empty pipeline) does not match `O`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let produced = self
            .stages
            .last()
            .map_or_else(|| self.input.clone(), |last| last.output_type());
        if self.output.is_assignable_from(&produced) {
            Ok(())
        } else if self.stages.is_empty() {
            Err(PipelineError::creation(format!(
                "empty pipeline cannot convert `{}` into `{}`",
                self.input, self.output
            )))
        } else {
            Err(PipelineError::creation(format!(
                "pipeline ends in `{produced}` but declares output `{}`",
                self.output
            )))
        }
    }

    /// Runs every stage forward, in order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Creation`] for an incomplete chain and
    /// [`PipelineError::Execution`] for the first failing stage; no partial
    /// result is returned.
    pub fn execute(&self, input: I) -> Result<O, PipelineError> {
        self.validate()?;
        let mut value: Payload = Box::new(input);
        for (stage, operation) in self.stages.iter().enumerate() {
            value = operation
                .execute_any(value)
                .map_err(|source| PipelineError::Execution {
                    stage,
                    operation: operation.name().to_string(),
                    source,
                })?;
        }
        self.finish::<O>(value)
    }

    /// Runs every stage's inverse, in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InverseUnsupported`] when a stage has no
    /// inverse, [`PipelineError::Execution`] when a stage's inverse rejects
    /// the value, and [`PipelineError::Creation`] for an incomplete chain.
    pub fn execute_inverse(&self, output: O) -> Result<I, PipelineError> {
        self.validate()?;
        let mut value: Payload = Box::new(output);
        for (stage, operation) in self.stages.iter().enumerate().rev() {
            value = operation
                .execute_inverse_any(value)
                .map_err(|source| {
                    if source.is_not_invertible() {
                        PipelineError::InverseUnsupported {
                            stage,
                            operation: operation.name().to_string(),
                        }
                    } else {
                        PipelineError::Execution {
                            stage,
                            operation: operation.name().to_string(),
                            source,
                        }
                    }
                })?;
        }
        self.finish::<I>(value)
    }

    fn finish<T: 'static>(&self, value: Payload) -> Result<T, PipelineError> {
        value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
            let stage = self.stages.len().saturating_sub(1);
            let operation = self
                .stages
                .last()
                .map_or_else(|| "identity".to_string(), |last| last.name().to_string());
            PipelineError::Execution {
                stage,
                operation: operation.clone(),
                source: OperationError::TypeMismatch {
                    operation,
                    expected: std::any::type_name::<T>(),
                },
            }
        })
    }
}

impl<I: Send + 'static, O: Send + 'static> Default for Pipeline<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
            output: self.output.clone(),
            stages: self.stages.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> fmt::Debug for Pipeline<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("input", &self.input)
            .field("output", &self.output)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
