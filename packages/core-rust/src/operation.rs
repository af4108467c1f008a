//! Single transformation steps and their type-erased form.
//!
//! [`Operation`] is the typed contract implemented by every encode/decode,
//! integrity or crypto step. A [`Pipeline`](crate::Pipeline) stores its steps
//! as `Arc<dyn AnyOperation>` so that steps with different input and output
//! types can live in one chain; the typed values cross the erasure boundary as
//! [`Payload`] boxes and are downcast back by each step.

use std::any::Any;
use std::sync::Arc;

use crate::error::OperationError;
use crate::type_token::TypeToken;

/// A value travelling between two erased pipeline stages.
pub type Payload = Box<dyn Any + Send>;

/// One forward/inverse transformation step.
///
/// Operations that cannot be inverted keep the default
/// [`execute_inverse`](Operation::execute_inverse), which reports
/// [`OperationError::NotInvertible`] instead of producing a value.
pub trait Operation: Send + Sync + 'static {
    /// Value accepted by [`execute`](Operation::execute).
    type Input: Send + 'static;
    /// Value produced by [`execute`](Operation::execute).
    type Output: Send + 'static;

    /// Name used in errors and logs.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    /// Declared input type.
    fn input_type(&self) -> TypeToken {
        TypeToken::of::<Self::Input>()
    }

    /// Declared output type.
    fn output_type(&self) -> TypeToken {
        TypeToken::of::<Self::Output>()
    }

    /// Runs the forward direction.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] if the value cannot be transformed.
    fn execute(&self, input: Self::Input) -> Result<Self::Output, OperationError>;

    /// Runs the inverse direction.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::NotInvertible`] unless overridden, or an
    /// [`OperationError`] if the value cannot be transformed back.
    fn execute_inverse(&self, output: Self::Output) -> Result<Self::Input, OperationError> {
        let _ = output;
        Err(OperationError::NotInvertible {
            operation: self.name().to_string(),
        })
    }
}

/// Type-erased view of an [`Operation`], as stored by pipelines.
pub trait AnyOperation: Send + Sync {
    fn name(&self) -> &str;
    fn input_type(&self) -> TypeToken;
    fn output_type(&self) -> TypeToken;
    fn execute_any(&self, input: Payload) -> Result<Payload, OperationError>;
    fn execute_inverse_any(&self, output: Payload) -> Result<Payload, OperationError>;
}

struct Erased<Op>(Op);

impl<Op: Operation> AnyOperation for Erased<Op> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn input_type(&self) -> TypeToken {
        self.0.input_type()
    }

    fn output_type(&self) -> TypeToken {
        self.0.output_type()
    }

    fn execute_any(&self, input: Payload) -> Result<Payload, OperationError> {
        let input = input
            .downcast::<Op::Input>()
            .map_err(|_| OperationError::TypeMismatch {
                operation: self.0.name().to_string(),
                expected: std::any::type_name::<Op::Input>(),
            })?;
        let output = self.0.execute(*input)?;
        Ok(Box::new(output))
    }

    fn execute_inverse_any(&self, output: Payload) -> Result<Payload, OperationError> {
        let output = output
            .downcast::<Op::Output>()
            .map_err(|_| OperationError::TypeMismatch {
                operation: self.0.name().to_string(),
                expected: std::any::type_name::<Op::Output>(),
            })?;
        let input = self.0.execute_inverse(*output)?;
        Ok(Box::new(input))
    }
}

/// Erases an operation so it can be appended to a pipeline.
pub fn erase<Op: Operation>(operation: Op) -> Arc<dyn AnyOperation> {
    Arc::new(Erased(operation))
}

type ForwardFn<I, O> = Box<dyn Fn(I) -> Result<O, OperationError> + Send + Sync>;
type InverseFn<I, O> = Box<dyn Fn(O) -> Result<I, OperationError> + Send + Sync>;

/// Operation built from closures.
///
/// ```
/// use conduit_core::{FnOperation, Operation};
///
/// let double = FnOperation::new("double", |x: i64| Ok(x * 2)).with_inverse(|y| Ok(y / 2));
/// assert_eq!(double.execute(21).unwrap(), 42);
/// assert_eq!(double.execute_inverse(42).unwrap(), 21);
/// ```
pub struct FnOperation<I, O> {
    name: String,
    forward: ForwardFn<I, O>,
    inverse: Option<InverseFn<I, O>>,
}

impl<I: Send + 'static, O: Send + 'static> FnOperation<I, O> {
    /// A forward-only operation.
    pub fn new<F>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(I) -> Result<O, OperationError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            forward: Box::new(forward),
            inverse: None,
        }
    }

    /// Adds the inverse direction.
    #[must_use]
    pub fn with_inverse<G>(mut self, inverse: G) -> Self
    where
        G: Fn(O) -> Result<I, OperationError> + Send + Sync + 'static,
    {
        self.inverse = Some(Box::new(inverse));
        self
    }
}

impl<I: Send + 'static, O: Send + 'static> Operation for FnOperation<I, O> {
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: I) -> Result<O, OperationError> {
        (self.forward)(input)
    }

    fn execute_inverse(&self, output: O) -> Result<I, OperationError> {
        match &self.inverse {
            Some(inverse) => inverse(output),
            None => Err(OperationError::NotInvertible {
                operation: self.name.clone(),
            }),
        }
    }
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
