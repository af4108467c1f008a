//! Reified type descriptors for pipeline type-checking.
//!
//! A [`TypeToken`] wraps a [`TypeShape`] tree: a concrete type, a parameterized
//! type with arguments, an array, a wildcard or a type variable. Rust types
//! are captured directly through their `TypeId` with [`TypeToken::of`]; trees
//! built with [`TypeToken::tree`] describe shapes that have no single Rust type
//! (for example a list of "anything that is a string").
//!
//! Every shape resolves to exactly one [`RawType`] via [`TypeToken::to_class`],
//! which is what assignability checks compare.

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::TypeTokenError;

/// A single resolved type: the universal base, a native Rust type, or a
/// named type known only by its name.
#[derive(Debug, Clone)]
pub enum RawType {
    /// The universal base type; assignable from every other type.
    Any,
    /// A Rust type identified by its `TypeId`.
    Native { id: TypeId, name: &'static str },
    /// A type known only by name (foreign or described types).
    Named(Cow<'static, str>),
}

impl RawType {
    /// Captures the raw type of `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Native {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// A type identified only by its name.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Named(name.into())
    }

    /// Human-readable type name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Any => "any",
            Self::Native { name, .. } => name,
            Self::Named(name) => name,
        }
    }

    /// Returns true for the universal base type.
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns true if a value of type `other` can be used where `self` is expected.
    #[must_use]
    pub fn is_assignable_from(&self, other: &RawType) -> bool {
        self.is_any() || self == other
    }
}

impl PartialEq for RawType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, Self::Any) => true,
            (Self::Native { id: a, .. }, Self::Native { id: b, .. }) => a == b,
            (Self::Named(a), Self::Named(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for RawType {}

impl Hash for RawType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Any => {}
            Self::Native { id, .. } => id.hash(state),
            Self::Named(name) => name.hash(state),
        }
    }
}

impl fmt::Display for RawType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structure of a captured type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeShape {
    /// A plain type with no arguments.
    Concrete(RawType),
    /// A generic type applied to arguments, e.g. `Map<String, u32>`.
    Parameterized { raw: RawType, args: Vec<TypeShape> },
    /// An array whose elements have the given shape.
    Array(Box<TypeShape>),
    /// `? extends B1 & B2`.
    Wildcard { upper_bounds: Vec<TypeShape> },
    /// A named type variable with optional bounds, e.g. `T: Message`.
    Variable { name: String, bounds: Vec<TypeShape> },
}

impl TypeShape {
    /// Shape of the Rust type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Concrete(RawType::of::<T>())
    }

    /// Shape of a named type.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Concrete(RawType::named(name))
    }

    fn resolve(&self) -> RawType {
        match self {
            Self::Concrete(raw) | Self::Parameterized { raw, .. } => raw.clone(),
            Self::Array(component) => component.resolve(),
            Self::Wildcard { upper_bounds: bounds } | Self::Variable { bounds, .. } => {
                bounds.first().map_or(RawType::Any, TypeShape::resolve)
            }
        }
    }
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(raw) => write!(f, "{raw}"),
            Self::Parameterized { raw, args } => {
                write!(f, "{raw}<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            Self::Array(component) => write!(f, "[{component}]"),
            Self::Wildcard { upper_bounds } => {
                f.write_str("?")?;
                write_bounds(f, " extends ", upper_bounds)
            }
            Self::Variable { name, bounds } => {
                f.write_str(name)?;
                write_bounds(f, ": ", bounds)
            }
        }
    }
}

fn write_bounds(f: &mut fmt::Formatter<'_>, prefix: &str, bounds: &[TypeShape]) -> fmt::Result {
    for (i, bound) in bounds.iter().enumerate() {
        f.write_str(if i == 0 { prefix } else { " & " })?;
        write!(f, "{bound}")?;
    }
    Ok(())
}

/// Immutable, cheaply clonable type descriptor.
///
/// Operations and pipelines declare their input/output types with tokens so
/// that a chain of heterogeneous steps can be checked when it is assembled,
/// before any value flows through it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TypeToken {
    shape: Arc<TypeShape>,
}

impl TypeToken {
    /// Captures the Rust type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::from_shape(TypeShape::of::<T>())
    }

    /// Token for the universal base type.
    #[must_use]
    pub fn any() -> Self {
        Self::from_shape(TypeShape::Concrete(RawType::Any))
    }

    /// Captures an explicit shape.
    #[must_use]
    pub fn from_shape(shape: TypeShape) -> Self {
        Self {
            shape: Arc::new(shape),
        }
    }

    /// Synthesizes `Parent<Child1, Child2, ...>`.
    ///
    /// # Errors
    ///
    /// Fails if `parent` is not a concrete, non-universal type or if no
    /// children are given; either way the capture would be ambiguous.
    pub fn tree(
        parent: TypeShape,
        children: impl IntoIterator<Item = TypeShape>,
    ) -> Result<Self, TypeTokenError> {
        let raw = match parent {
            TypeShape::Concrete(raw) if !raw.is_any() => raw,
            other => {
                return Err(TypeTokenError::NonConcreteParent {
                    parent: other.to_string(),
                })
            }
        };
        let args: Vec<TypeShape> = children.into_iter().collect();
        if args.is_empty() {
            return Err(TypeTokenError::MissingArguments {
                parent: raw.to_string(),
            });
        }
        Ok(Self::from_shape(TypeShape::Parameterized { raw, args }))
    }

    /// The full captured shape.
    #[must_use]
    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }

    /// Type arguments of a parameterized token; empty otherwise.
    #[must_use]
    pub fn arguments(&self) -> &[TypeShape] {
        match self.shape.as_ref() {
            TypeShape::Parameterized { args, .. } => args,
            _ => &[],
        }
    }

    /// Resolves the captured shape down to a single raw type.
    #[must_use]
    pub fn to_class(&self) -> RawType {
        self.shape.resolve()
    }

    /// Returns true if a value described by `other` can be used where this
    /// token is expected.
    #[must_use]
    pub fn is_assignable_from(&self, other: &TypeToken) -> bool {
        self.to_class().is_assignable_from(&other.to_class())
    }

    /// Like [`is_assignable_from`](Self::is_assignable_from) for a raw type.
    #[must_use]
    pub fn is_assignable_from_raw(&self, other: &RawType) -> bool {
        self.to_class().is_assignable_from(other)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shape)
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken({})", self.shape)
    }
}
