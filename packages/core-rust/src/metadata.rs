//! Declarative channel policies handed opaquely to providers.
//!
//! [`Persistence`] and [`Frequency`] are advisory: a provider reads whatever
//! it understands from the metadata list and ignores the rest.

use std::time::Duration;

use crate::error::MetadataError;
use crate::formats::FormatKind;

/// How long published messages are kept and how quickly they must be served.
///
/// A zero duration means no guarantee; [`Duration::MAX`] means forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Persistence {
    pub persist_for: Duration,
    pub retrieve_under: Duration,
}

impl Persistence {
    pub const DEFAULT: Self = Self::from_duration(Duration::from_millis(2000));
    pub const FOREVER: Self = Self::from_duration(Duration::MAX);
    pub const NEVER_PERSIST: Self = Self::from_duration(Duration::ZERO);

    #[must_use]
    pub const fn new(persist_for: Duration, retrieve_under: Duration) -> Self {
        Self {
            persist_for,
            retrieve_under,
        }
    }

    /// Same duration for storage and retrieval.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        Self::new(duration, duration)
    }

    /// True when messages must be retained for `persist_for`.
    #[must_use]
    pub fn must_persist(&self) -> bool {
        !self.persist_for.is_zero()
    }

    /// True when retrievals must complete within `retrieve_under`.
    #[must_use]
    pub fn has_retrieval_lifetime(&self) -> bool {
        !self.retrieve_under.is_zero()
    }
}

impl Default for Persistence {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Expected interval between messages on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frequency {
    minimum: Duration,
    average: Duration,
    maximum: Duration,
}

impl Frequency {
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidFrequency`] unless
    /// `minimum <= average <= maximum`.
    pub fn new(
        minimum: Duration,
        average: Duration,
        maximum: Duration,
    ) -> Result<Self, MetadataError> {
        if minimum <= average && average <= maximum {
            Ok(Self {
                minimum,
                average,
                maximum,
            })
        } else {
            Err(MetadataError::InvalidFrequency {
                minimum,
                average,
                maximum,
            })
        }
    }

    #[must_use]
    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    #[must_use]
    pub fn average(&self) -> Duration {
        self.average
    }

    #[must_use]
    pub fn maximum(&self) -> Duration {
        self.maximum
    }
}

impl Default for Frequency {
    /// 1000 ms, plus or minus 500 ms.
    fn default() -> Self {
        Self {
            minimum: Duration::from_millis(500),
            average: Duration::from_millis(1000),
            maximum: Duration::from_millis(1500),
        }
    }
}

/// One entry of the metadata list passed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    Persistence(Persistence),
    Frequency(Frequency),
    /// Message format the channel should encode with.
    Format(FormatKind),
    /// Provider-specific setting.
    Attribute {
        name: String,
        value: serde_json::Value,
    },
}

impl Metadata {
    pub fn attribute(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Attribute {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl From<Persistence> for Metadata {
    fn from(value: Persistence) -> Self {
        Self::Persistence(value)
    }
}

impl From<Frequency> for Metadata {
    fn from(value: Frequency) -> Self {
        Self::Frequency(value)
    }
}

impl From<FormatKind> for Metadata {
    fn from(value: FormatKind) -> Self {
        Self::Format(value)
    }
}

/// First [`Metadata::Format`] entry, if any.
#[must_use]
pub fn find_format(metadata: &[Metadata]) -> Option<FormatKind> {
    metadata.iter().find_map(|m| match m {
        Metadata::Format(kind) => Some(*kind),
        _ => None,
    })
}

/// First [`Metadata::Frequency`] entry, if any.
#[must_use]
pub fn find_frequency(metadata: &[Metadata]) -> Option<Frequency> {
    metadata.iter().find_map(|m| match m {
        Metadata::Frequency(frequency) => Some(*frequency),
        _ => None,
    })
}

/// Value of the first attribute named `name`, if any.
#[must_use]
pub fn find_attribute<'a>(metadata: &'a [Metadata], name: &str) -> Option<&'a serde_json::Value> {
    metadata.iter().find_map(|m| match m {
        Metadata::Attribute { name: n, value } if n == name => Some(value),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn must_persist_false_only_for_zero() {
        assert!(!Persistence::from_duration(Duration::ZERO).must_persist());
        assert!(Persistence::from_duration(Duration::from_millis(1)).must_persist());
        assert!(Persistence::FOREVER.must_persist());
        assert!(!Persistence::NEVER_PERSIST.must_persist());
    }

    #[test]
    fn retrieval_lifetime_follows_retrieve_under() {
        let p = Persistence::new(Duration::from_secs(5), Duration::ZERO);
        assert!(p.must_persist());
        assert!(!p.has_retrieval_lifetime());
    }

    #[test]
    fn default_persistence_is_two_seconds() {
        assert_eq!(Persistence::default().persist_for, Duration::from_millis(2000));
        assert_eq!(Persistence::default().retrieve_under, Duration::from_millis(2000));
    }

    #[test]
    fn frequency_rejects_minimum_above_average() {
        let ms = Duration::from_millis;
        assert!(matches!(
            Frequency::new(ms(200), ms(100), ms(300)),
            Err(MetadataError::InvalidFrequency { .. })
        ));
        assert!(Frequency::new(ms(100), ms(300), ms(200)).is_err());
    }

    #[test]
    fn frequency_accepts_equal_bounds() {
        let ms = Duration::from_millis(100);
        let f = Frequency::new(ms, ms, ms).unwrap();
        assert_eq!(f.average(), ms);
    }

    #[test]
    fn default_frequency() {
        let f = Frequency::default();
        assert_eq!(f.minimum(), Duration::from_millis(500));
        assert_eq!(f.average(), Duration::from_millis(1000));
        assert_eq!(f.maximum(), Duration::from_millis(1500));
    }

    #[test]
    fn lookup_helpers_find_first_match() {
        let metadata = vec![
            Metadata::from(Persistence::FOREVER),
            Metadata::attribute("qos", 1),
            Metadata::from(FormatKind::MsgPack),
            Metadata::attribute("qos", 2),
            Metadata::from(FormatKind::Json),
        ];
        assert_eq!(find_format(&metadata), Some(FormatKind::MsgPack));
        assert_eq!(find_attribute(&metadata, "qos"), Some(&serde_json::json!(1)));
        assert!(find_attribute(&metadata, "missing").is_none());
        assert!(find_frequency(&metadata).is_none());
    }
}
