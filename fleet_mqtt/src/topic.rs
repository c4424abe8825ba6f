//! Topic construction and validation for the fleet-protocol bridge.
//!
//! Every car communicates over exactly two fixed topics, built from its
//! company name and car name: `<company>/<car_name>/module_gateway` (subscribe)
//! and `<company>/<car_name>/external_server` (publish). No wildcards, no
//! topic filters — just these two strings.

use std::fmt;

/// A company or car name segment used to build a car's topic pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopicSegment(String);

/// An invalid company or car name was supplied.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TopicSegmentError {
    /// The segment was empty.
    #[error("topic segment must not be empty")]
    Empty,
    /// The segment contained a character other than lowercase ascii
    /// letters, digits or underscore.
    #[error("topic segment must match ^[a-z0-9_]*$")]
    InvalidCharacters,
}

impl TopicSegment {
    /// Validate and wrap a company or car name for topic construction.
    ///
    /// # Errors
    /// Returns [`TopicSegmentError`] if `value` is empty or contains a
    /// character outside `[a-z0-9_]`.
    pub fn new(value: impl Into<String>) -> Result<Self, TopicSegmentError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TopicSegmentError::Empty);
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(TopicSegmentError::InvalidCharacters);
        }
        Ok(Self(value))
    }

    /// The validated string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The pair of fixed topics a single car's MQTT session communicates over.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CarTopics {
    subscribe: String,
    publish: String,
}

impl CarTopics {
    /// Build the topic pair for `company`/`car`.
    #[must_use]
    pub fn new(company: &TopicSegment, car: &TopicSegment) -> Self {
        Self {
            subscribe: format!("{company}/{car}/module_gateway"),
            publish: format!("{company}/{car}/external_server"),
        }
    }

    /// The topic this car's MQTT client subscribes to (cloud-to-vehicle commands).
    #[must_use]
    pub fn subscribe_topic(&self) -> &str {
        &self.subscribe
    }

    /// The topic this car's MQTT client publishes to (vehicle-to-cloud statuses).
    #[must_use]
    pub fn publish_topic(&self) -> &str {
        &self.publish
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_segment() {
        assert_eq!(TopicSegment::new(""), Err(TopicSegmentError::Empty));
    }

    #[test]
    fn rejects_uppercase_and_punctuation() {
        assert_eq!(
            TopicSegment::new("Acme"),
            Err(TopicSegmentError::InvalidCharacters)
        );
        assert_eq!(
            TopicSegment::new("acme/co"),
            Err(TopicSegmentError::InvalidCharacters)
        );
    }

    #[test]
    fn accepts_lowercase_digits_and_underscore() {
        assert!(TopicSegment::new("acme_motors_42").is_ok());
    }

    #[test]
    fn builds_expected_topic_pair() {
        let company = TopicSegment::new("acme").unwrap();
        let car = TopicSegment::new("car_1").unwrap();
        let topics = CarTopics::new(&company, &car);
        assert_eq!(topics.subscribe_topic(), "acme/car_1/module_gateway");
        assert_eq!(topics.publish_topic(), "acme/car_1/external_server");
    }
}
