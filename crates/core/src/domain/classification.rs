use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of message categories. Anything else the model produces is a
/// contract violation, not a category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    BookingRequest,
    BookingModification,
    GeneralInquiry,
    Complaint,
    Cancellation,
    Payment,
    Spam,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::BookingRequest,
        Self::BookingModification,
        Self::GeneralInquiry,
        Self::Complaint,
        Self::Cancellation,
        Self::Payment,
        Self::Spam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingRequest => "booking-request",
            Self::BookingModification => "booking-modification",
            Self::GeneralInquiry => "general-inquiry",
            Self::Complaint => "complaint",
            Self::Cancellation => "cancellation",
            Self::Payment => "payment",
            Self::Spam => "spam",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unrecognized value `{0}`")]
pub struct UnknownVariant(pub String);

impl FromStr for Category {
    type Err = UnknownVariant;

    /// Exact kebab-case wire names only.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| UnknownVariant(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl FromStr for Sentiment {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            _ => Err(UnknownVariant(value.to_string())),
        }
    }
}

/// Confidence in `[0.0, 1.0]`. The only constructor rejects anything else,
/// NaN included.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && (0.0..=1.0).contains(&value)).then_some(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub confidence: Confidence,
    pub fields: BTreeMap<String, String>,
    pub sentiment: Sentiment,
}

impl ClassificationResult {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, Confidence, Sentiment};

    #[test]
    fn category_parses_only_exact_wire_names() {
        assert_eq!("booking-request".parse::<Category>(), Ok(Category::BookingRequest));
        assert!("BOOKING_REQUEST".parse::<Category>().is_err());
        assert!("booking_modification".parse::<Category>().is_err());
        assert!("Spam".parse::<Category>().is_err());
        assert!(" spam ".parse::<Category>().is_err());
    }

    #[test]
    fn unknown_category_is_rejected() {
        let error = "unknown_thing".parse::<Category>().expect_err("must not parse");
        assert_eq!(error.0, "unknown_thing");
        assert!("booking".parse::<Category>().is_err());
        assert!("".parse::<Category>().is_err());
    }

    #[test]
    fn every_category_round_trips_through_its_wire_name() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
    }

    #[test]
    fn confidence_bounds_are_inclusive_and_reject_nan() {
        assert!(Confidence::new(0.0).is_some());
        assert!(Confidence::new(1.0).is_some());
        assert!(Confidence::new(-0.01).is_none());
        assert!(Confidence::new(1.01).is_none());
        assert!(Confidence::new(f64::NAN).is_none());
        assert!(Confidence::new(f64::INFINITY).is_none());
    }

    #[test]
    fn sentiment_rejects_unknown_values() {
        assert_eq!("negative".parse::<Sentiment>(), Ok(Sentiment::Negative));
        assert!("Negative".parse::<Sentiment>().is_err());
        assert!("angry".parse::<Sentiment>().is_err());
    }
}
