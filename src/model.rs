//! Locality, unit and measurement records.
//!
//! These are the canonical shapes persisted by the [`crate::store`] and consumed by the
//! [`crate::export`] transformer. Client payloads are coerced into them by
//! [`crate::submission`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::error::RegistryError;

/// Flooring types offered by the registration form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter,
    Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
#[strum(ascii_case_insensitive)]
pub enum FlooringType {
    #[strum(to_string = "Porcelanato")]
    Porcelanato,
    #[strum(to_string = "Cerâmica")]
    Ceramica,
    #[strum(to_string = "Granito")]
    Granito,
    #[strum(to_string = "Mármore")]
    Marmore,
    #[strum(to_string = "Vinílico")]
    Vinilico,
    #[strum(to_string = "Laminado")]
    Laminado,
    #[strum(to_string = "Cimento Queimado")]
    CimentoQueimado,
    #[strum(to_string = "Epóxi")]
    Epoxi,
    #[strum(to_string = "Madeira")]
    Madeira,
    #[strum(to_string = "Carpete")]
    Carpete,
}

/// Wall types offered by the registration form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter,
    Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
#[strum(ascii_case_insensitive)]
pub enum WallType {
    #[strum(to_string = "Alvenaria")]
    Alvenaria,
    #[strum(to_string = "Drywall")]
    Drywall,
    #[strum(to_string = "Divisória")]
    Divisoria,
    #[strum(to_string = "Vidro")]
    Vidro,
    #[strum(to_string = "Azulejo")]
    Azulejo,
    #[strum(to_string = "Concreto Aparente")]
    ConcretoAparente,
    #[strum(to_string = "Madeira")]
    Madeira,
}

macro_rules! vocabulary {
    ($ty:ident, $what:literal) => {
        impl $ty {
            /// Every label of the vocabulary, in display order.
            pub fn labels() -> Vec<String> {
                Self::iter().map(|v| v.to_string()).collect()
            }

            /// Parses a submitted tag, reporting unknown values as validation errors.
            pub fn parse_tag(tag: &str) -> Result<Self, RegistryError> {
                Self::from_str(tag.trim()).map_err(|_| {
                    RegistryError::Validation(format!("{} desconhecido: '{}'", $what, tag))
                })
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.to_string()
            }
        }

        impl TryFrom<String> for $ty {
            type Error = RegistryError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse_tag(&value)
            }
        }
    };
}

vocabulary!(FlooringType, "Tipo de piso");
vocabulary!(WallType, "Tipo de parede");

/// Category of a measurement entry.
///
/// The four well-known categories have fixed Portuguese labels, anything else is kept
/// verbatim as a free category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MeasurementCategory {
    Glass,
    RestroomLocker,
    InternalArea,
    ExternalArea,
    Other(String),
}

impl MeasurementCategory {
    pub const KNOWN: [MeasurementCategory; 4] = [
        MeasurementCategory::Glass,
        MeasurementCategory::RestroomLocker,
        MeasurementCategory::InternalArea,
        MeasurementCategory::ExternalArea,
    ];

    pub fn label(&self) -> &str {
        match self {
            MeasurementCategory::Glass => "Vidro",
            MeasurementCategory::RestroomLocker => "Sanitário/Vestiário",
            MeasurementCategory::InternalArea => "Área Interna",
            MeasurementCategory::ExternalArea => "Área Externa",
            MeasurementCategory::Other(label) => label,
        }
    }

    pub fn labels() -> Vec<String> {
        Self::KNOWN.iter().map(|c| c.label().to_string()).collect()
    }
}

impl From<&str> for MeasurementCategory {
    fn from(label: &str) -> Self {
        let label = label.trim();
        let folded = label.to_lowercase();
        Self::KNOWN
            .iter()
            .find(|known| known.label().to_lowercase() == folded)
            .cloned()
            .unwrap_or_else(|| MeasurementCategory::Other(label.to_string()))
    }
}

impl From<String> for MeasurementCategory {
    fn from(label: String) -> Self {
        MeasurementCategory::from(label.as_str())
    }
}

impl From<MeasurementCategory> for String {
    fn from(category: MeasurementCategory) -> Self {
        category.label().to_string()
    }
}

impl fmt::Display for MeasurementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A width or height as submitted.
///
/// Keeps the numeric literal so `5` renders as `5` and `2.0` as `2.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimension(Number);

impl Dimension {
    pub fn from_number(number: Number) -> Option<Self> {
        let value = number.as_f64()?;
        (value.is_finite() && value >= 0.0).then_some(Dimension(number))
    }

    /// Parses numeric text the way a form field would carry it (`"5"`, `"1,5"`, `"2.0"`).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().replace(',', ".");
        if let Ok(int) = text.parse::<u64>() {
            return Some(Dimension(Number::from(int)));
        }
        let value = text.parse::<f64>().ok()?;
        Number::from_f64(value).and_then(Self::from_number)
    }

    pub fn value(&self) -> f64 {
        self.0.as_f64().unwrap_or(0.0)
    }
}

impl From<u32> for Dimension {
    fn from(value: u32) -> Self {
        Dimension(Number::from(value))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One typed width × height record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub category: MeasurementCategory,
    pub width: Dimension,
    pub height: Dimension,
    /// Stored as accepted at ingestion, never rounded.
    pub area: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl Measurement {
    /// Builds a measurement with the area computed from its sides.
    pub fn new(category: MeasurementCategory, width: Dimension, height: Dimension) -> Self {
        let area = width.value() * height.value();
        Measurement {
            category,
            width,
            height,
            area,
            quantity: None,
        }
    }

    pub fn computed_area(&self) -> f64 {
        self.width.value() * self.height.value()
    }
}

/// A submitted measurement that could not be coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedMeasurement {
    /// The entry as it was received, serialized back to JSON text.
    pub raw: String,
    pub reason: String,
}

/// Entry of a unit's measurement list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementEntry {
    Valid(Measurement),
    Malformed(MalformedMeasurement),
}

impl MeasurementEntry {
    pub fn as_valid(&self) -> Option<&Measurement> {
        match self {
            MeasurementEntry::Valid(m) => Some(m),
            MeasurementEntry::Malformed(_) => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, MeasurementEntry::Malformed(_))
    }
}

impl From<Measurement> for MeasurementEntry {
    fn from(m: Measurement) -> Self {
        MeasurementEntry::Valid(m)
    }
}

/// Boolean facility flags of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facilities {
    pub has_parking: bool,
    pub covered_parking: bool,
    pub has_lawn: bool,
    pub has_first_aid_room: bool,
    pub has_vaccination_room: bool,
    pub has_high_glass: bool,
    pub high_glass_danger: bool,
}

impl Facilities {
    /// Clears sub-flags whose parent flag is off.
    pub fn normalized(mut self) -> Self {
        self.covered_parking &= self.has_parking;
        self.high_glass_danger &= self.has_high_glass;
        self
    }
}

/// One registered facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    pub name: String,
    pub registration_date: NaiveDate,
    pub responsible: String,
    pub employee_count: u32,
    pub flooring: BTreeSet<FlooringType>,
    pub walls: BTreeSet<WallType>,
    pub facilities: Facilities,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub measurements: Vec<MeasurementEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Unit {
    /// Starts a unit with a fresh id and no attributes set.
    pub fn new(name: impl Into<String>, registration_date: NaiveDate) -> Self {
        let now = Utc::now();
        Unit {
            id: Uuid::new_v4(),
            name: name.into(),
            registration_date,
            responsible: String::new(),
            employee_count: 0,
            flooring: BTreeSet::new(),
            walls: BTreeSet::new(),
            facilities: Facilities::default(),
            notes: String::new(),
            measurements: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn malformed_measurements(&self) -> usize {
        self.measurements.iter().filter(|m| m.is_malformed()).count()
    }
}

/// A named group of units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locality {
    pub name: String,
    #[serde(default)]
    pub units: Vec<Unit>,
}

impl Locality {
    pub fn new(name: impl Into<String>) -> Self {
        Locality {
            name: name.into(),
            units: Vec::new(),
        }
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_tags_parse_case_insensitively() {
        assert_eq!(
            FlooringType::parse_tag("porcelanato").unwrap(),
            FlooringType::Porcelanato
        );
        assert_eq!(
            WallType::parse_tag(" Alvenaria ").unwrap(),
            WallType::Alvenaria
        );
        assert!(matches!(
            FlooringType::parse_tag("Grama"),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn vocabulary_labels_follow_declaration_order() {
        let labels = WallType::labels();
        assert_eq!(labels.first().map(String::as_str), Some("Alvenaria"));
        assert_eq!(labels.len(), 7);
        assert_eq!(FlooringType::labels()[6], "Cimento Queimado");
    }

    #[test]
    fn known_categories_are_recognized_and_others_kept() {
        assert_eq!(
            MeasurementCategory::from("área interna"),
            MeasurementCategory::InternalArea
        );
        assert_eq!(
            MeasurementCategory::from("Depósito"),
            MeasurementCategory::Other("Depósito".to_string())
        );
        assert_eq!(MeasurementCategory::from("vidro"), MeasurementCategory::Glass);
        assert_eq!(MeasurementCategory::from("Glass").label(), "Glass");
    }

    #[test]
    fn dimension_keeps_its_literal() {
        assert_eq!(Dimension::parse("5").unwrap().to_string(), "5");
        assert_eq!(Dimension::parse("2.0").unwrap().to_string(), "2.0");
        assert_eq!(Dimension::parse("1,5").unwrap().to_string(), "1.5");
        assert!(Dimension::parse("-1").is_none());
        assert!(Dimension::parse("abc").is_none());
    }

    #[test]
    fn facilities_sub_flags_require_parent() {
        let facilities = Facilities {
            covered_parking: true,
            high_glass_danger: true,
            has_high_glass: true,
            ..Facilities::default()
        }
        .normalized();
        assert!(!facilities.covered_parking);
        assert!(facilities.high_glass_danger);
    }

    #[test]
    fn unit_serializes_tags_as_labels() {
        let mut unit = Unit::new("Recepção", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        unit.flooring.insert(FlooringType::CimentoQueimado);
        unit.measurements.push(
            Measurement::new(
                MeasurementCategory::InternalArea,
                Dimension::from(5),
                Dimension::from(3),
            )
            .into(),
        );
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["flooring"][0], "Cimento Queimado");
        assert_eq!(json["measurements"][0]["category"], "Área Interna");
        assert_eq!(json["measurements"][0]["area"], 15.0);

        let back: Unit = serde_json::from_value(json).unwrap();
        assert_eq!(back, unit);
    }
}
