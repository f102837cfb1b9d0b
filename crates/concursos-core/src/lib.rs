//! Core domain model for tracked exam announcements ("concursos").

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod geo;
pub mod status;
pub mod view;

pub use geo::{approximate_coordinates, GeoPoint};
pub use status::{parse_loose_date, EditalStatus};
pub use view::{
    derive_view, filtered_sorted, DerivedView, SortDirection, SortField, SortSpec, ViewQuery,
    ViewRow, ViewState, PAGE_SIZE,
};

pub const CRATE_NAME: &str = "concursos-core";

/// Fallback used for most cells that are missing from an imported row.
pub const NOT_AVAILABLE: &str = "N/A";
/// Fallback for the board and exam date cells.
pub const TO_BE_DEFINED: &str = "A Definir";

/// User triage decision on a record. Exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterestStatus {
    #[default]
    None,
    Interested,
    Ignored,
}

impl InterestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Interested => "interested",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for InterestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for InterestStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "interested" => Ok(Self::Interested),
            "ignored" => Ok(Self::Ignored),
            _ => Err(UnknownVariant {
                kind: "interest status",
                value: s.to_string(),
            }),
        }
    }
}

/// One exam announcement as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concurso {
    pub id: String,
    pub source: String,
    pub institution: String,
    /// Region code: usually a two-letter UF, `BR` for national bodies or `N/A`.
    pub location: String,
    pub board: String,
    pub vacancies: String,
    pub salary: String,
    pub registration_end: String,
    pub exemption_period: String,
    pub exam_date: String,
    pub link: String,
    #[serde(default)]
    pub positions: String,
    #[serde(default)]
    pub subjects: String,
    #[serde(default)]
    pub interest_status: InterestStatus,
    #[serde(default)]
    pub is_enrolled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Concurso {
    /// Record with every announcement field at its import fallback.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: NOT_AVAILABLE.into(),
            institution: NOT_AVAILABLE.into(),
            location: NOT_AVAILABLE.into(),
            board: TO_BE_DEFINED.into(),
            vacancies: NOT_AVAILABLE.into(),
            salary: NOT_AVAILABLE.into(),
            registration_end: NOT_AVAILABLE.into(),
            exemption_period: NOT_AVAILABLE.into(),
            exam_date: TO_BE_DEFINED.into(),
            link: String::new(),
            positions: NOT_AVAILABLE.into(),
            subjects: NOT_AVAILABLE.into(),
            interest_status: InterestStatus::None,
            is_enrolled: false,
            exam_location: None,
            notes: None,
            latitude: None,
            longitude: None,
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// True when the region code still needs to be inferred.
    pub fn needs_region(&self) -> bool {
        let location = self.location.trim();
        location.is_empty() || location == NOT_AVAILABLE
    }

    pub fn date_field(&self, field: DateField) -> &str {
        match field {
            DateField::RegistrationEnd => self.registration_end.as_str(),
            DateField::ExamDate => self.exam_date.as_str(),
            DateField::ExemptionPeriod => self.exemption_period.as_str(),
        }
    }

    /// Copy the user-owned annotation fields from `previous` onto `self`.
    pub fn carry_annotations_from(&mut self, previous: &Concurso) {
        self.interest_status = previous.interest_status;
        self.is_enrolled = previous.is_enrolled;
        self.exam_location = previous.exam_location.clone();
        self.notes = previous.notes.clone();
        self.latitude = previous.latitude;
        self.longitude = previous.longitude;
    }

    /// Overwrite the fields carried by `patch`. The identifier never changes.
    pub fn apply(&mut self, patch: ConcursoPatch) {
        let ConcursoPatch {
            source,
            institution,
            location,
            board,
            vacancies,
            salary,
            registration_end,
            exemption_period,
            exam_date,
            link,
            positions,
            subjects,
            interest_status,
            is_enrolled,
            exam_location,
            notes,
            latitude,
            longitude,
        } = patch;

        set_if_some(&mut self.source, source);
        set_if_some(&mut self.institution, institution);
        set_if_some(&mut self.location, location);
        set_if_some(&mut self.board, board);
        set_if_some(&mut self.vacancies, vacancies);
        set_if_some(&mut self.salary, salary);
        set_if_some(&mut self.registration_end, registration_end);
        set_if_some(&mut self.exemption_period, exemption_period);
        set_if_some(&mut self.exam_date, exam_date);
        set_if_some(&mut self.link, link);
        set_if_some(&mut self.positions, positions);
        set_if_some(&mut self.subjects, subjects);
        set_if_some(&mut self.interest_status, interest_status);
        set_if_some(&mut self.is_enrolled, is_enrolled);
        set_if_some(&mut self.exam_location, exam_location);
        set_if_some(&mut self.notes, notes);
        set_if_some(&mut self.latitude, latitude);
        set_if_some(&mut self.longitude, longitude);
    }
}

fn set_if_some<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Partial update. `None` leaves a field untouched; the nested options on the
/// annotation fields allow clearing them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcursoPatch {
    pub source: Option<String>,
    pub institution: Option<String>,
    pub location: Option<String>,
    pub board: Option<String>,
    pub vacancies: Option<String>,
    pub salary: Option<String>,
    pub registration_end: Option<String>,
    pub exemption_period: Option<String>,
    pub exam_date: Option<String>,
    pub link: Option<String>,
    pub positions: Option<String>,
    pub subjects: Option<String>,
    pub interest_status: Option<InterestStatus>,
    pub is_enrolled: Option<bool>,
    pub exam_location: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
}

impl ConcursoPatch {
    pub fn interest(status: InterestStatus) -> Self {
        Self {
            interest_status: Some(status),
            ..Default::default()
        }
    }

    pub fn location(code: impl Into<String>) -> Self {
        Self {
            location: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn coordinates(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(Some(latitude)),
            longitude: Some(Some(longitude)),
            ..Default::default()
        }
    }

    pub fn date(field: DateField, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            DateField::RegistrationEnd => Self {
                registration_end: value,
                ..Default::default()
            },
            DateField::ExamDate => Self {
                exam_date: value,
                ..Default::default()
            },
            DateField::ExemptionPeriod => Self {
                exemption_period: value,
                ..Default::default()
            },
        }
    }

    /// Annotation edit from the "my exams" form. Blank text clears the field.
    pub fn annotations(is_enrolled: bool, exam_location: &str, notes: &str) -> Self {
        Self {
            is_enrolled: Some(is_enrolled),
            exam_location: Some(non_blank(exam_location)),
            notes: Some(non_blank(notes)),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// The three date-bearing text fields of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateField {
    RegistrationEnd,
    ExamDate,
    ExemptionPeriod,
}

impl DateField {
    pub const ALL: [DateField; 3] = [
        DateField::RegistrationEnd,
        DateField::ExamDate,
        DateField::ExemptionPeriod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationEnd => "registration_end",
            Self::ExamDate => "exam_date",
            Self::ExemptionPeriod => "exemption_period",
        }
    }
}

impl FromStr for DateField {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "date field",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_only_touches_carried_fields() {
        let mut record = Concurso::placeholder("TJ-SP-1");
        record.institution = "TJ-SP".into();
        record.notes = Some("levar documento".into());

        record.apply(ConcursoPatch::location("SP"));

        assert_eq!(record.location, "SP");
        assert_eq!(record.institution, "TJ-SP");
        assert_eq!(record.notes.as_deref(), Some("levar documento"));
        assert_eq!(record.id, "TJ-SP-1");
    }

    #[test]
    fn interest_round_trip_restores_record() {
        let original = Concurso::placeholder("x");
        let mut record = original.clone();
        record.apply(ConcursoPatch::interest(InterestStatus::Interested));
        assert_eq!(record.interest_status, InterestStatus::Interested);
        record.apply(ConcursoPatch::interest(InterestStatus::None));
        assert_eq!(record, original);
    }

    #[test]
    fn annotation_patch_clears_blank_text() {
        let mut record = Concurso::placeholder("x");
        record.exam_location = Some("Escola Estadual".into());
        record.apply(ConcursoPatch::annotations(true, "  ", "trazer caneta"));
        assert!(record.is_enrolled);
        assert_eq!(record.exam_location, None);
        assert_eq!(record.notes.as_deref(), Some("trazer caneta"));
    }

    #[test]
    fn persisted_shape_uses_lowercase_interest_and_omits_absent_annotations() {
        let mut record = Concurso::placeholder("x");
        record.interest_status = InterestStatus::Ignored;
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["interest_status"], "ignored");
        assert!(json.get("latitude").is_none());
        assert!(json.get("notes").is_none());

        let back: Concurso = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn parses_interest_and_date_field_names() {
        assert_eq!("Interested".parse::<InterestStatus>(), Ok(InterestStatus::Interested));
        assert!("maybe".parse::<InterestStatus>().is_err());
        assert_eq!("exam_date".parse::<DateField>(), Ok(DateField::ExamDate));
        assert!("salary".parse::<DateField>().is_err());
    }

    #[test]
    fn unknown_variant_names_the_kind_and_value() {
        let err = "maybe".parse::<InterestStatus>().expect_err("unknown status");
        assert_eq!(err.to_string(), "unknown interest status `maybe`");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn region_is_missing_when_blank_or_not_available() {
        let mut record = Concurso::placeholder("x");
        assert!(record.needs_region());
        record.location = String::new();
        assert!(record.needs_region());
        record.location = "BR".into();
        assert!(!record.needs_region());
    }
}
