//! Filtered, sorted and paginated projection of the record collection.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Concurso, EditalStatus, UnknownVariant};

/// Rows revealed initially and per "load more" step.
pub const PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Source,
    Institution,
    Location,
    Board,
    Vacancies,
    Salary,
    RegistrationEnd,
    ExemptionPeriod,
    ExamDate,
    Link,
    Positions,
    Subjects,
    InterestStatus,
    ExamLocation,
    Notes,
    /// Computed lifecycle status label.
    Status,
}

impl SortField {
    pub const ALL: [SortField; 16] = [
        SortField::Source,
        SortField::Institution,
        SortField::Location,
        SortField::Board,
        SortField::Vacancies,
        SortField::Salary,
        SortField::RegistrationEnd,
        SortField::ExemptionPeriod,
        SortField::ExamDate,
        SortField::Link,
        SortField::Positions,
        SortField::Subjects,
        SortField::InterestStatus,
        SortField::ExamLocation,
        SortField::Notes,
        SortField::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Institution => "institution",
            Self::Location => "location",
            Self::Board => "board",
            Self::Vacancies => "vacancies",
            Self::Salary => "salary",
            Self::RegistrationEnd => "registration_end",
            Self::ExemptionPeriod => "exemption_period",
            Self::ExamDate => "exam_date",
            Self::Link => "link",
            Self::Positions => "positions",
            Self::Subjects => "subjects",
            Self::InterestStatus => "interest_status",
            Self::ExamLocation => "exam_location",
            Self::Notes => "notes",
            Self::Status => "status",
        }
    }

    fn value<'a>(&self, row: &ViewRow<'a>) -> &'a str {
        let record = row.record;
        match self {
            Self::Source => record.source.as_str(),
            Self::Institution => record.institution.as_str(),
            Self::Location => record.location.as_str(),
            Self::Board => record.board.as_str(),
            Self::Vacancies => record.vacancies.as_str(),
            Self::Salary => record.salary.as_str(),
            Self::RegistrationEnd => record.registration_end.as_str(),
            Self::ExemptionPeriod => record.exemption_period.as_str(),
            Self::ExamDate => record.exam_date.as_str(),
            Self::Link => record.link.as_str(),
            Self::Positions => record.positions.as_str(),
            Self::Subjects => record.subjects.as_str(),
            Self::InterestStatus => record.interest_status.as_str(),
            Self::ExamLocation => record.exam_location.as_deref().unwrap_or_default(),
            Self::Notes => record.notes.as_deref().unwrap_or_default(),
            Self::Status => row.status.label(),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "sort field",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(UnknownVariant {
                kind: "sort direction",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    fn compare(&self, a: &ViewRow<'_>, b: &ViewRow<'_>) -> Ordering {
        let ordering = self.field.value(a).cmp(&self.field.value(b));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Filter inputs. Empty strings match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQuery {
    /// Case-insensitive substring over institution, board and source.
    pub text: String,
    /// Exact region code.
    pub region: String,
    /// Exact lifecycle status label.
    pub status: String,
}

impl ViewQuery {
    fn matches(&self, record: &Concurso, status: EditalStatus) -> bool {
        let needle = self.text.to_lowercase();
        let matches_text = needle.is_empty()
            || record.institution.to_lowercase().contains(&needle)
            || record.board.to_lowercase().contains(&needle)
            || record.source.to_lowercase().contains(&needle);
        let matches_region = self.region.is_empty() || record.location == self.region;
        let matches_status = self.status.is_empty() || status.label() == self.status;
        matches_text && matches_region && matches_status
    }
}

/// Interactive view inputs: filters, optional sort and the visible count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub query: ViewQuery,
    pub sort: Option<SortSpec>,
    pub visible_count: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            query: ViewQuery::default(),
            sort: None,
            visible_count: PAGE_SIZE,
        }
    }
}

impl ViewState {
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.query.text = text.into();
        self.reset_visible();
    }

    pub fn set_region(&mut self, region: impl Into<String>) {
        self.query.region = region.into();
        self.reset_visible();
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.query.status = status.into();
        self.reset_visible();
    }

    /// Same field flips the direction; a new field starts ascending.
    pub fn toggle_sort(&mut self, field: SortField) {
        self.sort = Some(match self.sort {
            Some(current) if current.field == field => SortSpec {
                field,
                direction: current.direction.flipped(),
            },
            _ => SortSpec::asc(field),
        });
        self.reset_visible();
    }

    pub fn grow(&mut self) {
        self.visible_count = self.visible_count.saturating_add(PAGE_SIZE);
    }

    pub fn reset_visible(&mut self) {
        self.visible_count = PAGE_SIZE;
    }
}

/// A record paired with its status computed for the view's reference date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRow<'a> {
    pub record: &'a Concurso,
    pub status: EditalStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedView<'a> {
    pub rows: Vec<ViewRow<'a>>,
    /// Rows matching the filters before truncation.
    pub total: usize,
}

impl DerivedView<'_> {
    pub fn has_more(&self) -> bool {
        self.rows.len() < self.total
    }
}

/// Filter then stably sort, without truncation. Exports use this directly.
pub fn filtered_sorted<'a>(
    records: &'a [Concurso],
    query: &ViewQuery,
    sort: Option<SortSpec>,
    today: NaiveDate,
) -> Vec<ViewRow<'a>> {
    let mut rows = records
        .iter()
        .map(|record| ViewRow {
            record,
            status: EditalStatus::compute(&record.registration_end, &record.exam_date, today),
        })
        .filter(|row| query.matches(row.record, row.status))
        .collect::<Vec<_>>();

    if let Some(spec) = sort {
        rows.sort_by(|a, b| spec.compare(a, b));
    }
    rows
}

pub fn derive_view<'a>(records: &'a [Concurso], state: &ViewState, today: NaiveDate) -> DerivedView<'a> {
    let mut rows = filtered_sorted(records, &state.query, state.sort, today);
    let total = rows.len();
    rows.truncate(state.visible_count);
    DerivedView { rows, total }
}
