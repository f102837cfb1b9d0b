//! Askama templates and the precomputed rows they render.

use askama::Template;
use concursos_core::{
    Concurso, DerivedView, EditalStatus, InterestStatus, SortDirection, SortField, ViewRow,
    ViewState, PAGE_SIZE,
};
use serde::Serialize;
use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notice {
    pub message: String,
    pub is_error: bool,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }

    /// Query-string pair carrying this notice through a redirect.
    pub fn query_pair(&self) -> String {
        let key = if self.is_error { "error" } else { "notice" };
        form_urlencoded::Serializer::new(String::new())
            .append_pair(key, &self.message)
            .finish()
    }
}

/// Encode the interactive view inputs; defaults are left out.
pub(crate) fn view_query_string(state: &ViewState) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if !state.query.text.is_empty() {
        query.append_pair("q", &state.query.text);
    }
    if !state.query.region.is_empty() {
        query.append_pair("region", &state.query.region);
    }
    if !state.query.status.is_empty() {
        query.append_pair("status", &state.query.status);
    }
    if let Some(sort) = state.sort {
        query.append_pair("sort", sort.field.as_str());
        query.append_pair("dir", sort.direction.as_str());
    }
    if state.visible_count != PAGE_SIZE {
        query.append_pair("limit", &state.visible_count.to_string());
    }
    query.finish()
}

#[derive(Debug, Clone)]
pub(crate) struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

impl SelectOption {
    pub fn regions(regions: Vec<String>, selected: &str) -> Vec<Self> {
        regions
            .into_iter()
            .map(|region| SelectOption {
                selected: region == selected,
                label: region.clone(),
                value: region,
            })
            .collect()
    }

    pub fn statuses(selected: &str) -> Vec<Self> {
        EditalStatus::ALL
            .iter()
            .map(|status| SelectOption {
                value: status.label().to_string(),
                label: status.label().to_string(),
                selected: status.label() == selected,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SortHeader {
    pub label: &'static str,
    pub query: String,
    pub marker: &'static str,
}

const SORTABLE_COLUMNS: [(&str, SortField); 9] = [
    ("Órgão / Fonte", SortField::Institution),
    ("UF", SortField::Location),
    ("Banca", SortField::Board),
    ("Vagas", SortField::Vacancies),
    ("Salário", SortField::Salary),
    ("Fim Inscrições", SortField::RegistrationEnd),
    ("Período Isenção", SortField::ExemptionPeriod),
    ("Data Prova", SortField::ExamDate),
    ("Status Edital", SortField::Status),
];

fn sort_headers(state: &ViewState) -> Vec<SortHeader> {
    SORTABLE_COLUMNS
        .iter()
        .map(|&(label, field)| {
            let mut next = state.clone();
            next.toggle_sort(field);
            let marker = match state.sort {
                Some(spec) if spec.field == field => match spec.direction {
                    SortDirection::Asc => "▲",
                    SortDirection::Desc => "▼",
                },
                _ => "",
            };
            SortHeader {
                label,
                query: view_query_string(&next),
                marker,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub(crate) struct OpportunityRow {
    pub id: String,
    pub source: String,
    pub institution: String,
    pub location: String,
    pub board: String,
    pub vacancies: String,
    pub salary: String,
    pub registration_end: String,
    pub exemption_period: String,
    pub exam_date: String,
    pub positions: String,
    pub subjects: String,
    pub link: String,
    pub has_link: bool,
    pub status_label: &'static str,
    pub status_class: &'static str,
    pub is_interested: bool,
    pub is_ignored: bool,
}

impl From<&ViewRow<'_>> for OpportunityRow {
    fn from(row: &ViewRow<'_>) -> Self {
        let c = row.record;
        Self {
            id: c.id.clone(),
            source: c.source.clone(),
            institution: c.institution.clone(),
            location: c.location.clone(),
            board: c.board.clone(),
            vacancies: c.vacancies.clone(),
            salary: c.salary.clone(),
            registration_end: c.registration_end.clone(),
            exemption_period: c.exemption_period.clone(),
            exam_date: c.exam_date.clone(),
            positions: c.positions.clone(),
            subjects: c.subjects.clone(),
            has_link: !c.link.trim().is_empty(),
            link: c.link.clone(),
            status_label: row.status.label(),
            status_class: match row.status {
                EditalStatus::Aberto => "badge-open",
                EditalStatus::ProvaAgendada => "badge-scheduled",
                EditalStatus::Encerrado => "badge-closed",
                EditalStatus::NaoDisponivel => "badge-unknown",
            },
            is_interested: c.interest_status == InterestStatus::Interested,
            is_ignored: c.interest_status == InterestStatus::Ignored,
        }
    }
}

#[derive(Template)]
#[template(path = "opportunities.html")]
pub(crate) struct OpportunitiesTemplate {
    pub notice: Option<Notice>,
    pub text: String,
    pub region_options: Vec<SelectOption>,
    pub status_options: Vec<SelectOption>,
    pub table_html: String,
    pub ai_enabled: bool,
    pub regions_busy: bool,
    pub dates_busy: bool,
}

#[derive(Template)]
#[template(path = "opportunities_table_partial.html")]
pub(crate) struct OpportunitiesTableTemplate {
    pub rows: Vec<OpportunityRow>,
    pub headers: Vec<SortHeader>,
    pub shown: usize,
    pub total: usize,
    pub has_more: bool,
    pub more_query: String,
    pub back: String,
    pub store_empty: bool,
    /// Export, sort and `back` controls travel with the table so htmx swaps keep them current.
    pub export_query: String,
    pub sort: &'static str,
    pub dir: &'static str,
}

impl OpportunitiesTableTemplate {
    pub fn new(view: &DerivedView<'_>, state: &ViewState, store_empty: bool) -> Self {
        let mut grown = state.clone();
        grown.grow();
        let mut unpaged = state.clone();
        unpaged.reset_visible();
        let current = view_query_string(state);

        Self {
            rows: view.rows.iter().map(OpportunityRow::from).collect(),
            headers: sort_headers(state),
            shown: view.rows.len(),
            total: view.total,
            has_more: view.has_more(),
            more_query: view_query_string(&grown),
            back: if current.is_empty() {
                "/".to_string()
            } else {
                format!("/?{current}")
            },
            store_empty,
            export_query: view_query_string(&unpaged),
            sort: state.sort.map(|s| s.field.as_str()).unwrap_or_default(),
            dir: state.sort.map(|s| s.direction.as_str()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ExamRow {
    pub id: String,
    pub institution: String,
    pub source: String,
    pub location: String,
    pub vacancies: String,
    pub exam_date: String,
    pub is_enrolled: bool,
    pub exam_location: String,
    pub notes: String,
    pub coordinates: Option<String>,
}

impl From<&Concurso> for ExamRow {
    fn from(c: &Concurso) -> Self {
        Self {
            id: c.id.clone(),
            institution: c.institution.clone(),
            source: c.source.clone(),
            location: c.location.clone(),
            vacancies: c.vacancies.clone(),
            exam_date: c.exam_date.clone(),
            is_enrolled: c.is_enrolled,
            exam_location: c.exam_location.clone().unwrap_or_default(),
            notes: c.notes.clone().unwrap_or_default(),
            coordinates: match (c.latitude, c.longitude) {
                (Some(lat), Some(lng)) => Some(format!("{lat:.4}, {lng:.4}")),
                _ => None,
            },
        }
    }
}

#[derive(Template)]
#[template(path = "my_exams.html")]
pub(crate) struct MyExamsTemplate {
    pub notice: Option<Notice>,
    pub exams: Vec<ExamRow>,
}

#[derive(Template)]
#[template(path = "map.html")]
pub(crate) struct MapTemplate {
    pub notice: Option<Notice>,
    pub marker_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MapMarker {
    pub id: String,
    pub institution: String,
    pub source: String,
    pub vacancies: String,
    pub exam_date: String,
    pub place: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl MapMarker {
    pub fn from_record(c: &Concurso) -> Option<Self> {
        Some(Self {
            id: c.id.clone(),
            institution: c.institution.clone(),
            source: c.source.clone(),
            vacancies: c.vacancies.clone(),
            exam_date: c.exam_date.clone(),
            place: c.exam_location.clone().unwrap_or_else(|| c.location.clone()),
            latitude: c.latitude?,
            longitude: c.longitude?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concursos_core::SortSpec;

    #[test]
    fn default_state_encodes_to_nothing() {
        assert_eq!(view_query_string(&ViewState::default()), "");
    }

    #[test]
    fn query_string_carries_filters_sort_and_limit() {
        let mut state = ViewState::default();
        state.set_text("Tribunal de Justiça");
        state.set_region("SP");
        state.toggle_sort(SortField::ExamDate);
        state.grow();
        assert_eq!(
            view_query_string(&state),
            "q=Tribunal+de+Justi%C3%A7a&region=SP&sort=exam_date&dir=asc&limit=100"
        );
    }

    #[test]
    fn active_sort_header_offers_the_flipped_direction() {
        let state = ViewState {
            sort: Some(SortSpec::asc(SortField::Board)),
            ..Default::default()
        };
        let headers = sort_headers(&state);
        let board = headers.iter().find(|h| h.label == "Banca").expect("board header");
        assert_eq!(board.marker, "▲");
        assert_eq!(board.query, "sort=board&dir=desc");

        let uf = headers.iter().find(|h| h.label == "UF").expect("uf header");
        assert_eq!(uf.marker, "");
        assert_eq!(uf.query, "sort=location&dir=asc");
    }

    #[test]
    fn notices_travel_as_query_pairs() {
        assert_eq!(Notice::info("3 concursos").query_pair(), "notice=3+concursos");
        assert_eq!(Notice::error("falhou").query_pair(), "error=falhou");
    }
}
