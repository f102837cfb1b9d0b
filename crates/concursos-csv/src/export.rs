use chrono::NaiveDate;
use concursos_core::{filtered_sorted, Concurso, SortSpec, ViewQuery, ViewRow};
use csv::{Terminator, WriterBuilder};
use thiserror::Error;

use crate::columns;

pub const EXPORT_HEADERS: [&str; 13] = [
    columns::SOURCE,
    columns::INSTITUTION,
    columns::LOCATION,
    columns::BOARD,
    columns::POSITIONS,
    columns::VACANCIES,
    columns::SALARY,
    columns::REGISTRATION_END,
    columns::EXEMPTION_PERIOD,
    columns::EXAM_DATE,
    columns::SUBJECTS,
    columns::STATUS,
    columns::LINK,
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("writing csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("flushing csv buffer: {0}")]
    Buffer(String),
}

/// Serialize already filtered and sorted rows. The status column comes from
/// each row's computed status.
pub fn export_csv(rows: &[ViewRow<'_>]) -> Result<String, ExportError> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(EXPORT_HEADERS)?;

    for row in rows {
        let c = row.record;
        writer.write_record([
            c.source.as_str(),
            c.institution.as_str(),
            c.location.as_str(),
            c.board.as_str(),
            c.positions.as_str(),
            c.vacancies.as_str(),
            c.salary.as_str(),
            c.registration_end.as_str(),
            c.exemption_period.as_str(),
            c.exam_date.as_str(),
            c.subjects.as_str(),
            row.status.label(),
            c.link.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Buffer(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| ExportError::Buffer(err.to_string()))
}

/// Export the unpaginated view for `query` and `sort`, with statuses
/// computed against `today`.
pub fn export_view(
    records: &[Concurso],
    query: &ViewQuery,
    sort: Option<SortSpec>,
    today: NaiveDate,
) -> Result<String, ExportError> {
    export_csv(&filtered_sorted(records, query, sort, today))
}

pub fn export_filename(date: NaiveDate) -> String {
    format!("concursos_oportunidades_{}.csv", date.format("%Y-%m-%d"))
}
