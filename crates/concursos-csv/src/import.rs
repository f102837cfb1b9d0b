use std::collections::{HashMap, HashSet};

use concursos_core::{Concurso, NOT_AVAILABLE, TO_BE_DEFINED};
use concursos_storage::{ConcursoStore, StoreError};
use csv::{ReaderBuilder, StringRecord};
use thiserror::Error;
use tracing::info;

use crate::columns;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("csv file has no header row")]
    MissingHeader,
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happens to stored records whose id does not reappear in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// The file becomes the whole collection.
    #[default]
    Replace,
    /// Records missing from the file are kept, after the imported ones.
    KeepMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub retained: usize,
}

struct ColumnIndex {
    by_name: HashMap<String, usize>,
}

impl ColumnIndex {
    fn new(headers: &StringRecord) -> Self {
        let mut by_name = HashMap::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            by_name.entry(name.to_string()).or_insert(idx);
        }
        Self { by_name }
    }

    /// Raw cell text; empty when the column or the cell is missing.
    fn raw<'r>(&self, row: &'r StringRecord, column: &str) -> &'r str {
        self.by_name
            .get(column)
            .and_then(|&idx| row.get(idx))
            .unwrap_or_default()
    }

    fn or(&self, row: &StringRecord, column: &str, fallback: &str) -> String {
        let value = self.raw(row, column);
        if value.is_empty() {
            fallback.to_string()
        } else {
            value.to_string()
        }
    }
}

/// Parse `contents` into records, carrying annotations over from `existing`
/// for every id that reappears. Pure: the store is not touched.
pub fn import_csv(contents: impl AsRef<[u8]>, existing: &[Concurso]) -> Result<Vec<Concurso>, ImportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents.as_ref());

    let headers = reader.headers()?.clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ImportError::MissingHeader);
    }
    let index = ColumnIndex::new(&headers);

    let previous = existing
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect::<HashMap<_, _>>();

    let mut seen_ids = HashSet::new();
    let mut out = Vec::new();
    let mut row_index = 0usize;

    for row in reader.records() {
        let row = row?;
        if row.iter().all(str::is_empty) && row.len() <= 1 {
            continue;
        }

        let id = unique_id(&index, &row, row_index, &mut seen_ids);
        row_index += 1;

        let mut concurso = Concurso {
            id,
            source: index.or(&row, columns::SOURCE, NOT_AVAILABLE),
            institution: index.or(&row, columns::INSTITUTION, NOT_AVAILABLE),
            location: index.or(&row, columns::LOCATION, NOT_AVAILABLE),
            board: index.or(&row, columns::BOARD, TO_BE_DEFINED),
            vacancies: index.or(&row, columns::VACANCIES, NOT_AVAILABLE),
            salary: index.or(&row, columns::SALARY, NOT_AVAILABLE),
            registration_end: index.or(&row, columns::REGISTRATION_END, NOT_AVAILABLE),
            exemption_period: index.or(&row, columns::EXEMPTION_PERIOD, NOT_AVAILABLE),
            exam_date: index.or(&row, columns::EXAM_DATE, TO_BE_DEFINED),
            link: index.raw(&row, columns::LINK).to_string(),
            positions: index.or(&row, columns::POSITIONS, NOT_AVAILABLE),
            subjects: index.or(&row, columns::SUBJECTS, NOT_AVAILABLE),
            interest_status: Default::default(),
            is_enrolled: false,
            exam_location: None,
            notes: None,
            latitude: None,
            longitude: None,
        };
        if let Some(prior) = previous.get(concurso.id.as_str()) {
            concurso.carry_annotations_from(prior);
        }
        out.push(concurso);
    }

    Ok(out)
}

/// `institution-link` (or `institution-rowindex` without a link), suffixed
/// `-1`, `-2`, … when an earlier row of the same file already took it.
fn unique_id(
    index: &ColumnIndex,
    row: &StringRecord,
    row_index: usize,
    seen_ids: &mut HashSet<String>,
) -> String {
    let institution = index.raw(row, columns::INSTITUTION);
    let link = index.raw(row, columns::LINK);
    let base = if link.is_empty() {
        format!("{institution}-{row_index}")
    } else {
        format!("{institution}-{link}")
    };

    let mut id = base.clone();
    let mut counter = 1usize;
    while seen_ids.contains(&id) {
        id = format!("{base}-{counter}");
        counter += 1;
    }
    seen_ids.insert(id.clone());
    id
}

/// Parse and swap the store's collection. Nothing changes on failure.
pub fn import_into_store(
    store: &mut ConcursoStore,
    contents: impl AsRef<[u8]>,
    mode: ImportMode,
) -> Result<ImportSummary, ImportError> {
    let mut records = import_csv(contents, store.records())?;
    let imported = records.len();

    let retained = match mode {
        ImportMode::Replace => 0,
        ImportMode::KeepMissing => {
            let new_ids = records.iter().map(|c| c.id.clone()).collect::<HashSet<_>>();
            let missing = store
                .records()
                .iter()
                .filter(|c| !new_ids.contains(&c.id))
                .cloned()
                .collect::<Vec<_>>();
            let retained = missing.len();
            records.extend(missing);
            retained
        }
    };

    store.replace_all(records)?;
    info!(imported, retained, ?mode, "imported concursos");
    Ok(ImportSummary { imported, retained })
}
