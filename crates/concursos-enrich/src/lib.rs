//! AI-backed enrichment of imported concursos: missing region codes and
//! free-text date cleanup.

pub mod gemini;
pub mod tracker;

use std::collections::HashSet;

use async_trait::async_trait;
use concursos_core::{ConcursoPatch, DateField, NOT_AVAILABLE, TO_BE_DEFINED};
use concursos_storage::{SharedStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

pub use gemini::{GeminiConfig, GeminiError, GeminiService};
pub use tracker::{OperationState, OperationTracker, RunningGuard};

pub const CRATE_NAME: &str = "concursos-enrich";

pub const REGION_BATCH_LIMIT: usize = 15;
pub const DATE_BATCH_LIMIT: usize = 30;

/// Values the date cleanup leaves alone.
const DATE_SENTINELS: [&str; 4] = [NOT_AVAILABLE, TO_BE_DEFINED, "Suspenso", "Cancelado"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionQuery {
    pub id: String,
    pub institution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionGuess {
    pub id: String,
    pub uf: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateQuery {
    pub id: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateNormalization {
    pub id: String,
    #[serde(rename = "cleanDate")]
    pub clean: String,
}

/// The external collaborator behind both flows.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn classify_regions(&self, queries: &[RegionQuery]) -> anyhow::Result<Vec<RegionGuess>>;

    /// Single-item lookup backed by a search-grounded model.
    async fn grounded_region(&self, institution: &str) -> anyhow::Result<Option<String>>;

    async fn normalize_dates(&self, queries: &[DateQuery]) -> anyhow::Result<Vec<DateNormalization>>;
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("nothing to enrich")]
    NothingToDo,
    #[error("enrichment service failed: {0:#}")]
    Service(#[from] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionEnrichmentSummary {
    pub targets: usize,
    pub classified: usize,
    pub grounded: usize,
    pub unresolved: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRefinementSummary {
    pub sent: usize,
    pub applied: usize,
}

/// Trimmed, uppercased region code, or `None` for blanks, `N/A` and
/// anything longer than three characters.
pub fn normalize_region_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() || code == NOT_AVAILABLE || code.chars().count() > 3 {
        return None;
    }
    Some(code)
}

/// Fill missing region codes for up to [`REGION_BATCH_LIMIT`] records.
///
/// The store lock is only held while reading targets and applying results.
/// A failing call aborts the run; results applied before it stay.
pub async fn enrich_regions(
    store: &SharedStore,
    service: &dyn EnrichmentService,
) -> Result<RegionEnrichmentSummary, EnrichError> {
    let targets = {
        let guard = store.lock().await;
        guard
            .records()
            .iter()
            .filter(|c| c.needs_region())
            .take(REGION_BATCH_LIMIT)
            .map(|c| RegionQuery {
                id: c.id.clone(),
                institution: c.institution.clone(),
            })
            .collect::<Vec<_>>()
    };
    if targets.is_empty() {
        return Err(EnrichError::NothingToDo);
    }

    let mut summary = RegionEnrichmentSummary {
        targets: targets.len(),
        ..Default::default()
    };

    let guesses = service
        .classify_regions(&targets)
        .instrument(info_span!("classify_regions", batch = targets.len()))
        .await?;

    let batch_ids = targets.iter().map(|t| t.id.as_str()).collect::<HashSet<_>>();
    let mut answered = HashSet::new();
    let mut fallback = Vec::new();
    {
        let mut guard = store.lock().await;
        for guess in guesses
            .iter()
            .filter(|g| batch_ids.contains(g.id.as_str()) && answered.insert(g.id.as_str()))
        {
            match normalize_region_code(&guess.uf) {
                Some(code) => {
                    if guard.update_by_id(&guess.id, ConcursoPatch::location(code))? {
                        summary.classified += 1;
                    }
                }
                None => fallback.push(guess.id.clone()),
            }
        }
    }

    for id in fallback {
        let Some(target) = targets.iter().find(|t| t.id == id) else {
            continue;
        };
        let found = service
            .grounded_region(&target.institution)
            .instrument(info_span!("grounded_region", id = %target.id))
            .await?;

        match found.as_deref().and_then(normalize_region_code) {
            Some(code) => {
                if store
                    .lock()
                    .await
                    .update_by_id(&target.id, ConcursoPatch::location(code))?
                {
                    summary.grounded += 1;
                }
            }
            None => warn!(id = %target.id, "region still unresolved after grounded lookup"),
        }
    }

    summary.unresolved = summary.targets.saturating_sub(summary.classified + summary.grounded);
    info!(
        targets = summary.targets,
        classified = summary.classified,
        grounded = summary.grounded,
        "region enrichment finished"
    );
    Ok(summary)
}

/// True for values already in `DD/MM/YYYY` form.
fn is_canonical_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            2 | 5 => *b == b'/',
            _ => b.is_ascii_digit(),
        })
}

fn needs_cleanup(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !is_canonical_date(value) && !DATE_SENTINELS.contains(&value)
}

fn date_key(id: &str, field: DateField) -> String {
    format!("{id}|{}", field.as_str())
}

/// Split on the last `|`; record ids may contain the separator themselves.
fn parse_date_key(key: &str) -> Option<(&str, DateField)> {
    let (id, field) = key.rsplit_once('|')?;
    Some((id, field.parse().ok()?))
}

/// Normalize up to [`DATE_BATCH_LIMIT`] free-text date fields.
pub async fn refine_dates(
    store: &SharedStore,
    service: &dyn EnrichmentService,
) -> Result<DateRefinementSummary, EnrichError> {
    let queries = {
        let guard = store.lock().await;
        guard
            .records()
            .iter()
            .flat_map(|c| {
                DateField::ALL.into_iter().filter_map(move |field| {
                    let raw = c.date_field(field);
                    needs_cleanup(raw).then(|| DateQuery {
                        id: date_key(&c.id, field),
                        raw: raw.to_string(),
                    })
                })
            })
            .take(DATE_BATCH_LIMIT)
            .collect::<Vec<_>>()
    };
    if queries.is_empty() {
        return Err(EnrichError::NothingToDo);
    }

    let results = service
        .normalize_dates(&queries)
        .instrument(info_span!("normalize_dates", batch = queries.len()))
        .await?;

    let sent = queries.iter().map(|q| q.id.as_str()).collect::<HashSet<_>>();
    let mut summary = DateRefinementSummary {
        sent: queries.len(),
        applied: 0,
    };

    let mut guard = store.lock().await;
    for result in results.iter().filter(|r| sent.contains(r.id.as_str())) {
        let clean = result.clean.trim();
        let Some((id, field)) = parse_date_key(&result.id) else {
            continue;
        };
        if clean.is_empty() {
            continue;
        }
        if guard.update_by_id(id, ConcursoPatch::date(field, clean))? {
            summary.applied += 1;
        }
    }

    info!(sent = summary.sent, applied = summary.applied, "date refinement finished");
    Ok(summary)
}
