//! Lifecycle status of an announcement, derived from two free-text dates.
//!
//! The status is never stored: it depends on the current date, so every
//! reader recomputes it.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::UnknownVariant;

/// Substrings (lowercase) marking a date cell that carries no date.
const ABSENT_MARKERS: [&str; 4] = ["suspenso", "definir", "cancelado", "n/a"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditalStatus {
    /// Registration deadline still ahead.
    Aberto,
    /// Registration closed, exam still ahead.
    ProvaAgendada,
    Encerrado,
    /// No usable date at all.
    NaoDisponivel,
}

impl EditalStatus {
    pub const ALL: [EditalStatus; 4] = [
        EditalStatus::Aberto,
        EditalStatus::ProvaAgendada,
        EditalStatus::Encerrado,
        EditalStatus::NaoDisponivel,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Aberto => "Aberto",
            Self::ProvaAgendada => "Prova Agendada",
            Self::Encerrado => "Encerrado",
            Self::NaoDisponivel => "N/A",
        }
    }

    /// Decide the status relative to `today`. An upcoming registration
    /// deadline wins over an upcoming exam date.
    pub fn compute(registration_end: &str, exam_date: &str, today: NaiveDate) -> Self {
        let registration = parse_loose_date(registration_end, today.year());
        let exam = parse_loose_date(exam_date, today.year());

        match (registration, exam) {
            (Some(reg), _) if reg > today => Self::Aberto,
            (_, Some(exam)) if exam > today => Self::ProvaAgendada,
            (Some(_), _) | (_, Some(_)) => Self::Encerrado,
            (None, None) => Self::NaoDisponivel,
        }
    }
}

impl fmt::Display for EditalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EditalStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "edital status",
                value: s.to_string(),
            })
    }
}

/// Parse a `day/month[/year]` cell the way announcement sheets write them.
///
/// The day keeps every digit of the first component (`"até 10"` is day 10),
/// month and year take the leading integer of their component, and a missing
/// year falls back to `current_year`. Out-of-range dates are absent.
pub fn parse_loose_date(raw: &str, current_year: i32) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    let lowered = raw.to_lowercase();
    if ABSENT_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return None;
    }

    let parts = raw.split('/').collect::<Vec<_>>();
    if parts.len() < 2 {
        return None;
    }

    let day_digits = parts[0]
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    let day = day_digits.parse::<u32>().ok()?;
    let month = leading_integer(parts[1])?;
    let year = if parts.len() == 3 {
        leading_integer(parts[2])?
    } else {
        i64::from(current_year)
    };

    let month = u32::try_from(month).ok()?;
    let year = i32::try_from(year).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Optional sign followed by digits, after leading whitespace; trailing text
/// is ignored.
fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = rest
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    let value = digits.parse::<i64>().ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).expect("date")
    }

    #[test]
    fn future_registration_is_open_regardless_of_exam() {
        for exam in ["01/01/2099", "01/01/2000", "A Definir", ""] {
            assert_eq!(EditalStatus::compute("01/01/2099", exam, today()), EditalStatus::Aberto);
        }
    }

    #[test]
    fn unparseable_registration_with_future_exam_is_scheduled() {
        assert_eq!(
            EditalStatus::compute("sem data", "01/01/2099", today()),
            EditalStatus::ProvaAgendada
        );
        assert_eq!(
            EditalStatus::compute("01/01/2000", "01/01/2099", today()),
            EditalStatus::ProvaAgendada
        );
    }

    #[test]
    fn past_dates_are_closed_and_missing_dates_are_unknown() {
        assert_eq!(
            EditalStatus::compute("01/01/2000", "01/01/2000", today()),
            EditalStatus::Encerrado
        );
        assert_eq!(EditalStatus::compute("N/A", "N/A", today()), EditalStatus::NaoDisponivel);
        assert_eq!(
            EditalStatus::compute("Suspenso", "A Definir", today()),
            EditalStatus::NaoDisponivel
        );
    }

    #[test]
    fn today_is_not_in_the_future() {
        assert_eq!(
            EditalStatus::compute("15/03/2026", "N/A", today()),
            EditalStatus::Encerrado
        );
        assert_eq!(
            EditalStatus::compute("16/03/2026", "N/A", today()),
            EditalStatus::Aberto
        );
    }

    #[test]
    fn missing_year_uses_current_year() {
        assert_eq!(parse_loose_date("10/04", 2026), NaiveDate::from_ymd_opt(2026, 4, 10));
        assert_eq!(
            EditalStatus::compute("20/12", "N/A", today()),
            EditalStatus::Aberto
        );
    }

    #[test]
    fn loose_components_are_tolerated() {
        assert_eq!(
            parse_loose_date("até 10/04/2026 (previsto)", 2000),
            NaiveDate::from_ymd_opt(2026, 4, 10)
        );
        assert_eq!(parse_loose_date(" 5/ 6/2027", 2000), NaiveDate::from_ymd_opt(2027, 6, 5));
    }

    #[test]
    fn absent_markers_and_bad_shapes_yield_none() {
        assert_eq!(parse_loose_date("", 2026), None);
        assert_eq!(parse_loose_date("Cancelado", 2026), None);
        assert_eq!(parse_loose_date("a definir/2026", 2026), None);
        assert_eq!(parse_loose_date("março de 2026", 2026), None);
        assert_eq!(parse_loose_date("31/02/2026", 2026), None);
        assert_eq!(parse_loose_date("10/13/2026", 2026), None);
        assert_eq!(parse_loose_date("xx/04/2026", 2026), None);
    }

    #[test]
    fn labels_round_trip() {
        for status in EditalStatus::ALL {
            assert_eq!(status.label().parse::<EditalStatus>(), Ok(status));
        }
    }
}
