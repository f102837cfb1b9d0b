//! Comma-delimited import and export of concurso sheets.

pub mod export;
pub mod import;

pub use export::{export_csv, export_filename, export_view, ExportError, EXPORT_HEADERS};
pub use import::{import_csv, import_into_store, ImportError, ImportMode, ImportSummary};

pub const CRATE_NAME: &str = "concursos-csv";

/// Sheet column → record field, as written by the scraping spreadsheets.
pub mod columns {
    pub const SOURCE: &str = "Fonte";
    pub const INSTITUTION: &str = "Orgao";
    pub const LOCATION: &str = "UF";
    pub const BOARD: &str = "Banca";
    pub const VACANCIES: &str = "Vagas";
    pub const SALARY: &str = "Salario";
    pub const REGISTRATION_END: &str = "Fim_Inscricoes";
    pub const EXEMPTION_PERIOD: &str = "Periodo_Isencao";
    pub const EXAM_DATE: &str = "Data_Prova";
    pub const LINK: &str = "Link";
    pub const POSITIONS: &str = "Cargos";
    pub const SUBJECTS: &str = "Disciplinas";
    /// Export-only computed column.
    pub const STATUS: &str = "Status_Edital";
}
