//! Approximate exam-site coordinates from Brazilian state codes.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub uf: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

/// State capitals, plus `BR` pinned to Brasília for national bodies.
const CAPITALS: [(&str, f64, f64); 28] = [
    ("AC", -9.97499, -67.8243),
    ("AL", -9.66599, -35.7350),
    ("AP", 0.034934, -51.0694),
    ("AM", -3.11866, -60.0212),
    ("BA", -12.9718, -38.5011),
    ("CE", -3.71664, -38.5423),
    ("DF", -15.7801, -47.9292),
    ("ES", -20.3155, -40.3128),
    ("GO", -16.6864, -49.2643),
    ("MA", -2.53874, -44.2825),
    ("MT", -15.6010, -56.0974),
    ("MS", -20.4428, -54.6464),
    ("MG", -19.9167, -43.9345),
    ("PA", -1.45502, -48.5024),
    ("PB", -7.11509, -34.8641),
    ("PR", -25.4284, -49.2733),
    ("PE", -8.04666, -34.8771),
    ("PI", -5.08921, -42.8016),
    ("RJ", -22.9068, -43.1729),
    ("RN", -5.79448, -35.2110),
    ("RS", -30.0346, -51.2177),
    ("RO", -8.76077, -63.8999),
    ("RR", 2.82384, -60.6753),
    ("SC", -27.5954, -48.5480),
    ("SP", -23.5505, -46.6333),
    ("SE", -10.9472, -37.0731),
    ("TO", -10.1844, -48.3336),
    ("BR", -15.7801, -47.9292),
];

pub fn capital_of(uf: &str) -> Option<GeoPoint> {
    let uf = uf.trim().to_ascii_uppercase();
    CAPITALS
        .iter()
        .find(|(code, _, _)| *code == uf)
        .map(|&(code, latitude, longitude)| GeoPoint {
            uf: code,
            latitude,
            longitude,
        })
}

/// Resolve a point for an exam site. A state code written in the exam
/// location text (`"Campinas - SP"`) wins over the record's region code.
pub fn approximate_coordinates(exam_location: Option<&str>, region: &str) -> Option<GeoPoint> {
    exam_location
        .and_then(uf_token_in)
        .or_else(|| capital_of(region))
}

/// Last standalone uppercase two-letter token naming a state.
fn uf_token_in(text: &str) -> Option<GeoPoint> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase()))
        .filter(|token| *token != "BR")
        .filter_map(capital_of)
        .last()
}
