//! Axum + Askama web UI: opportunity table, "my exams" and the exam map.

mod pages;

use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{DefaultBodyLimit, Form, Multipart, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use concursos_core::{
    approximate_coordinates, derive_view, filtered_sorted, ConcursoPatch, InterestStatus,
    SortSpec, ViewQuery, ViewState, PAGE_SIZE,
};
use concursos_csv::{export_csv, export_filename, import_into_store, ImportMode};
use concursos_enrich::{
    enrich_regions, refine_dates, EnrichError, EnrichmentService, OperationTracker,
};
use concursos_storage::SharedStore;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::pages::{
    ExamRow, MapMarker, MapTemplate, MyExamsTemplate, Notice,
    OpportunitiesTableTemplate, OpportunitiesTemplate, SelectOption,
};

pub const CRATE_NAME: &str = "concursos-web";

/// Uploaded sheets can be far larger than axum's default body limit.
const UPLOAD_LIMIT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("CONCURSOS_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub enrichment: Option<Arc<dyn EnrichmentService>>,
    pub region_job: OperationTracker,
    pub date_job: OperationTracker,
}

impl AppState {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            enrichment: None,
            region_job: OperationTracker::new(),
            date_job: OperationTracker::new(),
        }
    }

    pub fn with_enrichment(mut self, service: Arc<dyn EnrichmentService>) -> Self {
        self.enrichment = Some(service);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    status: String,
    sort: Option<String>,
    dir: Option<String>,
    limit: Option<usize>,
    notice: Option<String>,
    error: Option<String>,
}

impl ListParams {
    fn view_state(&self) -> ViewState {
        let sort = self
            .sort
            .as_deref()
            .and_then(|field| field.parse().ok())
            .map(|field| SortSpec {
                field,
                direction: self
                    .dir
                    .as_deref()
                    .and_then(|dir| dir.parse().ok())
                    .unwrap_or_default(),
            });
        ViewState {
            query: ViewQuery {
                text: self.q.trim().to_string(),
                region: self.region.clone(),
                status: self.status.clone(),
            },
            sort,
            visible_count: self.limit.filter(|n| *n > 0).unwrap_or(PAGE_SIZE),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct NoticeParams {
    notice: Option<String>,
    error: Option<String>,
}

fn notice_from(notice: Option<String>, error: Option<String>) -> Option<Notice> {
    error
        .map(Notice::error)
        .or_else(|| notice.map(Notice::info))
}

#[derive(Debug, Deserialize)]
struct InterestForm {
    id: String,
    status: String,
    back: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BackForm {
    back: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExamForm {
    id: String,
    is_enrolled: Option<String>,
    #[serde(default)]
    exam_location: String,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeForm {
    id: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(opportunities_handler))
        .route("/opportunities/table", get(opportunities_table_handler))
        .route("/opportunities/interest", post(interest_handler))
        .route(
            "/import",
            post(import_handler).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/export", get(export_handler))
        .route("/enrich/regions", post(enrich_regions_handler))
        .route("/enrich/dates", post(refine_dates_handler))
        .route("/my-exams", get(my_exams_handler))
        .route("/my-exams/save", post(save_exam_handler))
        .route("/my-exams/geocode", post(geocode_handler))
        .route("/map", get(map_handler))
        .route("/map/markers.json", get(map_markers_handler))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding web listener on port {port}"))?;
    info!(port, "web ui listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn opportunities_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let view_state = params.view_state();
    let (region_options, table) = {
        let store = state.store.lock().await;
        let view = derive_view(store.records(), &view_state, today());
        (
            SelectOption::regions(store.regions(), &view_state.query.region),
            OpportunitiesTableTemplate::new(&view, &view_state, store.is_empty()),
        )
    };
    let table_html = match table.render() {
        Ok(html) => html,
        Err(err) => return server_error(anyhow::anyhow!(err.to_string())),
    };

    render_html(OpportunitiesTemplate {
        notice: notice_from(params.notice, params.error),
        text: view_state.query.text.clone(),
        region_options,
        status_options: SelectOption::statuses(&view_state.query.status),
        table_html,
        ai_enabled: state.enrichment.is_some(),
        regions_busy: state.region_job.is_running(),
        dates_busy: state.date_job.is_running(),
    })
}

async fn opportunities_table_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let view_state = params.view_state();
    let table = {
        let store = state.store.lock().await;
        let view = derive_view(store.records(), &view_state, today());
        OpportunitiesTableTemplate::new(&view, &view_state, store.is_empty())
    };
    let mut resp = render_html(table);
    resp.headers_mut().insert(
        header::HeaderName::from_static("hx-trigger"),
        header::HeaderValue::from_static("opportunitiesTableLoaded"),
    );
    resp
}

async fn interest_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<InterestForm>,
) -> Response {
    let status = match form.status.parse::<InterestStatus>() {
        Ok(status) => status,
        Err(err) => return (StatusCode::BAD_REQUEST, Html(err.to_string())).into_response(),
    };
    if let Err(err) = state.store.lock().await.set_interest(&form.id, status) {
        return server_error(err.into());
    }
    redirect_to(form.back.as_deref().unwrap_or("/"), None)
}

async fn import_handler(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut contents = None;
    let mut mode = ImportMode::Replace;
    let mut back = String::from("/");

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return redirect_to("/", Some(Notice::error(format!("Erro ao receber o arquivo: {err}"))))
            }
        };
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => match field.bytes().await {
                Ok(bytes) => contents = Some(bytes),
                Err(err) => {
                    return redirect_to(
                        "/",
                        Some(Notice::error(format!("Erro ao receber o arquivo: {err}"))),
                    )
                }
            },
            Some("keep_missing") => mode = ImportMode::KeepMissing,
            Some("back") => {
                if let Ok(text) = field.text().await {
                    back = text;
                }
            }
            _ => {}
        }
    }

    let Some(contents) = contents else {
        return redirect_to(&back, Some(Notice::error("Nenhum arquivo CSV enviado.")));
    };

    let result = {
        let mut store = state.store.lock().await;
        import_into_store(&mut store, &contents, mode)
    };
    let notice = match result {
        Ok(summary) => Notice::info(format!(
            "{} concursos carregados com sucesso!",
            summary.imported
        )),
        Err(err) => {
            warn!(error = %err, "csv import rejected");
            Notice::error(format!("Erro ao processar o arquivo CSV: {err}"))
        }
    };
    redirect_to(&back, Some(notice))
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let view_state = params.view_state();
    let today = today();
    let csv = {
        let store = state.store.lock().await;
        let rows = filtered_sorted(store.records(), &view_state.query, view_state.sort, today);
        export_csv(&rows)
    };
    match csv {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", export_filename(today)),
                ),
            ],
            body,
        )
            .into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn enrich_regions_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<BackForm>,
) -> Response {
    let back = form.back.as_deref().unwrap_or("/");
    let Some(service) = state.enrichment.clone() else {
        return redirect_to(back, Some(ai_disabled_notice()));
    };
    let Some(guard) = state.region_job.try_start() else {
        return busy_response();
    };

    let notice = match enrich_regions(&state.store, service.as_ref()).await {
        Ok(summary) => {
            guard.finish();
            Notice::info(format!(
                "Identificação concluída: {} de {} UFs preenchidas.",
                summary.classified + summary.grounded,
                summary.targets
            ))
        }
        Err(EnrichError::NothingToDo) => {
            guard.finish();
            Notice::info("Todos os concursos já possuem UF identificada ou a lista está vazia.")
        }
        Err(err) => {
            warn!(error = %err, "region enrichment failed");
            guard.fail(err.to_string());
            Notice::error(format!("Erro ao identificar UFs: {err}"))
        }
    };
    redirect_to(back, Some(notice))
}

async fn refine_dates_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<BackForm>,
) -> Response {
    let back = form.back.as_deref().unwrap_or("/");
    let Some(service) = state.enrichment.clone() else {
        return redirect_to(back, Some(ai_disabled_notice()));
    };
    let Some(guard) = state.date_job.try_start() else {
        return busy_response();
    };

    let notice = match refine_dates(&state.store, service.as_ref()).await {
        Ok(summary) => {
            guard.finish();
            Notice::info(format!("{} datas refinadas com sucesso!", summary.applied))
        }
        Err(EnrichError::NothingToDo) => {
            guard.finish();
            Notice::info("Nenhuma data para refinar ou a lista está vazia.")
        }
        Err(err) => {
            warn!(error = %err, "date refinement failed");
            guard.fail(err.to_string());
            Notice::error(format!("Erro ao refinar datas via IA: {err}"))
        }
    };
    redirect_to(back, Some(notice))
}

fn ai_disabled_notice() -> Notice {
    Notice::error("Serviço de IA não configurado: defina GEMINI_API_KEY.")
}

fn busy_response() -> Response {
    (
        StatusCode::CONFLICT,
        Html("Operação já em andamento.".to_string()),
    )
        .into_response()
}

async fn my_exams_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NoticeParams>,
) -> Response {
    let exams = {
        let store = state.store.lock().await;
        store.interested().map(ExamRow::from).collect::<Vec<_>>()
    };
    render_html(MyExamsTemplate {
        notice: notice_from(params.notice, params.error),
        exams,
    })
}

async fn save_exam_handler(State(state): State<Arc<AppState>>, Form(form): Form<ExamForm>) -> Response {
    let patch = ConcursoPatch::annotations(form.is_enrolled.is_some(), &form.exam_location, &form.notes);
    match state.store.lock().await.update_by_id(&form.id, patch) {
        Ok(true) => redirect_to("/my-exams", Some(Notice::info("Alterações salvas."))),
        Ok(false) => redirect_to("/my-exams", None),
        Err(err) => server_error(err.into()),
    }
}

async fn geocode_handler(State(state): State<Arc<AppState>>, Form(form): Form<GeocodeForm>) -> Response {
    let mut store = state.store.lock().await;
    let Some(record) = store.get(&form.id) else {
        return redirect_to("/my-exams", None);
    };
    let Some(point) = approximate_coordinates(record.exam_location.as_deref(), &record.location) else {
        return redirect_to(
            "/my-exams",
            Some(Notice::error(
                "Não foi possível estimar a localização: informe a UF no local de prova.",
            )),
        );
    };

    match store.update_by_id(&form.id, ConcursoPatch::coordinates(point.latitude, point.longitude)) {
        Ok(_) => redirect_to(
            "/my-exams",
            Some(Notice::info(format!(
                "Localização aproximada definida no mapa ({}).",
                point.uf
            ))),
        ),
        Err(err) => server_error(err.into()),
    }
}

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NoticeParams>,
) -> Response {
    let marker_count = state.store.lock().await.mapped().count();
    render_html(MapTemplate {
        notice: notice_from(params.notice, params.error),
        marker_count,
    })
}

async fn map_markers_handler(State(state): State<Arc<AppState>>) -> Response {
    let markers = {
        let store = state.store.lock().await;
        store
            .mapped()
            .filter_map(MapMarker::from_record)
            .collect::<Vec<_>>()
    };
    Json(markers).into_response()
}

/// Path and query of `back` when it stays on this site.
fn local_target(back: &str) -> Option<String> {
    if !back.starts_with('/') {
        return None;
    }
    let base = Url::parse("http://localhost/").ok()?;
    let resolved = base.join(back).ok()?;
    let same_origin = resolved.host_str() == Some("localhost") && resolved.port().is_none();
    if !same_origin || back.contains('\\') {
        return None;
    }
    Some(match resolved.query() {
        Some(query) => format!("{}?{query}", resolved.path()),
        None => resolved.path().to_string(),
    })
}

/// 303 to a local path, optionally carrying a notice.
fn redirect_to(back: &str, notice: Option<Notice>) -> Response {
    let mut target = local_target(back).unwrap_or_else(|| "/".to_string());
    if let Some(notice) = notice {
        target.push(if target.contains('?') { '&' } else { '?' });
        target.push_str(&notice.query_pair());
    }
    Redirect::to(&target).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Erro interno: {err:#}")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use concursos_core::Concurso;
    use concursos_storage::ConcursoStore;
    use concursos_enrich::{DateNormalization, DateQuery, RegionGuess, RegionQuery};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct FixedRegions;

    #[async_trait]
    impl EnrichmentService for FixedRegions {
        async fn classify_regions(&self, queries: &[RegionQuery]) -> anyhow::Result<Vec<RegionGuess>> {
            Ok(queries
                .iter()
                .map(|q| RegionGuess {
                    id: q.id.clone(),
                    uf: "rj".into(),
                })
                .collect())
        }

        async fn grounded_region(&self, _institution: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        async fn normalize_dates(&self, _queries: &[DateQuery]) -> anyhow::Result<Vec<DateNormalization>> {
            anyhow::bail!("quota exceeded")
        }
    }

    fn record(id: &str, institution: &str, uf: &str) -> Concurso {
        let mut c = Concurso::placeholder(id);
        c.institution = institution.into();
        c.location = uf.into();
        c.link = format!("https://example.org/{id}");
        c
    }

    fn state_with(records: Vec<Concurso>) -> AppState {
        let mut store = ConcursoStore::in_memory();
        store.replace_all(records).expect("seed");
        AppState::new(store.into_shared())
    }

    fn sample_state() -> AppState {
        let mut open = record("a/1", "Prefeitura de Campinas", "SP");
        open.registration_end = "01/01/2099".into();
        let mut closed = record("b", "Tribunal Regional", "RJ");
        closed.exam_date = "01/01/2000".into();
        state_with(vec![open, closed, record("c", "Órgão Sem UF", "N/A")])
    }

    async fn body_text(resp: Response) -> String {
        let body = resp.into_body().collect().await.expect("body").to_bytes();
        String::from_utf8(body.to_vec()).expect("utf-8 body")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    fn post_form(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn location(resp: &Response) -> String {
        resp.headers()[header::LOCATION]
            .to_str()
            .expect("location header")
            .to_string()
    }

    #[tokio::test]
    async fn index_lists_records_with_computed_status() {
        let resp = app(sample_state()).oneshot(get("/")).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Prefeitura de Campinas"));
        assert!(text.contains("badge-open\">Aberto"));
        assert!(text.contains("badge-closed\">Encerrado"));
        assert!(text.contains("<option value=\"RJ\""));
    }

    #[tokio::test]
    async fn table_partial_filters_and_sets_hx_trigger() {
        let resp = app(sample_state())
            .oneshot(get("/opportunities/table?region=RJ"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["hx-trigger"], "opportunitiesTableLoaded");
        let text = body_text(resp).await;
        assert!(text.contains("Tribunal Regional"));
        assert!(!text.contains("Prefeitura de Campinas"));
    }

    #[tokio::test]
    async fn table_partial_carries_export_link_and_sort_for_its_view() {
        let resp = app(sample_state())
            .oneshot(get("/opportunities/table?region=RJ&sort=institution&dir=desc&limit=100"))
            .await
            .expect("response");
        let text = body_text(resp).await;
        assert!(text.contains("href=\"/export?region=RJ&amp;sort=institution&amp;dir=desc\""));
        assert!(text.contains(
            "<input type=\"hidden\" form=\"opportunity-filters\" name=\"sort\" value=\"institution\">"
        ));
        assert!(text.contains(
            "<input type=\"hidden\" form=\"opportunity-filters\" name=\"dir\" value=\"desc\">"
        ));
        assert!(text.contains("form=\"enrich-regions-form\" name=\"back\""));
    }

    #[tokio::test]
    async fn index_leaves_export_and_sort_to_the_table() {
        let text = body_text(app(sample_state()).oneshot(get("/")).await.expect("response")).await;
        assert_eq!(text.matches("Exportar CSV").count(), 1);
        assert_eq!(text.matches("name=\"sort\"").count(), 1);
        assert!(text.contains("id=\"opportunity-filters\""));
    }

    #[tokio::test]
    async fn table_partial_offers_load_more_past_first_page() {
        let records = (0..60)
            .map(|i| record(&format!("r{i:02}"), &format!("Órgão {i:02}"), "SP"))
            .collect();
        let app = app(state_with(records));

        let first = body_text(app.clone().oneshot(get("/opportunities/table")).await.expect("first")).await;
        assert!(first.contains("Órgão 49"));
        assert!(!first.contains("Órgão 50"));
        assert!(first.contains("hx-trigger=\"revealed\""));
        assert!(first.contains("limit=100"));

        let grown = body_text(app.oneshot(get("/opportunities/table?limit=100")).await.expect("grown")).await;
        assert!(grown.contains("Órgão 59"));
        assert!(!grown.contains("hx-trigger=\"revealed\""));
    }

    #[tokio::test]
    async fn marking_interest_redirects_back_and_persists() {
        let state = sample_state();
        let store = state.store.clone();
        let resp = app(state)
            .oneshot(post_form(
                "/opportunities/interest",
                "id=a%2F1&status=interested&back=%2F%3Fregion%3DSP",
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/?region=SP");
        assert_eq!(
            store.lock().await.get("a/1").map(|c| c.interest_status),
            Some(InterestStatus::Interested)
        );
    }

    #[tokio::test]
    async fn interest_rejects_unknown_status_and_foreign_back_links() {
        let app = app(sample_state());
        let bad = app
            .clone()
            .oneshot(post_form("/opportunities/interest", "id=b&status=maybe"))
            .await
            .expect("response");
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let offsite = app
            .clone()
            .oneshot(post_form(
                "/opportunities/interest",
                "id=b&status=ignored&back=https%3A%2F%2Fevil.example",
            ))
            .await
            .expect("response");
        assert_eq!(location(&offsite), "/");

        for back in ["%2F%5Cevil.example", "%2F%2Fevil.example", "%2F%09%2Fevil.example"] {
            let resp = app
                .clone()
                .oneshot(post_form(
                    "/opportunities/interest",
                    &format!("id=b&status=ignored&back={back}"),
                ))
                .await
                .expect("response");
            assert_eq!(location(&resp), "/", "back={back}");
        }
    }

    #[test]
    fn local_targets_keep_path_and_query() {
        assert_eq!(
            local_target("/?q=Tribunal+de+Justi%C3%A7a&region=SP").as_deref(),
            Some("/?q=Tribunal+de+Justi%C3%A7a&region=SP")
        );
        assert_eq!(local_target("/my-exams").as_deref(), Some("/my-exams"));
        assert_eq!(local_target("/\\evil.example"), None);
        assert_eq!(local_target("https://evil.example/"), None);
    }

    #[tokio::test]
    async fn csv_upload_replaces_collection() {
        let state = sample_state();
        let store = state.store.clone();
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"c.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             Fonte,Orgao,UF,Link\r\nPCI,Câmara de Santos,SP,https://pci.example/santos\r\n\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"back\"\r\n\r\n\
             /?region=SP\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/import")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request");

        let resp = app(state).oneshot(request).await.expect("response");
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(location(&resp).starts_with("/?region=SP&notice=1+concursos"));

        let store = store.lock().await;
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.records()[0].id,
            "Câmara de Santos-https://pci.example/santos"
        );
    }

    #[tokio::test]
    async fn export_downloads_filtered_view() {
        let resp = app(sample_state())
            .oneshot(get("/export?region=SP"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .expect("disposition")
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"concursos_oportunidades_"));
        let text = body_text(resp).await;
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Fonte,Orgao,UF,"));
        assert!(lines[1].contains("Prefeitura de Campinas"));
    }

    #[tokio::test]
    async fn enrichment_without_service_reports_notice() {
        let app = app(sample_state());
        let resp = app
            .clone()
            .oneshot(post_form("/enrich/regions", ""))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(location(&resp).starts_with("/?error="));

        let resp = app
            .oneshot(post_form(
                "/enrich/dates",
                "back=%2F%3Fregion%3DSP%26sort%3Dboard%26dir%3Ddesc",
            ))
            .await
            .expect("response");
        assert!(location(&resp).starts_with("/?region=SP&sort=board&dir=desc&error="));
    }

    #[tokio::test]
    async fn region_enrichment_applies_and_refuses_concurrent_runs() {
        let state = sample_state().with_enrichment(Arc::new(FixedRegions));
        let store = state.store.clone();
        let tracker = state.region_job.clone();
        let app = app(state);

        let held = tracker.try_start().expect("simulate running job");
        let busy = app
            .clone()
            .oneshot(post_form("/enrich/regions", ""))
            .await
            .expect("response");
        assert_eq!(busy.status(), StatusCode::CONFLICT);
        held.finish();

        let resp = app.oneshot(post_form("/enrich/regions", "")).await.expect("response");
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(location(&resp).starts_with("/?notice="));
        assert_eq!(
            store.lock().await.get("c").map(|c| c.location.clone()),
            Some("RJ".to_string())
        );
        assert!(!tracker.is_running());
    }

    #[tokio::test]
    async fn failed_date_refinement_marks_job_failed() {
        let mut pending = record("d", "Órgão D", "SP");
        pending.registration_end = "10/04".into();
        let state = state_with(vec![pending]).with_enrichment(Arc::new(FixedRegions));
        let tracker = state.date_job.clone();

        let resp = app(state)
            .oneshot(post_form("/enrich/dates", ""))
            .await
            .expect("response");
        assert!(location(&resp).starts_with("/?error="));
        assert!(matches!(
            tracker.state(),
            concursos_enrich::OperationState::Failed(_)
        ));
    }

    #[tokio::test]
    async fn my_exams_save_geocode_and_map_markers() {
        let state = sample_state();
        let store = state.store.clone();
        store
            .lock()
            .await
            .set_interest("b", InterestStatus::Interested)
            .expect("interest");
        let app = app(state);

        let page = body_text(app.clone().oneshot(get("/my-exams")).await.expect("page")).await;
        assert!(page.contains("Tribunal Regional"));
        assert!(!page.contains("Prefeitura de Campinas"));

        let saved = app
            .clone()
            .oneshot(post_form(
                "/my-exams/save",
                "id=b&is_enrolled=on&exam_location=Escola+Central%2C+Niter%C3%B3i+-+RJ&notes=",
            ))
            .await
            .expect("save");
        assert_eq!(saved.status(), StatusCode::SEE_OTHER);

        let geocoded = app
            .clone()
            .oneshot(post_form("/my-exams/geocode", "id=b"))
            .await
            .expect("geocode");
        assert!(location(&geocoded).starts_with("/my-exams?notice="));

        {
            let store = store.lock().await;
            let b = store.get("b").expect("record");
            assert!(b.is_enrolled);
            assert_eq!(b.notes, None);
            assert!(b.has_coordinates());
        }

        let markers = app.oneshot(get("/map/markers.json")).await.expect("markers");
        let json: serde_json::Value =
            serde_json::from_str(&body_text(markers).await).expect("json");
        assert_eq!(json.as_array().map(Vec::len), Some(1));
        assert_eq!(json[0]["place"], "Escola Central, Niterói - RJ");
    }

    #[tokio::test]
    async fn geocode_without_any_region_reports_error() {
        let state = sample_state();
        let resp = app(state)
            .oneshot(post_form("/my-exams/geocode", "id=c"))
            .await
            .expect("response");
        assert!(location(&resp).starts_with("/my-exams?error="));
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let resp = app(sample_state()).oneshot(get("/healthz")).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "ok");
    }
}
