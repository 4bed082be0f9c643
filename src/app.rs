use axum::{
    Json, Router,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    extract::{Form, FormRejection, WithRejection},
    headers::{Authorization, authorization::Basic},
};
use chrono::Local;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::error::{MailDeliveryError, RegistryError, Result};
use crate::export::{self, CSV_CONTENT_TYPE, ExportScope, XLSX_CONTENT_TYPE};
use crate::login::{Authenticator, UserDirectory};
use crate::mailer::{MailAttachment, MailSender, Mailer, OutgoingMail};
use crate::model::{FlooringType, MeasurementCategory, Unit, WallType};
use crate::store::RecordStore;
use crate::submission::{FormSubmission, SubmissionEnvelope, UnitSubmission};

/// Shared state of the web application, built once at startup.
pub struct AppState {
    store: Mutex<RecordStore>,
    mailer: Option<Arc<dyn MailSender>>,
    recipients: Vec<String>,
    auth: Option<Arc<dyn Authenticator>>,
}

impl AppState {
    pub fn new(store: RecordStore) -> Self {
        AppState {
            store: Mutex::new(store),
            mailer: None,
            recipients: Vec::new(),
            auth: None,
        }
    }

    /// Mails exported workbooks to `recipients` through `mailer`.
    pub fn with_mailer(mut self, mailer: Arc<dyn MailSender>, recipients: Vec<String>) -> Self {
        self.mailer = Some(mailer);
        self.recipients = recipients;
        self
    }

    /// Requires HTTP Basic credentials checked by `auth` on the API routes.
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    fn store(&self) -> Result<MutexGuard<'_, RecordStore>> {
        self.store
            .lock()
            .map_err(|_| RegistryError::Internal("registro bloqueado".to_string()))
    }

    /// Owned copies of the units an export covers.
    fn collect_units(&self, locality: Option<&str>, unit: Option<&str>) -> Result<Vec<(String, Unit)>> {
        let store = self.store()?;
        match (locality, unit) {
            (Some(locality), Some(unit)) => {
                Ok(vec![(locality.to_string(), store.get_unit(locality, unit)?.clone())])
            }
            (None, Some(_)) => Err(RegistryError::Validation(
                "informe a localidade da unidade".to_string(),
            )),
            (locality, None) => Ok(store
                .list_units(locality)?
                .into_iter()
                .map(|(l, u)| (l.to_string(), u.clone()))
                .collect()),
        }
    }

    /// Builds the workbook for `units` and hands it to the mailer.
    async fn mail_export(
        &self,
        locality: Option<String>,
        unit: Option<String>,
        units: Vec<(String, Unit)>,
    ) -> Result<()> {
        let Some(mailer) = self.mailer.clone() else {
            return Err(MailDeliveryError::Other("envio de e-mail não configurado".to_string()).into());
        };
        let recipients = self.recipients.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let scope = ExportScope::from_filters(locality.as_deref(), unit.as_deref());
            let mail = export_mail(&scope, &units, recipients)?;
            mailer.send(&mail)?;
            Ok(())
        })
        .await
        .map_err(|e| RegistryError::Internal(e.to_string()))?
    }
}

fn export_mail(
    scope: &ExportScope<'_>,
    units: &[(String, Unit)],
    recipients: Vec<String>,
) -> Result<OutgoingMail> {
    let pairs = || units.iter().map(|(l, u)| (l.as_str(), u));
    let bytes = export::to_xlsx(&export::build_table(pairs()))?;
    Ok(OutgoingMail {
        recipients,
        subject: scope.subject(),
        body: export::email_body(scope, pairs()),
        attachment: Some(MailAttachment {
            filename: scope.filename(Local::now(), "xlsx"),
            content_type: XLSX_CONTENT_TYPE.to_string(),
            bytes,
        }),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: String,
}

impl StatusResponse {
    fn ok(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "ok".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct SubmitResponse {
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<Unit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mail_error: Option<String>,
}

#[derive(Serialize)]
struct LocalitySummary {
    name: String,
    units: usize,
}

#[derive(Serialize)]
struct LocatedUnit {
    locality: String,
    unit: Unit,
}

#[derive(Deserialize)]
struct NewLocality {
    #[serde(default, alias = "nome", alias = "localidade")]
    name: String,
}

#[derive(Deserialize, Default)]
struct ExportQuery {
    #[serde(alias = "localidade")]
    locality: Option<String>,
    #[serde(alias = "unidade")]
    unit: Option<String>,
}

impl ExportQuery {
    fn filters(&self) -> (Option<&str>, Option<&str>) {
        (non_empty(&self.locality), non_empty(&self.unit))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Deserialize)]
struct UnitFilter {
    #[serde(alias = "localidade")]
    locality: Option<String>,
}

/// Body that is not JSON at all is malformed; JSON of the wrong shape fails validation.
impl From<JsonRejection> for RegistryError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonSyntaxError(err) => RegistryError::MalformedData(err.body_text()),
            other => RegistryError::Validation(other.body_text()),
        }
    }
}

impl From<FormRejection> for RegistryError {
    fn from(rejection: FormRejection) -> Self {
        RegistryError::Validation(rejection.to_string())
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Conflict(_) => StatusCode::CONFLICT,
            RegistryError::MalformedData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::MailDelivery(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Storage(_)
            | RegistryError::Serialization(_)
            | RegistryError::Workbook(_)
            | RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }

        let body = Json(StatusResponse {
            status: "error".to_string(),
            message: self.to_string(),
        });
        if matches!(self, RegistryError::Unauthorized) {
            let challenge = HeaderValue::from_static("Basic realm=\"unit-registry\"");
            return (status, [(header::WWW_AUTHENTICATE, challenge)], body).into_response();
        }
        (status, body).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/localities", get(list_localities).post(create_locality))
        .route("/api/units", get(list_units).post(submit_json))
        .route(
            "/api/units/:locality/:unit",
            get(get_unit).put(update_unit).delete(delete_unit),
        )
        .route("/api/export", get(export_xlsx))
        .route("/api/export/csv", get(export_csv))
        .route("/api/export/email", post(export_email))
        .route("/salvar_unidade", post(submit_json))
        .route("/adicionar_unidade", post(submit_form))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(serve_index))
        .route("/api/vocabulary", get(vocabulary))
        .route("/api/vocabulary/flooring", get(flooring_types))
        .route("/api/vocabulary/walls", get(wall_types))
        .route(
            "/api/vocabulary/measurement-categories",
            get(measurement_categories),
        )
        .route("/get_tipos_piso", get(flooring_types))
        .route("/get_tipos_parede", get(wall_types))
        .merge(protected)
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

pub async fn run(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let store = RecordStore::open(&config.data_file)?;
    let mut state = AppState::new(store);

    match config.mail.settings()? {
        Some(settings) => {
            let mailer = Mailer::new(&settings)?;
            info!(
                "Mailing exports through {} to {}",
                settings.smtp_host,
                settings.recipients.join(", ")
            );
            state = state.with_mailer(Arc::new(mailer), settings.recipients);
        }
        None => warn!("Mail not configured (EMAIL_USUARIO, EMAIL_SENHA, EMAIL_DESTINO); exports are download-only"),
    }

    if let Some(path) = &config.users_file {
        let users = UserDirectory::open(path)?;
        info!("API authentication enabled, users in {}", users.path().display());
        state = state.with_authenticator(Arc::new(users));
    }

    let app = router(Arc::new(state));
    let listener = TcpListener::bind(&config.bind).await?;
    info!("Listening on http://{}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn require_auth(
    State(state): State<Arc<AppState>>,
    credentials: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = state.auth.clone() else {
        return next.run(request).await;
    };
    let Some(TypedHeader(credentials)) = credentials else {
        return RegistryError::Unauthorized.into_response();
    };

    let username = credentials.username().to_string();
    let password = credentials.password().to_string();
    let checked = tokio::task::spawn_blocking(move || auth.verify(&username, &password)).await;
    match checked {
        Ok(Ok(true)) => next.run(request).await,
        Ok(Ok(false)) => {
            warn!("Rejected credentials for '{}'", credentials.username());
            RegistryError::Unauthorized.into_response()
        }
        Ok(Err(e)) => e.into_response(),
        Err(e) => RegistryError::Internal(e.to_string()).into_response(),
    }
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn vocabulary() -> impl IntoResponse {
    Json(serde_json::json!({
        "flooring": FlooringType::labels(),
        "walls": WallType::labels(),
        "measurement_categories": MeasurementCategory::labels(),
    }))
}

async fn flooring_types() -> Json<Vec<String>> {
    Json(FlooringType::labels())
}

async fn wall_types() -> Json<Vec<String>> {
    Json(WallType::labels())
}

async fn measurement_categories() -> Json<Vec<String>> {
    Json(MeasurementCategory::labels())
}

async fn list_localities(State(state): State<Arc<AppState>>) -> Result<Json<Vec<LocalitySummary>>> {
    let store = state.store()?;
    Ok(Json(
        store
            .list_localities()
            .into_iter()
            .map(|l| LocalitySummary {
                name: l.name.clone(),
                units: l.units.len(),
            })
            .collect(),
    ))
}

async fn create_locality(
    State(state): State<Arc<AppState>>,
    WithRejection(Json(payload), _): WithRejection<Json<NewLocality>, RegistryError>,
) -> Result<(StatusCode, Json<StatusResponse>)> {
    let mut store = state.store()?;
    let locality = store.create_locality(&payload.name)?;
    Ok((
        StatusCode::CREATED,
        Json(StatusResponse::ok(format!(
            "Localidade '{}' cadastrada",
            locality.name
        ))),
    ))
}

async fn list_units(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<UnitFilter>,
) -> Result<Json<Vec<LocatedUnit>>> {
    let units = state.collect_units(non_empty(&filter.locality), None)?;
    Ok(Json(
        units
            .into_iter()
            .map(|(locality, unit)| LocatedUnit { locality, unit })
            .collect(),
    ))
}

async fn get_unit(
    State(state): State<Arc<AppState>>,
    Path((locality, unit)): Path<(String, String)>,
) -> Result<Json<Unit>> {
    let store = state.store()?;
    Ok(Json(store.get_unit(&locality, &unit)?.clone()))
}

async fn submit_json(
    State(state): State<Arc<AppState>>,
    WithRejection(Json(envelope), _): WithRejection<Json<SubmissionEnvelope>, RegistryError>,
) -> Result<Json<SubmitResponse>> {
    submit(&state, envelope).await
}

async fn submit_form(
    State(state): State<Arc<AppState>>,
    WithRejection(Form(form), _): WithRejection<Form<FormSubmission>, RegistryError>,
) -> Result<Json<SubmitResponse>> {
    submit(&state, form.into_envelope()).await
}

/// Stores the unit, then mails its workbook when mail is configured.
///
/// A mail failure is reported in the response but the unit stays registered.
async fn submit(state: &AppState, envelope: SubmissionEnvelope) -> Result<Json<SubmitResponse>> {
    let locality = envelope.locality.trim().to_string();
    let unit = envelope.unit.into_unit()?;
    let unit = {
        let mut store = state.store()?;
        store.create_unit(&locality, unit)?.clone()
    };

    let mut message = "Unidade adicionada com sucesso!".to_string();
    let mut status = "ok";
    let mut mail_error = None;
    if state.mailer.is_some() {
        let units = vec![(locality.clone(), unit.clone())];
        match state
            .mail_export(Some(locality.clone()), Some(unit.name.clone()), units)
            .await
        {
            Ok(()) => message = "Unidade adicionada e e-mail enviado com sucesso!".to_string(),
            Err(e) => {
                warn!("Unit '{}' stored but not mailed: {}", unit.name, e);
                message = format!("Unidade adicionada, mas o e-mail não foi enviado: {}", e);
                status = "warning";
                mail_error = Some(e.to_string());
            }
        }
    }

    let malformed = unit.malformed_measurements();
    if malformed > 0 {
        message.push_str(&format!(" ({} medida(s) inválida(s) registrada(s))", malformed));
    }

    Ok(Json(SubmitResponse {
        status: status.to_string(),
        message,
        unit: Some(unit),
        mail_error,
    }))
}

async fn update_unit(
    State(state): State<Arc<AppState>>,
    Path((locality, name)): Path<(String, String)>,
    WithRejection(Json(submission), _): WithRejection<Json<UnitSubmission>, RegistryError>,
) -> Result<Json<SubmitResponse>> {
    let unit = submission.into_unit()?;
    let mut store = state.store()?;
    let unit = store.update_unit(&locality, &name, unit)?.clone();
    Ok(Json(SubmitResponse {
        status: "ok".to_string(),
        message: "Unidade atualizada com sucesso!".to_string(),
        unit: Some(unit),
        mail_error: None,
    }))
}

async fn delete_unit(
    State(state): State<Arc<AppState>>,
    Path((locality, name)): Path<(String, String)>,
) -> Result<Json<StatusResponse>> {
    let mut store = state.store()?;
    let removed = store.delete_unit(&locality, &name)?;
    Ok(Json(StatusResponse::ok(format!(
        "Unidade '{}' removida",
        removed.name
    ))))
}

async fn export_xlsx(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let (locality, unit) = query.filters();
    let units = state.collect_units(locality, unit)?;
    let filename = ExportScope::from_filters(locality, unit).filename(Local::now(), "xlsx");

    let bytes = tokio::task::spawn_blocking(move || {
        export::to_xlsx(&export::build_table(
            units.iter().map(|(l, u)| (l.as_str(), u)),
        ))
    })
    .await
    .map_err(|e| RegistryError::Internal(e.to_string()))??;

    download(bytes, XLSX_CONTENT_TYPE, &filename)
}

async fn export_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let (locality, unit) = query.filters();
    let units = state.collect_units(locality, unit)?;
    let filename = ExportScope::from_filters(locality, unit).filename(Local::now(), "csv");
    let csv = export::to_csv(&export::build_table(
        units.iter().map(|(l, u)| (l.as_str(), u)),
    ));
    download(csv.into_bytes(), CSV_CONTENT_TYPE, &filename)
}

async fn export_email(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<ExportQuery>>,
) -> Result<Json<StatusResponse>> {
    let query = payload.map(|Json(q)| q).unwrap_or_default();
    let (locality, unit) = query.filters();
    let units = state.collect_units(locality, unit)?;
    let count = units.len();

    state
        .mail_export(locality.map(String::from), unit.map(String::from), units)
        .await?;
    Ok(Json(StatusResponse::ok(format!(
        "Planilha com {} unidade(s) enviada para {}",
        count,
        state.recipients.join(", ")
    ))))
}

/// File download response with an RFC 6266 `Content-Disposition`.
fn download(bytes: Vec<u8>, content_type: &'static str, filename: &str) -> Result<Response> {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect();
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| RegistryError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
