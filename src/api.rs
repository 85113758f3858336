use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Form, Router,
};
use axum_extra::extract::cookie::CookieJar;
use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{self, CurrentUser};
use crate::config::AppConfig;
use crate::db::{Database, Flash, StoreError};
use crate::i18n::{Translator, BROWSER_LANGUAGE};
use crate::ingest::{self, UploadedFile};
use crate::manual::{self, ManualWorkout, HTML_DATE_FORMAT};
use crate::models::{Equipment, Workout, WorkoutTotals, WorkoutType, WEB_INTERFACE_CREATOR};
use crate::presentation::RequestContext;
use crate::units::{self, build_decorated_attribute, DecoratedAttribute, UnitSystem};

#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Mutex<Database>>,
    pub translator: Arc<Translator>,
    pub views: Arc<Handlebars<'static>>,
    pub config: Arc<AppConfig>,
}

/// Unexpected failures: logged, and answered with a bare 500.
pub struct AppError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        AppError(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    }
}

type HandlerResult = Result<Response, AppError>;

/// Workouts listed on the dashboard.
const RECENT_WORKOUTS: usize = 5;

#[derive(Debug, Default, Deserialize)]
pub struct LangQuery {
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SigninForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins = config.cors_origins();
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect::<Vec<_>>(),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin", get(admin_users))
        .route("/admin/users/:id", get(admin_user_show).post(admin_user_update))
        .route("/admin/users/:id/edit", get(admin_user_edit))
        .route("/admin/users/:id/delete", post(admin_user_delete))
        .route_layer(middleware::from_fn(auth::require_admin));

    let protected = Router::new()
        .route("/", get(dashboard))
        .route("/statistics", get(statistics))
        .route("/user/signout", get(user_signout))
        .route("/user/profile", get(show_profile).post(update_profile))
        .route("/user/refresh", post(refresh_user))
        .route("/workouts", get(list_workouts).post(create_workout))
        .route("/workouts/add", get(add_workout_form))
        .route("/workouts/:id", get(show_workout).post(update_workout))
        .route("/workouts/:id/edit", get(edit_workout_form))
        .route("/workouts/:id/delete", post(delete_workout))
        .route("/workouts/:id/refresh", post(refresh_workout))
        .route("/equipment", get(list_equipment).post(create_equipment))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/user/signin", get(signin_form).post(user_signin))
        .route("/user/register", post(user_register))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.upload_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Helpers ---

fn accept_language(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
}

fn form_pairs(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

fn form_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn form_checkbox(pairs: &[(String, String)], key: &str) -> bool {
    matches!(form_value(pairs, key), Some("on" | "true" | "1"))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

fn context_for(
    state: &AppState,
    current: Option<&CurrentUser>,
    query: &LangQuery,
    headers: &HeaderMap,
) -> RequestContext {
    RequestContext::resolve(
        &state.translator,
        current.map(|c| &c.user),
        query.lang.as_deref(),
        current.and_then(|c| c.session.language.as_deref()),
        accept_language(headers),
    )
}

fn render(state: &AppState, ctx: &RequestContext, template: &str, page: Value) -> HandlerResult {
    let body = ctx.render(&state.views, template, page)?;
    Ok(Html(body).into_response())
}

/// Renders a page for a signed-in user, consuming pending flash messages.
async fn render_page(
    state: &AppState,
    current: &CurrentUser,
    ctx: &RequestContext,
    template: &str,
    mut page: Value,
) -> HandlerResult {
    let (notice, error) = state.database.lock().await.take_flash(&current.session.id)?;
    if let Value::Object(map) = &mut page {
        map.insert("notice".to_string(), json!(notice));
        map.insert("error".to_string(), json!(error));
    }
    render(state, ctx, template, page)
}

async fn flash(state: &AppState, current: &CurrentUser, kind: Flash, message: &str) {
    let db = state.database.lock().await;
    if let Err(e) = db.set_flash(&current.session.id, kind, message) {
        warn!("Could not store flash message: {}", e);
    }
}

/// Reports a failed save to the user. Validation problems are expected;
/// anything else is logged as well.
fn save_failed(db: &Database, current: &CurrentUser, e: &StoreError) -> Result<(), StoreError> {
    if !matches!(e, StoreError::Validation(_)) {
        error!(username = %current.user.username, "Could not save workout: {}", e);
    }
    db.set_flash(&current.session.id, Flash::Error, &e.to_string())
}

fn not_found(ctx: &RequestContext, what: &str) -> HandlerResult {
    Ok((StatusCode::NOT_FOUND, ctx.t(what)).into_response())
}

/// `HH:MM:SS` for a time input; empty when the duration does not fit one.
fn duration_input(secs: u64) -> String {
    if secs >= 24 * 3600 {
        return String::new();
    }
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn workout_view(w: &Workout) -> Value {
    let data = w.data.clone().unwrap_or_default();

    json!({
        "id": w.id,
        "name": w.name,
        "notes": w.notes,
        "type": w.workout_type.as_str(),
        "date": w.date.map(|d| d.format(HTML_DATE_FORMAT).to_string()),
        "creator": data.creator,
        "distance": data.total_distance,
        "duration": data.total_duration.as_secs_f64(),
        "duration_input": duration_input(data.total_duration.as_secs()),
        "speed": data.average_speed(),
        "repetitions": data.total_repetitions,
        "weight": data.total_weight,
        "country_code": data.country_code,
        "has_track": data.track.is_some(),
        "is_distance": w.workout_type.is_distance(),
        "is_repetition": w.workout_type.is_repetition(),
        "is_weight": w.workout_type.is_weight(),
        "filename": w.filename,
        "dirty": w.dirty,
        "equipment": w.equipment,
    })
}

/// The measured values of a workout as labeled attributes, in the viewer's
/// language and units.
fn workout_attributes(w: &Workout, ctx: &RequestContext) -> Vec<DecoratedAttribute> {
    let data = w.data.clone().unwrap_or_default();
    let attr = |key: &str, label: &str, value: String| {
        build_decorated_attribute(units::icon_for(key), ctx.t(label), value)
    };

    let mut attributes = vec![attr(
        "duration",
        "Duration",
        units::human_duration(data.total_duration),
    )];
    if w.workout_type.is_distance() {
        let speed = data.average_speed();
        attributes.push(attr("distance", "Distance", units::human_distance(data.total_distance, ctx.units)));
        attributes.push(attr("speed", "Average speed", units::human_speed(speed, ctx.units)));
        attributes.push(attr("tempo", "Tempo", units::human_tempo(speed, ctx.units)));
    }
    if w.workout_type.is_repetition() {
        attributes.push(attr("repetitions", "Repetitions", data.total_repetitions.to_string()));
    }
    if w.workout_type.is_weight() {
        attributes.push(attr("weight", "Weight", units::human_weight(data.total_weight, ctx.units)));
    }

    attributes
}

fn equipment_choices(all: &[Equipment], selected: &[Equipment]) -> Value {
    all.iter()
        .map(|e| {
            json!({
                "id": e.id,
                "name": e.name,
                "active": e.active,
                "selected": selected.iter().any(|s| s.id == e.id),
            })
        })
        .collect()
}

fn totals_view(totals: &WorkoutTotals) -> Value {
    json!({
        "type": totals.workout_type.as_str(),
        "period": totals.period,
        "count": totals.count,
        "distance": totals.distance,
        "duration": totals.duration,
        "speed": totals.average_speed(),
    })
}

/// Sums for the workout type the profile chose to total.
fn profile_totals(all: &[WorkoutTotals], totals_show: WorkoutType) -> Value {
    let totals = all
        .iter()
        .find(|t| t.workout_type == totals_show)
        .cloned()
        .unwrap_or_else(|| WorkoutTotals::empty(totals_show));
    totals_view(&totals)
}

// --- Users ---

async fn signin_form(
    State(state): State<AppState>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> HandlerResult {
    if auth::current_user(&state, &jar).await.is_some() {
        return Ok(Redirect::to(auth::DASHBOARD_PATH).into_response());
    }

    let ctx = context_for(&state, None, &query, &headers);
    render(
        &state,
        &ctx,
        "user_signin",
        json!({ "registration_disabled": state.config.registration_disabled }),
    )
}

fn signin_page(
    state: &AppState,
    ctx: &RequestContext,
    status: StatusCode,
    error: Option<String>,
    notice: Option<String>,
) -> HandlerResult {
    let page = render(
        state,
        ctx,
        "user_signin",
        json!({
            "registration_disabled": state.config.registration_disabled,
            "error": error,
            "notice": notice,
        }),
    )?;
    Ok((status, page).into_response())
}

async fn user_signin(
    State(state): State<AppState>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<SigninForm>,
) -> HandlerResult {
    let ctx = context_for(&state, None, &query, &headers);

    let db = state.database.lock().await;
    let Some(user) = db.authenticate(form.username.trim(), &form.password)? else {
        drop(db);
        warn!(username = %form.username, "Failed sign-in");
        return signin_page(
            &state,
            &ctx,
            StatusCode::UNAUTHORIZED,
            Some(ctx.t("Invalid username or password")),
            None,
        );
    };

    let language = (user.profile.language != BROWSER_LANGUAGE).then_some(user.profile.language.as_str());
    let session = db.create_session(user.id, language, state.config.session_lifetime())?;
    info!(username = %user.username, "Signed in");

    Ok((
        jar.add(auth::session_cookie(session.id)),
        Redirect::to(auth::DASHBOARD_PATH),
    )
        .into_response())
}

async fn user_register(
    State(state): State<AppState>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    Form(form): Form<RegisterForm>,
) -> HandlerResult {
    let ctx = context_for(&state, None, &query, &headers);

    if state.config.registration_disabled {
        return signin_page(
            &state,
            &ctx,
            StatusCode::FORBIDDEN,
            Some(ctx.t("Registration is disabled")),
            None,
        );
    }

    let created = state
        .database
        .lock()
        .await
        .create_user(form.username.trim(), &form.name, &form.password, false);

    match created {
        Ok(user) => {
            info!(username = %user.username, "Registered new user");
            signin_page(
                &state,
                &ctx,
                StatusCode::OK,
                None,
                Some(ctx.t("Your account has been created; you can now sign in.")),
            )
        }
        Err(StoreError::Validation(msg)) => {
            signin_page(&state, &ctx, StatusCode::BAD_REQUEST, Some(msg), None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn user_signout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    jar: CookieJar,
) -> HandlerResult {
    state
        .database
        .lock()
        .await
        .delete_session(&current.session.id)?;
    info!(username = %current.user.username, "Signed out");

    Ok((jar.remove(auth::removal_cookie()), Redirect::to(auth::SIGNIN_PATH)).into_response())
}

async fn show_profile(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let unit_systems: Vec<&str> = UnitSystem::all()
        .iter()
        .map(|u| u.as_str())
        .collect();

    render_page(
        &state,
        &current,
        &ctx,
        "user_profile",
        json!({
            "profile": current.user.profile,
            "unit_systems": unit_systems,
        }),
    )
    .await
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let pairs = form_pairs(&body);
    let mut profile = current.user.profile.clone();
    profile.reset_bools();

    if let Some(language) = form_value(&pairs, "language") {
        profile.language = language.to_string();
    }
    let units = form_value(&pairs, "preferred_units").map(str::parse::<UnitSystem>).transpose();
    let totals = form_value(&pairs, "totals_show").map(str::parse::<WorkoutType>).transpose();
    profile.prefer_full_date = form_checkbox(&pairs, "prefer_full_date");
    profile.socials_disabled = form_checkbox(&pairs, "socials_disabled");

    let result = match (units, totals) {
        (Ok(units), Ok(totals)) => {
            manual::set_if_some(&mut profile.preferred_units, units);
            manual::set_if_some(&mut profile.totals_show, totals);
            state.database.lock().await.save_profile(current.user.id, &profile)
        }
        (Err(e), _) => Err(StoreError::Validation(e.to_string())),
        (_, Err(e)) => Err(StoreError::Validation(e.to_string())),
    };

    match result {
        Ok(()) => {
            let session_language =
                (profile.language != BROWSER_LANGUAGE).then_some(profile.language.as_str());
            state
                .database
                .lock()
                .await
                .set_session_language(&current.session.id, session_language)?;

            // The confirmation is shown in the newly chosen language.
            let mut updated = current.clone();
            updated.user.profile = profile.clone();
            updated.session.language = session_language.map(str::to_string);
            let ctx = context_for(&state, Some(&updated), &query, &headers);
            flash(&state, &current, Flash::Notice, &ctx.t("Your profile has been updated.")).await;
        }
        Err(StoreError::Validation(msg)) => {
            flash(&state, &current, Flash::Error, &msg).await;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Redirect::to("/user/profile").into_response())
}

async fn refresh_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let marked = state
        .database
        .lock()
        .await
        .mark_user_workouts_dirty(current.user.id)?;
    info!(username = %current.user.username, "Marked {} workouts for refresh", marked);

    let msg = ctx
        .localizer
        .getf("{} workouts will be refreshed in the background.", &[&marked]);
    flash(&state, &current, Flash::Notice, &msg).await;
    Ok(Redirect::to("/user/profile").into_response())
}

// --- Overview ---

async fn dashboard(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let (workouts, totals) = {
        let db = state.database.lock().await;
        (
            db.workouts_for_user(current.user.id)?,
            db.totals_by_type(current.user.id)?,
        )
    };

    render_page(
        &state,
        &current,
        &ctx,
        "dashboard",
        json!({
            "recent": workouts.iter().take(RECENT_WORKOUTS).map(workout_view).collect::<Vec<_>>(),
            "totals": profile_totals(&totals, current.user.profile.totals_show),
        }),
    )
    .await
}

async fn statistics(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let totals_show = current.user.profile.totals_show;
    let (by_type, monthly) = {
        let db = state.database.lock().await;
        (
            db.totals_by_type(current.user.id)?,
            db.monthly_totals(current.user.id, totals_show)?,
        )
    };

    render_page(
        &state,
        &current,
        &ctx,
        "statistics",
        json!({
            "by_type": by_type.iter().map(totals_view).collect::<Vec<_>>(),
            "totals_type": totals_show.as_str(),
            "monthly": monthly.iter().map(totals_view).collect::<Vec<_>>(),
        }),
    )
    .await
}

// --- Workouts ---

async fn list_workouts(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let (workouts, totals) = {
        let db = state.database.lock().await;
        (
            db.workouts_for_user(current.user.id)?,
            db.totals_by_type(current.user.id)?,
        )
    };

    render_page(
        &state,
        &current,
        &ctx,
        "workouts",
        json!({
            "workouts": workouts.iter().map(workout_view).collect::<Vec<_>>(),
            "totals": profile_totals(&totals, current.user.profile.totals_show),
        }),
    )
    .await
}

async fn add_workout_form(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let equipment = state
        .database
        .lock()
        .await
        .equipment_for_user(current.user.id)?;

    render_page(
        &state,
        &current,
        &ctx,
        "workout_form",
        json!({
            "action": "/workouts",
            "workout": null,
            "equipment": equipment_choices(&equipment, &[]),
        }),
    )
    .await
}

/// Uploads arrive as multipart; the manual form as urlencoded.
async fn create_workout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    request: Request,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, request.headers());

    if is_multipart(request.headers()) {
        let multipart = match Multipart::from_request(request, &state).await {
            Ok(m) => m,
            Err(rejection) => return Ok(rejection.into_response()),
        };
        return upload_workouts(&state, &current, &ctx, multipart).await;
    }

    let body = match Bytes::from_request(request, &state).await {
        Ok(b) => b,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    add_manual_workout(&state, &current, &ctx, &form_pairs(&body)).await
}

async fn upload_workouts(
    state: &AppState,
    current: &CurrentUser,
    ctx: &RequestContext,
    mut multipart: Multipart,
) -> HandlerResult {
    let mut files = Vec::new();
    let mut notes = String::new();
    let mut workout_type = WorkoutType::AutoDetect;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed upload: {}", e);
                flash(state, current, Flash::Error, &e.body_text()).await;
                return Ok(Redirect::to("/workouts/add").into_response());
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content = match field.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => {
                        flash(state, current, Flash::Error, &e.body_text()).await;
                        return Ok(Redirect::to("/workouts/add").into_response());
                    }
                };
                // an empty file input still submits one nameless part
                if filename.is_empty() && content.is_empty() {
                    continue;
                }
                files.push(UploadedFile { filename, content });
            }
            "notes" => notes = field.text().await.unwrap_or_default(),
            "type" => workout_type = WorkoutType::from_hint(&field.text().await.unwrap_or_default()),
            _ => {}
        }
    }

    let db = state.database.lock().await;
    let report = ingest::ingest_files(&*db, &current.user, &files, &notes, workout_type);

    if let Some(msg) = report.error_message(&ctx.localizer) {
        db.set_flash(&current.session.id, Flash::Error, &msg)?;
    }
    if let Some(msg) = report.notice_message(&ctx.localizer) {
        db.set_flash(&current.session.id, Flash::Notice, &msg)?;
    }

    Ok(Redirect::to("/workouts").into_response())
}

async fn add_manual_workout(
    state: &AppState,
    current: &CurrentUser,
    ctx: &RequestContext,
    pairs: &[(String, String)],
) -> HandlerResult {
    let bound = ManualWorkout::from_form_pairs(pairs)
        .and_then(|m| Ok((m, manual::equipment_ids_from_form_pairs(pairs)?)));
    let (input, equipment_ids) = match bound {
        Ok(b) => b,
        Err(e) => {
            flash(state, current, Flash::Error, &e.to_string()).await;
            return Ok(Redirect::to("/workouts/add").into_response());
        }
    };

    let mut workout = Workout::new(current.user.id);
    input.update(&mut workout);
    workout.data_mut().creator = WEB_INTERFACE_CREATOR.to_string();

    let db = state.database.lock().await;
    let id = match db.save_workout_with_equipment(&mut workout, &equipment_ids) {
        Ok(()) => workout.id,
        Err(e) => {
            save_failed(&db, current, &e)?;
            return Ok(Redirect::to("/workouts/add").into_response());
        }
    };
    let Some(id) = id else {
        return Err(anyhow::anyhow!("saved workout has no id").into());
    };
    db.set_flash(
        &current.session.id,
        Flash::Notice,
        &ctx.localizer.getf("The workout '{}' has been created.", &[&workout.name]),
    )?;
    info!(username = %current.user.username, "Created workout {} manually", id);

    Ok(Redirect::to(&format!("/workouts/{}", id)).into_response())
}

async fn show_workout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let workout = state
        .database
        .lock()
        .await
        .workout_for_user(current.user.id, id)?;
    let Some(workout) = workout else {
        return not_found(&ctx, "Workout not found");
    };

    render_page(
        &state,
        &current,
        &ctx,
        "workout_show",
        json!({
            "workout": workout_view(&workout),
            "attributes": workout_attributes(&workout, &ctx),
            "full_date": current.user.profile.prefer_full_date,
        }),
    )
    .await
}

async fn edit_workout_form(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let (workout, equipment) = {
        let db = state.database.lock().await;
        (
            db.workout_for_user(current.user.id, id)?,
            db.equipment_for_user(current.user.id)?,
        )
    };
    let Some(workout) = workout else {
        return not_found(&ctx, "Workout not found");
    };

    render_page(
        &state,
        &current,
        &ctx,
        "workout_form",
        json!({
            "action": format!("/workouts/{}", id),
            "workout": workout_view(&workout),
            "equipment": equipment_choices(&equipment, &workout.equipment),
        }),
    )
    .await
}

async fn update_workout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let pairs = form_pairs(&body);
    let edit_path = format!("/workouts/{}/edit", id);

    let db = state.database.lock().await;
    let Some(mut workout) = db.workout_for_user(current.user.id, id)? else {
        return not_found(&ctx, "Workout not found");
    };

    let bound = ManualWorkout::from_form_pairs(&pairs)
        .and_then(|m| Ok((m, manual::equipment_ids_from_form_pairs(&pairs)?)));
    let (input, equipment_ids) = match bound {
        Ok(b) => b,
        Err(e) => {
            db.set_flash(&current.session.id, Flash::Error, &e.to_string())?;
            return Ok(Redirect::to(&edit_path).into_response());
        }
    };

    input.update(&mut workout);
    if let Err(e) = db.save_workout_with_equipment(&mut workout, &equipment_ids) {
        save_failed(&db, &current, &e)?;
        return Ok(Redirect::to(&edit_path).into_response());
    }

    db.set_flash(
        &current.session.id,
        Flash::Notice,
        &ctx.localizer.getf("The workout '{}' has been updated.", &[&workout.name]),
    )?;

    Ok(Redirect::to(&format!("/workouts/{}", id)).into_response())
}

async fn delete_workout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let db = state.database.lock().await;
    let Some(workout) = db.workout_for_user(current.user.id, id)? else {
        return not_found(&ctx, "Workout not found");
    };

    db.delete_workout(current.user.id, id)?;
    db.set_flash(
        &current.session.id,
        Flash::Notice,
        &ctx.localizer.getf("The workout '{}' has been deleted.", &[&workout.name]),
    )?;
    info!(username = %current.user.username, "Deleted workout {}", id);

    Ok(Redirect::to("/workouts").into_response())
}

async fn refresh_workout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let db = state.database.lock().await;
    if !db.mark_workout_dirty(current.user.id, id)? {
        return not_found(&ctx, "Workout not found");
    }

    db.set_flash(
        &current.session.id,
        Flash::Notice,
        &ctx.t("The workout will be refreshed in the background."),
    )?;
    Ok(Redirect::to(&format!("/workouts/{}", id)).into_response())
}

// --- Administration ---

async fn admin_users(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let users = state.database.lock().await.all_users()?;

    render_page(&state, &current, &ctx, "admin", json!({ "users": users })).await
}

async fn admin_user_show(Path(id): Path<i64>) -> Redirect {
    Redirect::to(&format!("/admin/users/{}/edit", id))
}

async fn admin_user_edit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let Some(account) = state.database.lock().await.user_by_id(id)? else {
        return not_found(&ctx, "User not found");
    };

    render_page(
        &state,
        &current,
        &ctx,
        "admin_user_form",
        json!({ "account": account }),
    )
    .await
}

async fn admin_user_update(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let pairs = form_pairs(&body);
    let edit_path = format!("/admin/users/{}/edit", id);
    let name = form_value(&pairs, "name").unwrap_or_default();
    let active = form_checkbox(&pairs, "active");
    let admin = form_checkbox(&pairs, "admin");

    let db = state.database.lock().await;
    if id == current.user.id && !(active && admin) {
        db.set_flash(
            &current.session.id,
            Flash::Error,
            &ctx.t("You cannot remove your own administrator access."),
        )?;
        return Ok(Redirect::to(&edit_path).into_response());
    }

    match db.update_user_account(id, name, active, admin) {
        Ok(()) => {
            info!(username = %current.user.username, "Updated user {}", id);
            let msg = ctx.localizer.getf("The user '{}' has been updated.", &[&name.trim()]);
            db.set_flash(&current.session.id, Flash::Notice, &msg)?;
            Ok(Redirect::to("/admin").into_response())
        }
        Err(StoreError::NotFound(_)) => not_found(&ctx, "User not found"),
        Err(e) => {
            if !matches!(e, StoreError::Validation(_)) {
                error!("Could not update user {}: {}", id, e);
            }
            db.set_flash(&current.session.id, Flash::Error, &e.to_string())?;
            Ok(Redirect::to(&edit_path).into_response())
        }
    }
}

async fn admin_user_delete(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let db = state.database.lock().await;

    if id == current.user.id {
        db.set_flash(
            &current.session.id,
            Flash::Error,
            &ctx.t("You cannot delete your own account."),
        )?;
        return Ok(Redirect::to(&format!("/admin/users/{}/edit", id)).into_response());
    }

    let Some(account) = db.user_by_id(id)? else {
        return not_found(&ctx, "User not found");
    };
    db.delete_user(id)?;
    warn!(username = %current.user.username, "Deleted user {}", account.username);

    let msg = ctx
        .localizer
        .getf("The user '{}' has been deleted.", &[&account.username]);
    db.set_flash(&current.session.id, Flash::Notice, &msg)?;
    Ok(Redirect::to("/admin").into_response())
}

// --- Equipment ---

async fn list_equipment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let equipment = state
        .database
        .lock()
        .await
        .equipment_for_user(current.user.id)?;

    render_page(&state, &current, &ctx, "equipment", json!({ "equipment": equipment })).await
}

async fn create_equipment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let ctx = context_for(&state, Some(&current), &query, &headers);
    let pairs = form_pairs(&body);

    let mut equipment = Equipment {
        user_id: current.user.id,
        name: form_value(&pairs, "name").unwrap_or_default().to_string(),
        description: form_value(&pairs, "description").unwrap_or_default().to_string(),
        active: form_checkbox(&pairs, "active"),
        ..Default::default()
    };

    let db = state.database.lock().await;
    match db.create_equipment(&mut equipment) {
        Ok(()) => db.set_flash(
            &current.session.id,
            Flash::Notice,
            &ctx.localizer.getf("The equipment '{}' has been created.", &[&equipment.name]),
        )?,
        Err(StoreError::Validation(msg)) => db.set_flash(&current.session.id, Flash::Error, &msg)?,
        Err(e) => return Err(e.into()),
    }

    Ok(Redirect::to("/equipment").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::presentation;
    use axum::body::Body;
    use tower::ServiceExt;

    fn test_state(config: AppConfig) -> AppState {
        let translator = Translator::load().expect("catalogs should load");
        let views = presentation::base_registry(&translator).expect("templates should register");
        AppState {
            database: Arc::new(Mutex::new(Database::open_in_memory().expect("db should open"))),
            translator: Arc::new(translator),
            views: Arc::new(views),
            config: Arc::new(config),
        }
    }

    async fn signed_in(state: &AppState) -> (User, String) {
        signed_in_as(state, "runner", false).await
    }

    async fn signed_in_as(state: &AppState, username: &str, admin: bool) -> (User, String) {
        let db = state.database.lock().await;
        let user = db
            .create_user(username, "", "secret", admin)
            .expect("user should be created");
        let session = db
            .create_session(user.id, None, std::time::Duration::from_secs(3600))
            .expect("session should be created");
        (user, format!("{}={}", auth::SESSION_COOKIE, session.id))
    }

    async fn send(state: &AppState, request: axum::http::Request<Body>) -> Response {
        router(state.clone())
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        String::from_utf8(bytes.to_vec()).expect("body should be utf-8")
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    fn get(uri: &str, cookie: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn post_form(uri: &str, cookie: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_body(boundary: &str, files: &[(&str, &str)], notes: &str, kind: &str) -> String {
        let mut body = String::new();
        for (name, content) in files {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: application/json\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"notes\"\r\n\r\n{notes}\r\n"
        ));
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"type\"\r\n\r\n{kind}\r\n--{boundary}--\r\n"
        ));
        body
    }

    fn saved_workout(db: &Database, user_id: i64, name: &str, notes: &str) -> i64 {
        let mut w = Workout::new(user_id);
        w.name = name.to_string();
        w.notes = notes.to_string();
        w.date = chrono::NaiveDateTime::parse_from_str("2024-03-01T07:00", HTML_DATE_FORMAT).ok();
        w.workout_type = WorkoutType::Running;
        w.data_mut().total_distance = 5000.0;
        w.data_mut().total_duration = std::time::Duration::from_secs(1500);
        db.save_workout(&mut w).expect("workout should save");
        w.id.expect("id assigned")
    }

    fn session_id(cookie: &str) -> &str {
        cookie.trim_start_matches("session=")
    }

    #[tokio::test]
    async fn root_requires_signin() {
        let state = test_state(AppConfig::default());
        let response = send(&state, get("/", "")).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), auth::SIGNIN_PATH);
    }

    #[tokio::test]
    async fn dashboard_shows_totals_and_recent_workouts() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;
        saved_workout(&*state.database.lock().await, user.id, "Harbour loop", "");

        let response = send(&state, get("/", &cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Harbour loop"));
        assert!(body.contains("5.00 km"));
        assert!(!body.contains("href=\"/admin\""));
    }

    #[tokio::test]
    async fn statistics_lists_types_and_months() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;
        saved_workout(&*state.database.lock().await, user.id, "Run", "");

        let response = send(&state, get("/statistics?lang=de", &cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("2024-03"));
        assert!(body.contains("Statistik"));
    }

    #[tokio::test]
    async fn admin_pages_are_for_admins_only() {
        let state = test_state(AppConfig::default());
        let (_, cookie) = signed_in(&state).await;

        let response = send(&state, get("/admin", &cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), auth::DASHBOARD_PATH);

        let response = send(&state, post_form("/admin/users/1/delete", &cookie, "")).await;
        assert_eq!(location(&response), auth::DASHBOARD_PATH);
        assert!(state.database.lock().await.user_by_id(1).unwrap().is_some());

        let response = send(&state, get("/admin", "")).await;
        assert_eq!(location(&response), auth::SIGNIN_PATH);
    }

    #[tokio::test]
    async fn admin_manages_other_users() {
        let state = test_state(AppConfig::default());
        let (admin, cookie) = signed_in_as(&state, "boss", true).await;
        let other = state
            .database
            .lock()
            .await
            .create_user("runner", "Runner", "pw", false)
            .unwrap();

        let response = send(&state, get("/admin", &cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("runner"));

        let response = send(&state, get(&format!("/admin/users/{}", other.id), &cookie)).await;
        assert_eq!(location(&response), format!("/admin/users/{}/edit", other.id));

        let response = send(
            &state,
            post_form(&format!("/admin/users/{}", other.id), &cookie, "name=Fast+Runner&admin=on"),
        )
        .await;
        assert_eq!(location(&response), "/admin");
        {
            let db = state.database.lock().await;
            let updated = db.user_by_id(other.id).unwrap().unwrap();
            assert_eq!(updated.name, "Fast Runner");
            assert!(!updated.active);
            assert!(updated.admin);
            let (notice, _) = db.take_flash(session_id(&cookie)).unwrap();
            assert_eq!(notice.as_deref(), Some("The user 'Fast Runner' has been updated."));
        }

        let response = send(
            &state,
            post_form(&format!("/admin/users/{}", admin.id), &cookie, "name=Boss&active=on"),
        )
        .await;
        assert_eq!(location(&response), format!("/admin/users/{}/edit", admin.id));
        assert!(state.database.lock().await.user_by_id(admin.id).unwrap().unwrap().admin);

        let response = send(&state, post_form(&format!("/admin/users/{}/delete", admin.id), &cookie, "")).await;
        assert_eq!(location(&response), format!("/admin/users/{}/edit", admin.id));

        let response = send(&state, post_form(&format!("/admin/users/{}/delete", other.id), &cookie, "")).await;
        assert_eq!(location(&response), "/admin");
        assert!(state.database.lock().await.user_by_id(other.id).unwrap().is_none());

        let response = send(&state, get(&format!("/admin/users/{}/edit", other.id), &cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_form_can_clear_notes() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;
        let id = saved_workout(&*state.database.lock().await, user.id, "Run", "old notes");

        let response = send(
            &state,
            post_form(&format!("/workouts/{}", id), &cookie, "name=Run&notes=&type=running"),
        )
        .await;
        assert_eq!(location(&response), format!("/workouts/{}", id));

        let db = state.database.lock().await;
        let stored = db.workout_for_user(user.id, id).unwrap().unwrap();
        assert_eq!(stored.notes, "");
        assert_eq!(stored.data.unwrap().total_distance, 5000.0);
    }

    #[tokio::test]
    async fn storage_failure_redirects_with_error() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;
        let id = saved_workout(&*state.database.lock().await, user.id, "Run", "");
        state
            .database
            .lock()
            .await
            .connection()
            .execute_batch(
                "CREATE TRIGGER no_insert BEFORE INSERT ON workouts
                     BEGIN SELECT RAISE(ABORT, 'workouts are read-only'); END;
                 CREATE TRIGGER no_update BEFORE UPDATE ON workouts
                     BEGIN SELECT RAISE(ABORT, 'workouts are read-only'); END;",
            )
            .unwrap();

        let response = send(
            &state,
            post_form("/workouts", &cookie, "name=Run&date=2024-03-01T19%3A00&type=running"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/workouts/add");

        let response = send(
            &state,
            post_form(&format!("/workouts/{}", id), &cookie, "name=Renamed&type=running"),
        )
        .await;
        assert_eq!(location(&response), format!("/workouts/{}/edit", id));

        let db = state.database.lock().await;
        let workouts = db.workouts_for_user(user.id).unwrap();
        assert_eq!(workouts.len(), 1);
        assert_eq!(workouts[0].name, "Run");
        let (_, error) = db.take_flash(session_id(&cookie)).unwrap();
        assert!(error.is_some_and(|e| e.contains("workouts are read-only")));
    }

    #[tokio::test]
    async fn refresh_routes_mark_workouts_dirty() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;
        let (first, second) = {
            let db = state.database.lock().await;
            (
                saved_workout(&db, user.id, "One", ""),
                saved_workout(&db, user.id, "Two", ""),
            )
        };

        let response = send(&state, post_form(&format!("/workouts/{}/refresh", first), &cookie, "")).await;
        assert_eq!(location(&response), format!("/workouts/{}", first));
        {
            let db = state.database.lock().await;
            let dirty: Vec<i64> = db.dirty_workouts().unwrap().iter().filter_map(|w| w.id).collect();
            assert_eq!(dirty, vec![first]);
            let (notice, _) = db.take_flash(session_id(&cookie)).unwrap();
            assert_eq!(notice.as_deref(), Some("The workout will be refreshed in the background."));
        }

        let response = send(&state, post_form("/user/refresh", &cookie, "")).await;
        assert_eq!(location(&response), "/user/profile");
        let db = state.database.lock().await;
        let dirty: Vec<i64> = db.dirty_workouts().unwrap().iter().filter_map(|w| w.id).collect();
        assert_eq!(dirty, vec![first, second]);
        let (notice, _) = db.take_flash(session_id(&cookie)).unwrap();
        assert_eq!(notice.as_deref(), Some("2 workouts will be refreshed in the background."));
    }

    #[test]
    fn duration_input_keeps_seconds() {
        assert_eq!(duration_input(3723), "01:02:03");
        assert_eq!(duration_input(59), "00:00:59");
        assert_eq!(duration_input(24 * 3600), "");
    }

    #[tokio::test]
    async fn anonymous_requests_are_sent_to_signin() {
        let state = test_state(AppConfig::default());
        let response = send(&state, get("/workouts", "session=bogus")).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), auth::SIGNIN_PATH);
    }

    #[tokio::test]
    async fn signin_sets_session_cookie() {
        let state = test_state(AppConfig::default());
        state.database.lock().await.ensure_admin_user().unwrap();

        let response = send(&state, post_form("/user/signin", "", "username=admin&password=admin")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("session="));

        let response = send(&state, post_form("/user/signin", "", "username=admin&password=nope")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn registration_can_be_disabled() {
        let config = AppConfig {
            registration_disabled: true,
            ..Default::default()
        };
        let state = test_state(config);

        let response = send(&state, post_form("/user/register", "", "username=new&password=pw")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(state.database.lock().await.user_by_username("new").unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_localized_by_query() {
        let state = test_state(AppConfig::default());
        let (_, cookie) = signed_in(&state).await;

        let response = send(&state, get("/workouts?lang=nl", &cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Trainingen"));
    }

    #[tokio::test]
    async fn manual_workout_is_created_with_equipment() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;
        let mut shoes = Equipment {
            user_id: user.id,
            name: "Shoes".to_string(),
            active: true,
            ..Default::default()
        };
        state.database.lock().await.create_equipment(&mut shoes).unwrap();

        let body = format!(
            "name=Evening+run&date=2024-03-01T19%3A00&duration=00%3A25&distance=5&type=running&equipment={}",
            shoes.id.unwrap()
        );
        let response = send(&state, post_form("/workouts", &cookie, &body)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let db = state.database.lock().await;
        let workouts = db.workouts_for_user(user.id).unwrap();
        assert_eq!(workouts.len(), 1);
        let id = workouts[0].id.unwrap();
        assert_eq!(location(&response), format!("/workouts/{}", id));

        let stored = db.workout_for_user(user.id, id).unwrap().unwrap();
        let data = stored.data.unwrap();
        assert_eq!(data.creator, WEB_INTERFACE_CREATOR);
        assert_eq!(data.total_distance, 5000.0);
        assert_eq!(data.total_duration.as_secs(), 1500);
        assert_eq!(stored.equipment, vec![shoes]);
    }

    #[tokio::test]
    async fn invalid_manual_workout_is_not_saved() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;

        let response = send(
            &state,
            post_form("/workouts", &cookie, "name=Run&date=yesterday&type=running"),
        )
        .await;
        assert_eq!(location(&response), "/workouts/add");

        let db = state.database.lock().await;
        assert!(db.workouts_for_user(user.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_batch_reports_each_file() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;
        let boundary = "XBOUNDARYX";
        let body = multipart_body(
            boundary,
            &[
                ("a.json", r#"{"name":"A","startTimeLocal":"2024-03-01 07:00:00","distance":5000,"duration":1500}"#),
                ("b.json", "not json"),
                ("c.json", r#"{"name":"C","startTimeLocal":"2024-03-02 07:00:00","distance":9000,"duration":3000}"#),
            ],
            "team ride",
            "cycling",
        );

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/workouts")
            .header(header::COOKIE, &cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let response = send(&state, request).await;
        assert_eq!(location(&response), "/workouts");

        let db = state.database.lock().await;
        let workouts = db.workouts_for_user(user.id).unwrap();
        assert_eq!(workouts.len(), 2);
        assert!(workouts
            .iter()
            .all(|w| w.workout_type == WorkoutType::Cycling && w.notes == "team ride"));

        let (notice, error) = db.take_flash(session_id(&cookie)).unwrap();
        assert_eq!(notice.as_deref(), Some("Added 2 new workout(s): A; C"));
        assert!(error.unwrap().starts_with("Encountered 1 problems while adding workouts: b.json"));
    }

    #[test]
    fn attributes_follow_workout_type_and_units() {
        let translator = Translator::load().expect("catalogs should load");
        let ctx = RequestContext::resolve(&translator, None, Some("nl"), None, Some("en-US"));

        let mut run = Workout::new(1);
        run.workout_type = WorkoutType::Running;
        run.data_mut().total_distance = 1609.344;
        run.data_mut().total_duration = std::time::Duration::from_secs(600);

        let attributes = workout_attributes(&run, &ctx);
        assert_eq!(attributes.len(), 4);
        assert_eq!(attributes[1].name, "Afstand");
        assert_eq!(attributes[1].value, "1.00 mi");
        assert!(attributes[3].value.ends_with(" min/mi"));

        let mut lift = Workout::new(1);
        lift.workout_type = WorkoutType::WeightLifting;
        lift.data_mut().total_repetitions = 12;
        let names: Vec<String> = workout_attributes(&lift, &ctx).into_iter().map(|a| a.icon).collect();
        assert_eq!(names, vec!["fa-stopwatch", "fa-repeat", "fa-weight-hanging"]);
    }

    #[tokio::test]
    async fn other_users_workouts_are_not_found() {
        let state = test_state(AppConfig::default());
        let (_, cookie) = signed_in(&state).await;
        let id = {
            let db = state.database.lock().await;
            let other = db.create_user("someone", "", "pw", false).unwrap();
            let mut w = Workout::new(other.id);
            w.name = "Private".to_string();
            w.date = chrono::NaiveDateTime::parse_from_str("2024-03-01T07:00", HTML_DATE_FORMAT).ok();
            w.workout_type = WorkoutType::Running;
            w.data_mut();
            db.save_workout(&mut w).unwrap();
            w.id.unwrap()
        };

        let response = send(&state, get(&format!("/workouts/{}", id), &cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&state, post_form(&format!("/workouts/{}/delete", id), &cookie, "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn profile_update_switches_language() {
        let state = test_state(AppConfig::default());
        let (user, cookie) = signed_in(&state).await;

        let response = send(
            &state,
            post_form(
                "/user/profile",
                &cookie,
                "language=de&preferred_units=imperial&totals_show=cycling&prefer_full_date=on",
            ),
        )
        .await;
        assert_eq!(location(&response), "/user/profile");

        {
            let db = state.database.lock().await;
            let profile = db.user_by_id(user.id).unwrap().unwrap().profile;
            assert_eq!(profile.language, "de");
            assert_eq!(profile.preferred_units, crate::units::UnitSystem::Imperial);
            assert_eq!(profile.totals_show, WorkoutType::Cycling);
            assert!(profile.prefer_full_date);
            assert!(!profile.socials_disabled);
        }

        let response = send(&state, get("/workouts", &cookie)).await;
        assert!(body_text(response).await.contains("lang=\"de\""));
    }
}
