use crate::data::DayIndex;
use crate::error::{PlanError, PlannerError, StoreError, WorkingError};
use crate::plan::PlanViolation;
use crate::store::PlanPaths;
use crate::working::{ChangeEntry, WorkingStatus};
use crate::workspace::{RunSummary, Workspace};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Edits and planning runs are serialized through the mutex.
#[derive(Clone)]
pub struct AppState {
    workspace: Arc<Mutex<Workspace>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingRequest {
    pub next_day: DayIndex,
}

#[derive(Debug, Default, Deserialize)]
pub struct InitRequest {
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub task: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRequest {
    pub old_task: String,
    pub new_task: String,
}

fn status_of(err: &PlannerError) -> StatusCode {
    match err {
        PlannerError::Working(WorkingError::Edit(_)) => StatusCode::CONFLICT,
        PlannerError::Working(WorkingError::Store(e)) | PlannerError::Store(e) => store_status(e),
        PlannerError::Working(_) | PlannerError::Data(_) => StatusCode::BAD_REQUEST,
        PlannerError::Plan(PlanError::Infeasible { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        PlannerError::Plan(PlanError::Data(_) | PlanError::MissingHistory(_)) => {
            StatusCode::BAD_REQUEST
        }
        PlannerError::Plan(PlanError::Store(e)) => store_status(e),
        PlannerError::Plan(_) | PlannerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NoActivePlan | StoreError::NoWorkingPlan | StoreError::NoParentPlan => {
            StatusCode::CONFLICT
        }
        StoreError::Io { .. } | StoreError::Json { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Runs `op` on the locked workspace on the blocking pool.
async fn with_workspace<T, F>(state: &AppState, op: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Workspace) -> Result<T, PlannerError> + Send + 'static,
{
    let workspace = state.workspace.clone().lock_owned().await;
    let result = tokio::task::spawn_blocking(move || op(&workspace))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    result.map(Json).map_err(|e| {
        let status = status_of(&e);
        if status.is_server_error() {
            error!("{e}");
        } else {
            info!("Rejected request: {e}");
        }
        (status, e.to_string())
    })
}

async fn plan_initial(State(state): State<AppState>) -> ApiResult<RunSummary> {
    with_workspace(&state, |ws| ws.plan_initial()).await
}

async fn plan_rolling(
    State(state): State<AppState>,
    Json(request): Json<RollingRequest>,
) -> ApiResult<RunSummary> {
    with_workspace(&state, move |ws| ws.plan_rolling(request.next_day)).await
}

async fn show_state(State(state): State<AppState>) -> ApiResult<WorkingStatus> {
    with_workspace(&state, |ws| Ok(ws.working().status()?)).await
}

async fn init_working(
    State(state): State<AppState>,
    body: Option<Json<InitRequest>>,
) -> ApiResult<String> {
    let description = body.and_then(|Json(request)| request.description);
    with_workspace(&state, move |ws| {
        Ok(ws
            .working()
            .init(description.as_deref(), Workspace::today())?)
    })
    .await
}

async fn activate_working(State(state): State<AppState>) -> ApiResult<PlanPaths> {
    with_workspace(&state, |ws| Ok(ws.working().activate()?)).await
}

async fn activate_parent(State(state): State<AppState>) -> ApiResult<PlanPaths> {
    with_workspace(&state, |ws| Ok(ws.working().activate_parent()?)).await
}

async fn add_task(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> ApiResult<ChangeEntry> {
    with_workspace(&state, move |ws| Ok(ws.working().add(&request.task)?)).await
}

async fn remove_task(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> ApiResult<ChangeEntry> {
    with_workspace(&state, move |ws| Ok(ws.working().remove(&request.task)?)).await
}

async fn switch_task(
    State(state): State<AppState>,
    Json(request): Json<SwitchRequest>,
) -> ApiResult<ChangeEntry> {
    with_workspace(&state, move |ws| {
        Ok(ws.working().switch(&request.old_task, &request.new_task)?)
    })
    .await
}

async fn undo(State(state): State<AppState>) -> ApiResult<ChangeEntry> {
    with_workspace(&state, |ws| Ok(ws.working().undo()?)).await
}

async fn check(State(state): State<AppState>) -> ApiResult<Vec<PlanViolation>> {
    with_workspace(&state, |ws| Ok(ws.working().check()?)).await
}

pub fn router(workspace: Workspace) -> Router {
    let state = AppState {
        workspace: Arc::new(Mutex::new(workspace)),
    };
    Router::new()
        .route("/v1/plans/initial", post(plan_initial))
        .route("/v1/plans/rolling", post(plan_rolling))
        .route("/v1/state", get(show_state))
        .route("/v1/working/init", post(init_working))
        .route("/v1/working/activate", post(activate_working))
        .route("/v1/active/parent", post(activate_parent))
        .route("/v1/working/add", post(add_task))
        .route("/v1/working/remove", post(remove_task))
        .route("/v1/working/switch", post(switch_task))
        .route("/v1/working/undo", post(undo))
        .route("/v1/working/check", get(check))
        .with_state(state)
}

pub async fn run_server(workspace: Workspace) -> std::io::Result<()> {
    let bind = workspace.config().server.bind.clone();
    let app = router(workspace);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await
}
