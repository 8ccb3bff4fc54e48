use crate::api::AppState;
use crate::domain::{Account, Instrument};
use crate::error::AppError;
use crate::orchestration::RebuildSummary;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildQuery {
    pub account: Option<String>,
    pub instrument: Option<String>,
}

/// Rebuild one partition when both `account` and `instrument` are given,
/// otherwise every partition.
///
/// A single-partition integrity violation answers 409 and leaves the stored
/// positions as they were.
pub async fn trigger_rebuild(
    Query(params): Query<RebuildQuery>,
    State(state): State<AppState>,
) -> Result<Json<RebuildSummary>, AppError> {
    match (params.account, params.instrument) {
        (Some(account), Some(instrument)) => {
            let account = Account::new(account);
            let instrument = Instrument::new(instrument);
            info!(account = %account, instrument = %instrument, "Rebuild requested");
            let report = state.orchestrator.rebuild(&account, &instrument).await?;
            Ok(Json(RebuildSummary {
                rebuilt: vec![report],
                failed: Vec::new(),
            }))
        }
        (None, None) => {
            info!("Rebuild of all partitions requested");
            Ok(Json(state.orchestrator.rebuild_all().await?))
        }
        _ => Err(AppError::BadRequest(
            "account and instrument must be given together".into(),
        )),
    }
}
