use crate::api::AppState;
use crate::db::{PositionFilter, PositionSummary};
use crate::domain::{Account, Instrument, MemberExecution, Position, PositionId, PositionStatus};
use crate::error::AppError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const MAX_LIMIT: i64 = 1_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsQuery {
    pub account: Option<String>,
    pub instrument: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    /// Attach each position's members to the listing.
    #[serde(default)]
    pub include_executions: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub positions: Vec<PositionDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub id: String,
    pub account: String,
    pub instrument: String,
    pub position_type: String,
    pub position_status: String,
    pub entry_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time_ms: Option<i64>,
    pub total_quantity: i64,
    pub max_quantity: i64,
    pub open_quantity: i64,
    pub average_entry_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_exit_price: Option<String>,
    pub total_points_pnl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_dollars_pnl: Option<String>,
    pub total_commission: String,
    pub execution_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executions: Option<Vec<MemberExecutionDto>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberExecutionDto {
    pub dedup_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub side: String,
    pub quantity: i64,
    pub execution_quantity: i64,
    pub price: String,
    pub commission: String,
    pub time_ms: i64,
}

impl From<&MemberExecution> for MemberExecutionDto {
    fn from(member: &MemberExecution) -> Self {
        let exec = &member.execution;
        MemberExecutionDto {
            dedup_key: exec.dedup_key.clone(),
            execution_id: exec.execution_id.clone(),
            side: exec.side.as_str().to_string(),
            quantity: member.quantity,
            execution_quantity: exec.quantity,
            price: exec.price.to_canonical_string(),
            commission: member.commission.to_canonical_string(),
            time_ms: exec.timestamp.as_ms(),
        }
    }
}

impl PositionDto {
    fn from_position(position: &Position, execution_count: i64, with_members: bool) -> Self {
        PositionDto {
            id: position.id.to_string(),
            account: position.account.as_str().to_string(),
            instrument: position.instrument.as_str().to_string(),
            position_type: position.position_type.as_str().to_string(),
            position_status: position.position_status.as_str().to_string(),
            entry_time_ms: position.entry_time.as_ms(),
            exit_time_ms: position.exit_time.map(|t| t.as_ms()),
            total_quantity: position.total_quantity,
            max_quantity: position.max_quantity,
            open_quantity: position.open_quantity,
            average_entry_price: position.average_entry_price.to_canonical_string(),
            average_exit_price: position
                .average_exit_price
                .map(|p| p.to_canonical_string()),
            total_points_pnl: position.total_points_pnl.to_canonical_string(),
            total_dollars_pnl: position
                .total_dollars_pnl
                .map(|p| p.to_canonical_string()),
            total_commission: position.total_commission.to_canonical_string(),
            execution_count,
            executions: with_members
                .then(|| position.executions.iter().map(MemberExecutionDto::from).collect()),
        }
    }
}

pub async fn list_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let status = match params.status.as_deref() {
        Some(s) => Some(
            PositionStatus::from_str(s)
                .map_err(|_| AppError::BadRequest("status must be Open or Closed".into()))?,
        ),
        None => None,
    };
    if let Some(limit) = params.limit {
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
    }

    let filter = PositionFilter {
        account: params.account.map(Account::new),
        instrument: params.instrument.map(Instrument::new),
        status,
        limit: params.limit,
    };

    let positions = if params.include_executions {
        state
            .repo
            .query_positions(&filter)
            .await
            .map_err(|e| AppError::Internal(format!("Position query failed: {}", e)))?
            .iter()
            .map(|p| PositionDto::from_position(p, p.executions.len() as i64, true))
            .collect()
    } else {
        state
            .repo
            .query_position_summaries(&filter)
            .await
            .map_err(|e| AppError::Internal(format!("Position query failed: {}", e)))?
            .iter()
            .map(|PositionSummary { position, execution_count }| {
                PositionDto::from_position(position, *execution_count, false)
            })
            .collect()
    };

    Ok(Json(PositionsResponse { positions }))
}

pub async fn get_position(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PositionDto>, AppError> {
    let id = PositionId::parse(&id)
        .map_err(|_| AppError::BadRequest("Invalid position id".into()))?;

    let position = state
        .repo
        .get_position(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("position {id}")))?;

    let execution_count = position.executions.len() as i64;
    Ok(Json(PositionDto::from_position(&position, execution_count, true)))
}
