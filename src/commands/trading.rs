use crate::dashboard::gate::{
    engine_gate_key, position_gate_key, MutationOutcome, STRATEGY_GATE_KEY,
    STRATEGY_PARAMS_GATE_KEY,
};
use crate::dashboard::snapshot::RefreshScope;
use crate::dashboard::types::MutationAck;
use crate::dashboard::upstream::{normalize_engine_id, normalize_order_id, StartStrategyArgs};
use crate::error::AppError;
use crate::state::DashboardSession;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategyParamsArgs {
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Acknowledged writes are not trusted as state: the session re-pulls instead.
fn settle(
    session: &DashboardSession,
    action: &'static str,
    outcome: MutationOutcome<Result<MutationAck, AppError>>,
) -> Result<MutationOutcome<MutationAck>, AppError> {
    match outcome {
        MutationOutcome::AlreadyInFlight => Ok(MutationOutcome::AlreadyInFlight),
        MutationOutcome::Completed(Ok(ack)) => {
            info!(action, status = %ack.status, "mutation accepted");
            session.refresh.request(RefreshScope::All);
            Ok(MutationOutcome::Completed(ack))
        }
        MutationOutcome::Completed(Err(error)) => {
            warn!(action, %error, "mutation rejected");
            Err(error)
        }
    }
}

pub async fn close_position(
    session: &DashboardSession,
    order_id: &str,
) -> Result<MutationOutcome<MutationAck>, AppError> {
    let order_id = normalize_order_id(order_id)?;
    let outcome = session
        .gate
        .run(
            &position_gate_key(&order_id),
            session.api.close_position(&order_id),
        )
        .await;

    if matches!(outcome, MutationOutcome::Completed(Ok(_))) {
        session.inputs.position_removed(order_id);
    }
    settle(session, "close_position", outcome)
}

pub async fn start_strategy(
    session: &DashboardSession,
    args: Option<StartStrategyArgs>,
) -> Result<MutationOutcome<MutationAck>, AppError> {
    let request = args.unwrap_or_default().normalize()?;
    let outcome = session
        .gate
        .run(STRATEGY_GATE_KEY, session.api.start_strategy(&request))
        .await;
    settle(session, "start_strategy", outcome)
}

pub async fn stop_strategy(
    session: &DashboardSession,
) -> Result<MutationOutcome<MutationAck>, AppError> {
    let outcome = session
        .gate
        .run(STRATEGY_GATE_KEY, session.api.stop_strategy())
        .await;
    settle(session, "stop_strategy", outcome)
}

/// Stops one engine. Stops of different engines run concurrently.
pub async fn stop_engine(
    session: &DashboardSession,
    engine_id: &str,
) -> Result<MutationOutcome<MutationAck>, AppError> {
    let engine_id = normalize_engine_id(engine_id)?;
    let outcome = session
        .gate
        .run(
            &engine_gate_key(&engine_id),
            session.api.stop_engine(&engine_id),
        )
        .await;
    settle(session, "stop_engine", outcome)
}

pub async fn stop_all_engines(
    session: &DashboardSession,
) -> Result<MutationOutcome<MutationAck>, AppError> {
    let outcome = session
        .gate
        .run(STRATEGY_GATE_KEY, session.api.stop_all_engines())
        .await;
    settle(session, "stop_all_engines", outcome)
}

pub async fn update_strategy_params(
    session: &DashboardSession,
    args: UpdateStrategyParamsArgs,
) -> Result<MutationOutcome<MutationAck>, AppError> {
    if args.params.is_empty() {
        return Err(AppError::InvalidArgument(
            "params must contain at least one entry".to_string(),
        ));
    }

    let outcome = session
        .gate
        .run(
            STRATEGY_PARAMS_GATE_KEY,
            session.api.update_strategy_params(&args.params),
        )
        .await;
    settle(session, "update_strategy_params", outcome)
}
