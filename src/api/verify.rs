use axum::{
    extract::{Path, Query, State},
    response::Redirect,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::api::checkout::CheckoutApiState;

/// GET /pay/{provider}/verify?sxref={reference}
///
/// Browser-return leg of the checkout. Races the provider webhook on the
/// same ledger row; both sides are safe to run redundantly.
pub async fn verify_return(
    State(state): State<Arc<CheckoutApiState>>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Redirect {
    let reference = params.get("sxref").cloned().unwrap_or_default();
    info!(provider = %provider, reference = %reference, "payer returned from provider");

    let target = state
        .flow
        .verify_return(&provider, &reference, &params)
        .await;
    Redirect::to(&target)
}
