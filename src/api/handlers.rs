use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use nanoid::nanoid;
use tracing::{Instrument, error, info, info_span, warn};

use crate::data_models::SearchQuery;
use crate::error::{ErrorKind, FrontendError};

use super::AppState;
use super::models::SearchParams;

pub async fn landing_handler(State(state): State<AppState>) -> Response {
    html_response(StatusCode::OK, state.renderer.render(None, None, None))
}

/// `GET /search`: normalize the parameters, ask the search server, render whatever came back.
///
/// If the browser goes away mid-request the whole future, backend call included, is dropped.
pub async fn handle_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Response {
    let request_id = nanoid!(10);
    let span = info_span!("search", %request_id);
    search(state, params).instrument(span).await
}

async fn search(state: AppState, params: Result<Query<SearchParams>, QueryRejection>) -> Response {
    let params = match params {
        Ok(Query(params)) => params,
        Err(rejection) => {
            warn!(%rejection, "rejected search parameters");
            return error_response(
                &state,
                None,
                &FrontendError::InvalidInput(rejection.body_text()),
            );
        }
    };

    let query = match params.into_query(&state.config) {
        Ok(Some(query)) => query,
        Ok(None) => return html_response(StatusCode::OK, state.renderer.render(None, None, None)),
        Err(e) => {
            warn!(error = %e, "invalid search query");
            return error_response(&state, None, &e);
        }
    };

    info!(
        query = %query.text(),
        page = query.page(),
        page_size = query.page_size(),
        qbs = query.use_quotient_based_scoring(),
        "searching"
    );

    match state.search_client.query(&query).await {
        Ok(page) => {
            info!(
                results = page.items().len(),
                total = page.total_estimate(),
                elapsed = ?page.elapsed(),
                "search completed"
            );
            html_response(
                StatusCode::OK,
                state.renderer.render(Some(&query), Some(&page), None),
            )
        }
        Err(e) => {
            error!(error = %e, "search failed");
            error_response(&state, Some(&query), &e)
        }
    }
}

pub async fn not_found_handler(State(state): State<AppState>) -> Response {
    let kind = ErrorKind::NotFound;
    html_response(kind.status(), state.renderer.render(None, None, Some(kind)))
}

fn error_response(state: &AppState, query: Option<&SearchQuery>, e: &FrontendError) -> Response {
    let kind = e.kind();
    html_response(kind.status(), state.renderer.render(query, None, Some(kind)))
}

fn html_response(status: StatusCode, rendered: Result<String, FrontendError>) -> Response {
    match rendered {
        Ok(body) => (status, Html(body)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render page");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(crate::renderer::INTERNAL_ERROR_PAGE),
            )
                .into_response()
        }
    }
}
