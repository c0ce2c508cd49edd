//! `GET /authorize` handler.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use tracing::debug;

use crate::flow::{AuthenticatedUser, AuthorizeOutcome, AuthorizeRejection, AuthorizeReply};
use crate::http::{OpState, SESSION_COOKIE};
use crate::oauth::authorize::AuthorizationRequest;

/// Authorization endpoint: flow engine entry.
///
/// A valid session cookie supplies the authenticated user; otherwise the
/// engine parks the request in a flow and the user is sent to the login
/// page with its `flow_id`.
pub async fn authorize_handler(
    State(state): State<OpState>,
    jar: CookieJar,
    Query(request): Query<AuthorizationRequest>,
) -> Response {
    let user = match jar.get(SESSION_COOKIE) {
        Some(cookie) => match state.sessions.get(cookie.value()).await {
            Ok(session) => Some(AuthenticatedUser {
                user_id: session.user_id.clone(),
                sub: session.user_id,
                auth_time: session.created_at / 1_000,
                amr: session.amr,
                acr: session.acr,
            }),
            Err(_) => None,
        },
        None => None,
    };

    match state.engine.authorize(request, &state.tenant, user).await {
        Ok(AuthorizeOutcome::Complete(reply)) => render_reply(reply),
        Ok(AuthorizeOutcome::LoginRequired { flow_id }) => {
            debug!(flow_id, "redirecting to login");
            Redirect::to(&format!("/login?flow_id={flow_id}")).into_response()
        }
        Ok(AuthorizeOutcome::ConsentRequired { flow_id }) => {
            debug!(flow_id, "redirecting to consent");
            Redirect::to(&format!("/consent?flow_id={flow_id}")).into_response()
        }
        Err(AuthorizeRejection::Redirect(reply)) => render_reply(reply),
        Err(AuthorizeRejection::Page { code, description }) => error_page(code.as_str(), &description),
    }
}

fn render_reply(reply: AuthorizeReply) -> Response {
    match reply {
        AuthorizeReply::Redirect(location) => Redirect::to(&location).into_response(),
        AuthorizeReply::FormPost(html) => Html(html).into_response(),
    }
}

/// Error page for requests whose redirect URI cannot be trusted.
fn error_page(code: &str, description: &str) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Error</title></head>
<body>
<h1>Authorization Error</h1>
<p><strong>{}</strong>: {}</p>
</body>
</html>"#,
        escape(code),
        escape(description)
    );
    (StatusCode::BAD_REQUEST, Html(body)).into_response()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
