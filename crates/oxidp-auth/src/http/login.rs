//! `POST /login` and `POST /consent` handlers.
//!
//! These complete the interactive steps of a parked `/authorize` flow. The
//! pages that post here are rendered elsewhere; the handlers only verify
//! credentials, record consent, and resume the flow.

use axum::Form;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;
use tracing::debug;

use crate::flow::{AuthorizeOutcome, AuthorizeRejection, AuthorizeReply, LoginSuccess};
use crate::http::{OpState, SESSION_COOKIE};

/// Form body of a login submission.
#[derive(Debug, Deserialize)]
pub struct LoginSubmission {
    /// The parked flow to resume.
    pub flow_id: String,

    /// Challenge kind: `otp`, `magic_link`, `webauthn`.
    pub challenge_type: String,

    /// Challenge session key (the `{kind}:{session_key}` suffix).
    pub session_key: String,

    /// The submitted secret.
    pub code: String,
}

/// Form body of a consent decision.
#[derive(Debug, Deserialize)]
pub struct ConsentSubmission {
    /// The parked flow to resume.
    pub flow_id: String,

    /// Whether the user approved.
    pub approve: bool,
}

/// Login submission: verifies the challenge, opens the session, resumes
/// the flow.
pub async fn login_handler(
    State(state): State<OpState>,
    jar: CookieJar,
    Form(submission): Form<LoginSubmission>,
) -> Response {
    let LoginSuccess { session_id, user } = match state
        .login
        .verify_challenge(
            &state.tenant.tenant_id,
            &submission.challenge_type,
            &submission.session_key,
            &submission.code,
        )
        .await
    {
        Ok(success) => success,
        Err(e) => {
            debug!(error = %e, "login challenge failed");
            return error_page("access_denied", &e.wire_description());
        }
    };

    let same_site = if state.config.cookie_same_site_none {
        SameSite::None
    } else {
        SameSite::Lax
    };
    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(same_site)
        .build();
    let jar = jar.add(cookie);

    let outcome = state
        .engine
        .resume(&submission.flow_id, &state.tenant, user)
        .await;
    (jar, render_outcome(outcome)).into_response()
}

/// Consent decision: records or denies, then resumes or abandons the flow.
pub async fn consent_handler(
    State(state): State<OpState>,
    jar: CookieJar,
    Form(submission): Form<ConsentSubmission>,
) -> Response {
    let Some(session_cookie) = jar.get(SESSION_COOKIE) else {
        return error_page("access_denied", "no active session");
    };
    let session = match state.sessions.get(session_cookie.value()).await {
        Ok(session) => session,
        Err(_) => return error_page("access_denied", "no active session"),
    };

    if !submission.approve {
        return match state.engine.deny(&submission.flow_id, &state.tenant).await {
            Ok(reply) => render_reply(reply),
            Err(rejection) => render_rejection(rejection),
        };
    }

    let (client_id, scope) = match state.engine.flow_info(&submission.flow_id).await {
        Ok(info) => info,
        Err(rejection) => return render_rejection(rejection),
    };
    if let Err(e) = state
        .consent
        .grant(&session.user_id, &client_id, &scope)
        .await
    {
        return error_page("server_error", &e.wire_description());
    }

    let user = crate::flow::AuthenticatedUser {
        user_id: session.user_id.clone(),
        sub: session.user_id,
        auth_time: session.created_at / 1_000,
        amr: session.amr,
        acr: session.acr,
    };
    let outcome = state
        .engine
        .resume(&submission.flow_id, &state.tenant, user)
        .await;
    render_outcome(outcome)
}

fn render_outcome(outcome: Result<AuthorizeOutcome, AuthorizeRejection>) -> Response {
    match outcome {
        Ok(AuthorizeOutcome::Complete(reply)) => render_reply(reply),
        Ok(AuthorizeOutcome::LoginRequired { flow_id }) => {
            Redirect::to(&format!("/login?flow_id={flow_id}")).into_response()
        }
        Ok(AuthorizeOutcome::ConsentRequired { flow_id }) => {
            Redirect::to(&format!("/consent?flow_id={flow_id}")).into_response()
        }
        Err(rejection) => render_rejection(rejection),
    }
}

fn render_reply(reply: AuthorizeReply) -> Response {
    match reply {
        AuthorizeReply::Redirect(location) => Redirect::to(&location).into_response(),
        AuthorizeReply::FormPost(html) => Html(html).into_response(),
    }
}

fn render_rejection(rejection: AuthorizeRejection) -> Response {
    match rejection {
        AuthorizeRejection::Redirect(reply) => render_reply(reply),
        AuthorizeRejection::Page { code, description } => error_page(code.as_str(), &description),
    }
}

fn error_page(code: &str, description: &str) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign-in Error</title></head>
<body>
<h1>Sign-in Error</h1>
<p><strong>{}</strong>: {}</p>
</body>
</html>"#,
        escape(code),
        escape(description)
    );
    (axum::http::StatusCode::BAD_REQUEST, Html(body)).into_response()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
