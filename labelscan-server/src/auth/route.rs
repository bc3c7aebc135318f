use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use minijinja::context;
use serde::Deserialize;

use crate::errors::{WebError, WebResult};
use crate::models::{OnboardingForm, RegisterForm, RegistrationError, User};
use crate::routes::AppState;
use crate::templates::render;

use super::session::{SessionID, UserSession, SESSION_COOKIE};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

fn session_cookie(id: &SessionID, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.as_str().to_owned()))
        .http_only(true)
        .path("/")
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub async fn login_page(session: Option<UserSession>) -> WebResult<Response> {
    if session.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    Ok(render("login.html.jinja", context! {})?.into_response())
}

pub async fn login(
    State(app): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> WebResult<Response> {
    let Some(user) = User::authenticate(&app.db, &form.email, &form.password)? else {
        tracing::info!("Failed login attempt");
        return Ok(render(
            "login.html.jinja",
            context! {
                message => "Invalid email or password",
                email => form.email,
            },
        )?
        .into_response());
    };
    let session = app.sessions.open(&user);
    tracing::info!(user_id = user.user_id, "Logged in");
    let jar = jar.add(session_cookie(&session.id, app.secure_cookies));
    let next = if user.onboarding_complete {
        "/dashboard"
    } else {
        "/onboarding"
    };
    Ok((jar, Redirect::to(next)).into_response())
}

pub async fn register_page(session: Option<UserSession>) -> WebResult<Response> {
    if session.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    Ok(render("register.html.jinja", context! {})?.into_response())
}

pub async fn register(
    State(app): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> WebResult<Response> {
    match User::register(&app.db, &form) {
        Ok(_) => Ok(Redirect::to("/login").into_response()),
        Err(RegistrationError::Database(e)) => Err(WebError::Internal(e)),
        Err(e) => Ok(render(
            "register.html.jinja",
            context! {
                message => e.to_string(),
                first_name => form.first_name,
                last_name => form.last_name,
                email => form.email,
            },
        )?
        .into_response()),
    }
}

pub async fn logout(
    State(app): State<AppState>,
    session: Option<UserSession>,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(session) = session {
        app.sessions.close(&session.id);
    }
    // Clear the session/cookie to log the user out
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/login"))
}

pub async fn onboarding_page(
    State(app): State<AppState>,
    session: Option<UserSession>,
) -> WebResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    let user = User::get_by_id(&app.db, session.user_id)?.ok_or(WebError::NotFound)?;
    if user.onboarding_complete {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    Ok(render(
        "onboarding.html.jinja",
        context! { given_name => session.given_name },
    )?
    .into_response())
}

pub async fn onboarding(
    State(app): State<AppState>,
    session: Option<UserSession>,
    Form(form): Form<OnboardingForm>,
) -> WebResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    let age = form.age.trim();
    if !age.is_empty() && age.parse::<i64>().is_err() {
        return Ok(render(
            "onboarding.html.jinja",
            context! {
                given_name => session.given_name,
                message => "Age must be a whole number.",
            },
        )?
        .into_response());
    }
    User::complete_onboarding(&app.db, session.user_id, &form)?;
    tracing::info!(user_id = session.user_id, "Onboarding complete");
    Ok(Redirect::to("/dashboard").into_response())
}
