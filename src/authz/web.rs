//! HTTP gate: turns an inbound request into `(subject, path, method)`, asks
//! the enforcer, and either continues or answers `403 Forbidden`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64ct::{Base64, Encoding};

use crate::authz::engine::Enforcer;

/// Where the subject of a request comes from.
#[derive(Debug, Clone)]
pub enum SubjectSource {
    /// Username of an HTTP Basic `Authorization` header.
    BasicAuth,
    /// Raw value of a header set by an upstream authenticator.
    Header(HeaderName),
}

#[derive(Clone)]
pub struct Gate {
    pub enforcer: Arc<Enforcer>,
    pub subject: SubjectSource,
}

impl Gate {
    pub fn new(enforcer: Arc<Enforcer>, subject: SubjectSource) -> Self {
        Self { enforcer, subject }
    }

    /// Subject for a request. Missing or unreadable credentials give the
    /// empty subject, which is evaluated like any other.
    pub fn subject(&self, headers: &HeaderMap) -> String {
        match &self.subject {
            SubjectSource::BasicAuth => basic_auth_username(headers).unwrap_or_default(),
            SubjectSource::Header(name) => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Put every route of `router` behind the gate. Routes added afterwards are
/// not gated.
pub fn protect<S>(router: Router<S>, gate: Gate) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(gate, authorize))
}

pub async fn authorize(State(gate): State<Gate>, request: Request<Body>, next: Next) -> Response {
    let subject = gate.subject(request.headers());
    let Some(object) = request_object(request.uri().path()) else {
        tracing::debug!(path = %request.uri().path(), "undecodable request path");
        return StatusCode::FORBIDDEN.into_response();
    };
    let action = request.method().as_str().to_string();

    match gate.enforcer.enforce(&subject, &object, &action) {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            tracing::debug!(%subject, %object, %action, "request forbidden");
            StatusCode::FORBIDDEN.into_response()
        }
        Err(e) => {
            // never fail open
            tracing::error!(error = %e, %subject, %object, %action, "authorization check failed");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Percent-decoded request path, the form policies are written against.
/// `None` if the decoded bytes are not UTF-8.
pub fn request_object(path: &str) -> Option<String> {
    urlencoding::decode(path).ok().map(|p| p.into_owned())
}

/// Username from `Authorization: Basic base64(user:password)`.
pub fn basic_auth_username(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = Base64::decode_vec(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, _password) = credentials.split_once(':')?;
    Some(user.to_string())
}
