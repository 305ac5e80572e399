//! Gate server: every path is checked against the policy and, when allowed,
//! answered with an empty `200 OK`. `/healthz` stays outside the gate.
use crate::authz::web::{protect, Gate, SubjectSource};
use crate::authz::Enforcer;
use crate::settings::Settings;
use axum::http::{HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use miette::IntoDiagnostic;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Build the router: gated catch-all plus ungated health check.
pub fn router(enforcer: Arc<Enforcer>, subject: SubjectSource) -> Router {
    let gated = Router::new()
        .route("/", any(allowed))
        .route("/{*path}", any(allowed));
    protect(gated, Gate::new(enforcer, subject)).route("/healthz", get(health))
}

pub async fn serve(settings: Settings, enforcer: Arc<Enforcer>) -> miette::Result<()> {
    let subject = match &settings.authz.subject_header {
        Some(name) => SubjectSource::Header(
            HeaderName::try_from(name.as_str())
                .map_err(|e| miette::miette!("bad subject_header `{name}`: {e}"))?,
        ),
        None => SubjectSource::BasicAuth,
    };

    if let Some(secs) = settings.authz.reload_interval_secs.filter(|s| *s > 0) {
        spawn_reloader(enforcer.clone(), Duration::from_secs(secs));
    }

    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let router = router(enforcer, subject);

    tracing::info!(%addr, "Authorization gate listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

/// Periodically re-read the policy file. A failed reload keeps serving the
/// last good policy.
fn spawn_reloader(enforcer: Arc<Enforcer>, every: Duration) {
    tracing::info!(interval_secs = every.as_secs(), "Periodic policy reload enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick fires immediately; the policy was just loaded
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let enforcer = enforcer.clone();
            match tokio::task::spawn_blocking(move || enforcer.reload()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Policy reload failed, keeping previous policy"),
                Err(e) => tracing::warn!(error = %e, "Policy reload task panicked"),
            }
        }
    });
}

async fn allowed() -> impl IntoResponse {
    StatusCode::OK
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
