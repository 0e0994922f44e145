//! HTTP surface for the certification lifecycle.
//!
//! Handlers are a thin translation layer: deserialize the command payload,
//! call the engine, map the typed error onto a status code. Authentication is
//! upstream; requests carry the already-resolved actor.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::audit::ChecklistResponse;
use super::domain::{
    Actor, ApplicationId, DocumentDescriptor, FarmProfile, PaymentPhaseKind, Role,
};
use super::engine::{EngineError, WorkflowEngine};
use super::repository::{
    ApplicationRepository, CertificateStore, EventPublisher, PaymentGateway, PdfService,
    QrService, SequenceCounter,
};

/// Actor identification carried on each mutating request.
#[derive(Debug, Clone, Deserialize)]
pub struct ActorPayload {
    pub actor_id: String,
    pub role: Role,
}

impl ActorPayload {
    fn to_actor(&self) -> Actor {
        Actor::new(self.actor_id.clone(), self.role)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub farmer_id: String,
    pub farm: FarmProfile,
    #[serde(default)]
    pub documents: Vec<DocumentDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
}

#[derive(Debug, Deserialize)]
pub struct ReviewDecisionRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub phase: PaymentPhaseKind,
    pub payment_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleInspectionRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteInspectionRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
    pub responses: Vec<ChecklistResponse>,
}

#[derive(Debug, Deserialize)]
pub struct FinalApprovalRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
    pub signature: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    #[serde(flatten)]
    pub actor: ActorPayload,
    #[serde(default)]
    pub validity_months: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub code: String,
}

/// Router builder exposing the lifecycle endpoints.
pub fn certification_router<R, C, S, G, E, Q, P>(
    engine: Arc<WorkflowEngine<R, C, S, G, E, Q, P>>,
) -> Router
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    Router::new()
        .route(
            "/api/v1/certification/applications",
            post(create_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/submit",
            post(submit_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/review/approve",
            post(approve_review_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/review/revision",
            post(revision_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/payments/confirm",
            post(confirm_payment_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/payments/phase2",
            post(request_phase2_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/inspection/schedule",
            post(schedule_inspection_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/inspection/complete",
            post(complete_inspection_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/approve",
            post(final_approval_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/reject",
            post(reject_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/applications/:id/status",
            get(status_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/certificates/:number/renew",
            post(renew_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/certificates/:number/verify",
            get(verify_handler::<R, C, S, G, E, Q, P>),
        )
        .route(
            "/api/v1/certification/sweep",
            post(sweep_handler::<R, C, S, G, E, Q, P>),
        )
        .with_state(engine)
}

fn error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::NotEligible(_) => StatusCode::CONFLICT,
        EngineError::ConcurrentModification => StatusCode::CONFLICT,
        EngineError::NotFound => StatusCode::NOT_FOUND,
        EngineError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let payload = json!({
        "error": err.to_string(),
        "kind": err.kind(),
    });
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn create_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    axum::Json(request): axum::Json<CreateApplicationRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    match engine
        .create_application(&request.farmer_id, request.farm, request.documents)
        .await
    {
        Ok(application) => (StatusCode::CREATED, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn submit_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<ActorRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .submit_application(&ApplicationId(id), &actor)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn approve_review_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<ReviewDecisionRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .approve_for_payment(&ApplicationId(id), &actor, request.notes)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn revision_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<RevisionRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .request_revision(&ApplicationId(id), &actor, request.reasons, request.notes)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn confirm_payment_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<ConfirmPaymentRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    match engine
        .confirm_payment(&ApplicationId(id), request.phase, &request.payment_reference)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn request_phase2_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<ActorRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .request_phase2_payment(&ApplicationId(id), &actor)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn schedule_inspection_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<ScheduleInspectionRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .schedule_inspection(&ApplicationId(id), &actor, request.scheduled_at, request.notes)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn complete_inspection_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<CompleteInspectionRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .complete_inspection(&ApplicationId(id), &actor, request.responses)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn final_approval_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<FinalApprovalRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .final_approval(&ApplicationId(id), &actor, &request.signature, request.notes)
        .await
    {
        Ok((application, certificate)) => (
            StatusCode::OK,
            axum::Json(json!({
                "application": application,
                "certificate": certificate,
            })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn reject_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<RejectRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .reject_application(&ApplicationId(id), &actor, request.reason)
        .await
    {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    match engine.workflow_status(&ApplicationId(id)).await {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn renew_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(number): Path<String>,
    axum::Json(request): axum::Json<RenewRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    let actor = request.actor.to_actor();
    match engine
        .renew_certificate(&number, &actor, request.validity_months)
        .await
    {
        Ok(certificate) => (StatusCode::CREATED, axum::Json(certificate)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn verify_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
    Path(number): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    match engine.verify_certificate(&number, &query.code).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn sweep_handler<R, C, S, G, E, Q, P>(
    State(engine): State<Arc<WorkflowEngine<R, C, S, G, E, Q, P>>>,
) -> Response
where
    R: ApplicationRepository + 'static,
    C: CertificateStore + 'static,
    S: SequenceCounter + 'static,
    G: PaymentGateway + 'static,
    E: EventPublisher + 'static,
    Q: QrService + 'static,
    P: PdfService + 'static,
{
    match engine.expire_overdue(Utc::now()).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}
