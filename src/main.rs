use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::info;

use gacp_certify::config::AppConfig;
use gacp_certify::error::AppError;
use gacp_certify::telemetry;
use gacp_certify::workflows::certification::memory::{
    InMemoryApplicationRepository, InMemoryCertificateStore, InMemorySequences, InlineQrService,
    LoggingEventPublisher, MockPaymentGateway, NoopPdfService, RecordingEventPublisher,
};
use gacp_certify::workflows::certification::{
    certification_router, transition_table, Actor, ChecklistAnswer, ChecklistResponse,
    DocumentCategory, DocumentDescriptor, FarmProfile, PaymentPhaseKind, Role, WorkflowEngine,
};

#[derive(Parser, Debug)]
#[command(
    name = "GACP Certification Engine",
    about = "Run the GACP certification lifecycle service from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Print the legal transition table
    Transitions,
    /// Run an end-to-end lifecycle demo against in-memory storage
    Demo,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => serve(args).await,
        Command::Transitions => {
            print_transitions();
            Ok(())
        }
        Command::Demo => demo().await,
    }
}

fn build_engine() -> (
    Arc<
        WorkflowEngine<
            InMemoryApplicationRepository,
            InMemoryCertificateStore,
            InMemorySequences,
            MockPaymentGateway,
            RecordingEventPublisher,
            InlineQrService,
            NoopPdfService,
        >,
    >,
    Arc<RecordingEventPublisher>,
    gacp_certify::config::CertificationConfig,
) {
    let config = AppConfig::load()
        .map(|app| app.certification)
        .unwrap_or_default();
    let events = Arc::new(RecordingEventPublisher::new());
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryApplicationRepository::new()),
        Arc::new(InMemoryCertificateStore::new()),
        Arc::new(InMemorySequences::new()),
        Arc::new(MockPaymentGateway::new()),
        events.clone(),
        Arc::new(InlineQrService),
        Arc::new(NoopPdfService),
        config.clone(),
    ));
    (engine, events, config)
}

async fn serve(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = telemetry::metrics();

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryApplicationRepository::new()),
        Arc::new(InMemoryCertificateStore::new()),
        Arc::new(InMemorySequences::new()),
        Arc::new(MockPaymentGateway::new()),
        Arc::new(LoggingEventPublisher),
        Arc::new(InlineQrService),
        Arc::new(NoopPdfService),
        config.certification.clone(),
    ));

    let app = certification_router(engine)
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(prometheus_handle))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(?config.environment, %addr, "certification lifecycle service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_endpoint(Extension(metrics): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

fn print_transitions() {
    println!("Legal lifecycle transitions");
    for (from, to, roles) in transition_table() {
        let roles: Vec<&str> = roles.iter().map(|role| role.label()).collect();
        println!("- {} -> {} [{}]", from.label(), to.label(), roles.join(", "));
    }
    println!("- <any non-terminal> -> rejected [staff, SYSTEM]");
    println!("- <any non-terminal or issued> -> expired [SYSTEM]");
}

async fn demo() -> Result<(), AppError> {
    let (engine, events, _config) = build_engine();

    let farmer = Actor::new("farmer-001", Role::Farmer);
    let reviewer = Actor::new("reviewer-001", Role::DtamReviewer);
    let inspector = Actor::new("inspector-001", Role::DtamInspector);
    let admin = Actor::new("admin-001", Role::DtamAdmin);

    println!("GACP certification lifecycle demo");

    let application = engine
        .create_application(
            &farmer.id,
            FarmProfile {
                farm_name: "Baan Suan Herb Farm".to_string(),
                owner_name: "Somchai J.".to_string(),
                province: "Chiang Mai".to_string(),
                crop: "Turmeric".to_string(),
                area_rai: 12.5,
            },
            vec![
                DocumentDescriptor {
                    name: "Land deed".to_string(),
                    category: DocumentCategory::LandDeed,
                    storage_key: "demo/land-deed".to_string(),
                },
                DocumentDescriptor {
                    name: "Water test report".to_string(),
                    category: DocumentCategory::WaterTestReport,
                    storage_key: "demo/water-test".to_string(),
                },
            ],
        )
        .await?;
    let id = application.id.clone();
    println!("- Created {} in state {}", application.application_number, application.state.label());

    let application = engine.submit_application(&id, &farmer).await?;
    println!("- Submitted -> {}", application.state.label());

    let application = engine.approve_for_payment(&id, &reviewer, None).await?;
    let invoice = application
        .payment_phase1
        .as_ref()
        .map(|phase| phase.invoice_id.clone())
        .unwrap_or_default();
    println!("- Review approved -> {} (invoice {invoice})", application.state.label());

    let application = engine
        .confirm_payment(&id, PaymentPhaseKind::Phase1, "BANK-REF-0001")
        .await?;
    println!("- Phase 1 fee confirmed -> {}", application.state.label());

    let application = engine
        .schedule_inspection(&id, &inspector, Utc::now(), None)
        .await?;
    println!("- Inspection scheduled -> {}", application.state.label());

    let responses: Vec<ChecklistResponse> = (1..=10)
        .map(|item| ChecklistResponse {
            item_code: format!("GACP-{item:02}"),
            answer: ChecklistAnswer::Pass,
            is_critical: item <= 3,
        })
        .collect();
    let application = engine.complete_inspection(&id, &inspector, responses).await?;
    let score = application
        .audit
        .as_ref()
        .map(|audit| audit.category_score)
        .unwrap_or_default();
    println!("- Inspection completed -> {} (score {score:.1})", application.state.label());

    let application = engine.request_phase2_payment(&id, &reviewer).await?;
    println!("- Phase 2 fee requested -> {}", application.state.label());

    let application = engine
        .confirm_payment(&id, PaymentPhaseKind::Phase2, "BANK-REF-0002")
        .await?;
    println!("- Phase 2 fee confirmed -> {}", application.state.label());

    let (application, certificate) = engine
        .final_approval(&id, &admin, "somsak.dtam", None)
        .await?;
    println!(
        "- Approved -> {} (certificate {}, valid until {})",
        application.state.label(),
        certificate.certificate_number,
        certificate.expiry_date.date_naive()
    );

    let outcome = engine
        .verify_certificate(&certificate.certificate_number, &certificate.verification_code)
        .await?;
    println!("- Public verification: valid={} status={}", outcome.valid, outcome.status);

    println!("\nPublished events");
    for event in events.events() {
        match serde_json::to_string(&event) {
            Ok(body) => println!("- {body}"),
            Err(err) => println!("- <unserializable event: {err}>"),
        }
    }

    Ok(())
}
