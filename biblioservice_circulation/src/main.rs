use std::env;
use std::sync::Arc;

use actix_web::{App, HttpServer};
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime::TokioCurrentThread;
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use biblioservice_auth::{TokenConfig, ROLE_ADMIN};
use biblioservice_circulation::app_config::config_app;
use biblioservice_circulation::book_availability_checker::BookAvailabilityChecker;
use biblioservice_circulation::circulation_repository::{
    CirculationRepository, InMemoryCirculationRepository, PostgresCirculationRepository,
    PostgresCirculationRepositoryConfig, StudentRecord,
};
use biblioservice_circulation::hold_sweeper::HoldSweeper;
use biblioservice_circulation::policy::CirculationPolicy;

// Based on https://github.com/LukeMathWalker/tracing-actix-web/blob/main/examples/opentelemetry/src/main.rs#L15
fn init_telemetry() {
    let app_name = "biblioservice_circulation";

    // Start a new Jaeger trace pipeline.
    // Spans are exported in batch - recommended setup for a production application.
    global::set_text_map_propagator(TraceContextPropagator::new());
    #[allow(deprecated)]
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(app_name)
        .install_batch(TokioCurrentThread)
        .expect("Failed to install OpenTelemetry tracer.");

    // Filter based on level - trace, debug, info, warn, error
    // Tunable via `RUST_LOG` env variable
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    // Create a `tracing` layer using the Jaeger tracer
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    // Create a `tracing` layer to emit spans as structured logs to stdout
    let formatting_layer = BunyanFormattingLayer::new(app_name.into(), std::io::stdout);
    // Combined them all together in a `tracing` subscriber
    let subscriber = Registry::default()
        .with(env_filter)
        .with(telemetry)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to install `tracing` subscriber.")
}

/// Creates the admin account on first start so the console is usable
async fn seed_admin_account(repository: &Arc<dyn CirculationRepository>) -> anyhow::Result<()> {
    let username = env::var("ADMIN_USERNAME").unwrap_or("admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or("admin".to_string());

    if repository
        .get_student_by_username(username.clone())
        .await?
        .is_some()
    {
        return Ok(());
    }

    let password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;
    let admin_id = repository
        .add_student(StudentRecord {
            username: username.clone(),
            email: format!("{}@biblioservice.local", username),
            password_hash,
            role: ROLE_ADMIN.to_string(),
        })
        .await?;
    tracing::info!("Seeded admin account {} with id {}", username, admin_id);
    Ok(())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();
    println!("starting HTTP server at http://localhost:8080");

    let use_in_memory_db = env::var("USE_IN_MEMORY_DB")
        .map(|value| value.to_lowercase() == "true")
        .unwrap_or_default();
    let pg_hostname = env::var("DB_HOST").unwrap_or("127.0.0.1".to_string());
    let pg_username = env::var("DB_USERNAME").unwrap_or("postgres".to_string());
    let pg_password = env::var("DB_PASSWORD").unwrap_or("postgres".to_string());
    let catalog_url = env::var("CATALOG_URL").unwrap_or("http://localhost:8080".to_string());

    let circulation_repository: Arc<dyn CirculationRepository> = if use_in_memory_db {
        Arc::new(InMemoryCirculationRepository::default())
    } else {
        Arc::new(
            PostgresCirculationRepository::init(PostgresCirculationRepositoryConfig {
                hostname: pg_hostname,
                username: pg_username,
                password: pg_password,
            })
            .await
            .expect("Failed to init postgres"),
        )
    };

    let policy = CirculationPolicy::from_env().expect("Failed to load circulation policy");
    let token_config = TokenConfig::from_env();

    seed_admin_account(&circulation_repository)
        .await
        .expect("Failed to seed admin account");

    let sweeper = HoldSweeper::new(circulation_repository.clone(), policy.clone());
    tokio::spawn(async move {
        if let Err(err) = sweeper.start().await {
            tracing::error!("Hold sweeper stopped {}", err);
        }
    });

    let availability_checker = web::Data::new(
        BookAvailabilityChecker::new(catalog_url).expect("Failed to create availability checker"),
    );

    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(web::Data::new(circulation_repository.clone()))
            .app_data(availability_checker.clone())
            .app_data(web::Data::new(policy.clone()))
            .app_data(web::Data::new(token_config.clone()))
            .wrap(TracingLogger::default())
            .configure(config_app)
            .with_json_spec_at("/apispec/v2")
            .build()
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
