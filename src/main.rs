use actix_web::{middleware, web, App, HttpServer};
use gradeflow::api;
use gradeflow::audit::InMemoryAuditStore;
use gradeflow::config::AppConfig;
use gradeflow::db::{MongoClient, MongoSubmissionRepository};
use gradeflow::event_bus::EventBus;
use gradeflow::exam::InMemoryExamStore;
use gradeflow::feedback::InMemoryFeedbackStore;
use gradeflow::grading::GradingEngine;
use gradeflow::image_store::InMemoryImageStore;
use gradeflow::llm::gemini::GeminiEvaluatorClient;
use gradeflow::llm::LlmEvaluator;
use gradeflow::ocr::OcrStage;
use gradeflow::pipeline::PipelineService;
use gradeflow::shutdown::shutdown_signal;
use gradeflow::store::{InMemorySubmissionStore, SubmissionRepository};
use gradeflow::vision::gemini::GeminiVisionClient;
use gradeflow::vision::VisionProvider;
use gradeflow::worker::WorkerPool;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gradeflow=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().expect("failed to load configuration");

    let store: Arc<dyn SubmissionRepository> = if let Some(ref database_url) = config.mongo.database_url {
        match MongoClient::new(database_url.expose_secret(), &config.mongo.database_name).await {
            Ok(client) => {
                tracing::info!("MongoDB connected, using durable submission store");
                Arc::new(MongoSubmissionRepository::new(client))
            }
            Err(e) => {
                tracing::warn!("failed to connect to MongoDB ({e}), falling back to in-memory submission store");
                InMemorySubmissionStore::new()
            }
        }
    } else {
        tracing::info!("DATABASE_URL not configured, using in-memory submission store");
        InMemorySubmissionStore::new()
    };

    let exams = InMemoryExamStore::new();
    let audit = InMemoryAuditStore::new();
    let events = EventBus::new();
    let feedback = InMemoryFeedbackStore::new();
    let images: Arc<dyn gradeflow::image_store::ImageStore> = InMemoryImageStore::new();

    let vision: Arc<dyn VisionProvider> = match &config.providers.gemini_api_key {
        Some(key) => Arc::new(GeminiVisionClient::new(
            key.clone(),
            config.providers.default_timeout_secs,
        )),
        None => {
            tracing::warn!("GEMINI_API_KEY not set, OCR calls will fail until configured");
            Arc::new(GeminiVisionClient::new(
                secrecy::SecretString::from(String::new()),
                config.providers.default_timeout_secs,
            ))
        }
    };

    let evaluator: Arc<dyn LlmEvaluator> = match &config.providers.gemini_api_key {
        Some(key) => Arc::new(GeminiEvaluatorClient::new(
            key.clone(),
            config.providers.default_timeout_secs,
        )),
        None => Arc::new(GeminiEvaluatorClient::new(
            secrecy::SecretString::from(String::new()),
            config.providers.default_timeout_secs,
        )),
    };

    let pool = Arc::new(WorkerPool::start(
        config.pipeline.worker_pool_size,
        config.pipeline.worker_queue_capacity,
    ));

    let ocr_stage = Arc::new(OcrStage::new(
        store.clone(),
        audit.clone(),
        events.clone(),
        images,
        vision,
        config.pipeline.ocr_deadline_secs,
    ));

    let grading_engine = Arc::new(GradingEngine::new(
        store.clone(),
        audit.clone(),
        events.clone(),
        evaluator,
    ));

    let pipeline = PipelineService::new(
        store.clone(),
        exams,
        audit,
        events,
        feedback,
        pool,
        ocr_stage,
        grading_engine,
    );

    let swept = pipeline.recover().await.expect("startup recovery sweep failed");
    if !swept.is_empty() {
        tracing::warn!(count = swept.len(), "swept stuck submissions to failed on startup");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("starting server at http://{}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .app_data(web::Data::new(pipeline.clone()))
            .configure(api::configure)
    })
    .bind(&bind_addr)?
    .run();

    tokio::select! {
        result = server => result,
        _ = shutdown_signal() => {
            tracing::info!("shutting down gracefully");
            Ok(())
        }
    }
}
