use axum::Router;
use mongodb::bson::{doc, oid::ObjectId};
use prepforge_api::{config::Config, create_router, services::AppState};
use std::sync::Arc;

/// Session pre-seeded with two modules, for module-derived topic fallback.
pub const MODULE_SESSION_ID: &str = "65a0000000000000000000a1";

pub async fn create_test_app() -> Router {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    // Load test environment from .env.test
    dotenvy::from_filename(".env.test").ok();

    // Deterministic test behavior: no rate limiting, and an unconfigured
    // supplier key so assembly always engages the local fallback generator.
    std::env::set_var("RATE_LIMIT_DISABLED", "1");
    std::env::set_var("GEMINI_API_KEY", "");
    if std::env::var("MONGO_URI").is_err() {
        std::env::set_var("MONGO_URI", "mongodb://localhost:27017");
    }
    if std::env::var("REDIS_URI").is_err() {
        std::env::set_var("REDIS_URI", "redis://127.0.0.1:6379/0");
    }
    if std::env::var("MONGO_DATABASE").is_err() {
        std::env::set_var("MONGO_DATABASE", "prepforge_test");
    }

    // Load test configuration
    let config = Config::load().expect("Failed to load test configuration");

    eprintln!("Test config loaded - Redis URI: {}", config.redis_uri);

    // Connect to test databases
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");

    eprintln!("MongoDB connected");

    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create test Redis client");

    eprintln!("Redis client created, attempting connection...");

    // Create app state (connection is established inside)
    let app_state = Arc::new(
        AppState::new(config.clone(), mongo_client.clone(), redis_client)
            .await
            .expect("Failed to initialize test app state"),
    );

    eprintln!("AppState initialized successfully");

    // Seed test data
    seed_test_data(&mongo_client, &config.mongo_database).await;

    // Build test router (same as main app)
    create_router(app_state)
}

async fn seed_test_data(mongo_client: &mongodb::Client, db_name: &str) {
    let db = mongo_client.database(db_name);
    let sessions = db.collection::<mongodb::bson::Document>("sessions");

    let session_id = ObjectId::parse_str(MODULE_SESSION_ID).unwrap();

    // Create the module-backed test session if it doesn't exist
    let session_exists = sessions
        .find_one(doc! { "_id": session_id })
        .await
        .unwrap();

    if session_exists.is_none() {
        // Try to insert, ignore duplicate key error (race condition with parallel tests)
        let result = sessions
            .insert_one(doc! {
                "_id": session_id,
                "modules": [
                    { "skill": "Rust Ownership", "module_title": "Module 1" },
                    { "skill": null, "module_title": "Async Foundations" },
                ],
            })
            .await;

        match result {
            Ok(_) => eprintln!("Test session seeded in MongoDB"),
            Err(e) => {
                // Ignore duplicate key error (code 11000)
                if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
                    ref we,
                )) = *e.kind
                {
                    if we.code == 11000 {
                        eprintln!("Test session already exists (inserted by parallel test)");
                        return;
                    }
                }
                panic!("Failed to seed test session: {:?}", e);
            }
        }
    }
}
