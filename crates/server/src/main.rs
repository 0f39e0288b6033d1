//! CandleCast — continuous-learning trading signal server
//!
//! Usage:
//!   candlecast serve --port 3001     — Launch the prediction API server
//!   candlecast train --samples 200   — Bootstrap the classifier on synthetic data
//!   candlecast stats                 — Print storage and model statistics

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::{
    run_learning_loop, Candle, Classifier, EngineConfig, FeatureVector, HttpAdvisoryClient,
    LearningEvent, LearningSystem, PredictionEngine, SoftmaxClassifier, TrainSettings,
    FEATURE_LEN,
};
use persistence::repository::{CandleRepository, CandleRow, PredictionRepository};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_ADVISORY_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

#[derive(Parser)]
#[command(name = "candlecast")]
#[command(about = "Continuous-learning trading signal engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the prediction API server with the learning loop
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Train the classifier on synthetic random-walk windows
    Train {
        /// Number of synthetic samples to generate
        #[arg(long, default_value_t = 200)]
        samples: usize,
    },
    /// Print storage and model statistics
    Stats,
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    engine: Arc<PredictionEngine>,
    learning: Arc<LearningSystem>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,candlecast=debug")
    } else {
        EnvFilter::new("info,engine=info,candlecast=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("CANDLECAST_DB_PATH").unwrap_or_else(|_| "data/candlecast.db".to_string())
}

fn build_advisory(config: &EngineConfig) -> Option<Arc<dyn engine::AdvisoryService>> {
    let key = std::env::var("CANDLECAST_ADVISORY_KEY").unwrap_or_default();
    if key.is_empty() {
        info!("no advisory key configured, running without advisory");
        return None;
    }
    let url = std::env::var("CANDLECAST_ADVISORY_URL")
        .unwrap_or_else(|_| DEFAULT_ADVISORY_URL.to_string());
    info!(url = %url, "advisory service configured");
    Some(Arc::new(HttpAdvisoryClient::new(
        url,
        key,
        config.advisory_timeout,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Train { samples } => {
            cmd_train(samples).await?;
        }
        Commands::Stats => {
            cmd_stats().await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command — Axum web server plus learning loop
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("CandleCast v{} starting...", APP_VERSION);

    let config = EngineConfig::from_env();
    let db_path = db_path();
    let db = persistence::Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);

    let classifier: Arc<dyn Classifier> = Arc::new(SoftmaxClassifier::load_or_init(
        FEATURE_LEN,
        &config.model_path,
    ));
    let advisory = build_advisory(&config);

    let db = Arc::new(db);
    let engine = Arc::new(PredictionEngine::new(
        db.pool_clone(),
        classifier.clone(),
        advisory,
        config.clone(),
    ));
    let learning = Arc::new(LearningSystem::new(
        db.pool_clone(),
        classifier,
        config.clone(),
    ));

    // Single periodic driver for validate-then-retrain
    tokio::spawn(run_learning_loop(learning.clone()));

    // Log retrain events as they happen
    let mut events = learning.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LearningEvent::RetrainCompleted {
                    version,
                    accuracy,
                    samples,
                } => {
                    info!(version, accuracy, samples, "classifier retrained");
                }
            }
        }
    });

    let state = AppState {
        db,
        engine,
        learning,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/predict", post(api_predict))
        .route("/stats", get(api_stats))
        .route("/performance", get(api_performance))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== CandleCast v{} ===", APP_VERSION);
    println!("Prediction Engine Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health       - Health check");
    println!("  POST /api/predict      - Store candles and emit a prediction");
    println!("  GET  /api/stats        - Engine and storage statistics");
    println!("  GET  /api/performance  - Recent win/loss performance");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "candlecast",
        "version": APP_VERSION,
    }))
}

#[derive(Deserialize)]
struct PredictRequest {
    candles: Vec<Candle>,
}

/// POST /api/predict — store the incoming batch and run the pipeline over
/// the most recent window
async fn api_predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let candle_repo = CandleRepository::new(state.db.pool());

    if !request.candles.is_empty() {
        let rows: Vec<CandleRow> = request
            .candles
            .iter()
            .map(|c| CandleRow {
                timestamp: c.timestamp,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
            })
            .collect();
        if let Err(e) = candle_repo.store_batch(&rows).await {
            error!(error = %e, "failed to store candle batch");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    let window = state.engine.config().candle_history_length as i64;
    let recent = match candle_repo.recent(window).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "failed to load recent candles");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let candles: Vec<Candle> = recent
        .iter()
        .map(|r| Candle {
            timestamp: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
        })
        .collect();

    match state.engine.predict(&candles).await {
        Some(prediction) => Ok(Json(serde_json::json!({
            "success": true,
            "prediction": prediction,
        }))),
        None => Ok(Json(serde_json::json!({
            "success": false,
            "message": format!(
                "no prediction available ({} candles stored, {} required)",
                candles.len(),
                window
            ),
        }))),
    }
}

/// GET /api/stats
async fn api_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let engine_stats = state.engine.stats().await.map_err(|e| {
        error!(error = %e, "failed to collect stats");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(serde_json::json!({
        "engine": engine_stats,
        "learning": state.learning.stats(),
    })))
}

/// GET /api/performance
async fn api_performance(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let since = Utc::now().timestamp_millis() - 7 * 24 * 3600 * 1000;
    let performance = PredictionRepository::new(state.db.pool())
        .recent_performance(since)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to collect performance");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(serde_json::json!({ "performance": performance })))
}

// ============================================================================
// Train command — synthetic bootstrap
// ============================================================================

/// Generate a window of random-walk candles plus one extra candle whose
/// direction is the label
fn synthetic_window(rng: &mut impl Rng, len: usize) -> Vec<Candle> {
    let mut price: f64 = 100.0 + rng.gen_range(-5.0..5.0);
    let drift = rng.gen_range(-0.2..0.2);
    (0..len + 1)
        .map(|i| {
            let open = price;
            let step = drift + rng.gen_range(-0.5..0.5);
            let close = open + step;
            let high = open.max(close) + rng.gen_range(0.0..0.3);
            let low = open.min(close) - rng.gen_range(0.0..0.3);
            price = close;
            Candle {
                timestamp: i as i64 * 60_000,
                open,
                high,
                low,
                close,
            }
        })
        .collect()
}

async fn cmd_train(samples: usize) -> anyhow::Result<()> {
    println!("\n=== CandleCast v{} — synthetic training ===", APP_VERSION);

    let config = EngineConfig::from_env();
    let classifier = SoftmaxClassifier::load_or_init(FEATURE_LEN, &config.model_path);

    let mut rng = rand::thread_rng();
    let mut x = Vec::with_capacity(samples);
    let mut y = Vec::with_capacity(samples);

    for _ in 0..samples {
        let window = synthetic_window(&mut rng, config.candle_history_length);
        let features = match FeatureVector::extract(&window[..config.candle_history_length]) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "skipping degenerate window");
                continue;
            }
        };
        let last = window[config.candle_history_length - 1].close;
        let next = window[config.candle_history_length].close;
        let delta = next - last;
        let label = if delta.abs() < config.outcome_epsilon {
            2
        } else if delta > 0.0 {
            0
        } else {
            1
        };
        x.push(features.to_array());
        y.push(label);
    }

    println!("Generated {} samples, training...", x.len());

    let settings = TrainSettings {
        epochs: config.training_epochs,
        batch_size: config.batch_size,
        learning_rate: config.learning_rate,
        validation_split: config.validation_split,
        save_accuracy_bar: config.model_save_accuracy_bar,
    };
    let stats = classifier.train(&x, &y, &settings)?;

    println!("\nTraining finished:");
    println!("  Epochs:          {}", stats.epochs);
    println!("  Final loss:      {:.4}", stats.final_loss);
    println!("  Held-out acc:    {:.2}%", stats.final_accuracy * 100.0);
    println!(
        "  Checkpoint:      {}",
        if stats.saved {
            config.model_path.display().to_string()
        } else {
            "not saved (below accuracy bar)".to_string()
        }
    );

    Ok(())
}

// ============================================================================
// Stats command
// ============================================================================

async fn cmd_stats() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let db_path = db_path();
    let db = persistence::Database::new(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;

    let storage = PredictionRepository::new(db.pool()).stats().await?;
    let classifier = SoftmaxClassifier::load_or_init(FEATURE_LEN, &config.model_path);

    println!("\n=== CandleCast v{} — statistics ===", APP_VERSION);
    println!("Database: {}", db_path);
    println!("  Candles:               {}", storage.total_candles);
    println!("  Predictions:           {}", storage.total_predictions);
    println!("  Validated:             {}", storage.validated_predictions);
    println!("  Win rate:              {:.1}%", storage.win_rate * 100.0);
    println!("Model: {}", config.model_path.display());
    println!("  Version:               {}", classifier.version());
    println!("  Last known accuracy:   {:.1}%", classifier.accuracy() * 100.0);

    Ok(())
}
