use chrono::Local;
use dotenvy::dotenv;
use envelope_cycles::{
    app::App,
    config::{
        app::load_default_config,
        database::{DEFAULT_DATABASE_URL, create_connection, create_tables, get_database_url},
    },
    core::{
        calendar::{format_cycle_summary, summarize_cycle},
        materializer::format_materialization_summary,
    },
    errors::Result,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Settings defaults and free tier limits
    let app_config = load_default_config()?;

    // 4. Database
    if get_database_url() == DEFAULT_DATABASE_URL {
        std::fs::create_dir_all("data")?;
    }
    let db = create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Activation: materialize this month's recurring items
    let app = App::open(db, &app_config)
        .await
        .inspect_err(|e| error!("Failed to load app state: {}", e))?;
    let now = Local::now().naive_local();
    let result = app
        .activate(now)
        .await
        .inspect_err(|e| error!("Failed to materialize recurring items: {}", e))?;
    info!("{}", format_materialization_summary(&result));

    let summary = summarize_cycle(&app.database, &app.calculator(), app.current_cycle(now), now)
        .await
        .inspect_err(|e| error!("Failed to summarize cycle: {}", e))?;
    info!("{}", format_cycle_summary(&summary));

    Ok(())
}
