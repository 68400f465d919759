use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use app_api::AppContext;
use http_api::{HttpState, generate_api_token};
use meter_app::{Engine, MeterConfig};
use meter_db::Db;

#[tokio::main]
async fn main() {
    init_tracing();

    let data_dir = resolve_data_dir();
    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data dir {}: {}", data_dir.display(), err);
        std::process::exit(1);
    }
    let db_path = data_dir.join("origin-meter.sqlite");
    if let Err(err) = setup_db(&db_path) {
        eprintln!("failed to initialize database: {}", err);
        std::process::exit(1);
    }

    let self_origin = std::env::var("ORIGIN_METER_SELF_ORIGIN").ok();
    // All durable state is loaded here, before any request or tick can
    // reach the engine.
    let engine = match Engine::with_defaults(MeterConfig {
        db_path,
        self_origin,
    }) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("failed to load meter state: {}", err);
            std::process::exit(1);
        }
    };
    let context = AppContext::new(engine);

    let tick_context = context.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        loop {
            interval.tick().await;
            match tick_context.engine() {
                Ok(mut engine) => engine.tick(Utc::now()),
                Err(err) => tracing::error!(%err, "engine unavailable for tick"),
            }
        }
    });

    let api_token = generate_api_token();
    let state = HttpState::new(context, api_token.clone());
    let app = http_api::router(state);

    let port = resolve_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind server");
    tracing::info!(port, %api_token, "origin meter listening on 127.0.0.1");
    axum::serve(listener, app).await.expect("serve");
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("ORIGIN_METER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn resolve_data_dir() -> PathBuf {
    let env_override = std::env::var_os("ORIGIN_METER_DATA_DIR").map(PathBuf::from);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(PathBuf::from));
    resolve_data_dir_with(env_override, exe_dir)
}

fn resolve_data_dir_with(env_override: Option<PathBuf>, exe_dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = env_override {
        return dir;
    }
    if let Some(dir) = exe_dir {
        return dir;
    }
    PathBuf::from(".")
}

fn resolve_port() -> u16 {
    std::env::var("ORIGIN_METER_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(3030)
}

fn setup_db(path: &Path) -> Result<(), meter_db::DbError> {
    let mut db = Db::open(path)?;
    db.migrate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_data_dir_prefers_env_override() {
        let dir = tempfile::tempdir().expect("temp dir");
        let resolved = resolve_data_dir_with(
            Some(dir.path().to_path_buf()),
            Some(PathBuf::from("/somewhere/else")),
        );
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn resolve_data_dir_falls_back_to_exe_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let resolved = resolve_data_dir_with(None, Some(dir.path().to_path_buf()));
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn setup_db_creates_and_migrates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("meter.sqlite");
        setup_db(&db_path).expect("setup db");
        assert!(db_path.exists());
        // A second run over the same file is harmless.
        setup_db(&db_path).expect("setup db again");
    }
}
