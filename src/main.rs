#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};
use solax_monitor::api::endpoint::API_URL;
use solax_monitor::model::{Preferences, TelemetrySnapshot};
use solax_monitor::store::StorageKey;
use solax_monitor::{
    display, preferences, session, CloudSource, CredentialStore, Error, FileStore,
    RefreshHandle, RefreshScheduler, RefreshState, SessionGate,
};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

mod metrics;

const STORE_PATH: &str = "solax-monitor.json";

#[derive(Clone, Deserialize)]
pub struct MonitorConfig {
    api_url: String,
    store_path: String,
    token_id: Option<String>,
    serial_number: Option<String>,
}

/// Structure containing state for API handlers.
pub struct StateData {
    api: solax_monitor::model::Api,
    store: Arc<dyn CredentialStore>,
    refresh: RefreshHandle,
    scheduler: Arc<Mutex<RefreshScheduler>>,
}

impl StateData {
    /// Re-read preferences and re-arm the scheduler accordingly.
    async fn apply_preferences(&self) -> Result<Preferences, Error> {
        let prefs = preferences::load(self.store.as_ref()).await?;
        self.scheduler
            .lock()
            .await
            .set_period(preferences::refresh_period(&prefs));
        Ok(prefs)
    }
}

pub fn read_settings() -> Result<MonitorConfig, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .set_default("api_url", API_URL)?
        .set_default("store_path", STORE_PATH)?
        .merge(config::Environment::with_prefix("SOLAX"))?;

    settings.try_into()
}

#[derive(Serialize)]
struct RealtimeView {
    summary: String,
    stale: bool,
    status_label: Option<&'static str>,
    #[serde(flatten)]
    state: RefreshState,
}

#[derive(Deserialize)]
struct ConnectRequest {
    #[serde(rename = "tokenId")]
    token_id: String,
    sn: String,
}

#[derive(Serialize)]
struct SettingsView {
    token_id: String,
    serial_number: String,
    #[serde(flatten)]
    preferences: Preferences,
}

#[get("/metrics")]
async fn metrics_route() -> Result<String, Error> {
    metrics::read()
}

#[get("/realtime")]
fn realtime_route(state: &State<StateData>) -> Json<RealtimeView> {
    let refresh_state = state.refresh.state();
    Json(RealtimeView {
        summary: display::summary(&refresh_state),
        stale: refresh_state.is_stale(),
        status_label: refresh_state.snapshot.as_ref().map(|s| s.status.label()),
        state: refresh_state,
    })
}

#[post("/refresh")]
async fn refresh_route(state: &State<StateData>) -> Result<Json<TelemetrySnapshot>, Error> {
    state.refresh.refresh_now().await.map(Json)
}

#[post("/connect", data = "<request>")]
async fn connect_route(
    state: &State<StateData>,
    request: Json<ConnectRequest>,
) -> Result<Status, Error> {
    session::connect(
        &state.api,
        state.store.as_ref(),
        &request.token_id,
        &request.sn,
    )
    .await?;
    let _ = state.refresh.refresh_now().await;
    Ok(Status::NoContent)
}

#[post("/logout")]
async fn logout_route(state: &State<StateData>) -> Result<Status, Error> {
    session::logout(state.store.as_ref()).await?;
    state.refresh.reset();
    Ok(Status::NoContent)
}

#[get("/settings")]
async fn settings_route(state: &State<StateData>) -> Result<Json<SettingsView>, Error> {
    let store = state.store.as_ref();
    let token_id = store.get(StorageKey::TokenId).await?.unwrap_or_default();
    let serial_number = store
        .get(StorageKey::SerialNumber)
        .await?
        .unwrap_or_default();

    Ok(Json(SettingsView {
        token_id: display::mask_text(&token_id),
        serial_number: display::mask_text(&serial_number),
        preferences: preferences::load(store).await?,
    }))
}

#[post("/settings/auto-refresh/<enabled>")]
async fn auto_refresh_route(
    state: &State<StateData>,
    enabled: bool,
) -> Result<Json<Preferences>, Error> {
    preferences::set_auto_refresh(state.store.as_ref(), enabled).await?;
    state.apply_preferences().await.map(Json)
}

#[post("/settings/refresh-interval/<minutes>")]
async fn refresh_interval_route(
    state: &State<StateData>,
    minutes: i64,
) -> Result<Json<Preferences>, Error> {
    preferences::update_refresh_interval(state.store.as_ref(), minutes).await?;
    state.apply_preferences().await.map(Json)
}

/// Export every applied poll to Prometheus and the log.
async fn render(mut updates: watch::Receiver<RefreshState>) {
    let mut previous = RefreshState::default();
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        metrics::record(&previous, &state);
        log::info!("{}", display::summary(&state));
        previous = state;
    }
}

async fn prepare() -> Result<StateData, Box<dyn std::error::Error>> {
    let settings = read_settings()?;
    let store: Arc<dyn CredentialStore> = Arc::new(FileStore::open(&settings.store_path).await?);
    let api = solax_monitor::api(settings.api_url)?;

    /* headless: no biometric facility to consult */
    SessionGate::new(store.as_ref(), None)
        .check()
        .await
        .into_result()?;

    match (&settings.token_id, &settings.serial_number) {
        (Some(token_id), Some(serial_number)) => {
            if let Err(e) = session::connect(&api, store.as_ref(), token_id, serial_number).await
            {
                log::error!("Connection error: {}", e);
            }
        }
        _ => match session::cached_credentials(store.as_ref()).await {
            Some(credentials) => {
                log::info!("using saved credentials for {}", credentials.serial_number)
            }
            None => log::warn!("no credentials stored yet; POST /connect with tokenId and sn"),
        },
    }

    let prefs = preferences::load(store.as_ref()).await?;
    let source = Arc::new(CloudSource::new(api.clone(), store.clone()));
    let scheduler = RefreshScheduler::new(source, preferences::refresh_period(&prefs));

    Ok(StateData {
        api,
        store,
        refresh: scheduler.handle(),
        scheduler: Arc::new(Mutex::new(scheduler)),
    })
}

#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    env_logger::init();

    let state = match prepare().await {
        Ok(state) => state,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    tokio::spawn(render(state.refresh.subscribe()));
    let scheduler = state.scheduler.clone();
    scheduler.lock().await.start();

    let _rocket = rocket::build()
        .manage(state)
        .mount(
            "/",
            routes![
                metrics_route,
                realtime_route,
                refresh_route,
                connect_route,
                logout_route,
                settings_route,
                auto_refresh_route,
                refresh_interval_route,
            ],
        )
        .launch()
        .await?;

    scheduler.lock().await.stop();
    Ok(())
}
