use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Datelike, Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use seasons_common::{
    device_setpoint_entity, emitter::setpoint_value, entity_from_state_topic,
    operation_command_topic, temperature_command_topic, types::format_setpoint, Catalog,
    ClimateAction, DayOfWeek, DeviceState, Evaluation, EvaluationContext, Fingerprint, Occupancy,
    SeasonsEngine, SensorConfig, SensorReader, SensorSnapshot, Trigger, TOPIC_CMD_CATALOG,
    TOPIC_CMD_EVALUATE, TOPIC_CONTROLLER_DECISIONS, TOPIC_STATE_WILDCARD,
};

use crate::store::AppStore;

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<SeasonsEngine>>,
    sensors: Arc<Mutex<SensorSnapshot>>,
    sensor_config: Arc<SensorConfig>,
    timezone: Arc<Mutex<String>>,
    /// Whether the configured timezone resolves; evaluations are skipped otherwise.
    timezone_valid: Arc<AtomicBool>,
    /// One evaluation per device in flight; guards the fingerprint round trip.
    device_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    fingerprints: Arc<Mutex<BTreeMap<String, Fingerprint>>>,
    last_evaluations: Arc<Mutex<BTreeMap<String, DeviceReport>>>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Debug, Clone, Serialize)]
struct DeviceReport {
    device: String,
    mode: String,
    trigger: Trigger,
    #[serde(rename = "evaluatedAtEpoch")]
    evaluated_at_epoch: i64,
    evaluation: Evaluation,
}

#[derive(Debug, Serialize)]
struct DeviceStatusView {
    device: String,
    fingerprint: Option<Fingerprint>,
    #[serde(rename = "lastEvaluation")]
    last_evaluation: Option<DeviceReport>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(rename = "timezoneValid")]
    timezone_valid: bool,
    timezone: String,
    mode: Option<String>,
    occupancy: Occupancy,
    #[serde(rename = "intervalMinutes")]
    interval_minutes: u32,
    devices: Vec<DeviceStatusView>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TimezoneUpdate {
    timezone: String,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timezoneValid")]
    timezone_valid: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

#[derive(Debug, Serialize)]
struct TemperatureCommand<'a> {
    temperature: serde_json::Value,
    operation_mode: &'a str,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 64 * 1024;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        Default::default()
    });
    runtime.seasons.sanitize();

    let catalog = match store.load_catalog().await {
        Ok(Some(catalog)) => catalog,
        Ok(None) => {
            info!("no catalog stored yet, writing the example catalog");
            let catalog = Catalog::example();
            if let Err(err) = store.save_catalog(&catalog).await {
                warn!("failed to store example catalog: {err:#}");
            }
            catalog
        }
        Err(err) => {
            warn!("failed to load catalog from store: {err:#}");
            Catalog::default()
        }
    };

    let fingerprints = store.load_fingerprints().await.unwrap_or_else(|err| {
        warn!("failed to load fingerprints from store: {err:#}");
        BTreeMap::new()
    });

    let interval_minutes = runtime.seasons.interval_minutes;
    let engine = SeasonsEngine::new(runtime.seasons.clone(), catalog);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("seasons-controller", mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let timezone_valid = now_in_timezone(&runtime.timezone).is_some();
    if !timezone_valid {
        warn!(
            "timezone `{}` does not resolve, evaluations will be skipped",
            runtime.timezone
        );
    }

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        sensors: Arc::new(Mutex::new(SensorSnapshot::new())),
        sensor_config: Arc::new(runtime.sensors),
        timezone: Arc::new(Mutex::new(runtime.timezone)),
        timezone_valid: Arc::new(AtomicBool::new(timezone_valid)),
        device_locks: Arc::new(Mutex::new(HashMap::new())),
        fingerprints: Arc::new(Mutex::new(fingerprints)),
        last_evaluations: Arc::new(Mutex::new(BTreeMap::new())),
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_timer_loop(app_state.clone(), interval_minutes);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route(
            "/api/catalog",
            get(handle_get_catalog).put(handle_put_catalog),
        )
        .route("/api/evaluate", post(handle_post_evaluate))
        .route("/api/time", get(handle_get_time))
        .route("/api/timezone", put(handle_put_timezone))
        .with_state(app_state);

    let port = std::env::var("SEASONS_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [TOPIC_STATE_WILDCARD, TOPIC_CMD_EVALUATE, TOPIC_CMD_CATALOG];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_timer_loop(app_state: AppState, interval_minutes: u32) {
    tokio::spawn(async move {
        let period = Duration::from_secs(u64::from(interval_minutes) * 60);
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;

            for device in configured_devices(&app_state).await {
                if let Err(err) = evaluate_device(&app_state, &device, Trigger::Timer).await {
                    warn!("timer evaluation of {device} failed: {err:#}");
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;

    if let Some(entity) = entity_from_state_topic(&topic) {
        let value = message.trim();
        let changed = {
            let mut sensors = app_state.sensors.lock().await;
            if value.is_empty() {
                sensors.remove(entity)
            } else {
                sensors.update(entity, value)
            }
        };

        if changed {
            let devices = devices_affected_by(app_state, entity).await;
            if !devices.is_empty() {
                info!("{entity} changed to `{value}`, re-evaluating {devices:?}");
                spawn_evaluations(app_state.clone(), devices, Trigger::Event);
            }
        }
        return Ok(());
    }

    match topic.as_str() {
        TOPIC_CMD_EVALUATE => {
            let devices = evaluation_targets(app_state, message.trim()).await;
            spawn_evaluations(app_state.clone(), devices, Trigger::Event);
        }
        TOPIC_CMD_CATALOG => {
            let catalog = serde_json::from_str::<Catalog>(&message)
                .context("rejected catalog update")?;
            replace_catalog(app_state, catalog).await?;
        }
        _ => {}
    }

    Ok(())
}

/// Mode and occupancy touch every device; a window only the devices whose
/// rules watch it.
async fn devices_affected_by(app_state: &AppState, entity: &str) -> Vec<String> {
    let config = &app_state.sensor_config;
    if entity == config.global_mode || config.at_home.as_deref() == Some(entity) {
        return configured_devices(app_state).await;
    }

    let engine = app_state.engine.lock().await;
    engine
        .catalog()
        .devices_watching(entity)
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Devices named by an evaluate command. Empty means all; unknown names are dropped.
async fn evaluation_targets(app_state: &AppState, requested: &str) -> Vec<String> {
    let known = configured_devices(app_state).await;
    if requested.is_empty() {
        return known;
    }
    if known.iter().any(|device| device == requested) {
        return vec![requested.to_string()];
    }

    warn!("ignoring evaluate command for unknown device `{requested}`");
    Vec::new()
}

async fn configured_devices(app_state: &AppState) -> Vec<String> {
    if !app_state.sensor_config.devices.is_empty() {
        return app_state.sensor_config.devices.clone();
    }

    let engine = app_state.engine.lock().await;
    engine
        .catalog()
        .devices()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn spawn_evaluations(app_state: AppState, devices: Vec<String>, trigger: Trigger) {
    for device in devices {
        let state = app_state.clone();
        tokio::spawn(async move {
            if let Err(err) = evaluate_device(&state, &device, trigger).await {
                warn!("{} evaluation of {device} failed: {err:#}", trigger.as_str());
            }
        });
    }
}

async fn device_lock(app_state: &AppState, device: &str) -> Arc<Mutex<()>> {
    let mut locks = app_state.device_locks.lock().await;
    locks
        .entry(device.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

async fn evaluate_device(
    app_state: &AppState,
    device: &str,
    trigger: Trigger,
) -> anyhow::Result<()> {
    let lock = device_lock(app_state, device).await;
    let _in_flight = lock.lock().await;

    let timezone = { app_state.timezone.lock().await.clone() };
    let Some(now) = now_in_timezone(&timezone) else {
        warn!("clock unavailable for timezone `{timezone}`, skipping {device}");
        return Ok(());
    };

    let sensors = { app_state.sensors.lock().await.clone() };
    let Some(mode) = sensors
        .state(&app_state.sensor_config.global_mode)
        .map(str::to_string)
    else {
        debug!(
            "{} not reported yet, skipping {device}",
            app_state.sensor_config.global_mode
        );
        return Ok(());
    };

    let occupancy = Occupancy::from_reading(
        app_state
            .sensor_config
            .at_home
            .as_deref()
            .and_then(|entity| sensors.read_binary(entity)),
    );
    let device_state = sensors.state(device).map(|operation| DeviceState {
        operation: operation.to_string(),
        setpoint: sensors.read_numeric(&device_setpoint_entity(device)),
    });
    let previous = { app_state.fingerprints.lock().await.get(device).cloned() };

    let ctx = EvaluationContext {
        mode: mode.clone(),
        device: device.to_string(),
        now: now.time(),
        today: DayOfWeek::from_chrono(now.weekday()),
        occupancy,
        trigger,
        previous,
        device_state,
    };

    let evaluation = {
        let engine = app_state.engine.lock().await;
        engine.evaluate(&ctx, &sensors)
    };

    match &evaluation.decision {
        None => debug!("{device}: `{mode}` is a manual mode, leaving device alone"),
        Some(decision) if decision.changed => info!(
            "Setting {device} to mode {} target {} from schedule {}",
            decision.operation,
            format_setpoint(decision.setpoint),
            decision.title
        ),
        Some(decision) => debug!(
            "{device}: {} tick keeps `{}` ({})",
            trigger.as_str(),
            decision.title,
            decision.operation
        ),
    }

    execute_climate_actions(&app_state.mqtt, device, &evaluation.actions).await?;

    if let Some(fingerprint) = &evaluation.fingerprint {
        persist_fingerprint(app_state, device, fingerprint.clone()).await?;
    }

    let report = DeviceReport {
        device: device.to_string(),
        mode,
        trigger,
        evaluated_at_epoch: Utc::now().timestamp(),
        evaluation,
    };
    publish_report(&app_state.mqtt, &report).await;
    app_state
        .last_evaluations
        .lock()
        .await
        .insert(device.to_string(), report);

    Ok(())
}

/// The map lock is held through the write so files land in update order.
async fn persist_fingerprint(
    app_state: &AppState,
    device: &str,
    fingerprint: Fingerprint,
) -> anyhow::Result<()> {
    let mut fingerprints = app_state.fingerprints.lock().await;
    fingerprints.insert(device.to_string(), fingerprint);
    app_state
        .store
        .save_fingerprints(&fingerprints)
        .await
        .context("failed to persist fingerprint")
}

async fn execute_climate_actions(
    mqtt: &AsyncClient,
    device: &str,
    actions: &[ClimateAction],
) -> anyhow::Result<()> {
    for action in actions {
        match action {
            ClimateAction::Delay { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            ClimateAction::SetOperation { operation } => {
                mqtt.publish(
                    operation_command_topic(device),
                    QoS::AtLeastOnce,
                    false,
                    operation.clone(),
                )
                .await
                .with_context(|| format!("failed to send operation to {device}"))?;
            }
            ClimateAction::SetTemperature {
                setpoint,
                operation,
            } => {
                let payload = serde_json::to_vec(&TemperatureCommand {
                    temperature: setpoint_value(*setpoint),
                    operation_mode: operation,
                })?;
                mqtt.publish(
                    temperature_command_topic(device),
                    QoS::AtLeastOnce,
                    false,
                    payload,
                )
                .await
                .with_context(|| format!("failed to send temperature to {device}"))?;
            }
        }
    }
    Ok(())
}

async fn publish_report(mqtt: &AsyncClient, report: &DeviceReport) {
    let topic = format!("{TOPIC_CONTROLLER_DECISIONS}/{}", report.device);
    match serde_json::to_vec(report) {
        Ok(body) => {
            if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, true, body).await {
                warn!("decision publish failed: {err}");
            }
        }
        Err(err) => warn!("decision serialization failed: {err}"),
    }
}

async fn replace_catalog(app_state: &AppState, catalog: Catalog) -> anyhow::Result<()> {
    let changed = {
        let mut engine = app_state.engine.lock().await;
        engine.set_catalog(catalog.clone())
    };
    if changed {
        info!("catalog replaced ({} entries)", catalog.entries().len());
        app_state.store.save_catalog(&catalog).await?;
    }
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let timezone = state.timezone.lock().await.clone();
    let (mode, occupancy) = {
        let sensors = state.sensors.lock().await;
        let mode = sensors
            .state(&state.sensor_config.global_mode)
            .map(str::to_string);
        let occupancy = Occupancy::from_reading(
            state
                .sensor_config
                .at_home
                .as_deref()
                .and_then(|entity| sensors.read_binary(entity)),
        );
        (mode, occupancy)
    };
    let interval_minutes = state.engine.lock().await.config().interval_minutes;

    let devices = configured_devices(&state).await;
    let fingerprints = state.fingerprints.lock().await.clone();
    let last_evaluations = state.last_evaluations.lock().await.clone();

    let devices = devices
        .into_iter()
        .map(|device| DeviceStatusView {
            fingerprint: fingerprints.get(&device).cloned(),
            last_evaluation: last_evaluations.get(&device).cloned(),
            device,
        })
        .collect();

    Json(StatusResponse {
        timezone_valid: state.timezone_valid.load(Ordering::Relaxed),
        timezone,
        mode,
        occupancy,
        interval_minutes,
        devices,
    })
}

async fn handle_get_catalog(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.engine.lock().await.catalog().clone();
    Json(catalog)
}

async fn handle_put_catalog(
    State(state): State<AppState>,
    Json(catalog): Json<Catalog>,
) -> impl IntoResponse {
    if let Err(err) = replace_catalog(&state, catalog).await {
        warn!("failed to persist catalog update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist catalog",
        );
    }

    handle_get_catalog(State(state)).await.into_response()
}

async fn handle_post_evaluate(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let known = configured_devices(&state).await;
    let devices = match params.get("device") {
        Some(device) if !known.contains(device) => {
            return error_response(StatusCode::NOT_FOUND, "Unknown device");
        }
        Some(device) => vec![device.clone()],
        None => known,
    };

    for device in &devices {
        if let Err(err) = evaluate_device(&state, device, Trigger::Event).await {
            warn!("manual evaluation of {device} failed: {err:#}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Evaluation failed");
        }
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let timezone = state.timezone.lock().await.clone();
    Json(TimeStatus {
        timezone_valid: state.timezone_valid.load(Ordering::Relaxed),
        timezone,
        now_epoch: Utc::now().timestamp(),
    })
}

async fn handle_put_timezone(
    State(state): State<AppState>,
    Json(update): Json<TimezoneUpdate>,
) -> impl IntoResponse {
    if update.timezone.parse::<Tz>().is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid timezone value");
    }

    {
        let mut timezone = state.timezone.lock().await;
        *timezone = update.timezone;
    }
    state.timezone_valid.store(true, Ordering::Relaxed);

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist timezone update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    handle_get_time(State(state)).await.into_response()
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let timezone = state.timezone.lock().await.clone();

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.timezone = timezone;
    state.store.save_runtime_config(&runtime).await
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn unknown_timezone_has_no_clock() {
        assert!(now_in_timezone("Mars/Olympus_Mons").is_none());
        assert!(now_in_timezone("America/Los_Angeles").is_some());
    }

    #[test]
    fn temperature_command_payload_keeps_whole_degrees() {
        let payload = serde_json::to_string(&TemperatureCommand {
            temperature: setpoint_value(73.0),
            operation_mode: "cool",
        })
        .unwrap();

        assert_eq!(payload, r#"{"temperature":73,"operation_mode":"cool"}"#);
    }

    const MODE_ENTITY: &str = "input_select.climate_mode";
    const AT_HOME_ENTITY: &str = "binary_sensor.anyone_home";

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("seasons-host-{name}-{}", std::process::id()))
    }

    /// The event loop is returned so the client's request channel stays open;
    /// it is never polled, so nothing reaches a broker.
    fn test_state(dir: PathBuf) -> (AppState, rumqttc::EventLoop) {
        let (mqtt, eventloop) =
            AsyncClient::new(MqttOptions::new("seasons-test", "localhost", 1883), 64);
        let sensor_config = SensorConfig {
            global_mode: MODE_ENTITY.to_string(),
            at_home: Some(AT_HOME_ENTITY.to_string()),
            devices: Vec::new(),
        };
        let state = AppState {
            engine: Arc::new(Mutex::new(SeasonsEngine::new(
                Default::default(),
                Catalog::example(),
            ))),
            sensors: Arc::new(Mutex::new(SensorSnapshot::new())),
            sensor_config: Arc::new(sensor_config),
            timezone: Arc::new(Mutex::new("UTC".to_string())),
            timezone_valid: Arc::new(AtomicBool::new(true)),
            device_locks: Arc::new(Mutex::new(HashMap::new())),
            fingerprints: Arc::new(Mutex::new(BTreeMap::new())),
            last_evaluations: Arc::new(Mutex::new(BTreeMap::new())),
            mqtt,
            store: AppStore::in_dir(dir),
        };
        (state, eventloop)
    }

    fn all_example_devices() -> Vec<String> {
        [
            "climate.first_floor",
            "climate.first_floor_heat",
            "climate.loft",
            "climate.master_br",
            "climate.second_floor",
        ]
        .map(str::to_string)
        .to_vec()
    }

    #[tokio::test]
    async fn window_change_reaches_only_watching_devices() {
        let (state, _eventloop) = test_state(scratch_dir("window"));

        assert_eq!(
            devices_affected_by(&state, "binary_sensor.bedroom_window").await,
            vec!["climate.master_br".to_string()]
        );
        assert_eq!(
            devices_affected_by(&state, "binary_sensor.skylight").await,
            vec!["climate.loft".to_string()]
        );
        assert!(devices_affected_by(&state, "sensor.outdoor_temperature")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn mode_and_occupancy_changes_reach_every_device() {
        let (state, _eventloop) = test_state(scratch_dir("mode"));

        assert_eq!(
            devices_affected_by(&state, MODE_ENTITY).await,
            all_example_devices()
        );
        assert_eq!(
            devices_affected_by(&state, AT_HOME_ENTITY).await,
            all_example_devices()
        );
    }

    #[tokio::test]
    async fn empty_state_payload_clears_entity() {
        let (state, _eventloop) = test_state(scratch_dir("clear"));
        let topic = "seasons/state/sensor.outdoor_temperature".to_string();

        handle_mqtt_message(&state, topic.clone(), b"81.5".to_vec())
            .await
            .unwrap();
        assert_eq!(
            state
                .sensors
                .lock()
                .await
                .state("sensor.outdoor_temperature"),
            Some("81.5")
        );

        handle_mqtt_message(&state, topic, b"  ".to_vec())
            .await
            .unwrap();
        assert_eq!(
            state
                .sensors
                .lock()
                .await
                .state("sensor.outdoor_temperature"),
            None
        );
    }

    #[tokio::test]
    async fn catalog_command_replaces_and_persists_catalog() {
        let dir = scratch_dir("catalog");
        let (state, _eventloop) = test_state(dir.clone());
        let raw = r#"[{"mode":"Winter","device":"climate.den","rules":[
            {"title":"Warm evenings","time_on":"17:00","time_off":"22:00","operation":"heat","setpoint":68}
        ]}]"#;
        let expected: Catalog = serde_json::from_str(raw).unwrap();

        handle_mqtt_message(&state, TOPIC_CMD_CATALOG.to_string(), raw.as_bytes().to_vec())
            .await
            .unwrap();

        assert_eq!(state.engine.lock().await.catalog(), &expected);
        assert_eq!(state.store.load_catalog().await.unwrap(), Some(expected));

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn invalid_catalog_command_keeps_current_catalog() {
        let dir = scratch_dir("bad-catalog");
        let (state, _eventloop) = test_state(dir.clone());
        let raw = r#"[{"mode":"Winter","device":"climate.den","rules":[
            {"title":"Broken","time_on":"25:00","operation":"heat"}
        ]}]"#;

        let result =
            handle_mqtt_message(&state, TOPIC_CMD_CATALOG.to_string(), raw.as_bytes().to_vec())
                .await;

        assert!(result.is_err());
        assert_eq!(state.engine.lock().await.catalog(), &Catalog::example());
        assert!(state.store.load_catalog().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evaluate_command_targets_only_known_devices() {
        let (state, _eventloop) = test_state(scratch_dir("targets"));

        assert_eq!(evaluation_targets(&state, "").await, all_example_devices());
        assert_eq!(
            evaluation_targets(&state, "climate.loft").await,
            vec!["climate.loft".to_string()]
        );
        assert!(evaluation_targets(&state, "climate.not_a_device")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn evaluate_command_for_unknown_device_sends_and_stores_nothing() {
        let dir = scratch_dir("unknown-device");
        let (state, _eventloop) = test_state(dir.clone());
        state.sensors.lock().await.update(MODE_ENTITY, "Winter");

        handle_mqtt_message(
            &state,
            TOPIC_CMD_EVALUATE.to_string(),
            b"climate.not_a_device".to_vec(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(state.fingerprints.lock().await.is_empty());
        assert!(state.device_locks.lock().await.is_empty());
        assert!(state.store.load_fingerprints().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_fingerprint_writes_all_reach_disk() {
        let dir = scratch_dir("fingerprints");
        let (state, _eventloop) = test_state(dir.clone());

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let state = state.clone();
                tokio::spawn(async move {
                    persist_fingerprint(
                        &state,
                        &format!("climate.room_{index}"),
                        Fingerprint::new("heat", Some(60.0 + index as f32)),
                    )
                    .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let on_disk = state.store.load_fingerprints().await.unwrap();
        assert_eq!(on_disk.len(), 8);
        assert_eq!(on_disk, *state.fingerprints.lock().await);

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
