//! Scripted in-memory cloud for coordinator tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use climate_cloud::{
    CloudClient, CommandAck, CommandKind, CommandPayload, DeviceDescriptor, DeviceId, Error,
    ParamMap, PushEvent, PushStream, RemoteState,
};
use climate_core::{CoordinatorConfig, DeviceCoordinator};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// A reading of a running unit.
pub fn running(target_tenths: i32) -> RemoteState {
    RemoteState {
        online: true,
        power: true,
        mode_code: Some(0),
        fan_code: Some(0),
        target_tenths: Some(target_tenths),
        ambient_tenths: Some(255),
        params: ParamMap::new(),
        timestamp: Utc::now(),
    }
}

/// A reading of a unit that is connected but switched off.
pub fn switched_off() -> RemoteState {
    RemoteState {
        power: false,
        ..running(240)
    }
}

pub fn offline() -> RemoteState {
    RemoteState {
        online: false,
        power: false,
        ..running(240)
    }
}

pub fn id(s: &str) -> DeviceId {
    DeviceId::from(s)
}

/// Config for tests: push off, fast discovery retries.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        push_enabled: false,
        ..CoordinatorConfig::default()
    }
}

enum PushScript {
    Fail,
    Stream(mpsc::Receiver<PushEvent>),
}

#[derive(Default)]
struct FakeState {
    devices: Vec<DeviceDescriptor>,
    list_failures: u32,
    list_calls: u32,
    readings: HashMap<DeviceId, RemoteState>,
    scripted: HashMap<DeviceId, VecDeque<Result<RemoteState, Error>>>,
    fetches: HashMap<DeviceId, Vec<Instant>>,
    fetch_delay: Duration,
    commands: Vec<(DeviceId, CommandKind, CommandPayload)>,
    push: VecDeque<PushScript>,
    push_opens: Vec<Instant>,
    reauths: u32,
    reauth_failures: u32,
}

/// In-memory [`CloudClient`]. Each device answers with its current
/// reading (stamped with the call time) unless a scripted result is
/// queued for it.
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device_id: &str, name: &str, reading: RemoteState) -> Self {
        {
            let mut state = self.lock();
            state.devices.push(DeviceDescriptor::new(device_id, name));
            state.readings.insert(id(device_id), reading);
        }
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    // ── Scripting ────────────────────────────────────────────────────

    pub fn set_reading(&self, device_id: &str, reading: RemoteState) {
        self.lock().readings.insert(id(device_id), reading);
    }

    pub fn script_fetch(&self, device_id: &str, result: Result<RemoteState, Error>) {
        self.lock().scripted.entry(id(device_id)).or_default().push_back(result);
    }

    pub fn fail_reauth(&self, times: u32) {
        self.lock().reauth_failures = times;
    }

    pub fn fail_list(&self, times: u32) {
        self.lock().list_failures = times;
    }

    pub fn set_devices(&self, devices: &[(&str, &str)]) {
        let mut state = self.lock();
        state.devices = devices
            .iter()
            .map(|(device_id, name)| DeviceDescriptor::new(*device_id, *name))
            .collect();
        for (device_id, _) in devices {
            state.readings.entry(id(device_id)).or_insert_with(|| running(240));
        }
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.lock().fetch_delay = delay;
    }

    /// Queue a successful push connection; events sent on the returned
    /// sender reach the listener. Dropping it closes the stream.
    pub fn script_push_stream(&self) -> mpsc::Sender<PushEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.lock().push.push_back(PushScript::Stream(rx));
        tx
    }

    pub fn script_push_failures(&self, times: usize) {
        let mut state = self.lock();
        for _ in 0..times {
            state.push.push_back(PushScript::Fail);
        }
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn fetch_count(&self, device_id: &str) -> usize {
        self.lock().fetches.get(&id(device_id)).map_or(0, Vec::len)
    }

    pub fn fetch_times(&self, device_id: &str) -> Vec<Instant> {
        self.lock().fetches.get(&id(device_id)).cloned().unwrap_or_default()
    }

    pub fn commands(&self) -> Vec<(DeviceId, CommandKind, CommandPayload)> {
        self.lock().commands.clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.lock().list_calls
    }

    pub fn push_opens(&self) -> Vec<Instant> {
        self.lock().push_opens.clone()
    }

    pub fn reauths(&self) -> u32 {
        self.lock().reauths
    }
}

impl CloudClient for FakeCloud {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, Error> {
        let mut state = self.lock();
        state.list_calls += 1;
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(Error::Network("connection refused".into()));
        }
        Ok(state.devices.clone())
    }

    async fn fetch_state(&self, device_id: &DeviceId) -> Result<RemoteState, Error> {
        let (result, delay) = {
            let mut state = self.lock();
            state.fetches.entry(device_id.clone()).or_default().push(Instant::now());
            let scripted = state.scripted.get_mut(device_id).and_then(VecDeque::pop_front);
            let result = scripted.unwrap_or_else(|| {
                state
                    .readings
                    .get(device_id)
                    .map(|reading| RemoteState {
                        timestamp: Utc::now(),
                        ..reading.clone()
                    })
                    .ok_or_else(|| Error::DeviceUnreachable {
                        device_id: device_id.clone(),
                    })
            });
            (result, state.fetch_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result.map(|reading| RemoteState {
            timestamp: Utc::now(),
            ..reading
        })
    }

    async fn send_command(
        &self,
        device_id: &DeviceId,
        kind: CommandKind,
        payload: CommandPayload,
    ) -> Result<CommandAck, Error> {
        self.lock().commands.push((device_id.clone(), kind, payload.clone()));
        Ok(CommandAck {
            device_id: device_id.clone(),
            kind,
            params: payload,
        })
    }

    async fn open_push_channel(&self) -> Result<PushStream, Error> {
        let script = {
            let mut state = self.lock();
            state.push_opens.push(Instant::now());
            state.push.pop_front()
        };
        match script {
            Some(PushScript::Stream(rx)) => Ok(Box::pin(ReceiverStream::new(rx).map(Ok))),
            Some(PushScript::Fail) | None => {
                Err(Error::WebSocketConnect("relay unavailable".into()))
            }
        }
    }

    async fn reauthenticate(&self) -> Result<(), Error> {
        let mut state = self.lock();
        state.reauths += 1;
        if state.reauth_failures > 0 {
            state.reauth_failures -= 1;
            return Err(Error::Authentication {
                message: "invalid credentials".into(),
            });
        }
        Ok(())
    }
}

/// Start a coordinator over `cloud` and let the startup fetches land.
pub async fn started(cloud: &Arc<FakeCloud>, config: CoordinatorConfig) -> DeviceCoordinator<FakeCloud> {
    let coordinator = DeviceCoordinator::new(Arc::clone(cloud), config);
    coordinator.start().await.unwrap();
    settle().await;
    coordinator
}

/// Let spawned tasks run without moving the clock far.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}
