//! Scripted collaborators for unit tests.

use {
    crate::{
        device::{DetectedPort, DeviceFilter, PortRequester},
        error::{Error, Result},
        firmware::{ContentProvider, SegmentRole},
        plan::FlashPlan,
        port::SerialConfig,
        programmer::{
            ChipIdentity, ControlLine, Programmer, ProgrammerDriver, WriteOptions, WriteProgress,
        },
        reset::Delay,
        session::{DeviceSession, SessionOptions},
        sink::StatusSink,
    },
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::Duration,
    },
};

/// Serializes tests that connect a [`DeviceSession`]; only one session per
/// process may hold a device. Take it before creating any session so it is
/// dropped after them.
pub fn device_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observable programmer/delay activity, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Identify,
    Write { addresses: Vec<u32>, options: WriteOptions },
    Read { offset: u32, length: usize },
    Line(ControlLine, bool),
    Wait(Duration),
    Disconnect,
    ClosePort,
}

#[derive(Debug, Default)]
struct FlashMemory {
    regions: BTreeMap<u32, Vec<u8>>,
}

impl FlashMemory {
    fn read(&self, offset: u32, length: usize) -> Vec<u8> {
        let mut out = vec![0xFF; length];
        for (&start, data) in &self.regions {
            for (i, byte) in out.iter_mut().enumerate() {
                let addr = u64::from(offset) + i as u64;
                let start = u64::from(start);
                if addr >= start && addr < start + data.len() as u64 {
                    *byte = data[(addr - start) as usize];
                }
            }
        }
        out
    }
}

/// Programmer double backed by an in-memory flash.
#[derive(Clone)]
pub struct MockProgrammer {
    events: Arc<Mutex<Vec<Event>>>,
    flash: Arc<Mutex<FlashMemory>>,
    identity: Option<ChipIdentity>,
    progress: Vec<WriteProgress>,
    fail_write: bool,
    fail_read: bool,
    corrupt_readback: bool,
    line_fail_at: Option<usize>,
    line_calls: Arc<Mutex<usize>>,
    fail_close: bool,
}

impl MockProgrammer {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            flash: Arc::new(Mutex::new(FlashMemory::default())),
            identity: Some(ChipIdentity {
                chip_description: "ESP32-S3 (QFN56) (revision v0.2)".into(),
                mac_address: "f4:12:fa:00:11:22".into(),
            }),
            progress: Vec::new(),
            fail_write: false,
            fail_read: false,
            corrupt_readback: false,
            line_fail_at: None,
            line_calls: Arc::new(Mutex::new(0)),
            fail_close: false,
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<Event>>> {
        Arc::clone(&self.events)
    }

    pub fn fail_identify(mut self) -> Self {
        self.identity = None;
        self
    }

    pub fn with_progress(mut self, progress: Vec<WriteProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn fail_write(mut self) -> Self {
        self.fail_write = true;
        self
    }

    pub fn fail_read(mut self) -> Self {
        self.fail_read = true;
        self
    }

    pub fn corrupt_readback(mut self) -> Self {
        self.corrupt_readback = true;
        self
    }

    /// Make the `n`th control-line call (1-based) fail.
    pub fn fail_control_line_after(mut self, n: usize) -> Self {
        self.line_fail_at = Some(n);
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn write_calls(events: &Arc<Mutex<Vec<Event>>>) -> usize {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Write { .. }))
            .count()
    }

    pub fn line_events(events: &Arc<Mutex<Vec<Event>>>) -> Vec<Event> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Line(..) | Event::Wait(_)))
            .cloned()
            .collect()
    }
}

impl Programmer for MockProgrammer {
    fn identify(&mut self) -> Result<ChipIdentity> {
        self.record(Event::Identify);
        self.identity
            .clone()
            .ok_or_else(|| Error::HandshakeFailed("Failed to connect: no sync reply".into()))
    }

    fn write_flash(
        &mut self,
        plan: &FlashPlan,
        options: &WriteOptions,
        progress: &mut dyn FnMut(WriteProgress),
    ) -> Result<()> {
        self.record(Event::Write {
            addresses: plan.addresses(),
            options: *options,
        });
        for p in &self.progress {
            progress(*p);
        }
        if self.fail_write {
            return Err(Error::WriteFailure("timeout waiting for flash block ack".into()));
        }
        let mut flash = self.flash.lock().unwrap();
        for entry in plan.entries() {
            flash
                .regions
                .insert(entry.address, entry.segment.bytes.to_vec());
        }
        Ok(())
    }

    fn read_flash(
        &mut self,
        offset: u32,
        length: usize,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<u8>> {
        self.record(Event::Read { offset, length });
        if self.fail_read {
            return Err(Error::ReadFailure("read timed out".into()));
        }
        let mut data = self.flash.lock().unwrap().read(offset, length);
        if self.corrupt_readback {
            if let Some(first) = data.first_mut() {
                *first ^= 0xFF;
            }
        }
        progress(length, length);
        Ok(data)
    }

    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<()> {
        let mut calls = self.line_calls.lock().unwrap();
        *calls += 1;
        if self.line_fail_at == Some(*calls) {
            return Err(Error::ControlLine(format!("{line} write failed")));
        }
        drop(calls);
        self.record(Event::Line(line, level));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.record(Event::Disconnect);
        if self.fail_close {
            return Err(Error::Io(std::io::Error::other("transport already gone")));
        }
        Ok(())
    }

    fn close_port(&mut self) -> Result<()> {
        self.record(Event::ClosePort);
        if self.fail_close {
            return Err(Error::Io(std::io::Error::other("port already closed")));
        }
        Ok(())
    }
}

/// Driver handing out clones of one mock programmer.
pub struct MockDriver {
    pub programmer: MockProgrammer,
    pub fail_bind: bool,
    pub bound: Arc<Mutex<Vec<SerialConfig>>>,
}

impl MockDriver {
    pub fn new(programmer: MockProgrammer) -> Self {
        Self {
            programmer,
            fail_bind: false,
            bound: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProgrammerDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn bind(&self, _port: &DetectedPort, config: &SerialConfig) -> Result<Box<dyn Programmer>> {
        self.bound.lock().unwrap().push(config.clone());
        if self.fail_bind {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            )));
        }
        Ok(Box::new(self.programmer.clone()))
    }
}

/// Requester returning a fixed port or a cancellation.
pub struct MockRequester {
    pub port: Option<DetectedPort>,
    pub filters: Vec<DeviceFilter>,
}

impl MockRequester {
    pub fn selecting(name: &str) -> Self {
        Self {
            port: Some(DetectedPort {
                vid: Some(0x10C4),
                pid: Some(0xEA60),
                ..DetectedPort::named(name)
            }),
            filters: Vec::new(),
        }
    }

    pub fn cancelling() -> Self {
        Self {
            port: None,
            filters: Vec::new(),
        }
    }
}

impl PortRequester for MockRequester {
    fn request_port(&mut self, filter: &DeviceFilter) -> Result<DetectedPort> {
        self.filters.push(*filter);
        self.port.clone().ok_or(Error::NoDeviceSelected)
    }
}

/// In-memory content provider.
pub struct MockProvider {
    resources: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl MockProvider {
    /// Segments in plan order with a position-dependent byte pattern.
    pub fn with_sizes(sizes: [usize; 4]) -> Self {
        let resources = SegmentRole::ALL
            .iter()
            .zip(sizes)
            .enumerate()
            .map(|(n, (role, size))| {
                let bytes = (0..size).map(|i| ((i * 31 + n * 7) % 251) as u8).collect();
                (role.resource().to_string(), bytes)
            })
            .collect();
        Self {
            resources,
            failing: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_resource(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.resources.insert(name.to_string(), bytes);
        self
    }

    /// Answer `name` with an HTTP 500.
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl ContentProvider for MockProvider {
    fn describe(&self) -> String {
        "mock://firmware".into()
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(name.to_string());
        if self.failing.contains(name) {
            return Err(Error::Network(format!("HTTP 500 for mock://firmware/{name}")));
        }
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Network(format!("HTTP 404 for mock://firmware/{name}")))
    }
}

/// Delay that records waits into a programmer's event log.
pub struct RecordingDelay {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingDelay {
    pub fn new(events: Arc<Mutex<Vec<Event>>>) -> Self {
        Self { events }
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.events.lock().unwrap().push(Event::Wait(duration));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Log(String),
    Status(String),
    Progress(usize, u8),
    Controls(bool),
}

/// Sink keeping every event.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Log(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<(usize, u8)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Progress(i, p) => Some((*i, *p)),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn log(&self, line: &str) {
        self.events.lock().unwrap().push(SinkEvent::Log(line.to_string()));
    }

    fn status(&self, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Status(text.to_string()));
    }

    fn progress(&self, segment_index: usize, percent: u8) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Progress(segment_index, percent));
    }

    fn set_controls_enabled(&self, enabled: bool) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Controls(enabled));
    }
}

/// Session already connected to `programmer`.
/// Session connected to `programmer`. Callers must hold [`device_lock`].
pub fn connected_session(programmer: MockProgrammer) -> DeviceSession {
    let driver = Mutex::new(Some(MockDriver::new(programmer)));
    let loader = move || -> Result<Box<dyn ProgrammerDriver>> {
        driver
            .lock()
            .unwrap()
            .take()
            .map(|d| Box::new(d) as Box<dyn ProgrammerDriver>)
            .ok_or_else(|| Error::TransportUnavailable("driver already taken".into()))
    };
    let mut session = DeviceSession::new();
    session
        .connect(
            &loader,
            &mut MockRequester::selecting("/dev/ttyUSB0"),
            &SessionOptions::default(),
        )
        .unwrap();
    session
}
