#![allow(dead_code)]

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lapse::avi::Truncate;
use lapse::capture::{FrameMetadata, FrameSource, PixelFormat, RawFrame};
use lapse::error::{CaptureError, TimerError};
use lapse::pipeline::{HardwareTimer, Isr, IsrContext, TimerConfig};
use lapse::storage::{FsStorage, Storage};
use lapse::Config;

/// Camera double with scripted payloads and buffer accounting.
pub struct TestCamera {
    width: u32,
    height: u32,
    format: PixelFormat,
    payloads: Mutex<Vec<Vec<u8>>>,
    pub fail_acquire: AtomicBool,
    /// While closed, `to_jpeg` blocks and the encode/mux stage stalls
    gate_open: AtomicBool,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl TestCamera {
    pub fn jpeg(width: u32, height: u32, mut payloads: Vec<Vec<u8>>) -> Arc<Self> {
        payloads.reverse();
        Arc::new(Self {
            width,
            height,
            format: PixelFormat::Jpeg,
            payloads: Mutex::new(payloads),
            fail_acquire: AtomicBool::new(false),
            gate_open: AtomicBool::new(true),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    /// Raw RGB camera whose encoder waits for [`open_gate`](Self::open_gate).
    pub fn gated_rgb(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            format: PixelFormat::Rgb888,
            payloads: Mutex::new(Vec::new()),
            fail_acquire: AtomicBool::new(false),
            gate_open: AtomicBool::new(false),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    pub fn open_gate(&self) {
        self.gate_open.store(true, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    fn next_payload(&self) -> Vec<u8> {
        if let Some(payload) = self.payloads.lock().unwrap().pop() {
            return payload;
        }
        match self.format {
            PixelFormat::Jpeg => {
                let mut data = vec![0x5a; 512];
                data[..2].copy_from_slice(&[0xff, 0xd8]);
                data
            }
            _ => vec![0x80; (self.width * self.height * 3) as usize],
        }
    }
}

impl FrameSource for TestCamera {
    fn acquire(&self) -> Result<RawFrame, CaptureError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(CaptureError::Acquire("no frame from sensor".into()));
        }
        let data = self.next_payload();
        let sequence = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RawFrame {
            data: Bytes::from(data),
            meta: FrameMetadata {
                sequence,
                width: self.width,
                height: self.height,
                format: self.format,
            },
            timestamp: Instant::now(),
        })
    }

    fn release(&self, _frame: RawFrame) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn to_jpeg(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, CaptureError> {
        while !self.gate_open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(2));
        }
        lapse::capture::jpeg::encode(frame, quality)
    }
}

#[derive(Default)]
struct ManualState {
    config: Option<TimerConfig>,
    isr: Option<Isr>,
    running: bool,
    fired: u64,
}

/// Timer whose alarm fires only when the test says so.
#[derive(Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    /// Raise the alarm interrupt. False when the timer is stopped.
    pub fn fire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.running {
            return false;
        }
        let Some(isr) = state.isr.as_mut() else {
            return false;
        };
        let mut ctx = IsrContext::fired();
        isr(&mut ctx);
        assert!(!ctx.interrupt_pending(), "handler left the interrupt pending");
        assert!(ctx.alarm_armed(), "handler did not re-arm the alarm");
        state.fired += 1;
        true
    }

    pub fn config(&self) -> Option<TimerConfig> {
        self.state.lock().unwrap().config
    }
}

impl HardwareTimer for ManualTimer {
    fn configure(&mut self, config: TimerConfig) -> Result<(), TimerError> {
        config.validate()?;
        self.state.lock().unwrap().config = Some(config);
        Ok(())
    }

    fn register_isr(&mut self, isr: Isr) {
        self.state.lock().unwrap().isr = Some(isr);
    }

    fn start(&mut self) -> Result<(), TimerError> {
        let mut state = self.state.lock().unwrap();
        if state.running {
            return Err(TimerError::AlreadyRunning);
        }
        if state.config.is_none() {
            return Err(TimerError::NotConfigured);
        }
        if state.isr.is_none() {
            return Err(TimerError::NoIsr);
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.isr = None;
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }
}

/// Host file system whose writes start failing once `eject` is called.
#[derive(Default)]
pub struct EjectableStorage {
    fs: FsStorage,
    ejected: Arc<AtomicBool>,
}

impl EjectableStorage {
    pub fn eject(&self) {
        self.ejected.store(true, Ordering::SeqCst);
    }
}

pub struct EjectableFile {
    file: File,
    ejected: Arc<AtomicBool>,
}

impl EjectableFile {
    fn check(&self) -> io::Result<()> {
        if self.ejected.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "card ejected"));
        }
        Ok(())
    }
}

impl Read for EjectableFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for EjectableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.file.flush()
    }
}

impl Seek for EjectableFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Truncate for EjectableFile {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.check()?;
        self.file.set_len(len)
    }
}

impl Storage for EjectableStorage {
    type File = EjectableFile;

    fn create(&self, path: &Path) -> io::Result<EjectableFile> {
        Ok(EjectableFile {
            file: self.fs.create(path)?,
            ejected: Arc::clone(&self.ejected),
        })
    }

    fn create_new(&self, path: &Path) -> io::Result<EjectableFile> {
        Ok(EjectableFile {
            file: self.fs.create_new(path)?,
            ejected: Arc::clone(&self.ejected),
        })
    }

    fn close(&self, file: EjectableFile) -> io::Result<()> {
        file.check()?;
        self.fs.close(file.file)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.fs.remove(path)
    }
}

/// Configuration writing into `dir` with short stage timeouts.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.lapse.output_dir = dir.to_path_buf();
    config.lapse.file_prefix = "test".into();
    config.pipeline.safety_timeout_ms = 200;
    config.pipeline.drain_poll_ms = 5;
    config
}

/// Poll `check` until it holds or five seconds pass.
pub async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
