use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
}

/// Time source for a run. The generation loop never reads the system clock
/// or sleeps directly, so scenarios can drive it deterministically.
pub trait RunClock: Send + Sync {
    fn now_unix(&self) -> i64;
    fn sleep(&self, d: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl RunClock for SystemClock {
    fn now_unix(&self) -> i64 {
        now_unix()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Clock that only moves when slept on. Records every sleep.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn at(now_unix: i64) -> Self {
        Self { now_ms: AtomicI64::new(now_unix.saturating_mul(1000)), sleeps: Mutex::new(Vec::new()) }
    }

    pub fn advance(&self, d: Duration) {
        self.now_ms.fetch_add(i64::try_from(d.as_millis()).unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RunClock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst).div_euclid(1000)
    }

    fn sleep(&self, d: Duration) {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).push(d);
        self.advance(d);
    }
}
