//! Tick-counting embassy time driver for a single-core RISC-V part

use core::cell::Cell;

use critical_section::Mutex;
use embassy_time_driver::{AlarmHandle, Driver};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

/// The single alarm the thread-mode executor needs
struct Alarm {
    timestamp: Cell<u64>,
    callback: Cell<Option<fn(*mut ())>>,
    ctx: Cell<usize>,
}

/// Time driver advanced by the system timer interrupt
pub struct TickDriver {
    ticks: AtomicU64,
    allocated: AtomicBool,
    alarm: Mutex<Alarm>,
}

impl TickDriver {
    const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            allocated: AtomicBool::new(false),
            alarm: Mutex::new(Alarm {
                timestamp: Cell::new(u64::MAX),
                callback: Cell::new(None),
                ctx: Cell::new(0),
            }),
        }
    }

    /// Advance time by one tick and fire the alarm if it is due
    fn tick(&self) {
        let now = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let due = critical_section::with(|cs| {
            let alarm = self.alarm.borrow(cs);
            if alarm.timestamp.get() > now {
                return None;
            }
            alarm.timestamp.set(u64::MAX);
            alarm.callback.get().map(|callback| (callback, alarm.ctx.get()))
        });

        if let Some((callback, ctx)) = due {
            callback(ctx as *mut ());
        }
    }
}

impl Driver for TickDriver {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    unsafe fn allocate_alarm(&self) -> Option<AlarmHandle> {
        if self.allocated.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(AlarmHandle::new(0))
    }

    fn set_alarm_callback(&self, _alarm: AlarmHandle, callback: fn(*mut ()), ctx: *mut ()) {
        critical_section::with(|cs| {
            let alarm = self.alarm.borrow(cs);
            alarm.callback.set(Some(callback));
            alarm.ctx.set(ctx as usize);
        });
    }

    fn set_alarm(&self, _alarm: AlarmHandle, timestamp: u64) -> bool {
        critical_section::with(|cs| {
            let alarm = self.alarm.borrow(cs);
            if timestamp <= self.now() {
                alarm.timestamp.set(u64::MAX);
                return false;
            }
            alarm.timestamp.set(timestamp);
            true
        })
    }
}

embassy_time_driver::time_driver_impl!(static DRIVER: TickDriver = TickDriver::new());

/// System timer interrupt hook, one call per tick
pub fn on_system_tick() {
    DRIVER.tick();
}

// Critical section implementation for single-core RISC-V
critical_section::set_impl!(RiscvCriticalSection);

struct RiscvCriticalSection;

unsafe impl critical_section::Impl for RiscvCriticalSection {
    unsafe fn acquire() -> u8 {
        let mut mstatus: usize;
        core::arch::asm!("csrrci {}, mstatus, 8", out(reg) mstatus);
        (mstatus & 8) as u8
    }

    unsafe fn release(was_active: u8) {
        if was_active != 0 {
            core::arch::asm!("csrsi mstatus, 8");
        }
    }
}
