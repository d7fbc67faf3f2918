use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};

use crate::floppy_controller::FloppyController;

/// TRS-80 Model I memory mapped controller addresses.
pub const INTERRUPT_LATCH: u16 = 0x37E0;
pub const DRIVE_SELECT: u16 = 0x37E1;
pub const COMMAND_STATUS: u16 = 0x37EC;
pub const TRACK: u16 = 0x37ED;
pub const SECTOR: u16 = 0x37EE;
pub const DATA: u16 = 0x37EF;

/// Bit of the interrupt latch wired to the controller's INTRQ
const INTRQ_LATCH_BIT: u8 = 0x40;
/// Undriven latch bits read back high
const LATCH_IDLE_BITS: u8 = 0x3F;

/// Host side of the controller. Register accesses and scheduler ticks each
/// hold the lock for one step, so they never interleave.
#[derive(Clone)]
pub struct FdcBus {
    fdc: Arc<Mutex<FloppyController>>,
}

impl FdcBus {
    pub fn new(fdc: FloppyController) -> FdcBus {
        FdcBus {
            fdc: Arc::new(Mutex::new(fdc)),
        }
    }

    /// Run `f` with the controller locked. None if a previous holder panicked.
    pub fn with<R>(&self, f: impl FnOnce(&mut FloppyController) -> R) -> Option<R> {
        match self.fdc.lock() {
            Ok(mut fdc) => Some(f(&mut fdc)),
            Err(_) => {
                error!("FDC: controller lock poisoned");
                None
            }
        }
    }

    /// Memory write. Returns false for addresses the controller doesn't decode.
    pub fn poke(&self, address: u16, value: u8) -> bool {
        let handled = self.with(|fdc| match address {
            // the select latch decodes the whole 37E0-37E3 block on writes
            INTERRUPT_LATCH | DRIVE_SELECT | 0x37E2 | 0x37E3 => {
                fdc.put_drive_select(value);
                true
            }
            COMMAND_STATUS => {
                fdc.put_command(value);
                true
            }
            TRACK => {
                fdc.put_track(value);
                true
            }
            SECTOR => {
                fdc.put_sector(value);
                true
            }
            DATA => {
                fdc.put_data(value);
                true
            }
            _ => false,
        });
        handled.unwrap_or(false)
    }

    /// Memory read. None for addresses the controller doesn't decode.
    pub fn peek(&self, address: u16) -> Option<u8> {
        self.with(|fdc| match address {
            // the latch answers reads across the same 37E0-37E3 block
            INTERRUPT_LATCH | DRIVE_SELECT | 0x37E2 | 0x37E3 => {
                Some(LATCH_IDLE_BITS | if fdc.intrq { INTRQ_LATCH_BIT } else { 0 })
            }
            COMMAND_STATUS => Some(fdc.get_status()),
            TRACK => Some(fdc.get_track()),
            SECTOR => Some(fdc.get_sector()),
            DATA => Some(fdc.get_data()),
            _ => None,
        })
        .flatten()
    }

    pub fn tick(&self) {
        self.with(|fdc| fdc.tick());
    }
}

/// Background tick loop for a bus.
pub struct Scheduler {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(bus: FdcBus, interval: Duration) -> Scheduler {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            debug!("FDC: Scheduler started, tick every {:?}", interval);
            while flag.load(Ordering::Relaxed) {
                bus.tick();
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
            }
            debug!("FDC: Scheduler stopped");
        });
        Scheduler {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("FDC: Scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;

    #[test]
    fn registers_are_mapped() {
        let bus = FdcBus::new(FloppyController::new(Timing::default()));
        assert!(bus.poke(TRACK, 12));
        assert!(bus.poke(SECTOR, 3));
        assert_eq!(bus.peek(TRACK), Some(12));
        assert_eq!(bus.peek(SECTOR), Some(3));
        assert!(!bus.poke(0x3C00, 0x41));
        assert_eq!(bus.peek(0x3C00), None);
    }

    #[test]
    fn empty_drive_reads_not_ready() {
        let bus = FdcBus::new(FloppyController::new(Timing::default()));
        bus.poke(DRIVE_SELECT, 0x01);
        let status = bus.peek(COMMAND_STATUS).unwrap();
        assert_eq!(status & 0x80, 0x80);
    }

    #[test]
    fn interrupt_latch_decodes_the_whole_block() {
        let bus = FdcBus::new(FloppyController::new(Timing::default()));
        for address in INTERRUPT_LATCH..=0x37E3 {
            assert_eq!(bus.peek(address), Some(0x3F));
        }
        // no scheduler: a not ready drive completes the read at once
        bus.poke(DRIVE_SELECT, 0x01);
        bus.poke(COMMAND_STATUS, 0x88);
        for address in INTERRUPT_LATCH..=0x37E3 {
            assert_eq!(bus.peek(address), Some(0x7F));
        }
        // a status read drops INTRQ
        bus.peek(COMMAND_STATUS);
        assert_eq!(bus.peek(0x37E2), Some(0x3F));
    }

    #[test]
    fn scheduler_completes_a_restore() {
        let bus = FdcBus::new(FloppyController::new(Timing::default()));
        let mut scheduler = Scheduler::start(bus.clone(), Duration::from_micros(1));
        bus.poke(COMMAND_STATUS, 0x00);
        let mut done = false;
        for _ in 0..10_000 {
            if bus.peek(INTERRUPT_LATCH).map_or(false, |latch| latch & INTRQ_LATCH_BIT != 0) {
                done = true;
                break;
            }
            thread::sleep(Duration::from_micros(50));
        }
        scheduler.stop();
        assert!(done);
        assert_eq!(bus.peek(COMMAND_STATUS).unwrap() & 0x01, 0);
    }
}
