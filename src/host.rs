use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::bus::{FdcBus, COMMAND_STATUS, DATA, DRIVE_SELECT, SECTOR, TRACK};

const BUSY: u8 = 0x01;
const DRQ: u8 = 0x02;
const TYPE_II_ERRORS: u8 = 0x80 | 0x40 | 0x10 | 0x08 | 0x04;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("{operation} failed with status {status:02x}")]
    Failed { operation: &'static str, status: u8 },
    #[error("{operation} timed out")]
    TimedOut { operation: &'static str },
}

/// Drives the controller through its registers the way a disk operating
/// system would: program the registers, issue a command, poll the status.
pub struct Host {
    bus: FdcBus,
    timeout: Duration,
    drive_select: u8,
}

impl Host {
    pub fn new(bus: FdcBus) -> Host {
        Host {
            bus,
            timeout: Duration::from_secs(5),
            drive_select: 0,
        }
    }

    fn status(&self) -> u8 {
        self.bus.peek(COMMAND_STATUS).unwrap_or(0xFF)
    }

    pub fn select(&mut self, drive: usize, side: u8) {
        self.drive_select = (1 << drive) | if side != 0 { 0x10 } else { 0 };
        self.bus.poke(DRIVE_SELECT, self.drive_select);
    }

    fn command(&self, command: u8) {
        // keep the motor turning
        self.bus.poke(DRIVE_SELECT, self.drive_select);
        self.bus.poke(COMMAND_STATUS, command);
    }

    fn wait_idle(&self, operation: &'static str) -> Result<u8, HostError> {
        let start = Instant::now();
        loop {
            let status = self.status();
            if status & BUSY == 0 {
                return Ok(status);
            }
            if start.elapsed() > self.timeout {
                return Err(HostError::TimedOut { operation });
            }
            thread::yield_now();
        }
    }

    pub fn restore(&self) -> Result<u8, HostError> {
        self.command(0x00);
        self.check("restore", self.wait_idle("restore")?, 0x90)
    }

    pub fn seek(&self, track: u8) -> Result<u8, HostError> {
        self.bus.poke(DATA, track);
        self.command(0x10);
        self.check("seek", self.wait_idle("seek")?, 0x90)
    }

    fn check(&self, operation: &'static str, status: u8, errors: u8) -> Result<u8, HostError> {
        if status & errors != 0 {
            Err(HostError::Failed { operation, status })
        } else {
            Ok(status)
        }
    }

    /// Read one IBM format sector from the current track. Returns the data
    /// and the final status; error bits are left for the caller.
    pub fn read_sector(&self, track: u8, sector: u8) -> Result<(Vec<u8>, u8), HostError> {
        self.bus.poke(TRACK, track);
        self.bus.poke(SECTOR, sector);
        self.command(0x88);
        let mut data = Vec::new();
        let start = Instant::now();
        loop {
            let status = self.status();
            if status & DRQ != 0 {
                data.push(self.bus.peek(DATA).unwrap_or(0));
            } else if status & BUSY == 0 {
                return Ok((data, status));
            } else if start.elapsed() > self.timeout {
                return Err(HostError::TimedOut { operation: "read sector" });
            } else {
                thread::yield_now();
            }
        }
    }

    /// Feed a Write Track stream, stopping early with a Force Interrupt if the
    /// controller stops asking before the stream runs out.
    pub fn write_track(&self, stream: &[u8]) -> Result<u8, HostError> {
        self.command(0xF0);
        let mut bytes = stream.iter();
        let start = Instant::now();
        loop {
            let status = self.status();
            if status & DRQ != 0 {
                match bytes.next() {
                    Some(&byte) => self.bus.poke(DATA, byte),
                    None => {
                        self.bus.poke(COMMAND_STATUS, 0xD0);
                        return Ok(self.status());
                    }
                };
            } else if status & BUSY == 0 {
                return self.check("write track", status, TYPE_II_ERRORS);
            } else if start.elapsed() > self.timeout {
                return Err(HostError::TimedOut { operation: "write track" });
            } else {
                thread::yield_now();
            }
        }
    }
}
