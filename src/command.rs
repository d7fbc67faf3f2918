use crate::dmk::{MARK_DATA, MARK_DELETED};
use crate::status::CommandType;

/// Drive select low nibble that means "no drive". Every command reports the
/// Type II status layout while it is latched.
pub const NO_DRIVE_SENTINEL: u8 = 0x0F;

const STEP_RATE_TICKS: [u32; 4] = [3, 6, 10, 15];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepDirection {
    In,
    Out,
    Last,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Restore { verify: bool, rate: u8 },
    Seek { verify: bool, rate: u8 },
    Step { direction: StepDirection, update: bool, verify: bool, rate: u8 },
    ReadSector { multiple: bool, ibm: bool },
    WriteSector { multiple: bool, ibm: bool, mark: u8 },
    ReadAddress,
    ReadTrack,
    WriteTrack,
    ForceInterrupt { conditions: u8 },
}

impl Command {
    pub fn decode(byte: u8) -> Command {
        let verify = byte & 0x04 != 0;
        let rate = byte & 0x03;
        let update = byte & 0x10 != 0;
        let multiple = byte & 0x10 != 0;
        let ibm = byte & 0x08 != 0;

        match byte >> 4 {
            0x0 => Command::Restore { verify, rate },
            0x1 => Command::Seek { verify, rate },
            0x2 | 0x3 => Command::Step { direction: StepDirection::Last, update, verify, rate },
            0x4 | 0x5 => Command::Step { direction: StepDirection::In, update, verify, rate },
            0x6 | 0x7 => Command::Step { direction: StepDirection::Out, update, verify, rate },
            0x8 | 0x9 => Command::ReadSector { multiple, ibm },
            0xA | 0xB => Command::WriteSector {
                multiple,
                ibm,
                mark: if byte & 0x01 != 0 { MARK_DELETED } else { MARK_DATA },
            },
            0xC => Command::ReadAddress,
            0xD => Command::ForceInterrupt { conditions: byte & 0x0F },
            0xE => Command::ReadTrack,
            _ => Command::WriteTrack,
        }
    }
}

pub fn command_type(byte: u8, drive_select: u8) -> CommandType {
    if drive_select & 0x0F == NO_DRIVE_SENTINEL {
        return CommandType::II;
    }
    match byte >> 4 {
        0x0..=0x7 => CommandType::I,
        0x8..=0xB => CommandType::II,
        0xD => CommandType::IV,
        _ => CommandType::III,
    }
}

/// Ticks per track stepped for the r1r0 rate field.
pub fn step_ticks(rate: u8) -> u32 {
    STEP_RATE_TICKS[(rate & 0x03) as usize]
}
