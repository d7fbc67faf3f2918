use crate::dmk::{MARK_DELETED, MARK_USER_F9, MARK_USER_FA};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandType {
    I,
    II,
    III,
    IV,
}

/// Status register bits. Some positions mean different things depending on
/// the type of the last command.
#[derive(Copy, Clone)]
#[repr(u8)]
pub enum FDCStatus {
    NotReady = 0x80,
    WriteProtectedOrRecordType = 0x40,
    HeadLoadedOrRecordType = 0x20,
    SeekErrorOrRecordNotFound = 0x10,
    CrcError = 0x08,
    LostDataOrTrack0 = 0x04,
    DataRequestOrIndex = 0x02,
    Busy = 0x01,
}

/// Internal controller flags the status register is derived from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub busy: bool,
    pub index: bool,
    pub track0: bool,
    pub crc_error: bool,
    pub seek_error: bool,
    pub head_loaded: bool,
    pub write_protected: bool,
    pub not_ready: bool,
    pub drq: bool,
    pub lost_data: bool,
    pub not_found: bool,
    pub record_type: u8,
}

impl StatusFlags {
    /// Clear everything a new command starts without.
    pub fn clear(&mut self) {
        *self = StatusFlags::default();
    }
}

fn record_type_bits(mark: u8) -> u8 {
    match mark {
        MARK_USER_FA => 0x20,
        MARK_USER_F9 => 0x40,
        MARK_DELETED => 0x60,
        _ => 0x00,
    }
}

fn bit(set: bool, flag: FDCStatus) -> u8 {
    if set {
        flag as u8
    } else {
        0
    }
}

pub fn synthesize(flags: &StatusFlags, command_type: CommandType) -> u8 {
    let mut status = bit(flags.not_ready, FDCStatus::NotReady)
        | bit(flags.crc_error, FDCStatus::CrcError)
        | bit(flags.busy, FDCStatus::Busy);

    match command_type {
        CommandType::I | CommandType::IV => {
            status |= bit(flags.write_protected, FDCStatus::WriteProtectedOrRecordType)
                | bit(flags.head_loaded, FDCStatus::HeadLoadedOrRecordType)
                | bit(flags.seek_error, FDCStatus::SeekErrorOrRecordNotFound)
                | bit(flags.track0, FDCStatus::LostDataOrTrack0)
                | bit(flags.index, FDCStatus::DataRequestOrIndex);
        }
        CommandType::II | CommandType::III => {
            status |= record_type_bits(flags.record_type)
                | bit(flags.write_protected, FDCStatus::WriteProtectedOrRecordType)
                | bit(flags.not_found, FDCStatus::SeekErrorOrRecordNotFound)
                | bit(flags.lost_data, FDCStatus::LostDataOrTrack0)
                | bit(flags.drq, FDCStatus::DataRequestOrIndex);
        }
    }
    status
}
