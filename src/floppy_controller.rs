use std::path::Path;

use log::{debug, error, info, trace};

use crate::command::{self, Command, StepDirection, NO_DRIVE_SENTINEL};
use crate::config::Timing;
use crate::dmk::{SectorLayout, TrackBuffer, IDAM_TABLE_LEN};
use crate::media::{DiskError, DiskImage};
use crate::status::{self, CommandType, StatusFlags};

pub const MAX_DRIVES: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Reads wait this many ticks before the first DRQ
    Settle(u32),
    /// Writes raise DRQ on the first tick
    Start,
    Transfer,
    /// Post write settle before busy clears
    Finish(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Idle,
    Seek { ticks: u32 },
    ReadSector(Phase),
    ReadTrack(Phase),
    WriteSector(Phase),
    WriteTrack(Phase),
}

#[derive(Copy, Clone, Debug, Default)]
struct Cursor {
    pos: usize,
    remaining: usize,
    stride: usize,
}

pub struct FloppyController {
    drives: [Option<DiskImage>; MAX_DRIVES],
    buffer: TrackBuffer,
    timing: Timing,

    command: u8,
    command_type: CommandType,
    track: u8,           // Track register (software-accessible)
    sector: u8,
    data: u8,
    drive_select: u8,
    head_position: u8,   // Physical head position (moved by Type I commands)
    step_direction: i8,  // Last step direction: 1 = in (towards higher tracks), -1 = out

    flags: StatusFlags,
    status: u8,

    operation: Operation,
    cursor: Cursor,
    sector_layout: Option<SectorLayout>,
    record_mark: u8,
    write_mark: u8,
    multiple: bool,
    interrupt_conditions: u8,

    // Spindle: motor countdown re-armed by drive select, rotation drives the index pulse
    motor_ticks: u32,
    rotation: u32,

    pub intrq: bool,
    pub interrupt_count: u64,
}

impl FloppyController {
    pub fn new(timing: Timing) -> FloppyController {
        let mut fdc = FloppyController {
            drives: [None, None, None, None],
            buffer: TrackBuffer::new(),
            timing,
            command: 0,
            command_type: CommandType::I,
            track: 0,
            sector: 0,
            data: 0,
            drive_select: 0,
            head_position: 0,
            step_direction: 1,
            flags: StatusFlags::default(),
            status: 0,
            operation: Operation::Idle,
            cursor: Cursor::default(),
            sector_layout: None,
            record_mark: 0,
            write_mark: 0,
            multiple: false,
            interrupt_conditions: 0,
            motor_ticks: 0,
            rotation: 0,
            intrq: false,
            interrupt_count: 0,
        };
        fdc.update_status();
        fdc
    }

    pub fn mount<P: AsRef<Path>>(&mut self, drive: usize, path: P) -> Result<(), DiskError> {
        if drive >= MAX_DRIVES {
            return Err(DiskError::BadDrive(drive));
        }
        let image = DiskImage::open(path)?;
        self.mount_image(drive, image)
    }

    /// Replace the image in `drive`. Whatever was pending for the old image
    /// is written back first.
    pub fn mount_image(&mut self, drive: usize, image: DiskImage) -> Result<(), DiskError> {
        if drive >= MAX_DRIVES {
            return Err(DiskError::BadDrive(drive));
        }
        self.release_buffer(drive);
        info!("FDC: Drive {}: {}", drive, image.info());
        self.drives[drive] = Some(image);
        self.update_status();
        Ok(())
    }

    pub fn unmount(&mut self, drive: usize) -> Result<(), DiskError> {
        if drive >= MAX_DRIVES {
            return Err(DiskError::BadDrive(drive));
        }
        self.release_buffer(drive);
        if let Some(mut image) = self.drives[drive].take() {
            image.flush()?;
            info!("FDC: Drive {} unmounted", drive);
        }
        self.update_status();
        Ok(())
    }

    fn release_buffer(&mut self, drive: usize) {
        if self.buffer.drive == Some(drive) {
            self.cancel_operation();
            self.flush_buffer();
            self.buffer.invalidate();
        }
    }

    pub fn drive(&self, drive: usize) -> Option<&DiskImage> {
        self.drives.get(drive).and_then(|d| d.as_ref())
    }

    /// Controller reset: write back, close every image and reopen the ones
    /// that came from a file.
    pub fn reset(&mut self) {
        self.cancel_operation();
        self.flush_buffer();
        self.buffer.invalidate();
        for drive in 0..MAX_DRIVES {
            let Some(path) = self.drives[drive].as_ref().and_then(|image| image.path.clone()) else {
                continue;
            };
            self.drives[drive] = None;
            match DiskImage::open(&path) {
                Ok(image) => self.drives[drive] = Some(image),
                Err(e) => error!("FDC: Drive {}: cannot reopen {}: {}", drive, path.display(), e),
            }
        }

        self.command = 0;
        self.command_type = CommandType::I;
        self.track = 0;
        self.sector = 0;
        self.data = 0;
        self.head_position = 0;
        self.step_direction = 1;
        self.flags.clear();
        self.operation = Operation::Idle;
        self.cursor = Cursor::default();
        self.sector_layout = None;
        self.multiple = false;
        self.interrupt_conditions = 0;
        self.intrq = false;
        debug!("FDC: Reset");
        self.update_status();
    }

    pub fn flush(&mut self) {
        self.flush_buffer();
        for (drive, image) in self.drives.iter_mut().enumerate() {
            if let Some(image) = image {
                if let Err(e) = image.flush() {
                    error!("FDC: Drive {}: flush failed: {}", drive, e);
                }
            }
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn flags(&self) -> StatusFlags {
        self.flags
    }

    pub fn head_position(&self) -> u8 {
        self.head_position
    }

    pub fn interrupt_conditions(&self) -> u8 {
        self.interrupt_conditions
    }

    pub fn is_busy(&self) -> bool {
        self.flags.busy
    }

    fn side(&self) -> u8 {
        if self.drive_select & 0x10 != 0 {
            1
        } else {
            0
        }
    }

    /// First selected drive; none while the select latch is empty or holds
    /// the sentinel.
    fn selected_drive(&self) -> Option<usize> {
        let bits = self.drive_select & 0x0F;
        if bits == NO_DRIVE_SENTINEL {
            return None;
        }
        (0..MAX_DRIVES).find(|d| bits & (1 << d) != 0)
    }

    fn ready_drive(&self) -> Option<usize> {
        let drive = self.selected_drive()?;
        match &self.drives[drive] {
            Some(image) if !image.faulted => Some(drive),
            _ => None,
        }
    }

    fn update_status(&mut self) {
        let ready = self.ready_drive();
        self.flags.not_ready = ready.is_none();
        self.flags.head_loaded = ready.is_some() && self.motor_ticks > 0;
        self.flags.track0 = self.head_position == 0;
        if matches!(self.command_type, CommandType::I | CommandType::IV) {
            self.flags.write_protected = ready
                .and_then(|d| self.drives[d].as_ref())
                .map_or(false, |image| image.is_write_protected());
        }
        self.status = status::synthesize(&self.flags, self.command_type);
    }

    fn raise_interrupt(&mut self) {
        self.intrq = true;
        self.interrupt_count += 1;
    }

    /// Clear busy and DRQ, go idle and raise INTRQ.
    fn complete(&mut self) {
        self.flags.busy = false;
        self.flags.drq = false;
        self.operation = Operation::Idle;
        self.cursor = Cursor::default();
        self.raise_interrupt();
    }

    pub fn put_drive_select(&mut self, value: u8) {
        if value != self.drive_select {
            debug!("FDC: Drive select {:02x} -> {:02x}", self.drive_select, value);
        }
        self.drive_select = value;
        self.motor_ticks = self.timing.motor_on_ticks;
        self.update_status();
    }

    pub fn put_command(&mut self, value: u8) {
        self.intrq = false;
        self.dispatch(value);
    }

    fn dispatch(&mut self, value: u8) {
        let command = Command::decode(value);
        if let Command::ForceInterrupt { conditions } = command {
            self.force_interrupt(value, conditions);
            return;
        }

        self.abort_operation();
        self.command = value;
        self.command_type = command::command_type(value, self.drive_select);
        self.flags.clear();
        self.flags.busy = true;
        self.intrq = false;
        self.operation = Operation::Idle;
        self.cursor = Cursor::default();
        self.sector_layout = None;
        self.multiple = false;
        self.update_status();

        match command {
            Command::Restore { verify, rate } => {
                // RESTORE command, type I
                // 0000_hVrr
                debug!("FDC: Restore from head {}", self.head_position);
                let distance = self.head_position as u32;
                self.head_position = 0;
                self.track = 0;
                self.finish_type_one(verify, rate, distance);
            }
            Command::Seek { verify, rate } => {
                // SEEK command, type I
                // 0001_hVrr, target track in the data register
                let target = self.data;
                debug!("FDC: Seek track {} -> {}", self.track, target);
                let limit = self.ready_drive().and_then(|d| self.drives[d].as_ref()).map(|i| i.tracks());
                if limit.map_or(false, |tracks| target >= tracks) {
                    debug!("FDC: Seek track {} beyond last track", target);
                    self.flags.seek_error = true;
                    self.operation = Operation::Seek { ticks: 1 };
                } else {
                    let distance = (target as i32 - self.track as i32).unsigned_abs();
                    let delta = target as i16 - self.track as i16;
                    self.head_position = (self.head_position as i16 + delta).clamp(0, u8::MAX as i16) as u8;
                    self.track = target;
                    self.finish_type_one(verify, rate, distance);
                }
            }
            Command::Step { direction, update, verify, rate } => {
                // STEP (001u_hVrr), STEP IN (010u_hVrr), STEP OUT (011u_hVrr)
                match direction {
                    StepDirection::In => self.step_direction = 1,
                    StepDirection::Out => self.step_direction = -1,
                    StepDirection::Last => {}
                }
                if self.step_direction > 0 {
                    self.head_position = self.head_position.saturating_add(1);
                    if update {
                        self.track = self.track.saturating_add(1);
                    }
                } else {
                    self.head_position = self.head_position.saturating_sub(1);
                    if update {
                        self.track = self.track.saturating_sub(1);
                    }
                }
                debug!(
                    "FDC: Step {} (update={}) head={} track={}",
                    if self.step_direction > 0 { "in" } else { "out" },
                    update,
                    self.head_position,
                    self.track
                );
                self.finish_type_one(verify, rate, 1);
            }
            Command::ReadSector { multiple, ibm } => {
                // READ SECTOR command, type II
                // 100m_b000
                self.read_sector(multiple, ibm);
            }
            Command::WriteSector { multiple, ibm, mark } => {
                // WRITE SECTOR command, type II
                // 101m_b00a, a selects the deleted data mark
                self.write_sector(multiple, ibm, mark);
            }
            Command::ReadAddress => {
                // READ ADDRESS command, type III
                // 1100_0000
                self.read_address();
            }
            Command::ReadTrack => {
                // READ TRACK command, type III
                // 1110_0000
                self.read_track();
            }
            Command::WriteTrack => {
                // WRITE TRACK command, type III (format track)
                // 1111_0000
                self.write_track();
            }
            Command::ForceInterrupt { .. } => {}
        }
        self.update_status();
    }

    fn finish_type_one(&mut self, verify: bool, rate: u8, distance: u32) {
        let ticks = (command::step_ticks(rate) * distance).max(1);
        let loaded = match self.ready_drive() {
            Some(drive) => self.ensure_track(drive),
            None => false,
        };
        if verify {
            self.verify_track(loaded);
        }
        self.operation = Operation::Seek { ticks };
    }

    /// Check that the track under the head has an ID field for the track
    /// register.
    fn verify_track(&mut self, loaded: bool) {
        let hit = if loaded {
            self.buffer
                .idam_offsets()
                .into_iter()
                .find(|&idam| self.buffer.id_field(idam).map(|id| id.track) == Some(self.track))
        } else {
            None
        };
        match hit {
            Some(idam) => self.flags.crc_error = !self.buffer.id_crc_ok(idam),
            None => {
                debug!("FDC: Verify found no ID for track {}", self.track);
                self.flags.seek_error = true;
            }
        }
    }

    /// Not ready drive: flag it and complete without a transfer.
    fn require_ready(&mut self) -> Option<usize> {
        let drive = self.ready_drive();
        if drive.is_none() {
            debug!("FDC: Drive not ready");
            self.flags.not_ready = true;
            self.complete();
        }
        drive
    }

    fn require_writable(&mut self, drive: usize) -> bool {
        let protected = self.drives[drive].as_ref().map_or(true, |image| image.is_write_protected());
        if protected {
            debug!("FDC: Drive {} is write protected", drive);
            self.flags.write_protected = true;
            self.complete();
        }
        !protected
    }

    fn record_not_found(&mut self) {
        debug!(
            "FDC: Record not found (Si:{}, Tr:{}, Se:{}, Head:{})",
            self.side(),
            self.track,
            self.sector,
            self.head_position
        );
        self.flags.not_found = true;
        self.complete();
    }

    fn locate_sector(&mut self, drive: usize, ibm: bool) -> Option<SectorLayout> {
        if !self.ensure_track(drive) {
            return None;
        }
        let side = self.side();
        self.buffer
            .locate_idam(side, self.track, self.sector)
            .and_then(|idam| self.buffer.sector_layout(idam, ibm))
    }

    fn read_sector(&mut self, multiple: bool, ibm: bool) {
        let Some(drive) = self.require_ready() else {
            return;
        };
        debug!(
            "FDC: Read sector (cmd:0x{:02x}, Si:{}, Tr:{}, Se:{}, Head:{}, multi:{})",
            self.command,
            self.side(),
            self.track,
            self.sector,
            self.head_position,
            multiple
        );
        let Some(layout) = self.locate_sector(drive, ibm) else {
            self.record_not_found();
            return;
        };
        if !layout.id_crc_ok || !layout.data_crc_ok {
            debug!("FDC: CRC error in sector {} (id:{}, data:{})", self.sector, layout.id_crc_ok, layout.data_crc_ok);
        }
        self.flags.crc_error = !layout.id_crc_ok || !layout.data_crc_ok;
        self.multiple = multiple;
        self.record_mark = layout.mark;
        self.sector_layout = Some(layout);
        self.cursor = Cursor {
            pos: layout.data,
            remaining: layout.size,
            stride: layout.stride,
        };
        self.operation = Operation::ReadSector(Phase::Settle(self.timing.settle_ticks));
    }

    fn write_sector(&mut self, multiple: bool, ibm: bool, mark: u8) {
        let Some(drive) = self.require_ready() else {
            return;
        };
        if !self.require_writable(drive) {
            return;
        }
        debug!(
            "FDC: Write sector (cmd:0x{:02x}, Si:{}, Tr:{}, Se:{}, Head:{}, multi:{})",
            self.command,
            self.side(),
            self.track,
            self.sector,
            self.head_position,
            multiple
        );
        let Some(layout) = self.locate_sector(drive, ibm) else {
            self.record_not_found();
            return;
        };
        // Only this sector's range is persisted on completion
        self.flush_buffer();
        self.flags.crc_error = !layout.id_crc_ok;
        self.multiple = multiple;
        self.write_mark = mark;
        self.sector_layout = Some(layout);
        self.cursor = Cursor {
            pos: layout.data,
            remaining: layout.size,
            stride: layout.stride,
        };
        self.operation = Operation::WriteSector(Phase::Start);
    }

    fn read_address(&mut self) {
        let Some(drive) = self.require_ready() else {
            return;
        };
        let first = if self.ensure_track(drive) { self.buffer.idam_offset(0) } else { None };
        let Some(idam) = first else {
            self.record_not_found();
            return;
        };
        let Some(id) = self.buffer.id_field(idam) else {
            self.record_not_found();
            return;
        };
        debug!(
            "FDC: Read address head {} -> track {} side {} sector {} length {}",
            self.head_position, id.track, id.side, id.sector, id.length_code
        );
        // The ID track number lands in the sector register
        self.sector = id.track;
        self.flags.crc_error = !self.buffer.id_crc_ok(idam);
        self.record_mark = 0;
        let stride = self.buffer.stride_at(idam);
        self.cursor = Cursor {
            pos: idam + stride,
            remaining: 6,
            stride,
        };
        self.operation = Operation::ReadSector(Phase::Settle(self.timing.settle_ticks));
    }

    fn read_track(&mut self) {
        let Some(drive) = self.require_ready() else {
            return;
        };
        if !self.ensure_track(drive) {
            self.complete();
            return;
        }
        debug!("FDC: Read track (Si:{}, Head:{})", self.side(), self.head_position);
        self.record_mark = 0;
        self.cursor = Cursor {
            pos: IDAM_TABLE_LEN,
            remaining: self.buffer.len().saturating_sub(IDAM_TABLE_LEN),
            stride: 1,
        };
        self.operation = Operation::ReadTrack(Phase::Settle(self.timing.settle_ticks));
    }

    fn write_track(&mut self) {
        let Some(drive) = self.require_ready() else {
            return;
        };
        if !self.require_writable(drive) {
            return;
        }
        if !self.ensure_track(drive) {
            self.complete();
            return;
        }
        debug!("FDC: Write track (Drive:{}, Si:{}, Head:{})", drive, self.side(), self.head_position);
        self.buffer.begin_raw_write();
        self.cursor = Cursor {
            pos: IDAM_TABLE_LEN,
            remaining: self.buffer.len().saturating_sub(IDAM_TABLE_LEN),
            stride: 1,
        };
        self.operation = Operation::WriteTrack(Phase::Start);
    }

    fn force_interrupt(&mut self, value: u8, conditions: u8) {
        // FORCE INTERRUPT command, type IV
        // 1101_IIII, the condition bits are latched only
        debug!("FDC: Force interrupt {:04b} during {:?}", conditions, self.operation);
        self.abort_operation();
        self.command = value;
        self.command_type = command::command_type(value, self.drive_select);
        self.interrupt_conditions = conditions;
        self.flags.clear();
        self.intrq = false;
        self.operation = Operation::Idle;
        self.cursor = Cursor::default();
        self.sector_layout = None;
        self.multiple = false;
        self.update_status();
    }

    /// Settle an interrupted transfer. A partial track format is committed
    /// as far as it got; a partial sector stays in the buffer without a CRC.
    fn abort_operation(&mut self) {
        match self.operation {
            Operation::WriteTrack(Phase::Start | Phase::Transfer) => {
                debug!(
                    "FDC: Write track interrupted with {} bytes outstanding",
                    self.cursor.remaining
                );
                self.finish_write_track();
            }
            Operation::WriteSector(Phase::Start | Phase::Transfer) => {
                debug!(
                    "FDC: Write sector interrupted with {} bytes outstanding",
                    self.cursor.remaining
                );
            }
            _ => {}
        }
    }

    /// Stop whatever transfer is running without raising INTRQ, settling
    /// partial writes first.
    fn cancel_operation(&mut self) {
        if self.operation == Operation::Idle {
            return;
        }
        debug!("FDC: Cancel {:?}", self.operation);
        self.abort_operation();
        self.operation = Operation::Idle;
        self.cursor = Cursor::default();
        self.sector_layout = None;
        self.multiple = false;
        self.flags.busy = false;
        self.flags.drq = false;
    }

    /// Make the buffer hold the track under the head of `drive`.
    fn ensure_track(&mut self, drive: usize) -> bool {
        let side = self.side();
        let track = self.head_position;
        if self.buffer.matches(drive, side, track) {
            return true;
        }
        self.flush_buffer();
        self.buffer.invalidate();

        let Some(image) = self.drives[drive].as_mut() else {
            return false;
        };
        match image.read_track(side, track) {
            Ok(data) => {
                let density = image.density();
                trace!("FDC: Load drive {} side {} track {}", drive, side, track);
                self.buffer.load(drive, side, track, density, data);
                true
            }
            Err(e) => {
                error!("FDC: Drive {}: cannot read track {} side {}: {}", drive, track, side, e);
                false
            }
        }
    }

    fn flush_buffer(&mut self) {
        if !self.buffer.dirty {
            return;
        }
        self.buffer.dirty = false;
        let Some(drive) = self.buffer.drive else {
            return;
        };
        let (side, track) = (self.buffer.side, self.buffer.track);
        if let Some(image) = self.drives[drive].as_mut() {
            match image.write_track(side, track, self.buffer.bytes()) {
                Ok(()) => trace!("FDC: Flushed drive {} side {} track {}", drive, side, track),
                Err(e) => error!("FDC: Drive {}: cannot write track {} side {}: {}", drive, track, side, e),
            }
        }
    }

    fn finish_write_track(&mut self) {
        self.buffer.finalize_written_track();
        debug!(
            "FDC: Write track complete (Si:{}, Tr:{}, {} sectors)",
            self.buffer.side,
            self.buffer.track,
            self.buffer.idam_offsets().len()
        );
        self.flush_buffer();
    }

    fn commit_sector(&mut self) {
        let Some(layout) = self.sector_layout else {
            return;
        };
        let (start, end) = self.buffer.commit_sector(&layout, self.write_mark);
        self.buffer.dirty = false;
        let Some(drive) = self.buffer.drive else {
            return;
        };
        let (side, track) = (self.buffer.side, self.buffer.track);
        if let Some(image) = self.drives[drive].as_mut() {
            if let Err(e) = image.write_range(side, track, start, &self.buffer.bytes()[start..end]) {
                error!("FDC: Drive {}: cannot write sector {} on track {}: {}", drive, self.sector, track, e);
            }
        }
    }

    fn is_reading(&self) -> bool {
        matches!(self.operation, Operation::ReadSector(_) | Operation::ReadTrack(_))
    }

    fn is_writing(&self) -> bool {
        matches!(self.operation, Operation::WriteSector(_) | Operation::WriteTrack(_))
    }

    /// Last byte of a read went out: chain the next record or finish.
    fn read_done(&mut self) {
        self.flags.drq = false;
        if self.multiple && matches!(self.operation, Operation::ReadSector(_)) {
            self.sector = self.sector.wrapping_add(1);
            trace!("FDC: Multi-sector read continuing with sector {}", self.sector);
            self.dispatch(self.command);
        } else {
            self.complete();
        }
    }

    fn write_done(&mut self) {
        if self.multiple && matches!(self.operation, Operation::WriteSector(_)) {
            self.sector = self.sector.wrapping_add(1);
            trace!("FDC: Multi-sector write continuing with sector {}", self.sector);
            self.dispatch(self.command);
        } else {
            self.complete();
        }
    }

    pub fn tick(&mut self) {
        self.spin();

        match self.operation {
            Operation::Idle => {}
            Operation::Seek { ticks } => {
                if ticks > 1 {
                    self.operation = Operation::Seek { ticks: ticks - 1 };
                } else {
                    self.complete();
                }
            }
            Operation::ReadSector(phase) | Operation::ReadTrack(phase) => match phase {
                Phase::Settle(n) if n > 1 => self.set_phase(Phase::Settle(n - 1)),
                Phase::Settle(_) | Phase::Start => {
                    self.flags.record_type = self.record_mark;
                    self.flags.drq = self.cursor.remaining > 0;
                    self.set_phase(Phase::Transfer);
                    if self.cursor.remaining == 0 {
                        self.read_done();
                    }
                }
                Phase::Transfer => {
                    if self.cursor.remaining == 0 {
                        self.read_done();
                    }
                }
                Phase::Finish(_) => self.complete(),
            },
            Operation::WriteSector(phase) | Operation::WriteTrack(phase) => match phase {
                Phase::Start | Phase::Settle(_) => {
                    self.flags.drq = true;
                    self.set_phase(Phase::Transfer);
                }
                Phase::Transfer => {
                    if self.cursor.remaining == 0 {
                        if matches!(self.operation, Operation::WriteTrack(_)) {
                            self.finish_write_track();
                        } else {
                            self.commit_sector();
                        }
                        self.set_phase(Phase::Finish(self.timing.settle_ticks));
                    }
                }
                Phase::Finish(n) if n > 1 => self.set_phase(Phase::Finish(n - 1)),
                Phase::Finish(_) => self.write_done(),
            },
        }
        self.update_status();
    }

    fn set_phase(&mut self, phase: Phase) {
        self.operation = match self.operation {
            Operation::ReadSector(_) => Operation::ReadSector(phase),
            Operation::ReadTrack(_) => Operation::ReadTrack(phase),
            Operation::WriteSector(_) => Operation::WriteSector(phase),
            Operation::WriteTrack(_) => Operation::WriteTrack(phase),
            other => other,
        };
    }

    fn spin(&mut self) {
        if self.motor_ticks == 0 {
            self.flags.index = false;
            return;
        }
        self.motor_ticks -= 1;
        self.rotation = (self.rotation + 1) % self.timing.rotation_ticks.max(1);
        self.flags.index = self.ready_drive().is_some() && self.rotation < self.timing.index_ticks;
    }

    pub fn get_status(&mut self) -> u8 {
        self.intrq = false;
        self.update_status();
        self.status
    }

    pub fn put_track(&mut self, value: u8) {
        self.track = value;
        debug!("FDC: Set track {}", value);
    }

    pub fn get_track(&self) -> u8 {
        self.track
    }

    pub fn put_sector(&mut self, value: u8) {
        self.sector = value;
        debug!("FDC: Set sector {}", value);
    }

    pub fn get_sector(&self) -> u8 {
        self.sector
    }

    pub fn put_data(&mut self, value: u8) {
        self.data = value;
        if !(self.is_writing() && self.flags.drq && self.cursor.remaining > 0) {
            return;
        }
        self.buffer.store(self.cursor.pos, self.cursor.stride, value);
        trace!("FDC: Put data {:02x} at {:04x}", value, self.cursor.pos);
        self.cursor.pos += self.cursor.stride;
        self.cursor.remaining -= 1;
        if self.cursor.remaining == 0 {
            self.flags.drq = false;
        }
        self.update_status();
    }

    pub fn get_data(&mut self) -> u8 {
        if !(self.is_reading() && self.flags.drq && self.cursor.remaining > 0) {
            return self.data;
        }
        self.data = self.buffer.byte(self.cursor.pos);
        trace!("FDC: Get data {:02x} at {:04x}", self.data, self.cursor.pos);
        self.cursor.pos += self.cursor.stride;
        self.cursor.remaining -= 1;
        if self.cursor.remaining == 0 {
            self.read_done();
        }
        self.update_status();
        self.data
    }
}

impl Drop for FloppyController {
    fn drop(&mut self) {
        self.cancel_operation();
        self.flush_buffer();
    }
}
