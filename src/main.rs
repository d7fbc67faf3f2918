use clap::Parser;
use log::{error, info, LevelFilter};
use std::error::Error;
use std::time::Duration;

mod bus;
mod command;
mod config;
mod crc;
mod dmk;
mod floppy_controller;
mod format;
mod host;
mod media;
mod status;

use self::bus::{FdcBus, Scheduler};
use self::config::Config;
use self::dmk::{Density, IDAM_TABLE_LEN};
use self::floppy_controller::{FloppyController, MAX_DRIVES};
use self::format::TrackLayout;
use self::host::Host;

#[derive(Parser)]
#[command(
    name = "dmkfdc",
    about = "WD179x floppy disk controller emulator over DMK disk images",
    long_about = "dmkfdc - WD179x floppy disk controller emulator\n\n\
        Mounts DMK images in up to four drives and drives them through the\n\
        TRS-80 Model I register interface.\n\
        Configuration is loaded from dmkfdc.toml; command-line arguments override config file settings.",
    version
)]
struct Cli {
    /// Disk image file for drive 0
    #[arg(short = '0', long, value_name = "FILE")]
    drive0: Option<String>,

    /// Disk image file for drive 1
    #[arg(short = '1', long, value_name = "FILE")]
    drive1: Option<String>,

    /// Disk image file for drive 2
    #[arg(short = '2', long, value_name = "FILE")]
    drive2: Option<String>,

    /// Disk image file for drive 3
    #[arg(short = '3', long, value_name = "FILE")]
    drive3: Option<String>,

    /// Configuration file (default: dmkfdc.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Trace floppy disk controller commands
    #[arg(short = 'f', long)]
    fdc_trace: bool,

    /// Trace floppy disk controller read/write data
    #[arg(short = 'w', long)]
    fdc_trace_rw: bool,

    /// Print the geometry of every mounted drive
    #[arg(long)]
    info: bool,

    /// Read one sector through the controller and hex dump it
    #[arg(long, value_name = "DRIVE:SIDE:TRACK:SECTOR")]
    dump: Option<String>,

    /// Create a blank DMK image
    #[arg(long, value_name = "FILE")]
    create: Option<String>,

    /// Tracks for --create
    #[arg(long, default_value_t = 40)]
    tracks: u8,

    /// Sides for --create
    #[arg(long, default_value_t = 1)]
    sides: u8,

    /// Single density for --create and --format
    #[arg(long)]
    single_density: bool,

    /// Format every track of a drive, then verify it
    #[arg(long, value_name = "DRIVE")]
    format: Option<usize>,

    /// Sectors per track for --format
    #[arg(long, default_value_t = 10)]
    sectors: u8,

    /// Sector size code for --format (0=128, 1=256, 2=512, 3=1024)
    #[arg(long, default_value_t = 1)]
    size_code: u8,
}

fn init_logging(fdc_trace: bool, fdc_trace_rw: bool) {
    let level = if fdc_trace_rw {
        LevelFilter::Trace
    } else if fdc_trace {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .filter_module("dmkfdc", level)
        .init();
}

fn parse_dump(arg: &str) -> Option<(usize, u8, u8, u8)> {
    let parts: Vec<&str> = arg.split(':').collect();
    if parts.len() != 4 {
        return None;
    }
    let drive = parts[0].parse().ok()?;
    Some((drive, parts[1].parse().ok()?, parts[2].parse().ok()?, parts[3].parse().ok()?))
}

fn hex_dump(data: &[u8]) {
    for (line, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
            .collect();
        println!("{:04x}: {:<47} |{}|", line * 16, hex.join(" "), ascii);
    }
}

fn format_drive(host: &mut Host, bus: &FdcBus, cli: &Cli, drive: usize) -> Result<(), Box<dyn Error>> {
    let geometry = bus.with(|fdc| {
        fdc.drive(drive)
            .map(|image| (image.tracks(), image.sides(), image.density(), image.track_len()))
    });
    let Some(Some((tracks, sides, density, track_len))) = geometry else {
        return Err(format!("no disk in drive {}", drive).into());
    };
    let density = if cli.single_density { Density::Single } else { density };

    for track in 0..tracks {
        for side in 0..sides {
            host.select(drive, side);
            host.seek(track)?;
            let layout = TrackLayout::standard(density, track, side, cli.sectors, 0, cli.size_code);
            if !layout.fits(track_len) {
                return Err(format!(
                    "{} sectors of {} bytes do not fit a track of {} bytes",
                    cli.sectors,
                    layout.sector_size(),
                    track_len
                )
                .into());
            }
            host.write_track(&layout.build(track_len - IDAM_TABLE_LEN))?;
        }
    }
    info!("Formatted drive {}: {} tracks, {} sides", drive, tracks, sides);

    let mut bad = 0;
    for track in 0..tracks {
        for side in 0..sides {
            host.select(drive, side);
            host.seek(track)?;
            for sector in 0..cli.sectors {
                let (_, status) = host.read_sector(track, sector)?;
                if status & 0x9C != 0 {
                    error!("Track {} side {} sector {}: status {:02x}", track, side, sector, status);
                    bad += 1;
                }
            }
        }
    }
    if bad > 0 {
        return Err(format!("{} sectors failed to verify", bad).into());
    }
    println!("Drive {} formatted and verified", drive);
    Ok(())
}

fn run(cli: &Cli, config: &Config) -> Result<(), Box<dyn Error>> {
    if let Some(path) = &cli.create {
        let density: Density = config.create_density.into();
        let track_len = format::default_track_len(density);
        media::create_blank(path, cli.tracks, cli.sides, density, track_len)?;
        println!("Created {} ({} tracks, {} sides)", path, cli.tracks, cli.sides);
    }

    let mut fdc = FloppyController::new(config.timing);
    for (drive, path) in config.drive_paths().iter().enumerate() {
        if let Some(path) = path {
            if let Err(e) = fdc.mount(drive, path) {
                error!("Drive {}: cannot mount {}: {}", drive, path, e);
            }
        }
    }

    let show_info = cli.info || (cli.dump.is_none() && cli.format.is_none() && cli.create.is_none());
    if show_info {
        for drive in 0..MAX_DRIVES {
            match fdc.drive(drive) {
                Some(image) => println!("Drive {}: {}", drive, image.info()),
                None => println!("Drive {}: empty", drive),
            }
        }
    }

    if cli.dump.is_none() && cli.format.is_none() {
        return Ok(());
    }

    let bus = FdcBus::new(fdc);
    let mut scheduler = Scheduler::start(bus.clone(), Duration::from_micros(config.timing.tick_interval_us));
    let mut host = Host::new(bus.clone());

    let result = (|| -> Result<(), Box<dyn Error>> {
        if let Some(drive) = cli.format {
            format_drive(&mut host, &bus, cli, drive)?;
        }
        if let Some(arg) = &cli.dump {
            let (drive, side, track, sector) =
                parse_dump(arg).ok_or_else(|| format!("bad --dump argument '{}'", arg))?;
            if drive >= MAX_DRIVES {
                return Err(format!("there is no drive {}", drive).into());
            }
            host.select(drive, side);
            host.restore()?;
            host.seek(track)?;
            let (data, status) = host.read_sector(track, sector)?;
            println!("Drive {} side {} track {} sector {}: {} bytes, status {:02x}", drive, side, track, sector, data.len(), status);
            hex_dump(&data);
        }
        Ok(())
    })();

    scheduler.stop();
    bus.with(|fdc| fdc.flush());
    result
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.fdc_trace, cli.fdc_trace_rw);

    // Load configuration from file, then apply CLI overrides
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    config.apply_cli_overrides(
        [
            cli.drive0.as_deref(),
            cli.drive1.as_deref(),
            cli.drive2.as_deref(),
            cli.drive3.as_deref(),
        ],
        cli.single_density,
    );

    if let Err(e) = run(&cli, &config) {
        eprintln!("dmkfdc: {}", e);
        std::process::exit(1);
    }
}
