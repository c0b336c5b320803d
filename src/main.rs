use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use log::{debug, error, info};

use dotboy::emulator::{Emulator, Event};
use dotboy::gameboy::GameBoy;
use dotboy::hardware::Model;

#[derive(Parser)]
#[command(name = "dotboy", version, about = "Headless Game Boy / Game Boy Color runner")]
struct Args {
    /// ROM image to run
    rom: PathBuf,

    /// Force DMG mode regardless of the cartridge header
    #[arg(long, conflicts_with = "cgb")]
    dmg: bool,

    /// Force CGB mode regardless of the cartridge header
    #[arg(long)]
    cgb: bool,

    /// Stop after this many frames
    #[arg(long, conflicts_with = "seconds")]
    frames: Option<u64>,

    /// Stop after this many emulated seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// Run as fast as possible instead of pacing to ~59.73 Hz
    #[arg(long)]
    unlimited: bool,

    /// Battery save path (defaults to the ROM path with a .sav extension)
    #[arg(long)]
    save: Option<PathBuf>,

    /// Echo serial output to stdout
    #[arg(long)]
    serial: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let rom = fs::read(&args.rom)?;
    let forced = if args.dmg {
        Some(Model::Dmg)
    } else if args.cgb {
        Some(Model::Cgb)
    } else {
        None
    };
    let mut gb = GameBoy::with_rom(rom, forced)?;
    info!("running as {:?}", gb.model());

    let save_path = args
        .save
        .clone()
        .unwrap_or_else(|| args.rom.with_extension("sav"));
    if gb.has_battery()
        && let Ok(bytes) = fs::read(&save_path)
    {
        gb.load_save_bytes(&bytes);
        info!("loaded save from {}", save_path.display());
    }

    // 70224 dots per frame at 4194304 Hz.
    let frame_limit = args
        .frames
        .or(args.seconds.map(|s| s * 4_194_304 / 70_224));

    let (mut emulator, events) = Emulator::new(gb);
    emulator.limit_rate = !args.unlimited;
    let handle = emulator.handle();
    let worker = thread::spawn(move || emulator.run());

    let mut frames = 0u64;
    let mut exit = ExitCode::SUCCESS;
    for event in events.iter() {
        match event {
            Event::Frame(_) => {
                frames += 1;
                if args.serial {
                    let bytes = handle.with_machine(|gb| gb.take_serial_output());
                    if !bytes.is_empty() {
                        let mut stdout = std::io::stdout().lock();
                        stdout.write_all(&bytes)?;
                        stdout.flush()?;
                    }
                }
                if frame_limit.is_some_and(|limit| frames >= limit) {
                    handle.stop();
                    break;
                }
            }
            Event::Fault { error, regs } => {
                error!("emulation fault: {error}");
                error!("{regs}");
                exit = ExitCode::FAILURE;
                break;
            }
            Event::LcdEnableChanged(on) => {
                debug!("LCD {}", if on { "enabled" } else { "disabled" });
            }
            Event::SerialStarted | Event::WatchpointHit(_) => {}
        }
    }
    handle.stop();
    worker.join().map_err(|_| "emulation thread panicked")?;

    if let Some(bytes) = handle.with_machine(|gb| gb.save_bytes()) {
        fs::write(&save_path, bytes)?;
        info!("wrote save to {}", save_path.display());
    }
    info!("ran {frames} frames");
    Ok(exit)
}
