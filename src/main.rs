//! motet CLI — play a live-coded file through a MIDI output.
//!
//! The file is watched for changes; every save is picked up on the next step
//! the player resolves. Ctrl-C stops the player, which silences every
//! sounding note before exit.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser as ClapParser;
use notify::{Event, EventKind, RecursiveMode, Watcher};

use motet::midi::{list_devices, DeviceOutput, MidiConfig, MidiProcessor, NullOutput};
use motet::player::{system_clock, MessageProcessor, Player, PrintProcessor, SharedCode};

#[derive(ClapParser, Debug)]
#[command(name = "motet", version, about = "Live-coding MIDI sequencer")]
struct Args {
    /// Source file to play (watched for changes while playing)
    file: Option<PathBuf>,

    /// Entry point declaration
    #[arg(short, long, default_value = "Program")]
    entry: String,

    /// Preferred MIDI output port (substring match); overrides the config
    #[arg(short, long)]
    device: Option<String>,

    /// Create a virtual MIDI output port instead of connecting to one
    #[arg(long)]
    virtual_port: bool,

    /// Seed for the randf builtin (deterministic playback)
    #[arg(long)]
    seed: Option<u64>,

    /// Initial playback speed (> 0)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Log every posted message batch
    #[arg(long)]
    print: bool,

    /// Dry run: play without opening a MIDI device (implies --print)
    #[arg(long)]
    no_midi: bool,

    /// List available MIDI output ports and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.list_devices {
        for name in list_devices() {
            println!("{name}");
        }
        return;
    }

    let Some(file) = args.file else {
        eprintln!("no source file given (try --help)");
        std::process::exit(2);
    };

    let source = match std::fs::read_to_string(&file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("cannot read {}: {e}", file.display());
            std::process::exit(1);
        }
    };

    let mut processors: Vec<Box<dyn MessageProcessor>> = Vec::new();

    if args.no_midi {
        processors.push(Box::new(MidiProcessor::new(NullOutput)));
    } else {
        let mut config = MidiConfig::load().unwrap_or_default();
        if args.device.is_some() {
            config.device_name = args.device.clone();
        }
        if args.virtual_port {
            config.virtual_port = true;
        }

        let output = match DeviceOutput::connect(&config) {
            Ok(output) => output,
            Err(e) => {
                eprintln!("failed to open MIDI output: {e}");
                std::process::exit(1);
            }
        };
        log::info!("MIDI output: {}", output.port_name());
        processors.push(Box::new(MidiProcessor::new(output)));
    }

    if args.print || args.no_midi {
        processors.push(Box::new(PrintProcessor));
    }

    let code = SharedCode::new(source);
    let _watcher = match watch(&file, code.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            log::warn!("file watching unavailable ({e}); edits will not reload");
            None
        }
    };

    let mut player = Player::new(Box::new(code), system_clock(), processors);
    if let Some(seed) = args.seed {
        player = player.with_seed(seed);
    }
    player.set_speed(args.speed);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        if let Err(e) = ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst)) {
            log::warn!("cannot install Ctrl-C handler: {e}");
        }
    }

    if let Err(e) = player.start(&args.entry) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    loop {
        if interrupted.load(Ordering::SeqCst) {
            player.stop();
        }
        player.tick();
        if player.is_stopped() || player.has_ended() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}

/// Re-read the file into the shared code buffer on every write. The player's
/// content comparison handles the rest.
fn watch(path: &Path, code: SharedCode) -> notify::Result<notify::RecommendedWatcher> {
    let watched = path.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    match std::fs::read_to_string(&watched) {
                        Ok(source) => code.set(source),
                        Err(e) => log::warn!("re-reading {}: {e}", watched.display()),
                    }
                }
            }
            Err(e) => log::warn!("watch error: {e}"),
        }
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
