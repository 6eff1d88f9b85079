//! duodeck headless engine binary: opens a real output device, wires it to
//! the [`duodeck_audio::Engine`], and drives the engine from stdin commands
//! for manual smoke-testing. No GUI -- the desktop overlay is out of scope.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use duodeck_audio::{Command, Engine, EngineConfig, PitchRangeKey};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
enum AudioError {
    #[error("no default output device available")]
    DeviceUnavailable,
    #[error("device does not support a usable output config: {0}")]
    SampleRateUnsupported(String),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::DeviceUnavailable)?;
    let supported_config = device
        .default_output_config()
        .map_err(|e| AudioError::SampleRateUnsupported(e.to_string()))?;

    let sample_rate = supported_config.sample_rate().0;
    let channels = supported_config.channels() as usize;

    let engine_config = EngineConfig {
        sample_rate,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Mutex::new(Engine::new(engine_config)));

    // Pre-allocated stereo scratch buffer for the downmix/upmix paths below,
    // sized generously for any reasonable device block size.
    let mut scratch = vec![0.0f32; 1 << 16];

    let engine_for_callback = engine.clone();
    let stream = device.build_output_stream(
        &supported_config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            let stereo_len = frames * 2;
            if stereo_len > scratch.len() {
                data.fill(0.0);
                return;
            }
            let Ok(mut engine) = engine_for_callback.try_lock() else {
                data.fill(0.0);
                return;
            };
            let stereo = &mut scratch[..stereo_len];
            engine.process(stereo, frames);

            match channels {
                2 => data.copy_from_slice(stereo),
                1 => {
                    for (i, sample) in data.iter_mut().enumerate() {
                        *sample = (stereo[i * 2] + stereo[i * 2 + 1]) * 0.5;
                    }
                }
                n => {
                    for f in 0..frames {
                        data[f * n] = stereo[f * 2];
                        data[f * n + 1] = stereo[f * 2 + 1];
                        for ch in 2..n {
                            data[f * n + ch] = 0.0;
                        }
                    }
                }
            }
        },
        |err| error!(%err, "audio stream error"),
        None,
    )?;
    stream.play()?;
    info!(sample_rate, channels, "audio stream started");

    let shutdown = Arc::new(AtomicBool::new(false));

    let sync_engine = engine.clone();
    let sync_shutdown = shutdown.clone();
    let sync_handle = thread::spawn(move || {
        let interval = sync_engine.lock().unwrap().sync_tick_interval();
        while !sync_shutdown.load(Ordering::Relaxed) {
            thread::sleep(interval);
            sync_engine.lock().unwrap().tick_sync();
        }
    });

    let poll_engine = engine.clone();
    let poll_shutdown = shutdown.clone();
    let poll_handle = thread::spawn(move || {
        while !poll_shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));
            poll_engine.lock().unwrap().poll_analysis();
        }
    });

    run_command_loop(&engine);

    shutdown.store(true, Ordering::Relaxed);
    let _ = sync_handle.join();
    let _ = poll_handle.join();
    Ok(())
}

fn run_command_loop(engine: &Arc<Mutex<Engine>>) {
    println!("duodeck ready. commands: load <deck> <path> | play <deck> | pause <deck> | stop <deck>");
    println!("  seek <deck> <secs> | tempo <deck> <ratio> | sync <slave> <master> | xfade <-1..1>");
    println!("  gain <deck> <0..1> | status | quit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let action = match parse_command(&parts) {
            Ok(action) => action,
            Err(msg) => {
                println!("error: {msg}");
                continue;
            }
        };

        match action {
            LoopAction::Quit => break,
            LoopAction::Status => {
                let engine = engine.lock().unwrap();
                println!("{:?}", engine.telemetry());
            }
            LoopAction::Dispatch(cmd) => {
                let mut engine = engine.lock().unwrap();
                if let Some(event) = engine.handle(cmd) {
                    println!("{event:?}");
                }
            }
        }
        io::stdout().flush().ok();
    }
}

fn parse_deck(s: &str) -> Result<char, String> {
    let c = s.chars().next().ok_or("missing deck letter")?;
    match c.to_ascii_uppercase() {
        'A' | 'B' => Ok(c.to_ascii_uppercase()),
        _ => Err(format!("unknown deck '{s}'")),
    }
}

enum LoopAction {
    Quit,
    Status,
    Dispatch(Command),
}

fn parse_command(parts: &[&str]) -> Result<LoopAction, String> {
    match parts {
        ["quit"] | ["exit"] => Ok(LoopAction::Quit),
        ["status"] => Ok(LoopAction::Status),
        ["load", deck, path] => Ok(LoopAction::Dispatch(Command::LoadTrack {
            deck: parse_deck(deck)?,
            path: path.into(),
        })),
        ["play", deck] => Ok(LoopAction::Dispatch(Command::Play(parse_deck(deck)?))),
        ["pause", deck] => Ok(LoopAction::Dispatch(Command::Pause(parse_deck(deck)?))),
        ["stop", deck] => Ok(LoopAction::Dispatch(Command::Stop(parse_deck(deck)?))),
        ["seek", deck, secs] => Ok(LoopAction::Dispatch(Command::Seek {
            deck: parse_deck(deck)?,
            seconds: secs.parse().map_err(|_| "bad seconds")?,
        })),
        ["tempo", deck, ratio] => Ok(LoopAction::Dispatch(Command::SetTempo {
            deck: parse_deck(deck)?,
            ratio: ratio.parse().map_err(|_| "bad ratio")?,
        })),
        ["sync", slave, master] => Ok(LoopAction::Dispatch(Command::SyncTo {
            slave: parse_deck(slave)?,
            master: parse_deck(master)?,
        })),
        ["xfade", x] => Ok(LoopAction::Dispatch(Command::SetCrossfader(
            x.parse().map_err(|_| "bad crossfader value")?,
        ))),
        ["gain", deck, value] => Ok(LoopAction::Dispatch(Command::SetGain {
            deck: parse_deck(deck)?,
            gain: value.parse().map_err(|_| "bad gain")?,
        })),
        ["range", deck, key] => {
            let range = match *key {
                "8" => PitchRangeKey::Narrow,
                "16" => PitchRangeKey::Standard,
                "50" => PitchRangeKey::Wide,
                other => return Err(format!("unknown pitch range '{other}'")),
            };
            Ok(LoopAction::Dispatch(Command::SetPitchRange { deck: parse_deck(deck)?, range }))
        }
        _ => {
            warn!(?parts, "unrecognized command");
            Err("unrecognized command".to_string())
        }
    }
}
