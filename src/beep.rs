//! Reversing beep played while the rover backs up.
//!
//! The pattern is rendered once into a WAV buffer and looped through ALSA's
//! `aplay` until stopped. The tone sits on the right channel only.

use std::f32::consts::PI;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PLAYER: &str = "aplay";
const CHANNELS: u16 = 2;
const BITS_PER_SAMPLE: u16 = 16;
pub const WAV_HEADER_LEN: usize = 44;

/// One beep-then-silence cycle
#[derive(Debug, Clone, Copy)]
pub struct BeepPattern {
    pub sample_rate: u32,
    pub tone_hz: f32,
    pub beep_ms: u32,
    pub silence_ms: u32,
    pub fade_ms: u32,
}

impl Default for BeepPattern {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            tone_hz: 1000.0,
            beep_ms: 300,
            silence_ms: 300,
            fade_ms: 20,
        }
    }
}

impl BeepPattern {
    fn samples_for(&self, ms: u32) -> usize {
        (u64::from(self.sample_rate) * u64::from(ms) / 1000) as usize
    }

    /// Stereo frames as `[left, right]`
    pub fn render(&self) -> Vec<[i16; 2]> {
        let beep = self.samples_for(self.beep_ms);
        let silence = self.samples_for(self.silence_ms);
        let fade = self.samples_for(self.fade_ms).min(beep / 2);
        let duration = self.beep_ms as f32 / 1000.0;
        let step = if beep > 1 { duration / (beep - 1) as f32 } else { 0.0 };
        let ramp = |i: usize| {
            if fade > 1 {
                i as f32 / (fade - 1) as f32
            } else {
                1.0
            }
        };

        let mut frames = Vec::with_capacity(beep + silence);
        for i in 0..beep {
            let t = i as f32 * step;
            let mut value = (2.0 * PI * self.tone_hz * t).sin();
            if i < fade {
                value *= ramp(i);
            } else if i >= beep - fade {
                value *= 1.0 - ramp(i - (beep - fade));
            }
            frames.push([0, (value * 32767.0) as i16]);
        }
        frames.resize(beep + silence, [0, 0]);
        frames
    }

    /// The cycle as a little-endian PCM WAV file
    pub fn to_wav(&self) -> Vec<u8> {
        let frames = self.render();
        let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
        let data_len = (frames.len() * usize::from(block_align)) as u32;
        let byte_rate = self.sample_rate * u32::from(block_align);

        let mut wav = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&CHANNELS.to_le_bytes());
        wav.extend_from_slice(&self.sample_rate.to_le_bytes());
        wav.extend_from_slice(&byte_rate.to_le_bytes());
        wav.extend_from_slice(&block_align.to_le_bytes());
        wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        for [left, right] in frames {
            wav.extend_from_slice(&left.to_le_bytes());
            wav.extend_from_slice(&right.to_le_bytes());
        }
        wav
    }
}

/// External program that plays one WAV cycle read from stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub program: String,
    pub args: Vec<String>,
}

impl Player {
    /// `aplay -q -D <device> -`
    pub fn aplay(device: &str) -> Self {
        Self {
            program: PLAYER.to_string(),
            args: vec!["-q".into(), "-D".into(), device.to_string(), "-".into()],
        }
    }

    fn check_runs(&self) -> std::io::Result<()> {
        let status = std::process::Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("{} exited with {}", self.program, status)))
        }
    }
}

/// Loops the beep while reversing
pub struct ReversingBeeper {
    player: Arc<Player>,
    wav: Arc<[u8]>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReversingBeeper {
    /// Check that `aplay` is usable and render the pattern
    pub fn new(device: &str, pattern: BeepPattern) -> std::io::Result<Self> {
        let player = Player::aplay(device);
        player.check_runs()?;
        info!("Reversing beep on ALSA device {}", device);
        Ok(Self::with_player(player, pattern))
    }

    /// Use `player` as is, without checking that it runs
    pub fn with_player(player: Player, pattern: BeepPattern) -> Self {
        Self {
            player: Arc::new(player),
            wav: Arc::from(pattern.to_wav()),
            task: Mutex::new(None),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Start looping; no-op if already playing. Needs a tokio runtime.
    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        debug!("Beep start");
        let player = Arc::clone(&self.player);
        let wav = Arc::clone(&self.wav);
        *task = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = play_once(&player, &wav).await {
                    warn!("Reversing beep failed: {}", e);
                    break;
                }
            }
        }));
    }

    pub fn stop(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if let Some(handle) = task.take() {
            debug!("Beep stop");
            // Dropping the in-flight player kills it
            handle.abort();
        }
    }
}

impl Drop for ReversingBeeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn play_once(player: &Player, wav: &[u8]) -> std::io::Result<()> {
    let mut child = Command::new(&player.program)
        .args(&player.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(wav).await?;
    }
    let status = child.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("{} exited with {}", player.program, status)))
    }
}
