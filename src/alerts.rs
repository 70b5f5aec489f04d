use anyhow::Result;
use log::{debug, info, warn};
use std::io::Write;

/// Receives the "target temperature reached" notification.
///
/// Implementations must not fail: anything that goes wrong while alerting
/// is logged and swallowed.
pub trait AlertNotifier {
    fn notify(&self, current: f64, target: f64);
}

/// An audible cue. Selected once at startup by [`select_chime`].
pub trait Chime {
    /// Play the cue, blocking until it is finished.
    fn play(&self) -> Result<()>;

    /// Short backend name for log output.
    fn name(&self) -> &'static str;
}

/// Prints a banner to stdout and plays a chime.
pub struct ConsoleNotifier {
    chime: Box<dyn Chime>,
}

impl ConsoleNotifier {
    pub fn new(chime: Box<dyn Chime>) -> Self {
        Self { chime }
    }
}

impl AlertNotifier for ConsoleNotifier {
    fn notify(&self, current: f64, target: f64) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "\n*** {} ***\n", alert_message(current, target));
        let _ = stdout.flush();
        drop(stdout);

        if let Err(e) = self.chime.play() {
            warn!("Audible alert via {} failed: {}", self.chime.name(), e);
        }
    }
}

/// Text shown to the user when the goal is reached.
pub fn alert_message(current: f64, target: f64) -> String {
    format!(
        "GOAL REACHED! Bed temperature is {:.1}°C (target: {}°C)",
        current, target
    )
}

/// Rings the terminal bell three times.
pub struct TerminalBell;

impl Chime for TerminalBell {
    fn play(&self) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(b"\x07\x07\x07")?;
        stdout.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "terminal bell"
    }
}

/// Does nothing. Used when sound is disabled.
pub struct SilentChime;

impl Chime for SilentChime {
    fn play(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "silent"
    }
}

#[cfg(feature = "sound")]
mod tone {
    use anyhow::{Result, anyhow};
    use rodio::source::{SineWave, Source, Zero};
    use rodio::{OutputStream, Sink};
    use std::time::Duration;

    /// Frequency (Hz) and length (ms) of each tone of the alert melody.
    const TONES: [(f32, u64); 3] = [(1000.0, 500), (1200.0, 500), (1400.0, 1000)];

    const GAP: Duration = Duration::from_millis(100);

    /// Plays a three-tone melody on the default audio output.
    pub struct ToneChime;

    impl ToneChime {
        /// Returns a chime only if an output device can actually be opened.
        pub fn probe() -> Option<Self> {
            OutputStream::try_default().ok().map(|_| ToneChime)
        }
    }

    impl super::Chime for ToneChime {
        fn play(&self) -> Result<()> {
            // The stream must outlive playback; it stops the sink when dropped.
            let (_stream, handle) = OutputStream::try_default()
                .map_err(|e| anyhow!("Failed to open audio output stream: {}", e))?;
            let sink =
                Sink::try_new(&handle).map_err(|e| anyhow!("Failed to create audio sink: {}", e))?;

            for (i, (frequency, millis)) in TONES.iter().enumerate() {
                if i > 0 {
                    sink.append(Zero::<f32>::new(1, 48_000).take_duration(GAP));
                }
                sink.append(
                    SineWave::new(*frequency)
                        .take_duration(Duration::from_millis(*millis))
                        .amplify(0.25),
                );
            }

            sink.sleep_until_end();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "audio tones"
        }
    }
}

/// Pick the best available chime.
///
/// With sound disabled this is [`SilentChime`]. Otherwise the audio tone
/// backend is used when built with the `sound` feature and an output device
/// opens; everything else gets the [`TerminalBell`].
pub fn select_chime(enabled: bool) -> Box<dyn Chime> {
    if !enabled {
        debug!("Sound disabled, alerts will be silent");
        return Box::new(SilentChime);
    }

    #[cfg(feature = "sound")]
    {
        if let Some(chime) = tone::ToneChime::probe() {
            info!("Audio output available, alerts will play tones");
            return Box::new(chime);
        }
        warn!("No audio output device found, falling back to terminal bell");
    }

    info!("Alerts will ring the terminal bell");
    Box::new(TerminalBell)
}
