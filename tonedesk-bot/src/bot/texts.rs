//! User-facing message texts

use std::fmt::Write;
use tonedesk_common::format::AudioFormat;
use tonedesk_common::human::{format_duration, format_size};
use tonedesk_common::session::{AudioMetadata, Settings, SESSION_TTL_SECS};

use super::actions::HelpTopic;
use crate::chain::{EffectKind, MAX_EQ_BANDS, NORMALIZE_TARGET_LUFS};

pub const WELCOME: &str = "🎧 Welcome to ToneDesk!\n\n\
Send me an audio file and I will convert, equalize, add effects, \
position it in 3D space or normalize its loudness.\n\n\
Everything happens through the buttons under each message. \
Tap Help for the full guide.";

pub const PROCESSING: &str = "⚙️ Processing audio... Please wait.";

pub const PROCESSING_DONE: &str = "✅ Processing complete.";

pub const SESSION_ENDED: &str = "✅ Session ended. Send another file whenever you like.";

pub const CANCELLED: &str = "🚫 Cancelled. Your session has been cleared.";

pub const CANCELLED_DURING_PROCESSING: &str =
    "🚫 Cancelled. The running job stops after its current step and its result is discarded.";

pub const SESSION_EXPIRED_DURING_PROCESSING: &str =
    "⌛ Your session expired while processing. Send the file again to start over.";

pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel.";

pub const PLAIN_TEXT_HINT: &str = "Send an audio file to get started, or /help for the guide.";

pub const CHOOSE_FORMAT: &str = "🔄 Choose the output format:";
pub const CHOOSE_BITRATE: &str = "📊 Choose the bitrate (ignored by lossless formats):";
pub const CHOOSE_SAMPLE_RATE: &str = "🎼 Choose the sample rate:";
pub const CHOOSE_CHANNELS: &str = "🔈 Choose the channel layout:";
pub const CHOOSE_BASS: &str = "🔊 Choose the bass boost:";
pub const CHOOSE_EFFECTS: &str =
    "🎛 Tap effects to add them in order. Tap Done when finished.";
pub const CHOOSE_POSITION: &str =
    "🎧 Where should the sound come from? Use headphones for the best result.";
pub const CUSTOM_POSITION: &str = "🎧 Send /3d <azimuth> [elevation] to place the sound.\n\
Azimuth runs from -180 to 180 degrees (negative is left, 90 is right).\n\
Example: /3d -45";
pub const CHOOSE_NORMALIZE: &str = "📈 Normalize loudness to -14 LUFS?";

fn commands() -> String {
    "📋 Commands\n\n\
     /start - welcome screen\n\
     /help - this guide\n\
     /cancel - stop and clear your session\n\
     /info - details of the current file\n\
     /eq --100hz +3db --1khz -2db - set a parametric EQ\n\
     /3d -90 - place the sound at a custom angle\n\n\
     How to use:\n\
     1. Send an audio file\n\
     2. Pick settings from the menu or use /eq\n\
     3. Tap Process Now and wait for the result\n\
     4. Continue editing the result or tap Done"
        .to_string()
}

fn features() -> String {
    let effects = EffectKind::NAMES.join(", ");
    format!(
        "✨ Features\n\n\
         Conversion to {} formats, lossy and lossless\n\
         Parametric EQ from 20 Hz to 40 kHz, up to {} bands\n\
         Effects: {}\n\
         Binaural 3D positioning\n\
         Loudness normalization to {} LUFS\n\
         Bass boost, speed change and fades\n\n\
         Results can be edited again: each processed file can become the \
         source of the next step.",
        AudioFormat::ALL.len(),
        MAX_EQ_BANDS,
        effects,
        NORMALIZE_TARGET_LUFS
    )
}

fn settings_guide() -> String {
    "⚙️ Settings\n\n\
     Bitrate: 128k for speech, 192k standard, 320k for music, up to 512k\n\
     Sample rate: 22.05 kHz voice, 44.1 kHz CD, 48 kHz default, up to 192 kHz\n\
     Channels: mono, stereo, 5.1 or 7.1\n\
     EQ gain: -20 dB to +20 dB per band\n\
     Bass boost: 0 to 5 dB around 100 Hz\n\n\
     Settings stay with your file until you send a new one."
        .to_string()
}

fn formats_guide() -> String {
    let mut lossy = Vec::new();
    let mut lossless = Vec::new();
    for format in AudioFormat::ALL {
        if format.is_lossless() {
            lossless.push(format.display_name());
        } else {
            lossy.push(format.display_name());
        }
    }
    format!(
        "📁 Output formats\n\nLossy:\n{}\n\nLossless:\n{}\n\n\
         Any format ffmpeg can read is accepted as input.",
        lossy.join("\n"),
        lossless.join("\n")
    )
}

fn eq_guide() -> String {
    "🎚 EQ guide\n\n\
     /eq --<frequency>hz <gain>db, repeated for each band\n\n\
     Warm bass: /eq --60hz +4db --100hz +3db\n\
     Clear vocals: /eq --200hz -1db --3khz +2db --5khz +1db\n\
     Brighter top: /eq --8khz +2db --12khz +1.5db\n\n\
     Bands below 200 Hz act as a low shelf, above 8 kHz as a high shelf, \
     the rest as a bell. Small steps of 1 to 3 dB sound most natural."
        .to_string()
}

fn effects_guide() -> String {
    "🎛 Effects\n\n\
     Reverb: room 0.5, wet 33%\n\
     Chorus: 1 Hz, depth 0.25\n\
     Phaser: 1 Hz, depth 0.5\n\
     Compressor: -16 dB threshold, 4:1\n\
     Delay: 250 ms, feedback 0.3\n\
     Distortion: 25 dB drive\n\
     Limiter: -1 dB ceiling\n\
     Bitcrush: 8 bit\n\n\
     Effects run in the order you tap them. Adding the same effect twice \
     is not allowed."
        .to_string()
}

fn spatial_guide() -> String {
    "🎧 3D audio\n\n\
     The sound is placed around your head using a time and level \
     difference between the ears. Listen on headphones.\n\n\
     Presets: front (0°), left (-90°), right (90°), behind (180°)\n\
     Custom: /3d <azimuth> [elevation]\n\n\
     The source must be mono or stereo; stereo is folded to mono first."
        .to_string()
}

fn examples() -> String {
    "💡 Examples\n\n\
     Convert: send a file, Convert Format, MP3, Change Bitrate, 320k, Process Now\n\
     EQ: send a file, /eq --60hz +3db --3khz +2db, Process Now\n\
     Effects: send a file, Apply Effects, Reverb, Compressor, Done, Process Now\n\
     Multi-step: process once, Continue Editing, pick new settings, process again"
        .to_string()
}

fn faq() -> String {
    format!(
        "❔ FAQ\n\n\
         How long is my file kept?\n\
         Until you finish, cancel, send another file or stay idle for {} minutes.\n\n\
         Can I apply several effects?\n\
         Yes, tap each one in the effects menu.\n\n\
         Best format for quality?\n\
         FLAC for lossless, MP3 320k for lossy.\n\n\
         Can I stop a long job?\n\
         Yes, /cancel works at any time.",
        SESSION_TTL_SECS / 60
    )
}

pub fn help(topic: HelpTopic) -> String {
    match topic {
        HelpTopic::Main => "❓ Help\n\nPick a topic below.".to_string(),
        HelpTopic::Commands => commands(),
        HelpTopic::Features => features(),
        HelpTopic::Settings => settings_guide(),
        HelpTopic::Formats => formats_guide(),
        HelpTopic::Eq => eq_guide(),
        HelpTopic::Effects => effects_guide(),
        HelpTopic::Spatial => spatial_guide(),
        HelpTopic::Examples => examples(),
        HelpTopic::Faq => faq(),
    }
}

pub fn file_info(metadata: &AudioMetadata, filename: &str) -> String {
    let mut text = format!("📄 {}\n\n", filename);
    let _ = writeln!(text, "Format: {}", metadata.format);
    let _ = writeln!(text, "Codec: {}", metadata.codec);
    if metadata.bitrate_kbps > 0 {
        let _ = writeln!(text, "Bitrate: {} kbps", metadata.bitrate_kbps);
    }
    let _ = writeln!(text, "Sample rate: {} Hz", metadata.sample_rate);
    let _ = writeln!(text, "Channels: {}", metadata.channels);
    let _ = writeln!(text, "Duration: {}", format_duration(metadata.duration_secs));
    let _ = write!(text, "Size: {}", format_size(metadata.size_bytes));
    text
}

pub fn settings_summary(settings: &Settings) -> String {
    let mut text = String::from("⚙️ Current settings\n\n");
    let _ = write!(text, "Format: {}", settings.format.display_name());
    if !settings.format.is_lossless() {
        let _ = write!(text, " @ {}", settings.bitrate);
    }
    let _ = writeln!(text);
    let _ = writeln!(
        text,
        "Sample rate: {} Hz, channels: {}",
        settings.sample_rate, settings.channels
    );
    if !settings.eq.is_empty() {
        let bands: Vec<String> = settings
            .eq
            .iter()
            .map(|b| format!("{} Hz {:+.1} dB", b.freq_hz, b.gain_db))
            .collect();
        let _ = writeln!(text, "EQ: {}", bands.join(", "));
    }
    if !settings.effects.is_empty() {
        let _ = writeln!(text, "Effects: {}", settings.effects.join(" → "));
    }
    if let Some(position) = settings.spatial {
        let _ = writeln!(
            text,
            "3D: azimuth {}°, elevation {}°",
            position.azimuth, position.elevation
        );
    }
    if settings.normalize {
        let _ = writeln!(text, "Normalize: {} LUFS", NORMALIZE_TARGET_LUFS);
    }
    if settings.bass_boost > 0 {
        let _ = writeln!(text, "Bass boost: +{} dB", settings.bass_boost);
    }
    if (settings.speed - 1.0).abs() > f64::EPSILON {
        let _ = writeln!(text, "Speed: {}x", settings.speed);
    }
    if settings.fade_in > 0.0 || settings.fade_out > 0.0 {
        let _ = writeln!(
            text,
            "Fade in/out: {} s / {} s",
            settings.fade_in, settings.fade_out
        );
    }
    text.trim_end().to_string()
}

pub fn options_prompt(settings: &Settings) -> String {
    format!("{}\n\nChoose what to change, then tap Process Now.", settings_summary(settings))
}

pub fn result_caption(metadata: &AudioMetadata, settings: &Settings) -> String {
    let mut caption = format!(
        "✅ Done: {}, {}, {}",
        settings.format.display_name(),
        format_duration(metadata.duration_secs),
        format_size(metadata.size_bytes)
    );
    if !settings.eq.is_empty() {
        let _ = write!(caption, "\nEQ bands: {}", settings.eq.len());
    }
    if !settings.effects.is_empty() {
        let _ = write!(caption, "\nEffects: {}", settings.effects.join(", "));
    }
    caption
}

pub fn download_started(filename: &str) -> String {
    format!("📥 Downloading {}...", filename)
}
