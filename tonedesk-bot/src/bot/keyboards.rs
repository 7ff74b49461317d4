//! Button layouts for every menu

use tonedesk_common::format::{AudioFormat, Bitrate};
use tonedesk_common::session::SpatialPosition;

use super::actions::{Action, HelpTopic, Menu};
use crate::transport::{Choice, ChoiceGrid};

fn choice(label: &str, action: Action) -> Choice {
    Choice::new(label, action.token())
}

fn cancel_row() -> Vec<Choice> {
    vec![choice("❌ Cancel", Action::Cancel)]
}

fn back_to_options_row() -> Vec<Choice> {
    vec![
        choice("⬅️ Back", Action::Open(Menu::Options)),
        choice("❌ Cancel", Action::Cancel),
    ]
}

fn format_row(formats: &[AudioFormat]) -> Vec<Choice> {
    formats
        .iter()
        .map(|f| choice(&f.code().to_ascii_uppercase(), Action::Format(*f)))
        .collect()
}

pub fn start() -> ChoiceGrid {
    vec![
        vec![
            choice("🎵 How to Use", Action::Help(HelpTopic::Commands)),
            choice("❓ Help", Action::Help(HelpTopic::Main)),
        ],
        vec![
            choice("✨ Features", Action::Help(HelpTopic::Features)),
            choice("📁 Formats", Action::Help(HelpTopic::Formats)),
        ],
    ]
}

pub fn help() -> ChoiceGrid {
    let topic = |label: &str, topic: HelpTopic| choice(label, Action::Help(topic));
    vec![
        vec![
            topic("📋 Commands", HelpTopic::Commands),
            topic("✨ Features", HelpTopic::Features),
        ],
        vec![
            topic("⚙️ Settings", HelpTopic::Settings),
            topic("📁 Formats", HelpTopic::Formats),
        ],
        vec![
            topic("🎚 EQ Guide", HelpTopic::Eq),
            topic("🎛 Effects", HelpTopic::Effects),
        ],
        vec![
            topic("🎧 3D Audio", HelpTopic::Spatial),
            topic("💡 Examples", HelpTopic::Examples),
        ],
        vec![topic("❔ FAQ", HelpTopic::Faq)],
        vec![choice("🏠 Main Menu", Action::MainMenu)],
    ]
}

pub fn back_to_help() -> ChoiceGrid {
    vec![vec![choice("⬅️ Back to Help", Action::Help(HelpTopic::Main))]]
}

pub fn back_to_main() -> ChoiceGrid {
    vec![vec![choice("🏠 Main Menu", Action::MainMenu)]]
}

pub fn formats() -> ChoiceGrid {
    vec![
        format_row(&[AudioFormat::Mp3, AudioFormat::M4a, AudioFormat::Aac]),
        format_row(&[AudioFormat::Flac, AudioFormat::Wav, AudioFormat::Alac]),
        format_row(&[AudioFormat::Ogg, AudioFormat::Opus, AudioFormat::Wma]),
        vec![choice("More Formats...", Action::MoreFormats)],
        back_to_options_row(),
    ]
}

pub fn more_formats() -> ChoiceGrid {
    vec![
        vec![
            choice("WavPack", Action::Format(AudioFormat::Wv)),
            choice("TTA", Action::Format(AudioFormat::Tta)),
        ],
        vec![
            choice("AIFF", Action::Format(AudioFormat::Aiff)),
            choice("WebM", Action::Format(AudioFormat::Webm)),
            choice("AC3", Action::Format(AudioFormat::Ac3)),
        ],
        vec![choice("⬅️ Back", Action::Open(Menu::Convert))],
    ]
}

pub fn bitrates() -> ChoiceGrid {
    let rate = |label: &str, kbps: u32| choice(label, Action::Bitrate(Bitrate::kbps(kbps)));
    vec![
        vec![rate("128k", 128), rate("192k", 192), rate("256k", 256)],
        vec![rate("320k (Best)", 320), rate("500k", 500)],
        back_to_options_row(),
    ]
}

pub fn sample_rates() -> ChoiceGrid {
    let rate = |label: &str, hz: u32| choice(label, Action::SampleRate(hz));
    vec![
        vec![rate("22.05 kHz", 22_050), rate("44.1 kHz (CD)", 44_100)],
        vec![rate("48 kHz (Pro)", 48_000), rate("96 kHz (Hi-Res)", 96_000)],
        vec![rate("192 kHz (Studio)", 192_000)],
        back_to_options_row(),
    ]
}

pub fn channels() -> ChoiceGrid {
    let layout = |label: &str, n: u8| choice(label, Action::Channels(n));
    vec![
        vec![layout("Mono (1)", 1), layout("Stereo (2)", 2)],
        vec![layout("5.1 Surround", 6), layout("7.1 Surround", 8)],
        back_to_options_row(),
    ]
}

pub fn bass_boost() -> ChoiceGrid {
    let level = |label: &str, db: u8| choice(label, Action::BassBoost(db));
    vec![
        vec![level("+1 dB", 1), level("+2 dB", 2), level("+3 dB", 3)],
        vec![level("+4 dB", 4), level("+5 dB (Max)", 5)],
        vec![level("Off", 0)],
        back_to_options_row(),
    ]
}

pub fn effects() -> ChoiceGrid {
    let mut grid: ChoiceGrid = crate::chain::EffectKind::NAMES
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|name| {
                    let mut label = name.to_string();
                    if let Some(first) = label.get_mut(0..1) {
                        first.make_ascii_uppercase();
                    }
                    choice(&label, Action::Effect(name.to_string()))
                })
                .collect()
        })
        .collect();
    grid.push(vec![
        choice("🧹 Clear", Action::ClearEffects),
        choice("✅ Done", Action::Open(Menu::Options)),
    ]);
    grid
}

pub fn spatial() -> ChoiceGrid {
    let at = |label: &str, azimuth: f64| {
        choice(
            label,
            Action::Spatial(SpatialPosition {
                azimuth,
                elevation: 0.0,
            }),
        )
    };
    vec![
        vec![at("Front Center", 0.0), at("Left", -90.0)],
        vec![at("Right", 90.0), at("Behind", 180.0)],
        vec![choice("Custom", Action::SpatialCustom)],
        back_to_options_row(),
    ]
}

pub fn normalize() -> ChoiceGrid {
    vec![
        vec![
            choice("✅ On (-14 LUFS)", Action::Normalize(true)),
            choice("Off", Action::Normalize(false)),
        ],
        back_to_options_row(),
    ]
}

pub fn processing_options() -> ChoiceGrid {
    let open = |label: &str, menu: Menu| choice(label, Action::Open(menu));
    vec![
        vec![
            open("🔄 Convert Format", Menu::Convert),
            open("📊 Change Bitrate", Menu::Bitrate),
        ],
        vec![
            open("🎼 Sample Rate", Menu::SampleRate),
            open("🔈 Channels", Menu::Channels),
        ],
        vec![
            open("🎛 Apply Effects", Menu::Effects),
            open("🎧 3D Audio", Menu::Spatial),
        ],
        vec![
            open("📈 Normalize", Menu::Normalize),
            open("🔊 Bass Boost", Menu::Bass),
        ],
        vec![
            choice("🎚 Use EQ Command", Action::EqHelp),
            open("ℹ️ File Info", Menu::Info),
        ],
        vec![choice("▶️ Process Now", Action::ConfirmProcess)],
        cancel_row(),
    ]
}

pub fn continue_or_finish() -> ChoiceGrid {
    vec![vec![
        choice("✏️ Continue Editing", Action::ContinueEditing),
        choice("✅ Done", Action::Finish),
    ]]
}

pub fn cancel_only() -> ChoiceGrid {
    vec![cancel_row()]
}
