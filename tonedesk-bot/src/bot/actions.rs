//! Button action tokens
//!
//! Every inline button carries a short token (`format_mp3`, `bass_3`,
//! `3d_-90_0`, ...). [`Action::parse`] and [`Action::token`] convert between
//! the wire text and the typed action.

use std::str::FromStr;
use tonedesk_common::format::{AudioFormat, Bitrate};
use tonedesk_common::session::SpatialPosition;

use crate::error::ValidationError;

/// Submenus reachable from the processing options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
    Options,
    Convert,
    Bitrate,
    SampleRate,
    Channels,
    Effects,
    Spatial,
    Normalize,
    Bass,
    Info,
}

impl Menu {
    const ALL: [Menu; 10] = [
        Menu::Options,
        Menu::Convert,
        Menu::Bitrate,
        Menu::SampleRate,
        Menu::Channels,
        Menu::Effects,
        Menu::Spatial,
        Menu::Normalize,
        Menu::Bass,
        Menu::Info,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Menu::Options => "options",
            Menu::Convert => "convert",
            Menu::Bitrate => "bitrate",
            Menu::SampleRate => "sample",
            Menu::Channels => "channels",
            Menu::Effects => "effects",
            Menu::Spatial => "3d",
            Menu::Normalize => "normalize",
            Menu::Bass => "bass",
            Menu::Info => "info",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Main,
    Commands,
    Features,
    Settings,
    Formats,
    Eq,
    Effects,
    Spatial,
    Examples,
    Faq,
}

impl HelpTopic {
    const ALL: [HelpTopic; 10] = [
        HelpTopic::Main,
        HelpTopic::Commands,
        HelpTopic::Features,
        HelpTopic::Settings,
        HelpTopic::Formats,
        HelpTopic::Eq,
        HelpTopic::Effects,
        HelpTopic::Spatial,
        HelpTopic::Examples,
        HelpTopic::Faq,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            HelpTopic::Main => "main",
            HelpTopic::Commands => "commands",
            HelpTopic::Features => "features",
            HelpTopic::Settings => "settings",
            HelpTopic::Formats => "formats",
            HelpTopic::Eq => "eq",
            HelpTopic::Effects => "effects",
            HelpTopic::Spatial => "3d",
            HelpTopic::Examples => "examples",
            HelpTopic::Faq => "faq",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Format(AudioFormat),
    MoreFormats,
    Bitrate(Bitrate),
    SampleRate(u32),
    Channels(u8),
    BassBoost(u8),
    Effect(String),
    ClearEffects,
    Spatial(SpatialPosition),
    SpatialCustom,
    Normalize(bool),
    Open(Menu),
    EqHelp,
    ConfirmProcess,
    ContinueEditing,
    Finish,
    Cancel,
    Help(HelpTopic),
    MainMenu,
}

fn malformed(token: &str) -> ValidationError {
    ValidationError::MalformedCommand(format!("Unknown action '{}'", token))
}

fn number<T: FromStr>(token: &str, text: &str) -> Result<T, ValidationError> {
    text.parse().map_err(|_| malformed(token))
}

impl Action {
    pub fn parse(token: &str) -> Result<Self, ValidationError> {
        let token = token.trim();
        let action = match token {
            "format_more" => Action::MoreFormats,
            "effects_clear" => Action::ClearEffects,
            "3d_custom" => Action::SpatialCustom,
            "normalize_on" => Action::Normalize(true),
            "normalize_off" => Action::Normalize(false),
            "show_eq_help" => Action::EqHelp,
            "confirm_process" => Action::ConfirmProcess,
            "continue_editing" => Action::ContinueEditing,
            "finish" => Action::Finish,
            "cancel_operation" => Action::Cancel,
            "main_menu" => Action::MainMenu,
            _ => return Self::parse_prefixed(token),
        };
        Ok(action)
    }

    fn parse_prefixed(token: &str) -> Result<Self, ValidationError> {
        if let Some(code) = token.strip_prefix("format_") {
            return AudioFormat::from_str(code)
                .map(Action::Format)
                .map_err(|_| ValidationError::UnsupportedFormat(code.to_string()));
        }
        if let Some(rest) = token.strip_prefix("bitrate_") {
            return Bitrate::from_str(rest)
                .map(Action::Bitrate)
                .map_err(|_| malformed(token));
        }
        if let Some(rest) = token.strip_prefix("sample_") {
            return number(token, rest).map(Action::SampleRate);
        }
        if let Some(rest) = token.strip_prefix("channels_") {
            return number(token, rest).map(Action::Channels);
        }
        if let Some(rest) = token.strip_prefix("bass_") {
            return number(token, rest).map(Action::BassBoost);
        }
        if let Some(name) = token.strip_prefix("effect_") {
            return Ok(Action::Effect(name.to_ascii_lowercase()));
        }
        if let Some(rest) = token.strip_prefix("3d_") {
            let (azimuth, elevation) = rest.rsplit_once('_').ok_or_else(|| malformed(token))?;
            return Ok(Action::Spatial(SpatialPosition {
                azimuth: number(token, azimuth)?,
                elevation: number(token, elevation)?,
            }));
        }
        if let Some(rest) = token.strip_prefix("process_") {
            // Older keyboards appended the user id: process_convert_12345
            let code = match rest.rsplit_once('_') {
                Some((head, tail)) if tail.chars().all(|c| c.is_ascii_digit()) => head,
                _ => rest,
            };
            return Menu::from_code(code).map(Action::Open).ok_or_else(|| malformed(token));
        }
        if let Some(code) = token.strip_prefix("help_") {
            return HelpTopic::from_code(code)
                .map(Action::Help)
                .ok_or_else(|| malformed(token));
        }
        Err(malformed(token))
    }

    pub fn token(&self) -> String {
        match self {
            Action::Format(format) => format!("format_{}", format.code()),
            Action::MoreFormats => "format_more".to_string(),
            Action::Bitrate(bitrate) => format!("bitrate_{}", bitrate),
            Action::SampleRate(rate) => format!("sample_{}", rate),
            Action::Channels(channels) => format!("channels_{}", channels),
            Action::BassBoost(db) => format!("bass_{}", db),
            Action::Effect(name) => format!("effect_{}", name),
            Action::ClearEffects => "effects_clear".to_string(),
            Action::Spatial(position) => {
                format!("3d_{}_{}", position.azimuth, position.elevation)
            }
            Action::SpatialCustom => "3d_custom".to_string(),
            Action::Normalize(true) => "normalize_on".to_string(),
            Action::Normalize(false) => "normalize_off".to_string(),
            Action::Open(menu) => format!("process_{}", menu.code()),
            Action::EqHelp => "show_eq_help".to_string(),
            Action::ConfirmProcess => "confirm_process".to_string(),
            Action::ContinueEditing => "continue_editing".to_string(),
            Action::Finish => "finish".to_string(),
            Action::Cancel => "cancel_operation".to_string(),
            Action::Help(topic) => format!("help_{}", topic.code()),
            Action::MainMenu => "main_menu".to_string(),
        }
    }
}
