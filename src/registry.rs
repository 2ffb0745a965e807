// The fixed parameter catalogue, one static table per page.
//
// Adding a parameter means adding a row here; nothing else keys off the ids.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::LookupError;
use crate::template::{DISABLE_ENABLE, FALSE_TRUE, ParameterTemplate};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Page {
    System,
    Video,
    Audio,
    Advanced,
    AdvancedAudio,
}

impl Page {
    pub const ALL: [Page; 5] = [
        Page::System,
        Page::Video,
        Page::Audio,
        Page::Advanced,
        Page::AdvancedAudio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Page::System => "system",
            Page::Video => "video",
            Page::Audio => "audio",
            Page::Advanced => "advanced",
            Page::AdvancedAudio => "advanced-audio",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Page::System => "System Notify",
            Page::Video => "Video Notify",
            Page::Audio => "Audio Notify",
            Page::Advanced => "Advanced Notify",
            Page::AdvancedAudio => "Advanced Audio Notify",
        }
    }

    /// Whether this page's ids have been checked against a real card. Only the
    /// system page has; the rest follow the card's id scheme but are unverified.
    pub fn ids_confirmed(self) -> bool {
        matches!(self, Page::System)
    }

    pub fn axes(self) -> PageAxes {
        match self {
            Page::System => PageAxes {
                primary: None,
                secondary: None,
            },
            Page::Video | Page::Advanced => PageAxes {
                primary: Some(INPUT_AXIS),
                secondary: None,
            },
            Page::Audio => PageAxes {
                primary: Some(INPUT_AXIS),
                secondary: Some(CHANNEL_AXIS),
            },
            Page::AdvancedAudio => PageAxes {
                primary: Some(INPUT_AXIS),
                secondary: Some(PAIR_AXIS),
            },
        }
    }
}

impl std::fmt::Display for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The instance axis (`x`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimaryAxis {
    pub name: &'static str,
    pub count: u32,
}

/// The channel or pair axis (`y`).
///
/// The device numbers secondaries from zero, but the two directions do not
/// always agree on how the user's 1-based index maps onto it. `load_offset` and
/// `apply_offset` are subtracted from the 1-based index before substitution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecondaryAxis {
    pub name: &'static str,
    pub count: u32,
    pub load_offset: u32,
    pub apply_offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageAxes {
    pub primary: Option<PrimaryAxis>,
    pub secondary: Option<SecondaryAxis>,
}

pub const INPUT_AXIS: PrimaryAxis = PrimaryAxis {
    name: "input",
    count: 32,
};

pub const CHANNEL_AXIS: SecondaryAxis = SecondaryAxis {
    name: "channel",
    count: 16,
    load_offset: 1,
    apply_offset: 1,
};

// Pair traps are written as pair - 1 but read back with the raw pair number.
pub const PAIR_AXIS: SecondaryAxis = SecondaryAxis {
    name: "pair",
    count: 8,
    load_offset: 0,
    apply_offset: 1,
};

const SYSTEM_NOTIFY: &str = "System Notify";
const VIDEO_TRAP: &str = "Video Trap";
const VIDEO_FAULT: &str = "Video Fault";
const AUDIO_TRAP: &str = "Audio Trap";
const AUDIO_FAULT: &str = "Audio Fault";
const ADVANCED_TRAP: &str = "Advanced Trap";
const PAIR_TRAP: &str = "Audio Pair Trap";

static SYSTEM: &[ParameterTemplate] = &[
    ParameterTemplate::numeric("CPU Usage Threshold", "343@i", 0, 100, "%"),
    ParameterTemplate::numeric("CPU Usage Duration", "344@i", 0, 600, "seconds"),
    ParameterTemplate::numeric("CPU Usage Reset Duration", "345@i", 0, 60, "seconds"),
    ParameterTemplate::numeric("High Lifetime Disk Usage Threshold", "219@i", 0, 100, "%"),
    ParameterTemplate::selector("CPU Usage too high", "850.2@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("CPU Temperature too high", "850.3@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("Memory Usage too high", "850.4@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("FPGA temperature fabric too high", "850.5@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("FPGA temperature BR too high", "850.6@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("FPGA temperature TR too high", "850.7@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("FPGA temperature BL too high", "850.8@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("FPGA temperature TL too high", "850.9@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("NTP Error", "850.18@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("CPU Load too high", "850.19@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("NTP Unsynchronised", "850.20@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("SSD Critical Warning", "850.21@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("High lifetime disk usage", "850.23@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("Genlock REF 1 Missing", "850.24@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("Genlock REF 2 Missing", "850.25@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("Serial FVH 1 Missing", "850.26@i", FALSE_TRUE, SYSTEM_NOTIFY),
    ParameterTemplate::selector("Serial FVH 2 Missing", "850.27@i", FALSE_TRUE, SYSTEM_NOTIFY),
];

static VIDEO: &[ParameterTemplate] = &[
    ParameterTemplate::numeric("Video Missing Duration", "530.x.10@i", 0, 60, "seconds").with_default(2),
    ParameterTemplate::numeric("Freeze Duration", "530.x.12@i", 0, 600, "seconds").with_default(10),
    ParameterTemplate::numeric("Black Duration", "530.x.13@i", 0, 600, "seconds").with_default(10),
    ParameterTemplate::numeric("Black Level Threshold", "530.x.14@i", 0, 100, "%").with_default(5),
    ParameterTemplate::selector("Video Missing trap", "851.x.1@i", DISABLE_ENABLE, VIDEO_TRAP),
    ParameterTemplate::selector("Video Freeze trap", "851.x.2@i", DISABLE_ENABLE, VIDEO_TRAP),
    ParameterTemplate::selector("Video Black trap", "851.x.3@i", DISABLE_ENABLE, VIDEO_TRAP),
    ParameterTemplate::selector("Format Mismatch trap", "851.x.4@i", DISABLE_ENABLE, VIDEO_TRAP),
    ParameterTemplate::selector("Video Missing fault", "852.x.1@i", DISABLE_ENABLE, VIDEO_FAULT),
    ParameterTemplate::selector("Video Freeze fault", "852.x.2@i", DISABLE_ENABLE, VIDEO_FAULT),
    ParameterTemplate::selector("Video Black fault", "852.x.3@i", DISABLE_ENABLE, VIDEO_FAULT),
    ParameterTemplate::selector("Format Mismatch fault", "852.x.4@i", DISABLE_ENABLE, VIDEO_FAULT),
];

static AUDIO: &[ParameterTemplate] = &[
    ParameterTemplate::numeric("Audio Loss Level", "540.x.y.1@i", -96, 0, "dBFS").with_default(-60),
    ParameterTemplate::numeric("Audio Loss Duration", "540.x.y.2@i", 0, 60, "seconds").with_default(5),
    ParameterTemplate::numeric("Audio Over Level", "540.x.y.3@i", -20, 0, "dBFS").with_default(-1),
    ParameterTemplate::selector("Audio Loss trap", "853.x.y.1@i", DISABLE_ENABLE, AUDIO_TRAP),
    ParameterTemplate::selector("Audio Over trap", "853.x.y.2@i", DISABLE_ENABLE, AUDIO_TRAP),
    ParameterTemplate::selector("Audio Loss fault", "854.x.y.1@i", DISABLE_ENABLE, AUDIO_FAULT),
    ParameterTemplate::selector("Audio Over fault", "854.x.y.2@i", DISABLE_ENABLE, AUDIO_FAULT),
];

static ADVANCED: &[ParameterTemplate] = &[
    ParameterTemplate::numeric("CRC Error Window", "560.x.1@i", 1, 60, "seconds").with_default(10),
    ParameterTemplate::numeric("CRC Error Threshold", "560.x.2@i", 0, 1000, "errors").with_default(1),
    ParameterTemplate::numeric("Caption Missing Duration", "560.x.3@i", 0, 600, "seconds").with_default(30),
    ParameterTemplate::selector("CRC Error trap", "855.x.1@i", DISABLE_ENABLE, ADVANCED_TRAP),
    ParameterTemplate::selector("Caption Missing trap", "855.x.2@i", DISABLE_ENABLE, ADVANCED_TRAP),
    ParameterTemplate::selector("Timecode Missing trap", "855.x.3@i", DISABLE_ENABLE, ADVANCED_TRAP),
];

static ADVANCED_AUDIO: &[ParameterTemplate] = &[
    ParameterTemplate::numeric("Phase Reversal Duration", "565.x.y.1@i", 0, 60, "seconds").with_default(5),
    ParameterTemplate::numeric("Mono Detect Duration", "565.x.y.2@i", 0, 60, "seconds").with_default(5),
    ParameterTemplate::selector("Phase Reversal trap", "856.x.y.1@i", FALSE_TRUE, PAIR_TRAP),
    ParameterTemplate::selector("Mono Detect trap", "856.x.y.2@i", FALSE_TRUE, PAIR_TRAP),
    ParameterTemplate::selector("Dolby Missing trap", "856.x.y.3@i", FALSE_TRUE, PAIR_TRAP),
];

/// Templates on `page`, in display order.
pub fn templates_for_page(page: Page) -> &'static [ParameterTemplate] {
    match page {
        Page::System => SYSTEM,
        Page::Video => VIDEO,
        Page::Audio => AUDIO,
        Page::Advanced => ADVANCED,
        Page::AdvancedAudio => ADVANCED_AUDIO,
    }
}

/// Notification groups on `page`, in first-appearance order.
pub fn groups_for_page(page: Page) -> Vec<&'static str> {
    let mut groups = Vec::new();
    for template in templates_for_page(page) {
        if let Some(group) = template.group {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
    }
    groups
}

/// Look a template up by name: exact (case-insensitive) match first, then a
/// unique substring match.
pub fn find_template(page: Page, input: &str) -> Result<&'static ParameterTemplate, LookupError> {
    let templates = templates_for_page(page);
    let names: Vec<&'static str> = templates.iter().map(|t| t.name).collect();
    let idx = pick(&names, input, "parameter", page)?;
    Ok(&templates[idx])
}

/// Look a notification group up by name, same rules as `find_template`.
pub fn find_group(page: Page, input: &str) -> Result<&'static str, LookupError> {
    let groups = groups_for_page(page);
    let idx = pick(&groups, input, "group", page)?;
    Ok(groups[idx])
}

fn pick(
    names: &[&'static str],
    input: &str,
    kind: &'static str,
    page: Page,
) -> Result<usize, LookupError> {
    let lower = input.to_lowercase();
    if let Some(idx) = names.iter().position(|n| n.to_lowercase() == lower) {
        return Ok(idx);
    }

    let matches: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| n.to_lowercase().contains(&lower))
        .map(|(i, _)| i)
        .collect();

    match matches.len() {
        0 => Err(LookupError::NotFound {
            kind,
            input: input.to_string(),
            page: page.name(),
        }),
        1 => Ok(matches[0]),
        _ => Err(LookupError::Ambiguous {
            kind,
            input: input.to_string(),
            matches: matches.iter().map(|&i| names[i]).collect(),
        }),
    }
}
