//! Display modes and SDI link configuration

use serde::{Deserialize, Serialize};
use std::fmt;

use super::flags::DisplayModeFlags;
use super::format::Resolution;

/// Video timing/resolution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayModeId {
    Ntsc,
    Pal,
    Hd720p50,
    Hd720p5994,
    Hd720p60,
    Hd1080i50,
    Hd1080i5994,
    Hd1080i6000,
    Hd1080p2398,
    Hd1080p24,
    Hd1080p25,
    Hd1080p2997,
    Hd1080p30,
    Hd1080p50,
    Hd1080p5994,
    Hd1080p6000,
    Uhd2160p2398,
    Uhd2160p24,
    Uhd2160p25,
    Uhd2160p2997,
    Uhd2160p30,
    Uhd2160p50,
    Uhd2160p5994,
    Uhd2160p60,
}

/// Field order of a display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldDominance {
    Progressive,
    UpperFieldFirst,
    LowerFieldFirst,
}

/// Frame duration expressed as `duration / time_scale` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub duration: i64,
    pub time_scale: i64,
}

impl FrameRate {
    pub const fn new(duration: i64, time_scale: i64) -> Self {
        Self {
            duration,
            time_scale,
        }
    }

    /// Frames per second as a float (59.94, 25.0, ...)
    pub fn fps(&self) -> f64 {
        self.time_scale as f64 / self.duration as f64
    }

    /// Wall-clock length of one frame
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.duration as f64 / self.time_scale as f64)
    }
}

/// Full description of a display mode as reported by the hardware
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayMode {
    pub id: DisplayModeId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub field_dominance: FieldDominance,
    #[serde(skip)]
    pub flags: DisplayModeFlags,
}

impl DisplayMode {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{})", self.name, self.width, self.height)
    }
}

impl DisplayModeId {
    pub const ALL: [DisplayModeId; 24] = [
        DisplayModeId::Ntsc,
        DisplayModeId::Pal,
        DisplayModeId::Hd720p50,
        DisplayModeId::Hd720p5994,
        DisplayModeId::Hd720p60,
        DisplayModeId::Hd1080i50,
        DisplayModeId::Hd1080i5994,
        DisplayModeId::Hd1080i6000,
        DisplayModeId::Hd1080p2398,
        DisplayModeId::Hd1080p24,
        DisplayModeId::Hd1080p25,
        DisplayModeId::Hd1080p2997,
        DisplayModeId::Hd1080p30,
        DisplayModeId::Hd1080p50,
        DisplayModeId::Hd1080p5994,
        DisplayModeId::Hd1080p6000,
        DisplayModeId::Uhd2160p2398,
        DisplayModeId::Uhd2160p24,
        DisplayModeId::Uhd2160p25,
        DisplayModeId::Uhd2160p2997,
        DisplayModeId::Uhd2160p30,
        DisplayModeId::Uhd2160p50,
        DisplayModeId::Uhd2160p5994,
        DisplayModeId::Uhd2160p60,
    ];

    /// Identifier as written in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayModeId::Ntsc => "NTSC",
            DisplayModeId::Pal => "PAL",
            DisplayModeId::Hd720p50 => "HD720p50",
            DisplayModeId::Hd720p5994 => "HD720p5994",
            DisplayModeId::Hd720p60 => "HD720p60",
            DisplayModeId::Hd1080i50 => "HD1080i50",
            DisplayModeId::Hd1080i5994 => "HD1080i5994",
            DisplayModeId::Hd1080i6000 => "HD1080i6000",
            DisplayModeId::Hd1080p2398 => "HD1080p2398",
            DisplayModeId::Hd1080p24 => "HD1080p24",
            DisplayModeId::Hd1080p25 => "HD1080p25",
            DisplayModeId::Hd1080p2997 => "HD1080p2997",
            DisplayModeId::Hd1080p30 => "HD1080p30",
            DisplayModeId::Hd1080p50 => "HD1080p50",
            DisplayModeId::Hd1080p5994 => "HD1080p5994",
            DisplayModeId::Hd1080p6000 => "HD1080p6000",
            DisplayModeId::Uhd2160p2398 => "4K2160p2398",
            DisplayModeId::Uhd2160p24 => "4K2160p24",
            DisplayModeId::Uhd2160p25 => "4K2160p25",
            DisplayModeId::Uhd2160p2997 => "4K2160p2997",
            DisplayModeId::Uhd2160p30 => "4K2160p30",
            DisplayModeId::Uhd2160p50 => "4K2160p50",
            DisplayModeId::Uhd2160p5994 => "4K2160p5994",
            DisplayModeId::Uhd2160p60 => "4K2160p60",
        }
    }

    /// Standard timing for this mode
    pub fn info(&self) -> DisplayMode {
        use DisplayModeId::*;
        use FieldDominance::*;

        let (name, width, height, duration, time_scale, field) = match self {
            Ntsc => ("NTSC", 720, 486, 1001, 30000, LowerFieldFirst),
            Pal => ("PAL", 720, 576, 1000, 25000, UpperFieldFirst),
            Hd720p50 => ("720p50", 1280, 720, 1000, 50000, Progressive),
            Hd720p5994 => ("720p59.94", 1280, 720, 1001, 60000, Progressive),
            Hd720p60 => ("720p60", 1280, 720, 1000, 60000, Progressive),
            Hd1080i50 => ("1080i50", 1920, 1080, 1000, 25000, UpperFieldFirst),
            Hd1080i5994 => ("1080i59.94", 1920, 1080, 1001, 30000, UpperFieldFirst),
            Hd1080i6000 => ("1080i60", 1920, 1080, 1000, 30000, UpperFieldFirst),
            Hd1080p2398 => ("1080p23.98", 1920, 1080, 1001, 24000, Progressive),
            Hd1080p24 => ("1080p24", 1920, 1080, 1000, 24000, Progressive),
            Hd1080p25 => ("1080p25", 1920, 1080, 1000, 25000, Progressive),
            Hd1080p2997 => ("1080p29.97", 1920, 1080, 1001, 30000, Progressive),
            Hd1080p30 => ("1080p30", 1920, 1080, 1000, 30000, Progressive),
            Hd1080p50 => ("1080p50", 1920, 1080, 1000, 50000, Progressive),
            Hd1080p5994 => ("1080p59.94", 1920, 1080, 1001, 60000, Progressive),
            Hd1080p6000 => ("1080p60", 1920, 1080, 1000, 60000, Progressive),
            Uhd2160p2398 => ("2160p23.98", 3840, 2160, 1001, 24000, Progressive),
            Uhd2160p24 => ("2160p24", 3840, 2160, 1000, 24000, Progressive),
            Uhd2160p25 => ("2160p25", 3840, 2160, 1000, 25000, Progressive),
            Uhd2160p2997 => ("2160p29.97", 3840, 2160, 1001, 30000, Progressive),
            Uhd2160p30 => ("2160p30", 3840, 2160, 1000, 30000, Progressive),
            Uhd2160p50 => ("2160p50", 3840, 2160, 1000, 50000, Progressive),
            Uhd2160p5994 => ("2160p59.94", 3840, 2160, 1001, 60000, Progressive),
            Uhd2160p60 => ("2160p60", 3840, 2160, 1000, 60000, Progressive),
        };

        let mut flags = if height < 720 {
            DisplayModeFlags::COLORSPACE_REC601
        } else {
            DisplayModeFlags::COLORSPACE_REC709
        };
        // Frame-packed 3D is only defined for the HD rasters
        if width == 1280 || (width == 1920 && time_scale / duration <= 30) {
            flags |= DisplayModeFlags::SUPPORTS_3D;
        }

        DisplayMode {
            id: *self,
            name: name.to_string(),
            width,
            height,
            frame_rate: FrameRate::new(duration, time_scale),
            field_dominance: field,
            flags,
        }
    }
}

impl fmt::Display for DisplayModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DisplayModeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        DisplayModeId::ALL
            .iter()
            .copied()
            .find(|id| {
                id.as_str().to_ascii_lowercase() == wanted
                    || id.info().name.to_ascii_lowercase() == wanted
            })
            .ok_or_else(|| format!("Unknown display mode: {}", s))
    }
}

/// Number of SDI links ganged together to carry one signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkConfiguration {
    #[default]
    SingleLink,
    DualLink,
    QuadLink,
}

impl fmt::Display for LinkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkConfiguration::SingleLink => write!(f, "single"),
            LinkConfiguration::DualLink => write!(f, "dual"),
            LinkConfiguration::QuadLink => write!(f, "quad"),
        }
    }
}

impl std::str::FromStr for LinkConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "singlelink" | "single-link" => Ok(LinkConfiguration::SingleLink),
            "dual" | "duallink" | "dual-link" => Ok(LinkConfiguration::DualLink),
            "quad" | "quadlink" | "quad-link" => Ok(LinkConfiguration::QuadLink),
            _ => Err(format!("Unknown link configuration: {}", s)),
        }
    }
}
