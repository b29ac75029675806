//! Render quality profiles
//!
//! Quality selects the DPI multiplier handed to the renderer. It is part of
//! the cache key because it changes the produced pixels.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// PDF user space resolution
pub const BASE_DPI: f64 = 72.0;

/// Render quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderQuality {
    /// Fast, low fidelity rendering for previews
    Draft,

    /// Standard on-screen quality
    Normal,

    /// High fidelity rendering for final display
    High,

    /// Maximum quality for printing
    Print,
}

impl RenderQuality {
    /// DPI multiplier relative to the scale factor
    pub fn dpi_multiplier(self) -> f64 {
        match self {
            RenderQuality::Draft => 0.5,
            RenderQuality::Normal => 1.0,
            RenderQuality::High => 1.5,
            RenderQuality::Print => 2.0,
        }
    }

    /// Effective DPI for a scale factor at this quality
    pub fn dpi(self, scale: f64) -> f64 {
        BASE_DPI * scale * self.dpi_multiplier()
    }

    /// Stable short name used inside cache keys
    pub fn tag(self) -> &'static str {
        match self {
            RenderQuality::Draft => "draft",
            RenderQuality::Normal => "normal",
            RenderQuality::High => "high",
            RenderQuality::Print => "print",
        }
    }
}

impl Default for RenderQuality {
    fn default() -> Self {
        RenderQuality::Normal
    }
}

impl FromStr for RenderQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(RenderQuality::Draft),
            "normal" => Ok(RenderQuality::Normal),
            "high" => Ok(RenderQuality::High),
            "print" => Ok(RenderQuality::Print),
            other => Err(format!("unknown render quality: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dpi_scales_with_quality() {
        assert_eq!(RenderQuality::Normal.dpi(1.0), 72.0);
        assert_eq!(RenderQuality::Draft.dpi(2.0), 72.0);
        assert_eq!(RenderQuality::Print.dpi(1.5), 216.0);
        assert!(RenderQuality::High.dpi(1.0) > RenderQuality::Normal.dpi(1.0));
    }

    #[test]
    fn test_parse_from_tag() {
        for quality in [
            RenderQuality::Draft,
            RenderQuality::Normal,
            RenderQuality::High,
            RenderQuality::Print,
        ] {
            assert_eq!(quality.tag().parse::<RenderQuality>(), Ok(quality));
        }
        assert_eq!(" HIGH ".parse::<RenderQuality>(), Ok(RenderQuality::High));
        assert!("ultra".parse::<RenderQuality>().is_err());
    }

    #[test]
    fn test_tags_are_distinct() {
        let tags = [
            RenderQuality::Draft.tag(),
            RenderQuality::Normal.tag(),
            RenderQuality::High.tag(),
            RenderQuality::Print.tag(),
        ];
        for (i, a) in tags.iter().enumerate() {
            for b in tags.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
