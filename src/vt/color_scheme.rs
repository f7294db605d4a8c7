//! Resolves `vt100::Color` against a 256-color palette plus a pair of
//! default fg/bg colors, computing the standard xterm cube and grayscale
//! ramp rather than hardcoding all 256 entries by hand.

const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

const ANSI_16: [[u8; 3]; 16] = [
    [0, 0, 0],
    [128, 0, 0],
    [0, 128, 0],
    [128, 128, 0],
    [0, 0, 128],
    [128, 0, 128],
    [0, 128, 128],
    [192, 192, 192],
    [128, 128, 128],
    [255, 0, 0],
    [0, 255, 0],
    [255, 255, 0],
    [0, 0, 255],
    [255, 0, 255],
    [0, 255, 255],
    [255, 255, 255],
];

fn build_palette() -> [[u8; 3]; 256] {
    let mut palette = [[0u8; 3]; 256];
    palette[..16].copy_from_slice(&ANSI_16);

    for idx in 16..232 {
        let n = idx - 16;
        let r = CUBE_LEVELS[(n / 36) % 6];
        let g = CUBE_LEVELS[(n / 6) % 6];
        let b = CUBE_LEVELS[n % 6];
        palette[idx] = [r, g, b];
    }

    for idx in 232..256 {
        let level = (8 + (idx - 232) * 10) as u8;
        palette[idx] = [level, level, level];
    }

    palette
}

pub struct ColorScheme {
    default_fg: [u8; 3],
    default_bg: [u8; 3],
    palette: [[u8; 3]; 256],
}

impl ColorScheme {
    pub fn new(default_fg: [u8; 3], default_bg: [u8; 3]) -> Self {
        Self {
            default_fg,
            default_bg,
            palette: build_palette(),
        }
    }

    pub fn set_colors(&mut self, default_fg: [u8; 3], default_bg: [u8; 3]) {
        self.default_fg = default_fg;
        self.default_bg = default_bg;
    }

    pub fn default_fg(&self) -> [u8; 3] {
        self.default_fg
    }

    pub fn default_bg(&self) -> [u8; 3] {
        self.default_bg
    }

    pub fn resolve_fg(&self, color: vt100::Color) -> [u8; 3] {
        self.resolve(color, self.default_fg)
    }

    pub fn resolve_bg(&self, color: vt100::Color) -> [u8; 3] {
        self.resolve(color, self.default_bg)
    }

    fn resolve(&self, color: vt100::Color, default: [u8; 3]) -> [u8; 3] {
        match color {
            vt100::Color::Default => default,
            vt100::Color::Idx(i) => self.palette[i as usize],
            vt100::Color::Rgb(r, g, b) => [r, g, b],
        }
    }
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self::new([229, 229, 229], [0, 0, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_16_colors_are_exact() {
        let scheme = ColorScheme::default();
        assert_eq!(scheme.resolve_fg(vt100::Color::Idx(1)), [128, 0, 0]);
        assert_eq!(scheme.resolve_fg(vt100::Color::Idx(9)), [255, 0, 0]);
    }

    #[test]
    fn cube_corners_match_xterm() {
        let scheme = ColorScheme::default();
        assert_eq!(scheme.resolve_fg(vt100::Color::Idx(16)), [0, 0, 0]);
        assert_eq!(scheme.resolve_fg(vt100::Color::Idx(231)), [255, 255, 255]);
    }

    #[test]
    fn grayscale_ramp_starts_at_8_and_steps_by_10() {
        let scheme = ColorScheme::default();
        assert_eq!(scheme.resolve_fg(vt100::Color::Idx(232)), [8, 8, 8]);
        assert_eq!(scheme.resolve_fg(vt100::Color::Idx(255)), [238, 238, 238]);
    }

    #[test]
    fn default_color_uses_configured_default_and_rgb_passes_through() {
        let scheme = ColorScheme::new([1, 2, 3], [4, 5, 6]);
        assert_eq!(scheme.resolve_fg(vt100::Color::Default), [1, 2, 3]);
        assert_eq!(scheme.resolve_bg(vt100::Color::Default), [4, 5, 6]);
        assert_eq!(scheme.resolve_fg(vt100::Color::Rgb(7, 8, 9)), [7, 8, 9]);
    }
}
