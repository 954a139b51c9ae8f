//! Task colors and labeled line rendering.
//!
//! Every task gets one color from a fixed palette, picked by its index. Lines are
//! rendered as `{color}{index}> {text}{reset}\n` so the operator can tell which
//! task produced which line.

use std::fmt;

const RESET: &[u8] = b"\x1b[0m";

/// A basic ANSI foreground color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    /// SGR parameter for this foreground color.
    pub fn code(self) -> u8 {
        match self {
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Blue => 34,
            Color::Magenta => 35,
            Color::Cyan => 36,
            Color::White => 37,
        }
    }

    /// Renders one complete labeled line, terminator included.
    ///
    /// `text` must not contain the line terminator.
    pub fn paint(self, index: usize, text: &[u8]) -> Vec<u8> {
        let mut line = format!("\x1b[{}m{}> ", self.code(), index).into_bytes();
        line.reserve(text.len() + RESET.len() + 1);
        line.extend_from_slice(text);
        line.extend_from_slice(RESET);
        line.push(b'\n');
        line
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Magenta => "magenta",
            Color::Cyan => "cyan",
            Color::White => "white",
        };
        f.write_str(name)
    }
}

const STANDARD: [Color; 7] = [
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::White,
];

/// An ordered, immutable set of task colors.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    colors: &'static [Color],
}

impl Palette {
    /// The seven basic foreground colors, red first.
    pub fn standard() -> Self {
        Self { colors: &STANDARD }
    }

    #[cfg(test)]
    pub fn from_static(colors: &'static [Color]) -> Self {
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Returns the color for task `index`, or `None` past the end of the palette.
    pub fn get(&self, index: usize) -> Option<Color> {
        self.colors.get(index).copied()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::standard()
    }
}
