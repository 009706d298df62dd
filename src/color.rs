use std::fmt;

/// Name of the builtin fully transparent pseudo-color.
pub const TRANSPARENT: &str = "Transparent";

/// A named display color.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Color(String);

impl Color {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn transparent() -> Self {
        Self::new(TRANSPARENT)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_transparent(&self) -> bool {
        self.0 == TRANSPARENT
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Color {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Color {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// The outcome of a rule: a color, plus an alternate shown on the "off"
/// phase of blinking.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColorChoice {
    pub primary: Color,
    pub blink: Option<Color>,
}

impl ColorChoice {
    pub fn solid(primary: Color) -> Self {
        Self {
            primary,
            blink: None,
        }
    }

    pub fn is_blinking(&self) -> bool {
        self.blink.is_some()
    }

    /// The color to draw for the given blink phase.
    pub fn at_phase(&self, blink_on: bool) -> &Color {
        match &self.blink {
            Some(alternate) if blink_on => alternate,
            _ => &self.primary,
        }
    }
}
