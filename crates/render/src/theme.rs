//! Color themes for rendered blocks.

use std::fmt;
use std::str::FromStr;

use owo_colors::Style;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeId {
    /// Removals red, insertions green.
    #[default]
    Default,
    /// Every changed line green.
    Green,
    /// Every changed line red.
    Red,
    /// No escape codes at all.
    Plain,
}

impl ThemeId {
    pub const ALL: [ThemeId; 4] = [ThemeId::Default, ThemeId::Green, ThemeId::Red, ThemeId::Plain];

    pub fn as_str(self) -> &'static str {
        match self {
            ThemeId::Default => "default",
            ThemeId::Green => "green",
            ThemeId::Red => "red",
            ThemeId::Plain => "plain",
        }
    }

    pub fn theme(self) -> Theme {
        let bold = Style::new().bold();
        let hunk = Style::new().cyan();
        let red = Style::new().red();
        let green = Style::new().green();
        match self {
            ThemeId::Default => Theme::colored(bold, hunk, red, red.bold().underline(), green, green.bold().underline()),
            ThemeId::Green => Theme::colored(bold, hunk, green.dimmed(), green.dimmed().bold(), green, green.bold().underline()),
            ThemeId::Red => Theme::colored(bold, hunk, red, red.bold().underline(), red.dimmed(), red.dimmed().bold()),
            ThemeId::Plain => Theme::plain(),
        }
    }
}

impl fmt::Display for ThemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown color theme {0:?} (expected one of: default, green, red, plain)")]
pub struct UnknownTheme(pub String);

impl FromStr for ThemeId {
    type Err = UnknownTheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ThemeId::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownTheme(s.to_string()))
    }
}

/// Concrete styles used while rendering one block.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub header: Style,
    pub hunk: Style,
    pub delete: Style,
    pub delete_emphasis: Style,
    pub insert: Style,
    pub insert_emphasis: Style,
    plain: bool,
}

impl Theme {
    fn colored(header: Style, hunk: Style, delete: Style, delete_emphasis: Style, insert: Style, insert_emphasis: Style) -> Self {
        Self { header, hunk, delete, delete_emphasis, insert, insert_emphasis, plain: false }
    }

    pub fn plain() -> Self {
        let s = Style::new();
        Self { header: s, hunk: s, delete: s, delete_emphasis: s, insert: s, insert_emphasis: s, plain: true }
    }

    pub fn is_plain(&self) -> bool {
        self.plain
    }

    pub(crate) fn paint(&self, style: Style, text: &str) -> String {
        if self.plain || text.is_empty() {
            text.to_string()
        } else {
            style.style(text).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_ids_parse_case_insensitively() {
        assert_eq!("GREEN".parse::<ThemeId>().unwrap(), ThemeId::Green);
        assert_eq!(" plain ".parse::<ThemeId>().unwrap(), ThemeId::Plain);
        assert_eq!("purple".parse::<ThemeId>().unwrap_err(), UnknownTheme("purple".into()));
        for id in ThemeId::ALL {
            assert_eq!(id.to_string().parse::<ThemeId>().unwrap(), id);
        }
    }

    #[test]
    fn plain_theme_emits_no_escapes() {
        let t = ThemeId::Plain.theme();
        assert_eq!(t.paint(t.insert, "+ a"), "+ a");
        let c = ThemeId::Default.theme();
        assert!(c.paint(c.insert, "+ a").contains('\u{1b}'));
    }
}
