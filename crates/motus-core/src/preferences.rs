//! Accessibility preferences (colour theme and font size), persisted and observable

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::store::{KeyValueStore, StoreError};

pub const COLOR_THEME_KEY: &str = "accessibility-colorTheme";
pub const FONT_SIZE_KEY: &str = "accessibility-fontSize";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorTheme {
    #[default]
    Default,
    Colorblind,
    HighContrast,
}

impl ColorTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorTheme::Default => "default",
            ColorTheme::Colorblind => "colorblind",
            ColorTheme::HighContrast => "high-contrast",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "default" => Some(ColorTheme::Default),
            "colorblind" => Some(ColorTheme::Colorblind),
            "high-contrast" => Some(ColorTheme::HighContrast),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl FontSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            FontSize::Small => "small",
            FontSize::Medium => "medium",
            FontSize::Large => "large",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "small" => Some(FontSize::Small),
            "medium" => Some(FontSize::Medium),
            "large" => Some(FontSize::Large),
            _ => None,
        }
    }

    /// Body text size in points
    pub fn points(&self) -> f32 {
        match self {
            FontSize::Small => 14.0,
            FontSize::Medium => 16.0,
            FontSize::Large => 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UiPreferences {
    pub color_theme: ColorTheme,
    pub font_size: FontSize,
}

impl UiPreferences {
    pub fn high_contrast(&self) -> bool {
        self.color_theme == ColorTheme::HighContrast
    }
}

/// Owns the current preferences and tells subscribers when they change
pub struct PreferenceHub<S: KeyValueStore> {
    store: S,
    tx: watch::Sender<UiPreferences>,
}

impl<S: KeyValueStore> PreferenceHub<S> {
    /// Read persisted values; unknown or missing values fall back to defaults
    pub fn load(store: S) -> Self {
        let mut prefs = UiPreferences::default();
        match store.get(COLOR_THEME_KEY) {
            Ok(Some(raw)) => match ColorTheme::parse(&raw) {
                Some(theme) => prefs.color_theme = theme,
                None => warn!(value = %raw, "Ignoring unknown colour theme"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read colour theme"),
        }
        match store.get(FONT_SIZE_KEY) {
            Ok(Some(raw)) => match FontSize::parse(&raw) {
                Some(size) => prefs.font_size = size,
                None => warn!(value = %raw, "Ignoring unknown font size"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read font size"),
        }

        let (tx, _) = watch::channel(prefs);
        Self { store, tx }
    }

    pub fn current(&self) -> UiPreferences {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiPreferences> {
        self.tx.subscribe()
    }

    /// Persist and publish new preferences
    pub fn update(&mut self, prefs: UiPreferences) -> Result<(), StoreError> {
        if prefs == self.current() {
            return Ok(());
        }
        self.store.set(COLOR_THEME_KEY, prefs.color_theme.as_str())?;
        self.store.set(FONT_SIZE_KEY, prefs.font_size.as_str())?;
        info!(
            theme = prefs.color_theme.as_str(),
            font_size = prefs.font_size.as_str(),
            "UI preferences updated"
        );
        self.tx.send_replace(prefs);
        Ok(())
    }

    /// Forget persisted values and publish the defaults
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.store.remove(COLOR_THEME_KEY)?;
        self.store.remove(FONT_SIZE_KEY)?;
        self.tx.send_replace(UiPreferences::default());
        Ok(())
    }
}
