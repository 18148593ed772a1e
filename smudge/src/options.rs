use serde::{Deserialize, Serialize};
use smudge_atlas::{Text, TextProperties};
use smudge_renderer::DEFAULT_FRAME_RATE;

use crate::Result;

/// Construction options of a [`Smudge`](crate::Smudge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Device pixels per logical pixel.
    pub ratio: f64,
    /// Build right after construction.
    pub autobuild: bool,
    /// Run the frame loop right after construction and after every installed build.
    pub autostart: bool,
    /// New texts start playing.
    pub autoplay: bool,
    pub frame_rate: f64,
    /// Limits the atlas size below what the device supports.
    pub max_texture_dimension: Option<u32>,
    /// The initial texts.
    pub texts: Vec<TextConfig>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            autobuild: true,
            autostart: true,
            autoplay: true,
            frame_rate: DEFAULT_FRAME_RATE,
            max_texture_dimension: None,
            texts: Vec::new(),
        }
    }
}

/// A text as it appears in a configuration file: `id`, `text` and its properties inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub properties: TextProperties,
}

impl TextConfig {
    pub fn to_text(&self) -> Text {
        Text::with_properties(self.id.as_str(), self.text.as_str(), self.properties.clone())
    }
}

impl Options {
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Ok(toml::from_str(toml)?)
    }

    pub fn with_texts(mut self, texts: impl IntoIterator<Item = TextConfig>) -> Self {
        self.texts.extend(texts);
        self
    }
}
