//! Appearance variants and their metadata payloads.
//!
//! Appearance is a closed set. Turning one into wire metadata is a pure
//! function of the variant and a [`TextFormatter`]; nothing here touches
//! viewers or the transport.

use crate::error::{DisplayError, Result};
use crate::protocol::{AppearanceMeta, EntityType};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Text formatting
// ---------------------------------------------------------------------------

/// Turns a markup string into a renderable text component.
pub trait TextFormatter: Send + Sync {
    fn format(&self, markup: &str) -> serde_json::Value;
}

/// Emits the markup verbatim as a plain text component.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextFormatter;

impl TextFormatter for PlainTextFormatter {
    fn format(&self, markup: &str) -> serde_json::Value {
        serde_json::json!({ "text": markup })
    }
}

// ---------------------------------------------------------------------------
// Display options shared by all appearances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Billboard {
    Fixed,
    Vertical,
    Horizontal,
    #[default]
    Center,
}

impl Billboard {
    pub fn as_str(self) -> &'static str {
        match self {
            Billboard::Fixed => "fixed",
            Billboard::Vertical => "vertical",
            Billboard::Horizontal => "horizontal",
            Billboard::Center => "center",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    pub billboard: Billboard,
    /// Ticks the client interpolates position/rotation changes over.
    pub teleport_duration: i32,
    /// Ticks the client interpolates transform changes over.
    pub interpolation_duration: i32,
    pub view_range: f32,
    /// Packed `block << 4 | sky << 20`; `-1` leaves the world light alone.
    pub brightness: i32,
    pub glowing: bool,
    pub glow_color: i32,
    pub invisible: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            billboard: Billboard::Center,
            teleport_duration: 10,
            interpolation_duration: 10,
            view_range: 1.0,
            brightness: -1,
            glowing: false,
            glow_color: 0,
            invisible: true,
        }
    }
}

/// Pack block and sky light levels into the wire brightness override.
pub fn pack_brightness(block: i32, sky: i32) -> Result<i32> {
    if !(0..=15).contains(&block) || !(0..=15).contains(&sky) {
        return Err(DisplayError::InvalidBrightness { block, sky });
    }
    Ok(block << 4 | sky << 20)
}

/// The wire glow colour is BGR.
pub fn glow_color_from_rgb(rgb: u32) -> i32 {
    let r = (rgb & 0xFF0000) >> 16;
    let g = rgb & 0x00FF00;
    let b = (rgb & 0x0000FF) << 16;
    (r | g | b) as i32
}

// ---------------------------------------------------------------------------
// Appearance variants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextAlignment {
    #[default]
    Center,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextAppearance {
    /// Markup source; formatted on every metadata push.
    pub text: String,
    pub shadow: bool,
    pub line_width: i32,
    /// ARGB.
    pub background_color: i32,
    pub see_through: bool,
    pub alignment: TextAlignment,
    pub opacity: i8,
}

impl Default for TextAppearance {
    fn default() -> Self {
        Self {
            text: String::new(),
            shadow: true,
            line_width: 200,
            background_color: 0,
            see_through: false,
            alignment: TextAlignment::Center,
            opacity: -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockAppearance {
    pub block_state: i32,
    pub on_fire: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemDisplayType {
    None,
    ThirdPersonLeftHand,
    ThirdPersonRightHand,
    FirstPersonLeftHand,
    FirstPersonRightHand,
    Head,
    Gui,
    Ground,
    #[default]
    Fixed,
}

impl ItemDisplayType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemDisplayType::None => "none",
            ItemDisplayType::ThirdPersonLeftHand => "thirdperson_lefthand",
            ItemDisplayType::ThirdPersonRightHand => "thirdperson_righthand",
            ItemDisplayType::FirstPersonLeftHand => "firstperson_lefthand",
            ItemDisplayType::FirstPersonRightHand => "firstperson_righthand",
            ItemDisplayType::Head => "head",
            ItemDisplayType::Gui => "gui",
            ItemDisplayType::Ground => "ground",
            ItemDisplayType::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemAppearance {
    /// Item descriptor, opaque to the engine.
    pub item: String,
    pub display_type: ItemDisplayType,
    pub on_fire: bool,
}

impl Default for ItemAppearance {
    fn default() -> Self {
        Self {
            item: "stone".into(),
            display_type: ItemDisplayType::Fixed,
            on_fire: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Appearance {
    Text(TextAppearance),
    Block(BlockAppearance),
    Item(ItemAppearance),
}

impl Appearance {
    pub fn text(markup: impl Into<String>) -> Self {
        Appearance::Text(TextAppearance {
            text: markup.into(),
            ..Default::default()
        })
    }

    pub fn block(block_state: i32) -> Self {
        Appearance::Block(BlockAppearance {
            block_state,
            ..Default::default()
        })
    }

    pub fn item(item: impl Into<String>) -> Self {
        Appearance::Item(ItemAppearance {
            item: item.into(),
            ..Default::default()
        })
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Appearance::Text(_) => EntityType::TextDisplay,
            Appearance::Block(_) => EntityType::BlockDisplay,
            Appearance::Item(_) => EntityType::ItemDisplay,
        }
    }

    pub fn meta(&self, formatter: &dyn TextFormatter) -> AppearanceMeta {
        match self {
            Appearance::Text(t) => AppearanceMeta::Text {
                text: formatter.format(&t.text),
                line_width: t.line_width,
                background_color: t.background_color,
                text_opacity: t.opacity,
                shadow: t.shadow,
                see_through: t.see_through,
                alignment: match t.alignment {
                    TextAlignment::Center => "center",
                    TextAlignment::Left => "left",
                    TextAlignment::Right => "right",
                }
                .to_string(),
            },
            Appearance::Block(b) => AppearanceMeta::Block {
                block_state: b.block_state,
                on_fire: b.on_fire,
            },
            Appearance::Item(i) => AppearanceMeta::Item {
                item: i.item.clone(),
                display_type: i.display_type.as_str().to_string(),
                on_fire: i.on_fire,
            },
        }
    }
}
