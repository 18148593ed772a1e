use std::{
    cell::RefCell,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::Arc,
};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use smudge_geometry::Color;
use smudge_util::{Notifier, SubscriptionId};

/// The stable identity of a text.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextId(Arc<str>);

impl TextId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TextId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for TextId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEvent {
    /// The value or the properties changed.
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

/// Style parameters of a text. Sizes are in logical pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextProperties {
    /// A font family name or one of the generic families `serif`, `sans-serif`, `monospace`,
    /// `cursive`, `fantasy`.
    pub family: String,
    pub size: f32,
    /// Line height as a multiple of `size`.
    pub leading: f32,
    pub fill: Color,
    pub weight: u16,
    pub style: FontStyle,
    pub padding: f32,
    pub padding_top: Option<f32>,
    pub padding_right: Option<f32>,
    pub padding_bottom: Option<f32>,
    pub padding_left: Option<f32>,
}

impl Default for TextProperties {
    fn default() -> Self {
        Self {
            family: "sans-serif".into(),
            size: 12.0,
            leading: 1.5,
            fill: Color::BLACK,
            weight: 400,
            style: FontStyle::Normal,
            padding: 0.0,
            padding_top: None,
            padding_right: None,
            padding_bottom: None,
            padding_left: None,
        }
    }
}

impl TextProperties {
    pub fn padding(&self) -> Padding {
        Padding {
            top: self.padding_top.unwrap_or(self.padding),
            right: self.padding_right.unwrap_or(self.padding),
            bottom: self.padding_bottom.unwrap_or(self.padding),
            left: self.padding_left.unwrap_or(self.padding),
        }
    }
}

/// Resolved padding of a text in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Padding {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

/// Padding in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaddingPx {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl Padding {
    pub fn to_pixels(self, ratio: f64) -> PaddingPx {
        let px = |v: f32| (v.max(0.0) as f64 * ratio).ceil() as u32;
        PaddingPx {
            top: px(self.top),
            right: px(self.right),
            bottom: px(self.bottom),
            left: px(self.left),
        }
    }
}

/// A shared text handle.
///
/// Clones refer to the same text. Equality and hashing only consider the id.
#[derive(Clone)]
pub struct Text {
    inner: Rc<TextInner>,
}

struct TextInner {
    id: TextId,
    value: RefCell<String>,
    properties: RefCell<TextProperties>,
    notifier: Notifier<TextEvent>,
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Text")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Text {}

impl Hash for Text {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state)
    }
}

impl Text {
    pub fn new(id: impl Into<TextId>, value: impl Into<String>) -> Self {
        Self::with_properties(id, value, TextProperties::default())
    }

    pub fn with_properties(
        id: impl Into<TextId>,
        value: impl Into<String>,
        properties: TextProperties,
    ) -> Self {
        Self {
            inner: Rc::new(TextInner {
                id: id.into(),
                value: RefCell::new(value.into()),
                properties: RefCell::new(properties),
                notifier: Notifier::default(),
            }),
        }
    }

    pub fn id(&self) -> &TextId {
        &self.inner.id
    }

    pub fn value(&self) -> String {
        self.inner.value.borrow().clone()
    }

    pub fn properties(&self) -> TextProperties {
        self.inner.properties.borrow().clone()
    }

    pub fn set_value(&self, value: impl Into<String>) {
        *self.inner.value.borrow_mut() = value.into();
        self.updated();
    }

    pub fn set_properties(&self, properties: TextProperties) {
        *self.inner.properties.borrow_mut() = properties;
        self.updated();
    }

    pub fn update_properties(&self, f: impl FnOnce(&mut TextProperties)) {
        f(&mut self.inner.properties.borrow_mut());
        self.updated();
    }

    pub fn subscribe(&self, subscriber: impl Fn(&TextEvent) + 'static) -> SubscriptionId {
        self.inner.notifier.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.notifier.subscriber_count()
    }

    /// An immutable copy of the current state.
    pub fn snapshot(&self) -> TextSnapshot {
        TextSnapshot {
            id: self.inner.id.clone(),
            value: self.value(),
            properties: self.properties(),
        }
    }

    fn updated(&self) {
        // Borrows are released here, subscribers may read the text.
        self.inner.notifier.notify(&TextEvent::Update);
    }
}

/// The state of a text at the time a rebuild started.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSnapshot {
    pub id: TextId,
    pub value: String,
    pub properties: TextProperties,
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn identity_is_the_id() {
        let a = Text::new("a", "Hi");
        let a2 = Text::new("a", "Other");
        let b = Text::new("b", "Hi");
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn mutations_notify_subscribers() {
        let text = Text::new("a", "Hi");
        let updates = Rc::new(Cell::new(0));
        let id = {
            let updates = updates.clone();
            text.subscribe(move |_| updates.set(updates.get() + 1))
        };

        text.set_value("Ho");
        text.update_properties(|p| p.size = 24.0);
        assert_eq!(updates.get(), 2);

        assert!(text.unsubscribe(id));
        text.set_value("Hu");
        assert_eq!(updates.get(), 2);

        let snapshot = text.snapshot();
        assert_eq!(snapshot.value, "Hu");
        assert_eq!(snapshot.properties.size, 24.0);
    }

    #[test]
    fn side_paddings_override_the_uniform_padding() {
        let properties = TextProperties {
            padding: 2.0,
            padding_left: Some(5.0),
            ..Default::default()
        };
        let padding = properties.padding();
        assert_eq!(padding.top, 2.0);
        assert_eq!(padding.left, 5.0);

        let px = padding.to_pixels(1.5);
        assert_eq!(px.top, 3);
        assert_eq!(px.left, 8);
    }
}
