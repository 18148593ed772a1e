use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use log::debug;
use smudge_atlas::{Text, TextId};
use smudge_geometry::Rect;
use smudge_material::{MappingMaterial, Material, Slot, UniformValue};
use smudge_renderer::FrameTiming;

use crate::{Error, Result};

/// The material definition a coordinator currently uses, shared with its scopes.
pub(crate) type MaterialCell = Rc<RefCell<Rc<dyn Material>>>;

/// Playback control of one text.
///
/// A scope is either idle or playing. While playing, its play time advances with every frame and
/// its uniforms are written to the installed material. Cloning shares the scope.
#[derive(Clone)]
pub struct RenderScope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    text: Text,
    definition: MaterialCell,
    material: RefCell<Weak<MappingMaterial>>,
    playing: Cell<bool>,
    /// The slots have to be written.
    needs_update: Cell<bool>,
    /// The material changed structurally, cleared when the rebuild is installed.
    stale: Cell<bool>,
    play_time: Cell<Duration>,
    overrides: RefCell<HashMap<String, UniformValue>>,
}

impl fmt::Debug for RenderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderScope")
            .field("text", self.inner.text.id())
            .field("playing", &self.inner.playing.get())
            .field("needs_update", &self.inner.needs_update.get())
            .field("stale", &self.inner.stale.get())
            .finish()
    }
}

impl RenderScope {
    pub(crate) fn new(text: Text, definition: MaterialCell, playing: bool) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                text,
                definition,
                material: Weak::new().into(),
                playing: playing.into(),
                needs_update: true.into(),
                stale: false.into(),
                play_time: Duration::ZERO.into(),
                overrides: HashMap::new().into(),
            }),
        }
    }

    pub fn text(&self) -> &Text {
        &self.inner.text
    }

    pub fn id(&self) -> &TextId {
        self.inner.text.id()
    }

    pub fn play(&self) {
        self.inner.playing.set(true);
    }

    pub fn pause(&self) {
        self.inner.playing.set(false);
    }

    /// Pauses and rewinds the play time.
    pub fn stop(&self) {
        self.inner.playing.set(false);
        self.inner.play_time.set(Duration::ZERO);
        self.inner.needs_update.set(true);
    }

    pub fn is_playing(&self) -> bool {
        self.inner.playing.get()
    }

    /// Set when the material or its values changed and the scope has not written its uniforms
    /// since.
    ///
    /// After a structural change of the material, this stays set until the rebuild is
    /// installed: the installed mapping and bounds are outdated until then.
    pub fn needs_update(&self) -> bool {
        self.inner.needs_update.get() || self.inner.stale.get()
    }

    pub fn play_time(&self) -> Duration {
        self.inner.play_time.get()
    }

    /// Overrides a uniform's value for this text only.
    ///
    /// The uniform must be declared by the current material, with the same kind.
    pub fn set_uniform_value(&self, name: &str, value: impl Into<UniformValue>) -> Result<()> {
        const CALL: &str = "RenderScope::set_uniform_value";
        let value = value.into();
        let uniforms = self.inner.definition.borrow().uniforms();
        let Some(declared) = uniforms.iter().find(|u| u.name == name) else {
            return Err(Error::contract_violation(
                CALL,
                format!("Uniform `{name}` is not declared by the material"),
            ));
        };
        if declared.kind() != value.kind() {
            return Err(Error::contract_violation(
                CALL,
                format!(
                    "Uniform `{name}` is a {}, but a {} was provided",
                    declared.kind(),
                    value.kind()
                ),
            ));
        }
        self.inner
            .overrides
            .borrow_mut()
            .insert(name.to_string(), value);
        self.inner.needs_update.set(true);
        Ok(())
    }

    /// The value the text uses for a uniform: its override or the material's default.
    pub fn uniform_value(&self, name: &str) -> Option<UniformValue> {
        if let Some(value) = self.inner.overrides.borrow().get(name) {
            return Some(*value);
        }
        if let Some(value) = self.material().and_then(|m| m.default_value(name)) {
            return Some(value);
        }
        self.inner
            .definition
            .borrow()
            .uniforms()
            .into_iter()
            .find(|u| u.name == name)
            .map(|u| u.value)
    }

    /// The text's placement in render space, if the text is part of the installed build.
    pub fn bounds(&self) -> Option<Rect> {
        self.material()?.bounds_for_text(self.id())
    }

    pub fn material(&self) -> Option<Rc<MappingMaterial>> {
        self.inner.material.borrow().upgrade()
    }

    /// Installs a build. Clears the stale latch.
    pub(crate) fn set_material(&self, material: Weak<MappingMaterial>) {
        *self.inner.material.borrow_mut() = material;
        self.inner.stale.set(false);
        self.inner.needs_update.set(true);
    }

    pub(crate) fn mark_needs_update(&self) {
        self.inner.needs_update.set(true);
    }

    pub(crate) fn mark_stale(&self) {
        self.inner.stale.set(true);
        self.inner.needs_update.set(true);
    }

    /// Advances the play time and writes the text's uniforms if it is playing or needs an update.
    pub(crate) fn render(&self, timing: &FrameTiming) {
        let inner = &self.inner;
        let playing = inner.playing.get();
        if playing {
            inner.play_time.set(inner.play_time.get() + timing.time_delta);
        } else if !inner.needs_update.get() {
            return;
        }

        let Some(material) = self.material() else {
            return;
        };
        let slots = self.slots(&material);
        match material.write_text_slots(self.id(), &slots) {
            Ok(()) => inner.needs_update.set(false),
            // Added after the installed build was started, the next build includes it.
            Err(e) => debug!("Text {} not written: {e:#}", self.id()),
        }
    }

    fn slots(&self, material: &MappingMaterial) -> Vec<Slot> {
        let inner = &self.inner;
        let playing = if inner.playing.get() { 1.0 } else { 0.0 };
        let mut slots = Vec::with_capacity(material.schema().slots_per_text());
        slots.push([inner.play_time.get().as_secs_f32(), playing, 0.0, 0.0]);

        let overrides = inner.overrides.borrow();
        for uniform in material.schema().uniforms() {
            let value = overrides
                .get(&uniform.name)
                .filter(|v| v.kind() == uniform.kind)
                .copied()
                .or_else(|| material.default_value(&uniform.name))
                .unwrap_or(uniform.default);
            slots.push(value.to_slot());
        }
        slots
    }
}
