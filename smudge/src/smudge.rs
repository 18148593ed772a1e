use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;
use log::{error, info};
use smudge_atlas::{CosmicRasterizer, Mapping, MappingBuilder, RgbaImage, Text, TextId};
use smudge_geometry::Rect;
use smudge_material::{MappingMaterial, Material, MaterialEvent, validate_definition};
use smudge_renderer::{FrameTiming, GpuContext, Renderer};
use smudge_util::{Generation, GenerationCounter, Notifier, SubscriptionId};
use tokio::{
    sync::mpsc::{UnboundedSender, unbounded_channel},
    task::JoinHandle,
};

use crate::{
    Error, Event, Options, RenderScope, Result,
    pipeline::{self, RebuildRequest},
    scope::MaterialCell,
};

/// Renders a set of texts through one material.
///
/// Every change to the texts or the material rebuilds the atlas and the material's program in
/// the background and then swaps them in at once. Until then, the previous build keeps
/// rendering.
///
/// Must be created and used inside a [`tokio::task::LocalSet`]: the rebuild pipeline and the
/// frame loop run as local tasks.
pub struct Smudge {
    inner: Rc<SmudgeInner>,
}

pub(crate) struct SmudgeInner {
    pub renderer: Renderer,
    pub mapping_builder: MappingBuilder,
    pub ratio: f64,
    pub max_texture_dimension: u32,
    pub autoplay: bool,
    pub autostart: Cell<bool>,

    /// The members in insertion order, with their scopes.
    pub scopes: RefCell<IndexMap<TextId, RenderScope>>,
    /// Subscriptions to the members' update notifications.
    text_bindings: RefCell<HashMap<TextId, SubscriptionId>>,
    pub material: MaterialCell,
    material_binding: Cell<Option<SubscriptionId>>,

    pub mapping_material: RefCell<Option<Rc<MappingMaterial>>>,
    pub generations: GenerationCounter,
    pub applied: Cell<Option<Generation>>,
    requests: UnboundedSender<RebuildRequest>,
    worker: RefCell<Option<JoinHandle<()>>>,
    pub notifier: Notifier<Event>,
}

impl fmt::Debug for Smudge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Smudge")
            .field("texts", &self.inner.scopes.borrow().len())
            .field("applied", &self.inner.applied.get())
            .field("renderer", &self.inner.renderer)
            .finish()
    }
}

impl Smudge {
    /// Creates a coordinator that rasterizes with the system fonts.
    pub fn new(context: &GpuContext, material: Rc<dyn Material>, options: Options) -> Result<Self> {
        Self::with_mapping_builder(
            context,
            material,
            options,
            MappingBuilder::new(CosmicRasterizer::new()),
        )
    }

    pub fn with_mapping_builder(
        context: &GpuContext,
        material: Rc<dyn Material>,
        options: Options,
        mapping_builder: MappingBuilder,
    ) -> Result<Self> {
        let lease = context.acquire().map_err(Error::UnsupportedDevice)?;
        validate_definition(&*material)
            .map_err(|e| Error::contract_violation("Smudge::new", format!("{e:#}")))?;

        let device_limit = lease.backend().capabilities().max_texture_dimension;
        let max_texture_dimension = options
            .max_texture_dimension
            .map_or(device_limit, |m| m.min(device_limit));
        let renderer = Renderer::new(lease, options.frame_rate);

        let (requests, receiver) = unbounded_channel();
        let inner = Rc::new(SmudgeInner {
            renderer,
            mapping_builder,
            ratio: options.ratio,
            max_texture_dimension,
            autoplay: options.autoplay,
            autostart: options.autostart.into(),
            scopes: IndexMap::new().into(),
            text_bindings: HashMap::new().into(),
            material: Rc::new(RefCell::new(material.clone())),
            material_binding: None.into(),
            mapping_material: None.into(),
            generations: GenerationCounter::default(),
            applied: None.into(),
            requests,
            worker: None.into(),
            notifier: Notifier::default(),
        });

        {
            let weak = Rc::downgrade(&inner);
            inner.renderer.set_frame_handler(move |timing| {
                if let Some(inner) = weak.upgrade() {
                    inner.render_scopes(timing);
                }
            });
        }
        let worker = tokio::task::spawn_local(pipeline::run(
            Rc::downgrade(&inner),
            receiver.into(),
        ));
        *inner.worker.borrow_mut() = Some(worker);

        inner.bind_material(&material);
        let texts: Vec<Text> = options.texts.iter().map(|t| t.to_text()).collect();
        inner.insert_texts(&texts);

        if options.autobuild {
            inner.request_rebuild();
        }
        if options.autostart {
            inner.renderer.start();
        }

        info!(
            "Smudge created with {} texts at ratio {}",
            texts.len(),
            options.ratio
        );
        Ok(Self { inner })
    }

    pub fn add_text(&self, text: &Text) {
        self.add_texts(std::slice::from_ref(text));
    }

    /// Adds texts that are not members yet. Texts are identified by their id.
    pub fn add_texts(&self, texts: &[Text]) {
        if self.inner.insert_texts(texts) {
            self.inner.request_rebuild();
        }
    }

    pub fn remove_text(&self, text: &Text) {
        self.remove_texts(std::slice::from_ref(text));
    }

    /// Removes texts that are members. Their scopes are disposed.
    pub fn remove_texts(&self, texts: &[Text]) {
        let ids: Vec<TextId> = texts.iter().map(|t| t.id().clone()).collect();
        if self.inner.delete_texts(&ids) {
            self.inner.request_rebuild();
        }
    }

    /// Replaces all members.
    pub fn set_texts(&self, texts: &[Text]) {
        let current: Vec<TextId> = self.inner.scopes.borrow().keys().cloned().collect();
        let removed = self.inner.delete_texts(&current);
        let added = self.inner.insert_texts(texts);
        if removed || added {
            self.inner.request_rebuild();
        }
    }

    /// The members in insertion order.
    pub fn texts(&self) -> Vec<Text> {
        self.inner
            .scopes
            .borrow()
            .values()
            .map(|s| s.text().clone())
            .collect()
    }

    pub fn contains(&self, text: &Text) -> bool {
        self.inner.scopes.borrow().contains_key(text.id())
    }

    /// Replaces the material. The definition must be structurally valid.
    pub fn set_material(&self, material: Rc<dyn Material>) -> Result<()> {
        validate_definition(&*material)
            .map_err(|e| Error::contract_violation("Smudge::set_material", format!("{e:#}")))?;

        self.inner.unbind_material();
        *self.inner.material.borrow_mut() = material.clone();
        self.inner.bind_material(&material);
        self.inner.mark_scopes_stale();
        self.inner.request_rebuild();
        Ok(())
    }

    pub fn material(&self) -> Rc<dyn Material> {
        self.inner.material.borrow().clone()
    }

    /// The scope of a member. Logs and returns `None` for texts that are not members.
    pub fn for_text(&self, text: &Text) -> Option<RenderScope> {
        let scope = self.inner.scopes.borrow().get(text.id()).cloned();
        if scope.is_none() {
            error!("Smudge::for_text: text {} is not a member", text.id());
        }
        scope
    }

    /// The placement of a member in render space.
    ///
    /// Logs and returns `None` for texts that are not members. Also `None` while no build
    /// including the text is installed.
    pub fn bounds_for_text(&self, text: &Text) -> Option<Rect> {
        if !self.contains(text) {
            error!("Smudge::bounds_for_text: text {} is not a member", text.id());
            return None;
        }
        self.mapping_material()?.bounds_for_text(text.id())
    }

    /// Starts the frame loop, now and after every installed build.
    pub fn start(&self) {
        self.inner.autostart.set(true);
        self.inner.renderer.start();
    }

    /// Stops the frame loop. Builds in flight are still installed.
    pub fn stop(&self) {
        self.inner.autostart.set(false);
        self.inner.renderer.stop();
    }

    pub fn is_running(&self) -> bool {
        self.inner.renderer.is_running()
    }

    /// Runs the rebuild pipeline for the current state and installs the result.
    ///
    /// Supersedes builds in flight. If another change arrives before this build completes, the
    /// result is discarded and the build of the change is installed instead.
    pub async fn build(&self) -> Result<()> {
        let generation = self.inner.generations.advance();
        self.inner
            .rebuild(generation)
            .await
            .map_err(Error::Build)?;
        Ok(())
    }

    /// The installed material.
    pub fn mapping_material(&self) -> Option<Rc<MappingMaterial>> {
        self.inner.mapping_material.borrow().clone()
    }

    pub fn mapping(&self) -> Option<Rc<Mapping>> {
        self.mapping_material().map(|m| m.mapping().clone())
    }

    /// The last rendered frame.
    pub async fn image_data(&self) -> Result<RgbaImage> {
        self.inner
            .renderer
            .image_data()
            .await
            .map_err(Error::Render)
    }

    pub fn renderer(&self) -> &Renderer {
        &self.inner.renderer
    }

    pub fn subscribe(&self, subscriber: impl Fn(&Event) + 'static) -> SubscriptionId {
        self.inner.notifier.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Stops rendering and releases all bindings and the lease of the GPU context.
    pub fn teardown(self) {
        self.inner.dispose();
        info!("Smudge torn down");
    }
}

impl SmudgeInner {
    /// Returns `true` if a text was added.
    fn insert_texts(self: &Rc<Self>, texts: &[Text]) -> bool {
        let mut added = false;
        for text in texts {
            if self.scopes.borrow().contains_key(text.id()) {
                continue;
            }
            let weak = Rc::downgrade(self);
            let binding = text.subscribe(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.request_rebuild();
                }
            });
            self.text_bindings
                .borrow_mut()
                .insert(text.id().clone(), binding);

            let scope = RenderScope::new(text.clone(), self.material.clone(), self.autoplay);
            if let Some(mapping_material) = &*self.mapping_material.borrow() {
                scope.set_material(Rc::downgrade(mapping_material));
            }
            self.scopes.borrow_mut().insert(text.id().clone(), scope);
            added = true;
        }
        added
    }

    /// Returns `true` if a text was removed.
    fn delete_texts(&self, ids: &[TextId]) -> bool {
        let mut removed = false;
        for id in ids {
            let Some(scope) = self.scopes.borrow_mut().shift_remove(id) else {
                continue;
            };
            if let Some(binding) = self.text_bindings.borrow_mut().remove(id) {
                scope.text().unsubscribe(binding);
            }
            removed = true;
        }
        removed
    }

    fn bind_material(self: &Rc<Self>, material: &Rc<dyn Material>) {
        let weak: Weak<Self> = Rc::downgrade(self);
        let binding = material.notifier().subscribe(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                MaterialEvent::Update => {
                    inner.mark_scopes_stale();
                    inner.request_rebuild();
                }
                MaterialEvent::UpdateUniformValues => inner.refresh_uniform_values(),
            }
        });
        self.material_binding.set(Some(binding));
    }

    fn unbind_material(&self) {
        if let Some(binding) = self.material_binding.take() {
            self.material.borrow().notifier().unsubscribe(binding);
        }
    }

    fn refresh_uniform_values(&self) {
        let uniforms = self.material.borrow().uniforms();
        if let Some(mapping_material) = &*self.mapping_material.borrow() {
            mapping_material.refresh_defaults(&uniforms);
        }
        self.mark_scopes();
    }

    fn mark_scopes(&self) {
        for scope in self.scopes.borrow().values() {
            scope.mark_needs_update();
        }
    }

    fn mark_scopes_stale(&self) {
        for scope in self.scopes.borrow().values() {
            scope.mark_stale();
        }
    }

    pub fn request_rebuild(&self) {
        let generation = self.generations.advance();
        if self.requests.send(RebuildRequest { generation }).is_err() {
            error!("Rebuild {generation} requested after the pipeline shut down");
        }
    }

    fn render_scopes(&self, timing: &FrameTiming) {
        let scopes: Vec<RenderScope> = self.scopes.borrow().values().cloned().collect();
        let mut rendered = Vec::new();
        for scope in scopes {
            scope.render(timing);
            if scope.is_playing() {
                rendered.push(scope.id().clone());
            }
        }
        for id in rendered {
            self.notifier.notify(&Event::Render(id));
        }
    }

    fn dispose(&self) {
        if let Some(worker) = self.worker.borrow_mut().take() {
            worker.abort();
        }
        self.renderer.stop();
        self.unbind_material();
        let scopes = std::mem::take(&mut *self.scopes.borrow_mut());
        let mut bindings = self.text_bindings.borrow_mut();
        for (id, scope) in scopes {
            if let Some(binding) = bindings.remove(&id) {
                scope.text().unsubscribe(binding);
            }
        }
        self.renderer.set_program(None);
        self.mapping_material.borrow_mut().take();
    }
}

impl Drop for SmudgeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}
