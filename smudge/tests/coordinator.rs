use std::{cell::RefCell, rc::Rc, time::Duration};

use approx::assert_relative_eq;
use itertools::Itertools;
use smudge::{
    Capabilities, Error, Event, GpuContext, HeadlessBackend, MappingBuilder, Material, Options,
    RgbaImage, ShaderMaterial, Smudge, Text, TextConfig, TextProperties, TextRasterizer,
    TextSnapshot, UniformValue,
};
use smudge_geometry::SizePx;
use tokio::task::LocalSet;

/// Every character is an 8x16 block in logical pixels.
struct BlockRasterizer;

impl TextRasterizer for BlockRasterizer {
    fn rasterize(&self, text: &TextSnapshot, ratio: f64) -> anyhow::Result<RgbaImage> {
        let chars = text.value.chars().count().max(1) as f64;
        Ok(RgbaImage::new(SizePx::new(
            (8.0 * chars * ratio).ceil() as u32,
            (16.0 * ratio).ceil() as u32,
        )))
    }
}

struct Fixture {
    context: GpuContext,
    backend: HeadlessBackend,
    smudge: Smudge,
    events: Rc<RefCell<Vec<Event>>>,
}

impl Fixture {
    fn new(texts: &[(&str, &str)], options: Options) -> Self {
        Self::with_material(texts, options, Rc::new(ShaderMaterial::passthrough()))
    }

    fn with_material(
        texts: &[(&str, &str)],
        options: Options,
        material: Rc<dyn Material>,
    ) -> Self {
        Self::with_backend(texts, options, material, HeadlessBackend::new())
    }

    fn with_backend(
        texts: &[(&str, &str)],
        options: Options,
        material: Rc<dyn Material>,
        backend: HeadlessBackend,
    ) -> Self {
        let context = GpuContext::new(backend.clone());
        let options = options.with_texts(texts.iter().map(|(id, text)| TextConfig {
            id: id.to_string(),
            text: text.to_string(),
            properties: TextProperties::default(),
        }));
        let smudge = Smudge::with_mapping_builder(
            &context,
            material,
            options,
            MappingBuilder::new(BlockRasterizer),
        )
        .unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        {
            let events = events.clone();
            smudge.subscribe(move |e| events.borrow_mut().push(e.clone()));
        }

        Self {
            context,
            backend,
            smudge,
            events,
        }
    }

    fn render_events(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, Event::Render(_)))
            .count()
    }

    fn build_events(&self) -> Vec<Event> {
        self.events
            .borrow()
            .iter()
            .filter(|e| !matches!(e, Event::Render(_)))
            .cloned()
            .collect()
    }

    fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn manual() -> Options {
    Options {
        autostart: false,
        ..Default::default()
    }
}

async fn local(test: impl Future<Output = ()>) {
    LocalSet::new().run_until(test).await;
}

#[tokio::test(start_paused = true)]
async fn ready_is_emitted_once_and_scopes_follow_autoplay() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi")], Options::default());
        settle().await;

        assert_eq!(fixture.build_events(), vec![Event::Ready]);
        let scope = fixture.smudge.for_text(&Text::new("a", "")).unwrap();
        assert!(scope.is_playing());
        assert!(fixture.smudge.mapping().unwrap().contains(&"a".into()));

        let paused = Fixture::new(
            &[("a", "Hi")],
            Options {
                autoplay: false,
                ..Default::default()
            },
        );
        settle().await;
        let scope = paused.smudge.for_text(&Text::new("a", "")).unwrap();
        assert!(!scope.is_playing());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn adding_a_text_repacks_all_texts() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi")], Options::default());
        settle().await;
        fixture.clear_events();

        fixture.smudge.add_text(&Text::new("b", "Yo"));
        settle().await;

        assert_eq!(fixture.build_events(), vec![Event::Update]);
        let mapping = fixture.smudge.mapping().unwrap();
        let a = mapping.placement(&"a".into()).unwrap();
        let b = mapping.placement(&"b".into()).unwrap();
        assert!(!a.intersects(&b));
        for placement in [a, b] {
            assert!(placement.min.x >= 0 && placement.min.y >= 0);
            assert!(placement.max.x as u32 <= mapping.width());
            assert!(placement.max.y as u32 <= mapping.height());
        }
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn adding_and_removing_is_idempotent() {
    local(async {
        let fixture = Fixture::new(&[], manual());
        settle().await;
        fixture.clear_events();

        let texts = [Text::new("a", "Hi"), Text::new("b", "Yo")];
        fixture.smudge.add_texts(&texts);
        settle().await;
        fixture.smudge.add_texts(&texts);
        fixture.smudge.remove_text(&Text::new("c", "Absent"));
        settle().await;

        let ids = fixture
            .smudge
            .texts()
            .iter()
            .map(|t| t.id().to_string())
            .collect_vec();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(fixture.build_events(), vec![Event::Update]);

        fixture.smudge.remove_texts(&texts);
        settle().await;
        assert!(fixture.smudge.texts().is_empty());
        assert!(fixture.smudge.mapping().unwrap().is_empty());
        assert_eq!(texts[0].subscriber_count(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn the_latest_material_wins_over_builds_in_flight() {
    local(async {
        let backend = HeadlessBackend::new();
        backend.set_compile_delay(Duration::from_millis(100));
        let fixture = Fixture::with_backend(
            &[("a", "Hi")],
            manual(),
            Rc::new(ShaderMaterial::passthrough()),
            backend,
        );

        // The first build is compiling now.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fixture.build_events().is_empty());

        let second = "// second\nfn main_image(text: u32, uv: vec2<f32>) -> vec4<f32> {\n    return sample_text(text, uv);\n}\n";
        fixture
            .smudge
            .set_material(Rc::new(ShaderMaterial::new(second)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(fixture.build_events(), vec![Event::Ready]);
        let installed = fixture.smudge.mapping_material().unwrap();
        assert!(installed.wgsl().contains("// second"));
        assert_eq!(fixture.backend.compiled().len(), 2);
        assert_eq!(fixture.backend.live_programs(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn changes_arriving_together_are_built_once() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi")], manual());
        settle().await;
        fixture.clear_events();

        fixture.smudge.add_text(&Text::new("b", "Yo"));
        fixture.smudge.add_text(&Text::new("c", "Hey"));
        fixture.smudge.remove_text(&Text::new("a", ""));
        settle().await;

        assert_eq!(fixture.build_events(), vec![Event::Update]);
        let mapping = fixture.smudge.mapping().unwrap();
        assert_eq!(mapping.len(), 2);
        assert!(!mapping.contains(&"a".into()));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn text_updates_trigger_a_rebuild() {
    local(async {
        let text = Text::new("a", "Hi");
        let fixture = Fixture::new(&[], manual());
        fixture.smudge.add_text(&text);
        settle().await;
        let width = fixture.smudge.mapping().unwrap().width();
        fixture.clear_events();

        text.set_value("Hello there");
        settle().await;

        assert_eq!(fixture.build_events(), vec![Event::Update]);
        assert!(fixture.smudge.mapping().unwrap().width() > width);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn bounds_are_reported_in_render_space() {
    local(async {
        let fixture = Fixture::new(
            &[("a", "Hi")],
            Options {
                ratio: 2.0,
                autostart: false,
                ..Default::default()
            },
        );
        let text = Text::new("a", "");
        assert_eq!(fixture.smudge.bounds_for_text(&text), None);
        settle().await;

        let bounds = fixture.smudge.bounds_for_text(&text).unwrap();
        assert_relative_eq!(bounds.size().width, 16.0);
        assert_relative_eq!(bounds.size().height, 16.0);
        let scope = fixture.smudge.for_text(&text).unwrap();
        assert_eq!(scope.bounds(), Some(bounds));

        let removed = Text::new("gone", "Bye");
        assert_eq!(fixture.smudge.bounds_for_text(&removed), None);
        assert!(fixture.smudge.for_text(&removed).is_none());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn stopping_suspends_rendering_and_starting_resets_the_clock() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi")], Options::default());
        settle().await;
        assert!(fixture.render_events() > 0);

        fixture.smudge.stop();
        fixture.clear_events();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fixture.render_events(), 0);

        fixture.smudge.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fixture.render_events(), 1);

        let globals = fixture.backend.last_upload().unwrap().globals;
        assert!(globals.time_delta < 0.02, "{}", globals.time_delta);
        assert!(globals.global_time < 0.02, "{}", globals.global_time);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn only_playing_scopes_render() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi"), ("b", "Yo")], Options::default());
        settle().await;

        let b = fixture.smudge.for_text(&Text::new("b", "")).unwrap();
        b.pause();
        let paused_at = b.play_time();
        fixture.clear_events();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = fixture.events.borrow();
        assert!(events.iter().any(|e| *e == Event::Render("a".into())));
        assert!(!events.iter().any(|e| *e == Event::Render("b".into())));
        assert_eq!(b.play_time(), paused_at);
        assert!(!b.needs_update());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn uniform_values_reach_the_uniform_buffer() {
    local(async {
        let material = Rc::new(ShaderMaterial::passthrough().with_uniform("uSpeed", 1.0));
        let fixture = Fixture::with_material(
            &[("a", "Hi"), ("b", "Yo")],
            Options::default(),
            material.clone(),
        );
        settle().await;

        let b = fixture.smudge.for_text(&Text::new("b", "")).unwrap();
        b.set_uniform_value("uSpeed", 3.0).unwrap();
        assert!(matches!(
            b.set_uniform_value("uSpeed", [1.0, 2.0]),
            Err(Error::ContractViolation { .. })
        ));
        assert!(b.set_uniform_value("uMissing", 1.0).is_err());

        material.set_uniform_value("uSpeed", 2.0).unwrap();
        fixture.clear_events();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Value changes don't rebuild.
        assert!(fixture.build_events().is_empty());
        let upload = fixture.backend.last_upload().unwrap();
        // Two slots per text: built-ins, then uSpeed.
        assert_eq!(upload.text_uniforms[1][0], 2.0);
        assert_eq!(upload.text_uniforms[3][0], 3.0);
        assert_eq!(upload.text_uniforms[2][1], 1.0);
        assert_eq!(b.uniform_value("uSpeed"), Some(UniformValue::Float(3.0)));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn failed_builds_keep_the_previous_build() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi")], manual());
        settle().await;
        let installed = fixture.smudge.mapping_material().unwrap().program();
        fixture.clear_events();

        fixture.backend.set_fail_compiles(true);
        fixture.smudge.add_text(&Text::new("b", "Yo"));
        settle().await;

        let events = fixture.build_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::BuildFailed(_)));
        assert_eq!(
            fixture.smudge.mapping_material().unwrap().program(),
            installed
        );
        assert!(matches!(fixture.smudge.build().await, Err(Error::Build(_))));

        fixture.backend.set_fail_compiles(false);
        fixture.smudge.build().await.unwrap();
        assert!(fixture.smudge.mapping().unwrap().contains(&"b".into()));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn invalid_materials_are_contract_violations() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi")], manual());
        let result = fixture
            .smudge
            .set_material(Rc::new(ShaderMaterial::new("fn nothing() {}")));
        assert!(matches!(
            result,
            Err(Error::ContractViolation {
                call: "Smudge::set_material",
                ..
            })
        ));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn unsupported_devices_fail_construction() {
    local(async {
        let backend = HeadlessBackend::with_capabilities(Capabilities {
            max_texture_dimension: 256,
            ..Default::default()
        });
        let context = GpuContext::new(backend);
        let result = Smudge::with_mapping_builder(
            &context,
            Rc::new(ShaderMaterial::passthrough()),
            Options::default(),
            MappingBuilder::new(BlockRasterizer),
        );
        assert!(matches!(result, Err(Error::UnsupportedDevice(_))));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn the_context_is_shared_and_released_with_the_last_coordinator() {
    local(async {
        let first = Fixture::new(&[("a", "Hi")], Options::default());
        let second = Smudge::with_mapping_builder(
            &first.context,
            Rc::new(ShaderMaterial::passthrough()),
            Options::default(),
            MappingBuilder::new(BlockRasterizer),
        )
        .unwrap();
        settle().await;
        assert_eq!(first.context.lease_count(), 2);

        second.teardown();
        tokio::task::yield_now().await;
        assert_eq!(first.context.lease_count(), 1);
        assert_eq!(first.backend.release_count(), 0);

        let Fixture {
            context,
            backend,
            smudge,
            ..
        } = first;
        smudge.teardown();
        tokio::task::yield_now().await;
        assert_eq!(context.lease_count(), 0);
        assert_eq!(backend.release_count(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn failures_of_superseded_builds_are_not_reported() {
    local(async {
        let backend = HeadlessBackend::new();
        backend.set_compile_delay(Duration::from_millis(100));
        backend.set_fail_compiles(true);
        let fixture = Fixture::with_backend(
            &[("a", "Hi")],
            manual(),
            Rc::new(ShaderMaterial::passthrough()),
            backend,
        );

        // Supersedes the build compiling now, which is going to fail.
        tokio::time::sleep(Duration::from_millis(10)).await;
        fixture.smudge.add_text(&Text::new("b", "Yo"));

        // The first build has failed, the second is compiling.
        tokio::time::sleep(Duration::from_millis(140)).await;
        fixture.backend.set_fail_compiles(false);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fixture.build_events(), vec![Event::Ready]);
        let mapping = fixture.smudge.mapping().unwrap();
        assert!(mapping.contains(&"a".into()) && mapping.contains(&"b".into()));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn structural_material_changes_keep_scopes_stale_until_installed() {
    local(async {
        let material = Rc::new(ShaderMaterial::passthrough());
        let fixture = Fixture::with_material(&[("a", "Hi")], Options::default(), material.clone());
        settle().await;
        let scope = fixture.smudge.for_text(&Text::new("a", "")).unwrap();
        assert!(!scope.needs_update());

        fixture.backend.set_compile_delay(Duration::from_millis(200));
        material.set_main_image(
            "// changed\nfn main_image(text: u32, uv: vec2<f32>) -> vec4<f32> {\n    return sample_text(text, uv);\n}\n",
        );
        fixture.clear_events();

        // Frames keep running against the previous build.
        let frames = fixture.smudge.renderer().frame_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fixture.smudge.renderer().frame_count() > frames);
        assert!(fixture.build_events().is_empty());
        assert!(scope.needs_update());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fixture.build_events(), vec![Event::Update]);
        assert!(fixture.smudge.mapping_material().unwrap().wgsl().contains("// changed"));
        assert!(!scope.needs_update());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn builds_finishing_after_stop_are_installed_and_drawn_after_start() {
    local(async {
        let backend = HeadlessBackend::new();
        backend.set_compile_delay(Duration::from_millis(100));
        let fixture = Fixture::with_backend(
            &[("a", "Hi")],
            Options::default(),
            Rc::new(ShaderMaterial::passthrough()),
            backend,
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        fixture.smudge.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fixture.build_events(), vec![Event::Ready]);
        let installed = fixture.smudge.mapping_material().unwrap().program();
        assert!(!fixture.smudge.is_running());
        assert_eq!(fixture.backend.draw_count(), 0);

        fixture.smudge.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fixture.backend.draw_count() > 0);
        assert_eq!(fixture.backend.last_draw(), Some(installed));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn setting_texts_replaces_all_members() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi"), ("b", "Yo")], manual());
        settle().await;
        let a = fixture.smudge.texts()[0].clone();
        fixture.clear_events();

        fixture
            .smudge
            .set_texts(&[Text::new("b", "Yo"), Text::new("c", "Hey")]);
        settle().await;

        let ids = fixture
            .smudge
            .texts()
            .iter()
            .map(|t| t.id().to_string())
            .collect_vec();
        assert_eq!(ids, ["b", "c"]);
        assert_eq!(fixture.build_events(), vec![Event::Update]);
        let mapping = fixture.smudge.mapping().unwrap();
        assert!(!mapping.contains(&"a".into()));
        assert_eq!(mapping.len(), 2);
        assert_eq!(a.subscriber_count(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn image_data_reads_back_the_installed_build() {
    local(async {
        let fixture = Fixture::new(&[("a", "Hi")], manual());
        assert!(matches!(
            fixture.smudge.image_data().await,
            Err(Error::Render(_))
        ));

        settle().await;
        let image = fixture.smudge.image_data().await.unwrap();
        assert_eq!(image.size(), fixture.smudge.mapping().unwrap().size());
    })
    .await;
}
