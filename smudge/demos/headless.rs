//! Renders two waving texts without a window and prints what was read back.
//!
//! Falls back to the headless test backend if no GPU adapter is available.

use std::{rc::Rc, time::Duration};

use anyhow::Result;
use log::{info, warn};
use smudge::{GpuContext, HeadlessBackend, Options, ShaderMaterial, Smudge, WgpuBackend};
use tokio::task::LocalSet;

const WAVE: &str = r#"
fn main_image(text: u32, uv: vec2<f32>) -> vec4<f32> {
    let offset = sin(uv.x * uFrequency(text) + uPlayTime(text) * 4.0) * uAmplitude(text);
    return sample_text(text, vec2<f32>(uv.x, uv.y + offset));
}
"#;

const OPTIONS: &str = r##"
ratio = 2.0
autobuild = false

[[texts]]
id = "title"
text = "Smudge"
size = 48.0
weight = 700

[[texts]]
id = "subtitle"
text = "rendered headless"
size = 18.0
style = "italic"
padding = 4.0
"##;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    LocalSet::new().run_until(run()).await
}

async fn run() -> Result<()> {
    let context = match WgpuBackend::headless().await {
        Ok(backend) => GpuContext::new(backend),
        Err(e) => {
            warn!("No GPU available, falling back to the headless backend: {e:#}");
            GpuContext::new(HeadlessBackend::new())
        }
    };

    let material = Rc::new(
        ShaderMaterial::new(WAVE)
            .with_uniform("uFrequency", 12.0)
            .with_uniform("uAmplitude", 0.02),
    );
    let smudge = Smudge::new(&context, material.clone(), Options::from_toml_str(OPTIONS)?)?;
    smudge.subscribe(|event| info!("{event:?}"));

    smudge.build().await?;
    for text in smudge.texts() {
        if let Some(bounds) = smudge.bounds_for_text(&text) {
            println!("{}: {bounds:?}", text.id());
        }
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    material.set_uniform_value("uAmplitude", 0.05)?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let image = smudge.image_data().await?;
    let size = image.size();
    let covered = image.pixels().chunks_exact(4).filter(|p| p[3] > 0).count();
    println!(
        "Read back {}x{} pixels, {covered} covered",
        size.width, size.height
    );

    smudge.teardown();
    Ok(())
}
