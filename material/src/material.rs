use std::{cell::RefCell, collections::HashSet, fmt};

use anyhow::{Result, bail};
use smudge_util::Notifier;

use crate::{Uniform, UniformValue, validate_uniform_name};

/// The signature every material's effect source has to define.
pub const MAIN_IMAGE_SIGNATURE: &str = "fn main_image(";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialEvent {
    /// The structure changed: the source or the set of uniforms. Requires a rebuild.
    Update,
    /// Only default values of uniforms changed.
    UpdateUniformValues,
}

/// The effect capability.
///
/// `main_image` is WGSL source that defines
/// `fn main_image(text: u32, uv: vec2<f32>) -> vec4<f32>`, where `uv` is relative to the text's
/// bounds. Inside, `sample_text(text, uv)` reads the text's pixels, every declared uniform is
/// available as a function of the text (`uSpeed(text)`), as are `uPlayTime(text)`,
/// `uGlobalTime()`, `uTimeDelta()` and `uResolution()`.
pub trait Material {
    fn main_image(&self) -> String;

    /// The declared uniforms and their default values.
    fn uniforms(&self) -> Vec<Uniform>;

    fn notifier(&self) -> &Notifier<MaterialEvent>;
}

/// Checks the structure of a material's definition.
pub fn validate_definition(material: &dyn Material) -> Result<()> {
    let main_image = material.main_image();
    if !main_image.contains(MAIN_IMAGE_SIGNATURE) {
        bail!("The material's source does not define `main_image`");
    }

    let uniforms = material.uniforms();
    let mut names = HashSet::with_capacity(uniforms.len());
    for uniform in &uniforms {
        validate_uniform_name(&uniform.name)?;
        if !names.insert(uniform.name.as_str()) {
            bail!("Uniform `{}` is declared more than once", uniform.name);
        }
    }
    Ok(())
}

/// A material defined by WGSL source and a list of uniforms.
#[derive(Default)]
pub struct ShaderMaterial {
    main_image: RefCell<String>,
    uniforms: RefCell<Vec<Uniform>>,
    notifier: Notifier<MaterialEvent>,
}

impl fmt::Debug for ShaderMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderMaterial")
            .field("uniforms", &self.uniforms.borrow())
            .finish()
    }
}

impl ShaderMaterial {
    pub fn new(main_image: impl Into<String>) -> Self {
        Self {
            main_image: RefCell::new(main_image.into()),
            ..Default::default()
        }
    }

    /// Renders the texts unchanged.
    pub fn passthrough() -> Self {
        Self::new(
            "fn main_image(text: u32, uv: vec2<f32>) -> vec4<f32> {\n    return sample_text(text, uv);\n}\n",
        )
    }

    /// Declares a uniform while constructing the material.
    pub fn with_uniform(self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.borrow_mut().push(Uniform::new(name, value));
        self
    }

    pub fn set_main_image(&self, main_image: impl Into<String>) {
        *self.main_image.borrow_mut() = main_image.into();
        self.notifier.notify(&MaterialEvent::Update);
    }

    pub fn add_uniform(&self, name: impl Into<String>, value: impl Into<UniformValue>) -> Result<()> {
        let uniform = Uniform::new(name, value);
        validate_uniform_name(&uniform.name)?;
        {
            let mut uniforms = self.uniforms.borrow_mut();
            if uniforms.iter().any(|u| u.name == uniform.name) {
                bail!("Uniform `{}` is already declared", uniform.name);
            }
            uniforms.push(uniform);
        }
        self.notifier.notify(&MaterialEvent::Update);
        Ok(())
    }

    /// Changes the default value of a declared uniform. The kind must not change.
    pub fn set_uniform_value(&self, name: &str, value: impl Into<UniformValue>) -> Result<()> {
        let value = value.into();
        {
            let mut uniforms = self.uniforms.borrow_mut();
            let Some(uniform) = uniforms.iter_mut().find(|u| u.name == name) else {
                bail!("Uniform `{name}` is not declared");
            };
            if uniform.kind() != value.kind() {
                bail!(
                    "Uniform `{name}` is a {}, but a {} was provided",
                    uniform.kind(),
                    value.kind()
                );
            }
            uniform.value = value;
        }
        self.notifier.notify(&MaterialEvent::UpdateUniformValues);
        Ok(())
    }

    pub fn uniform_value(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .borrow()
            .iter()
            .find(|u| u.name == name)
            .map(|u| u.value)
    }
}

impl Material for ShaderMaterial {
    fn main_image(&self) -> String {
        self.main_image.borrow().clone()
    }

    fn uniforms(&self) -> Vec<Uniform> {
        self.uniforms.borrow().clone()
    }

    fn notifier(&self) -> &Notifier<MaterialEvent> {
        &self.notifier
    }
}
