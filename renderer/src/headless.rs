use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
    time::Duration,
};

use anyhow::{Result, bail};
use futures::{FutureExt, future::LocalBoxFuture};
use smudge_atlas::RgbaImage;
use smudge_material::{ProgramCompiler, ProgramId, ProgramSource, Slot};

use crate::{Capabilities, GpuBackend, Globals};

/// A backend without a GPU.
///
/// Records what it is asked to do, so that hosts without a device and tests can observe it.
/// Reading back pixels returns the program's atlas as is, material effects are not evaluated.
///
/// Cloning shares the recorded state.
#[derive(Clone, Default)]
pub struct HeadlessBackend {
    state: Rc<State>,
}

#[derive(Default)]
struct State {
    capabilities: Cell<Capabilities>,
    compile_delay: Cell<Duration>,
    fail_compiles: Cell<bool>,
    next_program: Cell<u64>,
    programs: RefCell<HashMap<ProgramId, ProgramSource>>,
    compiled: RefCell<Vec<ProgramId>>,
    last_upload: RefCell<Option<Upload>>,
    draws: Cell<usize>,
    last_draw: Cell<Option<ProgramId>>,
    releases: Cell<usize>,
}

/// The uniforms last written for a program.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub program: ProgramId,
    pub globals: Globals,
    pub text_uniforms: Vec<Slot>,
}

impl fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("programs", &self.state.programs.borrow().len())
            .field("draws", &self.state.draws.get())
            .finish()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let backend = Self::default();
        backend.state.capabilities.set(capabilities);
        backend
    }

    /// Lets every compilation take `delay` before it completes.
    pub fn set_compile_delay(&self, delay: Duration) {
        self.state.compile_delay.set(delay);
    }

    /// Lets compilations fail.
    pub fn set_fail_compiles(&self, fail: bool) {
        self.state.fail_compiles.set(fail);
    }

    /// The programs compiled so far, in order, including released ones.
    pub fn compiled(&self) -> Vec<ProgramId> {
        self.state.compiled.borrow().clone()
    }

    /// The source of a program that is not released yet.
    pub fn source(&self, program: ProgramId) -> Option<ProgramSource> {
        self.state.programs.borrow().get(&program).cloned()
    }

    pub fn live_programs(&self) -> usize {
        self.state.programs.borrow().len()
    }

    pub fn last_upload(&self) -> Option<Upload> {
        self.state.last_upload.borrow().clone()
    }

    pub fn draw_count(&self) -> usize {
        self.state.draws.get()
    }

    pub fn last_draw(&self) -> Option<ProgramId> {
        self.state.last_draw.get()
    }

    pub fn release_count(&self) -> usize {
        self.state.releases.get()
    }

    fn check_live(&self, program: ProgramId) -> Result<()> {
        if !self.state.programs.borrow().contains_key(&program) {
            bail!("Unknown program {program}");
        }
        Ok(())
    }
}

impl ProgramCompiler for HeadlessBackend {
    fn compile<'a>(&'a self, source: &'a ProgramSource) -> LocalBoxFuture<'a, Result<ProgramId>> {
        async move {
            let delay = self.state.compile_delay.get();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.state.fail_compiles.get() {
                bail!("Compilation failed");
            }

            let program = ProgramId(self.state.next_program.get() + 1);
            self.state.next_program.set(program.0);
            self.state
                .programs
                .borrow_mut()
                .insert(program, source.clone());
            self.state.compiled.borrow_mut().push(program);
            Ok(program)
        }
        .boxed_local()
    }
}

impl GpuBackend for HeadlessBackend {
    fn capabilities(&self) -> Capabilities {
        self.state.capabilities.get()
    }

    fn write_uniforms(
        &self,
        program: ProgramId,
        globals: &Globals,
        text_uniforms: &[Slot],
    ) -> Result<()> {
        self.check_live(program)?;
        *self.state.last_upload.borrow_mut() = Some(Upload {
            program,
            globals: *globals,
            text_uniforms: text_uniforms.to_vec(),
        });
        Ok(())
    }

    fn draw(&self, program: ProgramId) -> Result<()> {
        self.check_live(program)?;
        self.state.draws.set(self.state.draws.get() + 1);
        self.state.last_draw.set(Some(program));
        Ok(())
    }

    fn read_pixels(&self, program: ProgramId) -> LocalBoxFuture<'_, Result<RgbaImage>> {
        async move {
            let Some(source) = self.source(program) else {
                bail!("Unknown program {program}");
            };
            Ok(source.mapping.atlas().clone())
        }
        .boxed_local()
    }

    fn release_program(&self, program: ProgramId) {
        self.state.programs.borrow_mut().remove(&program);
    }

    fn release(&self) {
        self.state.programs.borrow_mut().clear();
        *self.state.last_upload.borrow_mut() = None;
        self.state.releases.set(self.state.releases.get() + 1);
    }
}
