//! The rebuild pipeline: mapping, then material, then the swap.

use std::rc::{Rc, Weak};

use anyhow::Result;
use log::{debug, error, info};
use smudge_atlas::TextSnapshot;
use smudge_material::{MappingMaterial, MaterialCompiler};
use smudge_util::{CoalescingKey, CoalescingReceiver, Generation};
use tracing::instrument;

use crate::{Event, smudge::SmudgeInner};

#[derive(Debug)]
pub(crate) struct RebuildRequest {
    pub generation: Generation,
}

impl CoalescingKey for RebuildRequest {
    type Key = ();

    /// Only the latest pending request is built.
    fn coalescing_key(&self) -> Option<Self::Key> {
        Some(())
    }
}

/// Builds requests one after the other until the coordinator goes away.
pub(crate) async fn run(inner: Weak<SmudgeInner>, mut requests: CoalescingReceiver<RebuildRequest>) {
    while let Ok(request) = requests.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.generations.is_current(request.generation) {
            debug!("Skipping superseded rebuild {}", request.generation);
            continue;
        }
        if let Err(e) = inner.rebuild(request.generation).await {
            error!("Rebuild {} failed: {e:?}", request.generation);
            inner.notifier.notify(&Event::BuildFailed(format!("{e:#}")));
        }
    }
    debug!("Rebuild pipeline stopped");
}

impl SmudgeInner {
    /// Builds the current state and installs it, unless `generation` is superseded meanwhile.
    ///
    /// Returns `true` if the result was installed.
    #[instrument(skip(self))]
    pub async fn rebuild(self: &Rc<Self>, generation: Generation) -> Result<bool> {
        let texts: Vec<TextSnapshot> = self
            .scopes
            .borrow()
            .values()
            .map(|s| s.text().snapshot())
            .collect();
        let material = self.material.borrow().clone();

        // Superseded rebuilds are dropped after each stage, failures included.
        let mapping = self
            .mapping_builder
            .build(&texts, self.ratio, self.max_texture_dimension)
            .await;
        if !self.generations.is_current(generation) {
            if let Err(e) = mapping {
                debug!("Ignoring mapping failure of superseded rebuild {generation}: {e:#}");
            }
            debug!("Discarding mapping of superseded rebuild {generation}");
            return Ok(false);
        }

        let backend = self.renderer.backend();
        let mapping_material = MaterialCompiler
            .build(&*backend, Rc::new(mapping?), &*material)
            .await;
        if !self.generations.is_current(generation) {
            match mapping_material {
                Ok(mapping_material) => backend.release_program(mapping_material.program()),
                Err(e) => {
                    debug!("Ignoring material failure of superseded rebuild {generation}: {e:#}")
                }
            }
            debug!("Discarding material of superseded rebuild {generation}");
            return Ok(false);
        }

        Ok(self.apply(generation, Rc::new(mapping_material?)))
    }

    /// Swaps in a finished build. No frame runs while the swap is in progress.
    fn apply(&self, generation: Generation, mapping_material: Rc<MappingMaterial>) -> bool {
        if self.applied.get().is_some_and(|applied| applied >= generation) {
            debug!("Rebuild {generation} is already installed");
            self.renderer
                .backend()
                .release_program(mapping_material.program());
            return false;
        }

        let first = {
            let _hold = self.renderer.hold();
            for scope in self.scopes.borrow().values() {
                scope.set_material(Rc::downgrade(&mapping_material));
            }
            self.renderer.set_program(Some(mapping_material.clone()));
            *self.mapping_material.borrow_mut() = Some(mapping_material.clone());
            let first = self.applied.replace(Some(generation)).is_none();

            info!(
                "Installed rebuild {generation}: {} texts in {}x{}",
                mapping_material.mapping().len(),
                mapping_material.mapping().width(),
                mapping_material.mapping().height()
            );

            if self.autostart.get() {
                self.renderer.start();
            }
            first
        };

        let event = if first { Event::Ready } else { Event::Update };
        self.notifier.notify(&event);
        true
    }
}
