use snafu::{ResultExt, ensure};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use super::{
    Applier, CancelledSnafu, GoTemplateApplier, JsonnetApplier, Options, PatchTemplateApplier,
    Result, StageSnafu,
};
use crate::{
    apis::{Bundle, Component},
    object::Object,
};

/// Runs a fixed sequence of appliers, feeding the output of each into the next.
///
/// The first failing stage aborts the run. Its error is wrapped with the name of the stage.
pub struct MultiApplier {
    appliers: Vec<Box<dyn Applier + Send + Sync>>,
}

impl Default for MultiApplier {
    /// Object templates are rendered before any patch is applied, so that patches can target the
    /// rendered objects.
    fn default() -> Self {
        Self::with_appliers(vec![
            Box::new(GoTemplateApplier::default()),
            Box::new(JsonnetApplier::default()),
            Box::new(PatchTemplateApplier::default()),
        ])
    }
}

impl std::fmt::Debug for MultiApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.appliers.iter().map(|applier| applier.name()))
            .finish()
    }
}

impl MultiApplier {
    pub fn with_appliers(appliers: Vec<Box<dyn Applier + Send + Sync>>) -> Self {
        Self { appliers }
    }

    /// Applies `options` to every component of `bundle` in order.
    ///
    /// `cancel` is checked before each component; once it holds `true` no further component is
    /// applied.
    #[instrument(skip_all, fields(bundle = %bundle.set_name, components = bundle.components.len()))]
    pub fn apply_bundle(
        &self,
        bundle: &Bundle,
        options: &Options,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Bundle> {
        let mut applied = bundle.clone();
        applied.components = Vec::with_capacity(bundle.components.len());

        for component in &bundle.components {
            ensure!(
                !*cancel.borrow(),
                CancelledSnafu {
                    component: component.name(),
                }
            );
            applied.components.push(self.apply_options(component, options)?);
        }

        info!("applied options to bundle");
        Ok(applied)
    }
}

impl Applier for MultiApplier {
    fn name(&self) -> &str {
        "multi"
    }

    fn claims(&self, object: &Object) -> bool {
        self.appliers.iter().any(|applier| applier.claims(object))
    }

    #[instrument(skip_all, fields(component = %component.name()))]
    fn apply_options(&self, component: &Component, options: &Options) -> Result<Component> {
        let mut current = component.clone();
        for applier in &self.appliers {
            debug!(stage = applier.name(), "running stage");
            current = applier
                .apply_options(&current, options)
                .context(StageSnafu {
                    stage: applier.name(),
                })?;
        }
        Ok(current)
    }
}
