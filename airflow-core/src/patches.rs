use log::info;

use crate::buildings::{self, Prefab, GAS_PERMEABLE_MEMBRANE_ID, SOLAR_PANEL_ID};
use crate::il::MethodBody;
use crate::options::Options;
use crate::transpiler::{self, TranspileOutcome, ON_SPAWN_HOOK};
use crate::{AirflowError, Result};

/// The set of patches the mod applies, decided once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModPatches {
    solar_panel_foundation: bool,
    hook: String,
}

impl ModPatches {
    pub fn prepare(options: &Options) -> Self {
        info!("loaded {}", options);
        Self {
            solar_panel_foundation: options.solid_solar_panels_foundation,
            hook: ON_SPAWN_HOOK.to_string(),
        }
    }

    /// Use another method reference for the spawn guard. The reference is
    /// written into listings as a quoted operand, so it must be a single
    /// line without quotes.
    pub fn with_hook(mut self, hook: &str) -> Result<Self> {
        if hook.trim().is_empty() {
            return Err(AirflowError::Config("hook must not be empty".to_string()));
        }
        if hook.contains('"') || hook.chars().any(char::is_control) {
            return Err(AirflowError::Config(format!(
                "hook {:?} may not contain quotes or control characters",
                hook
            )));
        }
        self.hook = hook.to_string();
        Ok(self)
    }

    pub fn hook(&self) -> &str {
        &self.hook
    }

    /// Names of the active patches, in application order.
    pub fn active(&self) -> Vec<&'static str> {
        let mut names = vec![
            "SimCellOccupier.OnSpawn (transpiler)",
            "GasPermeableMembraneConfig.ConfigureBuildingTemplate (postfix)",
        ];
        if self.solar_panel_foundation {
            names.push("SolarPanelConfig.DoPostConfigureComplete (postfix)");
        }
        names
    }

    pub fn configure_building_template(&self, prefab: &mut Prefab) {
        if prefab.id == GAS_PERMEABLE_MEMBRANE_ID {
            buildings::configure_building_template(prefab);
        }
    }

    pub fn do_post_configure_complete(&self, prefab: &mut Prefab) {
        if self.solar_panel_foundation && prefab.id == SOLAR_PANEL_ID {
            buildings::do_post_configure_complete(prefab);
        }
    }

    pub fn transpile_on_spawn(&self, body: MethodBody) -> (MethodBody, TranspileOutcome) {
        transpiler::transpile_on_spawn(body, &self.hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solar_patch_follows_option() {
        let on = ModPatches::prepare(&Options::default());
        let off = ModPatches::prepare(&Options {
            solid_solar_panels_foundation: false,
        });

        let mut panel = Prefab::new(SOLAR_PANEL_ID);
        off.do_post_configure_complete(&mut panel);
        assert!(panel.make_base_solid.is_none());
        assert_eq!(off.active().len(), 2);

        on.do_post_configure_complete(&mut panel);
        assert!(panel.make_base_solid.unwrap().occupy_foundation_layer);
        assert_eq!(on.active().len(), 3);
    }

    #[test]
    fn postfixes_only_touch_their_building() {
        let patches = ModPatches::prepare(&Options::default());

        let mut tile = Prefab::new("Tile");
        patches.configure_building_template(&mut tile);
        patches.do_post_configure_complete(&mut tile);
        assert_eq!(tile, Prefab::new("Tile"));

        let mut membrane = Prefab::new(GAS_PERMEABLE_MEMBRANE_ID);
        patches.configure_building_template(&mut membrane);
        assert!(membrane.liquid_checker);
    }

    #[test]
    fn hook_must_survive_the_listing_format() {
        let patches = ModPatches::prepare(&Options::default());
        assert_eq!(patches.hook(), ON_SPAWN_HOOK);

        for bad in ["", "   ", "Boolean \"Q\"::Hook()", "Boolean Q::Hook()\nret"] {
            let err = patches.clone().with_hook(bad).unwrap_err();
            assert!(matches!(err, AirflowError::Config(_)), "{:?}", bad);
        }

        let custom = patches.with_hook("Boolean Other::Hook()").unwrap();
        assert_eq!(custom.hook(), "Boolean Other::Hook()");
    }
}
