pub const GAS_PERMEABLE_MEMBRANE_ID: &str = "GasPermeableMembrane";
pub const SOLAR_PANEL_ID: &str = "SolarPanel";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MakeBaseSolidDef {
    /// Whether the base row also occupies the foundation layer, i.e. counts
    /// as solid ground rather than just blocking the cells.
    pub occupy_foundation_layer: bool,
}

/// The parts of a building prefab the patches touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefab {
    pub id: String,
    pub liquid_checker: bool,
    pub make_base_solid: Option<MakeBaseSolidDef>,
}

impl Prefab {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn add_or_get_liquid_checker(&mut self) {
        self.liquid_checker = true;
    }

    pub fn add_or_get_make_base_solid(&mut self) -> &mut MakeBaseSolidDef {
        self.make_base_solid.get_or_insert_with(MakeBaseSolidDef::default)
    }
}

/// Postfix on the membrane's template configuration: every membrane tile
/// gets a liquid checker.
pub fn configure_building_template(prefab: &mut Prefab) {
    prefab.add_or_get_liquid_checker();
}

/// Postfix on the solar panel's final configuration. The panel's lower row
/// acts as a foundation but is not a real tile, so it renders poorly; make it
/// solid. Heavy-watt wire can then no longer pass through those cells.
pub fn do_post_configure_complete(prefab: &mut Prefab) {
    prefab.add_or_get_make_base_solid().occupy_foundation_layer = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membrane_gets_checker_once() {
        let mut prefab = Prefab::new(GAS_PERMEABLE_MEMBRANE_ID);
        configure_building_template(&mut prefab);
        configure_building_template(&mut prefab);
        assert!(prefab.liquid_checker);
        assert!(prefab.make_base_solid.is_none());
    }

    #[test]
    fn solar_panel_foundation_becomes_solid() {
        let mut prefab = Prefab::new(SOLAR_PANEL_ID);
        do_post_configure_complete(&mut prefab);
        assert_eq!(
            prefab.make_base_solid,
            Some(MakeBaseSolidDef {
                occupy_foundation_layer: true
            })
        );
    }

    #[test]
    fn existing_def_is_reused() {
        let mut prefab = Prefab::new(SOLAR_PANEL_ID);
        prefab.add_or_get_make_base_solid();
        do_post_configure_complete(&mut prefab);
        assert!(prefab.make_base_solid.unwrap().occupy_foundation_layer);
    }
}
