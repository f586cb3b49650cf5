use log::{info, warn};

use crate::editor::PatchSite;
use crate::il::{Label, MethodBody};
use crate::matcher::Pattern;

/// Event hash the occupier subscribes its repair handler under.
pub const SUBSCRIBE_EVENT_HASH: i32 = -1699355994;
pub const DELEGATE_FIELD_SUFFIX: &str = "OnBuildingRepairedDelegate";
pub const SUBSCRIBE_METHOD_PREFIX: &str = "Int32 Subscribe";

/// Static predicate the guard calls; backed by [`crate::gate::on_spawn_hook`].
pub const ON_SPAWN_HOOK: &str = "Boolean AirflowTileLiquidChecker::OnSpawnHook()";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TranspileOutcome {
    Patched { site: usize, label: Label },
    NotFound,
}

impl TranspileOutcome {
    pub fn is_patched(&self) -> bool {
        matches!(self, TranspileOutcome::Patched { .. })
    }
}

pub fn on_spawn_pattern() -> Pattern {
    Pattern::subscribe_tail(SUBSCRIBE_EVENT_HASH, DELEGATE_FIELD_SUFFIX, SUBSCRIBE_METHOD_PREFIX)
}

/// Prepend `if (hook()) return;` to the repair subscription at the end of
/// the occupier's spawn method:
///
/// ```text
/// call hook            <- inserted
/// brfalse.s L          <- inserted
/// ret                  <- inserted
/// L: ldarg.0           <- original tail, unchanged
///    ldc.i4 -1699355994
///    ldsfld ...OnBuildingRepairedDelegate
///    call Int32 Subscribe...
///    pop
///    ret
/// ```
///
/// When the tail is not found the body comes back untouched.
pub fn transpile_on_spawn(mut body: MethodBody, hook: &str) -> (MethodBody, TranspileOutcome) {
    let site = match PatchSite::locate(&body, &on_spawn_pattern()) {
        Some(site) => site,
        None => {
            warn!("ShowLiquidOnAirflowTiles: Failed to patch SimCellOccupier.OnSpawn()");
            return (body, TranspileOutcome::NotFound);
        }
    };

    let index = site.index();
    let label = match site.insert_guard(&mut body, hook) {
        Some(label) => label,
        None => {
            warn!("ShowLiquidOnAirflowTiles: Failed to patch SimCellOccupier.OnSpawn()");
            return (body, TranspileOutcome::NotFound);
        }
    };
    info!("patched {} at instruction {} (guard label {})", body.name(), index, label);

    (body, TranspileOutcome::Patched { site: index, label })
}
