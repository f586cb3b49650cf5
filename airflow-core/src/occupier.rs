//! The cell occupier the liquid checker drives.
//!
//! [`CellOccupier`] is the host surface the checker replays. [`SimCellOccupier`]
//! is a model of the host component whose spawn logic is an instruction
//! listing run through [`Machine`], so the transpiled guard is exercised
//! exactly as the host would run it.

use std::rc::Rc;

use log::warn;

use crate::exec::{parameter_count, pop_n, ExecError, Machine, Runtime, Value};
use crate::gate;
use crate::il::MethodBody;
use crate::listing::parse_listing;
use crate::transpiler::{SUBSCRIBE_EVENT_HASH, ON_SPAWN_HOOK};
use crate::Result;

pub trait CellOccupier {
    fn set_replace_element(&mut self, replace: bool);

    /// Undo what spawning placed in the simulation.
    fn destroy_self(&mut self);

    fn set_call_destroy(&mut self, call_destroy: bool);

    /// Run the (patched) spawn logic again.
    fn on_spawn(&mut self);
}

/// Spawn logic of the host's occupier in its unpatched form.
pub const SIM_CELL_OCCUPIER_ON_SPAWN: &str = r#"
.method "SimCellOccupier.OnSpawn"
    ldarg.0
    ldfld "Boolean doReplaceElement"
    brfalse.s no_replace
    ldarg.0
    call "Void ReplaceAndDisplaceElement()"
    br.s done
no_replace:
    ldarg.0
    call "Void ForceSetGameCellData()"
done:
    nop
    ldarg.0
    ldc.i4 -1699355994
    ldsfld "EventSystem.IntraObjectHandler`1[SimCellOccupier] OnBuildingRepairedDelegate"
    call "Int32 Subscribe[SimCellOccupier](Int32, EventSystem.IntraObjectHandler`1[SimCellOccupier])"
    pop
    ret
"#;

pub fn default_on_spawn_body() -> Result<MethodBody> {
    Ok(parse_listing("SimCellOccupier.OnSpawn", SIM_CELL_OCCUPIER_ON_SPAWN)?)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OccupierEvent {
    /// Solid element written into the cell.
    ElementReplaced,
    /// Only the game-side cell data was set; the simulation cell is untouched.
    GameCellDataSet,
    Subscribed(i32),
    Destroyed,
}

#[derive(Debug, Default)]
struct OccupierState {
    do_replace_element: bool,
    call_destroy: bool,
    element_placed: bool,
    subscriptions: Vec<i32>,
    events: Vec<OccupierEvent>,
}

impl Runtime for OccupierState {
    fn call(&mut self, signature: &str, stack: &mut Vec<Value>) -> std::result::Result<(), ExecError> {
        if signature == ON_SPAWN_HOOK {
            stack.push(Value::from_bool(gate::on_spawn_hook()));
            return Ok(());
        }

        // Every other method here is an instance method on the occupier.
        let args = pop_n(stack, parameter_count(signature) + 1)?;
        if signature.starts_with("Int32 Subscribe") {
            let hash = match args.get(1) {
                Some(Value::Int(h)) => *h,
                other => return Err(ExecError::Runtime(format!("bad event hash {:?}", other))),
            };
            self.subscriptions.push(hash);
            self.events.push(OccupierEvent::Subscribed(hash));
            stack.push(Value::Int(self.subscriptions.len() as i32));
            return Ok(());
        }

        match signature {
            "Void ReplaceAndDisplaceElement()" => {
                self.element_placed = true;
                self.events.push(OccupierEvent::ElementReplaced);
            }
            "Void ForceSetGameCellData()" => {
                self.events.push(OccupierEvent::GameCellDataSet);
            }
            _ => return Err(ExecError::Runtime(format!("unknown method {}", signature))),
        }
        Ok(())
    }

    fn load_static(&mut self, field: &str) -> std::result::Result<Value, ExecError> {
        Ok(Value::Object(field.to_string()))
    }

    fn load_field(&mut self, _target: &Value, field: &str) -> std::result::Result<Value, ExecError> {
        match field {
            "Boolean doReplaceElement" => Ok(Value::from_bool(self.do_replace_element)),
            "Boolean callDestroy" => Ok(Value::from_bool(self.call_destroy)),
            _ => Err(ExecError::Runtime(format!("unknown field {}", field))),
        }
    }

    fn store_field(
        &mut self,
        _target: &Value,
        field: &str,
        value: Value,
    ) -> std::result::Result<(), ExecError> {
        match field {
            "Boolean doReplaceElement" => self.do_replace_element = value.is_true(),
            "Boolean callDestroy" => self.call_destroy = value.is_true(),
            _ => return Err(ExecError::Runtime(format!("unknown field {}", field))),
        }
        Ok(())
    }
}

/// Model of the host's occupier component running a given spawn body.
pub struct SimCellOccupier {
    on_spawn_body: Rc<MethodBody>,
    state: OccupierState,
    last_error: Option<ExecError>,
}

impl SimCellOccupier {
    pub fn new(on_spawn_body: Rc<MethodBody>) -> Self {
        Self {
            on_spawn_body,
            state: OccupierState {
                call_destroy: true,
                ..OccupierState::default()
            },
            last_error: None,
        }
    }

    pub fn do_replace_element(&self) -> bool {
        self.state.do_replace_element
    }

    pub fn call_destroy(&self) -> bool {
        self.state.call_destroy
    }

    /// Whether the cell currently holds the occupier's solid element.
    pub fn element_placed(&self) -> bool {
        self.state.element_placed
    }

    pub fn subscriptions(&self) -> &[i32] {
        &self.state.subscriptions
    }

    pub fn events(&self) -> &[OccupierEvent] {
        &self.state.events
    }

    pub fn clear_events(&mut self) {
        self.state.events.clear();
    }

    /// Fault raised by the most recent spawn run, if any.
    pub fn last_error(&self) -> Option<&ExecError> {
        self.last_error.as_ref()
    }

    /// Host cleanup: only destroys when nothing has done so already.
    pub fn on_clean_up(&mut self) {
        if self.state.call_destroy {
            self.destroy_self();
        }
    }

    fn run_on_spawn(&mut self) -> std::result::Result<(), ExecError> {
        let this = [Value::Object("SimCellOccupier".to_string())];
        Machine::new(&self.on_spawn_body).run(&mut self.state, &this)?;
        Ok(())
    }
}

impl CellOccupier for SimCellOccupier {
    fn set_replace_element(&mut self, replace: bool) {
        self.state.do_replace_element = replace;
    }

    fn destroy_self(&mut self) {
        self.state.call_destroy = false;
        self.state.element_placed = false;
        self.state.events.push(OccupierEvent::Destroyed);
    }

    fn set_call_destroy(&mut self, call_destroy: bool) {
        self.state.call_destroy = call_destroy;
    }

    fn on_spawn(&mut self) {
        self.last_error = match self.run_on_spawn() {
            Ok(()) => None,
            Err(e) => {
                warn!("SimCellOccupier.OnSpawn faulted: {}", e);
                Some(e)
            }
        };
    }
}

/// Whether `subscriptions` holds the repair subscription more than once.
pub fn has_duplicate_repair_subscription(subscriptions: &[i32]) -> bool {
    subscriptions
        .iter()
        .filter(|h| **h == SUBSCRIBE_EVENT_HASH)
        .count()
        > 1
}
