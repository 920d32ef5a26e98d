//! Walker traversal: spawn, the dispatch loop, visit/report/disengage.
//!
//! A traversal is single-threaded: nodes are processed in enqueue order,
//! each at most once regardless of duplicate enqueues, and the loop ends
//! when the queue drains or the walker disengages. `disengage` is a drain
//! flag, never an exception; user errors abort the traversal and bubble to
//! the caller.

use std::collections::{BTreeMap, HashSet, VecDeque};

use jac_compiler::ir::{AbilityImage, ArchetypeImage, ArchetypeKindImage, MomentImage, PeerImage};
use jac_core::error::RuntimeError;
use jac_core::value::Value;
use uuid::Uuid;

use crate::anchor::{Anchor, AnchorKind};
use crate::interp::{Env, Interpreter};

/// State of one active traversal.
pub struct WalkerFrame {
    pub walker_name: String,
    /// Transient anchor identity of this walker run.
    pub anchor_id: Uuid,
    pub fields: BTreeMap<String, Value>,
    pub queue: VecDeque<Uuid>,
    pub visited: HashSet<Uuid>,
    pub reports: Vec<Value>,
    pub disengaged: bool,
    /// Node currently being processed.
    pub current: Uuid,
    /// True while a node-declared ability runs (`self` means the node).
    pub node_side: bool,
}

impl WalkerFrame {
    pub fn new(walker_name: String, fields: BTreeMap<String, Value>, start: Uuid) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(start);
        Self {
            walker_name,
            anchor_id: Uuid::new_v4(),
            fields,
            queue,
            visited: HashSet::new(),
            reports: Vec::new(),
            disengaged: false,
            current: start,
            node_side: false,
        }
    }

    /// Set the drain flag and empty the queue.
    pub fn disengage(&mut self) {
        self.disengaged = true;
        self.queue.clear();
    }

    /// Snapshot of the walker as a value (`self` / `visitor`).
    pub fn self_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(
            "__walker__".to_string(),
            Value::Str(self.walker_name.clone()),
        );
        Value::Map(map)
    }
}

/// Outcome of a completed traversal.
#[derive(Clone, Debug)]
pub struct TraversalResult {
    pub anchor_id: Uuid,
    pub reports: Vec<Value>,
    pub disengaged: bool,
}

impl<'m> Interpreter<'m> {
    /// Spawn from an evaluated walker-instance value (tagged map).
    pub fn spawn_value(
        &mut self,
        walker: Value,
        start: Uuid,
    ) -> Result<TraversalResult, RuntimeError> {
        let Value::Map(mut fields) = walker else {
            return Err(RuntimeError::UserError(
                "spawn needs a walker instance".to_string(),
            ));
        };
        let Some(Value::Str(name)) = fields.remove("__walker__") else {
            return Err(RuntimeError::UserError(
                "spawn needs a walker instance".to_string(),
            ));
        };
        self.spawn_walker(&name, fields, start)
    }

    /// Spawn a walker archetype by name on a start node.
    pub fn spawn_walker(
        &mut self,
        name: &str,
        fields: BTreeMap<String, Value>,
        start: Uuid,
    ) -> Result<TraversalResult, RuntimeError> {
        let (walker_module, walker_arch) = self.resolve_archetype(name)?;
        if walker_arch.kind != ArchetypeKindImage::Walker {
            return Err(RuntimeError::InvalidArgument(format!(
                "'{name}' is not a walker"
            )));
        }

        // The start node must be visible to the acting root.
        self.load_checked(start)?;

        tracing::debug!(walker = name, start = %start, "spawning walker");
        let frame = WalkerFrame::new(name.to_string(), fields, start);
        let anchor_id = frame.anchor_id;
        let previous_frame = self.frame.replace(frame);
        // Ability bodies resolve names in the walker's defining module.
        let previous_module = (!std::sync::Arc::ptr_eq(&walker_module, &self.module))
            .then(|| self.swap_module(walker_module));

        let outcome = self.dispatch_loop(&walker_arch);

        if let Some(previous_module) = previous_module {
            self.swap_module(previous_module);
        }
        let frame = match std::mem::replace(&mut self.frame, previous_frame) {
            Some(frame) => frame,
            None => {
                return Err(RuntimeError::UserError(
                    "walker frame lost during traversal".to_string(),
                ))
            }
        };
        outcome?;

        Ok(TraversalResult {
            anchor_id,
            reports: frame.reports,
            disengaged: frame.disengaged,
        })
    }

    fn dispatch_loop(&mut self, walker_arch: &ArchetypeImage) -> Result<(), RuntimeError> {
        loop {
            self.check_cancelled()?;
            let (node_id, disengaged) = {
                let frame = self.frame.as_mut().expect("frame active during traversal");
                (frame.queue.pop_front(), frame.disengaged)
            };
            let Some(node_id) = node_id else {
                return Ok(());
            };
            if disengaged {
                return Ok(());
            }
            {
                let frame = self.frame.as_mut().expect("frame active during traversal");
                if !frame.visited.insert(node_id) {
                    continue;
                }
                frame.current = node_id;
            }

            let node = self.load_checked(node_id)?;
            let node_arch = self.node_archetype(&node);

            for moment in [MomentImage::Entry, MomentImage::Exit] {
                let walker_side = resolve_side(
                    &walker_arch.abilities,
                    walker_peer_key(&node),
                    moment,
                    &walker_arch.name,
                    &node.archetype,
                )?;
                let node_side = match &node_arch {
                    Some(arch) => resolve_side(
                        &arch.abilities,
                        NodePeerKey::Walker(&walker_arch.name),
                        moment,
                        &walker_arch.name,
                        &node.archetype,
                    )?,
                    None => None,
                };

                if let Some(ability) = walker_side {
                    self.run_ability(&ability, false)?;
                    if self.frame.as_ref().is_some_and(|f| f.disengaged) {
                        return Ok(());
                    }
                }
                if let Some(ability) = node_side {
                    self.run_ability(&ability, true)?;
                    if self.frame.as_ref().is_some_and(|f| f.disengaged) {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn run_ability(&mut self, ability: &AbilityImage, node_side: bool) -> Result<(), RuntimeError> {
        if let Some(frame) = &mut self.frame {
            frame.node_side = node_side;
        }
        let mut env = Env::new();
        let result = self.eval_block(&ability.body, &mut env);
        if let Some(frame) = &mut self.frame {
            frame.node_side = false;
        }
        result.map(|_| ())
    }

    /// The archetype image for a node anchor, wherever it was declared.
    fn node_archetype(&self, node: &Anchor) -> Option<ArchetypeImage> {
        if node.kind == AnchorKind::Root {
            return None;
        }
        if let Some(arch) = self.module.image.archetype(&node.archetype) {
            return Some(arch.clone());
        }
        self.machine
            .find_archetype(&node.archetype, Some(&self.module.name))
            .map(|(module, name)| module.image.archetype(&name).cloned())?
    }

    fn resolve_archetype(
        &self,
        name: &str,
    ) -> Result<(std::sync::Arc<crate::machine::LoadedModule>, ArchetypeImage), RuntimeError> {
        if let Some(arch) = self.module.image.archetype(name) {
            return Ok((self.module.clone(), arch.clone()));
        }
        self.machine
            .find_archetype(name, Some(&self.module.name))
            .and_then(|(module, name)| {
                let arch = module.image.archetype(&name).cloned()?;
                Some((module, arch))
            })
            .ok_or_else(|| RuntimeError::NotFound(format!("walker '{name}'")))
    }
}

/// What the walker-side peer pattern is matched against.
enum NodePeerKey<'a> {
    Root,
    Archetype(&'a str),
    Walker(&'a str),
}

fn walker_peer_key(node: &Anchor) -> NodePeerKey<'_> {
    if node.kind == AnchorKind::Root {
        NodePeerKey::Root
    } else {
        NodePeerKey::Archetype(&node.archetype)
    }
}

/// Most-specific ability for one side of the dispatch. A named peer match
/// outranks the wildcard; two hits at the same rank are ambiguous.
fn resolve_side(
    abilities: &[AbilityImage],
    key: NodePeerKey<'_>,
    moment: MomentImage,
    walker_name: &str,
    node_name: &str,
) -> Result<Option<AbilityImage>, RuntimeError> {
    let mut best_rank = 0u8;
    let mut best: Vec<&AbilityImage> = Vec::new();

    for ability in abilities {
        if ability.moment != moment {
            continue;
        }
        let rank = match (&ability.peer, &key) {
            (PeerImage::Root, NodePeerKey::Root) => 2,
            (PeerImage::Named(name), NodePeerKey::Archetype(arch)) if name == arch => 2,
            (PeerImage::Named(name), NodePeerKey::Walker(walker)) if name == walker => 2,
            (PeerImage::Any, _) => 1,
            _ => 0,
        };
        if rank == 0 {
            continue;
        }
        if rank > best_rank {
            best_rank = rank;
            best = vec![ability];
        } else if rank == best_rank {
            best.push(ability);
        }
    }

    match best.len() {
        0 => Ok(None),
        1 => Ok(Some(best[0].clone())),
        _ => Err(RuntimeError::AmbiguousAbility {
            walker: walker_name.to_string(),
            node: node_name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::machine::JacMachine;
    use std::path::Path;
    use std::sync::Arc;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn spawn(
        source: &str,
        walker: &str,
        fields: BTreeMap<String, Value>,
    ) -> (TraversalResult, Arc<ExecutionContext>) {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), source);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();
        let mut interp = Interpreter::new(&machine, ctx.clone(), module);
        let start = ctx.root();
        let result = interp.spawn_walker(walker, fields, start).unwrap();
        (result, ctx)
    }

    const TASKS: &str = r#"
node Task {
    has title: str;
    has priority: int = 0;
}

walker CreateTask {
    has title: str;
    has priority: int = 0;

    can build with `root entry {
        report here ++> Task(title=self.title, priority=self.priority);
    }
}

walker ListTasks {
    can collect with `root entry {
        visit [-->];
    }
    can gather with Task entry {
        report {"title": here.title, "priority": here.priority};
    }
}
"#;

    #[test]
    fn create_then_list_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), TASKS);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();

        let mut interp = Interpreter::new(&machine, ctx.clone(), module.clone());
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), Value::Str("T".into()));
        fields.insert("priority".to_string(), Value::Int(2));
        let created = interp.spawn_walker("CreateTask", fields, ctx.root()).unwrap();
        assert_eq!(created.reports.len(), 1);

        let mut lister = Interpreter::new(&machine, ctx.clone(), module);
        let listed = lister
            .spawn_walker("ListTasks", BTreeMap::new(), ctx.root())
            .unwrap();
        assert_eq!(listed.reports.len(), 1);
        match &listed.reports[0] {
            Value::Map(entries) => {
                assert_eq!(entries.get("title"), Some(&Value::Str("T".into())));
                assert_eq!(entries.get("priority"), Some(&Value::Int(2)));
            }
            other => panic!("expected map report, got {other:?}"),
        }
    }

    #[test]
    fn each_node_processed_at_most_once() {
        // The collector enqueues every out-neighbor twice; the visited set
        // must still keep each node to a single gather report.
        let source = r#"
node Item { has n: int = 0; }
walker Seed {
    can plant with `root entry {
        here ++> Item(n=1);
        here ++> Item(n=2);
    }
}
walker Walk {
    can go with `root entry {
        visit [-->];
        visit [-->];
    }
    can count with Item entry {
        report here.n;
    }
}
"#;
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), source);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();

        let mut interp = Interpreter::new(&machine, ctx.clone(), module.clone());
        interp.spawn_walker("Seed", BTreeMap::new(), ctx.root()).unwrap();
        let mut walk = Interpreter::new(&machine, ctx.clone(), module);
        let result = walk.spawn_walker("Walk", BTreeMap::new(), ctx.root()).unwrap();
        assert_eq!(result.reports.len(), 2);
    }

    #[test]
    fn disengage_drains_the_queue() {
        let source = r#"
node Item { has n: int = 0; }
walker Seed {
    can plant with `root entry {
        here ++> Item(n=1);
        here ++> Item(n=2);
        here ++> Item(n=3);
    }
}
walker StopEarly {
    can go with `root entry {
        visit [-->];
    }
    can check with Item entry {
        report here.n;
        disengage;
    }
}
"#;
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), source);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();

        let mut interp = Interpreter::new(&machine, ctx.clone(), module.clone());
        interp.spawn_walker("Seed", BTreeMap::new(), ctx.root()).unwrap();
        let mut walker = Interpreter::new(&machine, ctx.clone(), module);
        let result = walker
            .spawn_walker("StopEarly", BTreeMap::new(), ctx.root())
            .unwrap();
        assert_eq!(result.reports.len(), 1);
        assert!(result.disengaged);
    }

    #[test]
    fn exit_abilities_run_after_entry() {
        let source = r#"
walker InOut {
    can arrive with `root entry {
        report "entry";
    }
    can leave with `root exit {
        report "exit";
    }
}
"#;
        let (result, _ctx) = spawn(source, "InOut", BTreeMap::new());
        assert_eq!(
            result.reports,
            vec![Value::Str("entry".into()), Value::Str("exit".into())]
        );
    }

    #[test]
    fn node_side_ability_sees_visitor() {
        let inline = r#"
node Greeter {
    has name: str;
    can greet with Visit entry {
        report self.name + ":" + visitor.tag;
    }
}
walker Seed {
    can plant with `root entry {
        here ++> Greeter(name="n1");
    }
}
walker Visit {
    has tag: str = "v";
    can go with `root entry {
        visit [-->];
    }
}
"#;
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), inline);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();

        let mut interp = Interpreter::new(&machine, ctx.clone(), module.clone());
        interp.spawn_walker("Seed", BTreeMap::new(), ctx.root()).unwrap();
        let mut visit = Interpreter::new(&machine, ctx.clone(), module);
        let result = visit.spawn_walker("Visit", BTreeMap::new(), ctx.root()).unwrap();
        assert_eq!(result.reports, vec![Value::Str("n1:v".into())]);
    }

    #[test]
    fn walker_fields_mutate_across_nodes() {
        let source = r#"
node Item { has n: int = 0; }
walker Seed {
    can plant with `root entry {
        here ++> Item(n=1);
        here ++> Item(n=2);
    }
}
walker Sum {
    has total: int = 0;
    can go with `root entry {
        visit [-->];
    }
    can add with Item entry {
        self.total = self.total + here.n;
    }
    can finish with `root exit {
        report self.total;
    }
}
"#;
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), source);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();

        let mut interp = Interpreter::new(&machine, ctx.clone(), module.clone());
        interp.spawn_walker("Seed", BTreeMap::new(), ctx.root()).unwrap();
        let mut sum = Interpreter::new(&machine, ctx.clone(), module);
        let result = sum.spawn_walker("Sum", BTreeMap::new(), ctx.root()).unwrap();
        // Exit ran while leaving root, before items were summed.
        assert_eq!(result.reports, vec![Value::Int(0)]);
    }

    #[test]
    fn spawning_a_non_walker_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), "node Task { has t: str; }");
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();
        let mut interp = Interpreter::new(&machine, ctx.clone(), module);
        let err = interp
            .spawn_walker("Task", BTreeMap::new(), ctx.root())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }

    #[test]
    fn user_error_aborts_traversal() {
        let source = r#"
walker Boom {
    can go with `root entry {
        report 1 / 0;
    }
}
"#;
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), source);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();
        let mut interp = Interpreter::new(&machine, ctx.clone(), module);
        let err = interp
            .spawn_walker("Boom", BTreeMap::new(), ctx.root())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UserError(_)));
    }

    #[test]
    fn spawn_expression_returns_reports() {
        let source = r#"
walker Quick {
    can go with `root entry {
        report 7;
    }
}
with entry {
    report root spawn Quick();
}
"#;
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("main.jac"), source);
        let machine = JacMachine::new(tmp.path());
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let module = machine.import_module("main").unwrap();
        let mut interp = Interpreter::new(&machine, ctx, module);
        interp.run_entries(None).unwrap();
        assert_eq!(interp.reports, vec![Value::List(vec![Value::Int(7)])]);
    }
}
