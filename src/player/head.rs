//! Head — a cursor walking one branch of the AST, representing one logical
//! concurrent playback stream.
//!
//! Heads live in an arena owned by the [`Player`] and are addressed by
//! hierarchical id strings (`root0`, `root0/left1/nested2`, ...). A head
//! never holds references into the player's AST: it owns a copy of its
//! current sequence plus the declaration name it came from, and re-resolves
//! that name against the freshly parsed AST on every step read and every
//! jump. A reparse can therefore never dangle a cursor; at worst a name
//! stops resolving and the held copy keeps playing.
//!
//! Everything here runs on one thread. "Concurrency" is multiple cursors
//! interleaved through one shared event queue: a head suspends only at a
//! Tracks step; every other step kind resolves synchronously in the same
//! scheduler tick. Parent/child completion is explicit message passing: a
//! child carries an [`EndAction`] naming its parent and role, and parents
//! keep a [`JoinState`] for the ALL/ANY composition operators.

use log::{debug, warn};

use crate::dsl::{ControlMessage, Expr, Jump, Sequence, SequenceFlagRef};
use crate::eval::{evaluate, params_to_env, Env, Message};
use crate::player::{Action, Player, StepInfo};

/// How many Variable-alias hops to follow before declaring a cycle.
const MAX_RESOLVE_DEPTH: usize = 32;

/// Initial step length of a root head, in beats of the player clock.
pub(crate) const INITIAL_STEP_LENGTH: f64 = 1.0;

/// What happens when a head's sequence is exhausted.
#[derive(Debug, Clone)]
pub(crate) enum EndAction {
    /// The root cursor ended: the program is over.
    Root,
    /// Notify the spawning parent. `join` is the id of the parent's
    /// [`JoinState`] for composition children, None for nested ones.
    Notify {
        parent: String,
        role: ChildRole,
        join: Option<u64>,
    },
}

/// Which slot of its parent a child cursor fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildRole {
    Left,
    Right,
    Nested,
}

impl ChildRole {
    fn label(self) -> &'static str {
        match self {
            ChildRole::Left => "left",
            ChildRole::Right => "right",
            ChildRole::Nested => "nested",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinKind {
    /// `&`: advance once BOTH children ended, adopting the last ender's time.
    All,
    /// `||`: advance as soon as the FIRST child ends, adopting its time. The
    /// other sibling keeps running unmanaged until it ends by exhaustion.
    Any,
}

/// Composition bookkeeping held by a parent while children run. The id ties
/// children to one particular spawn: an ANY-composition loser that ends
/// after its parent has already moved on to a later composition must not
/// disturb the newer join.
#[derive(Debug)]
pub(crate) struct JoinState {
    id: u64,
    kind: JoinKind,
    left_done: bool,
    right_done: bool,
    resolved: bool,
}

impl JoinState {
    fn new(id: u64, kind: JoinKind) -> Self {
        Self {
            id,
            kind,
            left_done: false,
            right_done: false,
            resolved: false,
        }
    }

    /// Record a child completion; returns whether the parent advances now.
    fn child_done(&mut self, role: ChildRole) -> bool {
        match role {
            ChildRole::Left => self.left_done = true,
            ChildRole::Right => self.right_done = true,
            ChildRole::Nested => return true,
        }

        match self.kind {
            JoinKind::All => self.left_done && self.right_done,
            JoinKind::Any => {
                if self.resolved {
                    return false;
                }
                self.resolved = true;
                true
            }
        }
    }
}

/// One playback cursor.
#[derive(Debug)]
pub struct Head {
    pub(crate) id: String,
    /// Name of the declaration the current sequence was resolved from, when
    /// it came from one. Re-resolved against the fresh AST on demand.
    pub(crate) root_decl: Option<String>,
    /// Owned copy of the sequence being walked.
    pub(crate) sequence: Option<Sequence>,
    /// Index of the step read last; -1 before the first step.
    pub(crate) step_index: i64,
    /// Time of the next (or current) step, relative to player start.
    pub(crate) next_time: f64,
    /// Duration of one Tracks step before division by player speed.
    pub(crate) step_length: f64,
    /// Binding frames, outermost first: inherited from the spawning parent,
    /// then one per parametrized call on the way down. Innermost wins.
    pub(crate) frames: Vec<Env>,
    pub(crate) on_ended: EndAction,
    pub(crate) join: Option<JoinState>,
}

/// Result of driving a head as far as it can go within one tick.
pub(crate) enum Walked {
    /// A Tracks step was posted; the head sleeps until its queue wake-up.
    Scheduled,
    /// The head parked after requesting children; they spawn once the head
    /// is back in the arena.
    Waiting(Vec<SpawnPlan>),
    /// The sequence is exhausted (or the walk target was unreadable).
    Ended,
}

pub(crate) struct SpawnPlan {
    role: ChildRole,
    join: Option<u64>,
    expr: Expr,
}

impl Player {
    /// Create the unparented root cursor and begin walking the named
    /// declaration.
    pub(crate) fn spawn_root(&mut self, name: &str) {
        let id = self.next_head_id("root");
        let mut head = Head {
            id,
            root_decl: None,
            sequence: None,
            step_index: -1,
            next_time: 0.0,
            step_length: INITIAL_STEP_LENGTH,
            frames: Vec::new(),
            on_ended: EndAction::Root,
            join: None,
        };

        let walked = self.read_root_sequence(&mut head, name, 0);
        self.settle(head, walked);
    }

    /// Resume a head parked in the event queue. Unknown ids are stale wakes
    /// from a previous run and are ignored.
    pub(crate) fn wake(&mut self, id: &str) {
        let Some(mut head) = self.heads.remove(id) else {
            return;
        };
        let walked = self.read_next_step(&mut head);
        self.settle(head, walked);
    }

    /// Put a head to rest according to its walk outcome.
    fn settle(&mut self, head: Head, walked: Walked) {
        match walked {
            Walked::Scheduled => {
                self.heads.insert(head.id.clone(), head);
            }
            Walked::Waiting(plans) => {
                let parent_id = head.id.clone();
                let next_time = head.next_time;
                let step_length = head.step_length;
                let frames = head.frames.clone();
                self.heads.insert(parent_id.clone(), head);
                for plan in plans {
                    self.launch(&parent_id, next_time, step_length, frames.clone(), plan);
                }
            }
            Walked::Ended => self.finish(head),
        }
    }

    /// Spawn a child cursor inheriting the parent's time base, step length
    /// and binding frames, and begin walking it immediately.
    fn launch(
        &mut self,
        parent_id: &str,
        next_time: f64,
        step_length: f64,
        frames: Vec<Env>,
        plan: SpawnPlan,
    ) {
        let id = self.next_head_id(&format!("{parent_id}/{}", plan.role.label()));
        let mut child = Head {
            id,
            root_decl: None,
            sequence: None,
            step_index: -1,
            next_time,
            step_length,
            frames,
            on_ended: EndAction::Notify {
                parent: parent_id.to_string(),
                role: plan.role,
                join: plan.join,
            },
            join: None,
        };

        let walked = self.read_sequence(&mut child, &plan.expr, 0);
        self.settle(child, walked);
    }

    /// A head's sequence is exhausted: notify processors, then either flag
    /// the end of the program or hand the completion to the parent.
    fn finish(&mut self, head: Head) {
        debug!("head {} ended at {:.3}", head.id, head.next_time);
        self.each_processor(|p| p.head_ended(&head.id));

        match head.on_ended {
            EndAction::Root => self.root_ended(),
            EndAction::Notify { parent, role, join } => {
                self.child_ended(&parent, role, join, head.next_time)
            }
        }
    }

    fn child_ended(&mut self, parent_id: &str, role: ChildRole, join: Option<u64>, time: f64) {
        let Some(parent) = self.heads.get_mut(parent_id) else {
            // ANY-composition loser outliving its parent, or a stopped run.
            return;
        };

        let advance = match role {
            ChildRole::Nested => true,
            _ => match parent.join.as_mut() {
                Some(state) if Some(state.id) == join => state.child_done(role),
                _ => false,
            },
        };

        if advance {
            parent.next_time = time;
            let parent_id = parent_id.to_string();
            self.wake(&parent_id);
        }
    }

    /// Resolve a declaration by name and start walking its value.
    fn read_root_sequence(&mut self, head: &mut Head, name: &str, depth: usize) -> Walked {
        match self.find_declaration(name) {
            Some(assign) => {
                head.root_decl = Some(name.to_string());
                let value = (*assign.value).clone();
                self.read_sequence(head, &value, depth)
            }
            None => {
                warn!("head {}: no declaration named \"{name}\"", head.id);
                Walked::Ended
            }
        }
    }

    /// Dispatch on a sequence-like expression and walk into it.
    ///
    /// Ternary conditions are evaluated once, here, on entry, and never again
    /// after a reparse. Calls push an argument binding frame and recurse into
    /// the callee. Logical operators spawn both branches as children.
    pub(crate) fn read_sequence(&mut self, head: &mut Head, expr: &Expr, depth: usize) -> Walked {
        if depth > MAX_RESOLVE_DEPTH {
            warn!("head {}: alias chain too deep, giving up", head.id);
            return Walked::Ended;
        }

        match expr {
            Expr::Variable(var) => self.read_root_sequence(head, &var.name, depth + 1),
            Expr::Sequence(sequence) => {
                head.sequence = Some(sequence.clone());
                head.step_index = -1;
                self.read_next_step(head)
            }
            Expr::Ternary(ternary) => {
                let env = self.env_for(head);
                let branch = if evaluate(&ternary.condition, &env).truthy() {
                    &ternary.if_branch
                } else {
                    &ternary.else_branch
                };
                let branch = (**branch).clone();
                self.read_sequence(head, &branch, depth + 1)
            }
            Expr::Call(call) => {
                let env = self.env_for(head);
                let frame = params_to_env(&call.args, &env);
                head.frames.push(frame);
                let callee = (*call.callee).clone();
                self.read_sequence(head, &callee, depth + 1)
            }
            Expr::Logical(logical) => {
                let kind = match logical.op {
                    crate::dsl::LogicalOp::And => JoinKind::All,
                    crate::dsl::LogicalOp::Or => JoinKind::Any,
                };
                let join_id = self.next_join_id();
                head.join = Some(JoinState::new(join_id, kind));
                Walked::Waiting(vec![
                    SpawnPlan {
                        role: ChildRole::Left,
                        join: Some(join_id),
                        expr: (*logical.left).clone(),
                    },
                    SpawnPlan {
                        role: ChildRole::Right,
                        join: Some(join_id),
                        expr: (*logical.right).clone(),
                    },
                ])
            }
            Expr::Grouping(inner) => {
                let inner = (**inner).clone();
                self.read_sequence(head, &inner, depth + 1)
            }
            Expr::SequenceFlagRef(reference) => self.enter_at_flag(head, reference),
            other => {
                debug!(
                    "head {}: expression is not walkable ({other:?}); cursor ends",
                    head.id
                );
                Walked::Ended
            }
        }
    }

    /// `{name # flag}`: enter the named sequence at the named flag. A missing
    /// flag falls back to the sequence start; a missing sequence skips.
    fn enter_at_flag(&mut self, head: &mut Head, reference: &SequenceFlagRef) -> Walked {
        let Some(sequence) = self.resolve_sequence_value(&reference.sequence_name, 0) else {
            warn!(
                "head {}: cannot enter \"{}\", no such sequence",
                head.id, reference.sequence_name
            );
            return Walked::Ended;
        };

        let start = reference
            .flag_name
            .as_deref()
            .and_then(|flag| sequence.flag_index(flag))
            .map(|index| index as i64)
            .unwrap_or(-1);

        head.root_decl = Some(reference.sequence_name.clone());
        head.sequence = Some(sequence);
        head.step_index = start;
        self.read_next_step(head)
    }

    /// The step state machine. Only a Tracks step suspends; a flag-only loop
    /// spins synchronously within this call.
    pub(crate) fn read_next_step(&mut self, head: &mut Head) -> Walked {
        loop {
            if head.sequence.is_none() {
                return Walked::Ended;
            }

            // Live reload: adopt the freshly parsed body of our declaration
            // when it still resolves to a plain sequence. The step index is
            // deliberately left alone.
            self.refresh_sequence(head);

            head.step_index += 1;
            let index = head.step_index as usize;

            let step = {
                let sequence = head.sequence.as_ref().expect("checked above");
                if index >= sequence.steps.len() {
                    return Walked::Ended;
                }
                sequence.steps[index].clone()
            };

            match step {
                Expr::Tracks(track_list) => {
                    let env = self.env_for(head);
                    let messages: Vec<Message> = track_list
                        .tracks
                        .iter()
                        .map(|track| Message::from_params(&track.params, &env))
                        .collect();

                    let note_on_count = messages
                        .iter()
                        .filter(|m| {
                            !m.is_silent()
                                && m.number("p").is_some_and(|p| (0.0..128.0).contains(&p))
                        })
                        .count();

                    self.post(head.next_time, &head.id, &messages);
                    self.emit_step(&StepInfo {
                        time: head.next_time,
                        head_id: head.id.clone(),
                        step_index: index,
                        note_on_count,
                    });

                    head.next_time += head.step_length / self.speed();
                    self.schedule(head.next_time, Action::Wake(head.id.clone()));
                    return Walked::Scheduled;
                }
                Expr::Jump(jump) => self.apply_jump(head, &jump),
                Expr::InnerSequence(inner) => {
                    return Walked::Waiting(vec![SpawnPlan {
                        role: ChildRole::Nested,
                        join: None,
                        expr: (*inner.content).clone(),
                    }]);
                }
                Expr::Control(control) => self.apply_control(head, &control),
                // Flags and anything else are zero-duration; keep walking.
                _ => {}
            }
        }
    }

    /// Re-resolve the head's declaration against the current AST. Only
    /// Variable-alias chains ending in a plain sequence refresh the held
    /// copy; a ternary- or composition-valued declaration keeps the body
    /// chosen at entry.
    fn refresh_sequence(&mut self, head: &mut Head) {
        let Some(name) = head.root_decl.clone() else {
            return;
        };
        if let Some(fresh) = self.resolve_sequence_value(&name, 0) {
            if head.sequence.as_ref() != Some(&fresh) {
                head.sequence = Some(fresh);
            }
        }
    }

    /// Follow a declaration name through Variable aliases to a plain
    /// sequence value, reading from the current (possibly just reparsed) AST.
    pub(crate) fn resolve_sequence_value(&mut self, name: &str, depth: usize) -> Option<Sequence> {
        if depth > MAX_RESOLVE_DEPTH {
            return None;
        }
        let assign = self.find_declaration(name)?;
        match assign.value.as_ref() {
            Expr::Sequence(sequence) => Some(sequence.clone()),
            Expr::Variable(var) => {
                let next = var.name.clone();
                self.resolve_sequence_value(&next, depth + 1)
            }
            _ => None,
        }
    }

    /// Relocate the cursor for a jump step. Consumes no time; the caller
    /// keeps walking.
    ///
    /// A jump naming a sequence re-resolves that declaration from the fresh
    /// AST and enters it (at the named flag, or at the start). A flag-only
    /// jump re-resolves the head's own declaration and searches it for the
    /// flag, falling back to the held (possibly stale) sequence when the
    /// declaration is gone. An unresolved target leaves the cursor unmoved.
    fn apply_jump(&mut self, head: &mut Head, jump: &Jump) {
        if let Some(sequence_name) = &jump.sequence {
            match self.resolve_sequence_value(sequence_name, 0) {
                Some(fresh) => match jump.flag.as_deref() {
                    Some(flag) => match fresh.flag_index(flag) {
                        Some(index) => {
                            head.root_decl = Some(sequence_name.clone());
                            head.sequence = Some(fresh);
                            head.step_index = index as i64;
                        }
                        None => warn!(
                            "head {}: no flag \"{flag}\" in \"{sequence_name}\", jump ignored",
                            head.id
                        ),
                    },
                    None => {
                        head.root_decl = Some(sequence_name.clone());
                        head.sequence = Some(fresh);
                        head.step_index = -1;
                    }
                },
                None => warn!(
                    "head {}: jump target \"{sequence_name}\" is not a sequence, jump ignored",
                    head.id
                ),
            }
            return;
        }

        let Some(flag) = jump.flag.as_deref() else {
            return;
        };

        let fresh = head
            .root_decl
            .clone()
            .and_then(|name| self.resolve_sequence_value(&name, 0));

        if let Some(fresh) = fresh {
            if let Some(index) = fresh.flag_index(flag) {
                head.sequence = Some(fresh);
                head.step_index = index as i64;
            } else {
                warn!("head {}: flag \"{flag}\" not found, jump ignored", head.id);
            }
        } else if let Some(index) = head
            .sequence
            .as_ref()
            .and_then(|sequence| sequence.flag_index(flag))
        {
            head.step_index = index as i64;
        } else {
            warn!("head {}: flag \"{flag}\" not found, jump ignored", head.id);
        }
    }

    /// `$ player speed: x` mutates the shared player speed; `$ head
    /// stepDuration: x` mutates this head's own step length. Invalid values
    /// are ignored, never fatal.
    fn apply_control(&mut self, head: &mut Head, control: &ControlMessage) {
        let env = self.env_for(head);
        let params = params_to_env(&control.params, &env);

        match control.target.as_str() {
            "player" => {
                if let Some(value) = params.get("speed") {
                    self.set_speed(value.as_number());
                }
            }
            "head" => {
                if let Some(value) = params.get("stepDuration") {
                    let value = value.as_number();
                    if value > 0.0 && value.is_finite() {
                        head.step_length = value;
                    } else {
                        warn!("head {}: ignoring stepDuration {value}", head.id);
                    }
                }
            }
            other => debug!("head {}: unknown control target \"{other}\"", head.id),
        }
    }

    /// The environment a head evaluates against: builtins and top-level
    /// declarations, overlaid with the head's binding frames (right-biased,
    /// innermost frame wins).
    pub(crate) fn env_for(&mut self, head: &Head) -> Env {
        let mut env = self.root_env();
        for frame in &head.frames {
            env.extend(frame.clone());
        }
        env
    }
}
