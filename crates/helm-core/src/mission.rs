//! Mission state and the task-advancement policy.
//!
//! [`MissionState`] owns the task list, the current-task pointer, the
//! override/saved slots, and the pending-command mailbox. It is exclusively
//! owned by the executor's state machine; transports deposit commands through
//! channels that the machine drains each tick, so no locking is needed here.

use crate::command::{Command, PendingCommand};
use crate::models::{GeoPoint, HoverTask, PilotingMode, Task};

/// Which path-driving backend FollowPath sends goals to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerKind {
    Follower,
    Planner,
}

/// What happens when task advancement falls off either end of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneBehavior {
    /// Station-keep where the vehicle is, without touching the list.
    Hover,
    /// Wrap around to the first task.
    Restart,
}

/// Mission-level configuration, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct MissionConfig {
    pub waypoint_threshold_m: f64,
    pub turn_radius_m: f64,
    pub segment_length_m: f64,
    pub default_speed_mps: f32,
    pub planner: PlannerKind,
    pub done_behavior: DoneBehavior,
    pub lineup_distance_m: f64,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            waypoint_threshold_m: 10.0,
            turn_radius_m: 10.0,
            segment_length_m: 5.0,
            default_speed_mps: 2.0,
            planner: PlannerKind::Follower,
            done_behavior: DoneBehavior::Hover,
            lineup_distance_m: 25.0,
        }
    }
}

/// The task the executor is working on.
///
/// Tasks in the list are identified by index, never by content, so duplicate
/// entries stay distinguishable. The end-of-list hover is synthesized outside
/// the list and therefore carried inline.
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentTask {
    Queued(usize),
    Transient(Task),
}

/// Process-lifetime mission state.
#[derive(Debug)]
pub struct MissionState {
    pub config: MissionConfig,
    pub piloting_mode: PilotingMode,
    /// All accepted tasks, completed ones included; shrunk only by an
    /// explicit clear so a finished mission can be restarted.
    tasks: Vec<Task>,
    current: Option<CurrentTask>,
    override_task: Option<Task>,
    /// Snapshot of `current` taken when the override was accepted.
    saved: Option<CurrentTask>,
    /// Single-slot mailbox, last writer wins, consumed by [`Self::next_task`].
    pending: Option<PendingCommand>,
}

impl MissionState {
    pub fn new(config: MissionConfig) -> Self {
        Self {
            config,
            piloting_mode: PilotingMode::Standby,
            tasks: Vec::new(),
            current: None,
            override_task: None,
            saved: None,
            pending: None,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn pending(&self) -> Option<PendingCommand> {
        self.pending
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn set_pending(&mut self, command: PendingCommand) {
        if let Some(prior) = self.pending.replace(command) {
            tracing::debug!("Overwriting unconsumed pending command {:?}", prior);
        }
    }

    pub fn override_task(&self) -> Option<&Task> {
        self.override_task.as_ref()
    }

    pub fn saved_task(&self) -> Option<&CurrentTask> {
        self.saved.as_ref()
    }

    /// Index of the current task in the list, if it is a queued one.
    pub fn current_index(&self) -> Option<usize> {
        match self.current {
            Some(CurrentTask::Queued(i)) => Some(i),
            _ => None,
        }
    }

    pub fn current_task(&self) -> Option<&Task> {
        match self.current {
            Some(CurrentTask::Queued(i)) => self.tasks.get(i),
            Some(CurrentTask::Transient(ref task)) => Some(task),
            None => None,
        }
    }

    pub fn current_task_mut(&mut self) -> Option<&mut Task> {
        match self.current {
            Some(CurrentTask::Queued(i)) => self.tasks.get_mut(i),
            Some(CurrentTask::Transient(ref mut task)) => Some(task),
            None => None,
        }
    }

    /// The task the executor should be working: the override if one is
    /// installed, otherwise the current task.
    pub fn get_current_task(&self) -> Option<&Task> {
        self.override_task.as_ref().or_else(|| self.current_task())
    }

    pub fn get_current_task_mut(&mut self) -> Option<&mut Task> {
        if self.override_task.is_some() {
            self.override_task.as_mut()
        } else {
            self.current_task_mut()
        }
    }

    /// Apply a parsed command. List edits take effect immediately; pending
    /// commands wait in the mailbox for the next advancement.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::ReplaceTask(tasks) => {
                self.clear_tasks();
                self.add_tasks(tasks, false);
                self.set_pending(PendingCommand::NextTask);
            }
            Command::AppendTask(tasks) => self.add_tasks(tasks, false),
            Command::PrependTask(tasks) => self.add_tasks(tasks, true),
            Command::ClearTasks => self.clear_tasks(),
            Command::Pending(pending) => self.set_pending(pending),
            Command::Override(task) => self.set_override(task),
        }
    }

    /// Empty the task list and forget the current and saved pointers.
    pub fn clear_tasks(&mut self) {
        self.tasks.clear();
        self.current = None;
        self.saved = None;
    }

    fn add_tasks(&mut self, new_tasks: Vec<Task>, prepend: bool) {
        if new_tasks.is_empty() {
            tracing::warn!("Task spec expanded to no tasks; nothing added");
            return;
        }
        if prepend {
            // Queued pointers identify tasks by index, so they shift with the
            // prefix to keep naming the same elements.
            let shift = new_tasks.len();
            if let Some(CurrentTask::Queued(i)) = &mut self.current {
                *i += shift;
            }
            if let Some(CurrentTask::Queued(i)) = &mut self.saved {
                *i += shift;
            }
            self.tasks.splice(0..0, new_tasks);
        } else {
            self.tasks.extend(new_tasks);
        }
        tracing::info!("Task list now has {} tasks", self.tasks.len());
    }

    /// Install a transient override task and queue its activation.
    pub fn set_override(&mut self, task: Task) {
        self.override_task = Some(task);
        self.set_pending(PendingCommand::DoOverride);
    }

    /// The task-advancement policy, consumed by the NextTask state.
    ///
    /// `vehicle` is the current vehicle position, used to synthesize the
    /// end-of-list hover; with no fix the synthesis is skipped and the
    /// current task stays absent.
    pub fn next_task(&mut self, vehicle: Option<GeoPoint>) {
        tracing::info!("next_task: pending command {:?}", self.pending);

        // Engaging an override: snapshot where we were and leave the
        // override installed for the state machine to route to.
        if self.pending == Some(PendingCommand::DoOverride) {
            if let Some(Task::MissionPlan(plan)) = self.current_task_mut() {
                plan.current_path = None;
            }
            self.saved = self.current.clone();
            self.pending = None;
            return;
        }

        // Dismissing an override: restore the snapshot.
        if self.override_task.is_some() {
            self.current = self.saved.take();
            if self.current.is_none() && !self.tasks.is_empty() {
                self.current = Some(CurrentTask::Queued(0));
            }
            self.override_task = None;
            if self.pending == Some(PendingCommand::NextTask) {
                self.pending = None;
                return;
            }
        }

        if self.pending == Some(PendingCommand::RestartMission) && !self.tasks.is_empty() {
            for task in &mut self.tasks {
                if let Task::MissionPlan(plan) = task {
                    plan.reset_progress();
                }
            }
            self.current = Some(CurrentTask::Queued(0));
        }

        if matches!(
            self.pending,
            Some(PendingCommand::NextTask | PendingCommand::PrevTask)
        ) && !self.tasks.is_empty()
        {
            let forward = self.pending == Some(PendingCommand::NextTask);
            self.current = match self.current.take() {
                None => {
                    let start = if forward { 0 } else { self.tasks.len() - 1 };
                    Some(CurrentTask::Queued(start))
                }
                Some(CurrentTask::Queued(i)) => {
                    let stepped = if forward {
                        i.checked_add(1).filter(|&n| n < self.tasks.len())
                    } else {
                        i.checked_sub(1)
                    };
                    stepped.map(CurrentTask::Queued)
                }
                // A synthesized task has no index to step from.
                Some(CurrentTask::Transient(_)) => None,
            };
            if self.current.is_none() {
                self.current = match self.config.done_behavior {
                    DoneBehavior::Restart => Some(CurrentTask::Queued(0)),
                    DoneBehavior::Hover => vehicle.map(|position| {
                        CurrentTask::Transient(Task::Hover(HoverTask {
                            target: position,
                            path: None,
                            speed: self.config.default_speed_mps,
                        }))
                    }),
                };
            }
            if let Some(Task::MissionPlan(plan)) = self.current_task_mut() {
                plan.reset_progress();
            }
        }

        match self.pending {
            Some(PendingCommand::GotoLine(n)) | Some(PendingCommand::StartLine(n)) => {
                let start_line = matches!(self.pending, Some(PendingCommand::StartLine(_)));
                if let Some(Task::MissionPlan(plan)) = self.current_task_mut() {
                    if n < plan.nav_objectives.len() {
                        plan.current_index = Some(n);
                        plan.invalidate_paths();
                        plan.do_transit = start_line;
                    } else {
                        tracing::error!(
                            "Objective index {} out of range for plan with {} objectives",
                            n,
                            plan.nav_objectives.len()
                        );
                    }
                }
            }
            Some(PendingCommand::GotoTask(n)) => {
                tracing::debug!("goto_task {} has no advancement effect", n);
            }
            _ => {}
        }

        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse;
    use crate::models::{GeoPose, MissionPlanTask, NavObjective};

    fn goto_task(lat: f64, lon: f64) -> Task {
        match parse(&format!("append_task goto {} {}", lat, lon), 2.0).unwrap() {
            Command::AppendTask(mut tasks) => tasks.remove(0),
            _ => unreachable!(),
        }
    }

    fn plan_task(objectives: usize) -> Task {
        Task::MissionPlan(MissionPlanTask {
            label: "plan".to_string(),
            default_speed: 2.0,
            do_transit: true,
            nav_objectives: (0..objectives)
                .map(|i| NavObjective::TrackLine {
                    waypoints: vec![
                        GeoPoint::new(43.0 + i as f64 * 0.01, -70.0),
                        GeoPoint::new(43.0 + i as f64 * 0.01, -69.99),
                    ],
                })
                .collect(),
            current_index: None,
            current_path: None,
            transit_path: None,
        })
    }

    fn state() -> MissionState {
        MissionState::new(MissionConfig::default())
    }

    #[test]
    fn test_next_task_enters_list_from_either_end() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![
            goto_task(43.0, -70.0),
            goto_task(43.1, -70.1),
        ]));

        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));
        assert!(!core.has_pending());

        let mut core = state();
        core.apply(Command::AppendTask(vec![
            goto_task(43.0, -70.0),
            goto_task(43.1, -70.1),
        ]));
        core.set_pending(PendingCommand::PrevTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(1));
    }

    #[test]
    fn test_append_prev_next_round_trip_on_single_task() {
        let mut core = state();
        core.config.done_behavior = DoneBehavior::Restart;
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0)]));

        core.set_pending(PendingCommand::PrevTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));

        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));
    }

    #[test]
    fn test_tail_advance_with_hover_behavior_synthesizes_outside_list() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0)]));
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));

        let here = GeoPoint::new(43.05, -70.05);
        core.set_pending(PendingCommand::NextTask);
        core.next_task(Some(here));
        assert_eq!(core.tasks().len(), 1, "synthesized hover must not join the list");
        assert_eq!(core.current_index(), None);
        match core.current_task() {
            Some(Task::Hover(h)) => assert_eq!(h.target, here),
            other => panic!("expected synthesized hover, got {:?}", other),
        }
    }

    #[test]
    fn test_tail_advance_without_fix_leaves_no_current() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0)]));
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        assert!(core.current_task().is_none());
    }

    #[test]
    fn test_tail_advance_with_restart_behavior_wraps() {
        let mut core = state();
        core.config.done_behavior = DoneBehavior::Restart;
        core.apply(Command::AppendTask(vec![
            goto_task(43.0, -70.0),
            goto_task(43.1, -70.1),
        ]));
        core.set_pending(PendingCommand::PrevTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(1));
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));
    }

    #[test]
    fn test_override_snapshots_and_restores_current() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![plan_task(4)]));
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        if let Some(Task::MissionPlan(plan)) = core.current_task_mut() {
            plan.current_index = Some(2);
            plan.current_path = Some(vec![GeoPose::new(43.0, -70.0, None)]);
        }

        match parse("override hover 43.2 -70.2", 2.0).unwrap() {
            cmd @ Command::Override(_) => core.apply(cmd),
            _ => unreachable!(),
        }
        assert!(core.has_pending());
        core.next_task(None);

        // Snapshot taken, override still engaged, plan path invalidated.
        assert_eq!(core.saved_task(), Some(&CurrentTask::Queued(0)));
        assert!(matches!(core.get_current_task(), Some(Task::Hover(_))));
        match core.current_task() {
            Some(Task::MissionPlan(plan)) => {
                assert!(plan.current_path.is_none());
                assert_eq!(plan.current_index, Some(2), "progress survives the override");
            }
            other => panic!("expected mission plan, got {:?}", other),
        }

        // Dismissal restores the plan at the same objective.
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        assert!(core.override_task().is_none());
        assert!(!core.has_pending());
        assert_eq!(core.current_index(), Some(0));
        match core.current_task() {
            Some(Task::MissionPlan(plan)) => assert_eq!(plan.current_index, Some(2)),
            other => panic!("expected mission plan, got {:?}", other),
        }
    }

    #[test]
    fn test_override_with_no_current_restores_head_of_list() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0)]));
        core.apply(Command::Override(goto_task(43.5, -70.5)));
        core.next_task(None);
        assert_eq!(core.saved_task(), None);

        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        assert!(core.override_task().is_none());
        assert_eq!(core.current_index(), Some(0));
    }

    #[test]
    fn test_restart_mission_resets_every_plan() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0), plan_task(4)]));
        core.set_pending(PendingCommand::PrevTask);
        core.next_task(None);
        if let Some(Task::MissionPlan(plan)) = core.current_task_mut() {
            plan.current_index = Some(3);
            plan.current_path = Some(vec![]);
        }

        core.set_pending(PendingCommand::RestartMission);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));
        for task in core.tasks() {
            if let Task::MissionPlan(plan) = task {
                assert_eq!(plan.current_index, None);
                assert!(plan.current_path.is_none());
            }
        }
    }

    #[test]
    fn test_goto_line_and_start_line_set_transit_flag() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![plan_task(3)]));
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);

        core.set_pending(PendingCommand::GotoLine(1));
        core.next_task(None);
        match core.current_task() {
            Some(Task::MissionPlan(plan)) => {
                assert_eq!(plan.current_index, Some(1));
                assert!(!plan.do_transit);
            }
            other => panic!("expected mission plan, got {:?}", other),
        }

        core.set_pending(PendingCommand::StartLine(2));
        core.next_task(None);
        match core.current_task() {
            Some(Task::MissionPlan(plan)) => {
                assert_eq!(plan.current_index, Some(2));
                assert!(plan.do_transit);
            }
            other => panic!("expected mission plan, got {:?}", other),
        }
    }

    #[test]
    fn test_goto_line_out_of_range_leaves_plan_unchanged() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![plan_task(3)]));
        core.set_pending(PendingCommand::StartLine(1));
        core.next_task(None);

        core.set_pending(PendingCommand::GotoLine(7));
        core.next_task(None);
        match core.current_task() {
            Some(Task::MissionPlan(plan)) => {
                assert_eq!(plan.current_index, Some(1));
                assert!(plan.do_transit);
            }
            other => panic!("expected mission plan, got {:?}", other),
        }
        assert!(!core.has_pending());
    }

    #[test]
    fn test_goto_task_is_consumed_without_effect() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0)]));
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);

        core.set_pending(PendingCommand::GotoTask(5));
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));
        assert!(!core.has_pending());
    }

    #[test]
    fn test_clear_tasks_drops_current_and_saved() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0)]));
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        core.apply(Command::Override(goto_task(43.5, -70.5)));
        core.next_task(None);
        assert!(core.saved_task().is_some());

        core.apply(Command::ClearTasks);
        assert!(core.tasks().is_empty());
        assert!(core.current_task().is_none());
        assert!(core.saved_task().is_none());

        // A second clear is indistinguishable from one.
        core.apply(Command::ClearTasks);
        assert!(core.tasks().is_empty());
        assert!(core.current_task().is_none());
        assert!(core.saved_task().is_none());
    }

    #[test]
    fn test_replace_task_queues_an_advancement() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0)]));
        core.apply(Command::ReplaceTask(vec![goto_task(44.0, -71.0)]));
        assert_eq!(core.tasks().len(), 1);
        assert_eq!(core.pending(), Some(PendingCommand::NextTask));
        core.next_task(None);
        assert_eq!(core.current_index(), Some(0));
        assert_eq!(core.current_task().and_then(Task::target), Some(GeoPoint::new(44.0, -71.0)));
    }

    #[test]
    fn test_prepend_shifts_current_and_saved_indices() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![
            goto_task(43.0, -70.0),
            goto_task(43.1, -70.1),
        ]));
        core.set_pending(PendingCommand::PrevTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(1));
        let before = core.current_task().cloned();

        core.apply(Command::PrependTask(vec![goto_task(42.0, -69.0)]));
        assert_eq!(core.current_index(), Some(2));
        assert_eq!(core.current_task().cloned(), before);
    }

    #[test]
    fn test_pending_writes_are_last_writer_wins() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![goto_task(43.0, -70.0), goto_task(43.1, -70.1)]));
        core.set_pending(PendingCommand::NextTask);
        core.set_pending(PendingCommand::PrevTask);
        core.next_task(None);
        assert_eq!(core.current_index(), Some(1));
    }

    #[test]
    fn test_advancing_onto_a_plan_resets_its_progress() {
        let mut core = state();
        core.apply(Command::AppendTask(vec![plan_task(2)]));
        if let Task::MissionPlan(plan) = &mut core.tasks[0] {
            plan.current_index = Some(1);
            plan.current_path = Some(vec![]);
        }
        core.set_pending(PendingCommand::NextTask);
        core.next_task(None);
        match core.current_task() {
            Some(Task::MissionPlan(plan)) => {
                assert_eq!(plan.current_index, None);
                assert!(plan.current_path.is_none());
            }
            other => panic!("expected mission plan, got {:?}", other),
        }
    }
}
