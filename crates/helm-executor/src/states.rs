//! The executor state machine.
//!
//! An explicit state enum with one tick routine per state, each returning an
//! [`Outcome`]; a transition table routes the pair to the next state. States
//! that drive a backend poll their goal handle inside the iterate loop, so
//! cancellation is a plain return path rather than a callback dance.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;

use helm_core::command::{self, PendingCommand};
use helm_core::mission::{MissionState, PlannerKind};
use helm_core::models::{GeoPoint, GeoPose, NavObjective, PathKind, PilotingMode, Task};
use helm_core::spatial;

use crate::backends::{GeoPoseStamped, HoverGoal, MotionBackends, PathGoal, SurveyAreaGoal};
use crate::config::Config;
use crate::nav::Navigation;
use crate::path::PathBuilder;
use crate::status::{EndOfLine, StatusPublisher};

/// One cooperative scheduling tick.
const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// How long a motion state waits for its backend server.
const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pause,
    Idle,
    NextTask,
    MissionPlan,
    Goto,
    Hover,
    FollowPath,
    LineEnded,
    SurveyArea,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Pause => "Pause",
            State::Idle => "Idle",
            State::NextTask => "NextTask",
            State::MissionPlan => "MissionPlan",
            State::Goto => "Goto",
            State::Hover => "Hover",
            State::FollowPath => "FollowPath",
            State::LineEnded => "LineEnded",
            State::SurveyArea => "SurveyArea",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Resume,
    Exit,
    Pause,
    DoTask,
    Idle,
    Goto,
    Hover,
    MissionPlan,
    FollowPath,
    SurveyArea,
    Done,
    Cancelled,
    NextItem,
}

/// Route a state's outcome to the next state; `None` halts the machine.
pub fn transition(state: State, outcome: Outcome) -> Option<State> {
    use Outcome::*;
    use State as S;
    let next = match (state, outcome) {
        (S::Pause, Resume) => S::Idle,
        (S::Idle, DoTask) => S::NextTask,
        (S::NextTask, Idle) => S::Idle,
        (S::NextTask, MissionPlan) => S::MissionPlan,
        (S::NextTask, Goto) => S::Goto,
        (S::NextTask, Hover) => S::Hover,
        (S::MissionPlan, FollowPath) => S::FollowPath,
        (S::MissionPlan, SurveyArea) => S::SurveyArea,
        (S::MissionPlan, Done) => S::NextTask,
        (S::Goto, FollowPath) => S::FollowPath,
        (S::Goto, Done | Cancelled) => S::NextTask,
        (S::Hover, FollowPath) => S::FollowPath,
        (S::Hover, Cancelled) => S::NextTask,
        (S::FollowPath, Done) => S::LineEnded,
        (S::FollowPath, Hover) => S::Hover,
        (S::FollowPath, Cancelled) => S::NextTask,
        (S::LineEnded, MissionPlan) => S::MissionPlan,
        (S::LineEnded, NextItem) => S::NextTask,
        (S::SurveyArea, Done | Cancelled) => S::NextTask,
        (_, Pause) => S::Pause,
        (_, Exit) => return None,
        (state, outcome) => {
            tracing::error!("No transition from {:?} on {:?}; idling", state, outcome);
            S::Idle
        }
    };
    Some(next)
}

pub struct Executor {
    core: MissionState,
    nav: Navigation,
    paths: PathBuilder,
    backends: MotionBackends,
    publisher: StatusPublisher,
    command_rx: mpsc::Receiver<String>,
    mode_rx: mpsc::Receiver<String>,
    shutdown: broadcast::Receiver<()>,
    shutting_down: bool,
}

enum PlanStep {
    NoTask,
    PastEnd,
    Survey,
    Follow,
    BuildPath {
        waypoints: Vec<GeoPoint>,
        do_transit: bool,
    },
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        nav: Navigation,
        backends: MotionBackends,
        publisher: StatusPublisher,
        command_rx: mpsc::Receiver<String>,
        mode_rx: mpsc::Receiver<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            core: MissionState::new(config.mission()),
            paths: PathBuilder::new(config),
            nav,
            backends,
            publisher,
            command_rx,
            mode_rx,
            shutdown,
            shutting_down: false,
        }
    }

    /// Run the machine until shutdown. Starts in Pause, like the vehicle.
    pub async fn run(mut self) {
        let mut state = State::Pause;
        loop {
            tracing::debug!("Entering state {}", state.name());
            let outcome = match state {
                State::Pause => self.pause_state().await,
                State::Idle => self.idle_state().await,
                State::NextTask => self.next_task_state(),
                State::MissionPlan => self.mission_plan_state().await,
                State::Goto => self.goto_state().await,
                State::Hover => self.hover_state().await,
                State::FollowPath => self.follow_path_state().await,
                State::LineEnded => self.line_ended_state(),
                State::SurveyArea => self.survey_area_state().await,
            };
            match transition(state, outcome) {
                Some(next) => state = next,
                None => break,
            }
        }
        // Leave no goals behind.
        self.backends.cancel_all();
        tracing::info!("Mission executor exiting");
    }

    /// Fold transport traffic into the core. Runs at the top of every tick,
    /// so a command deposited during a backend wait lands on the next tick.
    fn drain_inbound(&mut self) {
        while let Ok(mode) = self.mode_rx.try_recv() {
            let mode = PilotingMode::from(mode.as_str());
            if mode != self.core.piloting_mode {
                tracing::info!("Piloting mode changed to `{}`", mode.as_str());
            }
            self.core.piloting_mode = mode;
        }
        while let Ok(line) = self.command_rx.try_recv() {
            tracing::info!("Received command `{}`", line);
            match command::parse(&line, self.core.config.default_speed_mps) {
                Ok(parsed) => self.core.apply(parsed),
                Err(err) => tracing::error!("Dropping command `{}`: {}", line, err),
            }
        }
    }

    fn is_shutdown(&mut self) -> bool {
        if self.shutting_down {
            return true;
        }
        match self.shutdown.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => false,
            _ => {
                self.shutting_down = true;
                true
            }
        }
    }

    /// The shared per-tick check every active state runs: exit on shutdown,
    /// pause on mode loss, unwind when a command is waiting; otherwise
    /// publish status and sleep out the tick.
    async fn iterate(&mut self, state_name: &str) -> Option<Outcome> {
        self.drain_inbound();
        if self.is_shutdown() {
            tracing::info!("Shutting down; telling state {} to exit", state_name);
            return Some(Outcome::Exit);
        }
        if self.core.piloting_mode != PilotingMode::Autonomous {
            tracing::info!(
                "Piloting mode is `{}`, not `autonomous`; telling state {} to pause",
                self.core.piloting_mode.as_str(),
                state_name
            );
            return Some(Outcome::Pause);
        }
        if self.core.has_pending() {
            tracing::info!(
                "A command is pending; telling state {} to unwind so NextTask can apply it",
                state_name
            );
            return Some(Outcome::Cancelled);
        }
        self.publisher
            .publish(state_name, &self.core, &self.nav, &self.paths)
            .await;
        sleep(TICK_INTERVAL).await;
        None
    }

    fn waypoint_reached(&self, target: GeoPoint) -> bool {
        match self.nav.distance_bearing_to(target.lat_deg, target.lon_deg) {
            Some((distance, _)) => distance < self.core.config.waypoint_threshold_m,
            None => false,
        }
    }

    async fn pause_state(&mut self) -> Outcome {
        loop {
            self.drain_inbound();
            if self.is_shutdown() {
                return Outcome::Exit;
            }
            if self.core.piloting_mode == PilotingMode::Autonomous {
                return Outcome::Resume;
            }
            self.publisher
                .publish("Pause", &self.core, &self.nav, &self.paths)
                .await;
            sleep(TICK_INTERVAL).await;
        }
    }

    async fn idle_state(&mut self) -> Outcome {
        loop {
            match self.iterate("Idle").await {
                Some(Outcome::Cancelled) => return Outcome::DoTask,
                Some(outcome) => return outcome,
                None => {}
            }
            if !self.core.tasks().is_empty() {
                return Outcome::DoTask;
            }
        }
    }

    fn next_task_state(&mut self) -> Outcome {
        self.core.next_task(self.nav.position());
        let task = self
            .core
            .override_task()
            .or_else(|| self.core.current_task());
        match task {
            Some(Task::Goto(_)) => Outcome::Goto,
            Some(Task::Hover(_)) => Outcome::Hover,
            Some(Task::MissionPlan(_)) => Outcome::MissionPlan,
            None => Outcome::Idle,
        }
    }

    async fn goto_state(&mut self) -> Outcome {
        let Some(target) = self.core.get_current_task().and_then(Task::target) else {
            tracing::error!("Goto entered without a point target; skipping");
            return Outcome::Done;
        };
        if self.waypoint_reached(target) {
            self.core.set_pending(PendingCommand::NextTask);
            return Outcome::Done;
        }

        let heading_to_point = self
            .nav
            .distance_bearing_to(target.lat_deg, target.lon_deg)
            .map(|(_, bearing)| bearing);
        let path = match heading_to_point {
            Some(heading) => {
                self.paths
                    .generate_path_from_vehicle(
                        &self.nav,
                        GeoPose::new(target.lat_deg, target.lon_deg, Some(heading)),
                    )
                    .await
            }
            None => Vec::new(),
        };
        if path.is_empty() {
            // Nothing to follow is a completed transit: advance instead of
            // spinning here until a service comes back.
            self.core.set_pending(PendingCommand::NextTask);
            return Outcome::Done;
        }

        let speed = self.core.config.default_speed_mps;
        if let Some(Task::Goto(goto)) = self.core.get_current_task_mut() {
            goto.path = Some(path);
            goto.path_kind = Some(PathKind::Transit);
            goto.speed = speed;
        }
        Outcome::FollowPath
    }

    async fn hover_state(&mut self) -> Outcome {
        let Some(target) = self.core.get_current_task().and_then(Task::target) else {
            tracing::error!("Hover entered without a point target; unwinding");
            return Outcome::Cancelled;
        };

        // Far from the hover point the task behaves like a goto: line up a
        // transit path and let FollowPath close the distance.
        if !self.waypoint_reached(target) {
            if let Some((_, bearing)) =
                self.nav.distance_bearing_to(target.lat_deg, target.lon_deg)
            {
                let path = self
                    .paths
                    .generate_path_from_vehicle(
                        &self.nav,
                        GeoPose::new(target.lat_deg, target.lon_deg, Some(bearing)),
                    )
                    .await;
                if path.len() > 1 {
                    let speed = self.core.config.default_speed_mps;
                    if let Some(Task::Hover(hover)) = self.core.get_current_task_mut() {
                        hover.path = Some(path);
                        hover.speed = speed;
                    }
                    return Outcome::FollowPath;
                }
            }
        }

        if !self
            .backends
            .hover
            .wait_for_server(BACKEND_CONNECT_TIMEOUT)
            .await
        {
            tracing::error!(
                "Connection to hover action server timed out after {:?}",
                BACKEND_CONNECT_TIMEOUT
            );
            return Outcome::Cancelled;
        }
        let mut handle = self.backends.hover.send_goal(HoverGoal { target });
        loop {
            if let Some(outcome) = self.iterate("Hover").await {
                handle.cancel();
                return outcome;
            }
            while let Some(feedback) = handle.try_feedback() {
                tracing::debug!(
                    "hover feedback: range {:.2} m, bearing {:.2} deg, speed {:.2} m/s",
                    feedback.range_m,
                    feedback.bearing_deg,
                    feedback.speed_mps
                );
            }
        }
    }

    async fn mission_plan_state(&mut self) -> Outcome {
        let step = match self.core.current_task_mut() {
            Some(Task::MissionPlan(plan)) => {
                let index = *plan.current_index.get_or_insert(0);
                if index >= plan.nav_objectives.len() {
                    plan.current_index = None;
                    PlanStep::PastEnd
                } else {
                    match &plan.nav_objectives[index] {
                        NavObjective::SurveyArea { .. } => PlanStep::Survey,
                        NavObjective::TrackLine { waypoints } => {
                            if plan.current_path.is_none() {
                                PlanStep::BuildPath {
                                    waypoints: waypoints.clone(),
                                    do_transit: plan.do_transit,
                                }
                            } else {
                                PlanStep::Follow
                            }
                        }
                    }
                }
            }
            _ => PlanStep::NoTask,
        };

        match step {
            PlanStep::NoTask => Outcome::Done,
            PlanStep::PastEnd => {
                self.core.set_pending(PendingCommand::NextTask);
                Outcome::Done
            }
            PlanStep::Survey => Outcome::SurveyArea,
            PlanStep::Follow => Outcome::FollowPath,
            PlanStep::BuildPath {
                waypoints,
                do_transit,
            } => {
                let (current_path, transit_path) =
                    self.build_objective_paths(&waypoints, do_transit).await;
                let multi_point = current_path.len() > 1;
                if let Some(Task::MissionPlan(plan)) = self.core.current_task_mut() {
                    plan.current_path = Some(current_path);
                    plan.transit_path = transit_path;
                    if multi_point {
                        plan.do_transit = true;
                    }
                }
                Outcome::FollowPath
            }
        }
    }

    /// Lift a trackline into poses and, when warranted, a line-up path from
    /// the vehicle onto the start of the line.
    async fn build_objective_paths(
        &self,
        waypoints: &[GeoPoint],
        do_transit: bool,
    ) -> (Vec<GeoPose>, Option<Vec<GeoPose>>) {
        let current_path: Vec<GeoPose> =
            waypoints.iter().copied().map(GeoPose::from_point).collect();
        let mut transit_path = None;

        if let [first, second, ..] = waypoints {
            let far_from_start = self
                .nav
                .distance_bearing_to(first.lat_deg, first.lon_deg)
                .map(|(distance, _)| distance > self.core.config.waypoint_threshold_m)
                .unwrap_or(false);
            if do_transit && far_from_start && self.core.config.planner == PlannerKind::Follower {
                let (_, segment_heading) = spatial::distance_bearing_deg(
                    first.lat_deg,
                    first.lon_deg,
                    second.lat_deg,
                    second.lon_deg,
                );
                // Pre-roll point behind the line start, tangent to the line.
                let (lineup_lat, lineup_lon) = spatial::direct(
                    first.lat_deg,
                    first.lon_deg,
                    segment_heading + 180.0,
                    self.core.config.lineup_distance_m,
                );
                let mut approach = self
                    .paths
                    .generate_path_from_vehicle(
                        &self.nav,
                        GeoPose::new(lineup_lat, lineup_lon, Some(segment_heading)),
                    )
                    .await;
                approach.push(current_path[0]);
                transit_path = Some(approach);
            }
        }

        (current_path, transit_path)
    }

    async fn follow_path_state(&mut self) -> Outcome {
        let Some(task) = self.core.get_current_task() else {
            tracing::error!("FollowPath entered with no current task; unwinding");
            return Outcome::Cancelled;
        };
        let hover_target = match task {
            Task::Hover(hover) => Some(hover.target),
            _ => None,
        };
        let speed = task.speed();
        let path = match task {
            Task::Goto(goto) => goto.path.clone(),
            Task::Hover(hover) => hover.path.clone(),
            Task::MissionPlan(plan) => {
                plan.transit_path.clone().or_else(|| plan.current_path.clone())
            }
        };
        let Some(path) = path else {
            tracing::error!("FollowPath entered with no path to follow; unwinding");
            return Outcome::Cancelled;
        };

        let stamp = Utc::now();
        let goal = PathGoal {
            poses: path
                .into_iter()
                .map(|pose| GeoPoseStamped { stamp, pose })
                .collect(),
            speed,
        };

        let mut handle = {
            let (active, other) = match self.core.config.planner {
                PlannerKind::Follower => (&self.backends.path_follower, &self.backends.path_planner),
                PlannerKind::Planner => (&self.backends.path_planner, &self.backends.path_follower),
            };
            // Only one path backend may hold a goal at a time.
            other.cancel_goal();
            if !active.wait_for_server(BACKEND_CONNECT_TIMEOUT).await {
                tracing::error!(
                    "Connection to {} action server timed out after {:?}",
                    active.name(),
                    BACKEND_CONNECT_TIMEOUT
                );
                return Outcome::Cancelled;
            }
            active.send_goal(goal)
        };

        loop {
            if let Some(outcome) = self.iterate("FollowPath").await {
                handle.cancel();
                return outcome;
            }
            if let Some(status) = handle.try_result() {
                tracing::info!("follower action done with status {:?}", status);
                if hover_target.is_some() {
                    return Outcome::Hover;
                }
                return Outcome::Done;
            }
            if let Some(target) = hover_target {
                if self.waypoint_reached(target) {
                    handle.cancel();
                    return Outcome::Hover;
                }
            }
            while let Some(feedback) = handle.try_feedback() {
                tracing::debug!(
                    "follower feedback: {:.1} m remaining",
                    feedback.distance_remaining_m
                );
            }
        }
    }

    fn line_ended_state(&mut self) -> Outcome {
        let boundary = match self.core.get_current_task_mut() {
            Some(Task::MissionPlan(plan)) => {
                if plan.transit_path.is_some() {
                    plan.transit_path = None;
                    Some(EndOfLine::Transit)
                } else {
                    plan.current_path = None;
                    if let Some(index) = plan.current_index.as_mut() {
                        *index += 1;
                    }
                    Some(EndOfLine::Track)
                }
            }
            _ => None,
        };
        match boundary {
            Some(boundary) => {
                self.publisher.publish_end_of_line(boundary);
                Outcome::MissionPlan
            }
            None => {
                self.core.set_pending(PendingCommand::NextTask);
                Outcome::NextItem
            }
        }
    }

    async fn survey_area_state(&mut self) -> Outcome {
        let goal = {
            let Some(Task::MissionPlan(plan)) = self.core.current_task() else {
                tracing::error!("SurveyArea entered without a mission plan; unwinding");
                return Outcome::Cancelled;
            };
            let Some(NavObjective::SurveyArea { boundary }) = plan.current_objective() else {
                tracing::error!("SurveyArea entered without a survey objective; unwinding");
                return Outcome::Cancelled;
            };
            SurveyAreaGoal {
                area: boundary.clone(),
                speed: plan.default_speed,
            }
        };

        let mut handle = {
            let client = &self.backends.survey_area;
            if !client.wait_for_server(BACKEND_CONNECT_TIMEOUT).await {
                tracing::error!(
                    "Connection to survey_area action server timed out after {:?}",
                    BACKEND_CONNECT_TIMEOUT
                );
                return Outcome::Cancelled;
            }
            client.send_goal(goal)
        };

        loop {
            if let Some(outcome) = self.iterate("SurveyArea").await {
                handle.cancel();
                return outcome;
            }
            if let Some(status) = handle.try_result() {
                tracing::info!("survey_area action done with status {:?}", status);
                return Outcome::Done;
            }
            while let Some(feedback) = handle.try_feedback() {
                tracing::debug!("survey feedback: {:.0}% complete", feedback.percent_complete);
            }
        }
    }
}
