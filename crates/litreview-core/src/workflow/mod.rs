//! Workflow engine: stage graph, checkpointing, and the interrupt/resume
//! protocol.
//!
//! The engine is a cursor-driven state machine rather than a suspended
//! coroutine: every stage boundary persists `{thread_id, stage_just_completed,
//! next_stages, state}`, so a resume can happen from a different process.
//! The single interrupt sits between Retriever and Extractor, where the
//! caller collects the user's approval decisions.

pub mod checkpoint;
pub mod state;


use std::time::Instant;

use tokio::sync::broadcast;

use crate::error::WorkflowError;
use crate::schema::{
    ConversationMessage, Draft, Language, MessageRole, Paper, PaperSource,
};
use crate::stages::{self, StageContext};
use checkpoint::{CheckpointStore, Snapshot};
use state::{merge, SessionState, StateUpdate};

/// The five workflow stages, in graph order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planner,
    Retriever,
    Extractor,
    Writer,
    Critic,
}

impl Stage {
    /// Stable name used in checkpoints, logs, and SSE events.
    pub fn name(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Retriever => "retriever",
            Self::Extractor => "extractor",
            Self::Writer => "writer",
            Self::Critic => "critic",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "planner" => Some(Self::Planner),
            "retriever" => Some(Self::Retriever),
            "extractor" => Some(Self::Extractor),
            "writer" => Some(Self::Writer),
            "critic" => Some(Self::Critic),
            _ => None,
        }
    }
}

/// What the engine does after a stage completes.
enum NextAction {
    /// Run this stage immediately.
    Run(Stage),
    /// Persist and return control to the caller; resume runs this stage.
    Interrupt(Stage),
    /// The run is complete.
    End,
}

/// Events published while a run executes, consumed by the SSE route.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// One structured log line from a stage.
    Log {
        thread_id: String,
        node: String,
        log: String,
    },
    /// The current run reached its end (terminal state or interrupt).
    Done { thread_id: String },
    /// The current run failed; state stays at the last good snapshot.
    Failed { thread_id: String, detail: String },
}

/// Result of `start`: the session paused at the approval interrupt.
#[derive(Debug)]
pub struct StartOutcome {
    pub thread_id: String,
    pub candidate_papers: Vec<Paper>,
    pub logs: Vec<String>,
}

/// Result of `approve`: the workflow ran to termination.
#[derive(Debug)]
pub struct ApproveOutcome {
    pub thread_id: String,
    pub final_draft: Option<Draft>,
    pub approved_count: usize,
    pub approved_papers: Vec<Paper>,
    pub new_logs: Vec<String>,
}

/// Result of `continue_session`: the draft was revised.
#[derive(Debug)]
pub struct ContinueOutcome {
    pub thread_id: String,
    pub final_draft: Option<Draft>,
    pub candidate_papers: Vec<Paper>,
    pub assistant_message: ConversationMessage,
    pub new_logs: Vec<String>,
}

/// Result of `status`.
#[derive(Debug, serde::Serialize)]
pub struct StatusReport {
    pub thread_id: String,
    pub next_stages: Vec<String>,
    pub logs: Vec<String>,
    pub has_draft: bool,
    pub candidate_count: usize,
    pub approved_count: usize,
}

/// Summary of one stored session, for listings.
#[derive(Debug, serde::Serialize)]
pub struct SessionSummary {
    pub thread_id: String,
    pub user_query: String,
    pub status: String,
    pub paper_count: usize,
    pub has_draft: bool,
}

/// Full detail of one stored session.
#[derive(Debug, serde::Serialize)]
pub struct SessionDetail {
    pub thread_id: String,
    pub user_query: String,
    pub status: String,
    pub candidate_papers: Vec<Paper>,
    pub approved_papers: Vec<Paper>,
    pub final_draft: Option<Draft>,
    pub logs: Vec<String>,
    pub messages: Vec<ConversationMessage>,
}

/// Capacity of the event fan-out channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The workflow engine. One instance per process, shared by all requests.
pub struct Workflow {
    ctx: StageContext,
    store: CheckpointStore,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Workflow {
    pub fn new(store: CheckpointStore, ctx: StageContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { ctx, store, events }
    }

    /// Subscribe to live workflow events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// The injected stage context (for read-only access to trackers).
    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Start a new session: run Planner and Retriever, then pause at the
    /// approval interrupt.
    pub async fn start(
        &self,
        thread_id: &str,
        query: &str,
        language: Language,
        sources: Vec<PaperSource>,
    ) -> Result<StartOutcome, WorkflowError> {
        let sources = if sources.is_empty() {
            vec![PaperSource::SemanticScholar]
        } else {
            sources
        };

        tracing::info!(thread_id, query, sources = ?sources, "Starting research session");

        let mut state = SessionState::new(
            thread_id,
            query,
            language,
            sources,
            ConversationMessage::now(MessageRole::User, query, "start_research"),
        );

        // Entry router: a fresh session enters at Planner.
        self.run_from(thread_id, &mut state, Stage::Planner).await?;

        Ok(StartOutcome {
            thread_id: thread_id.to_string(),
            candidate_papers: state.candidate_papers,
            logs: state.logs,
        })
    }

    /// Resume a session paused at the approval interrupt: mark the selected
    /// candidates approved and run Extractor through Critic (with the
    /// internal QA retry loop) to termination.
    pub async fn approve(
        &self,
        thread_id: &str,
        paper_ids: &[String],
    ) -> Result<ApproveOutcome, WorkflowError> {
        let snapshot = self.load_snapshot(thread_id).await?;
        if !snapshot
            .next_stages
            .iter()
            .any(|s| s == Stage::Extractor.name())
        {
            return Err(WorkflowError::NotAwaitingApproval {
                thread_id: thread_id.to_string(),
                next: snapshot.next_stages,
            });
        }

        let mut state = snapshot.state;
        let approved_ids: std::collections::HashSet<&str> =
            paper_ids.iter().map(String::as_str).collect();

        let mut approved_count = 0usize;
        for paper in &mut state.candidate_papers {
            if approved_ids.contains(paper.paper_id.as_str()) {
                paper.is_approved = true;
                approved_count += 1;
            }
        }
        if approved_count == 0 {
            return Err(WorkflowError::NoMatchingPapers);
        }

        let existing_log_count = state.logs.len();
        tracing::info!(thread_id, approved_count, "Approved papers, resuming workflow");

        // Persist the approval patch before resuming, so a crash inside
        // Extractor replays with the approvals intact.
        self.store
            .save(
                thread_id,
                snapshot.stage_just_completed.as_deref(),
                &[Stage::Extractor.name().to_string()],
                &state,
            )
            .await?;

        self.run_from(thread_id, &mut state, Stage::Extractor).await?;

        let new_logs = state.logs[existing_log_count..].to_vec();
        let approved_papers: Vec<Paper> = state
            .candidate_papers
            .iter()
            .filter(|p| p.is_approved)
            .cloned()
            .collect();

        Ok(ApproveOutcome {
            thread_id: thread_id.to_string(),
            final_draft: state.final_draft,
            approved_count,
            approved_papers,
            new_logs,
        })
    }

    /// Revise an existing draft from a follow-up message. Requires a draft;
    /// runs the Writer in revision mode and the Critic loop to termination.
    pub async fn continue_session(
        &self,
        thread_id: &str,
        message: &str,
    ) -> Result<ContinueOutcome, WorkflowError> {
        let snapshot = self.load_snapshot(thread_id).await?;
        if snapshot.state.final_draft.is_none() {
            return Err(WorkflowError::NoDraftYet);
        }

        let mut state = snapshot.state;
        let existing_log_count = state.logs.len();

        // Continuation patch: new query, reset QA, append the user turn.
        merge(
            &mut state,
            StateUpdate {
                user_query: Some(message.to_string()),
                is_continuation: Some(true),
                qa_errors: Some(Vec::new()),
                retry_count: Some(0),
                messages: vec![ConversationMessage::now(
                    MessageRole::User,
                    message,
                    "continue_research",
                )],
                ..StateUpdate::default()
            },
        );

        tracing::info!(
            thread_id,
            message = %message.chars().take(100).collect::<String>(),
            "Continuing research session"
        );

        // Entry router: a continuation enters at Writer.
        self.run_from(thread_id, &mut state, Stage::Writer).await?;

        let assistant_message = ConversationMessage {
            role: MessageRole::Assistant,
            content: format!("Updated draft based on: {message}"),
            timestamp: chrono::Utc::now(),
            metadata: Some(serde_json::json!({
                "action": "draft_updated",
                "has_draft": state.final_draft.is_some(),
            })),
        };
        merge(
            &mut state,
            StateUpdate {
                messages: vec![assistant_message.clone()],
                ..StateUpdate::default()
            },
        );
        self.store
            .save(thread_id, Some(Stage::Critic.name()), &[], &state)
            .await?;

        let new_logs = state.logs[existing_log_count..].to_vec();

        Ok(ContinueOutcome {
            thread_id: thread_id.to_string(),
            final_draft: state.final_draft,
            candidate_papers: state.candidate_papers,
            assistant_message,
            new_logs,
        })
    }

    /// Re-enter a session at its stored cursor after a crash or a failed
    /// stage. A session waiting at the approval interrupt (cursor at
    /// Extractor with no approvals marked) is left untouched; a terminal
    /// session is a no-op. Returns the status after the run.
    pub async fn resume_run(&self, thread_id: &str) -> Result<StatusReport, WorkflowError> {
        let snapshot = self.load_snapshot(thread_id).await?;
        let Some(stage) = snapshot
            .next_stages
            .first()
            .and_then(|name| Stage::from_name(name))
        else {
            return Ok(Self::report_from(&snapshot));
        };

        let mut state = snapshot.state;
        if stage == Stage::Extractor && state.approved_candidates().is_empty() {
            // Still waiting for the user's approval patch.
            return self.status(thread_id).await;
        }

        tracing::info!(thread_id, stage = stage.name(), "Resuming session at stored cursor");
        self.run_from(thread_id, &mut state, stage).await?;
        self.status(thread_id).await
    }

    /// Report the stored status of a session.
    pub async fn status(&self, thread_id: &str) -> Result<StatusReport, WorkflowError> {
        let snapshot = self.load_snapshot(thread_id).await?;
        Ok(Self::report_from(&snapshot))
    }

    /// Summaries of stored sessions, most recently updated first.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, WorkflowError> {
        let snapshots = self.store.list(limit).await?;
        Ok(snapshots
            .iter()
            .filter(|s| !s.state.user_query.is_empty())
            .map(|s| {
                let approved = s.state.approved_candidates().len();
                let has_draft = s.state.final_draft.is_some();
                let status = if has_draft {
                    "completed"
                } else if approved > 0 {
                    "in_progress"
                } else {
                    "pending"
                };
                SessionSummary {
                    thread_id: s.thread_id.clone(),
                    user_query: s.state.user_query.clone(),
                    status: status.to_string(),
                    paper_count: approved,
                    has_draft,
                }
            })
            .collect())
    }

    /// Full stored detail of one session.
    pub async fn session_detail(&self, thread_id: &str) -> Result<SessionDetail, WorkflowError> {
        let snapshot = self.load_snapshot(thread_id).await?;
        let state = snapshot.state;
        let approved: Vec<Paper> = state
            .candidate_papers
            .iter()
            .filter(|p| p.is_approved)
            .cloned()
            .collect();
        let status = if !snapshot.next_stages.is_empty() {
            "in_progress"
        } else if state.final_draft.is_some() {
            "completed"
        } else {
            "pending"
        };

        Ok(SessionDetail {
            thread_id: snapshot.thread_id,
            user_query: state.user_query,
            status: status.to_string(),
            candidate_papers: state.candidate_papers,
            approved_papers: approved,
            final_draft: state.final_draft,
            logs: state.logs,
            messages: state.messages,
        })
    }

    async fn load_snapshot(&self, thread_id: &str) -> Result<Snapshot, WorkflowError> {
        self.store
            .load(thread_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownThread {
                thread_id: thread_id.to_string(),
            })
    }

    fn report_from(snapshot: &Snapshot) -> StatusReport {
        StatusReport {
            thread_id: snapshot.thread_id.clone(),
            next_stages: snapshot.next_stages.clone(),
            logs: snapshot.state.logs.clone(),
            has_draft: snapshot.state.final_draft.is_some(),
            candidate_count: snapshot.state.candidate_papers.len(),
            approved_count: snapshot.state.approved_candidates().len(),
        }
    }

    /// Drive stages from `first` until an interrupt or the end of the graph,
    /// checkpointing at every boundary.
    async fn run_from(
        &self,
        thread_id: &str,
        state: &mut SessionState,
        first: Stage,
    ) -> Result<(), WorkflowError> {
        let mut stage = first;
        loop {
            let update = match self.execute_stage(stage, state).await {
                Ok(update) => update,
                Err(e) => {
                    // Fatal to this run; leave the cursor at the failed
                    // stage so the client can re-invoke resume.
                    let detail = e.to_string();
                    state.logs.push(format!("{} failed: {detail}", stage.name()));
                    let _ = self
                        .store
                        .save(
                            thread_id,
                            None,
                            &[stage.name().to_string()],
                            state,
                        )
                        .await;
                    self.emit(WorkflowEvent::Failed {
                        thread_id: thread_id.to_string(),
                        detail,
                    });
                    return Err(e);
                }
            };

            let new_logs = update.logs.clone();
            merge(state, update);

            let next = Self::next_after(stage, state, self.ctx.limits.max_retry_count);
            let next_stages: Vec<String> = match &next {
                NextAction::Run(s) | NextAction::Interrupt(s) => vec![s.name().to_string()],
                NextAction::End => Vec::new(),
            };
            self.store
                .save(thread_id, Some(stage.name()), &next_stages, state)
                .await?;

            for log in new_logs {
                self.emit(WorkflowEvent::Log {
                    thread_id: thread_id.to_string(),
                    node: stage.name().to_string(),
                    log,
                });
            }

            match next {
                NextAction::Run(next_stage) => stage = next_stage,
                NextAction::Interrupt(_) | NextAction::End => {
                    self.emit(WorkflowEvent::Done {
                        thread_id: thread_id.to_string(),
                    });
                    return Ok(());
                }
            }
        }
    }

    /// Execute one stage with wall-clock timing.
    async fn execute_stage(
        &self,
        stage: Stage,
        state: &SessionState,
    ) -> Result<StateUpdate, WorkflowError> {
        let start = Instant::now();
        let result = match stage {
            Stage::Planner => stages::planner::execute(&self.ctx, state).await,
            Stage::Retriever => stages::retriever::execute(&self.ctx, state).await,
            Stage::Extractor => stages::extractor::execute(&self.ctx, state).await,
            Stage::Writer => stages::writer::execute(&self.ctx, state).await,
            Stage::Critic => stages::critic::execute(&self.ctx, state).await,
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.ctx.costs.record_stage_latency(stage.name(), elapsed_ms);
        tracing::info!(stage = stage.name(), elapsed_ms, "stage completed");
        result
    }

    /// The graph's edges. The QA loop re-enters the Writer while errors
    /// remain and the retry budget allows.
    fn next_after(stage: Stage, state: &SessionState, max_retry_count: u32) -> NextAction {
        match stage {
            Stage::Planner => NextAction::Run(Stage::Retriever),
            Stage::Retriever => NextAction::Interrupt(Stage::Extractor),
            Stage::Extractor => NextAction::Run(Stage::Writer),
            Stage::Writer => NextAction::Run(Stage::Critic),
            Stage::Critic => {
                if state.qa_errors.is_empty() {
                    NextAction::End
                } else if state.retry_count < max_retry_count {
                    NextAction::Run(Stage::Writer)
                } else {
                    NextAction::End
                }
            }
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        // Nobody listening is fine; streaming is best-effort.
        let _ = self.events.send(event);
    }
}
