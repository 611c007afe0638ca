//! The fix loop: classify an error, try a local fix, ask the model, apply
//! the answer and wait for the collaborator's verdict.

mod classify;
mod imports;
mod local;
mod prompt;
mod question;


pub use classify::classify_error;
pub use local::RuleBasedFixer;
pub use prompt::FIX_ERROR_SYSTEM;
pub use question::is_asking_question;

use crate::apply::{merge_edit_set, MergeResult};
use crate::decode::{decode_any, Decoder};
use crate::sanitize::{looks_like_code, strip_code_fences};
use crate::util::truncate_for_error;
use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use mender_core::ignore::normalize_path;
use mender_core::{
    AgentAttempt, EditSet, ErrorClassification, FileSnapshot, FileStore, FixCompletion, FixEvent,
    FixLoopSettings, FixRequest, FixState, LocalFixer, LogEntry, LogLevel, MarkerDecoder,
    ModelClient,
};
use prompt::{build_fix_prompt, PromptInput};
use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Collaborators a fix session calls out to.
#[derive(Clone)]
pub struct FixDeps {
    pub model: Arc<dyn ModelClient>,
    pub store: Arc<dyn FileStore>,
    pub local_fixer: Option<Arc<dyn LocalFixer>>,
    pub marker: Option<Arc<dyn MarkerDecoder>>,
    pub decoder: Decoder,
}

impl FixDeps {
    pub fn new(model: Arc<dyn ModelClient>, store: Arc<dyn FileStore>) -> Self {
        Self {
            model,
            store,
            local_fixer: None,
            marker: None,
            decoder: Decoder::default(),
        }
    }

    pub fn with_local_fixer(mut self, fixer: Arc<dyn LocalFixer>) -> Self {
        self.local_fixer = Some(fixer);
        self
    }

    pub fn with_marker(mut self, marker: Arc<dyn MarkerDecoder>) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }
}

enum Verdict {
    Error(String),
    Success,
    /// Settle delay elapsed without a report.
    Settled,
    Cancelled,
}

#[derive(Default)]
struct RunState {
    run_id: Option<Uuid>,
    state: FixState,
    attempt: usize,
    running: bool,
    cancelled: bool,
    log: Vec<LogEntry>,
    attempts: Vec<AgentAttempt>,
    completion: Option<FixCompletion>,
    /// External verification report waiting to be picked up.
    verdict: Option<Verdict>,
    observers: Vec<mpsc::Sender<FixEvent>>,
}

impl RunState {
    fn emit(&mut self, event: FixEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct Shared {
    deps: FixDeps,
    run: Mutex<RunState>,
    verdict_ready: Notify,
}

/// Handle to one fix loop. Clones share the same run.
#[derive(Clone)]
pub struct FixSession {
    shared: Arc<Shared>,
}

pub fn create_fix_session(deps: FixDeps) -> FixSession {
    FixSession {
        shared: Arc::new(Shared {
            deps,
            run: Mutex::new(RunState::default()),
            verdict_ready: Notify::new(),
        }),
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Last resort for a response that is plain code: treat it as the full new
/// content of the target file.
fn salvage_raw_code(response: &str, target_file: &str) -> Option<EditSet> {
    let code = strip_code_fences(response);
    if code.trim().is_empty() || !looks_like_code(&code) || target_file.trim().is_empty() {
        return None;
    }
    // A broken envelope is not code.
    if code.trim_start().starts_with('{') && code.contains("\"files\"") {
        return None;
    }
    let mut set = EditSet {
        truncated: true,
        ..EditSet::default()
    };
    set.files.insert(normalize_path(target_file), code);
    Some(set)
}

impl FixSession {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.shared.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Control surface
    // ═══════════════════════════════════════════════════════════════════════

    /// Start a run on the current tokio runtime. A panic inside the run ends
    /// it as `failed` instead of leaving the session stuck.
    pub fn start(
        &self,
        request: FixRequest,
        settings: FixLoopSettings,
    ) -> Result<JoinHandle<FixCompletion>> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Fix sessions must be started from within a tokio runtime")?;
        let run_id = self.begin()?;
        let session = self.clone();
        let span = tracing::info_span!("fix_run", run = %run_id);
        Ok(runtime.spawn(
            async move {
                match AssertUnwindSafe(session.drive(request, settings))
                    .catch_unwind()
                    .await
                {
                    Ok(completion) => completion,
                    Err(panic) => {
                        let detail = panic_detail(panic.as_ref());
                        tracing::error!("fix run crashed: {detail}");
                        session.finish(
                            FixState::Failed,
                            format!("Fix run crashed unexpectedly: {detail}"),
                        )
                    }
                }
            }
            .instrument(span),
        ))
    }

    /// Run to completion on the caller's task.
    pub async fn run(&self, request: FixRequest, settings: FixLoopSettings) -> Result<FixCompletion> {
        let run_id = self.begin()?;
        let span = tracing::info_span!("fix_run", run = %run_id);
        Ok(self.drive(request, settings).instrument(span).await)
    }

    /// Ask the loop to stop. Checked between iterations; an in-flight model
    /// call is allowed to finish.
    pub fn stop(&self) {
        let mut run = self.lock();
        if !run.running || run.cancelled {
            return;
        }
        run.cancelled = true;
        drop(run);
        self.push_log(LogLevel::Warning, "Stopping after the current step");
        self.shared.verdict_ready.notify_one();
    }

    /// The applied fix failed with `message`. Accepted only while verifying.
    pub fn report_error(&self, message: impl Into<String>) -> bool {
        self.report(Verdict::Error(message.into()))
    }

    /// The applied fix worked. Accepted only while verifying.
    pub fn report_success(&self) -> bool {
        self.report(Verdict::Success)
    }

    fn report(&self, verdict: Verdict) -> bool {
        let mut run = self.lock();
        if !run.running || run.state != FixState::Verifying || run.verdict.is_some() {
            return false;
        }
        run.verdict = Some(verdict);
        drop(run);
        self.shared.verdict_ready.notify_one();
        true
    }

    /// Attach an observer, replaying the current state, the buffered log and
    /// the completion if the run already ended.
    pub fn reconnect(&self, observer: mpsc::Sender<FixEvent>) {
        let mut run = self.lock();
        let mut replay = vec![FixEvent::StateChanged(run.state)];
        replay.extend(run.log.iter().cloned().map(FixEvent::Log));
        if let Some(completion) = &run.completion {
            replay.push(FixEvent::Completed(completion.clone()));
        }
        if replay.into_iter().all(|event| observer.send(event).is_ok()) {
            run.observers.push(observer);
        }
    }

    /// Detach every observer. The run keeps going and keeps buffering.
    pub fn disconnect(&self) {
        self.lock().observers.clear();
    }

    pub fn state(&self) -> FixState {
        self.lock().state
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.lock().log.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn completion_message(&self) -> Option<String> {
        self.lock().completion.as_ref().map(|c| c.message.clone())
    }

    pub fn attempts(&self) -> Vec<AgentAttempt> {
        self.lock().attempts.clone()
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.lock().run_id
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Run bookkeeping
    // ═══════════════════════════════════════════════════════════════════════

    fn begin(&self) -> Result<Uuid> {
        let mut run = self.lock();
        if run.running {
            anyhow::bail!("A fix run is already in progress");
        }
        let run_id = Uuid::new_v4();
        run.run_id = Some(run_id);
        run.state = FixState::Idle;
        run.attempt = 0;
        run.running = true;
        run.cancelled = false;
        run.log.clear();
        run.attempts.clear();
        run.completion = None;
        run.verdict = None;
        Ok(run_id)
    }

    fn transition(&self, state: FixState) {
        let mut run = self.lock();
        if run.state == state {
            return;
        }
        tracing::debug!(from = %run.state, to = %state, "fix state");
        run.state = state;
        if state == FixState::Verifying {
            // Reports from an earlier verification window are stale.
            run.verdict = None;
        }
        run.emit(FixEvent::StateChanged(state));
    }

    fn push_log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            at: Utc::now(),
            level,
            message: message.into(),
        };
        match level {
            LogLevel::Warning | LogLevel::Error => tracing::warn!("{}", entry.message),
            LogLevel::Info | LogLevel::Success => tracing::info!("{}", entry.message),
        }
        let mut run = self.lock();
        run.log.push(entry.clone());
        run.emit(FixEvent::Log(entry));
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    fn attempt(&self) -> usize {
        self.lock().attempt
    }

    fn next_attempt(&self) -> usize {
        let mut run = self.lock();
        run.attempt += 1;
        run.attempt
    }

    fn record_attempt(&self, attempt: AgentAttempt) {
        self.lock().attempts.push(attempt);
    }

    fn mark_last_attempt_failed(&self, error: &str) {
        if let Some(last) = self.lock().attempts.last_mut() {
            last.error = Some(error.to_string());
        }
    }

    fn history(&self) -> Vec<AgentAttempt> {
        self.lock().attempts.clone()
    }

    fn finish(&self, state: FixState, message: impl Into<String>) -> FixCompletion {
        let message = message.into();
        let success = state == FixState::Success;
        self.push_log(
            if success { LogLevel::Success } else { LogLevel::Error },
            message.clone(),
        );
        self.transition(state);

        let mut run = self.lock();
        let completion = FixCompletion {
            state,
            success,
            message,
            attempts: run.attempt,
        };
        run.running = false;
        run.verdict = None;
        run.completion = Some(completion.clone());
        run.emit(FixEvent::Completed(completion.clone()));
        completion
    }

    // ═══════════════════════════════════════════════════════════════════════
    // The loop
    // ═══════════════════════════════════════════════════════════════════════

    /// Wait for an external report or the settle delay, whichever comes first.
    async fn await_verdict(&self, settle: Duration) -> Verdict {
        let deadline = tokio::time::Instant::now() + settle;
        loop {
            let notified = self.shared.verdict_ready.notified();
            {
                let mut run = self.lock();
                if let Some(verdict) = run.verdict.take() {
                    return verdict;
                }
                if run.cancelled {
                    return Verdict::Cancelled;
                }
            }
            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return self.lock().verdict.take().unwrap_or(Verdict::Settled);
                }
            }
        }
    }

    /// Push merged changes through the store. Returns the paths written;
    /// a path the store refuses keeps its previous working content.
    fn commit(&self, files: &mut FileSnapshot, merged: MergeResult) -> Vec<String> {
        let store = &self.shared.deps.store;
        let mut written = Vec::new();
        for path in merged.changed {
            if written.contains(&path) {
                continue;
            }
            let result = match merged.files.get(&path) {
                Some(content) => store.update_file(&path, content).map(|()| {
                    files.insert(path.clone(), content.clone());
                    self.lock().emit(FixEvent::FileUpdated {
                        path: path.clone(),
                        content: content.clone(),
                    });
                }),
                None => store.delete_file(&path).map(|()| {
                    files.remove(&path);
                }),
            };
            match result {
                Ok(()) => written.push(path),
                Err(err) => self.push_log(LogLevel::Error, format!("Could not write {path}: {err:#}")),
            }
        }
        written
    }

    async fn drive(&self, request: FixRequest, settings: FixLoopSettings) -> FixCompletion {
        let deps = self.shared.deps.clone();
        let mut files = request.files.clone();
        let mut classification =
            classify_error(&request.error_message, request.error_stack.as_deref());
        let mut stack = request.error_stack.clone();

        self.transition(FixState::Analyzing);
        self.push_log(
            LogLevel::Info,
            format!(
                "Analyzing {}: {}",
                classification.kind.label(),
                truncate_for_error(&classification.message)
            ),
        );

        loop {
            if self.is_cancelled() {
                return self.finish(FixState::Failed, "Fix stopped");
            }
            if self.attempt() >= settings.max_attempts {
                return self.finish(
                    FixState::MaxAttemptsReached,
                    format!("Could not fix the error after {} attempts", settings.max_attempts),
                );
            }
            let attempt = self.next_attempt();

            if attempt == 1 && settings.enable_local_fix {
                if let Some(outcome) = self
                    .try_local_fix(deps.local_fixer.as_deref(), &classification, &request.target_file, &mut files, &settings)
                    .await
                {
                    match outcome {
                        Verdict::Error(message) => {
                            classification = self.reclassify(&message);
                            stack = None;
                            continue;
                        }
                        Verdict::Cancelled => return self.finish(FixState::Failed, "Fix stopped"),
                        Verdict::Success | Verdict::Settled => {
                            return self.finish(FixState::Success, "Fixed without calling the model");
                        }
                    }
                }
            }

            self.transition(FixState::AiFix);
            let history = self.history();
            let prompt = build_fix_prompt(&PromptInput {
                error: &classification,
                stack: stack.as_deref(),
                target_file: &request.target_file,
                files: &files,
                history: &history,
                settings: &settings,
            });

            self.transition(FixState::Fixing);
            self.push_log(LogLevel::Info, format!("Attempt {attempt}: asking the model"));
            let response = match deps.model.complete(&prompt).await {
                Ok(text) => text,
                Err(err) => {
                    self.push_log(LogLevel::Warning, format!("Model call failed: {err:#}"));
                    continue;
                }
            };

            if response.trim().is_empty() {
                self.push_log(LogLevel::Warning, "Model returned an empty response");
                continue;
            }
            if is_asking_question(&response) {
                self.push_log(
                    LogLevel::Warning,
                    "Model asked a question instead of fixing; retrying",
                );
                continue;
            }

            let edits = match decode_any(&response, deps.marker.as_deref(), &deps.decoder) {
                Ok(Some(set)) => Some(set),
                Ok(None) => None,
                Err(err) => {
                    tracing::debug!(category = err.category(), "decode failed: {err}");
                    None
                }
            }
            .or_else(|| salvage_raw_code(&response, &request.target_file));
            let Some(edits) = edits else {
                self.push_log(LogLevel::Warning, "Could not read any file changes from the response");
                continue;
            };

            let merged = merge_edit_set(&files, &edits);
            for error in &merged.errors {
                self.push_log(LogLevel::Warning, error.to_string());
            }
            if !merged.has_changes() {
                self.push_log(LogLevel::Warning, "The response did not change any file");
                continue;
            }

            self.transition(FixState::Applying);
            let changed_files = self.commit(&mut files, merged);
            if changed_files.is_empty() {
                continue;
            }
            self.push_log(
                LogLevel::Info,
                format!("Applied changes to {}", changed_files.join(", ")),
            );
            self.record_attempt(AgentAttempt {
                number: attempt,
                prompt: prompt.user,
                response,
                changed_files,
                error: None,
                local: false,
            });

            self.transition(FixState::Verifying);
            match self.await_verdict(settings.settle_delay()).await {
                Verdict::Error(message) => {
                    classification = self.reclassify(&message);
                    stack = None;
                }
                Verdict::Cancelled => return self.finish(FixState::Failed, "Fix stopped"),
                Verdict::Success | Verdict::Settled => {
                    return self.finish(
                        FixState::Success,
                        format!("Fixed after {attempt} attempt(s)"),
                    );
                }
            }
        }
    }

    /// Returns `None` when no local fix applied and the model should be asked.
    async fn try_local_fix(
        &self,
        fixer: Option<&dyn LocalFixer>,
        classification: &ErrorClassification,
        target_file: &str,
        files: &mut FileSnapshot,
        settings: &FixLoopSettings,
    ) -> Option<Verdict> {
        let fixer = fixer.filter(|f| f.can_fix(classification))?;
        self.transition(FixState::LocalFix);

        let Some(fix) = fixer.try_fix(classification, target_file, files) else {
            self.push_log(LogLevel::Info, "No local fix applies; asking the model");
            return None;
        };
        let mut merged = MergeResult {
            files: files.clone(),
            ..MergeResult::default()
        };
        for (path, content) in fix.files {
            if files.get(&path) != Some(&content) {
                merged.changed.push(path.clone());
                merged.files.insert(path, content);
            }
        }
        if !merged.has_changes() {
            return None;
        }

        self.transition(FixState::Applying);
        let changed_files = self.commit(files, merged);
        if changed_files.is_empty() {
            return None;
        }
        self.push_log(LogLevel::Success, fix.description.clone());
        self.record_attempt(AgentAttempt {
            number: self.attempt(),
            prompt: String::new(),
            response: fix.description,
            changed_files,
            error: None,
            local: true,
        });

        self.transition(FixState::Verifying);
        Some(self.await_verdict(settings.settle_delay()).await)
    }

    fn reclassify(&self, message: &str) -> ErrorClassification {
        self.mark_last_attempt_failed(message);
        self.push_log(
            LogLevel::Warning,
            format!("Fix did not hold: {}", truncate_for_error(message)),
        );
        classify_error(message, None)
    }
}
