// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use portal_process_core::application::application_checklist_executor::{
    ApplicationChecklistProcessTypeExecutor, ChecklistStepContext, ChecklistStepHandler, ChecklistStepOutcome,
    APPLICATION_CHECKLIST_STEP_TYPES,
};
use portal_process_core::application::checklist_creation::{StandardChecklistCreationService, StepDependencyTable};
use portal_process_core::application::invitation_executor::{
    InvitationProcessTypeExecutor, InvitationStepHandler, INVITATION_STEP_TYPES,
};
use portal_process_core::application::process_executor::{ProcessExecutor, ProcessRunner};
use portal_process_core::application::process_orchestration::ChecklistProcessService;
use portal_process_core::application::process_retrigger::ProcessStepRetriggerService;
use portal_process_core::application::process_type_executor::ProcessTypeExecutor;
use portal_process_core::domain::change_set::ProcessChangeSet;
use portal_process_core::domain::checklist::{ChecklistEntry, ChecklistEntryStatus, ChecklistEntryType, SubjectId};
use portal_process_core::domain::errors::{ServiceError, StepError};
use portal_process_core::domain::events::ProcessEvent;
use portal_process_core::domain::process::{Process, ProcessId, ProcessStep, ProcessStepStatus, ProcessStepType, ProcessType};
use portal_process_core::domain::repository::{ApplicationChecklistRepository, ProcessRepository};
use portal_process_core::domain::worker_config::WorkerConfig;
use portal_process_core::infrastructure::event_bus::{EventBus, EventBusError};
use portal_process_core::infrastructure::repositories::InMemoryProcessRepository;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Succeeds after failing `failures` times with the given error kind.
struct FlakyInvitationHandler {
    failures: AtomicUsize,
    recoverable: bool,
    calls: AtomicUsize,
}

impl FlakyInvitationHandler {
    fn succeeding() -> Arc<Self> {
        Self::failing(0, false)
    }

    fn failing(failures: usize, recoverable: bool) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            recoverable,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl InvitationStepHandler for FlakyInvitationHandler {
    async fn execute(&self, _invitation_id: SubjectId, _cancel: &CancellationToken) -> Result<Option<String>, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(None);
        }
        self.failures.store(remaining - 1, Ordering::SeqCst);
        let error = if self.recoverable {
            ServiceError::recoverable("idp unreachable")
        } else {
            ServiceError::non_recoverable("realm already exists")
        };
        Err(error.into())
    }
}

/// Bumps the process version behind the runner's back on its first call.
struct InterferingHandler {
    repository: Arc<InMemoryProcessRepository>,
    process_id: ProcessId,
    calls: AtomicUsize,
}

#[async_trait]
impl InvitationStepHandler for InterferingHandler {
    async fn execute(&self, _invitation_id: SubjectId, _cancel: &CancellationToken) -> Result<Option<String>, StepError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut process = self.repository.get_process(self.process_id).await.unwrap().unwrap();
            let mut changes = ProcessChangeSet::new();
            changes.attach_process_for_lock(&mut process, |p| p.update_version());
            self.repository.save_changes(changes).await.unwrap();
        }
        Ok(Some("mail queued".to_string()))
    }
}

fn invitation_executor(
    repository: &Arc<InMemoryProcessRepository>,
    overrides: Vec<(ProcessStepType, Arc<dyn InvitationStepHandler>)>,
) -> Arc<dyn ProcessTypeExecutor> {
    let mut handlers: HashMap<ProcessStepType, Arc<dyn InvitationStepHandler>> = INVITATION_STEP_TYPES
        .iter()
        .map(|step| (*step, FlakyInvitationHandler::succeeding() as Arc<dyn InvitationStepHandler>))
        .collect();
    handlers.extend(overrides);
    Arc::new(InvitationProcessTypeExecutor::new(repository.clone(), handlers).unwrap())
}

fn runner(
    repository: &Arc<InMemoryProcessRepository>,
    executors: Vec<Arc<dyn ProcessTypeExecutor>>,
    event_bus: &Arc<EventBus>,
) -> ProcessRunner {
    let executor = Arc::new(ProcessExecutor::new(
        repository.clone(),
        executors,
        event_bus.clone(),
        Duration::from_secs(300),
    ));
    ProcessRunner::new(executor, repository.clone(), event_bus.clone(), &WorkerConfig::default())
}

fn invitation_process(repository: &InMemoryProcessRepository, first_step: ProcessStepType) -> Process {
    let process = Process::new(ProcessType::Invitation);
    repository.insert_process(process.clone());
    repository.insert_step(ProcessStep::new(first_step, ProcessStepStatus::Todo, process.id));
    repository.add_invitation(SubjectId::new(), process.id);
    process
}

fn statuses(repository: &InMemoryProcessRepository, process_id: ProcessId, step_type: ProcessStepType) -> Vec<ProcessStepStatus> {
    repository
        .steps_of(process_id)
        .into_iter()
        .filter(|s| s.process_step_type == step_type)
        .map(|s| s.status)
        .collect()
}

fn drain(receiver: &mut portal_process_core::infrastructure::event_bus::EventReceiver) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(EventBusError::Empty) | Err(EventBusError::Closed) => return events,
            Err(EventBusError::Lagged(_)) => continue,
        }
    }
}

#[tokio::test]
async fn test_invitation_runs_to_completion_in_one_poll() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let mut events = event_bus.subscribe();
    let process = invitation_process(&repository, ProcessStepType::InvitationCreateCentralIdp);
    let runner = runner(&repository, vec![invitation_executor(&repository, Vec::new())], &event_bus);

    let report = runner.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.processes, 1);
    assert_eq!(report.steps_executed, INVITATION_STEP_TYPES.len());
    assert_eq!(report.errors, 0);
    let steps = repository.steps_of(process.id);
    assert_eq!(steps.len(), INVITATION_STEP_TYPES.len());
    assert!(steps.iter().all(|s| s.status == ProcessStepStatus::Done));
    assert_eq!(
        steps.iter().map(|s| s.process_step_type).collect::<Vec<_>>(),
        INVITATION_STEP_TYPES.to_vec()
    );

    let stored = repository.get_process(process.id).await.unwrap().unwrap();
    assert!(stored.lock_expiry_date.is_none());

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(ProcessEvent::ProcessLocked { .. })));
    assert!(matches!(events.last(), Some(ProcessEvent::ProcessReleased { .. })));
    let executed = events
        .iter()
        .filter(|e| matches!(e, ProcessEvent::ProcessStepExecuted { .. }))
        .count();
    assert_eq!(executed, INVITATION_STEP_TYPES.len());

    // Nothing is due afterwards.
    let idle = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(idle.processes, 0);
}

#[tokio::test]
async fn test_failed_step_waits_for_retrigger() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let process = invitation_process(&repository, ProcessStepType::InvitationCreateCentralIdp);
    let enable = FlakyInvitationHandler::failing(1, false);
    let runner = runner(
        &repository,
        vec![invitation_executor(
            &repository,
            vec![(ProcessStepType::InvitationEnableCentralIdp, enable.clone() as Arc<dyn InvitationStepHandler>)],
        )],
        &event_bus,
    );

    let first = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.steps_executed, 5);
    assert_eq!(first.steps_failed, 1);
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::InvitationEnableCentralIdp),
        vec![ProcessStepStatus::Failed]
    );
    let failed = repository
        .steps_of(process.id)
        .into_iter()
        .find(|s| s.process_step_type == ProcessStepType::InvitationEnableCentralIdp)
        .unwrap();
    assert_eq!(failed.message.as_deref(), Some("realm already exists"));
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::RetriggerInvitationEnableCentralIdp),
        vec![ProcessStepStatus::Todo]
    );

    // Retrigger steps are manual, so the runner has nothing to do.
    assert_eq!(runner.run_once(&CancellationToken::new()).await.unwrap().processes, 0);

    ProcessStepRetriggerService::new(repository.clone(), repository.clone(), event_bus.clone())
        .retrigger_step(process.id, ProcessStepType::RetriggerInvitationEnableCentralIdp)
        .await
        .unwrap();

    let second = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.steps_executed, 4);
    assert_eq!(enable.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::InvitationSendMail),
        vec![ProcessStepStatus::Done]
    );
}

#[tokio::test]
async fn test_recoverable_failure_keeps_step_todo_until_next_poll() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let process = invitation_process(&repository, ProcessStepType::InvitationCreateUser);
    let create_user = FlakyInvitationHandler::failing(1, true);
    let runner = runner(
        &repository,
        vec![invitation_executor(
            &repository,
            vec![(ProcessStepType::InvitationCreateUser, create_user.clone() as Arc<dyn InvitationStepHandler>)],
        )],
        &event_bus,
    );

    let first = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.steps_executed, 0);
    assert_eq!(first.steps_failed, 0);
    let pending = repository.steps_of(process.id);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, ProcessStepStatus::Todo);
    assert_eq!(pending[0].message.as_deref(), Some("idp unreachable"));
    assert!(repository.get_process(process.id).await.unwrap().unwrap().lock_expiry_date.is_none());

    let second = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.steps_executed, 2);
    assert_eq!(create_user.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_modification_is_retried_next_poll() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let mut events = event_bus.subscribe();
    let process = invitation_process(&repository, ProcessStepType::InvitationSendMail);
    let interfering = Arc::new(InterferingHandler {
        repository: repository.clone(),
        process_id: process.id,
        calls: AtomicUsize::new(0),
    });
    let runner = runner(
        &repository,
        vec![invitation_executor(
            &repository,
            vec![(ProcessStepType::InvitationSendMail, interfering as Arc<dyn InvitationStepHandler>)],
        )],
        &event_bus,
    );

    let first = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.concurrency_conflicts, 1);
    assert_eq!(first.steps_executed, 0);
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::InvitationSendMail),
        vec![ProcessStepStatus::Todo]
    );
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, ProcessEvent::ConcurrencyConflict { process_id, .. } if *process_id == process.id)));

    let second = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.steps_executed, 1);
    let sent = repository.steps_of(process.id);
    assert_eq!(sent[0].status, ProcessStepStatus::Done);
    assert_eq!(sent[0].message.as_deref(), Some("mail queued"));
}

struct ScriptedChecklistHandler {
    outcome: Result<ChecklistStepOutcome, ServiceError>,
    seen: parking_lot::Mutex<Vec<ChecklistStepContext>>,
}

impl ScriptedChecklistHandler {
    fn new(outcome: Result<ChecklistStepOutcome, ServiceError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            seen: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChecklistStepHandler for ScriptedChecklistHandler {
    async fn execute(
        &self,
        context: &ChecklistStepContext,
        _cancel: &CancellationToken,
    ) -> Result<ChecklistStepOutcome, StepError> {
        self.seen.lock().push(context.clone());
        self.outcome.clone().map_err(StepError::from)
    }
}

fn checklist_executor(
    repository: &Arc<InMemoryProcessRepository>,
    overrides: Vec<(ProcessStepType, Arc<dyn ChecklistStepHandler>)>,
) -> Arc<dyn ProcessTypeExecutor> {
    let mut handlers: HashMap<ProcessStepType, Arc<dyn ChecklistStepHandler>> = APPLICATION_CHECKLIST_STEP_TYPES
        .iter()
        .map(|step| {
            (
                *step,
                ScriptedChecklistHandler::new(Ok(ChecklistStepOutcome::done(ChecklistEntryStatus::Done, Vec::new())))
                    as Arc<dyn ChecklistStepHandler>,
            )
        })
        .collect();
    handlers.extend(overrides);
    let creation = Arc::new(StandardChecklistCreationService::new(repository.clone(), StepDependencyTable::standard()));
    let orchestration = Arc::new(ChecklistProcessService::new(repository.clone(), repository.clone()));
    Arc::new(ApplicationChecklistProcessTypeExecutor::new(repository.clone(), creation, orchestration, handlers).unwrap())
}

fn checklist_process(repository: &InMemoryProcessRepository, submitted: bool, first_step: ProcessStepType) -> (SubjectId, Process) {
    let subject_id = SubjectId::new();
    let process = Process::new(ProcessType::ApplicationChecklist);
    repository.insert_process(process.clone());
    repository.insert_step(ProcessStep::new(first_step, ProcessStepStatus::Todo, process.id));
    repository.add_application(subject_id, None, submitted, Some(process.id));
    (subject_id, process)
}

#[tokio::test]
async fn test_checklist_step_updates_entry_and_schedules_follow_up() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let (subject_id, process) = checklist_process(&repository, true, ProcessStepType::StartClearingHouse);
    let clearing_house = ScriptedChecklistHandler::new(Ok(ChecklistStepOutcome::done(
        ChecklistEntryStatus::InProgress,
        vec![ProcessStepType::EndClearingHouse],
    )));
    let runner = runner(
        &repository,
        vec![checklist_executor(
            &repository,
            vec![(ProcessStepType::StartClearingHouse, clearing_house.clone() as Arc<dyn ChecklistStepHandler>)],
        )],
        &event_bus,
    );

    let report = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.steps_executed, 1);

    // Initialization filled in the missing checklist before the step ran; the
    // handler sees its own entry and the ones it depends on.
    let seen = clearing_house.seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].application_id, subject_id);
    assert_eq!(
        seen[0].checklist.keys().copied().collect::<Vec<_>>(),
        vec![
            ChecklistEntryType::BusinessPartnerNumber,
            ChecklistEntryType::IdentityWallet,
            ChecklistEntryType::ClearingHouse,
        ]
    );
    assert_eq!(repository.get_checklist(subject_id).await.unwrap().len(), ChecklistEntryType::ALL.len());

    let entry = repository.checklist_entry(subject_id, ChecklistEntryType::ClearingHouse).unwrap();
    assert_eq!(entry.status, ChecklistEntryStatus::InProgress);
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::StartClearingHouse),
        vec![ProcessStepStatus::Done]
    );
    // END_CLEARING_HOUSE is completed by an external callback, not the runner.
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::EndClearingHouse),
        vec![ProcessStepStatus::Todo]
    );
}

#[tokio::test]
async fn test_checklist_step_failure_marks_entry_failed() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let (subject_id, process) = checklist_process(&repository, true, ProcessStepType::CreateIdentityWallet);
    let wallet = ScriptedChecklistHandler::new(Err(ServiceError::non_recoverable("wallet rejected")));
    let runner = runner(
        &repository,
        vec![checklist_executor(
            &repository,
            vec![(ProcessStepType::CreateIdentityWallet, wallet as Arc<dyn ChecklistStepHandler>)],
        )],
        &event_bus,
    );

    let report = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.steps_failed, 1);

    let entry = repository.checklist_entry(subject_id, ChecklistEntryType::IdentityWallet).unwrap();
    assert_eq!(entry.status, ChecklistEntryStatus::Failed);
    assert_eq!(entry.comment.as_deref(), Some("wallet rejected"));
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::CreateIdentityWallet),
        vec![ProcessStepStatus::Failed]
    );
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::RetriggerIdentityWallet),
        vec![ProcessStepStatus::Todo]
    );
}

#[tokio::test]
async fn test_checklist_step_on_settled_entry_is_rejected_before_handler() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let (subject_id, process) = checklist_process(&repository, true, ProcessStepType::StartClearingHouse);
    repository.insert_checklist_entry(ChecklistEntry::new(
        subject_id,
        ChecklistEntryType::ClearingHouse,
        ChecklistEntryStatus::Done,
    ));
    let clearing_house = ScriptedChecklistHandler::new(Ok(ChecklistStepOutcome::done(
        ChecklistEntryStatus::InProgress,
        vec![ProcessStepType::EndClearingHouse],
    )));
    let runner = runner(
        &repository,
        vec![checklist_executor(
            &repository,
            vec![(ProcessStepType::StartClearingHouse, clearing_house.clone() as Arc<dyn ChecklistStepHandler>)],
        )],
        &event_bus,
    );

    let report = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.steps_executed, 0);
    assert_eq!(report.steps_failed, 1);
    assert!(clearing_house.seen.lock().is_empty());

    let entry = repository.checklist_entry(subject_id, ChecklistEntryType::ClearingHouse).unwrap();
    assert_eq!(entry.status, ChecklistEntryStatus::Done);
    let start = repository
        .steps_of(process.id)
        .into_iter()
        .find(|s| s.process_step_type == ProcessStepType::StartClearingHouse)
        .unwrap();
    assert_eq!(start.status, ProcessStepStatus::Failed);
    assert!(start.message.unwrap().contains("is not in status"));
    assert!(statuses(&repository, process.id, ProcessStepType::EndClearingHouse).is_empty());
    assert!(statuses(&repository, process.id, ProcessStepType::RetriggerClearingHouse).is_empty());
}

#[tokio::test]
async fn test_locked_checklist_step_runs_under_own_lease() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let mut events = event_bus.subscribe();
    let (subject_id, process) = checklist_process(&repository, true, ProcessStepType::ActivateApplication);
    let activation = ScriptedChecklistHandler::new(Ok(ChecklistStepOutcome::done(ChecklistEntryStatus::Done, Vec::new())));
    let runner = runner(
        &repository,
        vec![checklist_executor(
            &repository,
            vec![(ProcessStepType::ActivateApplication, activation.clone() as Arc<dyn ChecklistStepHandler>)],
        )],
        &event_bus,
    );

    let report = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.steps_executed, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(activation.seen.lock().len(), 1);
    assert_eq!(
        repository
            .checklist_entry(subject_id, ChecklistEntryType::ApplicationActivation)
            .unwrap()
            .status,
        ChecklistEntryStatus::Done
    );
    assert!(repository.get_process(process.id).await.unwrap().unwrap().lock_expiry_date.is_none());

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(ProcessEvent::ProcessLocked { .. })));
    let released = events
        .iter()
        .filter(|e| matches!(e, ProcessEvent::ProcessReleased { .. }))
        .count();
    assert_eq!(released, 1);
}

#[tokio::test]
async fn test_unsubmitted_application_is_reported_and_untouched() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(64));
    let (subject_id, process) = checklist_process(&repository, false, ProcessStepType::CreateIdentityWallet);
    let runner = runner(&repository, vec![checklist_executor(&repository, Vec::new())], &event_bus);

    let report = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.steps_executed, 0);
    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::CreateIdentityWallet),
        vec![ProcessStepStatus::Todo]
    );
    assert!(repository.checklist_entry(subject_id, ChecklistEntryType::IdentityWallet).is_none());
}

#[tokio::test]
async fn test_runner_dispatches_by_process_type() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(128));
    let invitation = invitation_process(&repository, ProcessStepType::InvitationSendMail);
    let (_subject_id, checklist) = checklist_process(&repository, true, ProcessStepType::StartSelfDescriptionLp);
    let runner = runner(
        &repository,
        vec![
            invitation_executor(&repository, Vec::new()),
            checklist_executor(&repository, Vec::new()),
        ],
        &event_bus,
    );

    let report = runner.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.processes, 2);
    assert_eq!(report.steps_executed, 2);
    assert_eq!(
        statuses(&repository, invitation.id, ProcessStepType::InvitationSendMail),
        vec![ProcessStepStatus::Done]
    );
    assert_eq!(
        statuses(&repository, checklist.id, ProcessStepType::StartSelfDescriptionLp),
        vec![ProcessStepStatus::Done]
    );
}

#[tokio::test]
async fn test_cancelled_runner_stops_without_executing() {
    let repository = Arc::new(InMemoryProcessRepository::new());
    let event_bus = Arc::new(EventBus::new(16));
    let process = invitation_process(&repository, ProcessStepType::InvitationSendMail);
    let runner = runner(&repository, vec![invitation_executor(&repository, Vec::new())], &event_bus);

    let cancel = CancellationToken::new();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner.run(cancel))
        .await
        .expect("runner did not stop after cancellation");

    assert_eq!(
        statuses(&repository, process.id, ProcessStepType::InvitationSendMail),
        vec![ProcessStepStatus::Todo]
    );
}
