use log::{error, info, Level};
use logging_timer::timer;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::MigratorError;

use super::entity::Entity;
use super::events::Producer;
use super::pattern::{Direction, Pattern};
use super::pool::DoubleWritePool;
use super::validator::Validator;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunKind {
    Full,
    Incremental,
}

impl RunKind {
    fn name(&self) -> &'static str {
        match self {
            RunKind::Full => "full",
            RunKind::Incremental => "incremental",
        }
    }
}

/// A validation run launched by the scheduler
struct ActiveRun {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveRun {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct SchedulerState {
    pattern: Pattern,
    full: Option<ActiveRun>,
    incr: Option<ActiveRun>,
}

impl SchedulerState {
    fn slot(&mut self, kind: RunKind) -> &mut Option<ActiveRun> {
        match kind {
            RunKind::Full => &mut self.full,
            RunKind::Incremental => &mut self.incr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub pattern: Pattern,
    pub full_running: bool,
    pub incr_running: bool,
}

/// Control plane for one migrated entity.
///
/// Every mutation (pattern switch, run start or stop) happens under a single
/// mutex. At most one full and one incremental run are active at a time.
pub struct Scheduler<T: Entity> {
    state: Mutex<SchedulerState>,
    pool: Arc<DoubleWritePool>,
    producer: Arc<dyn Producer>,
    batch_size: i64,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Scheduler<T> {
    pub fn new(
        pool: Arc<DoubleWritePool>,
        producer: Arc<dyn Producer>,
        batch_size: i64,
    ) -> Result<Self, MigratorError> {
        let pattern = pool.pattern()?;
        Ok(Self {
            state: Mutex::new(SchedulerState {
                pattern,
                full: None,
                incr: None,
            }),
            pool,
            producer,
            batch_size,
            _entity: PhantomData,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, SchedulerState>, MigratorError> {
        self.state.lock().map_err(|_| MigratorError::LockPoisoned)
    }

    pub fn src_only(&self) -> Result<(), MigratorError> {
        self.switch_pattern(Pattern::SrcOnly)
    }

    pub fn src_first(&self) -> Result<(), MigratorError> {
        self.switch_pattern(Pattern::SrcFirst)
    }

    pub fn dst_first(&self) -> Result<(), MigratorError> {
        self.switch_pattern(Pattern::DstFirst)
    }

    pub fn dst_only(&self) -> Result<(), MigratorError> {
        self.switch_pattern(Pattern::DstOnly)
    }

    /// Updates our bookkeeping and the pool's live pattern together.
    fn switch_pattern(&self, pattern: Pattern) -> Result<(), MigratorError> {
        let mut state = self.lock()?;
        state.pattern = pattern;
        self.pool.update_pattern(pattern);
        info!("Dual-write pattern switched to {}", pattern);
        Ok(())
    }

    pub fn pattern(&self) -> Result<Pattern, MigratorError> {
        Ok(self.lock()?.pattern)
    }

    /// Starts a one-shot full validation, replacing any full run in flight.
    pub fn start_full_validation(&self) -> Result<(), MigratorError> {
        let mut state = self.lock()?;
        let validator = self.new_validator(state.pattern).full();
        self.launch_locked(&mut state, RunKind::Full, validator);
        Ok(())
    }

    pub fn stop_full_validation(&self) -> Result<(), MigratorError> {
        self.stop(RunKind::Full)
    }

    /// Starts an incremental validation of rows updated after `utime`.
    ///
    /// With a positive `interval_ms` the run keeps polling at that interval
    /// until stopped; otherwise it makes a single pass.
    pub fn start_incr_validation(&self, utime: i64, interval_ms: i64) -> Result<(), MigratorError> {
        let mut state = self.lock()?;
        let interval = Duration::from_millis(interval_ms.max(0) as u64);
        let validator = self
            .new_validator(state.pattern)
            .incr()
            .utime(utime)
            .sleep_interval(interval);
        self.launch_locked(&mut state, RunKind::Incremental, validator);
        Ok(())
    }

    pub fn stop_incr_validation(&self) -> Result<(), MigratorError> {
        self.stop(RunKind::Incremental)
    }

    pub fn status(&self) -> Result<SchedulerStatus, MigratorError> {
        let state = self.lock()?;
        Ok(SchedulerStatus {
            pattern: state.pattern,
            full_running: state.full.as_ref().is_some_and(ActiveRun::is_running),
            incr_running: state.incr.as_ref().is_some_and(ActiveRun::is_running),
        })
    }

    /// Cancels both runs and waits for them to exit.
    pub async fn shutdown(&self) {
        // Take the handles in a separate scope so the mutex is released before awaiting
        let runs: Vec<ActiveRun> = {
            let Ok(mut state) = self.lock() else {
                error!("Cannot stop validation runs: scheduler lock was poisoned");
                return;
            };
            [state.full.take(), state.incr.take()]
                .into_iter()
                .flatten()
                .collect()
        };

        for run in runs {
            run.token.cancel();
            if let Err(e) = run.handle.await {
                error!("Validation run ended abnormally: {}", e);
            }
        }
    }

    /// The base store follows the pattern at start time and stays fixed for
    /// the run.
    fn new_validator(&self, pattern: Pattern) -> Validator<T> {
        let (base, target) = match pattern.base_direction() {
            Direction::Src => (self.pool.src().clone(), self.pool.dst().clone()),
            Direction::Dst => (self.pool.dst().clone(), self.pool.src().clone()),
        };

        Validator::new(base, target, pattern.base_direction(), Arc::clone(&self.producer))
            .batch_size(self.batch_size)
    }

    /// Must be called with the scheduler mutex held. The previous run of the
    /// same kind is cancelled but not awaited.
    fn launch_locked(&self, state: &mut SchedulerState, kind: RunKind, validator: Validator<T>) {
        let _tmr = timer!(Level::Trace; "Scheduler::launch_locked");

        if let Some(previous) = state.slot(kind).take() {
            info!("Cancelling previous {} validation run", kind.name());
            previous.token.cancel();
        }

        let token = CancellationToken::new();
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            match validator.validate(&run_token).await {
                Ok(()) => info!("{} validation of {} exited", kind.name(), T::TABLE),
                Err(e) => error!("{} validation of {} failed: {}", kind.name(), T::TABLE, e),
            }
        });

        info!(
            "Started {} validation of {} (base {})",
            kind.name(),
            T::TABLE,
            state.pattern.base_direction()
        );
        *state.slot(kind) = Some(ActiveRun { token, handle });
    }

    fn stop(&self, kind: RunKind) -> Result<(), MigratorError> {
        let mut state = self.lock()?;
        if let Some(run) = state.slot(kind).take() {
            run.token.cancel();
            info!("Stop requested for {} validation run", kind.name());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactive::Interactive;
    use crate::migrator::events::{EventType, InconsistentEvent};
    use crate::migrator::pattern::SharedPattern;
    use crate::migrator::test_support::{
        insert_interactive, interactive, RecordingProducer, StorePair,
    };
    use pretty_assertions::assert_eq;

    fn scheduler(
        pair: &StorePair,
        pattern: Pattern,
        producer: &Arc<RecordingProducer>,
    ) -> (Arc<DoubleWritePool>, Scheduler<Interactive>) {
        let pool = Arc::new(DoubleWritePool::new(
            pair.src.clone(),
            pair.dst.clone(),
            SharedPattern::new(pattern),
        ));
        let scheduler = Scheduler::new(Arc::clone(&pool), producer.clone(), 10).unwrap();
        (pool, scheduler)
    }

    fn token_of(scheduler: &Scheduler<Interactive>, kind: RunKind) -> Option<CancellationToken> {
        let mut state = scheduler.lock().unwrap();
        state.slot(kind).as_ref().map(|run| run.token.clone())
    }

    async fn wait_until_idle(scheduler: &Scheduler<Interactive>) {
        for _ in 0..250 {
            let status = scheduler.status().unwrap();
            if !status.full_running && !status.incr_running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("validation runs did not finish");
    }

    #[tokio::test]
    async fn test_pattern_switch_updates_pool() {
        let pair = StorePair::new();
        let producer = Arc::new(RecordingProducer::default());
        let (pool, scheduler) = scheduler(&pair, Pattern::SrcOnly, &producer);

        scheduler.src_first().unwrap();
        assert_eq!(pool.pattern().unwrap(), Pattern::SrcFirst);
        scheduler.dst_first().unwrap();
        assert_eq!(pool.pattern().unwrap(), Pattern::DstFirst);
        scheduler.dst_only().unwrap();
        assert_eq!(pool.pattern().unwrap(), Pattern::DstOnly);
        scheduler.src_only().unwrap();
        assert_eq!(pool.pattern().unwrap(), Pattern::SrcOnly);
        assert_eq!(scheduler.pattern().unwrap(), Pattern::SrcOnly);
    }

    #[tokio::test]
    async fn test_full_run_uses_base_from_pattern() {
        let pair = StorePair::new();
        insert_interactive(&pair.dst, &interactive(8, 1, 1));

        let producer = Arc::new(RecordingProducer::default());
        let (_pool, scheduler) = scheduler(&pair, Pattern::DstFirst, &producer);

        scheduler.start_full_validation().unwrap();
        wait_until_idle(&scheduler).await;

        assert_eq!(
            producer.sorted(),
            vec![InconsistentEvent::new(8, Direction::Dst, EventType::TargetMissing)]
        );
    }

    #[tokio::test]
    async fn test_run_keeps_base_after_pattern_switch() {
        let pair = StorePair::new();
        let producer = Arc::new(RecordingProducer::default());
        let (_pool, scheduler) = scheduler(&pair, Pattern::SrcFirst, &producer);

        scheduler.start_incr_validation(0, 20).unwrap();
        scheduler.dst_only().unwrap();

        insert_interactive(&pair.src, &interactive(5, 1, 10));

        let mut reported = Vec::new();
        for _ in 0..100 {
            reported = producer.sorted();
            if !reported.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        scheduler.shutdown().await;

        assert_eq!(
            reported.first(),
            Some(&InconsistentEvent::new(5, Direction::Src, EventType::TargetMissing))
        );
    }

    #[tokio::test]
    async fn test_restarting_full_run_cancels_previous() {
        let pair = StorePair::new();
        for id in 1..=50 {
            insert_interactive(&pair.src, &interactive(id, 1, 1));
        }
        let producer = Arc::new(RecordingProducer::default());
        let (_pool, scheduler) = scheduler(&pair, Pattern::SrcOnly, &producer);

        scheduler.start_full_validation().unwrap();
        let first = token_of(&scheduler, RunKind::Full).unwrap();

        scheduler.start_full_validation().unwrap();
        let second = token_of(&scheduler, RunKind::Full).unwrap();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        scheduler.shutdown().await;
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_cancels_only_that_kind() {
        let pair = StorePair::new();
        let producer = Arc::new(RecordingProducer::default());
        let (_pool, scheduler) = scheduler(&pair, Pattern::SrcOnly, &producer);

        scheduler.start_incr_validation(0, 60_000).unwrap();
        scheduler.start_full_validation().unwrap();
        let incr = token_of(&scheduler, RunKind::Incremental).unwrap();
        let full = token_of(&scheduler, RunKind::Full).unwrap();

        scheduler.stop_incr_validation().unwrap();
        assert!(incr.is_cancelled());
        assert!(!full.is_cancelled());
        assert!(token_of(&scheduler, RunKind::Incremental).is_none());

        scheduler.stop_full_validation().unwrap();
        assert!(full.is_cancelled());

        // Stopping an idle kind is a no-op
        scheduler.stop_full_validation().unwrap();
    }

    #[tokio::test]
    async fn test_tailing_run_reports_running_until_stopped() {
        let pair = StorePair::new();
        let producer = Arc::new(RecordingProducer::default());
        let (_pool, scheduler) = scheduler(&pair, Pattern::SrcOnly, &producer);

        scheduler.start_incr_validation(0, 60_000).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = scheduler.status().unwrap();
        assert!(status.incr_running);
        assert!(!status.full_running);

        scheduler.shutdown().await;
        assert!(!scheduler.status().unwrap().incr_running);
    }

    struct PanickingProducer;

    impl Producer for PanickingProducer {
        fn produce_inconsistent_event(&self, _event: &InconsistentEvent) -> Result<(), MigratorError> {
            panic!("producer blew up");
        }
    }

    #[tokio::test]
    async fn test_shutdown_survives_panicked_run() {
        let pair = StorePair::new();
        insert_interactive(&pair.src, &interactive(1, 1, 1));
        let pool = Arc::new(DoubleWritePool::new(
            pair.src.clone(),
            pair.dst.clone(),
            SharedPattern::new(Pattern::SrcOnly),
        ));
        let scheduler =
            Scheduler::<Interactive>::new(pool, Arc::new(PanickingProducer), 10).unwrap();

        scheduler.start_full_validation().unwrap();
        wait_until_idle(&scheduler).await;

        scheduler.shutdown().await;
        assert!(token_of(&scheduler, RunKind::Full).is_none());
        assert!(!scheduler.status().unwrap().full_running);
    }
}
