use log::{debug, error, info, Level};
use logging_timer::timer;
use rusqlite::types::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::MigratorError;

use super::entity::Entity;
use super::events::{EventType, InconsistentEvent, Producer};
use super::pattern::Direction;
use super::store::{quote_ident, Store};

const DEFAULT_BATCH_SIZE: i64 = 100;

/// Upper bound on bound parameters in one `IN (...)` lookup, well below
/// SQLite's variable limit.
const ID_LOOKUP_CHUNK: usize = 500;

/// Shortest wait before retrying a page that failed to load.
const PAGE_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Consecutive page failures after which a one-shot run gives up.
const MAX_PAGE_ATTEMPTS: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Whole table, ordered by id.
    Full,
    /// Only rows updated after the watermark, ordered by update time.
    Incremental,
}

/// Finds rows that differ between `base` and `target` and publishes one
/// [`InconsistentEvent`] per divergent row.
///
/// Two scans run side by side: base to target finds missing and unequal
/// rows, target to base finds rows that no longer exist in base. Without a
/// sleep interval both scans stop once their table is exhausted; with one
/// they keep polling until cancelled.
pub struct Validator<T: Entity> {
    base: Store,
    target: Store,
    direction: Direction,
    producer: Arc<dyn Producer>,
    batch_size: i64,
    utime: i64,
    sleep_interval: Duration,
    mode: ScanMode,
    _entity: PhantomData<fn() -> T>,
}

/// Keyset position of one directional scan: the `(u_time, id)` of the last
/// row read. Full scans order by id alone and only use `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor {
    utime: i64,
    id: i64,
    advanced: bool,
}

impl Cursor {
    fn new(mode: ScanMode, watermark: i64) -> Self {
        let id = match mode {
            ScanMode::Full => i64::MIN,
            // (watermark, MAX) admits exactly the rows updated after the watermark
            ScanMode::Incremental => i64::MAX,
        };
        Self {
            utime: watermark,
            id,
            advanced: false,
        }
    }

    fn advance(&mut self, utime: i64, id: i64) {
        self.utime = utime;
        self.id = id;
        self.advanced = true;
    }

    /// Called when a polling cycle has drained the table.
    ///
    /// An incremental scan steps back to just before the update time of the
    /// last row it read, so a row written later with that same timestamp is
    /// still picked up. Rows it has not read always sort after the key.
    /// Full scans keep their position: new ids land at the end.
    fn restart_cycle(&mut self, mode: ScanMode) {
        if mode == ScanMode::Incremental && self.advanced {
            self.utime = self.utime.saturating_sub(1);
            self.id = i64::MAX;
            self.advanced = false;
        }
    }
}

impl<T: Entity> Validator<T> {
    pub fn new(base: Store, target: Store, direction: Direction, producer: Arc<dyn Producer>) -> Self {
        Self {
            base,
            target,
            direction,
            producer,
            batch_size: DEFAULT_BATCH_SIZE,
            utime: 0,
            sleep_interval: Duration::ZERO,
            mode: ScanMode::Full,
            _entity: PhantomData,
        }
    }

    pub fn full(mut self) -> Self {
        self.mode = ScanMode::Full;
        self
    }

    pub fn incr(mut self) -> Self {
        self.mode = ScanMode::Incremental;
        self
    }

    pub fn utime(mut self, utime: i64) -> Self {
        self.utime = utime;
        self
    }

    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs both scans until they finish or `token` is cancelled.
    ///
    /// Cancellation is a clean stop and returns `Ok`. The first scan to fail
    /// stops its sibling and its error is returned.
    pub async fn validate(&self, token: &CancellationToken) -> Result<(), MigratorError> {
        info!(
            "Validating {} ({:?}, base {}) from '{}' against '{}'",
            T::TABLE,
            self.mode,
            self.direction,
            self.base.name(),
            self.target.name()
        );

        let group = token.child_token();
        let result = tokio::try_join!(
            self.validate_base_to_target(&group),
            self.validate_target_to_base(&group),
        );
        group.cancel();

        result.map(|_| ())
    }

    async fn validate_base_to_target(&self, token: &CancellationToken) -> Result<(), MigratorError> {
        let mut cursor = Cursor::new(self.mode, self.utime);
        let mut failures = 0;

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            let sql = self.base_page_sql();
            let args = self.page_args(&cursor);
            let page = run_blocking(&self.base, move |base| {
                let _tmr = timer!(Level::Trace; "Validator::base_page");
                base.query(&sql, &args, T::from_row)
            })
            .await;

            let rows = match page {
                Ok(rows) => {
                    failures = 0;
                    rows
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        "Failed to read {} page after id {} from '{}' (attempt {}): {}",
                        T::TABLE,
                        cursor.id,
                        self.base.name(),
                        failures,
                        e
                    );
                    if !self.back_off(token, failures, e).await? {
                        return Ok(());
                    }
                    continue;
                }
            };

            let Some(last) = rows.last() else {
                if self.sleep_interval.is_zero() {
                    debug!("Base to target scan of {} complete", T::TABLE);
                    return Ok(());
                }
                cursor.restart_cycle(self.mode);
                if !self.pause(token, self.sleep_interval).await {
                    return Ok(());
                }
                continue;
            };
            cursor.advance(last.utime(), last.id());

            let direction = self.direction;
            let events = run_blocking(&self.target, move |target| {
                Ok(compare_with_target(&target, direction, &rows))
            })
            .await?;

            self.publish(&events);
        }
    }

    async fn validate_target_to_base(&self, token: &CancellationToken) -> Result<(), MigratorError> {
        let mut cursor = Cursor::new(self.mode, self.utime);
        let mut failures = 0;

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            let sql = self.target_keys_sql();
            let args = self.page_args(&cursor);
            let page = run_blocking(&self.target, move |target| {
                let _tmr = timer!(Level::Trace; "Validator::target_keys_page");
                target.query(&sql, &args, |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })
            })
            .await;

            let rows = match page {
                Ok(rows) => {
                    failures = 0;
                    rows
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        "Failed to read {} ids after id {} from '{}' (attempt {}): {}",
                        T::TABLE,
                        cursor.id,
                        self.target.name(),
                        failures,
                        e
                    );
                    if !self.back_off(token, failures, e).await? {
                        return Ok(());
                    }
                    continue;
                }
            };

            let Some(&(last_id, last_utime)) = rows.last() else {
                if self.sleep_interval.is_zero() {
                    debug!("Target to base scan of {} complete", T::TABLE);
                    return Ok(());
                }
                cursor.restart_cycle(self.mode);
                if !self.pause(token, self.sleep_interval).await {
                    return Ok(());
                }
                continue;
            };
            cursor.advance(last_utime, last_id);

            let ids: Vec<i64> = rows.into_iter().map(|(id, _)| id).collect();
            let missing = match run_blocking(&self.base, move |base| {
                missing_from_base(&base, T::TABLE, &ids)
            })
            .await
            {
                Ok(missing) => missing,
                Err(e) => {
                    error!(
                        "Failed to look up {} ids in '{}': {}",
                        T::TABLE,
                        self.base.name(),
                        e
                    );
                    continue;
                }
            };

            let events: Vec<InconsistentEvent> = missing
                .into_iter()
                .map(|id| InconsistentEvent::new(id, self.direction, EventType::BaseMissing))
                .collect();
            self.publish(&events);
        }
    }

    /// Waits before a failed page is retried. Returns `Ok(false)` if cancelled
    /// meanwhile. A one-shot run gives up with `err` once the same page has
    /// failed `MAX_PAGE_ATTEMPTS` times in a row; a tailing run keeps trying.
    async fn back_off(
        &self,
        token: &CancellationToken,
        failures: u32,
        err: MigratorError,
    ) -> Result<bool, MigratorError> {
        if self.sleep_interval.is_zero() && failures >= MAX_PAGE_ATTEMPTS {
            return Err(err);
        }
        Ok(self
            .pause(token, self.sleep_interval.max(PAGE_RETRY_BACKOFF))
            .await)
    }

    /// Sleeps for `duration`. Returns false if cancelled meanwhile.
    async fn pause(&self, token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn publish(&self, events: &[InconsistentEvent]) {
        for event in events {
            if let Err(e) = self.producer.produce_inconsistent_event(event) {
                error!(
                    "Failed to publish {:?} event for {} id {}: {}",
                    event.event_type,
                    T::TABLE,
                    event.id,
                    e
                );
            }
        }
    }

    fn base_page_sql(&self) -> String {
        self.page_sql("*")
    }

    fn target_keys_sql(&self) -> String {
        self.page_sql(&format!("id, {}", quote_ident(T::UTIME_COLUMN)))
    }

    fn page_sql(&self, columns: &str) -> String {
        let table = quote_ident(T::TABLE);
        match self.mode {
            ScanMode::Full => format!(
                "SELECT {} FROM {} WHERE id > ? ORDER BY id LIMIT ?",
                columns, table
            ),
            ScanMode::Incremental => {
                let utime = quote_ident(T::UTIME_COLUMN);
                format!(
                    "SELECT {} FROM {} WHERE ({}, id) > (?, ?) ORDER BY {}, id LIMIT ?",
                    columns, table, utime, utime
                )
            }
        }
    }

    fn page_args(&self, cursor: &Cursor) -> Vec<Value> {
        let mut args = Vec::with_capacity(3);
        if self.mode == ScanMode::Incremental {
            args.push(Value::Integer(cursor.utime));
        }
        args.push(Value::Integer(cursor.id));
        args.push(Value::Integer(self.batch_size));
        args
    }
}

async fn run_blocking<R, F>(store: &Store, f: F) -> Result<R, MigratorError>
where
    F: FnOnce(Store) -> Result<R, MigratorError> + Send + 'static,
    R: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store)).await?
}

/// Looks up each base row in target. A failed lookup is logged and skipped.
fn compare_with_target<T: Entity>(
    target: &Store,
    direction: Direction,
    rows: &[T],
) -> Vec<InconsistentEvent> {
    let sql = format!("SELECT * FROM {} WHERE id = ?", quote_ident(T::TABLE));
    let mut events = Vec::new();

    for row in rows {
        match target.query_row(&sql, &[Value::Integer(row.id())], T::from_row) {
            Ok(None) => events.push(InconsistentEvent::new(
                row.id(),
                direction,
                EventType::TargetMissing,
            )),
            Ok(Some(target_row)) => {
                if !row.compare_to(&target_row) {
                    events.push(InconsistentEvent::new(row.id(), direction, EventType::Neq));
                }
            }
            Err(e) => {
                error!(
                    "Failed to look up {} id {} in '{}': {}",
                    T::TABLE,
                    row.id(),
                    target.name(),
                    e
                );
            }
        }
    }

    events
}

/// Ids from `ids` with no row in `base`, by set difference on id.
fn missing_from_base(base: &Store, table: &str, ids: &[i64]) -> Result<Vec<i64>, MigratorError> {
    let mut found = HashSet::with_capacity(ids.len());

    for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT id FROM {} WHERE id IN ({})",
            quote_ident(table),
            placeholders
        );
        let args: Vec<Value> = chunk.iter().map(|id| Value::Integer(*id)).collect();
        found.extend(base.query(&sql, &args, |row| row.get::<_, i64>(0))?);
    }

    Ok(ids.iter().copied().filter(|id| !found.contains(id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactive::Interactive;
    use crate::migrator::test_support::{
        insert_interactive, interactive, RecordingProducer, StorePair,
    };
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn validator(
        pair: &StorePair,
        producer: &Arc<RecordingProducer>,
    ) -> Validator<Interactive> {
        Validator::new(
            pair.src.clone(),
            pair.dst.clone(),
            Direction::Src,
            producer.clone(),
        )
    }

    fn evt(id: i64, event_type: EventType) -> InconsistentEvent {
        InconsistentEvent::new(id, Direction::Src, event_type)
    }

    #[test]
    fn test_cursor_restart_cycle() {
        let mut cursor = Cursor::new(ScanMode::Incremental, 100);
        cursor.advance(180, 7);
        assert_eq!((cursor.utime, cursor.id), (180, 7));

        let mut full = cursor.clone();
        full.restart_cycle(ScanMode::Full);
        assert_eq!(full, cursor);

        cursor.restart_cycle(ScanMode::Incremental);
        assert_eq!((cursor.utime, cursor.id), (179, i64::MAX));

        // An idle cycle does not move the key again
        cursor.restart_cycle(ScanMode::Incremental);
        assert_eq!((cursor.utime, cursor.id), (179, i64::MAX));
    }

    #[test]
    fn test_cursor_restart_without_rows_keeps_watermark() {
        let mut cursor = Cursor::new(ScanMode::Incremental, 100);
        cursor.restart_cycle(ScanMode::Incremental);
        assert_eq!((cursor.utime, cursor.id), (100, i64::MAX));

        let mut cursor = Cursor::new(ScanMode::Incremental, i64::MIN);
        cursor.advance(i64::MIN, 1);
        cursor.restart_cycle(ScanMode::Incremental);
        assert_eq!(cursor.utime, i64::MIN);
    }

    #[tokio::test]
    async fn test_full_scan_finds_missing_and_unequal_rows() {
        let pair = StorePair::new();
        for row in [interactive(1, 10, 1), interactive(2, 20, 1), interactive(3, 30, 1)] {
            insert_interactive(&pair.src, &row);
        }
        insert_interactive(&pair.dst, &interactive(1, 10, 1));
        insert_interactive(&pair.dst, &interactive(3, 31, 1));

        let producer = Arc::new(RecordingProducer::default());
        validator(&pair, &producer)
            .validate(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            producer.sorted(),
            vec![evt(2, EventType::TargetMissing), evt(3, EventType::Neq)]
        );
    }

    #[tokio::test]
    async fn test_full_scan_finds_rows_missing_from_base() {
        let pair = StorePair::new();
        for id in [1, 2] {
            insert_interactive(&pair.src, &interactive(id, 1, 1));
        }
        for id in [1, 2, 9] {
            insert_interactive(&pair.dst, &interactive(id, 1, 1));
        }

        let producer = Arc::new(RecordingProducer::default());
        validator(&pair, &producer)
            .validate(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(producer.sorted(), vec![evt(9, EventType::BaseMissing)]);
    }

    #[tokio::test]
    async fn test_full_scan_pages_through_partial_last_page() {
        let pair = StorePair::new();
        for id in 1..=7 {
            insert_interactive(&pair.src, &interactive(id, id, 1));
        }

        let producer = Arc::new(RecordingProducer::default());
        validator(&pair, &producer)
            .batch_size(3)
            .validate(&CancellationToken::new())
            .await
            .unwrap();

        let expected: Vec<_> = (1..=7).map(|id| evt(id, EventType::TargetMissing)).collect();
        assert_eq!(producer.sorted(), expected);
    }

    #[tokio::test]
    async fn test_events_carry_base_direction() {
        let pair = StorePair::new();
        insert_interactive(&pair.dst, &interactive(4, 1, 1));

        let producer = Arc::new(RecordingProducer::default());
        Validator::<Interactive>::new(
            pair.dst.clone(),
            pair.src.clone(),
            Direction::Dst,
            producer.clone(),
        )
        .validate(&CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(
            producer.sorted(),
            vec![InconsistentEvent::new(4, Direction::Dst, EventType::TargetMissing)]
        );
    }

    #[tokio::test]
    async fn test_incremental_scan_ignores_rows_at_or_below_watermark() {
        let pair = StorePair::new();
        insert_interactive(&pair.src, &interactive(1, 1, 100));
        insert_interactive(&pair.src, &interactive(2, 1, 200));
        insert_interactive(&pair.dst, &interactive(5, 1, 50));
        insert_interactive(&pair.dst, &interactive(6, 1, 300));

        let producer = Arc::new(RecordingProducer::default());
        validator(&pair, &producer)
            .incr()
            .utime(100)
            .validate(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            producer.sorted(),
            vec![evt(2, EventType::TargetMissing), evt(6, EventType::BaseMissing)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_returns_ok() {
        let pair = StorePair::new();
        insert_interactive(&pair.src, &interactive(1, 1, 1));

        let token = CancellationToken::new();
        token.cancel();

        let producer = Arc::new(RecordingProducer::default());
        validator(&pair, &producer).validate(&token).await.unwrap();

        assert!(producer.sorted().is_empty());
    }

    #[tokio::test]
    async fn test_tailing_scan_stops_cleanly_on_cancel() {
        let pair = StorePair::new();
        let producer = Arc::new(RecordingProducer::default());
        let validator = Arc::new(
            validator(&pair, &producer)
                .incr()
                .sleep_interval(Duration::from_secs(3600)),
        );

        let token = CancellationToken::new();
        let handle = {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move { validator.validate(&token).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("validator did not stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_tailing_scan_picks_up_later_updates() {
        let pair = StorePair::new();
        insert_interactive(&pair.src, &interactive(1, 1, 100));
        insert_interactive(&pair.dst, &interactive(1, 1, 100));

        let producer = Arc::new(RecordingProducer::default());
        let validator = Arc::new(
            validator(&pair, &producer)
                .incr()
                .sleep_interval(Duration::from_millis(20)),
        );

        let token = CancellationToken::new();
        let handle = {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move { validator.validate(&token).await })
        };

        // Let the first cycle drain, then diverge an existing row
        tokio::time::sleep(Duration::from_millis(100)).await;
        pair.src
            .exec(
                "UPDATE interactives SET read_cnt = 2, u_time = 500 WHERE id = 1",
                &[],
            )
            .unwrap();

        let mut found = false;
        for _ in 0..100 {
            if producer.sorted().contains(&evt(1, EventType::Neq)) {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        token.cancel();
        handle.await.unwrap().unwrap();
        assert!(found, "update made while tailing was never reported");
    }

    #[tokio::test]
    async fn test_one_shot_scan_gives_up_on_unreadable_base() {
        let pair = StorePair::new();
        pair.src.execute_batch("DROP TABLE interactives").unwrap();
        insert_interactive(&pair.dst, &interactive(1, 1, 1));

        let producer = Arc::new(RecordingProducer::default());
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            validator(&pair, &producer).validate(&CancellationToken::new()),
        )
        .await
        .expect("one-shot scan kept retrying a page that can never load");

        assert!(matches!(result, Err(MigratorError::DatabaseError(_))));
        // The retries were spaced out rather than spinning
        assert!(started.elapsed() >= PAGE_RETRY_BACKOFF * (MAX_PAGE_ATTEMPTS - 1));
    }

    #[tokio::test]
    async fn test_tailing_scan_retries_unreadable_base_until_cancelled() {
        let pair = StorePair::new();
        pair.src.execute_batch("DROP TABLE interactives").unwrap();

        let producer = Arc::new(RecordingProducer::default());
        let validator = Arc::new(
            validator(&pair, &producer)
                .incr()
                .sleep_interval(Duration::from_millis(20)),
        );
        let token = CancellationToken::new();
        let handle = {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move { validator.validate(&token).await })
        };

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!handle.is_finished());
        token.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    /// Bumps one row's update time the first time anything is published,
    /// simulating an application write landing mid-cycle.
    struct UpdatingProducer {
        base: Store,
        bumped: std::sync::atomic::AtomicBool,
        inner: RecordingProducer,
    }

    impl Producer for UpdatingProducer {
        fn produce_inconsistent_event(&self, event: &InconsistentEvent) -> Result<(), MigratorError> {
            use std::sync::atomic::Ordering;
            if !self.bumped.swap(true, Ordering::SeqCst) {
                self.base
                    .exec("UPDATE interactives SET u_time = 40 WHERE id = 1", &[])?;
            }
            self.inner.produce_inconsistent_event(event)
        }
    }

    #[tokio::test]
    async fn test_tailing_scan_survives_update_during_cycle() {
        let pair = StorePair::new();
        for (id, u_time) in [(1, 10), (2, 20), (3, 30)] {
            insert_interactive(&pair.src, &interactive(id, 1, u_time));
        }

        let producer = Arc::new(UpdatingProducer {
            base: pair.src.clone(),
            bumped: std::sync::atomic::AtomicBool::new(false),
            inner: RecordingProducer::default(),
        });
        let validator = Arc::new(
            Validator::<Interactive>::new(
                pair.src.clone(),
                pair.dst.clone(),
                Direction::Src,
                producer.clone(),
            )
            .incr()
            .batch_size(1)
            .sleep_interval(Duration::from_millis(20)),
        );

        let token = CancellationToken::new();
        let handle = {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move { validator.validate(&token).await })
        };

        let mut reported = HashSet::new();
        for _ in 0..100 {
            reported = producer.inner.sorted().iter().map(|e| e.id).collect();
            if reported.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        token.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(reported, HashSet::from([1, 2, 3]));
    }

    #[test]
    fn test_missing_from_base_handles_more_ids_than_sqlite_variables() {
        let pair = StorePair::new();
        for id in [1, 20_000, 40_000] {
            insert_interactive(&pair.src, &interactive(id, 1, 1));
        }

        let ids: Vec<i64> = (1..=40_000).collect();
        let missing = missing_from_base(&pair.src, Interactive::TABLE, &ids).unwrap();

        assert_eq!(missing.len(), 39_997);
        assert!(!missing.contains(&1));
        assert!(!missing.contains(&20_000));
        assert!(!missing.contains(&40_000));
        assert_eq!(missing.first(), Some(&2));
    }

    fn run_full_scan(layout: &[(bool, bool, bool)]) -> Vec<InconsistentEvent> {
        let pair = StorePair::new();
        for (i, (in_base, in_target, differs)) in layout.iter().enumerate() {
            let id = i as i64 + 1;
            if *in_base {
                insert_interactive(&pair.src, &interactive(id, 10, 1));
            }
            if *in_target {
                let read_cnt = if *differs { 11 } else { 10 };
                insert_interactive(&pair.dst, &interactive(id, read_cnt, 1));
            }
        }

        let producer = Arc::new(RecordingProducer::default());
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime
            .block_on(
                validator(&pair, &producer)
                    .batch_size(4)
                    .validate(&CancellationToken::new()),
            )
            .unwrap();
        producer.sorted()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_full_scan_reports_exactly_the_divergent_rows(
            layout in prop::collection::vec((any::<bool>(), any::<bool>(), any::<bool>()), 0..20)
        ) {
            let mut expected = Vec::new();
            for (i, (in_base, in_target, differs)) in layout.iter().enumerate() {
                let id = i as i64 + 1;
                match (in_base, in_target) {
                    (true, false) => expected.push(evt(id, EventType::TargetMissing)),
                    (true, true) if *differs => expected.push(evt(id, EventType::Neq)),
                    (false, true) => expected.push(evt(id, EventType::BaseMissing)),
                    _ => {}
                }
            }
            expected.sort_by_key(|e| (e.event_type as u8, e.id));

            prop_assert_eq!(run_full_scan(&layout), expected);
        }
    }
}
