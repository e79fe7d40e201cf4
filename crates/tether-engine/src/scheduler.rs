//! Per-subject periodic checks.
//!
//! The [`Scheduler`] owns one [`ScheduledJob`] per monitored subject. Each
//! job is a ticker task on a `tokio::time::interval` whose period comes from
//! the subject's priority, plus a one-permit semaphore that bounds the
//! subject to a single in-flight check. A tick that finds the permit taken is
//! skipped, not queued.
//!
//! [`Scheduler::sync`] reconciles the job table with the active subject set;
//! [`Scheduler::start`] runs it immediately and then on a fixed period.
//! Manual checks go through [`Scheduler::run_now`], which takes the same
//! guard as the ticker.

use std::{
  collections::{HashMap, HashSet},
  future::Future,
  sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use serde::Serialize;
use tether_core::{
  cache::CacheStore,
  store::MonitorStore,
  subject::{Priority, Subject},
};
use tokio::{
  sync::{Semaphore, TryAcquireError},
  task::JoinHandle,
  time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  Result,
  cache::ActiveSubjectCache,
  config::{EngineConfig, PriorityIntervals},
  engine::{CheckOutcome, SubjectCheck},
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { m.lock().unwrap_or_else(|e| e.into_inner()) }

// ─── Jobs ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TickStats {
  fired:   AtomicU64,
  skipped: AtomicU64,
}

/// The runtime half of a monitored subject: its ticker and overlap guard.
struct ScheduledJob {
  priority: Priority,
  interval: Duration,
  ticker:   JoinHandle<()>,
  guard:    Arc<Semaphore>,
  stats:    Arc<TickStats>,
}

impl ScheduledJob {
  fn spawn<K>(subject_id: Uuid, priority: Priority, interval: Duration, check: Arc<K>) -> Self
  where
    K: SubjectCheck + 'static,
  {
    let guard = Arc::new(Semaphore::new(1));
    let stats = Arc::new(TickStats::default());

    let ticker = tokio::spawn({
      let guard = Arc::clone(&guard);
      let stats = Arc::clone(&stats);
      async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
          ticks.tick().await;
          let permit = match Arc::clone(&guard).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
              stats.skipped.fetch_add(1, Ordering::Relaxed);
              debug!(%subject_id, "previous check still running; tick skipped");
              continue;
            }
            Err(TryAcquireError::Closed) => break,
          };
          stats.fired.fetch_add(1, Ordering::Relaxed);

          let check = Arc::clone(&check);
          tokio::spawn(async move {
            let _permit = permit;
            match check.check(subject_id).await {
              Ok(outcome) => debug!(%subject_id, ?outcome, "scheduled check finished"),
              Err(e) => error!(%subject_id, error = %e, "scheduled check failed"),
            }
          });
        }
      }
    });

    Self { priority, interval, ticker, guard, stats }
  }

  /// Stop ticking, wait for an in-flight check, then close the guard so no
  /// further check can start.
  async fn stop(mut self) {
    self.ticker.abort();
    let _ = (&mut self.ticker).await;
    if let Ok(permit) = self.guard.acquire().await {
      self.guard.close();
      drop(permit);
    }
  }
}

impl Drop for ScheduledJob {
  fn drop(&mut self) { self.ticker.abort(); }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// What one [`Scheduler::sync`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub added:       usize,
  pub removed:     usize,
  pub rescheduled: usize,
  pub unchanged:   usize,
}

/// Runtime view of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
  pub subject_id:    Uuid,
  pub priority:      Priority,
  pub interval_ms:   u64,
  pub ticks_fired:   u64,
  pub ticks_skipped: u64,
  pub is_running:    bool,
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

struct Inner<S, C, K> {
  active:        ActiveSubjectCache<S, C>,
  check:         Arc<K>,
  intervals:     PriorityIntervals,
  sync_interval: Duration,
  jobs:          Mutex<HashMap<Uuid, ScheduledJob>>,
  sync_lock:     tokio::sync::Mutex<()>,
  sync_task:     Mutex<Option<JoinHandle<()>>>,
}

/// Owns the job table. Cloning shares it.
pub struct Scheduler<S, C, K> {
  inner: Arc<Inner<S, C, K>>,
}

impl<S, C, K> Clone for Scheduler<S, C, K> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<S, C, K> Scheduler<S, C, K>
where
  S: MonitorStore + 'static,
  C: CacheStore + 'static,
  K: SubjectCheck + 'static,
{
  pub fn new(store: Arc<S>, cache: Arc<C>, check: Arc<K>, config: &EngineConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self {
      inner: Arc::new(Inner {
        active: ActiveSubjectCache::new(store, cache, config.active_set_ttl()),
        check,
        intervals: config.intervals,
        sync_interval: config.sync_interval(),
        jobs: Mutex::new(HashMap::new()),
        sync_lock: tokio::sync::Mutex::new(()),
        sync_task: Mutex::new(None),
      }),
    })
  }

  /// Run [`sync`](Self::sync) now and then every sync interval, in the
  /// background. Calling it again restarts the loop.
  pub fn start(&self) {
    let this = self.clone();
    let period = self.inner.sync_interval;
    let handle = tokio::spawn(async move {
      let mut ticks = tokio::time::interval(period);
      ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        ticks.tick().await;
        if let Err(e) = this.sync().await {
          error!(error = %e, "active subject sync failed");
        }
        let purged = this.inner.active.purge_expired().await;
        if purged > 0 {
          debug!(purged, "expired cache entries dropped");
        }
      }
    });
    if let Some(previous) = lock(&self.inner.sync_task).replace(handle) {
      previous.abort();
    }
    info!(sync_interval_ms = period.as_millis() as u64, "scheduler started");
  }

  /// Stop the sync loop and cancel every job.
  pub async fn shutdown(&self) {
    let task = lock(&self.inner.sync_task).take();
    if let Some(task) = task {
      task.abort();
      let _ = task.await;
    }
    let cancelled = self.cancel_all().await;
    info!(cancelled, "scheduler stopped");
  }

  /// Reconcile the job table with the active subject set.
  pub async fn sync(&self) -> Result<SyncReport> {
    let _serial = self.inner.sync_lock.lock().await;

    let wanted: HashMap<Uuid, Subject> = self
      .inner
      .active
      .get()
      .await?
      .into_iter()
      .filter(Subject::is_eligible)
      .map(|s| (s.subject_id, s))
      .collect();

    let mut report = SyncReport::default();

    let stale: Vec<Uuid> = {
      let jobs = lock(&self.inner.jobs);
      jobs.keys().filter(|id| !wanted.contains_key(id)).copied().collect()
    };
    for subject_id in stale {
      if self.cancel(subject_id).await {
        report.removed += 1;
      }
    }

    for subject in wanted.values() {
      let current = lock(&self.inner.jobs).get(&subject.subject_id).map(|j| j.priority);
      match current {
        None => {
          self.schedule_one(subject).await;
          report.added += 1;
        }
        Some(priority) if priority != subject.priority => {
          self.schedule_one(subject).await;
          report.rescheduled += 1;
        }
        Some(_) => report.unchanged += 1,
      }
    }

    info!(
      added = report.added,
      removed = report.removed,
      rescheduled = report.rescheduled,
      unchanged = report.unchanged,
      "active subjects synchronised"
    );
    Ok(report)
  }

  /// (Re)start the ticker for `subject` at its priority's interval. Returns
  /// that interval.
  pub async fn schedule_one(&self, subject: &Subject) -> Duration {
    self.cancel(subject.subject_id).await;

    let interval = self.inner.intervals.interval(subject.priority);
    let job = ScheduledJob::spawn(
      subject.subject_id,
      subject.priority,
      interval,
      Arc::clone(&self.inner.check),
    );
    let displaced = lock(&self.inner.jobs).insert(subject.subject_id, job);
    if let Some(displaced) = displaced {
      warn!(subject_id = %subject.subject_id, "replaced a concurrently scheduled job");
      displaced.stop().await;
    }

    info!(
      subject_id = %subject.subject_id,
      priority = ?subject.priority,
      interval_ms = interval.as_millis() as u64,
      "subject scheduled"
    );
    interval
  }

  /// Stop checking `subject_id`. Returns `false` if it had no job.
  ///
  /// Completes only after any in-flight check for the subject has finished.
  pub async fn cancel(&self, subject_id: Uuid) -> bool {
    let job = lock(&self.inner.jobs).remove(&subject_id);
    let Some(job) = job else {
      return false;
    };
    job.stop().await;
    info!(%subject_id, "subject unscheduled");
    true
  }

  /// Cancel every job and return how many there were.
  pub async fn cancel_all(&self) -> usize {
    let jobs: Vec<ScheduledJob> = lock(&self.inner.jobs).drain().map(|(_, job)| job).collect();
    let count = jobs.len();
    for job in jobs {
      job.stop().await;
    }
    count
  }

  /// Check `subject_id` now, outside its schedule.
  ///
  /// Holds the subject's job guard for the duration, so this waits for an
  /// in-flight scheduled check and the ticker skips while it runs. A subject
  /// without a job is checked directly.
  pub async fn run_now(&self, subject_id: Uuid) -> Result<CheckOutcome> {
    let _permit = loop {
      let guard = lock(&self.inner.jobs).get(&subject_id).map(|job| Arc::clone(&job.guard));
      let Some(guard) = guard else {
        break None;
      };
      // A closed guard belongs to a job already removed from the table.
      if let Ok(permit) = guard.acquire_owned().await {
        break Some(permit);
      }
    };
    debug!(%subject_id, "manual check");
    self.inner.check.check(subject_id).await
  }

  /// Drop the cached active set so the next sync reads the store.
  pub async fn invalidate_active_set(&self) { self.inner.active.invalidate().await; }

  pub fn scheduled(&self) -> HashSet<Uuid> { lock(&self.inner.jobs).keys().copied().collect() }

  pub fn snapshots(&self) -> Vec<JobSnapshot> {
    let jobs = lock(&self.inner.jobs);
    let mut rows: Vec<JobSnapshot> = jobs
      .iter()
      .map(|(subject_id, job)| JobSnapshot {
        subject_id:    *subject_id,
        priority:      job.priority,
        interval_ms:   job.interval.as_millis() as u64,
        ticks_fired:   job.stats.fired.load(Ordering::Relaxed),
        ticks_skipped: job.stats.skipped.load(Ordering::Relaxed),
        is_running:    job.guard.available_permits() == 0,
      })
      .collect();
    rows.sort_by_key(|r| r.subject_id);
    rows
  }
}

impl<S, C, K> SubjectCheck for Scheduler<S, C, K>
where
  S: MonitorStore + 'static,
  C: CacheStore + 'static,
  K: SubjectCheck + 'static,
{
  fn check(&self, subject_id: Uuid) -> impl Future<Output = Result<CheckOutcome>> + Send + '_ {
    self.run_now(subject_id)
  }
}

#[cfg(test)]
mod tests {
  use tether_core::subject::NewSubject;

  use super::*;
  use crate::{
    cache::MemoryCache,
    testing::{CountingCheck, MemoryStore},
  };

  type TestScheduler = Scheduler<MemoryStore, MemoryCache, CountingCheck>;

  fn scheduler(store: Arc<MemoryStore>, check: Arc<CountingCheck>) -> TestScheduler {
    Scheduler::new(store, Arc::new(MemoryCache::new()), check, &EngineConfig::default()).unwrap()
  }

  async fn subject(store: &MemoryStore, priority: Priority) -> Subject {
    let mut input = NewSubject::new("S", "device");
    input.priority = priority;
    store.add_subject(input).await.unwrap()
  }

  async fn wait(secs: u64) { tokio::time::sleep(Duration::from_secs(secs)).await; }

  #[tokio::test(start_paused = true)]
  async fn slow_check_skips_overlapping_ticks() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::new(Duration::from_secs(40));
    let scheduler = scheduler(store.clone(), check.clone());
    let s = subject(&store, Priority::High).await;

    assert_eq!(scheduler.schedule_one(&s).await, Duration::from_secs(15));
    // Ticks at 15 (runs until 55), 30 and 45 (skipped), 60 (runs).
    wait(61).await;

    let snap = &scheduler.snapshots()[0];
    assert_eq!(snap.ticks_fired, 2);
    assert_eq!(snap.ticks_skipped, 2);
    assert!(snap.is_running);
    assert_eq!(check.max_in_flight(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_waits_for_in_flight_check() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::new(Duration::from_secs(10));
    let scheduler = scheduler(store.clone(), check.clone());
    let s = subject(&store, Priority::High).await;

    scheduler.schedule_one(&s).await;
    wait(16).await;
    assert_eq!(check.started(), 1);
    assert_eq!(check.finished(), 0);

    assert!(scheduler.cancel(s.subject_id).await);
    assert_eq!(check.finished(), 1);

    wait(120).await;
    assert_eq!(check.started(), 1);
    assert!(!scheduler.cancel(s.subject_id).await);
  }

  #[tokio::test(start_paused = true)]
  async fn sync_tracks_the_active_set() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::new(Duration::from_millis(100));
    let scheduler = scheduler(store.clone(), check.clone());
    let a = subject(&store, Priority::High).await;
    let b = subject(&store, Priority::Medium).await;

    let report = scheduler.sync().await.unwrap();
    assert_eq!(report, SyncReport { added: 2, ..Default::default() });

    store.set_priority(a.subject_id, Priority::Low).await.unwrap();
    // Still cached: nothing changes until the active set is invalidated.
    assert_eq!(scheduler.sync().await.unwrap().unchanged, 2);

    scheduler.invalidate_active_set().await;
    let report = scheduler.sync().await.unwrap();
    assert_eq!(report, SyncReport { rescheduled: 1, unchanged: 1, ..Default::default() });
    let snap = scheduler.snapshots().into_iter().find(|j| j.subject_id == a.subject_id).unwrap();
    assert_eq!(snap.priority, Priority::Low);
    assert_eq!(snap.interval_ms, 60_000);

    store.set_monitoring(b.subject_id, false).await.unwrap();
    scheduler.invalidate_active_set().await;
    let report = scheduler.sync().await.unwrap();
    assert_eq!(report, SyncReport { removed: 1, unchanged: 1, ..Default::default() });
    assert_eq!(scheduler.scheduled(), HashSet::from([a.subject_id]));
  }

  #[tokio::test(start_paused = true)]
  async fn disabled_subject_gets_no_further_checks() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::new(Duration::from_secs(1));
    let scheduler = scheduler(store.clone(), check.clone());
    let a = subject(&store, Priority::High).await;
    let b = subject(&store, Priority::High).await;

    scheduler.sync().await.unwrap();
    wait(31).await;
    assert_eq!(check.checks_for(a.subject_id), 2);

    store.set_monitoring(a.subject_id, false).await.unwrap();
    scheduler.invalidate_active_set().await;
    scheduler.sync().await.unwrap();
    let frozen = check.checks_for(a.subject_id);

    wait(60).await;
    assert_eq!(check.checks_for(a.subject_id), frozen);
    assert!(check.checks_for(b.subject_id) >= 6);
  }

  #[tokio::test(start_paused = true)]
  async fn failing_checks_do_not_stop_the_ticker() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::failing(Duration::from_millis(10));
    let scheduler = scheduler(store.clone(), check.clone());
    let s = subject(&store, Priority::High).await;

    scheduler.schedule_one(&s).await;
    wait(46).await;
    assert_eq!(check.started(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn start_then_shutdown() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::new(Duration::from_secs(1));
    let scheduler = scheduler(store.clone(), check.clone());
    subject(&store, Priority::Low).await;
    subject(&store, Priority::Medium).await;

    scheduler.start();
    wait(1).await;
    assert_eq!(scheduler.scheduled().len(), 2);

    scheduler.shutdown().await;
    assert!(scheduler.scheduled().is_empty());
    let started = check.started();
    wait(600).await;
    assert_eq!(check.started(), started);
  }

  #[tokio::test(start_paused = true)]
  async fn manual_check_waits_for_the_scheduled_one() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::new(Duration::from_secs(10));
    let scheduler = scheduler(store.clone(), check.clone());
    let s = subject(&store, Priority::High).await;

    scheduler.schedule_one(&s).await;
    wait(16).await;
    assert_eq!(check.started(), 1);

    let manual = tokio::spawn({
      let scheduler = scheduler.clone();
      async move { scheduler.check(s.subject_id).await }
    });
    wait(5).await;
    assert_eq!(check.started(), 1);

    // The scheduled check ends at 25; the manual one then holds the guard
    // past the tick at 30.
    assert_eq!(manual.await.unwrap().unwrap(), CheckOutcome::NoZones);
    assert_eq!(check.started(), 2);
    assert_eq!(check.max_in_flight(), 1);
    assert_eq!(scheduler.snapshots()[0].ticks_skipped, 1);
  }

  #[tokio::test]
  async fn manual_check_of_unscheduled_subject_runs_directly() {
    let store = Arc::new(MemoryStore::default());
    let check = CountingCheck::new(Duration::ZERO);
    let scheduler = scheduler(store.clone(), check.clone());
    let id = Uuid::new_v4();

    assert_eq!(scheduler.run_now(id).await.unwrap(), CheckOutcome::NoZones);
    assert_eq!(check.checks_for(id), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn sync_loop_purges_expired_cache_entries() {
    let store = Arc::new(MemoryStore::default());
    let cache = Arc::new(MemoryCache::new());
    let check = CountingCheck::new(Duration::ZERO);
    let scheduler =
      Scheduler::new(store.clone(), cache.clone(), check, &EngineConfig::default()).unwrap();
    cache.set("user_safe_zones_gone", "[]".into(), Duration::from_secs(1)).await.unwrap();

    scheduler.start();
    wait(1).await;
    // The active set plus the short-lived entry.
    assert_eq!(cache.len(), 2);

    wait(300).await;
    assert_eq!(cache.len(), 1);
    scheduler.shutdown().await;
  }

  #[tokio::test]
  async fn zero_interval_config_is_rejected() {
    let mut config = EngineConfig::default();
    config.intervals.high_ms = 0;
    let result = Scheduler::new(
      Arc::new(MemoryStore::default()),
      Arc::new(MemoryCache::new()),
      CountingCheck::new(Duration::ZERO),
      &config,
    );
    assert!(result.is_err());
  }
}
