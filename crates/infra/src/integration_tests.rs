//! Integration tests for the scheduler across several instances.
//!
//! Instances share one in-memory coordination store and one booking
//! repository; time is driven by a manual clock and ticks are invoked
//! directly, so every scenario is deterministic.
//!
//! Verifies:
//! - the fail-safe watchdog executes jobs when no leader exists
//! - a crashed leader does not cost a deadline
//! - at most one live leader at a time
//! - repeated execution is a no-op
//! - cancellation racing with execution is a no-op
//! - the reconciler recovers jobs lost from the queue
//! - a booking written concurrently keeps its job queued until it applies
//! - the processor task stops once the lease is lost

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    use stationhub_booking::{
        Booking, BookingRepository, BookingStatus, CancelledBy, Contact,
        InMemoryBookingRepository, NewBooking, NoticeKind, NotificationChannel, RepositoryError,
    };
    use stationhub_core::{
        AggregateRoot, BookingId, Clock, DisplayTimezone, ExpectedVersion, InstanceId,
        ManualClock, StationId, UserId,
    };
    use stationhub_events::{EventBus, InMemoryEventBus, Subscription};

    use crate::config::SchedulerConfig;
    use crate::coordination::{CoordinationStore, InMemoryCoordinationStore};
    use crate::scheduler::{
        BookingJobExecutor, EmailTemplate, ExecutionError, ExecutionOutcome, Job, JobEventPublisher,
        JobExecutor, JobId, JobType, KeySpace, NotificationScheduler, RecordingNotificationSender,
        SchedulerDeps, SchedulerEvent, SharedStore, SkipReason, Transition,
    };

    const PREFIX: &str = "it";

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryCoordinationStore>,
        bookings: Arc<InMemoryBookingRepository>,
        sender: Arc<RecordingNotificationSender>,
        bus: Arc<InMemoryEventBus<SchedulerEvent>>,
    }

    impl Harness {
        fn new() -> Self {
            stationhub_observability::init_for_tests();
            let clock = Arc::new(ManualClock::new(t0()));
            Self {
                store: InMemoryCoordinationStore::arc(clock.clone()),
                clock,
                bookings: InMemoryBookingRepository::arc(),
                sender: RecordingNotificationSender::arc(),
                bus: Arc::new(InMemoryEventBus::new()),
            }
        }

        fn config(&self) -> SchedulerConfig {
            SchedulerConfig {
                key_prefix: PREFIX.to_string(),
                ..SchedulerConfig::default()
            }
        }

        fn executor(&self) -> Arc<BookingJobExecutor> {
            Arc::new(BookingJobExecutor::new(
                self.bookings.clone(),
                self.sender.clone(),
                self.clock.clone(),
                DisplayTimezone::utc(),
            ))
        }

        fn instance(&self, name: &str) -> Arc<NotificationScheduler> {
            self.instance_with(name, self.config(), self.executor())
        }

        fn instance_with(
            &self,
            name: &str,
            config: SchedulerConfig,
            executor: Arc<dyn JobExecutor>,
        ) -> Arc<NotificationScheduler> {
            let store: SharedStore = self.store.clone();
            let deps = SchedulerDeps {
                store,
                bookings: self.bookings.clone(),
                executor,
                events: Arc::new(JobEventPublisher::new(self.bus.clone())),
                clock: self.clock.clone(),
            };
            Arc::new(NotificationScheduler::new(config, InstanceId::from(name), deps).unwrap())
        }

        fn events(&self) -> Subscription<SchedulerEvent> {
            self.bus.subscribe()
        }

        /// Store a confirmed booking starting `start_in` from now.
        fn book(&self, start_in: Duration, grace: Duration) -> Booking {
            let mut booking = self.draft(start_in, grace);
            self.bookings.save(&mut booking, ExpectedVersion::Any).unwrap();
            booking
        }

        /// A confirmed booking that is never stored.
        fn draft(&self, start_in: Duration, grace: Duration) -> Booking {
            let start = self.clock.now() + TimeDelta::from_std(start_in).unwrap();
            Booking::confirm(NewBooking {
                id: BookingId::new(),
                user_id: UserId::new(),
                station_id: StationId::new(),
                contact: Contact {
                    name: "Grace".to_string(),
                    email: Some("grace@example.com".to_string()),
                    phone: Some("+15550100".to_string()),
                },
                start_time: start,
                end_time: start + TimeDelta::hours(1),
                grace_period: Some(TimeDelta::from_std(grace).unwrap()),
            })
            .unwrap()
        }

        fn reload(&self, id: BookingId) -> Booking {
            self.bookings.find_by_id(id).unwrap().unwrap()
        }

        fn update(&self, id: BookingId, f: impl FnOnce(&mut Booking)) {
            let mut booking = self.reload(id);
            f(&mut booking);
            let expected = ExpectedVersion::Exact(booking.version());
            self.bookings.save(&mut booking, expected).unwrap();
        }

        fn check_in(&self, id: BookingId) {
            let now = self.clock.now();
            self.update(id, |b| b.check_in(now).unwrap());
        }

        fn cancel(&self, id: BookingId) {
            let now = self.clock.now();
            self.update(id, |b| b.cancel(now, "user_cancelled", CancelledBy::User).unwrap());
        }
    }

    // ---------------------------------------------------------------------
    // Fail-safe path
    // ---------------------------------------------------------------------

    #[test]
    fn watchdog_runs_both_jobs_without_any_leader() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(30));

        let scheduled = node.schedule_notifications(&booking);
        assert_eq!(scheduled.len(), 2);
        assert_eq!(node.queue().len().unwrap(), 2);

        // No leadership tick ever runs; one watchdog cycle later.
        h.clock.advance(secs(60));
        let summary = node.watchdog_tick().unwrap();

        assert_eq!(summary.applied, 2);
        assert!(node.queue().is_empty().unwrap());
        let after = h.reload(booking.id_typed());
        assert_eq!(after.status(), BookingStatus::Expired);
        assert!(after.is_slot_started());
        assert_eq!(after.cancellation().unwrap().reason, "no_show");
        assert_eq!(h.sender.emails(EmailTemplate::SlotStarted), 1);
        assert_eq!(h.sender.emails(EmailTemplate::NoShowExpired), 1);
    }

    #[test]
    fn watchdog_leaves_checked_in_booking_active() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(30));
        node.schedule_notifications(&booking);

        h.clock.advance(secs(10));
        h.check_in(booking.id_typed());
        h.clock.advance(secs(50));

        let summary = node.watchdog_tick().unwrap();
        assert_eq!(summary.skipped, 2);
        assert!(node.queue().is_empty().unwrap());
        assert_eq!(h.reload(booking.id_typed()).status(), BookingStatus::Active);
        assert!(h.sender.all().is_empty());
    }

    #[test]
    fn watchdog_ignores_jobs_within_grace_delta() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(30));
        node.schedule_notifications(&booking);

        // Start job is 8s overdue, under the 15s grace delta.
        h.clock.advance(secs(10));
        let summary = node.watchdog_tick().unwrap();
        assert_eq!(summary.completed(), 0);
        assert_eq!(node.queue().len().unwrap(), 2);
    }

    #[test]
    fn watchdog_stays_idle_while_a_leader_exists() {
        let h = Harness::new();
        let leader = h.instance("a");
        let standby = h.instance("b");
        assert_eq!(leader.leadership_tick(), Some(Transition::Promoted));

        let booking = h.book(secs(2), secs(30));
        leader.schedule_notifications(&booking);
        h.clock.advance(secs(20));
        assert_eq!(leader.leadership_tick(), None);

        let idle = standby.watchdog_tick().unwrap();
        assert_eq!(idle.completed(), 0);
        assert_eq!(standby.queue().len().unwrap(), 2);

        // The leader's processor handles the due start job.
        let summary = leader.processor_tick().unwrap();
        assert_eq!(summary.applied, 1);
        assert!(h.reload(booking.id_typed()).is_slot_started());
        assert_eq!(leader.queue().len().unwrap(), 1);
    }

    #[test]
    fn failing_jobs_do_not_block_the_watchdog_batch() {
        let h = Harness::new();
        let config = SchedulerConfig {
            processor_batch_size: 10,
            ..h.config()
        };
        let node = h.instance_with("a", config, h.executor());

        // A head of jobs whose bookings were deleted.
        for _ in 0..20 {
            let ghost = h.draft(Duration::ZERO, secs(3600));
            node.queue().enqueue(&Job::slot_start(&ghost)).unwrap();
        }
        h.clock.advance(secs(60));
        let booking = h.book(secs(1), secs(600));
        node.schedule_notifications(&booking);

        h.clock.advance(secs(60));
        let summary = node.watchdog_tick().unwrap();
        assert_eq!(summary.failed, 20);
        assert_eq!(summary.applied, 1);
        assert!(h.reload(booking.id_typed()).is_slot_started());
    }

    // ---------------------------------------------------------------------
    // Leadership
    // ---------------------------------------------------------------------

    #[test]
    fn processor_only_runs_on_the_leader() {
        let h = Harness::new();
        let a = h.instance("a");
        let b = h.instance("b");
        let booking = h.book(secs(2), secs(30));
        a.schedule_notifications(&booking);

        a.leadership_tick();
        b.leadership_tick();
        h.clock.advance(secs(5));

        assert_eq!(b.processor_tick().unwrap().completed(), 0);
        assert_eq!(a.processor_tick().unwrap().applied, 1);
    }

    #[test]
    fn crashed_leader_does_not_cost_a_deadline() {
        let h = Harness::new();
        let a = h.instance("a");
        let b = h.instance("b");
        assert!(a.leadership_tick().is_some());

        // a dies right after acquiring the lease; nothing of it runs again.
        let booking = h.book(secs(1), secs(600));
        b.schedule_notifications(&booking);

        // Within one watchdog interval the lease has expired and b's
        // watchdog picks the job up.
        h.clock.advance(secs(60));
        assert_eq!(b.stats().unwrap().current_leader_id, None);
        let summary = b.watchdog_tick().unwrap();
        assert_eq!(summary.applied, 1);
        assert!(h.reload(booking.id_typed()).is_slot_started());
    }

    #[test]
    fn standby_takes_over_processing_after_failover() {
        let h = Harness::new();
        let a = h.instance("a");
        let b = h.instance("b");
        assert_eq!(a.leadership_tick(), Some(Transition::Promoted));
        assert_eq!(b.leadership_tick(), None);

        let booking = h.book(secs(5), secs(600));
        a.schedule_notifications(&booking);

        // a crashes; b keeps ticking every 2s until the lease is free.
        let mut promoted_after = None;
        for step in 1..=20 {
            h.clock.advance(secs(2));
            if b.leadership_tick() == Some(Transition::Promoted) {
                promoted_after = Some(step * 2);
                break;
            }
        }
        let promoted_after = promoted_after.expect("standby never promoted");
        assert!(promoted_after <= 32);

        assert_eq!(b.processor_tick().unwrap().applied, 1);
        assert!(h.reload(booking.id_typed()).is_slot_started());
    }

    #[test]
    fn at_most_one_live_leader() {
        let h = Harness::new();
        let nodes: Vec<_> = ["a", "b", "c"].iter().map(|n| h.instance(n)).collect();
        let mut alive = vec![true; nodes.len()];

        for round in 0..60 {
            if round == 20 {
                // Kill whoever leads.
                let leader = nodes.iter().position(|n| n.is_leader()).unwrap();
                alive[leader] = false;
            }

            for (node, live) in nodes.iter().zip(&alive) {
                if *live {
                    node.leadership_tick();
                }
            }

            let live_leaders = nodes
                .iter()
                .zip(&alive)
                .filter(|(n, live)| **live && n.is_leader())
                .count();
            assert!(live_leaders <= 1, "round {round}: {live_leaders} leaders");
            if round < 20 || round > 36 {
                assert_eq!(live_leaders, 1, "round {round}");
            }

            h.clock.advance(secs(2));
        }
    }

    #[test]
    fn shutdown_releases_the_lease() {
        let h = Harness::new();
        let a = h.instance("a");
        let b = h.instance("b");
        a.leadership_tick();

        a.shutdown();
        assert!(!a.is_leader());
        assert_eq!(b.leadership_tick(), Some(Transition::Promoted));
    }

    // ---------------------------------------------------------------------
    // Idempotence and races
    // ---------------------------------------------------------------------

    #[test]
    fn executing_a_job_twice_changes_nothing() {
        let h = Harness::new();
        let a = h.instance("a");
        let booking = h.book(secs(2), secs(600));
        a.schedule_notifications(&booking);
        a.leadership_tick();

        h.clock.advance(secs(5));
        assert_eq!(a.processor_tick().unwrap().applied, 1);
        let after_first = h.reload(booking.id_typed());

        // Re-scheduling and a second path running the same job.
        let job = Job::slot_start(&booking);
        a.queue().enqueue(&job).unwrap();
        h.clock.advance(secs(60));
        let replay = a.processor_tick().unwrap();
        assert_eq!(replay.skipped, 1);
        assert_eq!(
            h.executor().execute(&job).unwrap(),
            ExecutionOutcome::Skipped(SkipReason::AlreadyApplied)
        );

        assert_eq!(
            h.reload(booking.id_typed()).slot_started_at(),
            after_first.slot_started_at()
        );
        assert_eq!(h.sender.emails(EmailTemplate::SlotStarted), 1);
        assert_eq!(h.sender.sms_count(), 1);
    }

    #[test]
    fn concurrent_paths_share_one_claim() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(30));
        node.schedule_notifications(&booking);
        h.clock.advance(secs(60));

        // Another process holds the start job's lock.
        let start_id = JobId::for_booking(JobType::SlotStart, booking.id_typed());
        h.store
            .set_if_absent(&KeySpace::new(PREFIX).lock(&start_id), "other", secs(30))
            .unwrap();

        let summary = node.watchdog_tick().unwrap();
        assert_eq!(summary.claimed_elsewhere, 1);
        assert!(node.queue().contains(&start_id).unwrap());
    }

    /// Cancels the booking after the claim lock is taken, then executes.
    struct CancelBeforeExecute {
        inner: Arc<BookingJobExecutor>,
        bookings: Arc<InMemoryBookingRepository>,
        clock: Arc<ManualClock>,
    }

    impl JobExecutor for CancelBeforeExecute {
        fn execute(&self, job: &Job) -> Result<ExecutionOutcome, ExecutionError> {
            let mut booking = self.bookings.find_by_id(job.booking_id).unwrap().unwrap();
            if booking.status() == BookingStatus::Confirmed {
                booking
                    .cancel(self.clock.now(), "user_cancelled", CancelledBy::User)
                    .unwrap();
                let expected = ExpectedVersion::Exact(booking.version());
                self.bookings.save(&mut booking, expected).unwrap();
            }
            self.inner.execute(job)
        }
    }

    #[test]
    fn cancellation_after_claim_is_a_noop() {
        let h = Harness::new();
        let executor = Arc::new(CancelBeforeExecute {
            inner: h.executor(),
            bookings: h.bookings.clone(),
            clock: h.clock.clone(),
        });
        let node = h.instance_with("a", h.config(), executor);
        let booking = h.book(secs(2), secs(30));
        node.schedule_notifications(&booking);
        node.leadership_tick();

        h.clock.advance(secs(5));
        let summary = node.processor_tick().unwrap();

        assert_eq!(summary.skipped, 1);
        let after = h.reload(booking.id_typed());
        assert_eq!(after.status(), BookingStatus::Cancelled);
        assert!(!after.is_slot_started());
        assert!(!after.is_notified(NoticeKind::SlotStart, NotificationChannel::Email));
        assert!(h.sender.all().is_empty());

        // The grace job meets the same fate.
        h.clock.advance(secs(60));
        assert_eq!(node.processor_tick().unwrap().skipped, 1);
        assert_eq!(h.reload(booking.id_typed()).status(), BookingStatus::Cancelled);
        assert!(node.queue().is_empty().unwrap());
    }

    #[test]
    fn cancel_notifications_removes_pending_jobs() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(60), secs(300));
        node.schedule_notifications(&booking);

        h.cancel(booking.id_typed());
        assert_eq!(node.cancel_notifications(booking.id_typed()), 2);
        assert_eq!(node.cancel_notifications(booking.id_typed()), 0);
        assert!(node.queue().is_empty().unwrap());
    }

    #[test]
    fn scheduling_skips_past_deadlines_and_unconfirmed_bookings() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(60));

        h.clock.advance(secs(10));
        let scheduled = node.schedule_notifications(&booking);
        assert_eq!(
            scheduled,
            vec![JobId::for_booking(JobType::GraceExpiration, booking.id_typed())]
        );

        h.cancel(booking.id_typed());
        let cancelled = h.reload(booking.id_typed());
        assert!(node.schedule_notifications(&cancelled).is_empty());
    }

    #[test]
    fn scheduling_survives_store_outage() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(60), secs(60));

        h.store.set_available(false);
        assert!(node.schedule_notifications(&booking).is_empty());
        h.store.set_available(true);
        assert!(node.queue().is_empty().unwrap());
    }

    /// Writes an unrelated update to the stored booking before every
    /// version-checked save while `interfering` is set.
    struct BusyRepository {
        inner: Arc<InMemoryBookingRepository>,
        interfering: AtomicBool,
    }

    impl BookingRepository for BusyRepository {
        fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, RepositoryError> {
            self.inner.find_by_id(id)
        }

        fn save(&self, booking: &mut Booking, expected: ExpectedVersion) -> Result<(), RepositoryError> {
            if self.interfering.load(Ordering::SeqCst) && matches!(expected, ExpectedVersion::Exact(_)) {
                let mut stored = self.inner.find_by_id(booking.id_typed())?.unwrap();
                self.inner.save(&mut stored, ExpectedVersion::Any)?;
            }
            self.inner.save(booking, expected)
        }

        fn find_unstarted_before(
            &self,
            cutoff: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Booking>, RepositoryError> {
            self.inner.find_unstarted_before(cutoff, limit)
        }

        fn find_unexpired_before(
            &self,
            cutoff: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Booking>, RepositoryError> {
            self.inner.find_unexpired_before(cutoff, limit)
        }
    }

    #[test]
    fn concurrent_booking_writes_never_lose_a_deadline() {
        let h = Harness::new();
        let busy = Arc::new(BusyRepository {
            inner: h.bookings.clone(),
            interfering: AtomicBool::new(true),
        });
        let executor = Arc::new(BookingJobExecutor::new(
            busy.clone(),
            h.sender.clone(),
            h.clock.clone(),
            DisplayTimezone::utc(),
        ));
        let node = h.instance_with("a", h.config(), executor);
        let booking = h.book(secs(2), secs(600));
        node.schedule_notifications(&booking);
        node.leadership_tick();

        h.clock.advance(secs(5));
        let start_id = JobId::for_booking(JobType::SlotStart, booking.id_typed());
        let summary = node.processor_tick().unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed(), 0);
        assert!(node.queue().contains(&start_id).unwrap());
        assert!(
            h.store
                .get(&KeySpace::new(PREFIX).processed(&start_id))
                .unwrap()
                .is_none()
        );

        // Once the writes settle, the next tick applies the job.
        busy.interfering.store(false, Ordering::SeqCst);
        h.clock.advance(secs(1));
        assert_eq!(node.processor_tick().unwrap().applied, 1);
        assert!(h.reload(booking.id_typed()).is_slot_started());
        assert_eq!(h.sender.emails(EmailTemplate::SlotStarted), 1);
        assert!(!node.queue().contains(&start_id).unwrap());
    }

    // ---------------------------------------------------------------------
    // Reconciler
    // ---------------------------------------------------------------------

    #[test]
    fn reconciler_recovers_jobs_lost_from_the_queue() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(30));
        node.schedule_notifications(&booking);

        // Queue data loss.
        h.store.delete(&KeySpace::new(PREFIX).queue()).unwrap();
        assert!(node.queue().is_empty().unwrap());

        // Not yet past the reconcile lag.
        h.clock.advance(secs(60));
        assert_eq!(node.reconciler_tick().unwrap().completed(), 0);

        h.clock.advance(secs(5 * 60));
        let summary = node.reconciler_tick().unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(h.reload(booking.id_typed()).status(), BookingStatus::Expired);

        assert_eq!(node.reconciler_tick().unwrap().completed(), 0);
    }

    #[test]
    fn reconciler_respects_processed_markers() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(600));

        let start_id = JobId::for_booking(JobType::SlotStart, booking.id_typed());
        h.store
            .set(&KeySpace::new(PREFIX).processed(&start_id), "other", Some(secs(3600)))
            .unwrap();

        h.clock.advance(secs(6 * 60));
        assert_eq!(node.reconciler_tick().unwrap().completed(), 0);
        assert!(!h.reload(booking.id_typed()).is_slot_started());
    }

    #[test]
    fn reconciler_works_through_a_store_outage() {
        let h = Harness::new();
        let node = h.instance("a");
        let booking = h.book(secs(2), secs(30));
        node.schedule_notifications(&booking);

        h.clock.advance(secs(10 * 60));
        h.store.set_available(false);
        let summary = node.reconciler_tick().unwrap();

        // Both jobs ran; recording them in the store failed.
        assert_eq!(summary.store_errors, 2);
        assert_eq!(h.reload(booking.id_typed()).status(), BookingStatus::Expired);
        assert_eq!(h.sender.emails(EmailTemplate::NoShowExpired), 1);
    }

    // ---------------------------------------------------------------------
    // Failures, cleanup, events, stats
    // ---------------------------------------------------------------------

    #[test]
    fn failed_job_stays_queued_until_cleanup() {
        let h = Harness::new();
        let node = h.instance("a");
        let events = h.events();

        // A job whose booking no longer exists.
        let ghost = h.book(secs(2), secs(30));
        let mut job = Job::slot_start(&ghost);
        job.booking_id = BookingId::new();
        node.queue().enqueue(&job).unwrap();
        node.leadership_tick();

        h.clock.advance(secs(5));
        assert_eq!(node.processor_tick().unwrap().failed, 1);
        assert!(node.queue().contains(&job.id).unwrap());
        assert!(matches!(
            events.try_recv().unwrap(),
            SchedulerEvent::JobFailed { .. }
        ));

        h.clock.advance(secs(60));
        assert_eq!(node.processor_tick().unwrap().failed, 1);
        assert_eq!(node.cleanup_tick().unwrap(), 0);

        h.clock.advance(secs(24 * 60 * 60));
        assert_eq!(node.cleanup_tick().unwrap(), 1);
        assert!(node.queue().is_empty().unwrap());
        assert_eq!(node.stats().unwrap().counters.failed, 2);
    }

    #[test]
    fn completed_jobs_are_published() {
        let h = Harness::new();
        let node = h.instance("a");
        let events = h.events();
        let booking = h.book(secs(2), secs(30));
        node.schedule_notifications(&booking);

        h.clock.advance(secs(60));
        node.watchdog_tick().unwrap();

        let published = events.drain();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|e| matches!(
            e,
            SchedulerEvent::JobCompleted { applied: true, instance_id, .. }
                if instance_id == &InstanceId::from("a")
        )));
    }

    #[test]
    fn stats_report_leadership_and_backlog() {
        let h = Harness::new();
        let a = h.instance("a");
        let b = h.instance("b");
        a.leadership_tick();
        b.leadership_tick();
        a.schedule_notifications(&h.book(secs(60), secs(60)));

        let stats = b.stats().unwrap();
        assert_eq!(stats.instance_id, InstanceId::from("b"));
        assert!(!stats.is_leader);
        assert_eq!(stats.current_leader_id, Some(InstanceId::from("a")));
        assert_eq!(stats.pending_job_count, 2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["current_leader_id"], "a");
    }

    // ---------------------------------------------------------------------
    // Background tasks
    // ---------------------------------------------------------------------

    #[test]
    fn started_scheduler_processes_due_jobs_and_shuts_down() {
        let h = Harness::new();
        let config = SchedulerConfig {
            key_prefix: PREFIX.to_string(),
            leadership_interval: Duration::from_millis(5),
            processor_interval: Duration::from_millis(5),
            watchdog_interval: Duration::from_millis(50),
            reconciler_interval: Duration::from_millis(50),
            cleanup_interval: Duration::from_millis(50),
            ..SchedulerConfig::default()
        };
        let node = h.instance_with("a", config, h.executor());
        let booking = h.book(secs(1), secs(600));
        node.schedule_notifications(&booking);
        h.clock.advance(secs(2));

        node.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !h.reload(booking.id_typed()).is_slot_started() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        node.shutdown();

        assert!(h.reload(booking.id_typed()).is_slot_started());
        assert!(!node.is_leader());
        assert_eq!(node.stats().unwrap().current_leader_id, None);
    }

    #[test]
    fn processor_task_stops_when_the_lease_is_lost() {
        let h = Harness::new();
        let config = SchedulerConfig {
            key_prefix: PREFIX.to_string(),
            leadership_interval: Duration::from_millis(5),
            processor_interval: Duration::from_millis(5),
            watchdog_interval: Duration::from_millis(50),
            reconciler_interval: Duration::from_millis(50),
            cleanup_interval: Duration::from_millis(50),
            ..SchedulerConfig::default()
        };
        let node = h.instance_with("a", config, h.executor());

        let wait_for = |done: &dyn Fn() -> bool| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !done() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            done()
        };

        node.start().unwrap();
        assert!(wait_for(&|| node.is_processing()));

        // Another instance takes over the lease.
        h.store
            .set(&KeySpace::new(PREFIX).leader(), "b", Some(secs(30)))
            .unwrap();
        assert!(wait_for(&|| !node.is_processing()));
        assert!(!node.is_leader());

        node.shutdown();
        assert_eq!(node.stats().unwrap().current_leader_id, Some(InstanceId::from("b")));
    }
}
