//! tests/scheduler_tests.rs
//! Ticks completos: selección, aislamiento entre runs, concurrencia y ciclo de vida.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use crate::models::outbox_model::OutboxStatus;
    use crate::models::run_model::{RunStatus, StopReason};
    use crate::models::sequence_model::{Rules, Step};
    use crate::services::scheduler_service::TickReport;
    use crate::tests::support::{t0, Harness, RecordingTransport, SlowTransport};

    #[actix_rt::test]
    async fn run_past_its_last_step_is_stopped() {
        let h = Harness::new(Arc::new(RecordingTransport::default())).await;
        let account = h.account(false).await;
        let template = h.template("Hola", "Hola {{FirstName}}").await;
        let sequence = h
            .sequence(vec![Step::send(&template.id)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        h.scheduler.tick().await.unwrap();
        let after_send = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(after_send.current_step_index, 1);
        assert_eq!(after_send.status, RunStatus::Running);
        assert_eq!(after_send.next_send_at, None);

        h.scheduler.tick().await.unwrap();
        let done = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Stopped);
        assert_eq!(done.stop_reason, Some(StopReason::Completed));

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
    }

    #[actix_rt::test]
    async fn one_failing_run_does_not_affect_the_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let template = h.template("Hola", "Hola {{FirstName}}").await;
        let sequence = h
            .sequence(vec![Step::send(&template.id), Step::wait(1)], Rules::default())
            .await;

        let mut runs = Vec::new();
        for _ in 0..3 {
            let account = h.account(false).await;
            runs.push((h.run(&sequence, &account).await, account));
        }
        // la cuenta del segundo run desaparece: falla la resolución
        h.accounts.delete_account(&runs[1].1.id).await.unwrap();

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.selected, 3);
        assert_eq!(report.executed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(transport.sent_count(), 2);

        let first = h.runs.get_run(&runs[0].0.id).await.unwrap();
        let second = h.runs.get_run(&runs[1].0.id).await.unwrap();
        let third = h.runs.get_run(&runs[2].0.id).await.unwrap();
        assert_eq!(first.current_step_index, 1);
        assert_eq!(second.current_step_index, 0);
        assert_eq!(second.status, RunStatus::Running);
        assert_eq!(third.current_step_index, 1);
    }

    #[actix_rt::test]
    async fn dry_run_sequence_end_to_end() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(true).await;
        let intro = h.template("Intro", "Hola {{FirstName}}").await;
        let follow_up = h.template("Seguimiento", "¿Lo viste, {{FirstName}}?").await;
        let sequence = h
            .sequence(
                vec![Step::send(&intro.id), Step::wait(3), Step::send(&follow_up.id)],
                Rules::default(),
            )
            .await;
        let run = h.run(&sequence, &account).await;

        // tick 1 en T0
        h.scheduler.tick().await.unwrap();
        let run_after_first = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(run_after_first.current_step_index, 1);
        assert_eq!(run_after_first.next_send_at, Some(t0() + Duration::days(3)));

        // a mitad de la espera no pasa nada
        h.clock.advance(Duration::days(1));
        assert_eq!(h.scheduler.tick().await.unwrap().selected, 0);

        // T0 + 3d: termina la espera y sale el segundo envío
        h.clock.set(t0() + Duration::days(3));
        h.scheduler.tick().await.unwrap();
        let run_after_second = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(run_after_second.current_step_index, 3);
        assert_eq!(run_after_second.status, RunStatus::Running);
        assert_eq!(run_after_second.next_send_at, None);

        let outbox = h.outbox.list_for_run(&run.id).await.unwrap();
        assert_eq!(outbox.len(), 2);
        assert!(outbox.iter().all(|m| m.status == OutboxStatus::Scheduled));
        assert_eq!(outbox[1].step_index, 2);
        assert_eq!(outbox[1].subject, "Seguimiento");

        // siguiente tick: no quedan pasos
        h.scheduler.tick().await.unwrap();
        let finished = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Stopped);
        assert_eq!(finished.stop_reason, Some(StopReason::Completed));

        assert_eq!(transport.sent_count(), 0);
        let kinds: Vec<_> = h
            .runs
            .history(&run.id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.step_kind)
            .collect();
        assert_eq!(kinds, vec!["send_message", "wait", "send_message"]);
    }

    #[actix_rt::test]
    async fn overlapping_ticks_send_once() {
        let transport = Arc::new(SlowTransport::new(StdDuration::from_millis(150)));
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola", "Hola").await;
        let sequence = h
            .sequence(vec![Step::send(&template.id), Step::wait(1)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        let (a, b) = tokio::join!(h.scheduler.tick(), h.scheduler.tick());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.executed + b.executed, 1);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
        assert_eq!(h.outbox.list_for_run(&run.id).await.unwrap().len(), 1);
        assert_eq!(h.runs.get_run(&run.id).await.unwrap().current_step_index, 1);
        assert_eq!(h.locks.len(), 0);
    }

    #[actix_rt::test]
    async fn scheduler_loop_starts_and_stops() {
        let h = Harness::new(Arc::new(RecordingTransport::default())).await;
        let account = h.account(false).await;
        let template = h.template("Hola", "Hola").await;
        let sequence = h
            .sequence(vec![Step::send(&template.id), Step::wait(1)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        assert!(h.scheduler.start());
        assert!(!h.scheduler.start());
        assert!(h.scheduler.is_running());

        let mut advanced = false;
        for _ in 0..100 {
            if h.runs.get_run(&run.id).await.unwrap().current_step_index == 1 {
                advanced = true;
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert!(advanced, "the background loop never executed the run");

        h.scheduler.stop().await;
        assert!(!h.scheduler.is_running());
        // stop sin loop activo no hace nada
        h.scheduler.stop().await;
    }
}
