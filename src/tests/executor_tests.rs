//! tests/executor_tests.rs
//! Pruebas de `StepExecutor` contra SQLite en memoria y reloj falso.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use crate::errors::ExecutorError;
    use crate::models::outbox_model::{OutboxMessage, OutboxStatus};
    use crate::models::run_model::{CreateRunRequest, RunStatus, StopReason, Variant};
    use crate::models::sequence_model::{Channel, Rules, SequenceRequest, Step, StepKind};
    use crate::services::step_executor::StepOutcome;
    use crate::tests::support::{
        at, t0, test_config, FailingTransport, Harness, RecordingTransport, SlowTransport,
    };

    const BODY: &str = r#"Hola {{FirstName}}, mira <a href="https://acme.test/demo">la demo</a>"#;

    #[actix_rt::test]
    async fn send_step_dispatches_and_advances() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola {{FirstName}}", BODY).await;
        let sequence = h
            .sequence(vec![Step::send(&template.id), Step::wait(3)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;
        assert_eq!(run.next_send_at, Some(t0()));

        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Sent { .. }));

        let run = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(run.current_step_index, 1);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.next_send_at, Some(t0() + Duration::days(3)));

        let outbox = h.outbox.list_for_run(&run.id).await.unwrap();
        assert_eq!(outbox.len(), 1);
        let message = &outbox[0];
        assert_eq!(message.status, OutboxStatus::Sent);
        assert_eq!(message.provider_message_id.as_deref(), Some("rec-1"));
        assert_eq!(message.recipient, "ana@example.test");
        assert_eq!(message.subject, "Hola Ana");
        let tid = message.tracking_id.clone().unwrap();
        assert!(message.html.contains(&message.pixel_url));
        assert!(message.html.contains(&format!("/api/track/click/{tid}?url=")));

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ana@example.test");
        assert_eq!(sent[0].from, "Acme <ventas@acme.test>");
        assert_eq!(sent[0].html, message.html);

        let history = h.runs.history(&run.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].outbox_id.as_deref(), Some(message.id.as_str()));
    }

    #[actix_rt::test]
    async fn wait_step_creates_no_outbox_message() {
        let h = Harness::new(Arc::new(RecordingTransport::default())).await;
        let account = h.account(false).await;
        let sequence = h
            .sequence(vec![Step::wait(2), Step::wait(1)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        // todavía no vence
        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Skipped);

        h.clock.advance(Duration::days(2));
        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Waited);

        let run = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(run.current_step_index, 1);
        assert_eq!(run.next_send_at, Some(t0() + Duration::days(3)));
        assert!(h.outbox.list_for_run(&run.id).await.unwrap().is_empty());
        assert_eq!(h.runs.history(&run.id).await.unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn transport_failure_keeps_the_step_and_backs_off() {
        let transport = Arc::new(FailingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let sequence = h
            .sequence(vec![Step::send(&template.id)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        match outcome {
            StepOutcome::Failed { retry_at, error, .. } => {
                assert_eq!(retry_at, Some(t0() + Duration::hours(6)));
                assert!(error.contains("connection refused"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let run = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(run.current_step_index, 0);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.next_send_at, Some(t0() + Duration::hours(6)));

        let outbox = h.outbox.list_for_run(&run.id).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].status, OutboxStatus::Failed);
        assert!(outbox[0].error.is_some());

        let history = h.runs.history(&run.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);

        // antes del backoff no se reintenta
        h.clock.advance(Duration::hours(5));
        assert_eq!(
            h.executor.execute_step(&run.id).await.unwrap(),
            StepOutcome::Skipped
        );
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn retries_stop_after_max_attempts() {
        let transport = Arc::new(FailingTransport::default());
        let config = crate::config::engine_config::EngineConfig {
            max_attempts: 2,
            ..test_config()
        };
        let h = Harness::with_config(transport.clone(), config).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let sequence = h
            .sequence(vec![Step::send(&template.id)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        h.executor.execute_step(&run.id).await.unwrap();
        h.clock.advance(Duration::hours(6));
        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Failed { retry_at: None, .. }));

        let run = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::FailedPermanently);
        assert_eq!(run.next_send_at, None);

        h.clock.advance(Duration::days(1));
        assert_eq!(
            h.executor.execute_step(&run.id).await.unwrap(),
            StepOutcome::Skipped
        );
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[actix_rt::test]
    async fn dry_run_account_never_reaches_the_live_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(true).await;
        let template = h.template("Hola", BODY).await;
        let sequence = h
            .sequence(vec![Step::send(&template.id)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Sent { .. }));
        assert_eq!(transport.sent_count(), 0);

        let outbox = h.outbox.list_for_run(&run.id).await.unwrap();
        assert_eq!(outbox[0].status, OutboxStatus::Scheduled);
        assert!(outbox[0]
            .provider_message_id
            .as_deref()
            .is_some_and(|id| id.starts_with("sim-")));
        assert_eq!(h.runs.get_run(&run.id).await.unwrap().current_step_index, 1);
    }

    #[actix_rt::test]
    async fn guard_stops_the_run_before_a_send() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let first = Step {
            stop_on_reply: false,
            ..Step::send(&template.id)
        };
        let sequence = h
            .sequence(vec![first, Step::send(&template.id)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        // el paso actual no tiene guard: el evento solo queda registrado
        let after_event = h
            .control
            .record_event(&run.id, crate::models::run_model::RunEvent::Reply)
            .await
            .unwrap();
        assert!(after_event.replied);
        assert_eq!(after_event.status, RunStatus::Running);

        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Sent { .. }));

        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Stopped(StopReason::Replied));
        assert_eq!(transport.sent_count(), 1);

        let run = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Stopped);
        assert_eq!(run.stop_reason, Some(StopReason::Replied));
        assert_eq!(run.current_step_index, 1);
    }

    #[actix_rt::test]
    async fn manual_task_parks_the_run_until_completed() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let sequence = h
            .sequence(
                vec![Step::manual_task("Llamar"), Step::send(&template.id)],
                Rules::default(),
            )
            .await;
        let run = h.run(&sequence, &account).await;

        assert_eq!(
            h.executor.execute_step(&run.id).await.unwrap(),
            StepOutcome::AwaitingTask
        );
        let parked = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(parked.status, RunStatus::AwaitingTask);
        assert_eq!(parked.next_send_at, None);
        assert_eq!(
            h.executor.execute_step(&run.id).await.unwrap(),
            StepOutcome::Skipped
        );

        let resumed = h.control.complete_manual_task(&run.id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Running);
        assert_eq!(resumed.current_step_index, 1);
        assert_eq!(resumed.next_send_at, Some(t0()));

        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Sent { .. }));
        assert_eq!(transport.sent_count(), 1);
    }

    #[actix_rt::test]
    async fn variant_b_runs_use_the_alternate_template() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template_a = h.template("Asunto A", BODY).await;
        let template_b = h.template("Asunto B", BODY).await;
        let step = Step {
            kind: StepKind::SendMessage {
                template_id: template_a.id.clone(),
                channel: Channel::Email,
                variant_b_template_id: Some(template_b.id.clone()),
                delay_days: 0,
                send_at: None,
            },
            stop_on_reply: true,
            stop_on_unsubscribe: true,
        };
        let sequence = h
            .sequences
            .create_sequence(SequenceRequest {
                name: "AB".to_string(),
                steps: vec![step],
                rules: Rules::default(),
                ab_split_percent: Some(100),
            })
            .await
            .unwrap();
        let run = h.run(&sequence, &account).await;
        assert_eq!(run.variant, Variant::B);

        h.executor.execute_step(&run.id).await.unwrap();
        assert_eq!(transport.sent.lock().unwrap()[0].subject, "Asunto B");
    }

    #[actix_rt::test]
    async fn daily_cap_defers_the_second_send() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let rules = Rules {
            daily_cap: Some(1),
            ..Rules::default()
        };
        let sequence = h.sequence(vec![Step::send(&template.id)], rules).await;
        let first = h.run(&sequence, &account).await;
        let second = h.run(&sequence, &account).await;

        assert!(matches!(
            h.executor.execute_step(&first.id).await.unwrap(),
            StepOutcome::Sent { .. }
        ));

        let tomorrow = at(0, 0) + Duration::days(1);
        assert_eq!(
            h.executor.execute_step(&second.id).await.unwrap(),
            StepOutcome::Deferred { until: tomorrow }
        );
        let second = h.runs.get_run(&second.id).await.unwrap();
        assert_eq!(second.current_step_index, 0);
        assert_eq!(second.next_send_at, Some(tomorrow));
        assert_eq!(transport.sent_count(), 1);
        assert!(h.outbox.list_for_run(&second.id).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn missing_recipient_is_a_resolution_error() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let sequence = h
            .sequence(vec![Step::send(&template.id)], Rules::default())
            .await;
        let run = h
            .control
            .create_run(CreateRunRequest {
                sequence_id: sequence.id.clone(),
                account_id: account.id.clone(),
                variables: BTreeMap::new(),
            })
            .await
            .unwrap();

        let err = h.executor.execute_step(&run.id).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Resolution(_)));

        let unchanged = h.runs.get_run(&run.id).await.unwrap();
        assert_eq!(unchanged.current_step_index, 0);
        assert_eq!(unchanged.next_send_at, run.next_send_at);
        assert!(h.runs.history(&run.id).await.unwrap().is_empty());
        assert_eq!(transport.sent_count(), 0);
    }

    #[actix_rt::test]
    async fn missing_template_is_a_resolution_error() {
        let h = Harness::new(Arc::new(RecordingTransport::default())).await;
        let account = h.account(false).await;
        let sequence = h
            .sequence(vec![Step::send("no-such-template")], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        let err = h.executor.execute_step(&run.id).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Resolution(msg) if msg.contains("no-such-template")));
    }

    #[actix_rt::test]
    async fn unresolved_outbox_rows_are_failed_on_the_next_attempt() {
        let transport = Arc::new(RecordingTransport::default());
        let h = Harness::new(transport.clone()).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let sequence = h
            .sequence(vec![Step::send(&template.id)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        // restos de un intento interrumpido: outbox escrito, sin historial
        let orphan = OutboxMessage {
            id: "orphan-1".to_string(),
            run_id: run.id.clone(),
            step_index: 0,
            account_id: account.id.clone(),
            recipient: "ana@example.test".to_string(),
            subject: "Hola".to_string(),
            html: String::new(),
            text: String::new(),
            status: OutboxStatus::Pending,
            provider_message_id: None,
            error: None,
            tracking_id: Some("orphan-tid".to_string()),
            pixel_url: String::new(),
            open_count: 0,
            click_count: 0,
            first_opened_at: None,
            created_at: t0() - Duration::minutes(5),
            updated_at: t0() - Duration::minutes(5),
        };
        h.outbox.insert_message(&orphan).await.unwrap();

        h.executor.execute_step(&run.id).await.unwrap();

        let outbox = h.outbox.list_for_run(&run.id).await.unwrap();
        assert_eq!(outbox.len(), 2);
        let recovered = outbox.iter().find(|m| m.id == "orphan-1").unwrap();
        assert_eq!(recovered.status, OutboxStatus::Failed);
        assert!(outbox
            .iter()
            .any(|m| m.id != "orphan-1" && m.status == OutboxStatus::Sent));
    }

    #[actix_rt::test]
    async fn slow_transport_times_out_as_a_failure() {
        let transport = Arc::new(SlowTransport::new(StdDuration::from_millis(300)));
        let config = crate::config::engine_config::EngineConfig {
            transport_timeout: StdDuration::from_millis(50),
            ..test_config()
        };
        let h = Harness::with_config(transport, config).await;
        let account = h.account(false).await;
        let template = h.template("Hola", BODY).await;
        let sequence = h
            .sequence(vec![Step::send(&template.id)], Rules::default())
            .await;
        let run = h.run(&sequence, &account).await;

        let outcome = h.executor.execute_step(&run.id).await.unwrap();
        match outcome {
            StepOutcome::Failed { error, retry_at, .. } => {
                assert!(error.contains("timed out"));
                assert!(retry_at.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
