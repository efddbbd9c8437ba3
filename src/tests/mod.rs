#[cfg(test)]
mod tests {
    use crate::bridge::{Bridge, BridgeError, Transport, TransportControl, TransportEvent};
    use crate::config::{CliArgs, Settings};
    use async_trait::async_trait;
    use gridstream_core::{Error, FieldValue, InboundMessage, Point, SinkError, WriteSink};
    use mockall::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_ok;

    mock! {
        pub Sink {}

        #[async_trait]
        impl WriteSink for Sink {
            async fn init(&self) -> Result<(), SinkError>;
            async fn write_points(&self, points: Vec<Point>) -> Result<(), SinkError>;
        }
    }

    mock! {
        pub Control {}

        #[async_trait]
        impl TransportControl for Control {
            async fn subscribe(&self, filter: &str) -> Result<(), BridgeError>;
            async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;
            async fn reconnect(&self) -> Result<(), BridgeError>;
            async fn disconnect(&self) -> Result<(), BridgeError>;
        }
    }

    /// Replays a fixed script of events, then idles forever.
    struct ScriptedTransport {
        events: VecDeque<Result<TransportEvent, BridgeError>>,
    }

    impl ScriptedTransport {
        fn new(events: Vec<Result<TransportEvent, BridgeError>>) -> Self {
            Self { events: events.into() }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn next_event(&mut self) -> Result<TransportEvent, BridgeError> {
            match self.events.pop_front() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    fn message(topic: &str, value: f64) -> Result<TransportEvent, BridgeError> {
        Ok(TransportEvent::Message(InboundMessage::new(
            topic.to_string(),
            format!("{{\"value\": {}}}", value),
        )))
    }

    fn settings() -> Settings {
        let mut settings = Settings::new(CliArgs::default()).unwrap();
        settings.pipeline.flush_interval_secs = 1;
        settings.pipeline.dequeue_timeout_ms = 50;
        settings.keepalive.enabled = false;
        settings
    }

    fn quiet_control() -> MockControl {
        let mut control = MockControl::new();
        control
            .expect_subscribe()
            .withf(|filter| filter == "N/#")
            .returning(|_| Ok(()));
        control.expect_disconnect().times(1).returning(|| Ok(()));
        control
    }

    fn find<'a>(points: &'a [Point], series: &str) -> Option<&'a Point> {
        points.iter().find(|p| p.series_name == series)
    }

    #[tokio::test]
    async fn test_window_reaches_sink() {
        let bridge = Bridge::new(settings()).unwrap();
        let active = bridge.active();
        let stats = bridge.stats();

        let mut sink = MockSink::new();
        sink.expect_init().times(1).returning(|| Ok(()));
        sink.expect_write_points()
            .times(1)
            .withf(|points| {
                let total = find(points, "Ac.Lx.Power").and_then(Point::value);
                let frequency = find(points, "Ac.Frequency").and_then(Point::value);
                points.len() == 5 && total == Some(300.0) && frequency == Some(50.0)
            })
            .returning(move |_| {
                active.deactivate();
                Ok(())
            });

        let transport = ScriptedTransport::new(vec![
            Ok(TransportEvent::Connected),
            message("N/abc/grid/30/Ac/L1/Power", 100.0),
            message("N/abc/grid/30/Ac/L2/Power", 100.0),
            message("N/abc/grid/30/Ac/L3/Power", 100.0),
            message("N/abc/grid/30/Ac/Frequency", 49.0),
            message("N/abc/grid/30/Ac/Frequency", 51.0),
            Ok(TransportEvent::Idle),
        ]);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run(transport, Arc::new(quiet_control()), Arc::new(sink)),
        )
        .await
        .unwrap();
        assert_ok!(result);

        let snap = stats.snapshot();
        assert_eq!(snap.received, 5);
        assert_eq!(snap.queued, 5);
        assert_eq!(snap.synthesized, 1);
        assert_eq!(snap.written, 5);
        assert_eq!(snap.deduplicated, 1);
    }

    #[tokio::test]
    async fn test_fatal_sink_error_stops_pipeline() {
        let bridge = Bridge::new(settings()).unwrap();
        let stats = bridge.stats();

        let mut sink = MockSink::new();
        sink.expect_init().returning(|| Ok(()));
        sink.expect_write_points()
            .times(1)
            .returning(|_| Err(SinkError::Fatal("authorization failed".to_string())));

        let transport = ScriptedTransport::new(vec![
            Ok(TransportEvent::Connected),
            message("N/abc/battery/512/Soc", 87.5),
        ]);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run(transport, Arc::new(quiet_control()), Arc::new(sink)),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::Pipeline(Error::Sink(SinkError::Fatal(_))))
        ));
        assert_eq!(stats.snapshot().failed_points, 1);
    }

    #[tokio::test]
    async fn test_transient_sink_error_keeps_running() {
        let bridge = Bridge::new(settings()).unwrap();
        let active = bridge.active();
        let stats = bridge.stats();

        let mut sink = MockSink::new();
        sink.expect_init().returning(|| Ok(()));
        let mut seq = Sequence::new();
        sink.expect_write_points()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SinkError::Transient("connection refused".to_string())));
        sink.expect_write_points()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|points| points.len() == 1 && points[0].field == FieldValue::Value(12.0))
            .returning(move |_| {
                active.deactivate();
                Ok(())
            });

        let mut control = quiet_control();
        control.expect_publish().never();

        let bridge_stats = stats.clone();
        let transport = DelayedTransport {
            first: Some(message("N/abc/solarcharger/279/Yield/Power", 10.0)),
            second: Some(message("N/abc/solarcharger/279/Yield/Power", 12.0)),
            gate: Box::new(move || bridge_stats.snapshot().flushes >= 1),
        };

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            bridge.run(transport, Arc::new(control), Arc::new(sink)),
        )
        .await
        .unwrap();
        assert_ok!(result);

        let snap = stats.snapshot();
        assert_eq!(snap.failed_writes, 1);
        assert_eq!(snap.failed_points, 1);
        assert_eq!(snap.written, 1);
    }

    /// Sends one message, waits for `gate`, then sends the second.
    struct DelayedTransport {
        first: Option<Result<TransportEvent, BridgeError>>,
        second: Option<Result<TransportEvent, BridgeError>>,
        gate: Box<dyn Fn() -> bool + Send>,
    }

    #[async_trait]
    impl Transport for DelayedTransport {
        async fn next_event(&mut self) -> Result<TransportEvent, BridgeError> {
            if let Some(event) = self.first.take() {
                return event;
            }
            while !(self.gate)() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            match self.second.take() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_transport_failure_stops_pipeline() {
        let bridge = Bridge::new(settings()).unwrap();

        let mut sink = MockSink::new();
        sink.expect_init().returning(|| Ok(()));
        sink.expect_write_points().never();

        let transport = ScriptedTransport::new(vec![
            Ok(TransportEvent::Connected),
            Err(BridgeError::Transport("connection reset".to_string())),
        ]);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run(transport, Arc::new(quiet_control()), Arc::new(sink)),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(BridgeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_init_failure_aborts_startup() {
        let bridge = Bridge::new(settings()).unwrap();

        let mut sink = MockSink::new();
        sink.expect_init()
            .returning(|| Err(SinkError::Transient("connection refused".to_string())));
        sink.expect_write_points().never();

        let mut control = MockControl::new();
        control.expect_subscribe().never();

        let result = bridge
            .run(ScriptedTransport::new(vec![]), Arc::new(control), Arc::new(sink))
            .await;
        assert!(matches!(result, Err(BridgeError::Pipeline(Error::Sink(_)))));
    }

    #[tokio::test]
    async fn test_dry_run_flushes_without_writing() {
        let mut settings = settings();
        settings.dry_run = true;
        let bridge = Bridge::new(settings).unwrap();
        let active = bridge.active();
        let stats = bridge.stats();

        let mut sink = MockSink::new();
        sink.expect_init().never();
        sink.expect_write_points().never();

        let transport = ScriptedTransport::new(vec![
            Ok(TransportEvent::Connected),
            message("N/abc/vebus/276/Ac/ActiveIn/L1/V", 230.0),
        ]);

        let watcher = stats.clone();
        tokio::spawn(async move {
            while watcher.snapshot().flushes == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            active.deactivate();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run(transport, Arc::new(quiet_control()), Arc::new(sink)),
        )
        .await
        .unwrap();
        assert_ok!(result);

        let snap = stats.snapshot();
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.written, 0);
    }

    #[tokio::test]
    async fn test_resubscribes_on_every_connect() {
        let bridge = Bridge::new(settings()).unwrap();
        let active = bridge.active();

        let mut sink = MockSink::new();
        sink.expect_init().returning(|| Ok(()));
        sink.expect_write_points().never();

        let mut control = MockControl::new();
        let mut calls = 0;
        control.expect_subscribe().times(2).returning(move |_| {
            calls += 1;
            if calls == 2 {
                active.deactivate();
            }
            Ok(())
        });
        control.expect_disconnect().returning(|| Ok(()));

        let transport = ScriptedTransport::new(vec![
            Ok(TransportEvent::Connected),
            Ok(TransportEvent::Idle),
            Ok(TransportEvent::Connected),
        ]);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run(transport, Arc::new(control), Arc::new(sink)),
        )
        .await
        .unwrap();
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_shutdown_before_identity_is_clean() {
        for _ in 0..30 {
            let mut settings = settings();
            settings.keepalive.enabled = true;
            let bridge = Bridge::new(settings).unwrap();
            let active = bridge.active();

            let mut sink = MockSink::new();
            sink.expect_init().returning(|| Ok(()));
            sink.expect_write_points().never();
            let mut control = quiet_control();
            control.expect_publish().never();

            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.deactivate();
            });

            let transport = ScriptedTransport::new(vec![Ok(TransportEvent::Connected)]);
            let result = tokio::time::timeout(
                Duration::from_secs(5),
                bridge.run(transport, Arc::new(control), Arc::new(sink)),
            )
            .await
            .unwrap();
            assert_ok!(result);
        }
    }
}
