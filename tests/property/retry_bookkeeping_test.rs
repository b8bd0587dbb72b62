// tests/property/retry_bookkeeping_test.rs

//! Property-based tests for operation retry bookkeeping
//! Tests that the retry budget and the pending queue bound hold for any settings

use crate::test_helpers::{MockTransport, ScriptedOperation, endpoint};
use esconn::core::ConnectionError;
use esconn::core::inspection::InspectionResult;
use esconn::core::operations::OperationTracker;
use esconn::core::protocol::TcpCommand;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_retry_budget(max_retries in -1i32..6, not_handled in 0usize..12) {
        let mut tracker = OperationTracker::new("prop", 10);
        let transport = MockTransport::detached(endpoint(1113));
        let (operation, log) =
            ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::retry("NotHandled"));
        let item = tracker.item(Box::new(operation), max_retries, Duration::ZERO);
        tracker.schedule_operation(item, transport.as_ref());

        for _ in 0..not_handled {
            let id = transport.last_sent().unwrap().correlation_id;
            tracker.schedule_operation_retry(&id);
            tracker.schedule_waiting_operations(transport.as_ref());
        }

        let exhausted = max_retries >= 0 && not_handled > max_retries as usize;
        let failures = log.failures();
        if exhausted {
            prop_assert_eq!(transport.sent().len(), max_retries as usize + 1);
            prop_assert_eq!(tracker.total_count(), 0);
            let retries_limit_reached = matches!(
                failures.as_slice(),
                [ConnectionError::RetriesLimitReached { retries, .. }] if *retries == max_retries
            );
            prop_assert!(retries_limit_reached);
        } else {
            prop_assert_eq!(transport.sent().len(), not_handled + 1);
            prop_assert_eq!(tracker.active_count(), 1);
            prop_assert!(failures.is_empty());
        }
    }

    #[test]
    fn test_pending_queue_is_bounded(max_queue_size in 1usize..16, submitted in 0usize..32) {
        let mut tracker = OperationTracker::new("prop", max_queue_size);
        let mut logs = Vec::new();
        for _ in 0..submitted {
            let (operation, log) =
                ScriptedOperation::new(TcpCommand::ReadEvent, |_| InspectionResult::end_operation("done"));
            let item = tracker.item(Box::new(operation), 0, Duration::ZERO);
            tracker.enqueue_operation(item);
            logs.push(log);
        }

        let accepted = submitted.min(max_queue_size);
        prop_assert_eq!(tracker.waiting_count(), accepted);
        for (index, log) in logs.iter().enumerate() {
            let failures = log.failures();
            if index < accepted {
                prop_assert!(failures.is_empty());
            } else {
                prop_assert!(matches!(
                    failures.as_slice(),
                    [ConnectionError::QueueFull(size)] if *size == max_queue_size
                ));
            }
        }
    }
}
