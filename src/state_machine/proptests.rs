//! Property-based tests for the dispatcher
//!
//! These tests feed arbitrary frame sequences and check that the transcript
//! invariants hold no matter how the server interleaves them.

use super::*;
use crate::protocol::ConnectionStatus;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

fn connected() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.set_connection_status(ConnectionStatus::Connected);
    dispatcher
}

/// Dispatcher with conversation `c1` created and awaiting a reply
fn with_conversation() -> Dispatcher {
    let mut dispatcher = connected();
    dispatcher
        .send_message(&ConversationKey::Pending, "show me the pipeline")
        .unwrap();
    dispatcher.on_frame(&json!({"type": "conversation_created", "conversation_id": "c1"}).to_string());
    dispatcher
}

fn assert_consistent(dispatcher: &Dispatcher) -> Result<(), TestCaseError> {
    let store = dispatcher.store();
    store
        .pending()
        .transcript
        .check_invariants()
        .map_err(TestCaseError::fail)?;
    for conversation in store.conversations() {
        conversation
            .transcript
            .check_invariants()
            .map_err(TestCaseError::fail)?;
    }
    prop_assert!(store.thinking().len() <= 1, "thinking: {:?}", store.thinking());
    Ok(())
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_id() -> impl Strategy<Value = String> {
    prop_oneof![Just("t1"), Just("t2"), Just("t3")].prop_map(str::to_string)
}

fn arb_operation_id() -> impl Strategy<Value = String> {
    prop_oneof![Just("op1"), Just("op2")].prop_map(str::to_string)
}

fn arb_approval_status() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("completed"),
        Just("failed"),
        Just("canceled"),
        Just("cancelled"),
        Just("expired"),
    ]
}

fn arb_tool_result() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        (0i64..100).prop_map(|count| json!({"count": count})),
        arb_operation_id()
            .prop_map(|op| json!({"status": "pending_approval", "operation_id": op})),
        Just(json!({"status": "pending_approval"})),
        "[a-z]{0,10}".prop_map(serde_json::Value::String),
    ]
}

/// Control frames, serialized the way the server sends them
fn arb_control_frame() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(json!({"type": "text_block_complete"}).to_string()),
        Just(json!({"type": "message_complete"}).to_string()),
        (arb_tool_id(), "[a-z_]{3,12}").prop_map(|(id, name)| {
            json!({"type": "tool_call", "tool_id": id, "tool_name": name, "input": {}}).to_string()
        }),
        (arb_tool_id(), arb_tool_result()).prop_map(|(id, result)| {
            json!({"type": "tool_result", "tool_id": id, "result": result}).to_string()
        }),
        (arb_operation_id(), arb_approval_status()).prop_map(|(op, status)| {
            json!({"type": "tool_approval_result", "operation_id": op, "status": status})
                .to_string()
        }),
        "[a-z0-9]{4}".prop_map(|id| json!({"type": "task_started", "task_id": id}).to_string()),
        Just(json!({"type": "error", "message": "boom"}).to_string()),
        Just(json!({"type": "heartbeat"}).to_string()),
        Just(json!({"type": "tool_call"}).to_string()),
    ]
}

fn arb_frame() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => "[a-zA-Z .]{1,12}",
        2 => arb_control_frame(),
    ]
}

/// Frames mixed with local actions that reshape the store
#[derive(Debug, Clone)]
enum Step {
    Frame(String),
    Send(String),
    Close(ConversationKey),
    ReplayCreated,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => arb_frame().prop_map(Step::Frame),
        1 => "[a-z ]{1,8}".prop_map(Step::Send),
        1 => prop_oneof![
            Just(ConversationKey::id("c1")),
            Just(ConversationKey::Pending),
        ]
        .prop_map(Step::Close),
        1 => Just(Step::ReplayCreated),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Streaming invariants survive any interleaving
    #[test]
    fn prop_frames_preserve_invariants(frames in proptest::collection::vec(arb_frame(), 0..40)) {
        let mut dispatcher = with_conversation();
        for frame in &frames {
            dispatcher.on_frame(frame);
            assert_consistent(&dispatcher)?;
        }
    }

    // Replaying c1's creation is a no-op, even after c1 was closed
    #[test]
    fn prop_replayed_creation_survives_close(
        steps in proptest::collection::vec(arb_step(), 0..40)
    ) {
        let mut dispatcher = with_conversation();
        for step in steps {
            match step {
                Step::Frame(frame) => {
                    dispatcher.on_frame(&frame);
                }
                Step::Send(text) => {
                    let _ = dispatcher.send_message(&ConversationKey::Pending, &text);
                }
                Step::Close(key) => {
                    dispatcher.close_conversation(&key);
                }
                Step::ReplayCreated => {
                    let before = dispatcher.clone();
                    let effects = dispatcher.on_frame(
                        &json!({"type": "conversation_created", "conversation_id": "c1"})
                            .to_string(),
                    );
                    prop_assert!(effects.is_empty());
                    prop_assert_eq!(&dispatcher, &before);
                }
            }
            assert_consistent(&dispatcher)?;
        }
    }

    // Consecutive deltas concatenate into one text block
    #[test]
    fn prop_deltas_accumulate(deltas in proptest::collection::vec("[a-zA-Z .\n]{1,10}", 1..20)) {
        let mut dispatcher = with_conversation();
        for delta in &deltas {
            dispatcher.on_frame(delta);
        }

        let transcript = &dispatcher.store().conversation("c1").unwrap().transcript;
        let reply = &transcript.messages[1];
        prop_assert_eq!(reply.blocks.len(), 1);
        prop_assert_eq!(reply.text(), deltas.concat());
        prop_assert!(reply.is_streaming);
        prop_assert!(!transcript.is_thinking);
    }

    // The most recent tool_result is the one kept on the block
    #[test]
    fn prop_last_tool_result_wins(results in proptest::collection::vec(0i64..1000, 1..6)) {
        let mut dispatcher = with_conversation();
        dispatcher.on_frame(
            &json!({"type": "tool_call", "tool_id": "t1", "tool_name": "search"}).to_string(),
        );
        for count in &results {
            dispatcher.on_frame(
                &json!({"type": "tool_result", "tool_id": "t1", "result": {"count": count}})
                    .to_string(),
            );
        }

        let transcript = &dispatcher.store().conversation("c1").unwrap().transcript;
        match transcript.find_tool_block("t1") {
            Some(ContentBlock::ToolUse { result, status, .. }) => {
                let last = results.last().copied();
                prop_assert_eq!(result.clone(), Some(json!({"count": last})));
                prop_assert_eq!(*status, BlockStatus::Complete);
            }
            other => prop_assert!(false, "expected tool block, got {:?}", other),
        }
    }

    // Redelivering a control frame changes nothing
    #[test]
    fn prop_control_frames_idempotent(
        prefix in proptest::collection::vec(arb_frame(), 0..20),
        frame in arb_control_frame()
    ) {
        let mut dispatcher = with_conversation();
        for f in &prefix {
            dispatcher.on_frame(f);
        }

        dispatcher.on_frame(&frame);
        let once = dispatcher.clone();
        dispatcher.on_frame(&frame);
        prop_assert_eq!(dispatcher, once);
    }

    // A resolved approval never changes status again
    #[test]
    fn prop_approval_resolves_once(
        statuses in proptest::collection::vec(arb_approval_status(), 1..5)
    ) {
        let mut dispatcher = with_conversation();
        dispatcher.on_frame(
            &json!({"type": "tool_call", "tool_id": "t1", "tool_name": "create_task"}).to_string(),
        );
        dispatcher.on_frame(
            &json!({
                "type": "tool_result",
                "tool_id": "t1",
                "result": {"status": "pending_approval", "operation_id": "op1"}
            })
            .to_string(),
        );

        let mut initial = None;
        for status in &statuses {
            dispatcher.on_frame(
                &json!({"type": "approval_result", "operation_id": "op1", "status": status})
                    .to_string(),
            );
            let current = dispatcher.store().tracker().approval("op1").unwrap().status;
            prop_assert!(current.is_terminal());
            let expected = *initial.get_or_insert(current);
            prop_assert_eq!(current, expected);
        }
    }

    // Everything streamed before the id arrives ends up in the conversation
    #[test]
    fn prop_pending_buffer_migrates(
        before in proptest::collection::vec("[a-z ]{1,8}", 0..10),
        after in proptest::collection::vec("[a-z ]{1,8}", 0..10)
    ) {
        let mut dispatcher = connected();
        dispatcher.send_message(&ConversationKey::Pending, "hello").unwrap();
        for delta in &before {
            dispatcher.on_frame(delta);
        }
        dispatcher.on_frame(
            &json!({"type": "conversation_created", "conversation_id": "c1"}).to_string(),
        );
        for delta in &after {
            dispatcher.on_frame(delta);
        }

        prop_assert!(dispatcher.store().pending().is_empty());
        let transcript = &dispatcher.store().conversation("c1").unwrap().transcript;
        prop_assert_eq!(transcript.messages[0].text(), "hello");

        let streamed: String = transcript.messages[1..].iter().map(Message::text).collect();
        prop_assert_eq!(streamed, format!("{}{}", before.concat(), after.concat()));
        assert_consistent(&dispatcher)?;
    }

    // Only the conversation that last sent a message may be thinking
    #[test]
    fn prop_single_thinking_conversation(order in proptest::collection::vec(0usize..3, 1..10)) {
        let mut dispatcher = connected();
        for id in ["a", "b", "c"] {
            dispatcher.send_message(&ConversationKey::Pending, "hi").unwrap();
            dispatcher.on_frame(
                &json!({"type": "conversation_created", "conversation_id": id}).to_string(),
            );
            dispatcher.on_frame(&json!({"type": "message_complete"}).to_string());
        }

        let ids = ["a", "b", "c"];
        for index in order {
            let key = ConversationKey::id(ids[index]);
            dispatcher.on_frame(&json!({"type": "message_complete"}).to_string());
            dispatcher.send_message(&key, "again").unwrap();
            prop_assert_eq!(dispatcher.store().thinking(), vec![key]);
        }
    }
}
