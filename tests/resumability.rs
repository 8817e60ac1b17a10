//! Serialize/deserialize round-trips at every waiting state.
//!
//! The contract under test: a conversation suspended at any waiting
//! state, snapshotted, serialized to JSON, deserialized, and resumed must
//! behave identically to one that never left memory.

mod common;

use std::sync::Arc;

use common::*;
use rustc_hash::FxHashMap;
use serde_json::json;
use weftflow::flows::{Flow, FlowBuilder};
use weftflow::properties::Property;
use weftflow::runtimes::{
    Conversation, ExecutionStatus, FORMAT_VERSION, PersistedConversation, PersistenceError,
};
use weftflow::steps::{
    BranchingStep, FlowExecutionStep, InputMessageStep, ToolExecutionStep,
};
use weftflow::tools::ToolResult;
use weftflow::utils::json_ext::JsonSerializable;

/// Snapshot, push through JSON, and restore against the same flow.
fn round_trip(flow: &Arc<Flow>, conversation: &Conversation) -> Conversation {
    let snapshot = conversation.snapshot();
    let json = snapshot.to_json_string().unwrap();
    let parsed = PersistedConversation::from_json_str(&json).unwrap();
    assert_eq!(parsed.format_version, FORMAT_VERSION);
    assert_eq!(parsed.flow_name, flow.name());
    Conversation::restore(Arc::clone(flow), parsed).unwrap()
}

fn client_tool_flow() -> Arc<Flow> {
    Arc::new(
        FlowBuilder::new("tool-shape")
            .add_step("call", ToolExecutionStep::new(remote_tool()))
            .begin("call")
            .end("call")
            .expose_output(Property::string("answer"), "call", "answer")
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn tool_result_wait_survives_serialization() {
    let flow = client_tool_flow();
    let mut control = flow
        .start_conversation(inputs([("query", json!("weather?"))]))
        .unwrap();

    let status = control.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolResult { requests } = &status else {
        panic!("expected result wait");
    };
    let id = requests[0].id.clone();

    let mut restored = round_trip(&flow, &control);
    assert_eq!(restored.status(), control.status());
    assert_eq!(restored.transcript(), control.transcript());

    // Resume both with the same result; outcomes must match.
    control
        .append_tool_result(ToolResult::ok(&id, json!("sunny")))
        .unwrap();
    restored
        .append_tool_result(ToolResult::ok(&id, json!("sunny")))
        .unwrap();

    let control_status = control.execute().await.unwrap();
    let restored_status = restored.execute().await.unwrap();
    assert_eq!(control_status, restored_status);
    assert_eq!(
        restored_status.output_values().unwrap()["answer"],
        json!("sunny")
    );
    assert_eq!(control.transcript(), restored.transcript());
}

#[tokio::test]
async fn confirmation_wait_survives_serialization() {
    let flow = Arc::new(
        FlowBuilder::new("confirm-shape")
            .add_step("call", ToolExecutionStep::new(transfer_tool()))
            .begin("call")
            .end("call")
            .expose_output(Property::string("receipt"), "call", "receipt")
            .build()
            .unwrap(),
    );
    let mut control = flow
        .start_conversation(inputs([("amount", json!(9))]))
        .unwrap();

    let status = control.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolConfirmation { requests } = &status else {
        panic!("expected confirmation gate");
    };
    let id = requests[0].id.clone();

    let mut restored = round_trip(&flow, &control);

    control.confirm_tool_execution(&id, None).unwrap();
    restored.confirm_tool_execution(&id, None).unwrap();

    let control_status = control.execute().await.unwrap();
    let restored_status = restored.execute().await.unwrap();
    assert_eq!(control_status, restored_status);
    assert_eq!(
        restored_status.output_values().unwrap()["receipt"],
        json!("transferred 9")
    );
}

#[tokio::test]
async fn branching_flow_survives_serialization() {
    let flow = Arc::new(
        FlowBuilder::new("branch-shape")
            .add_step("ask", InputMessageStep::new())
            .add_step(
                "route",
                BranchingStep::new([("[SUCCESS]", "success")]),
            )
            .add_step("win", ConstStep::new(json!("went well")))
            .add_step("shrug", ConstStep::new(json!("no idea")))
            .begin("ask")
            .edge("ask", "route")
            .edge_on("route", "success", "win")
            .edge_on("route", "next", "shrug")
            .end("win")
            .end("shrug")
            .data_edge("ask", "message", "route", "value")
            .expose_output(Property::any("on_success"), "win", "value")
            .expose_output(Property::any("on_fallback"), "shrug", "value")
            .build()
            .unwrap(),
    );

    let mut control = flow.start_conversation(FxHashMap::default()).unwrap();
    let status = control.execute().await.unwrap();
    assert!(matches!(
        status,
        ExecutionStatus::AwaitingUserMessage { .. }
    ));

    let mut restored = round_trip(&flow, &control);

    control.append_user_message("[SUCCESS]").unwrap();
    restored.append_user_message("[SUCCESS]").unwrap();

    let control_status = control.execute().await.unwrap();
    let restored_status = restored.execute().await.unwrap();
    assert_eq!(control_status, restored_status);

    let outputs = restored_status.output_values().unwrap();
    assert_eq!(outputs["on_success"], json!("went well"));
    assert_eq!(outputs["on_fallback"], json!(null));
}

#[tokio::test]
async fn nested_subflow_wait_survives_serialization() {
    let inner = Arc::new(
        FlowBuilder::new("inner-ask")
            .add_step("ask", InputMessageStep::new().with_prompt("Inner question"))
            .begin("ask")
            .end("ask")
            .expose_output(Property::string("message"), "ask", "message")
            .build()
            .unwrap(),
    );
    let flow = Arc::new(
        FlowBuilder::new("outer-shape")
            .add_step("sub", FlowExecutionStep::new(inner))
            .add_step("double-up", ConstStep::new(json!("after")))
            .begin("sub")
            .edge("sub", "double-up")
            .end("double-up")
            .expose_output(Property::string("message"), "sub", "message")
            .expose_output(Property::any("tail"), "double-up", "value")
            .build()
            .unwrap(),
    );

    let mut control = flow.start_conversation(FxHashMap::default()).unwrap();
    let status = control.execute().await.unwrap();
    assert!(matches!(
        &status,
        ExecutionStatus::AwaitingUserMessage { message: Some(m) } if m == "Inner question"
    ));

    // The suspension lives inside a nested frame; the snapshot must
    // carry it.
    let mut restored = round_trip(&flow, &control);

    control.append_user_message("from outside").unwrap();
    restored.append_user_message("from outside").unwrap();

    let control_status = control.execute().await.unwrap();
    let restored_status = restored.execute().await.unwrap();
    assert_eq!(control_status, restored_status);

    let outputs = restored_status.output_values().unwrap();
    assert_eq!(outputs["message"], json!("from outside"));
    assert_eq!(outputs["tail"], json!("after"));
}

#[tokio::test]
async fn restore_guards_flow_identity_and_version() {
    let flow = client_tool_flow();
    let conversation = flow
        .start_conversation(inputs([("query", json!("q"))]))
        .unwrap();
    let snapshot = conversation.snapshot();

    let other = Arc::new(
        FlowBuilder::new("unrelated")
            .add_step("seed", ConstStep::new(json!(1)))
            .begin("seed")
            .end("seed")
            .build()
            .unwrap(),
    );
    let err = Conversation::restore(other, snapshot.clone()).unwrap_err();
    assert!(matches!(err, PersistenceError::FlowMismatch { .. }));

    let mut stale = snapshot;
    stale.format_version = FORMAT_VERSION + 1;
    let err = Conversation::restore(flow, stale).unwrap_err();
    assert!(matches!(
        err,
        PersistenceError::UnsupportedVersion { .. }
    ));
}
