mod common;

use std::sync::Arc;

use common::*;
use rustc_hash::FxHashMap;
use serde_json::json;
use weftflow::flows::{Flow, FlowBuilder};
use weftflow::message::Message;
use weftflow::properties::Property;
use weftflow::runtimes::{ExecutionError, ExecutionStatus, ProtocolError};
use weftflow::steps::{StepError, ToolExecutionStep};
use weftflow::tools::{ClientTool, FnTool, ToolResult};

fn single_tool_flow(step: ToolExecutionStep, expose: &[(&str, Property)]) -> Arc<Flow> {
    let mut builder = FlowBuilder::new("tool-flow")
        .add_step("call", step)
        .begin("call")
        .end("call");
    for (output, property) in expose {
        builder = builder.expose_output(property.clone(), "call", *output);
    }
    Arc::new(builder.build().unwrap())
}

#[tokio::test]
async fn server_tool_executes_inline() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(adder_tool()),
        &[("sum", Property::integer("sum"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("a", json!(2)), ("b", json!(3))]))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    assert_eq!(status.output_values().unwrap()["sum"], json!(5));
}

#[tokio::test]
async fn request_id_is_minted_once_across_both_yields() {
    // A client tool behind a confirmation gate suspends twice; the
    // request id must never change for one logical call.
    let tool = Arc::new(
        ClientTool::new(
            "remote",
            vec![Property::string("query")],
            vec![Property::string("answer")],
        )
        .with_confirmation(),
    );
    let flow = single_tool_flow(
        ToolExecutionStep::new(tool),
        &[("answer", Property::string("answer"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("query", json!("weather?"))]))
        .unwrap();

    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolConfirmation { requests } = &status else {
        panic!("expected confirmation gate, got {}", status.label());
    };
    let minted_id = requests[0].id.clone();
    assert_eq!(requests[0].name, "remote");
    assert_eq!(requests[0].args["query"], json!("weather?"));

    // Unanswered, the same status (and id) is re-surfaced.
    let again = conversation.execute().await.unwrap();
    assert_eq!(status, again);

    conversation.confirm_tool_execution(&minted_id, None).unwrap();
    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolResult { requests } = &status else {
        panic!("expected result wait, got {}", status.label());
    };
    assert_eq!(requests[0].id, minted_id);

    // The published transcript entry carries the same id.
    let published = conversation
        .transcript()
        .iter()
        .find(|m| m.has_role(Message::TOOL_REQUEST))
        .unwrap();
    assert_eq!(published.tool_requests.as_ref().unwrap()[0].id, minted_id);

    conversation
        .append_tool_result(ToolResult::ok(&minted_id, json!("sunny")))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    assert_eq!(status.output_values().unwrap()["answer"], json!("sunny"));
}

#[tokio::test]
async fn confirmation_can_modify_arguments() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(transfer_tool()),
        &[("receipt", Property::string("receipt"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("amount", json!(100))]))
        .unwrap();

    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolConfirmation { requests } = &status else {
        panic!("expected confirmation gate");
    };
    let id = requests[0].id.clone();

    let mut modified = FxHashMap::default();
    modified.insert("amount".to_string(), json!(25));
    conversation
        .confirm_tool_execution(&id, Some(modified))
        .unwrap();

    let status = conversation.execute().await.unwrap();
    assert_eq!(
        status.output_values().unwrap()["receipt"],
        json!("transferred 25")
    );
}

#[tokio::test]
async fn rejection_synthesizes_a_message_result() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(transfer_tool()),
        &[("receipt", Property::string("receipt"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("amount", json!(100))]))
        .unwrap();

    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolConfirmation { requests } = &status else {
        panic!("expected confirmation gate");
    };
    let id = requests[0].id.clone();

    conversation
        .reject_tool_execution(&id, Some("budget freeze".to_string()))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    let receipt = status.output_values().unwrap()["receipt"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(receipt.contains("rejected"));
    assert!(receipt.contains("budget freeze"));
}

#[tokio::test]
async fn rejection_raises_when_configured() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(transfer_tool()).with_raise_exceptions(true),
        &[],
    );
    let mut conversation = flow
        .start_conversation(inputs([("amount", json!(100))]))
        .unwrap();

    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolConfirmation { requests } = &status else {
        panic!("expected confirmation gate");
    };
    let id = requests[0].id.clone();

    conversation.reject_tool_execution(&id, None).unwrap();
    let err = conversation.execute().await.unwrap_err();
    let ExecutionError::Step { source, .. } = err else {
        panic!("expected step failure");
    };
    assert_eq!(source.exception_name(), "ToolExecutionRejected");
}

#[tokio::test]
async fn tool_failure_is_coerced_to_string_by_default() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(failing_tool()),
        &[("message", Property::string("message"))],
    );
    let mut conversation = flow.start_conversation(FxHashMap::default()).unwrap();
    let status = conversation.execute().await.unwrap();
    assert_eq!(
        status.output_values().unwrap()["message"],
        json!("TimeoutError: upstream stalled")
    );
}

#[tokio::test]
async fn tool_failure_propagates_when_raising() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(failing_tool()).with_raise_exceptions(true),
        &[],
    );
    let mut conversation = flow.start_conversation(FxHashMap::default()).unwrap();

    let err = conversation.execute().await.unwrap_err();
    let ExecutionError::Step { source, .. } = err else {
        panic!("expected step failure");
    };
    assert_eq!(source.exception_name(), "TimeoutError");

    // The failure left the cursor un-advanced: the conversation is safe
    // to retry, and retrying invokes the tool again as a fresh call.
    assert!(conversation.status().is_none());
    let err = conversation.execute().await.unwrap_err();
    assert!(matches!(err, ExecutionError::Step { .. }));
}

#[tokio::test]
async fn multi_output_tools_must_cover_every_output() {
    let quotient = Arc::new(
        FnTool::builder("divmod")
            .input(Property::integer("a"))
            .input(Property::integer("b"))
            .output(Property::integer("quotient"))
            .output(Property::integer("remainder"))
            .handler(|req| {
                let a = req.args["a"].as_i64().unwrap_or(0);
                let b = req.args["b"].as_i64().unwrap_or(1);
                Ok(json!({"quotient": a / b, "remainder": a % b}))
            })
            .build(),
    );
    let flow = single_tool_flow(
        ToolExecutionStep::new(quotient),
        &[
            ("quotient", Property::integer("quotient")),
            ("remainder", Property::integer("remainder")),
        ],
    );
    let mut conversation = flow
        .start_conversation(inputs([("a", json!(17)), ("b", json!(5))]))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    let outputs = status.output_values().unwrap();
    assert_eq!(outputs["quotient"], json!(3));
    assert_eq!(outputs["remainder"], json!(2));

    // A multi-output tool returning a partial mapping is an error.
    let partial = Arc::new(
        FnTool::builder("partial")
            .output(Property::integer("x"))
            .output(Property::integer("y"))
            .handler(|_| Ok(json!({"x": 1})))
            .build(),
    );
    let flow = single_tool_flow(ToolExecutionStep::new(partial), &[]);
    let mut conversation = flow.start_conversation(FxHashMap::default()).unwrap();
    let err = conversation.execute().await.unwrap_err();
    let ExecutionError::Step { source, .. } = err else {
        panic!("expected step failure");
    };
    assert!(matches!(source, StepError::InvalidOutput { .. }));
}

#[tokio::test]
async fn looping_flows_mint_fresh_requests_per_pass() {
    let flow = Arc::new(
        FlowBuilder::new("poller")
            .add_step("call", ToolExecutionStep::new(remote_tool()))
            .begin("call")
            .end("call")
            .bind_input("call", "query", json!("status?"))
            .looping()
            .build()
            .unwrap(),
    );
    let mut conversation = flow.start_conversation(FxHashMap::default()).unwrap();

    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolResult { requests } = &status else {
        panic!("expected result wait");
    };
    let first_id = requests[0].id.clone();

    conversation
        .append_tool_result(ToolResult::ok(&first_id, json!("running")))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolResult { requests } = &status else {
        panic!("expected a second result wait");
    };
    // A completed call cleared its context; the next pass is a fresh
    // logical call with a fresh id.
    assert_ne!(requests[0].id, first_id);
}

#[tokio::test]
async fn input_and_output_renames_apply() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(echo_tool())
            .with_input_renamed("text", "utterance")
            .with_output_renamed("echoed", "reply"),
        &[("reply", Property::string("reply"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("utterance", json!("hi"))]))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    assert_eq!(status.output_values().unwrap()["reply"], json!("hi"));
}

#[tokio::test]
async fn resumption_protocol_misuse_is_rejected() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(remote_tool()),
        &[("answer", Property::string("answer"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("query", json!("q"))]))
        .unwrap();

    // Not awaiting anything yet.
    let err = conversation
        .append_tool_result(ToolResult::ok("tc-bogus", json!(1)))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotAwaitingToolResults));

    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolResult { requests } = &status else {
        panic!("expected result wait");
    };
    let id = requests[0].id.clone();

    // Uncorrelated id.
    let err = conversation
        .append_tool_result(ToolResult::ok("tc-bogus", json!(1)))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownToolRequest { .. }));

    // Confirmations are a different wait state.
    let err = conversation.confirm_tool_execution(&id, None).unwrap_err();
    assert!(matches!(err, ProtocolError::NotAwaitingConfirmation));

    // Duplicate result.
    conversation
        .append_tool_result(ToolResult::ok(&id, json!("a")))
        .unwrap();
    let err = conversation
        .append_tool_result(ToolResult::ok(&id, json!("b")))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::DuplicateToolResult { .. }));
}

#[tokio::test]
async fn confirmation_decisions_are_recorded_once() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(transfer_tool()),
        &[("receipt", Property::string("receipt"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("amount", json!(1))]))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolConfirmation { requests } = &status else {
        panic!("expected confirmation gate");
    };
    let id = requests[0].id.clone();

    conversation.confirm_tool_execution(&id, None).unwrap();
    let err = conversation.reject_tool_execution(&id, None).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::ConfirmationAlreadyDecided { .. }
    ));
}

#[tokio::test]
async fn client_tool_failure_result_follows_raise_flag() {
    let flow = single_tool_flow(
        ToolExecutionStep::new(remote_tool()),
        &[("answer", Property::string("answer"))],
    );
    let mut conversation = flow
        .start_conversation(inputs([("query", json!("q"))]))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    let ExecutionStatus::AwaitingToolResult { requests } = &status else {
        panic!("expected result wait");
    };
    let id = requests[0].id.clone();

    conversation
        .append_tool_result(ToolResult::failure(&id, "ValueError", "no such host"))
        .unwrap();
    let status = conversation.execute().await.unwrap();
    assert_eq!(
        status.output_values().unwrap()["answer"],
        json!("ValueError: no such host")
    );
}
