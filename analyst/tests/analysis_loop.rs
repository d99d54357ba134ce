//! End-to-end loop behavior with scripted collaborators.

use std::fs;

use analyst::core::types::{StepStatus, TableSummary, ValidationResult};
use analyst::io::config::AnalystConfig;
use analyst::io::sandbox::ExecOutput;
use analyst::session::{AnalysisOutcome, AnalysisSession};
use analyst::test_support::{
    ScriptedClient, ScriptedResponse, ScriptedSandbox, plan_response, tool_call,
    validation_response,
};

fn test_config(temp: &tempfile::TempDir) -> AnalystConfig {
    AnalystConfig {
        workspace_dir: temp.path().join("workspace"),
        prompt_log_path: temp.path().join("logs/prompts.log"),
        ..AnalystConfig::default()
    }
}

fn ok_exec(stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Startup loads the CSVs into the sandbox, and the first plan's prompts
/// see both the workspace file and the auto-loaded code.
#[test]
fn startup_auto_load_feeds_the_first_interaction() {
    let temp = tempfile::tempdir().expect("tempdir");
    let input = temp.path().join("monthly sales.csv");
    fs::write(&input, "month,amount\njan,10\nfeb,20\n").expect("write input");

    let client = ScriptedClient::new(vec![
        ScriptedResponse::Json(plan_response(&["sum the amounts"])),
        ScriptedResponse::Json(tool_call("print(monthly_sales['amount'].sum())")),
        ScriptedResponse::Json(validation_response(&ValidationResult::Complete {
            summary: "the total is 30".to_string(),
        })),
    ]);
    let mut sandbox = ScriptedSandbox::with_outputs(vec![ok_exec(""), ok_exec("30\n")]);
    sandbox.summaries.insert(
        "monthly_sales".to_string(),
        TableSummary::Profile {
            shape: (2, 2),
            columns: [
                ("month".to_string(), "object".to_string()),
                ("amount".to_string(), "int64".to_string()),
            ]
            .into_iter()
            .collect(),
            head_sample: "month,amount\njan,10\n".to_string(),
        },
    );

    let mut session = AnalysisSession::new(client, sandbox, test_config(&temp)).expect("session");
    session.load_tables(&[input]).expect("load tables");

    // The auto-load went through the sandbox and into the ledger.
    assert_eq!(session.state().ledger().len(), 1);
    let auto_load = &session.state().ledger()[0];
    assert!(auto_load.code.contains("monthly_sales = pd.read_csv('monthly sales.csv')"));
    assert_eq!(auto_load.step_id, None);

    let report = session.run_analysis("what is the total?").expect("run");
    assert_eq!(report.message(), "the total is 30");

    let prompts = session.client().prompts();
    // Planner saw the workspace file and the table summary.
    assert!(prompts[0].contains("`monthly sales.csv`"));
    assert!(prompts[0].contains("monthly_sales"));
    assert!(prompts[0].contains("2 rows x 2 columns"));
    // Worker saw the auto-load code as already executed.
    assert!(prompts[1].contains("pd.read_csv('monthly sales.csv')"));
}

/// A second interaction sees the first one as history, and the ledger
/// keeps growing across interactions without reordering.
#[test]
fn history_and_ledger_span_interactions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let client = ScriptedClient::new(vec![
        // First interaction.
        ScriptedResponse::Json(plan_response(&["count rows"])),
        ScriptedResponse::Json(tool_call("print(len(df))")),
        ScriptedResponse::Json(validation_response(&ValidationResult::Complete {
            summary: "there are 100 rows".to_string(),
        })),
        // Second interaction.
        ScriptedResponse::Json(plan_response(&["count columns"])),
        ScriptedResponse::Json(tool_call("print(len(df.columns))")),
        ScriptedResponse::Json(validation_response(&ValidationResult::Complete {
            summary: "there are 3 columns".to_string(),
        })),
    ]);
    let sandbox = ScriptedSandbox::with_outputs(vec![ok_exec("100\n"), ok_exec("3\n")]);
    let mut session = AnalysisSession::new(client, sandbox, test_config(&temp)).expect("session");

    let first = session.run_analysis("how many rows?").expect("first run");
    assert_eq!(first.message(), "there are 100 rows");
    let ledger_after_first: Vec<String> = session
        .state()
        .ledger()
        .iter()
        .map(|entry| entry.code.clone())
        .collect();

    let second = session.run_analysis("how many columns?").expect("second run");
    assert_eq!(second.message(), "there are 3 columns");

    // Ledger grew by exactly the successful steps and kept prior entries
    // byte-identical, in order.
    let ledger_after_second: Vec<String> = session
        .state()
        .ledger()
        .iter()
        .map(|entry| entry.code.clone())
        .collect();
    assert_eq!(ledger_after_second.len(), ledger_after_first.len() + 1);
    assert_eq!(&ledger_after_second[..ledger_after_first.len()], &ledger_after_first[..]);

    // The second planner prompt replayed the first interaction's outcome.
    let prompts = session.client().prompts();
    assert!(prompts[3].contains("how many rows?"));
    assert!(prompts[3].contains("complete - there are 100 rows"));
    // And the second worker prompt replayed the first interaction's code.
    assert!(prompts[4].contains("print(len(df))"));

    assert_eq!(session.state().past_interactions().len(), 1);
}

/// Replaced plans never resume old steps; only the failing step's own
/// attempts ever reach the sandbox.
#[test]
fn replaced_plans_never_resume_executed_steps() {
    let temp = tempfile::tempdir().expect("tempdir");
    let client = ScriptedClient::new(vec![
        ScriptedResponse::Json(plan_response(&["bad step", "never reached"])),
        // Worker retries exhaust on the first step.
        ScriptedResponse::Json(tool_call("boom()")),
        ScriptedResponse::Json(tool_call("boom()")),
        ScriptedResponse::Json(tool_call("boom()")),
        // Replacement plan fails to parse: cycle aborts, then the budget
        // runs out on malformed plans.
        ScriptedResponse::Json(serde_json::json!({"plan": "nope"})),
        ScriptedResponse::Json(serde_json::json!({"plan": "nope"})),
    ]);
    let sandbox = ScriptedSandbox::always(ExecOutput {
        stdout: String::new(),
        stderr: "NameError: boom".to_string(),
    });
    let mut session = AnalysisSession::new(client, sandbox, test_config(&temp)).expect("session");

    let report = session.run_analysis("do the thing").expect("run");
    assert_eq!(report.outcome, AnalysisOutcome::Exhausted);

    // Never-reached steps of a replaced plan are not executed; the sandbox
    // only ever saw the failing step's attempts.
    let executed = &session.sandbox().executed;
    assert_eq!(executed.len(), 3);
    assert!(executed.iter().all(|code| code.contains("boom()")));
    assert!(session.state().ledger().is_empty());
    // The last recorded plan is the sentinel from the broken re-plan.
    assert_eq!(session.state().plan().len(), 1);
    assert_eq!(session.state().plan()[0].status, StepStatus::Failed);
}

/// The legacy `step_<n>` plan shape drives the loop exactly like the flat
/// list shape.
#[test]
fn legacy_plan_shape_executes_in_id_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let client = ScriptedClient::new(vec![
        ScriptedResponse::Json(serde_json::json!({"plan": {
            "step_2": {"description": "second"},
            "step_1": {"description": "first"}
        }})),
        ScriptedResponse::Json(tool_call("print('first')")),
        ScriptedResponse::Json(tool_call("print('second')")),
        ScriptedResponse::Json(validation_response(&ValidationResult::Complete {
            summary: "both ran".to_string(),
        })),
    ]);
    let sandbox = ScriptedSandbox::with_outputs(vec![ok_exec("first\n"), ok_exec("second\n")]);
    let mut session = AnalysisSession::new(client, sandbox, test_config(&temp)).expect("session");

    let report = session.run_analysis("run both").expect("run");
    assert_eq!(report.message(), "both ran");

    let plan = session.state().plan();
    assert_eq!(plan[0].task, "first");
    assert_eq!(plan[1].task, "second");
    assert!(plan.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(session.sandbox().executed.len(), 2);
    assert!(session.sandbox().executed[0].contains("print('first')"));
}
