//! SARIF 2.1.0 report of conversion failures.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use serde_sarif::sarif::{
    ArtifactLocation, Invocation, Location, LogicalLocation, Message, MultiformatMessageString,
    PhysicalLocation, PropertyBag, ReportingDescriptor, Result as SarifResult, Run, SCHEMA_URL,
    Sarif, Tool, ToolComponent,
};

use crate::driver::ConversionSummary;
use crate::handler::{Failure, INPUT_ERROR};

/// Run metadata stored as invocation properties.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReportStats {
    pub duration_ms: u128,
    pub summary: ConversionSummary,
}

pub fn build_report(failures: &[Failure], stats: &ReportStats, successful: bool) -> Sarif {
    let codes: BTreeSet<&str> = failures.iter().map(|failure| failure.code.as_str()).collect();
    let rules: Vec<ReportingDescriptor> = codes.into_iter().map(rule_descriptor).collect();
    let results: Vec<SarifResult> = failures.iter().map(failure_result).collect();

    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("dex2class")
            .version(env!("CARGO_PKG_VERSION"))
            .build()
    } else {
        ToolComponent::builder()
            .name("dex2class")
            .version(env!("CARGO_PKG_VERSION"))
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![build_invocation(stats, successful)])
        .results(results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

/// Writes `sarif` to `path`, or to stdout for `-`.
pub fn write_report(path: &Path, sarif: &Sarif) -> Result<()> {
    let mut writer: Box<dyn Write> = if path == Path::new("-") {
        Box::new(io::stdout())
    } else {
        Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )
    };
    serde_json::to_writer_pretty(&mut writer, sarif).context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")
}

fn build_invocation(stats: &ReportStats, successful: bool) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let summary = &stats.summary;
    let mut properties = BTreeMap::new();
    properties.insert("dex2class.duration_ms".to_string(), json!(stats.duration_ms));
    properties.insert("dex2class.class_count".to_string(), json!(summary.classes));
    properties.insert(
        "dex2class.failed_class_count".to_string(),
        json!(summary.failed_classes),
    );
    properties.insert(
        "dex2class.failed_method_count".to_string(),
        json!(summary.failed_methods),
    );
    properties.insert(
        "dex2class.failed_file_count".to_string(),
        json!(summary.failed_files),
    );

    Invocation::builder()
        .execution_successful(successful)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn rule_descriptor(code: &str) -> ReportingDescriptor {
    let description = match code {
        INPUT_ERROR => "Input file could not be read or decoded",
        "MALFORMED_INPUT" => "Decoded input is malformed",
        "TYPE_CONFLICT" => "Local variable used with incompatible types",
        "IR_INVARIANT" => "Internal error: ill-formed intermediate representation",
        "METHOD_TOO_LARGE" => "Method code exceeds the class-file limit",
        "BRANCH_OUT_OF_RANGE" => "Branch offset does not fit in 16 bits",
        "CONSTANT_POOL_OVERFLOW" => "Constant pool exceeds the class-file limit",
        "LOWERING_FAILED" => "IR could not be lowered to bytecode",
        _ => "Conversion failed",
    };
    ReportingDescriptor::builder()
        .id(code)
        .short_description(MultiformatMessageString::builder().text(description).build())
        .build()
}

fn failure_result(failure: &Failure) -> SarifResult {
    let location = if failure.code == INPUT_ERROR {
        let artifact_location = ArtifactLocation::builder()
            .uri(failure.location.clone())
            .build();
        Location::builder()
            .physical_location(
                PhysicalLocation::builder()
                    .artifact_location(artifact_location)
                    .build(),
            )
            .build()
    } else {
        let logical = match &failure.method {
            Some(method) => LogicalLocation::builder()
                .name(format!("{}.{}", failure.location, method))
                .kind("function")
                .build(),
            None => LogicalLocation::builder()
                .name(failure.location.clone())
                .kind("type")
                .build(),
        };
        Location::builder().logical_locations(vec![logical]).build()
    };
    SarifResult::builder()
        .rule_id(failure.code.clone())
        .message(Message::builder().text(failure.message.clone()).build())
        .locations(vec![location])
        .build()
}
