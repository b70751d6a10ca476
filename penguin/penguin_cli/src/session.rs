//! Line-oriented interactive session. Every accepted change reruns the whole
//! cycle against the cached snapshot.

use std::{
    io::{BufRead, Write},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use penguin_species::{
    input::InputChange, presenter::render, Classifier, DatasetSnapshot, PipelineTelemetry,
    QueryInput, SpeciesPipeline,
};
use serde_json::json;
use shared_logging::LogLevel;

const HELP: &str = "\
commands:
  field=value [field=value ...]   change inputs and predict again
                                  (island, sex, bill_length_mm, bill_depth_mm,
                                   flipper_length_mm, body_mass_g)
  show                            print the current inputs
  reset                           restore the starting inputs
  help                            print this text
  quit                            leave the session";

/// A parsed session line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// One or more `field=value` changes applied together.
    Set(Vec<(String, String)>),
    Show,
    Reset,
    Help,
    Quit,
}

/// Parses a line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<SessionCommand>> {
    let line = line.trim();
    let command = match line {
        "" => return Ok(None),
        "show" => SessionCommand::Show,
        "reset" => SessionCommand::Reset,
        "help" | "?" => SessionCommand::Help,
        "quit" | "exit" => SessionCommand::Quit,
        _ => {
            let mut changes = Vec::new();
            for token in line.split_whitespace() {
                let Some((field, value)) = token.split_once('=') else {
                    bail!("unrecognised command `{token}`, try `help`");
                };
                if field.is_empty() || value.is_empty() {
                    bail!("expected field=value, got `{token}`");
                }
                changes.push((field.to_string(), value.to_string()));
            }
            SessionCommand::Set(changes)
        }
    };
    Ok(Some(command))
}

/// Applies every change to a copy of `input`. The first failure discards the
/// whole set. Returns the copy and the changes that had to clamp, each with
/// the value originally requested.
pub fn apply_changes<'r, F: AsRef<str>>(
    input: &QueryInput,
    changes: &'r [(F, String)],
) -> Result<(QueryInput, Vec<(InputChange, &'r str)>)> {
    let mut next = input.clone();
    let mut clamped = Vec::new();
    for (field, raw) in changes {
        let field = field.as_ref();
        let change = next
            .set(field, raw)
            .with_context(|| format!("setting {field}"))?;
        if change.clamped {
            clamped.push((change, raw.as_str()));
        }
    }
    Ok((next, clamped))
}

/// Logs clamps from a committed set of changes.
pub fn log_clamps(clamped: &[(InputChange, &str)], telemetry: &PipelineTelemetry) -> Result<()> {
    for (change, requested) in clamped {
        telemetry.log(
            LogLevel::Warn,
            "input.clamped",
            json!({ "field": change.field, "requested": requested, "value": change.value }),
        )?;
    }
    Ok(())
}

/// Renders the inputs on one line.
#[must_use]
pub fn describe(input: &QueryInput) -> String {
    format!(
        "island={} sex={} bill_length_mm={} bill_depth_mm={} flipper_length_mm={} body_mass_g={}",
        input.island,
        input.sex,
        input.bill_length_mm,
        input.bill_depth_mm,
        input.flipper_length_mm,
        input.body_mass_g
    )
}

/// Interactive loop state.
pub struct Session<'a, C: Classifier> {
    pipeline: &'a SpeciesPipeline<C>,
    snapshot: Arc<DatasetSnapshot>,
    initial: QueryInput,
    input: QueryInput,
    telemetry: PipelineTelemetry,
}

impl<'a, C: Classifier> Session<'a, C> {
    /// Creates a session starting from `input`.
    pub fn new(
        pipeline: &'a SpeciesPipeline<C>,
        snapshot: Arc<DatasetSnapshot>,
        input: QueryInput,
        telemetry: PipelineTelemetry,
    ) -> Self {
        Self {
            pipeline,
            snapshot,
            initial: input.clone(),
            input,
            telemetry,
        }
    }

    /// Current inputs.
    pub const fn input(&self) -> &QueryInput {
        &self.input
    }

    /// Predicts once for the starting inputs, then serves commands until
    /// `quit` or end of input. Cycle and parse errors are printed and the
    /// loop carries on.
    pub fn run<R: BufRead, W: Write>(&mut self, reader: R, out: &mut W) -> Result<()> {
        writeln!(out, "{HELP}")?;
        writeln!(out, "{}", describe(&self.input))?;
        self.cycle(out)?;
        for line in reader.lines() {
            let line = line.context("reading session input")?;
            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(SessionCommand::Quit)) => break,
                Ok(Some(command)) => self.handle(command, out)?,
                Err(err) => writeln!(out, "error: {err:#}")?,
            }
        }
        self.telemetry.log(
            LogLevel::Info,
            "session.closed",
            json!({ "inputs": describe(&self.input) }),
        )?;
        Ok(())
    }

    fn handle<W: Write>(&mut self, command: SessionCommand, out: &mut W) -> Result<()> {
        match command {
            SessionCommand::Set(changes) => {
                let (next, clamped) = match apply_changes(&self.input, &changes) {
                    Ok(applied) => applied,
                    Err(err) => {
                        writeln!(out, "error: {err:#}")?;
                        return Ok(());
                    }
                };
                self.input = next;
                log_clamps(&clamped, &self.telemetry)?;
                for (change, _) in &clamped {
                    writeln!(out, "note: {} clamped to {}", change.field, change.value)?;
                }
                self.cycle(out)
            }
            SessionCommand::Show => {
                writeln!(out, "{}", describe(&self.input))?;
                Ok(())
            }
            SessionCommand::Reset => {
                self.input = self.initial.clone();
                writeln!(out, "{}", describe(&self.input))?;
                self.cycle(out)
            }
            SessionCommand::Help => {
                writeln!(out, "{HELP}")?;
                Ok(())
            }
            SessionCommand::Quit => Ok(()),
        }
    }

    fn cycle<W: Write>(&self, out: &mut W) -> Result<()> {
        match self
            .pipeline
            .run(&self.snapshot, &self.input.to_feature_record())
        {
            Ok(result) => write!(out, "{}", render(&result.table(), result.predicted))?,
            Err(err) => writeln!(out, "error: {err}")?,
        }
        Ok(())
    }
}
